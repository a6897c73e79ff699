//! # Postprocessing
//!
//! Final normalization before a series is persisted: stable date ordering,
//! canonical column order, integral casting for cumulative counters, and
//! de-duplication. This step defines what "identical data" means for the
//! idempotence guarantee of repeated reconciliation runs.

use crate::model::{MetricKind, Series};
use time::Date;

/// Normalize a combined series into its canonical persisted form.
///
/// Rows are stably sorted by date, columns are permuted into canonical
/// order, and count columns are rounded to integral values. Duplicate dates
/// should not survive the merge, but are defensively resolved by keeping
/// the later-computed row. With `dedupe_repeats`, adjacent rows identical
/// across every metric column collapse into their first occurrence, for
/// sources that re-report the same cumulative value on consecutive days.
pub fn postprocess(series: &Series, dedupe_repeats: bool) -> Series {
    let mut out = series.clone();

    let kinds: Vec<MetricKind> = out.schema().columns().iter().map(|c| c.kind).collect();
    for row in 0..out.len() {
        for (column, kind) in kinds.iter().enumerate() {
            if *kind == MetricKind::Count {
                if let Some(value) = out.value(row, column) {
                    out.set_value(row, column, Some(value.round()));
                }
            }
        }
    }

    out.sort_by_date();
    out.canonicalize_columns();

    if dedupe_repeats {
        let mut previous: Option<Vec<Option<f64>>> = None;
        out.retain_rows(|row| {
            let keep = previous.as_deref() != Some(row.values.as_slice());
            if keep {
                previous = Some(row.values.clone());
            }
            keep
        });
    }

    // Keep the last row for a date: later-computed provenance wins.
    let dates: Vec<Date> = out.dates().collect();
    let mut position = 0;
    out.retain_rows(|_| {
        let keep = position + 1 >= dates.len() || dates[position + 1] != dates[position];
        position += 1;
        keep
    });

    out
}
