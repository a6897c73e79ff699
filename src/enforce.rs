//! # Monotonicity Enforcement
//!
//! Forces cumulative metric columns to be non-decreasing over date. Sources
//! occasionally publish an erroneous upward spike that a later report
//! silently corrects downward; because later reports are taken as
//! authoritative, the row or cell whose value exceeds the next reported
//! value is treated as the error and erased, not the later value.
//!
//! Two repair policies are supported:
//!
//! - [`RepairPolicy::DropRows`]: remove every anomalous row outright. The
//!   removal affects all columns of the row, not just the flagged metric.
//! - [`RepairPolicy::NullCells`]: null only the flagged metric cell and
//!   leave the rest of the row intact. This is the default.
//!
//! Both policies run to a fixed point per metric and are bounded by a
//! damage budget; exceeding it raises [`Error::TooManyCorrections`] instead
//! of silently applying a large correction, since an implausible number of
//! corrections signals a source format change or real data corruption.

use crate::error::Error;
use crate::model::Series;
use time::Date;

/// How anomalous values are repaired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepairPolicy {
    /// Remove the whole anomalous row, affecting every column.
    DropRows,
    /// Null only the anomalous cell of the flagged metric.
    #[default]
    NullCells,
}

/// Which side of a backward step is considered wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthorityRule {
    /// The most recent report is correct: the earlier, higher value is the
    /// anomaly.
    #[default]
    LatestAuthoritative,
    /// The larger value is correct: the later, smaller value is the anomaly.
    LargestAuthoritative,
}

/// Options for one enforcement pass.
#[derive(Debug, Clone)]
pub struct EnforceOptions {
    /// Metric columns subject to monotonicity.
    pub columns: Vec<String>,
    /// Damage budget. Under [`RepairPolicy::DropRows`] this caps the total
    /// number of distinct dates removed across all metrics; under
    /// [`RepairPolicy::NullCells`] it caps the number of cells nulled per
    /// metric.
    pub max_damage: usize,
    /// Treat equal consecutive values as a violation.
    pub strict: bool,
    pub policy: RepairPolicy,
    pub authority: AuthorityRule,
}

impl EnforceOptions {
    /// Options for the given columns with the production defaults: a budget
    /// of 10, non-strict comparison, cell-null repair, latest-authoritative.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            max_damage: 10,
            strict: false,
            policy: RepairPolicy::default(),
            authority: AuthorityRule::default(),
        }
    }

    pub fn with_max_damage(mut self, max_damage: usize) -> Self {
        self.max_damage = max_damage;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_policy(mut self, policy: RepairPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_authority(mut self, authority: AuthorityRule) -> Self {
        self.authority = authority;
        self
    }
}

/// Repair monotonicity violations in the given series.
///
/// The input is left untouched; the repaired series is returned sorted by
/// date. Raises [`Error::SchemaMismatch`] if a configured column is missing
/// and [`Error::TooManyCorrections`] if the budget is exceeded.
pub fn enforce(series: &Series, options: &EnforceOptions) -> Result<Series, Error> {
    let mut sorted = series.clone();
    sorted.sort_by_date();

    let mut columns = Vec::with_capacity(options.columns.len());
    for name in &options.columns {
        let index = sorted
            .schema()
            .index_of(name)
            .ok_or_else(|| Error::SchemaMismatch {
                column: name.clone(),
            })?;
        columns.push((index, name.as_str()));
    }

    match options.policy {
        RepairPolicy::DropRows => enforce_drop_rows(sorted, &columns, options),
        RepairPolicy::NullCells => enforce_null_cells(sorted, &columns, options),
    }
}

fn enforce_drop_rows(
    mut series: Series,
    columns: &[(usize, &str)],
    options: &EnforceOptions,
) -> Result<Series, Error> {
    let before = series.clone();

    // Metrics are handled sequentially against the shrinking series: a row
    // dropped for an earlier metric is gone when the next metric is scanned.
    for &(index, _) in columns {
        loop {
            let filled = fill_forward(&series.column_values(index));
            let steps = backward_steps(&filled, options.strict);
            if steps.is_empty() {
                break;
            }
            let mut rows: Vec<usize> = steps
                .iter()
                .map(|&i| match options.authority {
                    AuthorityRule::LatestAuthoritative => i,
                    AuthorityRule::LargestAuthoritative => i + 1,
                })
                .collect();
            rows.dedup();
            series.remove_rows(&rows);
        }
    }

    let remaining: std::collections::BTreeSet<Date> = series.dates().collect();
    let mut removed: Vec<Date> = before
        .dates()
        .filter(|date| !remaining.contains(date))
        .collect();
    removed.sort_unstable();
    removed.dedup();

    if removed.len() > options.max_damage {
        let values = before
            .rows()
            .iter()
            .filter(|row| removed.binary_search(&row.date).is_ok())
            .map(|row| columns.iter().map(|&(index, _)| row.values[index]).collect())
            .collect();
        return Err(Error::TooManyCorrections {
            column: columns
                .iter()
                .map(|&(_, name)| name)
                .collect::<Vec<_>>()
                .join(", "),
            dates: removed,
            values,
            budget: options.max_damage,
            run_length: None,
        });
    }

    Ok(series)
}

fn enforce_null_cells(
    mut series: Series,
    columns: &[(usize, &str)],
    options: &EnforceOptions,
) -> Result<Series, Error> {
    let before = series.clone();

    for &(index, _) in columns {
        loop {
            let column = series.column_values(index);
            if is_monotonic_non_null(&column, options.strict) {
                break;
            }
            let filled = fill_backward(&column);
            let steps = backward_steps(&filled, options.strict);
            let mut changed = false;
            for &i in &steps {
                // Map the flagged position back onto an actual non-null cell:
                // a bridged gap must not absorb the correction.
                let target = match options.authority {
                    AuthorityRule::LatestAuthoritative => last_non_null_at_or_before(&column, i),
                    AuthorityRule::LargestAuthoritative => first_non_null_at_or_after(&column, i + 1),
                };
                if let Some(row) = target {
                    if series.value(row, index).is_some() {
                        series.set_value(row, index, None);
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
    }

    // Budget: cells erased per metric, with the longest contiguous run
    // reported for inspection.
    for &(index, name) in columns {
        let erased: Vec<bool> = before
            .rows()
            .iter()
            .zip(series.rows())
            .map(|(old, new)| old.values[index].is_some() && new.values[index].is_none())
            .collect();
        let total = erased.iter().filter(|&&e| e).count();
        if total > options.max_damage {
            let (start, length) = longest_run(&erased);
            let dates: Vec<Date> = before.rows()[start..start + length]
                .iter()
                .map(|row| row.date)
                .collect();
            let values = before.rows()[start..start + length]
                .iter()
                .map(|row| vec![row.values[index]])
                .collect();
            return Err(Error::TooManyCorrections {
                column: name.to_string(),
                dates,
                values,
                budget: options.max_damage,
                run_length: Some(length),
            });
        }
    }

    // A row that contributed nothing to any tracked metric is removed.
    series.retain_rows(|row| columns.iter().any(|&(index, _)| row.values[index].is_some()));

    Ok(series)
}

/// Bridge nulls with the last preceding non-null value.
fn fill_forward(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut last = None;
    values
        .iter()
        .map(|value| {
            if value.is_some() {
                last = *value;
            }
            last
        })
        .collect()
}

/// Bridge nulls with the next following non-null value.
fn fill_backward(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = values.to_vec();
    let mut next = None;
    for value in out.iter_mut().rev() {
        if value.is_some() {
            next = *value;
        } else {
            *value = next;
        }
    }
    out
}

/// Indexes `i` where the bridged pair `(i, i + 1)` steps backward.
fn backward_steps(filled: &[Option<f64>], strict: bool) -> Vec<usize> {
    let mut steps = Vec::new();
    for i in 0..filled.len().saturating_sub(1) {
        let (Some(current), Some(next)) = (filled[i], filled[i + 1]) else {
            continue;
        };
        let backward = if strict {
            next <= current
        } else {
            next < current
        };
        if backward {
            steps.push(i);
        }
    }
    steps
}

/// Whether the non-null subsequence is monotonic (strict: increasing).
fn is_monotonic_non_null(values: &[Option<f64>], strict: bool) -> bool {
    let mut previous: Option<f64> = None;
    for value in values.iter().flatten() {
        if let Some(last) = previous {
            let ok = if strict { *value > last } else { *value >= last };
            if !ok {
                return false;
            }
        }
        previous = Some(*value);
    }
    true
}

fn last_non_null_at_or_before(values: &[Option<f64>], index: usize) -> Option<usize> {
    (0..=index).rev().find(|&i| values[i].is_some())
}

fn first_non_null_at_or_after(values: &[Option<f64>], index: usize) -> Option<usize> {
    (index..values.len()).find(|&i| values[i].is_some())
}

/// Start and length of the longest run of `true` in the mask. The mask is
/// expected to contain at least one `true`.
fn longest_run(mask: &[bool]) -> (usize, usize) {
    let mut best = (0, 0);
    let mut current_start = 0;
    let mut current_length = 0;
    for (i, &flag) in mask.iter().enumerate() {
        if flag {
            if current_length == 0 {
                current_start = i;
            }
            current_length += 1;
            if current_length > best.1 {
                best = (current_start, current_length);
            }
        } else {
            current_length = 0;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Observation, Schema, Series};
    use time::macros::date;
    use time::Duration;

    const METRIC: &str = "total_vaccinations";

    fn series_of(values: &[Option<f64>]) -> Series {
        let schema = Schema::from_names([METRIC]);
        let mut series = Series::new("Testland", schema);
        let start = date!(2021 - 01 - 01);
        for (i, value) in values.iter().enumerate() {
            let mut row = Observation::new(start + Duration::days(i as i64), 1);
            row.values[0] = *value;
            series.push_row(row);
        }
        series
    }

    fn options() -> EnforceOptions {
        EnforceOptions::new([METRIC])
    }

    #[test]
    fn test_fill_forward_bridges_gaps() {
        let filled = fill_forward(&[None, Some(1.0), None, Some(3.0)]);
        assert_eq!(filled, vec![None, Some(1.0), Some(1.0), Some(3.0)]);
    }

    #[test]
    fn test_fill_backward_bridges_gaps() {
        let filled = fill_backward(&[None, Some(1.0), None, Some(3.0)]);
        assert_eq!(filled, vec![Some(1.0), Some(1.0), Some(3.0), Some(3.0)]);
    }

    #[test]
    fn test_monotonic_series_is_untouched() {
        let series = series_of(&[Some(100.0), Some(250.0), Some(280.0), Some(300.0)]);
        let out = enforce(&series, &options()).unwrap();
        assert_eq!(out, {
            let mut sorted = series.clone();
            sorted.sort_by_date();
            sorted
        });
    }

    #[test]
    fn test_all_null_rows_are_dropped_even_without_anomalies() {
        let series = series_of(&[Some(100.0), None, Some(300.0)]);
        let out = enforce(&series, &options()).unwrap();
        assert_eq!(out.column_values(0), vec![Some(100.0), Some(300.0)]);
    }

    #[test]
    fn test_cell_null_erases_the_earlier_higher_value() {
        // [100, 250, 90, 300]: the later report (90) is authoritative, so
        // 250 and then 100 are erased; the emptied rows are dropped.
        let series = series_of(&[Some(100.0), Some(250.0), Some(90.0), Some(300.0)]);
        let out = enforce(&series, &options().with_max_damage(2)).unwrap();
        assert_eq!(out.column_values(0), vec![Some(90.0), Some(300.0)]);
        let dates: Vec<_> = out.dates().collect();
        assert_eq!(dates, vec![date!(2021 - 01 - 03), date!(2021 - 01 - 04)]);
    }

    #[test]
    fn test_largest_authority_nulls_only_the_dip() {
        // Same series under largest-wins: 90 is the single casualty and the
        // other rows survive untouched with the dip cell nulled.
        let schema = Schema::from_names([METRIC, "people_vaccinated"]);
        let mut series = Series::new("Testland", schema);
        let start = date!(2021 - 01 - 01);
        for (i, (total, people)) in [
            (Some(100.0), Some(50.0)),
            (Some(250.0), Some(60.0)),
            (Some(90.0), Some(70.0)),
            (Some(300.0), Some(80.0)),
        ]
        .into_iter()
        .enumerate()
        {
            let mut row = Observation::new(start + Duration::days(i as i64), 2);
            row.values = vec![total, people];
            series.push_row(row);
        }

        let options = EnforceOptions::new([METRIC, "people_vaccinated"])
            .with_authority(AuthorityRule::LargestAuthoritative)
            .with_max_damage(1);
        let out = enforce(&series, &options).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(
            out.column_values(0),
            vec![Some(100.0), Some(250.0), None, Some(300.0)]
        );
        assert_eq!(
            out.column_values(1),
            vec![Some(50.0), Some(60.0), Some(70.0), Some(80.0)]
        );
    }

    #[test]
    fn test_cell_null_budget_exceeded_by_two_separate_corrections() {
        // Two independent one-cell corrections with a budget of one: the
        // second correction pushes past the budget and must raise.
        let series = series_of(&[
            Some(100.0),
            Some(200.0),
            Some(150.0),
            Some(300.0),
            Some(400.0),
            Some(350.0),
            Some(500.0),
        ]);
        let err = enforce(&series, &options().with_max_damage(1)).unwrap_err();
        match err {
            Error::TooManyCorrections {
                column,
                run_length,
                budget,
                ..
            } => {
                assert_eq!(column, METRIC);
                assert_eq!(budget, 1);
                assert_eq!(run_length, Some(1));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let series = series_of(&[
            Some(100.0),
            Some(200.0),
            Some(150.0),
            Some(300.0),
            Some(400.0),
            Some(350.0),
            Some(500.0),
        ]);
        let out = enforce(&series, &options().with_max_damage(2)).unwrap();
        assert_eq!(
            out.column_values(0),
            vec![Some(100.0), Some(150.0), Some(300.0), Some(350.0), Some(500.0)]
        );
    }

    #[test]
    fn test_cell_null_budget_reports_longest_run() {
        // A sustained over-report across three days collapses once the
        // corrected value arrives; the whole run is erased and reported.
        let series = series_of(&[
            Some(100.0),
            Some(900.0),
            Some(910.0),
            Some(920.0),
            Some(200.0),
        ]);
        let err = enforce(&series, &options().with_max_damage(2)).unwrap_err();
        match err {
            Error::TooManyCorrections {
                dates, run_length, values, ..
            } => {
                assert_eq!(run_length, Some(3));
                assert_eq!(
                    dates,
                    vec![date!(2021 - 01 - 02), date!(2021 - 01 - 03), date!(2021 - 01 - 04)]
                );
                assert_eq!(
                    values,
                    vec![vec![Some(900.0)], vec![Some(910.0)], vec![Some(920.0)]]
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_cell_null_budget_boundary() {
        // k corrections with a budget of exactly k succeed.
        let series = series_of(&[
            Some(100.0),
            Some(900.0),
            Some(910.0),
            Some(920.0),
            Some(200.0),
        ]);
        let out = enforce(&series, &options().with_max_damage(3)).unwrap();
        assert_eq!(out.column_values(0), vec![Some(100.0), Some(200.0)]);
    }

    #[test]
    fn test_cell_null_bridges_null_gap() {
        // The dip hides behind a null: [100, None, 90] still flags 100 once
        // the gap is bridged backward.
        let series = series_of(&[Some(100.0), None, Some(90.0), Some(150.0)]);
        let out = enforce(&series, &options()).unwrap();
        assert_eq!(out.column_values(0), vec![Some(90.0), Some(150.0)]);
    }

    #[test]
    fn test_drop_rows_removes_whole_row() {
        let schema = Schema::from_names([METRIC, "people_vaccinated"]);
        let mut series = Series::new("Testland", schema);
        let start = date!(2021 - 01 - 01);
        for (i, (total, people)) in [
            (Some(100.0), Some(50.0)),
            (Some(250.0), Some(60.0)),
            (Some(90.0), Some(70.0)),
            (Some(300.0), Some(80.0)),
        ]
        .into_iter()
        .enumerate()
        {
            let mut row = Observation::new(start + Duration::days(i as i64), 2);
            row.values = vec![total, people];
            series.push_row(row);
        }

        let options = EnforceOptions::new([METRIC, "people_vaccinated"])
            .with_policy(RepairPolicy::DropRows);
        let out = enforce(&series, &options).unwrap();
        // The rows whose totals exceeded the later report are gone from
        // every column, including the one that never violated anything.
        assert_eq!(out.len(), 2);
        assert_eq!(out.column_values(0), vec![Some(90.0), Some(300.0)]);
        assert_eq!(out.column_values(1), vec![Some(70.0), Some(80.0)]);
    }

    #[test]
    fn test_drop_rows_budget_enforced() {
        let series = series_of(&[
            Some(100.0),
            Some(200.0),
            Some(150.0),
            Some(300.0),
            Some(400.0),
            Some(350.0),
            Some(500.0),
        ]);
        let drop = options().with_policy(RepairPolicy::DropRows);

        let err = enforce(&series, &drop.clone().with_max_damage(1)).unwrap_err();
        match err {
            Error::TooManyCorrections {
                dates,
                values,
                run_length,
                ..
            } => {
                assert_eq!(dates, vec![date!(2021 - 01 - 02), date!(2021 - 01 - 05)]);
                assert_eq!(values, vec![vec![Some(200.0)], vec![Some(400.0)]]);
                assert_eq!(run_length, None);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let out = enforce(&series, &drop.with_max_damage(2)).unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(
            out.column_values(0),
            vec![Some(100.0), Some(150.0), Some(300.0), Some(350.0), Some(500.0)]
        );
    }

    #[test]
    fn test_drop_rows_iterates_to_fixed_point() {
        // Removing the first dip exposes another one: 300 > 80 only becomes
        // adjacent after the 90 row is gone. 100 > 80 then drops 100 too.
        let series = series_of(&[Some(100.0), Some(300.0), Some(90.0), Some(80.0), Some(120.0)]);
        let drop = options().with_policy(RepairPolicy::DropRows).with_max_damage(10);
        let out = enforce(&series, &drop).unwrap();
        assert!(is_monotonic_non_null(&out.column_values(0), false));
    }

    #[test]
    fn test_strict_mode_flags_plateaus() {
        let series = series_of(&[Some(100.0), Some(100.0), Some(200.0)]);
        let out = enforce(&series, &options().with_strict(true).with_max_damage(5)).unwrap();
        assert!(is_monotonic_non_null(&out.column_values(0), true));
        // Non-strict leaves the plateau alone.
        let out = enforce(&series, &options()).unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_largest_authoritative_erases_the_later_value() {
        let series = series_of(&[Some(100.0), Some(250.0), Some(90.0), Some(300.0)]);
        let options = options()
            .with_authority(AuthorityRule::LargestAuthoritative)
            .with_max_damage(5);
        let out = enforce(&series, &options).unwrap();
        // Under largest-wins the 250 survives and the 90 is the casualty;
        // latest-wins would have kept the 90 and erased 100 and 250.
        assert_eq!(out.column_values(0), vec![Some(100.0), Some(250.0), Some(300.0)]);

        let tail_dip = series_of(&[Some(100.0), Some(250.0), Some(200.0)]);
        let out = enforce(&tail_dip, &options).unwrap();
        assert_eq!(out.column_values(0), vec![Some(100.0), Some(250.0)]);
    }

    #[test]
    fn test_missing_column_is_a_schema_mismatch() {
        let series = series_of(&[Some(1.0)]);
        let err = enforce(&series, &EnforceOptions::new(["people_vaccinated"])).unwrap_err();
        assert_eq!(
            err,
            Error::SchemaMismatch {
                column: "people_vaccinated".to_string()
            }
        );
    }

    #[test]
    fn test_empty_and_single_row_series() {
        let empty = series_of(&[]);
        assert!(enforce(&empty, &options()).unwrap().is_empty());

        let single = series_of(&[Some(5.0)]);
        assert_eq!(enforce(&single, &options()).unwrap().len(), 1);
    }
}
