//! # Error Taxonomy
//!
//! Typed errors raised by the reconciliation core. All of these are fatal for
//! the cycle that raised them: the core never downgrades an error into a
//! partial result. Callers that operate at the I/O edge wrap these in
//! `anyhow::Error` and propagate.

use time::Date;

/// Errors raised synchronously by the reconciliation core.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The enforcer would have discarded more data than the damage budget
    /// allows. Carries the affected dates and their pre-correction values so
    /// a human can inspect the offending slice of the series.
    ///
    /// Under the row-drop policy `dates` holds every removed date and each
    /// entry of `values` holds that row's tracked-column values. Under the
    /// cell-null policy `dates` spans the longest run of corrections for
    /// `column`, each `values` entry holds the single erased cell, and
    /// `run_length` is set.
    #[error(
        "{} correction(s) to `{column}` exceed the allowed maximum ({budget}); check dates {}",
        .dates.len(),
        format_dates(.dates)
    )]
    TooManyCorrections {
        column: String,
        dates: Vec<Date>,
        values: Vec<Vec<Option<f64>>>,
        budget: usize,
        run_length: Option<usize>,
    },

    /// An incoming batch carried more than one row for the same date. The
    /// merger refuses to guess which row to keep.
    #[error("duplicate entry for `{location}` on {date}")]
    DuplicateKey { location: String, date: Date },

    /// A column configured for monotonicity checks is missing from the
    /// series, which would otherwise silently skip the check.
    #[error("column `{column}` is configured for monotonicity checks but missing from the series")]
    SchemaMismatch { column: String },

    /// The two inputs to a merge describe different locations.
    #[error("cannot merge series for `{found}` into series for `{expected}`")]
    LocationMismatch { expected: String, found: String },
}

fn format_dates(dates: &[Date]) -> String {
    let mut out = String::new();
    for (i, date) in dates.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&date.to_string());
    }
    out
}
