use canonseries::{Observation, Schema, Series};
use time::macros::date;
use time::{Date, Duration};

/// Day `n` of January 2021 (day 1 = 2021-01-01).
#[allow(dead_code)]
pub fn day(n: i64) -> Date {
    date!(2021 - 01 - 01) + Duration::days(n - 1)
}

/// Build a series from `(day, cells)` tuples over the given metric columns.
#[allow(dead_code)]
pub fn series(location: &str, columns: &[&str], rows: &[(i64, &[Option<f64>])]) -> Series {
    let schema = Schema::from_names(columns.iter().copied());
    let mut out = Series::new(location, schema);
    for &(n, cells) in rows {
        let mut row = Observation::new(day(n), cells.len());
        row.values = cells.to_vec();
        out.push_row(row);
    }
    out
}

/// Like [`series`], but with a vaccine list and source URL on every row.
#[allow(dead_code)]
pub fn described_series(
    location: &str,
    columns: &[&str],
    vaccine: &str,
    source_url: &str,
    rows: &[(i64, &[Option<f64>])],
) -> Series {
    let mut out = series(location, columns, rows);
    let rows: Vec<Observation> = out
        .rows()
        .iter()
        .cloned()
        .map(|mut row| {
            row.vaccine = Some(vaccine.to_string());
            row.source_url = Some(source_url.to_string());
            row
        })
        .collect();
    out.set_rows(rows);
    out
}
