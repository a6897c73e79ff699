//! # Data Model
//!
//! Core data structures for canonical series mastering: metric schemas,
//! dated observations, and per-location series. Dates are calendar days
//! handled through the `time` crate and rendered as ISO-8601.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::Date;

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Canonical ordering for well-known metric columns. Columns not listed here
/// keep their relative order after the known ones.
pub const METRICS: &[&str] = &[
    "total_vaccinations",
    "people_vaccinated",
    "people_fully_vaccinated",
    "total_boosters",
    "total_vaccinations_per_hundred",
    "people_vaccinated_per_hundred",
    "people_fully_vaccinated_per_hundred",
    "people_with_booster_per_hundred",
];

/// Parse an ISO-8601 (`YYYY-MM-DD`) calendar day.
pub fn parse_date(input: &str) -> anyhow::Result<Date> {
    Date::parse(input, DATE_FORMAT)
        .map_err(|err| anyhow::anyhow!("invalid date `{input}`: {err}"))
}

/// Render a calendar day as ISO-8601 (`YYYY-MM-DD`).
pub fn format_date(date: Date) -> String {
    date.format(DATE_FORMAT).expect("date format")
}

/// Numeric class of a metric column.
///
/// Cumulative counters are integral; per-capita rates are floats. The class
/// decides how the postprocessor casts values and how stores render them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    /// Integral cumulative counter (doses, cases, deaths).
    Count,
    /// Per-capita or otherwise fractional rate.
    Rate,
}

impl MetricKind {
    /// Infer the kind from a column name. Per-hundred / per-capita suffixes
    /// mark rates; everything else is a cumulative count.
    pub fn infer(name: &str) -> Self {
        if name.ends_with("_per_hundred") || name.ends_with("_per_capita") {
            MetricKind::Rate
        } else {
            MetricKind::Count
        }
    }
}

/// A named metric column and its numeric class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: MetricKind,
}

impl ColumnSpec {
    /// Create a new column spec.
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Create a column spec inferring the kind from the name.
    pub fn inferred(name: impl Into<String>) -> Self {
        let name = name.into();
        let kind = MetricKind::infer(&name);
        Self { name, kind }
    }
}

impl fmt::Display for ColumnSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Ordered set of metric columns owned by a series.
///
/// Column positions index into [`Observation::values`]; the schema is the
/// single source of truth for column order and numeric class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<ColumnSpec>,
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a schema from column names, inferring each kind.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut schema = Self::new();
        for name in names {
            schema.push(ColumnSpec::inferred(name));
        }
        schema
    }

    /// Add a column if absent; returns the column's index either way.
    pub fn push(&mut self, spec: ColumnSpec) -> usize {
        if let Some(index) = self.index_of(&spec.name) {
            return index;
        }
        self.columns.push(spec);
        self.columns.len() - 1
    }

    /// Index of a column by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Whether a column with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the schema has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// All column specs in order.
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// All column names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Union of two schemas: self's columns first, then the columns only the
    /// other schema has, in their original order.
    pub fn union(&self, other: &Schema) -> Schema {
        let mut merged = self.clone();
        for spec in &other.columns {
            merged.push(spec.clone());
        }
        merged
    }

    /// Column order with well-known metrics first (in [`METRICS`] order),
    /// then the remaining columns in their current order.
    pub fn canonical_indexes(&self) -> Vec<usize> {
        let mut order: Vec<usize> = METRICS
            .iter()
            .filter_map(|name| self.index_of(name))
            .collect();
        for index in 0..self.columns.len() {
            if !order.contains(&index) {
                order.push(index);
            }
        }
        order
    }
}

/// One dated row of a series.
///
/// `values` is parallel to the owning series' schema; a `None` cell is a
/// null. The descriptive fields are not subject to monotonicity but do
/// participate in merge coalescing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: Date,
    pub values: Vec<Option<f64>>,
    pub vaccine: Option<String>,
    pub source_url: Option<String>,
}

impl Observation {
    /// Create an all-null observation for a given schema width.
    pub fn new(date: Date, width: usize) -> Self {
        Self {
            date,
            values: vec![None; width],
            vaccine: None,
            source_url: None,
        }
    }

    /// Whether every metric cell is null.
    pub fn is_all_null(&self) -> bool {
        self.values.iter().all(|v| v.is_none())
    }
}

/// A per-location table of dated observations.
///
/// The canonical, persisted form satisfies two invariants: every metric
/// column is non-decreasing over date among non-null values, and dates are
/// unique. Freshly fetched batches are carried in the same type but may
/// violate both freely until they pass through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    location: String,
    schema: Schema,
    rows: Vec<Observation>,
}

impl Series {
    /// Create an empty series for a location.
    pub fn new(location: impl Into<String>, schema: Schema) -> Self {
        Self {
            location: location.into(),
            schema,
            rows: Vec::new(),
        }
    }

    /// The owning location.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The metric schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// All rows in current order.
    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the series has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row, padding its value vector to the schema width.
    pub fn push_row(&mut self, mut row: Observation) {
        row.values.resize(self.schema.len(), None);
        self.rows.push(row);
    }

    /// Replace all rows at once. Each row is padded to the schema width.
    pub fn set_rows(&mut self, rows: Vec<Observation>) {
        self.rows.clear();
        for row in rows {
            self.push_row(row);
        }
    }

    /// Stable sort by date.
    pub fn sort_by_date(&mut self) {
        self.rows.sort_by_key(|row| row.date);
    }

    /// Dates in row order (may repeat before postprocessing).
    pub fn dates(&self) -> impl Iterator<Item = Date> + '_ {
        self.rows.iter().map(|row| row.date)
    }

    /// A single cell.
    pub fn value(&self, row: usize, column: usize) -> Option<f64> {
        self.rows[row].values[column]
    }

    /// Overwrite a single cell.
    pub fn set_value(&mut self, row: usize, column: usize, value: Option<f64>) {
        self.rows[row].values[column] = value;
    }

    /// Copy of one column in row order.
    pub fn column_values(&self, column: usize) -> Vec<Option<f64>> {
        self.rows.iter().map(|row| row.values[column]).collect()
    }

    /// Remove the rows at the given ascending indexes.
    pub fn remove_rows(&mut self, indexes: &[usize]) {
        let mut cursor = 0;
        let mut position = 0;
        self.rows.retain(|_| {
            let drop = cursor < indexes.len() && indexes[cursor] == position;
            if drop {
                cursor += 1;
            }
            position += 1;
            !drop
        });
    }

    /// Keep only the rows matching the predicate.
    pub fn retain_rows<F>(&mut self, predicate: F)
    where
        F: FnMut(&Observation) -> bool,
    {
        self.rows.retain(predicate);
    }

    /// Add a column if absent (kind inferred), padding existing rows with
    /// nulls. Returns the column's index.
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(index) = self.schema.index_of(name) {
            return index;
        }
        let index = self.schema.push(ColumnSpec::inferred(name));
        for row in &mut self.rows {
            row.values.resize(self.schema.len(), None);
        }
        index
    }

    /// Rebuild the series with columns permuted into the given order.
    pub fn project(&self, order: &[usize]) -> Series {
        let mut schema = Schema::new();
        for &index in order {
            schema.push(self.schema.columns()[index].clone());
        }
        let mut out = Series::new(self.location.clone(), schema);
        for row in &self.rows {
            let mut projected = Observation::new(row.date, order.len());
            projected.vaccine = row.vaccine.clone();
            projected.source_url = row.source_url.clone();
            for (target, &source) in order.iter().enumerate() {
                projected.values[target] = row.values[source];
            }
            out.push_row(projected);
        }
        out
    }

    /// Reorder columns into canonical order in place.
    pub fn canonicalize_columns(&mut self) {
        let order = self.schema.canonical_indexes();
        let identity: Vec<usize> = (0..self.schema.len()).collect();
        if order != identity {
            *self = self.project(&order);
        }
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} rows, {} columns)",
            self.location,
            self.rows.len(),
            self.schema.len()
        )
    }
}
