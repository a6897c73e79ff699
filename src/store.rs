//! # Series Storage
//!
//! Per-location persistence behind a trait, so the pipeline can run against
//! an in-memory map in tests and a directory of CSV files in production.
//!
//! The engine assumes a single writer per location: callers that reconcile
//! locations in parallel must never hand the same location to two in-flight
//! cycles. The store itself does no locking.

use crate::model::{self, MetricKind, Observation, Schema, Series};
use anyhow::{bail, Context, Result};
use hashbrown::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

/// Per-location storage for canonical series.
pub trait SeriesStore {
    /// Load the persisted series for a location, if any.
    fn load(&self, location: &str) -> Result<Option<Series>>;
    /// Persist a series, replacing any previous version for its location.
    fn save(&mut self, series: &Series) -> Result<()>;
    /// All locations with a persisted series, sorted.
    fn locations(&self) -> Result<Vec<String>>;
}

/// In-memory store for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    series: HashMap<String, Series>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SeriesStore for MemoryStore {
    fn load(&self, location: &str) -> Result<Option<Series>> {
        Ok(self.series.get(location).cloned())
    }

    fn save(&mut self, series: &Series) -> Result<()> {
        self.series
            .insert(series.location().to_string(), series.clone());
        Ok(())
    }

    fn locations(&self) -> Result<Vec<String>> {
        let mut locations: Vec<String> = self.series.keys().cloned().collect();
        locations.sort();
        Ok(locations)
    }
}

/// Descriptive columns every persisted file carries ahead of the metrics.
const FIXED_COLUMNS: &[&str] = &["location", "date", "vaccine", "source_url"];

/// One `<location>.csv` file per location under a data directory.
///
/// Count columns are written without decimals, rates with their shortest
/// round-trippable representation, and nulls as empty cells, so a saved
/// series reloads bit-identical. Metric kinds are re-inferred from column
/// names on load.
#[derive(Debug, Clone)]
pub struct CsvStore {
    dir: PathBuf,
}

impl CsvStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating store directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, location: &str) -> PathBuf {
        self.dir.join(format!("{location}.csv"))
    }
}

impl SeriesStore for CsvStore {
    fn load(&self, location: &str) -> Result<Option<Series>> {
        let path = self.path_for(location);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut rows = parse_rows(&text);
        if rows.is_empty() {
            bail!("{}: missing header row", path.display());
        }
        let header = rows.remove(0);

        let mut fixed = [None; 4];
        let mut metrics = Vec::new();
        for (position, name) in header.iter().enumerate() {
            match FIXED_COLUMNS.iter().position(|c| *c == name.as_str()) {
                Some(slot) => fixed[slot] = Some(position),
                None => metrics.push((position, name.clone())),
            }
        }
        let date_position = fixed[1]
            .with_context(|| format!("{}: missing `date` column", path.display()))?;

        let schema = Schema::from_names(metrics.iter().map(|(_, name)| name.clone()));
        let mut series = Series::new(location, schema);
        for cells in rows {
            let raw_date = cells.get(date_position).map(String::as_str).unwrap_or("");
            let date = model::parse_date(raw_date)
                .with_context(|| format!("{}: bad date cell", path.display()))?;
            let mut row = Observation::new(date, metrics.len());
            row.vaccine = fixed[2].and_then(|p| non_empty(cells.get(p)));
            row.source_url = fixed[3].and_then(|p| non_empty(cells.get(p)));
            for (target, (position, name)) in metrics.iter().enumerate() {
                let cell = cells.get(*position).map(String::as_str).unwrap_or("");
                if !cell.is_empty() {
                    let value: f64 = cell.parse().with_context(|| {
                        format!("{}: bad numeric cell `{cell}` in `{name}`", path.display())
                    })?;
                    row.values[target] = Some(value);
                }
            }
            series.push_row(row);
        }
        Ok(Some(series))
    }

    fn save(&mut self, series: &Series) -> Result<()> {
        let mut text = String::new();
        let mut header: Vec<String> = FIXED_COLUMNS.iter().map(|s| s.to_string()).collect();
        header.extend(series.schema().names().map(str::to_string));
        write_row(&mut text, &header);

        for row in series.rows() {
            let mut cells = vec![
                series.location().to_string(),
                model::format_date(row.date),
                row.vaccine.clone().unwrap_or_default(),
                row.source_url.clone().unwrap_or_default(),
            ];
            for (value, spec) in row.values.iter().zip(series.schema().columns()) {
                cells.push(match value {
                    Some(value) => render_value(*value, spec.kind),
                    None => String::new(),
                });
            }
            write_row(&mut text, &cells);
        }

        let path = self.path_for(series.location());
        fs::write(&path, text).with_context(|| format!("writing {}", path.display()))
    }

    fn locations(&self) -> Result<Vec<String>> {
        let mut locations = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("listing {}", self.dir.display()))?
        {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "csv") {
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    locations.push(stem.to_string());
                }
            }
        }
        locations.sort();
        Ok(locations)
    }
}

fn non_empty(cell: Option<&String>) -> Option<String> {
    cell.filter(|cell| !cell.is_empty()).cloned()
}

fn render_value(value: f64, kind: MetricKind) -> String {
    match kind {
        MetricKind::Count if value.fract() == 0.0 => format!("{}", value as i64),
        _ => value.to_string(),
    }
}

/// Minimal CSV parser, quote and CRLF tolerant.
fn parse_rows(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if in_quotes {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                } else {
                    in_quotes = true;
                }
            }
            ',' if !in_quotes => row.push(std::mem::take(&mut field)),
            '\n' | '\r' if !in_quotes => {
                if ch == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                row.push(std::mem::take(&mut field));
                if !(row.len() == 1 && row[0].is_empty()) {
                    rows.push(std::mem::take(&mut row));
                }
                row.clear();
            }
            _ => field.push(ch),
        }
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

fn write_row(out: &mut String, cells: &[String]) {
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if cell.contains(',') || cell.contains('"') || cell.contains('\n') || cell.contains('\r') {
            let _ = write!(out, "\"{}\"", cell.replace('"', "\"\""));
        } else {
            out.push_str(cell);
        }
    }
    out.push('\n');
}
