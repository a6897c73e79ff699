//! # Canonseries
//!
//! A consistency and incremental-reconciliation engine for cumulative-count
//! time series scraped repeatedly from unreliable external sources.
//!
//! Each location owns exactly one canonical, non-decreasing series. A
//! reconciliation cycle merges a freshly fetched batch into the persisted
//! series, repairs monotonicity violations under a damage budget, and
//! normalizes the result before persisting it. Implausibly large
//! corrections are refused with an error instead of silently applied.

pub mod enforce;
pub mod error;
pub mod merge;
pub mod model;
pub mod pipeline;
pub mod postprocess;
pub mod report;
pub mod store;

// Re-export main types for convenience
pub use enforce::{enforce, AuthorityRule, EnforceOptions, RepairPolicy};
pub use error::Error;
pub use merge::{merge, MergeMode};
pub use model::{ColumnSpec, MetricKind, Observation, Schema, Series};
pub use pipeline::{run_cycle, PipelineConfig};
pub use postprocess::postprocess;
pub use report::{CycleOutcome, CycleReport, LogReporter, NullReporter, Reporter, RunReport};
pub use store::{CsvStore, MemoryStore, SeriesStore};

/// Main API for series reconciliation.
///
/// Owns the per-location store and runs one reconciliation cycle per
/// location per call. The store must only ever see one in-flight cycle per
/// location; distinct locations share no state and may be reconciled
/// concurrently by separate engines.
pub struct Canonseries {
    store: Box<dyn SeriesStore>,
    reporter: Box<dyn Reporter>,
    config: PipelineConfig,
}

impl Canonseries {
    /// Create an engine over an in-memory store.
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_store(config, MemoryStore::new())
    }

    /// Create an engine with a custom store implementation.
    pub fn with_store<S>(config: PipelineConfig, store: S) -> Self
    where
        S: SeriesStore + 'static,
    {
        Self {
            store: Box::new(store),
            reporter: Box::new(LogReporter),
            config,
        }
    }

    /// Replace the reporter sink.
    pub fn with_reporter<R>(mut self, reporter: R) -> Self
    where
        R: Reporter + 'static,
    {
        self.reporter = Box::new(reporter);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn SeriesStore {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> &mut dyn SeriesStore {
        self.store.as_mut()
    }

    /// Run one reconciliation cycle for one location's batch and persist
    /// the result. The first cycle for a location creates it.
    pub fn reconcile(&mut self, incoming: &Series) -> anyhow::Result<Series> {
        match self.run_one(incoming) {
            Ok(series) => {
                self.reporter.cycle(&CycleReport {
                    location: series.location().to_string(),
                    outcome: CycleOutcome::Updated { rows: series.len() },
                });
                Ok(series)
            }
            Err(err) => {
                self.reporter.cycle(&CycleReport {
                    location: incoming.location().to_string(),
                    outcome: CycleOutcome::Failed {
                        error: format!("{err:#}"),
                    },
                });
                Err(err)
            }
        }
    }

    /// Reconcile one batch per location. A failing location does not abort
    /// the rest; every outcome lands in the returned report. Locations on
    /// the skip list are left untouched.
    pub fn reconcile_many(&mut self, batches: &[Series], skip: &[String]) -> RunReport {
        let mut run = RunReport::default();
        for incoming in batches {
            let location = incoming.location().to_string();
            let outcome = if skip.contains(&location) {
                CycleOutcome::Skipped
            } else {
                match self.run_one(incoming) {
                    Ok(series) => CycleOutcome::Updated { rows: series.len() },
                    Err(err) => CycleOutcome::Failed {
                        error: format!("{err:#}"),
                    },
                }
            };
            let report = CycleReport { location, outcome };
            self.reporter.cycle(&report);
            run.push(report);
        }
        self.reporter.run(&run);
        run
    }

    /// Re-enforce and normalize an already persisted series in place.
    ///
    /// Repairs a store that predates the current monotonicity rules or was
    /// edited by hand; no incoming batch is involved.
    pub fn force_monotonic(&mut self, location: &str) -> anyhow::Result<Series> {
        let persisted = self
            .store
            .load(location)?
            .ok_or_else(|| anyhow::anyhow!("no persisted series for `{location}`"))?;
        let repaired = enforce::enforce(&persisted, &self.config.enforce_options())?;
        let repaired = postprocess::postprocess(&repaired, self.config.dedupe_repeats);
        self.store.save(&repaired)?;
        Ok(repaired)
    }

    fn run_one(&mut self, incoming: &Series) -> anyhow::Result<Series> {
        let persisted = self.store.load(incoming.location())?;
        let combined = pipeline::run_cycle(persisted.as_ref(), incoming, &self.config)?;
        self.store.save(&combined)?;
        Ok(combined)
    }
}
