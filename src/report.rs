//! # Run Reporting
//!
//! Reporting capability injected into the orchestrating API. The core
//! algorithms never see a reporter; only [`crate::Canonseries`] emits cycle
//! and run reports, through whatever sink the caller provides.

use tracing::{error, info};

/// Outcome of one location's reconciliation cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The canonical series was rebuilt and persisted.
    Updated { rows: usize },
    /// The location was on the skip list and left untouched.
    Skipped,
    /// The cycle failed; the persisted series was left untouched.
    Failed { error: String },
}

/// Report for one location's cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub location: String,
    pub outcome: CycleOutcome,
}

/// Aggregated report for one orchestrator run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    cycles: Vec<CycleReport>,
}

impl RunReport {
    pub fn push(&mut self, report: CycleReport) {
        self.cycles.push(report);
    }

    pub fn cycles(&self) -> &[CycleReport] {
        &self.cycles
    }

    pub fn updated(&self) -> usize {
        self.cycles
            .iter()
            .filter(|c| matches!(c.outcome, CycleOutcome::Updated { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.cycles
            .iter()
            .filter(|c| c.outcome == CycleOutcome::Skipped)
            .count()
    }

    /// The cycles that failed, in run order.
    pub fn failures(&self) -> Vec<&CycleReport> {
        self.cycles
            .iter()
            .filter(|c| matches!(c.outcome, CycleOutcome::Failed { .. }))
            .collect()
    }

    /// One-line summary of the run, naming the failed locations.
    pub fn summary(&self) -> String {
        let failures = self.failures();
        let mut summary = format!(
            "{} locations updated, {} skipped, {} failed",
            self.updated(),
            self.skipped(),
            failures.len()
        );
        if !failures.is_empty() {
            let names: Vec<&str> = failures.iter().map(|c| c.location.as_str()).collect();
            summary.push_str(": ");
            summary.push_str(&names.join(", "));
        }
        summary
    }
}

/// Sink for cycle and run reports.
pub trait Reporter {
    fn cycle(&self, report: &CycleReport);
    fn run(&self, report: &RunReport);
}

/// Emits reports through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn cycle(&self, report: &CycleReport) {
        match &report.outcome {
            CycleOutcome::Updated { rows } => {
                info!(location = %report.location, rows, "series updated");
            }
            CycleOutcome::Skipped => {
                info!(location = %report.location, "location skipped");
            }
            CycleOutcome::Failed { error } => {
                error!(location = %report.location, %error, "reconciliation failed");
            }
        }
    }

    fn run(&self, report: &RunReport) {
        info!("{}", report.summary());
    }
}

/// Discards every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn cycle(&self, _report: &CycleReport) {}
    fn run(&self, _report: &RunReport) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(location: &str, outcome: CycleOutcome) -> CycleReport {
        CycleReport {
            location: location.to_string(),
            outcome,
        }
    }

    #[test]
    fn test_summary_counts_outcomes() {
        let mut run = RunReport::default();
        run.push(report("Norway", CycleOutcome::Updated { rows: 12 }));
        run.push(report("Sweden", CycleOutcome::Skipped));
        run.push(report(
            "Denmark",
            CycleOutcome::Failed {
                error: "duplicate entry".to_string(),
            },
        ));
        run.push(report(
            "Finland",
            CycleOutcome::Failed {
                error: "budget exceeded".to_string(),
            },
        ));
        assert_eq!(run.updated(), 1);
        assert_eq!(run.skipped(), 1);
        assert_eq!(
            run.summary(),
            "1 locations updated, 1 skipped, 2 failed: Denmark, Finland"
        );
    }

    #[test]
    fn test_clean_run_summary_names_no_locations() {
        let mut run = RunReport::default();
        run.push(report("Norway", CycleOutcome::Updated { rows: 3 }));
        assert_eq!(run.summary(), "1 locations updated, 0 skipped, 0 failed");
    }
}
