//! # Reconciliation Pipeline
//!
//! One update cycle for one location: merge the incoming batch into the
//! persisted canonical series, repair monotonicity under the damage budget,
//! and normalize the result. The cycle is a pure function of its inputs; it
//! performs no I/O and never exposes a partial result.

use crate::enforce::{self, AuthorityRule, EnforceOptions, RepairPolicy};
use crate::error::Error;
use crate::merge::{self, MergeMode};
use crate::model::{MetricKind, Series, METRICS};
use crate::postprocess;

/// Configuration for one reconciliation cycle.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Metric columns subject to monotonicity.
    pub metric_columns: Vec<String>,
    /// Damage budget handed to the enforcer.
    pub max_damage: usize,
    /// Treat equal consecutive values as violations.
    pub strict: bool,
    /// How persisted and incoming rows are coalesced.
    pub merge_mode: MergeMode,
    /// How anomalous values are repaired.
    pub policy: RepairPolicy,
    /// Which side of a backward step is considered wrong.
    pub authority: AuthorityRule,
    /// Collapse adjacent rows identical across all metric columns.
    pub dedupe_repeats: bool,
}

impl PipelineConfig {
    /// Configuration for the given metric columns with the production
    /// defaults: a budget of 10, non-strict comparison, smart merge,
    /// cell-null repair, latest-authoritative.
    pub fn new<I, S>(metric_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            metric_columns: metric_columns.into_iter().map(Into::into).collect(),
            max_damage: 10,
            strict: false,
            merge_mode: MergeMode::default(),
            policy: RepairPolicy::default(),
            authority: AuthorityRule::default(),
            dedupe_repeats: false,
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

    pub fn with_merge_mode(mut self, merge_mode: MergeMode) -> Self {
        self.merge_mode = merge_mode;
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

    pub fn with_dedupe_repeats(mut self, dedupe_repeats: bool) -> Self {
        self.dedupe_repeats = dedupe_repeats;
        self
    }

    /// The enforcer options for this configuration.
    pub fn enforce_options(&self) -> EnforceOptions {
        EnforceOptions::new(self.metric_columns.iter().cloned())
            .with_max_damage(self.max_damage)
            .with_strict(self.strict)
            .with_policy(self.policy)
            .with_authority(self.authority)
    }
}

impl Default for PipelineConfig {
    /// Defaults to tracking the well-known cumulative counter columns.
    fn default() -> Self {
        Self::new(
            METRICS
                .iter()
                .filter(|name| MetricKind::infer(name) == MetricKind::Count)
                .copied(),
        )
    }
}

/// Run one reconciliation cycle: merge, enforce, postprocess.
///
/// With no persisted series the incoming batch seeds the location; it still
/// has to satisfy the unique-date precondition. Every configured metric
/// column must be present in both inputs, otherwise a check would be
/// silently skipped and [`Error::SchemaMismatch`] is raised instead.
pub fn run_cycle(
    persisted: Option<&Series>,
    incoming: &Series,
    config: &PipelineConfig,
) -> Result<Series, Error> {
    for column in &config.metric_columns {
        let missing = !incoming.schema().contains(column)
            || persisted.is_some_and(|series| !series.schema().contains(column));
        if missing {
            return Err(Error::SchemaMismatch {
                column: column.clone(),
            });
        }
    }

    let combined = match persisted {
        Some(persisted) => merge::merge(persisted, incoming, config.merge_mode)?,
        None => {
            merge::assert_unique_dates(incoming)?;
            incoming.clone()
        }
    };

    let enforced = enforce::enforce(&combined, &config.enforce_options())?;
    Ok(postprocess::postprocess(&enforced, config.dedupe_repeats))
}
