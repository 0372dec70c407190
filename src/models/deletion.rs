//! Cleanup outcomes and the accumulator that builds them.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::models::object::{DeletionErrorEntry, ObjectSummary};

/// How many example keys and errors a result keeps for human consumption.
pub const MAX_EXAMPLES: usize = 10;

/// Synthetic code for keys in a batch whose whole call failed.
pub const BATCH_REQUEST_FAILED: &str = "BatchRequestFailed";

/// Synthetic code for keys the store neither confirmed nor rejected.
pub const MISSING_FROM_RESPONSE: &str = "MissingFromResponse";

/// The strategy that produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    RemoteWorker,
    TrackedFiles,
    PatternBased,
    None,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::RemoteWorker => "remote_worker",
            StrategyKind::TrackedFiles => "tracked_files",
            StrategyKind::PatternBased => "pattern_based",
            StrategyKind::None => "none",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller's choice of strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyMode {
    /// Worker, then tracked records, then pattern discovery.
    #[default]
    Auto,
    Worker,
    Tracked,
    Pattern,
}

impl StrategyMode {
    /// The single strategy an explicit mode forces, if any.
    pub fn forced(self) -> Option<StrategyKind> {
        match self {
            StrategyMode::Auto => None,
            StrategyMode::Worker => Some(StrategyKind::RemoteWorker),
            StrategyMode::Tracked => Some(StrategyKind::TrackedFiles),
            StrategyMode::Pattern => Some(StrategyKind::PatternBased),
        }
    }
}

impl FromStr for StrategyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(StrategyMode::Auto),
            "worker" => Ok(StrategyMode::Worker),
            "tracked" => Ok(StrategyMode::Tracked),
            "pattern" => Ok(StrategyMode::Pattern),
            other => Err(format!(
                "unknown mode `{other}` (expected auto, worker, tracked or pattern)"
            )),
        }
    }
}

/// A candidate object plus every label that matched it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MatchedObject {
    pub key: String,
    pub size: u64,
    pub labels: Vec<String>,
}

impl MatchedObject {
    pub fn from_summary(summary: &ObjectSummary, labels: Vec<String>) -> Self {
        Self {
            key: summary.key.clone(),
            size: summary.size,
            labels,
        }
    }
}

/// Aggregated outcome of one cleanup run.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DeletionResult {
    pub project_id: String,
    pub dry_run: bool,
    /// Serialized as `deletion_strategy`; `strategy_used` is accepted on input.
    #[serde(rename = "deletion_strategy", alias = "strategy_used")]
    pub strategy_used: StrategyKind,
    /// Keys handed to the store (or worker). Always `deleted_count + failed_count`.
    pub attempted_count: usize,
    pub deleted_count: usize,
    pub failed_count: usize,
    /// Keys never attempted because the run was cancelled.
    pub skipped_count: usize,
    pub total_bytes_freed: u64,
    /// First failures, for display.
    pub errors: Vec<DeletionErrorEntry>,
    /// Every failed key, for retry.
    pub failed_keys: Vec<String>,
    /// First deleted keys, for display.
    pub deleted_examples: Vec<String>,
    /// The complete candidate set with provenance.
    pub matched_objects: Vec<MatchedObject>,
    pub strategy_counts: BTreeMap<String, usize>,
    pub tracked_records_removed: u64,
    pub cancelled: bool,
}

impl DeletionResult {
    /// A result for a run in which no strategy found anything.
    pub fn empty(project_id: &str, dry_run: bool) -> Self {
        DeletionAccumulator::new(project_id, dry_run, StrategyKind::None).finish()
    }

    /// Result of a dry run: the candidate set, nothing attempted.
    pub fn planned(
        project_id: &str,
        strategy: StrategyKind,
        matched: Vec<MatchedObject>,
        strategy_counts: BTreeMap<String, usize>,
    ) -> Self {
        let mut acc = DeletionAccumulator::new(project_id, true, strategy);
        acc.set_matched(matched);
        acc.strategy_counts = strategy_counts;
        acc.finish()
    }

    pub fn is_empty(&self) -> bool {
        self.matched_objects.is_empty() && self.attempted_count == 0
    }

    /// Bytes the candidate set occupies; what a dry run would free.
    pub fn matched_bytes(&self) -> u64 {
        self.matched_objects.iter().map(|m| m.size).sum()
    }
}

/// Collects per-batch outcomes into a [`DeletionResult`].
///
/// Sizes come from the candidate set so freed bytes only count confirmed deletions.
#[derive(Debug)]
pub struct DeletionAccumulator {
    project_id: String,
    dry_run: bool,
    strategy: StrategyKind,
    sizes: BTreeMap<String, u64>,
    matched: Vec<MatchedObject>,
    deleted: Vec<String>,
    errors: Vec<DeletionErrorEntry>,
    skipped: usize,
    cancelled: bool,
    tracked_records_removed: u64,
    pub strategy_counts: BTreeMap<String, usize>,
}

impl DeletionAccumulator {
    pub fn new(project_id: &str, dry_run: bool, strategy: StrategyKind) -> Self {
        Self {
            project_id: project_id.to_string(),
            dry_run,
            strategy,
            sizes: BTreeMap::new(),
            matched: Vec::new(),
            deleted: Vec::new(),
            errors: Vec::new(),
            skipped: 0,
            cancelled: false,
            tracked_records_removed: 0,
            strategy_counts: BTreeMap::new(),
        }
    }

    pub fn set_matched(&mut self, matched: Vec<MatchedObject>) {
        self.sizes = matched.iter().map(|m| (m.key.clone(), m.size)).collect();
        self.matched = matched;
    }

    pub fn record_deleted(&mut self, key: impl Into<String>) {
        self.deleted.push(key.into());
    }

    pub fn record_failed(&mut self, entry: DeletionErrorEntry) {
        self.errors.push(entry);
    }

    pub fn record_skipped(&mut self, count: usize) {
        self.skipped += count;
        self.cancelled = true;
    }

    pub fn set_tracked_records_removed(&mut self, count: u64) {
        self.tracked_records_removed = count;
    }

    /// Keys confirmed deleted so far.
    pub fn deleted_keys(&self) -> &[String] {
        &self.deleted
    }

    pub fn finish(self) -> DeletionResult {
        let total_bytes_freed = self
            .deleted
            .iter()
            .filter_map(|key| self.sizes.get(key))
            .sum();
        let failed_keys: Vec<String> = self.errors.iter().map(|e| e.key.clone()).collect();

        DeletionResult {
            project_id: self.project_id,
            dry_run: self.dry_run,
            strategy_used: self.strategy,
            attempted_count: self.deleted.len() + self.errors.len(),
            deleted_count: self.deleted.len(),
            failed_count: self.errors.len(),
            skipped_count: self.skipped,
            total_bytes_freed,
            errors: self.errors.into_iter().take(MAX_EXAMPLES).collect(),
            failed_keys,
            deleted_examples: self.deleted.into_iter().take(MAX_EXAMPLES).collect(),
            matched_objects: self.matched,
            strategy_counts: self.strategy_counts,
            tracked_records_removed: self.tracked_records_removed,
            cancelled: self.cancelled,
        }
    }
}
