//! Batched, bounded-concurrency deletion through the object store.

use futures::{StreamExt, stream};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    models::{
        deletion::{BATCH_REQUEST_FAILED, DeletionAccumulator, MISSING_FROM_RESPONSE},
        object::{BatchDeleteOutcome, DeletionErrorEntry, MAX_KEYS_PER_REQUEST},
    },
    services::object_store::{ObjectStoreClient, StoreError},
};

/// Cancellation and deadline for one run.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
}

impl RunControl {
    pub fn new(cancel: CancellationToken, deadline: Option<Instant>) -> Self {
        Self { cancel, deadline }
    }

    /// True once no new work should start.
    pub fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// How the batches of one run went, beyond per-key outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub batches_sent: usize,
    pub batches_failed: usize,
    /// Whole-batch failures caused by the store being unreachable.
    pub batches_unreachable: usize,
    pub batches_skipped: usize,
}

impl BatchSummary {
    /// Every batch that was sent failed because the store could not be reached.
    pub fn store_unreachable(&self) -> bool {
        self.batches_sent > 0 && self.batches_unreachable == self.batches_sent
    }
}

enum BatchResult {
    Done(Vec<String>, BatchDeleteOutcome),
    Failed(Vec<String>, StoreError),
    Skipped(usize),
}

#[derive(Clone)]
pub struct BatchDeleter {
    store: Arc<dyn ObjectStoreClient>,
    batch_size: usize,
    concurrency: usize,
}

impl BatchDeleter {
    pub fn new(store: Arc<dyn ObjectStoreClient>, batch_size: usize, concurrency: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.clamp(1, MAX_KEYS_PER_REQUEST),
            concurrency: concurrency.max(1),
        }
    }

    /// Delete `keys` in static batches, feeding every per-key outcome into `acc`.
    ///
    /// Keys are deduplicated first. A batch whose call fails marks all of its
    /// keys failed and the run continues. Once `control` says stop, batches
    /// already in flight finish and the rest are counted as skipped.
    pub async fn delete(
        &self,
        keys: &[String],
        control: &RunControl,
        acc: &mut DeletionAccumulator,
    ) -> BatchSummary {
        let mut seen = HashSet::new();
        let unique: Vec<String> = keys
            .iter()
            .filter(|k| seen.insert(k.as_str()))
            .cloned()
            .collect();
        let batches: Vec<Vec<String>> = unique
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        info!(
            keys = unique.len(),
            batches = batches.len(),
            batch_size = self.batch_size,
            "Deleting objects in batches"
        );

        let results = stream::iter(batches.into_iter().enumerate())
            .map(|(index, batch)| async move {
                if control.should_stop() {
                    return BatchResult::Skipped(batch.len());
                }
                debug!(batch = index, size = batch.len(), "Sending delete batch");
                match self.store.delete_batch(&batch).await {
                    Ok(outcome) => BatchResult::Done(batch, outcome),
                    Err(err) => BatchResult::Failed(batch, err),
                }
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut summary = BatchSummary::default();
        for result in results {
            match result {
                BatchResult::Done(batch, outcome) => {
                    summary.batches_sent += 1;
                    apply_outcome(batch, outcome, acc);
                }
                BatchResult::Failed(batch, err) => {
                    summary.batches_sent += 1;
                    summary.batches_failed += 1;
                    if err.is_unavailable() {
                        summary.batches_unreachable += 1;
                    }
                    warn!(size = batch.len(), error = %err, "Delete batch failed; marking keys failed");
                    let message = err.to_string();
                    for key in batch {
                        acc.record_failed(DeletionErrorEntry::new(key, BATCH_REQUEST_FAILED, message.clone()));
                    }
                }
                BatchResult::Skipped(count) => {
                    summary.batches_skipped += 1;
                    acc.record_skipped(count);
                }
            }
        }

        if summary.batches_skipped > 0 {
            warn!(skipped_batches = summary.batches_skipped, "Run stopped before all batches started");
        }
        summary
    }
}

/// Copy per-key outcomes for `batch`; keys the store did not mention count as failed.
fn apply_outcome(batch: Vec<String>, outcome: BatchDeleteOutcome, acc: &mut DeletionAccumulator) {
    let deleted: HashSet<String> = outcome.deleted.into_iter().collect();
    let mut errors: HashMap<String, DeletionErrorEntry> = HashMap::new();
    for entry in outcome.errors {
        errors.entry(entry.key.clone()).or_insert(entry);
    }

    for key in batch {
        if let Some(entry) = errors.remove(&key) {
            acc.record_failed(entry);
        } else if deleted.contains(&key) {
            acc.record_deleted(key);
        } else {
            acc.record_failed(DeletionErrorEntry::new(
                key,
                MISSING_FROM_RESPONSE,
                "key absent from the delete response",
            ));
        }
    }
}
