//! Heuristic key discovery for projects without tracked records.
//!
//! Two techniques, each recording provenance on every key it finds:
//! prefix enumeration over the configured naming conventions (concurrent,
//! bounded) and an opt-in sequential substring scan of the whole bucket.

use futures::{StreamExt, stream};
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::{
    config::{CleanupConfig, FullScanPolicy},
    models::{
        deletion::MatchedObject,
        naming::{PrefixPattern, RenderedPrefix},
        object::{ListRequest, ObjectSummary},
        project::ProjectIdentifier,
    },
    services::object_store::{ObjectStoreClient, ObjectStoreExt, StoreError},
};

/// Key of the per-strategy count contributed by the substring scan.
pub const FULL_SCAN_STRATEGY: &str = "full_scan";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Every query failed and at least one failure says the store is unreachable.
    #[error("object store unreachable during discovery: {0}")]
    StoreUnavailable(String),
}

/// What discovery found for one project.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryReport {
    /// Deduplicated candidates, ordered by key, with every matching label.
    pub objects: Vec<MatchedObject>,
    /// Distinct keys found per convention (and by the full scan).
    pub strategy_counts: BTreeMap<String, usize>,
    /// Concrete prefixes that were listed.
    pub prefixes_queried: Vec<String>,
    /// LIST requests that failed and were skipped.
    pub failed_queries: usize,
    pub full_scan_performed: bool,
    /// The scan stopped at the page cap or on an error before reaching the end.
    pub full_scan_truncated: bool,
}

impl DiscoveryReport {
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.iter().map(|o| o.key.clone()).collect()
    }
}

/// Candidates keyed by object key, accumulating labels.
#[derive(Default)]
struct Candidates {
    found: BTreeMap<String, (ObjectSummary, BTreeSet<String>)>,
    per_strategy: BTreeMap<String, BTreeSet<String>>,
}

impl Candidates {
    fn add(&mut self, summary: &ObjectSummary, strategy: &str, label: String) {
        self.per_strategy
            .entry(strategy.to_string())
            .or_default()
            .insert(summary.key.clone());
        self.found
            .entry(summary.key.clone())
            .or_insert_with(|| (summary.clone(), BTreeSet::new()))
            .1
            .insert(label);
    }

    fn is_empty(&self) -> bool {
        self.found.is_empty()
    }

    fn into_report(self, report: &mut DiscoveryReport) {
        report.strategy_counts = self
            .per_strategy
            .into_iter()
            .map(|(strategy, keys)| (strategy, keys.len()))
            .collect();
        report.objects = self
            .found
            .into_values()
            .map(|(summary, labels)| MatchedObject::from_summary(&summary, labels.into_iter().collect()))
            .collect();
    }
}

/// Tracks query failures to decide whether the store is wholly unreachable.
#[derive(Default)]
struct QueryTally {
    attempted: usize,
    failed: usize,
    last_unavailable: Option<String>,
}

impl QueryTally {
    fn succeeded(&mut self) {
        self.attempted += 1;
    }

    fn failed(&mut self, err: &StoreError) {
        self.attempted += 1;
        self.failed += 1;
        if err.is_unavailable() {
            self.last_unavailable = Some(err.to_string());
        }
    }

    fn unreachable(&self) -> Option<&str> {
        if self.attempted > 0 && self.failed == self.attempted {
            self.last_unavailable.as_deref()
        } else {
            None
        }
    }
}

/// A concrete prefix to list and the label its hits carry.
#[derive(Debug, Clone)]
struct PrefixQuery {
    strategy: &'static str,
    prefix: String,
    label: String,
}

pub struct PatternDiscoveryEngine {
    store: Arc<dyn ObjectStoreClient>,
    patterns: Vec<PrefixPattern>,
    list_concurrency: usize,
    full_scan_policy: FullScanPolicy,
    full_scan_max_pages: usize,
    full_scan_page_delay: Duration,
}

impl PatternDiscoveryEngine {
    pub fn new(store: Arc<dyn ObjectStoreClient>, config: &CleanupConfig) -> Self {
        Self {
            store,
            patterns: config.naming_patterns.clone(),
            list_concurrency: config.list_concurrency.max(1),
            full_scan_policy: config.full_scan_policy,
            full_scan_max_pages: config.full_scan_max_pages.max(1),
            full_scan_page_delay: Duration::from_millis(config.full_scan_page_delay_ms),
        }
    }

    /// Discover candidate keys for `project`.
    ///
    /// Individual LIST failures are logged and skipped; the call fails only
    /// when every query failed because the store could not be reached.
    #[instrument(skip(self, project), fields(project_id = %project.with_prefix))]
    pub async fn discover(
        &self,
        project: &ProjectIdentifier,
        allow_full_scan: bool,
    ) -> Result<DiscoveryReport, DiscoveryError> {
        let mut tally = QueryTally::default();
        let mut candidates = Candidates::default();
        let mut report = DiscoveryReport::default();

        let rendered: Vec<RenderedPrefix> = self
            .patterns
            .iter()
            .flat_map(|pattern| pattern.render(project))
            .collect();
        let queries = self.resolve_queries(rendered, &mut tally).await;
        report.prefixes_queried = queries.iter().map(|q| q.prefix.clone()).collect();

        let listings = stream::iter(queries)
            .map(|query| async move {
                let result = self.store.list_all(&query.prefix).await;
                (query, result)
            })
            .buffer_unordered(self.list_concurrency)
            .collect::<Vec<_>>()
            .await;

        for (query, result) in listings {
            match result {
                Ok(objects) => {
                    tally.succeeded();
                    debug!(prefix = %query.prefix, found = objects.len(), "Listed candidate prefix");
                    for summary in &objects {
                        candidates.add(summary, query.strategy, query.label.clone());
                    }
                }
                Err(err) => {
                    tally.failed(&err);
                    warn!(prefix = %query.prefix, error = %err, "Prefix listing failed; skipping");
                }
            }
        }

        if self.should_scan(allow_full_scan, candidates.is_empty()) {
            self.full_scan(project, &mut candidates, &mut tally, &mut report)
                .await;
        }

        if let Some(reason) = tally.unreachable() {
            return Err(DiscoveryError::StoreUnavailable(reason.to_string()));
        }

        report.failed_queries = tally.failed;
        candidates.into_report(&mut report);
        info!(
            found = report.objects.len(),
            prefixes = report.prefixes_queried.len(),
            failed_queries = report.failed_queries,
            full_scan = report.full_scan_performed,
            "Pattern discovery finished"
        );
        Ok(report)
    }

    fn should_scan(&self, allow_full_scan: bool, nothing_found: bool) -> bool {
        match self.full_scan_policy {
            FullScanPolicy::Disabled => false,
            FullScanPolicy::OnRequest => allow_full_scan,
            FullScanPolicy::Automatic => allow_full_scan || nothing_found,
        }
    }

    /// Turn rendered templates into concrete prefixes, expanding `{*}`.
    async fn resolve_queries(
        &self,
        rendered: Vec<RenderedPrefix>,
        tally: &mut QueryTally,
    ) -> Vec<PrefixQuery> {
        let mut queries: Vec<PrefixQuery> = Vec::new();
        let push = |queries: &mut Vec<PrefixQuery>, rendered: &RenderedPrefix, prefix: String| {
            let label = rendered.label(&prefix);
            if queries.iter().any(|q| q.label == label) {
                return;
            }
            queries.push(PrefixQuery {
                strategy: rendered.convention.as_str(),
                prefix,
                label,
            });
        };

        let (wildcards, plain): (Vec<_>, Vec<_>) = rendered
            .into_iter()
            .partition(|r| r.wildcard_root.is_some());
        for r in &plain {
            push(&mut queries, r, r.prefix.clone());
        }

        let roots: BTreeSet<String> = wildcards
            .iter()
            .filter_map(|r| r.wildcard_root.clone())
            .collect();
        let expansions = stream::iter(roots)
            .map(|root| async move {
                let result = self.store.list_common_prefixes(&root, "/").await;
                (root, result)
            })
            .buffer_unordered(self.list_concurrency)
            .collect::<Vec<_>>()
            .await;

        for (root, result) in expansions {
            match result {
                Ok(segments) => {
                    tally.succeeded();
                    debug!(root = %root, segments = segments.len(), "Expanded wildcard segment");
                    for r in wildcards.iter().filter(|r| r.wildcard_root.as_deref() == Some(root.as_str())) {
                        for segment in &segments {
                            if let Some(prefix) = r.expand(segment) {
                                push(&mut queries, r, prefix);
                            }
                        }
                    }
                }
                Err(err) => {
                    tally.failed(&err);
                    warn!(root = %root, error = %err, "Wildcard expansion failed; skipping");
                }
            }
        }

        queries
    }

    /// Walk the whole bucket page by page looking for identifier substrings.
    async fn full_scan(
        &self,
        project: &ProjectIdentifier,
        candidates: &mut Candidates,
        tally: &mut QueryTally,
        report: &mut DiscoveryReport,
    ) {
        if project.substring_forms().is_empty() {
            debug!("No identifier form is long enough for a substring scan");
            return;
        }
        info!(max_pages = self.full_scan_max_pages, "Starting full-bucket substring scan");
        report.full_scan_performed = true;

        let mut pages = self.store.list_pages(ListRequest::prefix(""));
        let mut scanned = 0usize;
        while let Some(page) = pages.next().await {
            let page = match page {
                Ok(page) => page,
                Err(err) => {
                    tally.failed(&err);
                    report.full_scan_truncated = true;
                    warn!(page = scanned, error = %err, "Full scan page failed; stopping scan");
                    return;
                }
            };
            tally.succeeded();
            scanned += 1;

            for summary in &page.objects {
                for label in project.substring_matches(&summary.key) {
                    candidates.add(summary, FULL_SCAN_STRATEGY, label.to_string());
                }
            }

            if page.next_continuation_token.is_none() {
                break;
            }
            if scanned >= self.full_scan_max_pages {
                report.full_scan_truncated = true;
                warn!(pages = scanned, "Full scan reached its page cap");
                break;
            }
            if !self.full_scan_page_delay.is_zero() {
                tokio::time::sleep(self.full_scan_page_delay).await;
            }
        }
        debug!(pages = scanned, "Full scan finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{memory_store::MemoryObjectStore, test_support::FaultyStore};

    fn project(raw: &str) -> ProjectIdentifier {
        ProjectIdentifier::normalize(raw).unwrap()
    }

    fn engine(store: Arc<dyn ObjectStoreClient>, policy: FullScanPolicy) -> PatternDiscoveryEngine {
        let config = CleanupConfig {
            full_scan_policy: policy,
            ..CleanupConfig::default()
        };
        PatternDiscoveryEngine::new(store, &config)
    }

    fn seeded(keys: &[&str]) -> Arc<MemoryObjectStore> {
        let store = Arc::new(MemoryObjectStore::new());
        for key in keys {
            store.put(*key, "x").unwrap();
        }
        store
    }

    #[tokio::test]
    async fn finds_keys_under_every_convention() {
        let store = seeded(&[
            "proj_abc12345_scene1.mp3",
            "users/u1/proj_abc12345/cover.png",
            "users/u2/proj_abc12345/intro.wav",
            "audio/proj_abc12345/line.mp3",
            "proj_proj_abc12345_old.mp3",
            "proj_other999_scene1.mp3",
            "users/u1/proj_other999/x.png",
        ]);
        let report = engine(store, FullScanPolicy::Disabled)
            .discover(&project("abc12345"), false)
            .await
            .unwrap();

        assert_eq!(
            report.keys(),
            vec![
                "audio/proj_abc12345/line.mp3",
                "proj_abc12345_scene1.mp3",
                "proj_proj_abc12345_old.mp3",
                "users/u1/proj_abc12345/cover.png",
                "users/u2/proj_abc12345/intro.wav",
            ]
        );
        assert_eq!(report.strategy_counts["hierarchical_by_user"], 2);
        assert_eq!(report.strategy_counts["flat_prefixed"], 1);
        assert!(!report.full_scan_performed);
        assert!(report.prefixes_queried.contains(&"users/u2/proj_abc12345/".to_string()));
    }

    #[tokio::test]
    async fn key_found_twice_keeps_both_labels() {
        // `proj_proj_abc12345_` is both the flat prefix of the doubled id and
        // the legacy prefix of the single one.
        let store = seeded(&["proj_proj_abc12345_a.mp3"]);
        let report = engine(store, FullScanPolicy::Disabled)
            .discover(&project("proj_proj_abc12345"), false)
            .await
            .unwrap();

        assert_eq!(report.objects.len(), 1);
        let labels = &report.objects[0].labels;
        assert!(labels.contains(&"flat_prefixed:proj_proj_abc12345_".to_string()));
        assert!(labels.contains(&"legacy_double_prefixed:proj_proj_abc12345_".to_string()));
    }

    #[tokio::test]
    async fn full_scan_runs_only_when_requested() {
        let store = seeded(&["misc/uploads/ABC-12345-take2.wav", "misc/other.wav"]);
        let engine = engine(store, FullScanPolicy::OnRequest);

        let without = engine.discover(&project("abc12345"), false).await.unwrap();
        assert!(without.is_empty());
        assert!(!without.full_scan_performed);

        let with = engine.discover(&project("abc12345"), true).await.unwrap();
        assert!(with.full_scan_performed);
        assert_eq!(with.keys(), vec!["misc/uploads/ABC-12345-take2.wav"]);
        assert_eq!(with.objects[0].labels, vec!["contains_clean_lower".to_string()]);
        assert_eq!(with.strategy_counts[FULL_SCAN_STRATEGY], 1);
    }

    #[tokio::test]
    async fn automatic_policy_scans_when_prefixes_find_nothing() {
        let store = seeded(&["misc/abc12345.mp3"]);
        let report = engine(store, FullScanPolicy::Automatic)
            .discover(&project("abc12345"), false)
            .await
            .unwrap();
        assert!(report.full_scan_performed);
        assert_eq!(report.objects.len(), 1);
    }

    #[tokio::test]
    async fn short_forms_never_substring_match() {
        let store = seeded(&["misc/abcd.mp3", "abcd/file.mp3"]);
        let report = engine(store, FullScanPolicy::Automatic)
            .discover(&project("abcd"), true)
            .await
            .unwrap();
        assert!(report.objects.iter().all(|o| !o.labels.iter().any(|l| l.starts_with("contains_"))));
    }

    #[tokio::test]
    async fn full_scan_stops_at_page_cap() {
        let store = Arc::new(FaultyStore::new(seeded(&["a_abc12345", "b_abc12345", "c_abc12345"])).with_page_size(1));
        let config = CleanupConfig {
            full_scan_policy: FullScanPolicy::OnRequest,
            full_scan_max_pages: 2,
            ..CleanupConfig::default()
        };
        let report = PatternDiscoveryEngine::new(store, &config)
            .discover(&project("abc12345"), true)
            .await
            .unwrap();
        assert!(report.full_scan_truncated);
        assert_eq!(report.objects.len(), 2);
    }

    #[tokio::test]
    async fn failing_prefixes_are_skipped() {
        let inner = seeded(&["proj_abc12345_a.mp3"]);
        let store = Arc::new(FaultyStore::new(inner).fail_list_prefix("audio/"));
        let report = engine(store, FullScanPolicy::Disabled)
            .discover(&project("abc12345"), false)
            .await
            .unwrap();
        assert_eq!(report.failed_queries, 1);
        assert_eq!(report.objects.len(), 1);
    }

    #[tokio::test]
    async fn unreachable_store_is_an_error() {
        let store = Arc::new(FaultyStore::new(seeded(&["proj_abc12345_a.mp3"])).unreachable());
        let err = engine(store, FullScanPolicy::Disabled)
            .discover(&project("abc12345"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::StoreUnavailable(_)));
    }
}
