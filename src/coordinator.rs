//! The per-run coordinator: frontier, visited index, domain scheduler and
//! run lifecycle behind one single-writer surface.
//!
//! Callers hold the run's mutex for the whole operation (see `registry`),
//! so nothing here needs interior locking. Every state-mutating operation
//! ends with exactly one snapshot write before returning; if that write
//! fails the operation does not acknowledge success.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{ConfigUpdate, CrawlConfig, ScopeFilter, WorkerConfig};
use crate::domains::{jittered_delay, DomainState, RateWindow};
use crate::error::ApiError;
use crate::frontier::Frontier;
use crate::run_state::{ErrorRing, Progress, RecentError, RunState, RunStats, RunStatus};
use crate::snapshot::{RunSnapshot, SnapshotStore};
use crate::stores::PageRecord;
use crate::url_utils;
use crate::visited::VisitedIndex;

/// Hard ceiling on a single dispatched batch, whatever the caller asks for.
pub const MAX_BATCH_SIZE: u32 = 100;
/// At most this many domains appear in the stats breakdown.
pub const DOMAIN_BREAKDOWN_LIMIT: usize = 50;

const STALL_WARNING_AFTER_MS: u64 = 30 * 60 * 1_000;
const DOMAIN_EVICT_AFTER_MS: u64 = 60 * 60 * 1_000;

#[derive(Debug, Clone, SerdeSerialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedOutcome {
    pub admitted: usize,
    pub rejected: usize,
    pub queue_size: usize,
}

/// One dispatched URL; depth rides along so the worker can echo it back
/// with the result and discoveries inherit the right depth.
#[derive(Debug, Clone, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub url: String,
    pub depth: u32,
    pub priority: i32,
    pub retry_count: u32,
}

#[derive(Debug, Clone, SerdeSerialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkBatch {
    pub urls: Vec<WorkItem>,
    pub queue_size: usize,
    pub config: WorkerConfig,
}

/// A worker's account of one fetch.
#[derive(Debug, Clone, Default)]
pub struct ResultReport {
    pub url: String,
    pub status: u16,
    /// Depth of the dispatched item, echoed by the worker.
    pub depth: Option<u32>,
    pub content_hash: Option<String>,
    pub content_size: Option<u64>,
    pub response_time_ms: Option<u64>,
    pub discovered_urls: Vec<String>,
    pub error: Option<String>,
    pub fetched_at: Option<u64>,
}

#[derive(Debug, Clone, SerdeSerialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub id: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, SerdeSerialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainBreakdown {
    pub domain: String,
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u32,
    pub avg_response_time_ms: u64,
    pub bytes_downloaded: u64,
    pub in_backoff: bool,
}

#[derive(Debug, Clone, SerdeSerialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsView {
    pub run: RunSummary,
    pub stats: RunStats,
    pub progress: Progress,
    pub domain_breakdown: Vec<DomainBreakdown>,
    pub recent_errors: Vec<RecentError>,
}

#[derive(Debug, Clone, SerdeSerialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRef {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, SerdeSerialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub status: RunStatus,
    pub queue_size: usize,
    pub visited_count: usize,
    pub domains_tracked: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigRef>,
}

pub struct RunCoordinator {
    run_id: String,
    frontier: Frontier,
    visited: VisitedIndex,
    domains: HashMap<String, DomainState>,
    run: RunState,
    errors: ErrorRing,
    scope: ScopeFilter,
    window: RateWindow,
    store: Arc<SnapshotStore>,
    clock: Arc<dyn Clock>,
}

impl RunCoordinator {
    /// Load the run from storage, or create it implicitly as Pending.
    /// Idempotent; missing slots hydrate as empty.
    pub fn hydrate(
        run_id: &str,
        store: Arc<SnapshotStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ApiError> {
        let snapshot = store.load(run_id)?;
        let now = clock.now_ms();
        let run = snapshot
            .run_state
            .unwrap_or_else(|| RunState::new(run_id, now));
        let scope = ScopeFilter::compile(&run.config.domain_scope);
        debug!(
            run_id,
            queued = snapshot.pending_queue.len(),
            visited = snapshot.visited_urls.len(),
            "hydrated run"
        );
        Ok(Self {
            run_id: run_id.to_string(),
            frontier: Frontier::restore(snapshot.pending_queue),
            visited: VisitedIndex::restore(snapshot.visited_urls),
            domains: snapshot.domain_states,
            run,
            errors: ErrorRing::restore(snapshot.recent_errors),
            scope,
            window: RateWindow::new(),
            store,
            clock,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn status(&self) -> RunStatus {
        self.run.status
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.run.config
    }

    /// The single snapshot write at the tail of every mutation.
    fn persist(&self) -> Result<(), ApiError> {
        let snapshot = RunSnapshot {
            pending_queue: self.frontier.items().to_vec(),
            visited_urls: self.visited.snapshot(),
            domain_states: self.domains.clone(),
            run_state: Some(self.run.clone()),
            recent_errors: self.errors.snapshot(),
        };
        self.store.save(&self.run_id, &snapshot)?;
        Ok(())
    }

    pub fn seed(
        &mut self,
        urls: &[String],
        depth: Option<u32>,
        priority: Option<i32>,
    ) -> Result<SeedOutcome, ApiError> {
        if urls.is_empty() {
            return Err(ApiError::InvalidRequest("urls must not be empty".into()));
        }
        if self.frontier.size() >= self.run.config.crawl_behavior.max_queue_size {
            return Err(ApiError::QueueFull);
        }

        let now = self.clock.now_ms();
        let depth = depth.unwrap_or(0);
        let priority = priority.unwrap_or(0);

        let mut admitted = 0;
        let mut rejected = 0;
        for raw in urls {
            match self.frontier.admit(
                raw,
                depth,
                priority,
                &self.run.config,
                &self.scope,
                &self.visited,
                now,
            ) {
                Ok(normalized) => {
                    admitted += 1;
                    self.run.stats.urls_queued += 1;
                    if let Some(domain) = url_utils::extract_domain(&normalized) {
                        self.domains.entry(domain).or_default();
                    }
                }
                Err(reason) => {
                    rejected += 1;
                    debug!(url = %raw, %reason, "seed URL rejected");
                }
            }
        }

        self.run.touch(now);
        self.persist()?;
        info!(run_id = %self.run_id, admitted, rejected, "seeded frontier");
        Ok(SeedOutcome {
            admitted,
            rejected,
            queue_size: self.frontier.size(),
        })
    }

    /// Apply a per-section shallow merge and stamp a fresh config id.
    pub fn configure(&mut self, update: ConfigUpdate) -> Result<String, ApiError> {
        let mut next = self.run.config.clone();
        update.apply(&mut next);
        next.domain_scope
            .validate_patterns()
            .map_err(ApiError::InvalidRequest)?;

        let config_id = uuid::Uuid::new_v4().to_string();
        next.id = Some(config_id.clone());
        self.scope = ScopeFilter::compile(&next.domain_scope);
        self.run.config = next;
        self.run.touch(self.clock.now_ms());
        self.persist()?;
        Ok(config_id)
    }

    pub fn start(&mut self) -> Result<RunStatus, ApiError> {
        self.run.start(self.clock.now_ms())?;
        self.persist()?;
        Ok(self.run.status)
    }

    pub fn pause(&mut self) -> Result<RunStatus, ApiError> {
        self.run.pause(self.clock.now_ms())?;
        self.persist()?;
        Ok(self.run.status)
    }

    pub fn resume(&mut self) -> Result<RunStatus, ApiError> {
        self.run.resume(self.clock.now_ms())?;
        self.persist()?;
        Ok(self.run.status)
    }

    pub fn cancel(&mut self) -> Result<RunStatus, ApiError> {
        self.run.cancel(self.clock.now_ms())?;
        self.persist()?;
        Ok(self.run.status)
    }

    /// Clear frontier, visited index, domain state and errors; back to
    /// Pending. External page/blob stores are untouched.
    pub fn reset(&mut self) -> Result<RunStatus, ApiError> {
        self.frontier.clear();
        self.visited.clear();
        self.domains.clear();
        self.errors.clear();
        self.run.reset(self.clock.now_ms());
        self.persist()?;
        info!(run_id = %self.run_id, "run reset");
        Ok(self.run.status)
    }

    /// Assemble a batch the caller may fetch right now: frontier order,
    /// one URL per domain, per-domain pacing and backoff respected, the
    /// batch inserted into the visited index before it leaves the building.
    pub fn request_work(&mut self, batch_size: Option<u32>) -> Result<WorkBatch, ApiError> {
        let now = self.clock.now_ms();
        let worker_config = self.run.config.worker_config();

        if self.run.status != RunStatus::Running {
            return Ok(WorkBatch {
                urls: Vec::new(),
                queue_size: self.frontier.size(),
                config: worker_config,
            });
        }

        let behavior = &self.run.config.crawl_behavior;
        let max_pages = behavior.max_pages_per_run;
        let default_batch = behavior.default_batch_size;
        let limits = &self.run.config.rate_limiting;
        let min_delay = limits.min_domain_delay_ms;
        let jitter = limits.jitter_factor;
        let global_limit = limits.global_rate_limit_per_minute;

        if max_pages > 0 && self.run.stats.urls_fetched >= max_pages {
            info!(run_id = %self.run_id, max_pages, "page budget reached");
            self.run.complete(now);
            self.persist()?;
            return Ok(WorkBatch {
                urls: Vec::new(),
                queue_size: self.frontier.size(),
                config: worker_config,
            });
        }

        if self.window.is_full(global_limit, now) {
            return Ok(WorkBatch {
                urls: Vec::new(),
                queue_size: self.frontier.size(),
                config: worker_config,
            });
        }

        let effective_batch = batch_size.unwrap_or(default_batch).min(MAX_BATCH_SIZE) as usize;

        let domains = &self.domains;
        let mut batch_domains: HashSet<String> = HashSet::new();
        let taken = self.frontier.take(effective_batch, |item| {
            let delay = jittered_delay(min_delay, jitter);
            let ready = domains
                .get(&item.domain)
                .map_or(true, |state| state.is_dispatchable(now, delay));
            if !ready || batch_domains.contains(&item.domain) {
                return false;
            }
            batch_domains.insert(item.domain.clone());
            true
        });

        for item in &taken {
            self.visited.insert(&item.url);
            self.domains
                .entry(item.domain.clone())
                .or_default()
                .record_dispatch(now);
            self.window.record(now);
        }

        let queue_size = self.frontier.size();
        if taken.is_empty() && queue_size == 0 {
            info!(run_id = %self.run_id, "frontier drained, completing run");
            self.run.complete(now);
        } else if !taken.is_empty() {
            self.run.touch(now);
        }
        self.persist()?;

        let urls = taken
            .into_iter()
            .map(|item| WorkItem {
                url: item.url,
                depth: item.depth,
                priority: item.priority,
                retry_count: item.retry_count,
            })
            .collect();
        Ok(WorkBatch {
            urls,
            queue_size,
            config: worker_config,
        })
    }

    /// Absorb a worker's result: update domain counters and backoff, fold
    /// the fetch into run statistics, feed discovered links back through
    /// admission, and recompute the progress projection.
    ///
    /// Returns the page record for the metadata store; the caller emits it
    /// after this operation's snapshot has landed.
    pub fn report_result(&mut self, report: ResultReport) -> Result<PageRecord, ApiError> {
        let now = self.clock.now_ms();
        let normalized = url_utils::normalize_url(&report.url)
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        let domain = url_utils::extract_domain(&normalized)
            .ok_or_else(|| ApiError::InvalidRequest("URL has no host".into()))?;

        let limits = &self.run.config.rate_limiting;
        let min_delay = limits.min_domain_delay_ms;
        let max_delay = limits.max_domain_delay_ms;
        let multiplier = limits.error_backoff_multiplier;

        let failed =
            report.error.as_deref().is_some_and(|e| !e.is_empty()) || report.status >= 400;

        let domain_state = self.domains.entry(domain.clone()).or_default();
        if failed {
            domain_state.record_failure(now, min_delay, max_delay, multiplier);
            self.run.stats.record_failure();
            self.errors.push(RecentError {
                url: normalized.clone(),
                domain: domain.clone(),
                status_code: (report.status > 0).then_some(report.status),
                message: report
                    .error
                    .clone()
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| format!("HTTP {}", report.status)),
                timestamp: now,
            });
            debug!(url = %normalized, status = report.status, "fetch failed");
        } else {
            let response_time = report.response_time_ms.unwrap_or(0);
            let content_size = report.content_size.unwrap_or(0);
            domain_state.record_success(response_time, content_size);
            self.run.stats.record_success(response_time, content_size);
            self.run.update_throughput(now);
        }

        if self.run.config.crawl_behavior.follow_links && !report.discovered_urls.is_empty() {
            let child_depth = report.depth.unwrap_or(0) + 1;
            let same_domain_only = self.run.config.crawl_behavior.same_domain_only;
            let include_subdomains = self.run.config.domain_scope.include_subdomains;

            for raw in &report.discovered_urls {
                let Ok(child) = url_utils::normalize_url(raw) else {
                    continue;
                };
                let Some(child_domain) = url_utils::extract_domain(&child) else {
                    continue;
                };
                if same_domain_only
                    && !url_utils::domains_match(&child_domain, &domain, include_subdomains)
                {
                    continue;
                }
                match self.frontier.admit(
                    &child,
                    child_depth,
                    -(child_depth as i32),
                    &self.run.config,
                    &self.scope,
                    &self.visited,
                    now,
                ) {
                    Ok(_) => {
                        self.run.stats.urls_queued += 1;
                        self.domains.entry(child_domain).or_default();
                    }
                    Err(reason) => {
                        debug!(url = %child, %reason, "discovered URL rejected");
                    }
                }
            }
        }

        self.run.touch(now);
        self.run.recompute_progress(self.frontier.size());
        self.persist()?;

        Ok(PageRecord {
            run_id: self.run_id.clone(),
            url: normalized,
            domain,
            status: report.status,
            content_hash: report.content_hash,
            content_size: report.content_size.unwrap_or(0),
            response_time_ms: report.response_time_ms,
            fetched_at: report.fetched_at.unwrap_or(now),
            error: report.error.filter(|e| !e.is_empty()),
        })
    }

    /// Maintenance pass: expire elapsed backoffs, evict idle domain state,
    /// flag a stalled run. Returns the queue size.
    pub fn tick(&mut self) -> Result<usize, ApiError> {
        let now = self.clock.now_ms();

        for state in self.domains.values_mut() {
            if state.backoff_until != 0 && state.backoff_until <= now {
                state.backoff_until = 0;
            }
        }
        self.domains.retain(|_, state| {
            !(state.request_count == 0
                && state.last_fetch_at.saturating_add(DOMAIN_EVICT_AFTER_MS) < now)
        });

        if self.run.status == RunStatus::Running
            && self.run.last_activity_at.saturating_add(STALL_WARNING_AFTER_MS) < now
        {
            if self.run.error.is_none() {
                warn!(run_id = %self.run_id, "run appears stalled");
            }
            self.run.error = Some(format!(
                "run stalled: no activity since {}",
                self.run.last_activity_at
            ));
        }

        self.persist()?;
        Ok(self.frontier.size())
    }

    pub fn stats_view(&self) -> StatsView {
        let now = self.clock.now_ms();
        let mut breakdown: Vec<DomainBreakdown> = self
            .domains
            .iter()
            .map(|(domain, state)| DomainBreakdown {
                domain: domain.clone(),
                request_count: state.request_count,
                success_count: state.success_count,
                error_count: state.error_count,
                avg_response_time_ms: state.avg_response_time_ms(),
                bytes_downloaded: state.bytes_downloaded,
                in_backoff: state.backoff_until > now,
            })
            .collect();
        breakdown.sort_by(|a, b| {
            b.request_count
                .cmp(&a.request_count)
                .then_with(|| a.domain.cmp(&b.domain))
        });
        breakdown.truncate(DOMAIN_BREAKDOWN_LIMIT);

        StatsView {
            run: RunSummary {
                id: self.run.id.clone(),
                status: self.run.status,
                started_at: self.run.started_at,
                completed_at: self.run.completed_at,
                error: self.run.error.clone(),
            },
            stats: self.run.stats.clone(),
            progress: self.run.progress.clone(),
            domain_breakdown: breakdown,
            recent_errors: self.errors.snapshot(),
        }
    }

    pub fn status_view(&self) -> StatusView {
        StatusView {
            status: self.run.status,
            queue_size: self.frontier.size(),
            visited_count: self.visited.len(),
            domains_tracked: self.domains.len(),
            config: self.run.config.id.clone().map(|id| ConfigRef {
                id,
                name: self.run.config.name.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use tempfile::TempDir;

    const T0: u64 = 1_700_000_000_000;

    fn coordinator(dir: &TempDir) -> (RunCoordinator, Arc<ManualClock>) {
        let store = Arc::new(SnapshotStore::open(dir.path()).unwrap());
        let clock = Arc::new(ManualClock::new(T0));
        let mut coordinator =
            RunCoordinator::hydrate("test-run", store, clock.clone()).unwrap();
        // Deterministic pacing for tests.
        coordinator
            .configure(
                serde_json::from_value(serde_json::json!({
                    "rateLimiting": {"jitterFactor": 0.0}
                }))
                .unwrap(),
            )
            .unwrap();
        (coordinator, clock)
    }

    #[test]
    fn test_dispatch_is_one_url_per_domain() {
        let dir = TempDir::new().unwrap();
        let (mut coordinator, _clock) = coordinator(&dir);

        coordinator
            .seed(
                &[
                    "https://a.test/1".into(),
                    "https://a.test/2".into(),
                    "https://b.test/1".into(),
                ],
                None,
                None,
            )
            .unwrap();
        coordinator.start().unwrap();

        let batch = coordinator.request_work(Some(10)).unwrap();
        let mut domains: Vec<String> = batch
            .urls
            .iter()
            .map(|item| url_utils::extract_domain(&item.url).unwrap())
            .collect();
        domains.sort();
        assert_eq!(domains, vec!["a.test", "b.test"]);
        assert_eq!(batch.queue_size, 1);
    }

    #[test]
    fn test_dispatched_urls_never_repeat() {
        let dir = TempDir::new().unwrap();
        let (mut coordinator, clock) = coordinator(&dir);

        coordinator
            .seed(&["https://a.test/1".into()], None, None)
            .unwrap();
        coordinator.start().unwrap();

        let first = coordinator.request_work(Some(5)).unwrap();
        assert_eq!(first.urls.len(), 1);

        // Even after the politeness window passes, the URL is gone: the
        // visited insert at dispatch time is what prevents double-crawls.
        clock.advance(5_000);
        let again = coordinator
            .seed(&["https://a.test/1".into()], None, None)
            .unwrap();
        assert_eq!(again.admitted, 0);
        assert_eq!(again.rejected, 1);
    }

    #[test]
    fn test_request_work_while_paused_is_empty() {
        let dir = TempDir::new().unwrap();
        let (mut coordinator, _clock) = coordinator(&dir);

        coordinator
            .seed(&["https://a.test/1".into()], None, None)
            .unwrap();
        coordinator.start().unwrap();
        coordinator.pause().unwrap();

        let batch = coordinator.request_work(Some(5)).unwrap();
        assert!(batch.urls.is_empty());
        assert_eq!(batch.queue_size, 1);
        assert_eq!(coordinator.status(), RunStatus::Paused);
    }

    #[test]
    fn test_page_budget_completes_run() {
        let dir = TempDir::new().unwrap();
        let (mut coordinator, clock) = coordinator(&dir);
        coordinator
            .configure(
                serde_json::from_value(serde_json::json!({
                    "crawlBehavior": {"maxPagesPerRun": 1}
                }))
                .unwrap(),
            )
            .unwrap();

        coordinator
            .seed(
                &["https://a.test/1".into(), "https://a.test/2".into()],
                None,
                None,
            )
            .unwrap();
        coordinator.start().unwrap();

        let batch = coordinator.request_work(Some(1)).unwrap();
        assert_eq!(batch.urls.len(), 1);
        coordinator
            .report_result(ResultReport {
                url: batch.urls[0].url.clone(),
                status: 200,
                depth: Some(batch.urls[0].depth),
                content_size: Some(100),
                response_time_ms: Some(10),
                ..ResultReport::default()
            })
            .unwrap();

        clock.advance(2_000);
        let next = coordinator.request_work(Some(1)).unwrap();
        assert!(next.urls.is_empty());
        assert_eq!(coordinator.status(), RunStatus::Completed);
    }

    #[test]
    fn test_global_rate_limit_window() {
        let dir = TempDir::new().unwrap();
        let (mut coordinator, clock) = coordinator(&dir);
        coordinator
            .configure(
                serde_json::from_value(serde_json::json!({
                    "rateLimiting": {"globalRateLimitPerMinute": 2, "minDomainDelayMs": 0}
                }))
                .unwrap(),
            )
            .unwrap();

        coordinator
            .seed(
                &[
                    "https://a.test/1".into(),
                    "https://b.test/1".into(),
                    "https://c.test/1".into(),
                ],
                None,
                None,
            )
            .unwrap();
        coordinator.start().unwrap();

        let first = coordinator.request_work(Some(2)).unwrap();
        assert_eq!(first.urls.len(), 2);

        // Window full: nothing moves, the queued URL stays queued.
        let blocked = coordinator.request_work(Some(2)).unwrap();
        assert!(blocked.urls.is_empty());
        assert_eq!(blocked.queue_size, 1);

        clock.advance(61_000);
        let after = coordinator.request_work(Some(2)).unwrap();
        assert_eq!(after.urls.len(), 1);
    }

    #[test]
    fn test_tick_clears_backoff_and_flags_stall() {
        let dir = TempDir::new().unwrap();
        let (mut coordinator, clock) = coordinator(&dir);

        coordinator
            .seed(&["https://x.test/1".into(), "https://x.test/2".into()], None, None)
            .unwrap();
        coordinator.start().unwrap();
        let batch = coordinator.request_work(Some(1)).unwrap();
        coordinator
            .report_result(ResultReport {
                url: batch.urls[0].url.clone(),
                status: 500,
                depth: Some(0),
                ..ResultReport::default()
            })
            .unwrap();

        let backed_off = coordinator.stats_view();
        assert!(backed_off.domain_breakdown[0].in_backoff);

        clock.advance(3_000);
        coordinator.tick().unwrap();
        let cleared = coordinator.stats_view();
        assert!(!cleared.domain_breakdown[0].in_backoff);

        // 31 minutes of silence flags the run without changing status.
        clock.advance(31 * 60 * 1_000);
        coordinator.tick().unwrap();
        assert_eq!(coordinator.status(), RunStatus::Running);
        let stats = coordinator.stats_view();
        assert!(stats.run.error.as_deref().unwrap().contains("stalled"));
    }

    #[test]
    fn test_rehydration_preserves_behavior() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SnapshotStore::open(dir.path()).unwrap());
        let clock = Arc::new(ManualClock::new(T0));

        {
            let mut coordinator =
                RunCoordinator::hydrate("persist-run", store.clone(), clock.clone()).unwrap();
            coordinator
                .seed(
                    &["https://a.test/1".into(), "https://b.test/1".into()],
                    None,
                    None,
                )
                .unwrap();
            coordinator.start().unwrap();
            let batch = coordinator.request_work(Some(1)).unwrap();
            assert_eq!(batch.urls.len(), 1);
        }

        // A fresh process sees the same run mid-flight.
        let mut revived =
            RunCoordinator::hydrate("persist-run", store, clock.clone()).unwrap();
        assert_eq!(revived.status(), RunStatus::Running);
        let view = revived.status_view();
        assert_eq!(view.queue_size, 1);
        assert_eq!(view.visited_count, 1);

        clock.advance(2_000);
        let batch = revived.request_work(Some(5)).unwrap();
        assert_eq!(batch.urls.len(), 1);

        // Both dispatches together never repeated a URL.
        let reseeded = revived
            .seed(
                &["https://a.test/1".into(), "https://b.test/1".into()],
                None,
                None,
            )
            .unwrap();
        assert_eq!(reseeded.admitted, 0);
    }

    #[test]
    fn test_reset_reclaims_urls() {
        let dir = TempDir::new().unwrap();
        let (mut coordinator, _clock) = coordinator(&dir);

        coordinator
            .seed(&["https://a.test/1".into()], None, None)
            .unwrap();
        coordinator.start().unwrap();
        coordinator.request_work(Some(1)).unwrap();

        coordinator.reset().unwrap();
        assert_eq!(coordinator.status(), RunStatus::Pending);

        let outcome = coordinator
            .seed(&["https://a.test/1".into()], None, None)
            .unwrap();
        assert_eq!(outcome.admitted, 1);
    }

    #[test]
    fn test_conservation_invariant() {
        let dir = TempDir::new().unwrap();
        let (mut coordinator, clock) = coordinator(&dir);

        coordinator
            .seed(
                &[
                    "https://a.test/1".into(),
                    "https://b.test/1".into(),
                    "https://c.test/1".into(),
                ],
                None,
                None,
            )
            .unwrap();
        coordinator.start().unwrap();

        let mut reported = 0;
        for round in 0..3 {
            let batch = coordinator.request_work(Some(10)).unwrap();
            for item in &batch.urls {
                let status = if round % 2 == 0 { 200 } else { 503 };
                coordinator
                    .report_result(ResultReport {
                        url: item.url.clone(),
                        status,
                        depth: Some(item.depth),
                        content_size: Some(10),
                        response_time_ms: Some(5),
                        ..ResultReport::default()
                    })
                    .unwrap();
                reported += 1;
            }
            let stats = coordinator.stats_view().stats;
            assert!(stats.urls_fetched + stats.urls_failed <= stats.urls_queued);
            clock.advance(1_500);
        }
        assert_eq!(reported, 3);
    }
}
