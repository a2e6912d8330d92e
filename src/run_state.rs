//! Run lifecycle, statistics, progress projection, and the recent-errors
//! ring surfaced to operators.

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::collections::VecDeque;

use crate::config::CrawlConfig;
use crate::error::ApiError;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Archive,
    Serialize,
    Deserialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(
    Debug, Clone, Default, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub urls_queued: u64,
    pub urls_fetched: u64,
    pub urls_failed: u64,
    pub bytes_downloaded: u64,
    pub avg_response_time_ms: f64,
    pub pages_per_minute: f64,
}

impl RunStats {
    pub fn record_success(&mut self, response_time_ms: u64, content_size: u64) {
        self.urls_fetched += 1;
        self.bytes_downloaded += content_size;
        let n = self.urls_fetched as f64;
        self.avg_response_time_ms =
            (self.avg_response_time_ms * (n - 1.0) + response_time_ms as f64) / n;
    }

    pub fn record_failure(&mut self) {
        self.urls_failed += 1;
    }
}

#[derive(
    Debug, Clone, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub percentage: u32,
    /// -1 while the throughput is unknown.
    pub estimated_seconds_remaining: i64,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            percentage: 0,
            estimated_seconds_remaining: -1,
        }
    }
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentError {
    pub url: String,
    pub domain: String,
    pub status_code: Option<u16>,
    pub message: String,
    pub timestamp: u64,
}

pub const ERROR_RING_CAPACITY: usize = 50;

/// Bounded ring of the most recent failures, oldest evicted first.
#[derive(Debug, Default)]
pub struct ErrorRing {
    entries: VecDeque<RecentError>,
}

impl ErrorRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(entries: Vec<RecentError>) -> Self {
        let mut ring = Self {
            entries: entries.into(),
        };
        while ring.entries.len() > ERROR_RING_CAPACITY {
            ring.entries.pop_front();
        }
        ring
    }

    pub fn push(&mut self, entry: RecentError) {
        self.entries.push_back(entry);
        if self.entries.len() > ERROR_RING_CAPACITY {
            self.entries.pop_front();
        }
    }

    pub fn snapshot(&self) -> Vec<RecentError> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// One run's lifecycle record. Created implicitly (Pending) on first touch
/// of a run id; mutated only through the transition methods below.
#[derive(Debug, Clone, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub id: String,
    pub status: RunStatus,
    pub config: CrawlConfig,
    pub stats: RunStats,
    pub progress: Progress,
    pub started_at: Option<u64>,
    pub paused_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub error: Option<String>,
    pub last_activity_at: u64,
}

impl RunState {
    pub fn new(id: &str, now_ms: u64) -> Self {
        Self {
            id: id.to_string(),
            status: RunStatus::Pending,
            config: CrawlConfig::default(),
            stats: RunStats::default(),
            progress: Progress::default(),
            started_at: None,
            paused_at: None,
            completed_at: None,
            error: None,
            last_activity_at: now_ms,
        }
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.last_activity_at = now_ms;
    }

    pub fn start(&mut self, now_ms: u64) -> Result<(), ApiError> {
        match self.status {
            RunStatus::Pending => {
                self.status = RunStatus::Running;
                self.started_at = Some(now_ms);
                self.touch(now_ms);
                Ok(())
            }
            // Starting a running run is a no-op.
            RunStatus::Running => Ok(()),
            RunStatus::Paused => Err(ApiError::InvalidRunState(
                "run is paused; resume it instead".to_string(),
            )),
            _ => Err(ApiError::RunCompleted),
        }
    }

    pub fn pause(&mut self, now_ms: u64) -> Result<(), ApiError> {
        if self.status != RunStatus::Running {
            return Err(ApiError::RunNotRunning);
        }
        self.status = RunStatus::Paused;
        self.paused_at = Some(now_ms);
        self.touch(now_ms);
        Ok(())
    }

    pub fn resume(&mut self, now_ms: u64) -> Result<(), ApiError> {
        if self.status != RunStatus::Paused {
            return Err(ApiError::InvalidRunState(format!(
                "cannot resume a {} run",
                self.status.as_str()
            )));
        }
        self.status = RunStatus::Running;
        self.paused_at = None;
        self.touch(now_ms);
        Ok(())
    }

    pub fn cancel(&mut self, now_ms: u64) -> Result<(), ApiError> {
        if self.status.is_terminal() {
            return Err(ApiError::RunCompleted);
        }
        self.status = RunStatus::Cancelled;
        self.completed_at = Some(now_ms);
        self.touch(now_ms);
        Ok(())
    }

    /// Automatic completion: queue drained or page budget reached.
    pub fn complete(&mut self, now_ms: u64) {
        if !self.status.is_terminal() {
            self.status = RunStatus::Completed;
            self.completed_at = Some(now_ms);
            self.touch(now_ms);
        }
    }

    /// Back to Pending with fresh statistics. Configuration survives.
    pub fn reset(&mut self, now_ms: u64) {
        self.status = RunStatus::Pending;
        self.stats = RunStats::default();
        self.progress = Progress::default();
        self.started_at = None;
        self.paused_at = None;
        self.completed_at = None;
        self.error = None;
        self.last_activity_at = now_ms;
    }

    pub fn update_throughput(&mut self, now_ms: u64) {
        if let Some(started_at) = self.started_at {
            let elapsed_minutes = now_ms.saturating_sub(started_at) as f64 / 60_000.0;
            if elapsed_minutes > 0.0 {
                self.stats.pages_per_minute = self.stats.urls_fetched as f64 / elapsed_minutes;
            }
        }
    }

    pub fn recompute_progress(&mut self, queue_size: usize) {
        let done = self.stats.urls_fetched + self.stats.urls_failed;
        let queued = self.stats.urls_queued.max(1);
        self.progress.percentage = ((100.0 * done as f64 / queued as f64).round()) as u32;
        self.progress.estimated_seconds_remaining = if self.stats.pages_per_minute > 0.0 {
            (60.0 * queue_size as f64 / self.stats.pages_per_minute).round() as i64
        } else {
            -1
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_happy_path() {
        let mut run = RunState::new("r1", 1_000);
        assert_eq!(run.status, RunStatus::Pending);

        run.start(2_000).unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.started_at, Some(2_000));

        run.pause(3_000).unwrap();
        assert_eq!(run.status, RunStatus::Paused);
        assert_eq!(run.paused_at, Some(3_000));

        run.resume(4_000).unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.paused_at.is_none());
        // Resume does not reset the start timestamp.
        assert_eq!(run.started_at, Some(2_000));

        run.cancel(5_000).unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.completed_at, Some(5_000));
    }

    #[test]
    fn test_start_is_idempotent_while_running() {
        let mut run = RunState::new("r1", 0);
        run.start(1).unwrap();
        run.start(2).unwrap();
        assert_eq!(run.started_at, Some(1));
    }

    #[test]
    fn test_invalid_transitions() {
        let mut run = RunState::new("r1", 0);
        assert!(matches!(run.pause(1), Err(ApiError::RunNotRunning)));
        assert!(matches!(run.resume(1), Err(ApiError::InvalidRunState(_))));

        run.start(1).unwrap();
        run.cancel(2).unwrap();
        assert!(matches!(run.start(3), Err(ApiError::RunCompleted)));
        assert!(matches!(run.cancel(3), Err(ApiError::RunCompleted)));
    }

    #[test]
    fn test_start_from_paused_is_rejected() {
        let mut run = RunState::new("r1", 0);
        run.start(1).unwrap();
        run.pause(2).unwrap();
        assert!(matches!(run.start(3), Err(ApiError::InvalidRunState(_))));
    }

    #[test]
    fn test_reset_from_any_state() {
        let mut run = RunState::new("r1", 0);
        run.start(1).unwrap();
        run.stats.urls_queued = 10;
        run.stats.urls_fetched = 4;
        run.cancel(2).unwrap();

        run.reset(3);
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.stats.urls_fetched, 0);
        assert!(run.started_at.is_none());
        assert!(run.completed_at.is_none());
        assert!(run.error.is_none());
    }

    #[test]
    fn test_stats_rolling_average() {
        let mut stats = RunStats::default();
        stats.record_success(100, 2_048);
        stats.record_success(300, 1_024);
        assert_eq!(stats.urls_fetched, 2);
        assert_eq!(stats.bytes_downloaded, 3_072);
        assert!((stats.avg_response_time_ms - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_progress_projection() {
        let mut run = RunState::new("r1", 0);
        run.stats.urls_queued = 10;
        run.stats.urls_fetched = 4;
        run.stats.urls_failed = 1;
        run.recompute_progress(5);
        assert_eq!(run.progress.percentage, 50);
        assert_eq!(run.progress.estimated_seconds_remaining, -1);

        run.stats.pages_per_minute = 30.0;
        run.recompute_progress(5);
        assert_eq!(run.progress.estimated_seconds_remaining, 10);
    }

    #[test]
    fn test_error_ring_truncates() {
        let mut ring = ErrorRing::new();
        for i in 0..60 {
            ring.push(RecentError {
                url: format!("https://x.test/{}", i),
                domain: "x.test".into(),
                status_code: Some(500),
                message: "server error".into(),
                timestamp: i,
            });
        }
        assert_eq!(ring.len(), ERROR_RING_CAPACITY);
        let snapshot = ring.snapshot();
        // Oldest entries were evicted.
        assert_eq!(snapshot.first().unwrap().timestamp, 10);
        assert_eq!(snapshot.last().unwrap().timestamp, 59);
    }
}
