//! Per-domain politeness state and the global dispatch window.

use rand::Rng;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::collections::VecDeque;

/// Counters and pacing state for one domain. Created on first encounter,
/// mutated on dispatch and on result report.
#[derive(
    Debug, Clone, Default, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct DomainState {
    /// 0 means never fetched.
    pub last_fetch_at: u64,
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u32,
    /// 0 means no active backoff.
    pub backoff_until: u64,
    pub total_response_time_ms: u64,
    pub bytes_downloaded: u64,
}

impl DomainState {
    /// Whether a URL on this domain may be dispatched right now, given the
    /// effective (possibly jittered) minimum delay.
    pub fn is_dispatchable(&self, now_ms: u64, min_delay_ms: u64) -> bool {
        if self.backoff_until > now_ms {
            return false;
        }
        self.last_fetch_at == 0 || now_ms.saturating_sub(self.last_fetch_at) >= min_delay_ms
    }

    pub fn record_dispatch(&mut self, now_ms: u64) {
        self.last_fetch_at = now_ms;
        self.request_count += 1;
    }

    pub fn record_success(&mut self, response_time_ms: u64, bytes: u64) {
        self.error_count = 0;
        self.backoff_until = 0;
        self.success_count += 1;
        self.total_response_time_ms += response_time_ms;
        self.bytes_downloaded += bytes;
    }

    /// Record a failure and extend the backoff exponentially:
    /// `min_delay * multiplier^error_count`, capped at `max_delay`.
    pub fn record_failure(
        &mut self,
        now_ms: u64,
        min_delay_ms: u64,
        max_delay_ms: u64,
        multiplier: f64,
    ) {
        self.error_count = self.error_count.saturating_add(1);
        let exponent = self.error_count.min(20) as i32;
        let delay = (min_delay_ms as f64 * multiplier.powi(exponent)).min(max_delay_ms as f64);
        self.backoff_until = now_ms + delay as u64;
    }

    pub fn avg_response_time_ms(&self) -> u64 {
        if self.success_count == 0 {
            0
        } else {
            self.total_response_time_ms / self.success_count
        }
    }
}

/// Apply dispatch jitter to the minimum domain delay: the effective delay is
/// `min_delay * (1 + U(-jitter, +jitter))`, re-drawn per evaluation so
/// workers never synchronize on exact delay boundaries.
pub fn jittered_delay(min_delay_ms: u64, jitter_factor: f64) -> u64 {
    if jitter_factor <= 0.0 || min_delay_ms == 0 {
        return min_delay_ms;
    }
    let offset = rand::thread_rng().gen_range(-jitter_factor..=jitter_factor);
    (min_delay_ms as f64 * (1.0 + offset)).max(0.0) as u64
}

/// Sliding 60-second window over dispatch timestamps, backing the
/// `global_rate_limit_per_minute` setting.
#[derive(Debug, Default)]
pub struct RateWindow {
    events: VecDeque<u64>,
}

const WINDOW_MS: u64 = 60_000;

impl RateWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, now_ms: u64) {
        self.events.push_back(now_ms);
    }

    fn prune(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(WINDOW_MS);
        while matches!(self.events.front(), Some(&at) if at < cutoff) {
            self.events.pop_front();
        }
    }

    /// True when the window has reached `limit` dispatches. A limit of 0
    /// disables the check.
    pub fn is_full(&mut self, limit: u32, now_ms: u64) -> bool {
        if limit == 0 {
            return false;
        }
        self.prune(now_ms);
        self.events.len() >= limit as usize
    }
}
