//! Frontier: URLs admitted but not yet dispatched to a worker.
//!
//! Admission runs the full rejection ladder (normalization, scheme, scope,
//! patterns, depth, dedup, capacity). Ordering is a property of `take`, not
//! of insertion: items are ranked by `(-priority, added_at)` when a batch is
//! assembled, so shallower discoveries (admitted with `priority = -depth`)
//! outrank deeper ones by construction.

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::config::{CrawlConfig, ScopeFilter};
use crate::url_utils;
use crate::visited::VisitedIndex;

#[derive(Debug, Clone, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedUrl {
    pub url: String,
    pub domain: String,
    pub depth: u32,
    pub added_at: u64,
    pub priority: i32,
    pub retry_count: u32,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RejectReason {
    #[error("invalid URL")]
    InvalidUrl,
    #[error("unsupported scheme")]
    UnsupportedScheme,
    #[error("domain out of scope")]
    DomainNotAllowed,
    #[error("URL excluded by scope patterns")]
    PatternExcluded,
    #[error("depth {0} exceeds maximum")]
    DepthExceeded(u32),
    #[error("URL already visited")]
    AlreadyVisited,
    #[error("URL already queued")]
    AlreadyQueued,
    #[error("frontier at capacity")]
    QueueFull,
}

/// Pending queue plus a name set for in-queue deduplication. A URL is
/// "known" iff its hash is in the visited index or its normalized form is
/// queued here.
#[derive(Debug, Default)]
pub struct Frontier {
    items: Vec<QueuedUrl>,
    queued_names: HashSet<String>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(items: Vec<QueuedUrl>) -> Self {
        let queued_names = items.iter().map(|item| item.url.clone()).collect();
        Self {
            items,
            queued_names,
        }
    }

    /// Run the admission ladder and enqueue on success. Returns the
    /// normalized URL that was admitted.
    pub fn admit(
        &mut self,
        raw_url: &str,
        depth: u32,
        priority: i32,
        config: &CrawlConfig,
        scope: &ScopeFilter,
        visited: &VisitedIndex,
        now_ms: u64,
    ) -> Result<String, RejectReason> {
        let normalized = match url_utils::normalize_url(raw_url) {
            Ok(url) => url,
            Err(url_utils::UrlError::UnsupportedScheme(_)) => {
                return Err(RejectReason::UnsupportedScheme)
            }
            Err(_) => return Err(RejectReason::InvalidUrl),
        };

        let domain = url_utils::extract_domain(&normalized).ok_or(RejectReason::InvalidUrl)?;

        if !scope.domain_allowed(&domain) {
            return Err(RejectReason::DomainNotAllowed);
        }
        if !scope.url_passes_patterns(&normalized) {
            return Err(RejectReason::PatternExcluded);
        }
        if depth > config.crawl_behavior.max_depth {
            return Err(RejectReason::DepthExceeded(depth));
        }
        if visited.contains(&normalized) {
            return Err(RejectReason::AlreadyVisited);
        }
        if self.queued_names.contains(&normalized) {
            return Err(RejectReason::AlreadyQueued);
        }
        if self.items.len() >= config.crawl_behavior.max_queue_size {
            return Err(RejectReason::QueueFull);
        }

        self.queued_names.insert(normalized.clone());
        self.items.push(QueuedUrl {
            url: normalized.clone(),
            domain,
            depth,
            added_at: now_ms,
            priority,
            retry_count: 0,
        });
        Ok(normalized)
    }

    /// Take up to `n` items satisfying `pred`, highest priority first and
    /// oldest first within a priority. Items failing `pred` (or past the
    /// batch limit) stay queued.
    pub fn take<F>(&mut self, n: usize, mut pred: F) -> Vec<QueuedUrl>
    where
        F: FnMut(&QueuedUrl) -> bool,
    {
        self.items.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.added_at.cmp(&b.added_at))
        });

        let mut batch = Vec::new();
        let mut remaining = Vec::with_capacity(self.items.len());
        for item in self.items.drain(..) {
            if batch.len() < n && pred(&item) {
                batch.push(item);
            } else {
                remaining.push(item);
            }
        }
        self.items = remaining;

        for taken in &batch {
            self.queued_names.remove(&taken.url);
        }
        batch
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[QueuedUrl] {
        &self.items
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.queued_names.clear();
    }
}
