//! Crawl configuration: five sections with documented defaults, per-section
//! shallow merge, and the flattened projection handed to workers with every
//! dispatched batch.

use regex::Regex;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::collections::HashMap;
use tracing::warn;

/// Per-domain pacing and the global dispatch budget.
#[derive(Debug, Clone, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimiting {
    pub min_domain_delay_ms: u64,
    pub max_domain_delay_ms: u64,
    pub error_backoff_multiplier: f64,
    pub jitter_factor: f64,
    pub max_concurrent_requests: u32,
    /// 0 disables the global sliding-window limit.
    pub global_rate_limit_per_minute: u32,
}

impl Default for RateLimiting {
    fn default() -> Self {
        Self {
            min_domain_delay_ms: 1_000,
            max_domain_delay_ms: 60_000,
            error_backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            max_concurrent_requests: 16,
            global_rate_limit_per_minute: 0,
        }
    }
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentFiltering {
    pub max_content_size_bytes: u64,
    pub allowed_content_types: Vec<String>,
    pub skip_binary_files: bool,
    pub store_content: bool,
}

impl Default for ContentFiltering {
    fn default() -> Self {
        Self {
            max_content_size_bytes: 10 * 1024 * 1024,
            allowed_content_types: vec![
                "text/html".to_string(),
                "application/xhtml+xml".to_string(),
            ],
            skip_binary_files: true,
            store_content: true,
        }
    }
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CrawlBehavior {
    pub max_depth: u32,
    pub max_queue_size: usize,
    /// 0 means unbounded.
    pub max_pages_per_run: u64,
    pub default_batch_size: u32,
    pub request_timeout_ms: u64,
    pub retry_count: u32,
    pub respect_robots_txt: bool,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub user_agent: String,
    pub custom_headers: HashMap<String, String>,
    pub follow_links: bool,
    pub same_domain_only: bool,
}

impl Default for CrawlBehavior {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_queue_size: 100_000,
            max_pages_per_run: 0,
            default_batch_size: 10,
            request_timeout_ms: 30_000,
            retry_count: 3,
            respect_robots_txt: true,
            follow_redirects: true,
            max_redirects: 5,
            user_agent: "CloudflareCrawler/1.0".to_string(),
            custom_headers: HashMap::new(),
            follow_links: true,
            same_domain_only: true,
        }
    }
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DomainScope {
    /// When non-empty, only these domains are admitted.
    pub allowed_domains: Vec<String>,
    pub blocked_domains: Vec<String>,
    /// URLs must match at least one include pattern when any are set.
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub include_subdomains: bool,
}

impl Default for DomainScope {
    fn default() -> Self {
        Self {
            allowed_domains: Vec::new(),
            blocked_domains: Vec::new(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            include_subdomains: true,
        }
    }
}

impl DomainScope {
    pub fn validate_patterns(&self) -> Result<(), String> {
        for pattern in self.include_patterns.iter().chain(&self.exclude_patterns) {
            Regex::new(pattern).map_err(|e| format!("bad pattern {:?}: {}", pattern, e))?;
        }
        Ok(())
    }
}

/// Rendering knobs round-trip through configure but the coordinator itself
/// never renders; workers may honor them.
#[derive(Debug, Clone, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rendering {
    pub render_js: bool,
    pub render_timeout_ms: u64,
}

impl Default for Rendering {
    fn default() -> Self {
        Self {
            render_js: false,
            render_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CrawlConfig {
    pub id: Option<String>,
    pub name: Option<String>,
    pub rate_limiting: RateLimiting,
    pub content_filtering: ContentFiltering,
    pub crawl_behavior: CrawlBehavior,
    pub domain_scope: DomainScope,
    pub rendering: Rendering,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            id: None,
            name: None,
            rate_limiting: RateLimiting::default(),
            content_filtering: ContentFiltering::default(),
            crawl_behavior: CrawlBehavior::default(),
            domain_scope: DomainScope::default(),
            rendering: Rendering::default(),
        }
    }
}

impl CrawlConfig {
    /// The subset of policy a worker needs to execute a batch.
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            request_timeout_ms: self.crawl_behavior.request_timeout_ms,
            respect_robots_txt: self.crawl_behavior.respect_robots_txt,
            user_agent: self.crawl_behavior.user_agent.clone(),
            custom_headers: self.crawl_behavior.custom_headers.clone(),
            max_content_size_bytes: self.content_filtering.max_content_size_bytes,
            allowed_content_types: self.content_filtering.allowed_content_types.clone(),
            follow_redirects: self.crawl_behavior.follow_redirects,
            max_redirects: self.crawl_behavior.max_redirects,
            store_content: self.content_filtering.store_content,
        }
    }
}

/// Flattened policy snapshot attached to every `request-work` response.
#[derive(Debug, Clone, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    pub request_timeout_ms: u64,
    pub respect_robots_txt: bool,
    pub user_agent: String,
    pub custom_headers: HashMap<String, String>,
    pub max_content_size_bytes: u64,
    pub allowed_content_types: Vec<String>,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub store_content: bool,
}

/// Shallow merge payload for `configure`: unspecified fields keep their
/// previous values, section by section.
#[derive(Debug, Clone, Default, SerdeDeserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigUpdate {
    pub name: Option<String>,
    pub rate_limiting: Option<RateLimitingUpdate>,
    pub content_filtering: Option<ContentFilteringUpdate>,
    pub crawl_behavior: Option<CrawlBehaviorUpdate>,
    pub domain_scope: Option<DomainScopeUpdate>,
    pub rendering: Option<RenderingUpdate>,
}

#[derive(Debug, Clone, Default, SerdeDeserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitingUpdate {
    pub min_domain_delay_ms: Option<u64>,
    pub max_domain_delay_ms: Option<u64>,
    pub error_backoff_multiplier: Option<f64>,
    pub jitter_factor: Option<f64>,
    pub max_concurrent_requests: Option<u32>,
    pub global_rate_limit_per_minute: Option<u32>,
}

#[derive(Debug, Clone, Default, SerdeDeserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentFilteringUpdate {
    pub max_content_size_bytes: Option<u64>,
    pub allowed_content_types: Option<Vec<String>>,
    pub skip_binary_files: Option<bool>,
    pub store_content: Option<bool>,
}

#[derive(Debug, Clone, Default, SerdeDeserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CrawlBehaviorUpdate {
    pub max_depth: Option<u32>,
    pub max_queue_size: Option<usize>,
    pub max_pages_per_run: Option<u64>,
    pub default_batch_size: Option<u32>,
    pub request_timeout_ms: Option<u64>,
    pub retry_count: Option<u32>,
    pub respect_robots_txt: Option<bool>,
    pub follow_redirects: Option<bool>,
    pub max_redirects: Option<u32>,
    pub user_agent: Option<String>,
    pub custom_headers: Option<HashMap<String, String>>,
    pub follow_links: Option<bool>,
    pub same_domain_only: Option<bool>,
}

#[derive(Debug, Clone, Default, SerdeDeserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DomainScopeUpdate {
    pub allowed_domains: Option<Vec<String>>,
    pub blocked_domains: Option<Vec<String>>,
    pub include_patterns: Option<Vec<String>>,
    pub exclude_patterns: Option<Vec<String>>,
    pub include_subdomains: Option<bool>,
}

#[derive(Debug, Clone, Default, SerdeDeserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderingUpdate {
    pub render_js: Option<bool>,
    pub render_timeout_ms: Option<u64>,
}

macro_rules! merge_field {
    ($target:expr, $update:expr, $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = $update.$field {
                $target.$field = value;
            }
        )+
    };
}

impl ConfigUpdate {
    pub fn apply(self, config: &mut CrawlConfig) {
        if let Some(name) = self.name {
            config.name = Some(name);
        }
        if let Some(update) = self.rate_limiting {
            merge_field!(
                config.rate_limiting,
                update,
                min_domain_delay_ms,
                max_domain_delay_ms,
                error_backoff_multiplier,
                jitter_factor,
                max_concurrent_requests,
                global_rate_limit_per_minute,
            );
        }
        if let Some(update) = self.content_filtering {
            merge_field!(
                config.content_filtering,
                update,
                max_content_size_bytes,
                allowed_content_types,
                skip_binary_files,
                store_content,
            );
        }
        if let Some(update) = self.crawl_behavior {
            merge_field!(
                config.crawl_behavior,
                update,
                max_depth,
                max_queue_size,
                max_pages_per_run,
                default_batch_size,
                request_timeout_ms,
                retry_count,
                respect_robots_txt,
                follow_redirects,
                max_redirects,
                user_agent,
                custom_headers,
                follow_links,
                same_domain_only,
            );
        }
        if let Some(update) = self.domain_scope {
            merge_field!(
                config.domain_scope,
                update,
                allowed_domains,
                blocked_domains,
                include_patterns,
                exclude_patterns,
                include_subdomains,
            );
        }
        if let Some(update) = self.rendering {
            merge_field!(config.rendering, update, render_js, render_timeout_ms);
        }
    }
}

/// Compiled admission filter derived from [`DomainScope`]. Rebuilt whenever
/// the configuration changes; invalid patterns are skipped with a warning
/// (configure rejects them up front, hydrated state may still carry them).
#[derive(Debug, Default)]
pub struct ScopeFilter {
    allowed_domains: Vec<String>,
    blocked_domains: Vec<String>,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    include_subdomains: bool,
}

impl ScopeFilter {
    pub fn compile(scope: &DomainScope) -> Self {
        let compile_all = |patterns: &[String]| {
            patterns
                .iter()
                .filter_map(|p| match Regex::new(p) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!(pattern = %p, error = %e, "skipping unparseable scope pattern");
                        None
                    }
                })
                .collect::<Vec<_>>()
        };
        Self {
            allowed_domains: scope.allowed_domains.clone(),
            blocked_domains: scope.blocked_domains.clone(),
            include: compile_all(&scope.include_patterns),
            exclude: compile_all(&scope.exclude_patterns),
            include_subdomains: scope.include_subdomains,
        }
    }

    pub fn domain_allowed(&self, domain: &str) -> bool {
        let subdomains = self.include_subdomains;
        if self
            .blocked_domains
            .iter()
            .any(|blocked| crate::url_utils::domains_match(domain, blocked, subdomains))
        {
            return false;
        }
        if self.allowed_domains.is_empty() {
            return true;
        }
        self.allowed_domains
            .iter()
            .any(|allowed| crate::url_utils::domains_match(domain, allowed, subdomains))
    }

    pub fn url_passes_patterns(&self, url: &str) -> bool {
        if self.exclude.iter().any(|re| re.is_match(url)) {
            return false;
        }
        if self.include.is_empty() {
            return true;
        }
        self.include.iter().any(|re| re.is_match(url))
    }
}
