//! Tiered fixed-window rate limiting.
//!
//! Each tier owns one counter per client identifier (an API key id or a client IP).
//! A counter lives for one fixed window: the first request in a window starts it,
//! every request increments it, and the request is allowed while the count stays
//! within the tier's budget. Requests arriving after the window has elapsed start
//! a fresh window.
//!
//! ## Tiers
//!
//! | Tier              | Default budget | Window  | Applies to                          |
//! |-------------------|----------------|---------|-------------------------------------|
//! | `download_burst`  | 3              | 15 min  | anonymous downloads                 |
//! | `download_hourly` | 10             | 1 hour  | anonymous downloads                 |
//! | `api_general`     | 1000           | 1 hour  | API key list/metadata/download      |
//! | `api_query`       | 500            | 1 hour  | API key queries                     |
//!
//! ## Limitations
//!
//! Counters are process-local and lost on restart. Running several instances
//! multiplies the effective budget; a shared store with atomic
//! increment-with-expiry is required for that deployment shape.

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use axum::http::{HeaderMap, HeaderValue, header::RETRY_AFTER};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::Config;

/// Above this many tracked identifiers, expired windows are evicted on the next check.
const DEFAULT_MAX_TRACKED: usize = 10_000;

/// Minimum time between two eviction sweeps of the same tier.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

const FIFTEEN_MINUTES: Duration = Duration::from_secs(15 * 60);
const ONE_HOUR: Duration = Duration::from_secs(60 * 60);

/// Named rate-limit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    DownloadBurst,
    DownloadHourly,
    ApiGeneral,
    ApiQuery,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::DownloadBurst => "download_burst",
            Tier::DownloadHourly => "download_hourly",
            Tier::ApiGeneral => "api_general",
            Tier::ApiQuery => "api_query",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one rate-limit check.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub tier: Tier,
    pub allowed: bool,
    pub limit: u32,
    pub window: Duration,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// Seconds until the window resets; only set when the request was denied
    pub retry_after: Option<u64>,
}

impl RateLimitDecision {
    /// The `limits` object of a 429 body.
    pub fn limits_json(&self) -> serde_json::Value {
        json!({
            "type": self.tier.as_str(),
            "maxRequests": self.limit,
            "windowMs": self.window.as_millis() as u64,
            "remaining": self.remaining,
            "retryAfter": self.retry_after,
            "resetTime": self.reset_at,
        })
    }

    /// Attach `X-RateLimit-*` headers (and `Retry-After` when denied).
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert("x-ratelimit-limit", HeaderValue::from(self.limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(self.remaining));
        headers.insert(
            "x-ratelimit-reset",
            HeaderValue::from(self.reset_at.timestamp()),
        );
        if let Some(retry_after) = self.retry_after {
            headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    start: Instant,
    count: u32,
}

/// Fixed-window counter for a single tier.
pub struct FixedWindowLimiter {
    tier: Tier,
    limit: u32,
    window: Duration,
    max_tracked: usize,
    windows: DashMap<String, Window>,
    last_sweep: Mutex<Option<Instant>>,
}

impl FixedWindowLimiter {
    pub fn new(tier: Tier, limit: u32, window: Duration) -> Self {
        Self {
            tier,
            limit,
            window,
            max_tracked: DEFAULT_MAX_TRACKED,
            windows: DashMap::new(),
            last_sweep: Mutex::new(None),
        }
    }

    /// Count a request for `identifier` and decide whether it may proceed.
    pub fn check(&self, identifier: &str) -> RateLimitDecision {
        self.check_at(identifier, Instant::now())
    }

    /// Same as [`check`](Self::check) with an explicit clock reading.
    pub fn check_at(&self, identifier: &str, now: Instant) -> RateLimitDecision {
        if self.windows.len() > self.max_tracked && self.sweep_due(now) {
            self.evict_expired(now);
        }

        let (count, window_start) = {
            let mut entry = self
                .windows
                .entry(identifier.to_string())
                .or_insert_with(|| {
                    debug!(tier = %self.tier, identifier, "Starting rate limit window");
                    Window {
                        start: now,
                        count: 0,
                    }
                });

            if now.saturating_duration_since(entry.start) >= self.window {
                debug!(tier = %self.tier, identifier, "Rate limit window expired, resetting");
                entry.start = now;
                entry.count = 0;
            }

            entry.count = entry.count.saturating_add(1);
            (entry.count, entry.start)
        };

        let until_reset = self
            .window
            .saturating_sub(now.saturating_duration_since(window_start));
        let reset_at = Utc::now()
            + chrono::Duration::from_std(until_reset).unwrap_or_else(|_| chrono::Duration::zero());
        let allowed = count <= self.limit;

        let retry_after = if allowed {
            None
        } else {
            // Round up so clients never retry a moment too early
            let secs = until_reset.as_secs() + u64::from(until_reset.subsec_nanos() > 0);
            warn!(
                tier = %self.tier,
                identifier,
                count,
                limit = self.limit,
                retry_after = secs.max(1),
                "Rate limit exceeded"
            );
            Some(secs.max(1))
        };

        RateLimitDecision {
            tier: self.tier,
            allowed,
            limit: self.limit,
            window: self.window,
            remaining: self.limit.saturating_sub(count),
            reset_at,
            retry_after,
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.windows.len()
    }

    /// Claim the next sweep if `SWEEP_INTERVAL` has passed since the last one.
    fn sweep_due(&self, now: Instant) -> bool {
        let mut last = self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(at) if now.saturating_duration_since(at) < SWEEP_INTERVAL => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    fn evict_expired(&self, now: Instant) {
        let before = self.windows.len();
        self.windows
            .retain(|_, window| now.saturating_duration_since(window.start) < self.window);
        let evicted = before.saturating_sub(self.windows.len());
        if evicted > 0 {
            debug!(tier = %self.tier, evicted, remaining = self.windows.len(), "Evicted expired rate limit windows");
        }
    }
}

/// The four tiers used by the dataset endpoints, shared across requests.
#[derive(Clone)]
pub struct RateLimiters {
    pub download_burst: Arc<FixedWindowLimiter>,
    pub download_hourly: Arc<FixedWindowLimiter>,
    pub api_general: Arc<FixedWindowLimiter>,
    pub api_query: Arc<FixedWindowLimiter>,
}

impl RateLimiters {
    pub fn from_config(config: &Config) -> Self {
        Self {
            download_burst: Arc::new(FixedWindowLimiter::new(
                Tier::DownloadBurst,
                config.download_burst_limit,
                FIFTEEN_MINUTES,
            )),
            download_hourly: Arc::new(FixedWindowLimiter::new(
                Tier::DownloadHourly,
                config.download_hourly_limit,
                ONE_HOUR,
            )),
            api_general: Arc::new(FixedWindowLimiter::new(
                Tier::ApiGeneral,
                config.api_general_limit,
                ONE_HOUR,
            )),
            api_query: Arc::new(FixedWindowLimiter::new(
                Tier::ApiQuery,
                config.api_query_limit,
                ONE_HOUR,
            )),
        }
    }

    /// Run one tier; a denial becomes `AppError::RateLimited`.
    pub fn enforce(
        limiter: &FixedWindowLimiter,
        identifier: &str,
    ) -> Result<RateLimitDecision, crate::error::AppError> {
        let decision = limiter.check(identifier);
        if decision.allowed {
            Ok(decision)
        } else {
            Err(crate::error::AppError::RateLimited(decision))
        }
    }

    /// Anonymous download policy: burst tier first, then the hourly tier.
    ///
    /// A burst denial returns before the hourly tier is counted. The decision
    /// with the fewest remaining requests is returned for the response headers.
    pub fn enforce_download(
        &self,
        identifier: &str,
    ) -> Result<RateLimitDecision, crate::error::AppError> {
        let burst = Self::enforce(&self.download_burst, identifier)?;
        let hourly = Self::enforce(&self.download_hourly, identifier)?;
        Ok(if hourly.remaining < burst.remaining {
            hourly
        } else {
            burst
        })
    }
}
