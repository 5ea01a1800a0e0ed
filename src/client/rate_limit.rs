//! Per-endpoint rate-limit windows learned from response headers.
//!
//! The platform advertises its quota through `RateLimit-Limit`,
//! `RateLimit-Remaining` and `RateLimit-Reset`. Each api name gets its own
//! [`RateLimitWindow`], created on the first response carrying those headers
//! and kept for the lifetime of the client.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::header::HeaderMap;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ErrorClass;
use crate::metrics::MetricsCollector;

pub const HEADER_LIMIT: &str = "ratelimit-limit";
pub const HEADER_REMAINING: &str = "ratelimit-remaining";
pub const HEADER_RESET: &str = "ratelimit-reset";
pub const HEADER_RETRY_AFTER: &str = "retry-after";

/// Longest reset or retry hint honored from a server header.
pub const MAX_SERVER_HINT: Duration = Duration::from_secs(24 * 60 * 60);

/// Outcome of asking a window for one request slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// A slot was consumed; the request may proceed.
    Granted,
    /// The window is exhausted until the given delay has passed.
    Wait(Duration),
}

/// Quota state for a single api name.
#[derive(Debug, Clone)]
pub struct RateLimitWindow {
    pub limit: u64,
    pub remaining: u64,
    pub reset: Duration,
    pub last_updated: Instant,
    /// False when the server did not send a complete, usable header set.
    pub available: bool,
}

impl RateLimitWindow {
    /// Builds a window from response headers. Header names are matched
    /// case-insensitively.
    pub fn from_headers(headers: &HeaderMap, now: Instant) -> Self {
        let limit = header_u64(headers, HEADER_LIMIT);
        let remaining = header_u64(headers, HEADER_REMAINING);
        let reset = header_f64(headers, HEADER_RESET).and_then(hint_duration);

        match (limit, remaining, reset) {
            (Some(limit), Some(remaining), Some(reset)) if limit > 0 => Self {
                limit,
                remaining: remaining.min(limit),
                reset,
                last_updated: now,
                available: true,
            },
            _ => Self {
                limit: 0,
                remaining: 0,
                reset: Duration::ZERO,
                last_updated: now,
                available: false,
            },
        }
    }

    /// Returns true if the headers carry any rate-limit information at all.
    pub fn headers_present(headers: &HeaderMap) -> bool {
        headers.contains_key(HEADER_LIMIT)
            || headers.contains_key(HEADER_REMAINING)
            || headers.contains_key(HEADER_RESET)
    }

    /// Point in time at which the window resets.
    pub fn reset_at(&self) -> Instant {
        self.last_updated
            .checked_add(self.reset)
            .unwrap_or(self.last_updated)
    }

    /// Tries to consume one request slot.
    ///
    /// Once the reset time has passed, `remaining` is restored to `limit` and
    /// the next period starts at `now`, so the restore happens once per period.
    pub fn try_acquire(&mut self, now: Instant) -> Acquire {
        if !self.available {
            return Acquire::Granted;
        }

        if now >= self.reset_at() && self.remaining < self.limit {
            self.remaining = self.limit;
            self.last_updated = now;
        }

        if self.remaining > 0 {
            self.remaining -= 1;
            Acquire::Granted
        } else {
            Acquire::Wait(self.reset_at().saturating_duration_since(now))
        }
    }
}

/// Table of windows keyed by api name.
///
/// The mutex is only held for lookups and updates, never across a sleep.
#[derive(Debug, Default)]
pub struct RateLimitTable {
    windows: Mutex<HashMap<String, RateLimitWindow>>,
}

impl RateLimitTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the window for `api_name` grants a slot.
    ///
    /// Proceeds immediately when no window is known for the key.
    pub async fn acquire(&self, api_name: &str, metrics: &MetricsCollector) {
        loop {
            let wait = match self.try_acquire(api_name, Instant::now()) {
                Acquire::Granted => return,
                Acquire::Wait(wait) => wait,
            };

            warn!(
                api_name = %api_name,
                class = %ErrorClass::QuotaExceeded,
                wait_secs = wait.as_secs_f64(),
                "Rate limit exhausted, waiting for window reset"
            );
            metrics.record_rate_limit_wait(api_name, wait.as_secs_f64());
            tokio::time::sleep(wait).await;
        }
    }

    /// Non-blocking variant of [`RateLimitTable::acquire`].
    pub fn try_acquire(&self, api_name: &str, now: Instant) -> Acquire {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match windows.get_mut(api_name) {
            Some(window) => window.try_acquire(now),
            None => Acquire::Granted,
        }
    }

    /// Replaces the window for `api_name` with the state advertised in
    /// `headers`. Responses without rate-limit headers leave it untouched.
    pub fn update(&self, api_name: &str, headers: &HeaderMap) {
        if !RateLimitWindow::headers_present(headers) {
            return;
        }

        let window = RateLimitWindow::from_headers(headers, Instant::now());
        debug!(
            api_name = %api_name,
            limit = window.limit,
            remaining = window.remaining,
            reset_secs = window.reset.as_secs_f64(),
            available = window.available,
            "Updated rate limit window"
        );

        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        windows.insert(api_name.to_string(), window);
    }

    /// Snapshot of the window for `api_name`.
    pub fn get(&self, api_name: &str) -> Option<RateLimitWindow> {
        let windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        windows.get(api_name).cloned()
    }
}

/// Parses the `Retry-After` header as fractional seconds, capped at
/// [`MAX_SERVER_HINT`].
pub fn parse_retry_after(headers: &HeaderMap) -> Option<f64> {
    header_f64(headers, HEADER_RETRY_AFTER)
        .and_then(hint_duration)
        .map(|d| d.as_secs_f64())
}

/// Converts a non-negative seconds hint to a duration no longer than
/// [`MAX_SERVER_HINT`].
pub fn hint_duration(secs: f64) -> Option<Duration> {
    if secs < 0.0 {
        return None;
    }
    let duration = Duration::try_from_secs_f64(secs).unwrap_or(MAX_SERVER_HINT);
    Some(duration.min(MAX_SERVER_HINT))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    header_str(headers, name).and_then(|v| v.parse().ok())
}

fn header_f64(headers: &HeaderMap, name: &str) -> Option<f64> {
    header_str(headers, name)
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_window_from_headers_case_insensitive() {
        let now = Instant::now();
        let h = headers(&[
            ("RateLimit-Limit", "10"),
            ("RATELIMIT-REMAINING", "4"),
            ("ratelimit-reset", "30"),
        ]);
        let window = RateLimitWindow::from_headers(&h, now);

        assert!(window.available);
        assert_eq!(window.limit, 10);
        assert_eq!(window.remaining, 4);
        assert_eq!(window.reset, Duration::from_secs(30));
    }

    #[test]
    fn test_remaining_clamped_to_limit() {
        let h = headers(&[
            ("RateLimit-Limit", "5"),
            ("RateLimit-Remaining", "50"),
            ("RateLimit-Reset", "1"),
        ]);
        let window = RateLimitWindow::from_headers(&h, Instant::now());
        assert_eq!(window.remaining, 5);
    }

    #[test]
    fn test_incomplete_headers_unavailable() {
        let h = headers(&[("RateLimit-Limit", "5")]);
        let mut window = RateLimitWindow::from_headers(&h, Instant::now());
        assert!(!window.available);
        assert_eq!(window.try_acquire(Instant::now()), Acquire::Granted);

        let h = headers(&[
            ("RateLimit-Limit", "abc"),
            ("RateLimit-Remaining", "1"),
            ("RateLimit-Reset", "1"),
        ]);
        assert!(!RateLimitWindow::from_headers(&h, Instant::now()).available);
    }

    #[test]
    fn test_exhausted_window_waits_until_reset() {
        let now = Instant::now();
        let h = headers(&[
            ("RateLimit-Limit", "2"),
            ("RateLimit-Remaining", "0"),
            ("RateLimit-Reset", "10"),
        ]);
        let mut window = RateLimitWindow::from_headers(&h, now);

        match window.try_acquire(now + Duration::from_secs(4)) {
            Acquire::Wait(wait) => assert_eq!(wait, Duration::from_secs(6)),
            Acquire::Granted => panic!("exhausted window must not grant"),
        }
        assert_eq!(window.remaining, 0);
    }

    #[test]
    fn test_reset_restores_limit_once_per_period() {
        let now = Instant::now();
        let h = headers(&[
            ("RateLimit-Limit", "3"),
            ("RateLimit-Remaining", "0"),
            ("RateLimit-Reset", "5"),
        ]);
        let mut window = RateLimitWindow::from_headers(&h, now);

        let after_reset = now + Duration::from_secs(5);
        assert_eq!(window.try_acquire(after_reset), Acquire::Granted);
        assert_eq!(window.remaining, 2);
        assert_eq!(window.last_updated, after_reset);

        // Still inside the new period: no second restore.
        assert_eq!(window.try_acquire(after_reset), Acquire::Granted);
        assert_eq!(window.try_acquire(after_reset), Acquire::Granted);
        assert_eq!(window.remaining, 0);
        assert!(matches!(
            window.try_acquire(after_reset + Duration::from_secs(1)),
            Acquire::Wait(_)
        ));
        assert!(window.remaining <= window.limit);
    }

    #[test]
    fn test_huge_reset_is_capped() {
        let now = Instant::now();
        let h = headers(&[
            ("RateLimit-Limit", "10"),
            ("RateLimit-Remaining", "0"),
            ("RateLimit-Reset", "1e20"),
        ]);
        let mut window = RateLimitWindow::from_headers(&h, now);

        assert!(window.available);
        assert_eq!(window.reset, MAX_SERVER_HINT);
        assert_eq!(window.reset_at(), now + MAX_SERVER_HINT);
        assert_eq!(window.try_acquire(now), Acquire::Wait(MAX_SERVER_HINT));
    }

    #[test]
    fn test_table_fails_open_without_window() {
        let table = RateLimitTable::new();
        assert_eq!(
            table.try_acquire("simulations.create", Instant::now()),
            Acquire::Granted
        );
        assert!(table.get("simulations.create").is_none());
    }

    #[test]
    fn test_table_update_ignores_responses_without_headers() {
        let table = RateLimitTable::new();
        table.update(
            "alphas",
            &headers(&[
                ("RateLimit-Limit", "1"),
                ("RateLimit-Remaining", "0"),
                ("RateLimit-Reset", "60"),
            ]),
        );
        table.update("alphas", &HeaderMap::new());

        let window = table.get("alphas").unwrap();
        assert_eq!(window.limit, 1);
        assert!(matches!(
            table.try_acquire("alphas", Instant::now()),
            Acquire::Wait(_)
        ));
        // Other keys are independent.
        assert_eq!(
            table.try_acquire("simulations", Instant::now()),
            Acquire::Granted
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_sleeps_through_exhausted_window() {
        let table = RateLimitTable::new();
        table.update(
            "simulations",
            &headers(&[
                ("RateLimit-Limit", "1"),
                ("RateLimit-Remaining", "0"),
                ("RateLimit-Reset", "3"),
            ]),
        );

        let start = Instant::now();
        table
            .acquire("simulations", &MetricsCollector::new())
            .await;
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(
            parse_retry_after(&headers(&[("Retry-After", "2.5")])),
            Some(2.5)
        );
        assert_eq!(parse_retry_after(&headers(&[("Retry-After", "soon")])), None);
        assert_eq!(parse_retry_after(&headers(&[("Retry-After", "-1")])), None);
        assert_eq!(
            parse_retry_after(&headers(&[("Retry-After", "1e20")])),
            Some(MAX_SERVER_HINT.as_secs_f64())
        );
        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }
}
