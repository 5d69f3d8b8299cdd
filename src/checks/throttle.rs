use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::check::Check;
use crate::clock::Clock;
use crate::error::ConfigError;
use crate::request::RequestContext;
use crate::verdict::{ceil_secs, CheckKind, Denial, DenyReason, Verdict};

/// Limit and window for one throttle scope.
///
/// The throttle key is `"{source}|{scope}"`, so each source address gets its
/// own counter per scope (for example `login` or `password_resets`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleRule {
    scope: String,
    limit: u32,
    window: Duration,
}

impl ThrottleRule {
    /// Creates a rule allowing `limit` requests per `window` for `scope`.
    pub fn new(scope: impl Into<String>, limit: u32, window: Duration) -> Self {
        Self {
            scope: scope.into(),
            limit,
            window,
        }
    }

    /// Returns the scope name.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Returns the request limit per window.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Returns the window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    pub(crate) fn validate(&self, policy: &str) -> Result<(), ConfigError> {
        if self.limit == 0 {
            return Err(ConfigError::InvalidThrottle {
                policy: policy.to_string(),
                field: "limit",
            });
        }
        if self.window.is_zero() {
            return Err(ConfigError::InvalidThrottle {
                policy: policy.to_string(),
                field: "window",
            });
        }
        Ok(())
    }
}

/// Fixed-window counter state for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleWindow {
    count: u32,
    started_at: Instant,
    window: Duration,
    limit: u32,
}

impl ThrottleWindow {
    fn start(now: Instant, window: Duration, limit: u32) -> Self {
        Self {
            count: 0,
            started_at: now,
            window,
            limit,
        }
    }

    /// Requests counted in the current window, including denied ones.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Instant the current window opened.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Instant the current window closes.
    pub fn resets_at(&self) -> Instant {
        self.started_at + self.window
    }

    /// Limit in force for this window.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    fn expired(&self, now: Instant) -> bool {
        now >= self.resets_at()
    }
}

/// Result of counting one request against a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Within the limit
    Allowed {
        /// Requests left in the current window
        remaining: u32,
    },
    /// Over the limit
    Limited {
        /// Time until the window resets
        retry_after: Duration,
    },
}

/// Shared fixed-window counters keyed by string.
///
/// Counting a request is one atomic step per key: the entry's shard stays
/// write-locked from the window reset through the increment and the
/// comparison, so concurrent callers on one key can never be admitted past
/// the limit. Expired entries are dropped by [`sweep`](Self::sweep), which is
/// also run automatically every `sweep_every` hits.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use policy_guard::{ManualClock, RateLimiter, ThrottleDecision};
///
/// let clock = Arc::new(ManualClock::new());
/// let limiter = RateLimiter::new(clock.clone());
/// let window = Duration::from_secs(20);
///
/// for _ in 0..5 {
///     assert!(matches!(limiter.hit("203.0.113.9|login", 5, window), ThrottleDecision::Allowed { .. }));
/// }
/// assert!(matches!(limiter.hit("203.0.113.9|login", 5, window), ThrottleDecision::Limited { .. }));
///
/// clock.advance(window);
/// assert!(matches!(limiter.hit("203.0.113.9|login", 5, window), ThrottleDecision::Allowed { .. }));
/// ```
pub struct RateLimiter {
    windows: DashMap<String, ThrottleWindow>,
    clock: Arc<dyn Clock>,
    sweep_every: u64,
    hits: AtomicU64,
}

/// Default number of hits between automatic sweeps.
pub(crate) const DEFAULT_SWEEP_EVERY: u64 = 1024;

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("keys", &self.windows.len())
            .field("sweep_every", &self.sweep_every)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Creates an empty limiter reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_sweep_interval(clock, DEFAULT_SWEEP_EVERY)
    }

    /// Creates a limiter that sweeps after every `sweep_every` hits (0 disables).
    pub fn with_sweep_interval(clock: Arc<dyn Clock>, sweep_every: u64) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
            sweep_every,
            hits: AtomicU64::new(0),
        }
    }

    /// Counts one request for `key` and decides whether it is within `limit`.
    ///
    /// `limit` and `window` only take effect when a new window starts. A live
    /// window keeps the length and limit it started with until it expires.
    pub fn hit(&self, key: &str, limit: u32, window: Duration) -> ThrottleDecision {
        let now = self.clock.now();
        let decision = {
            let mut entry = self
                .windows
                .entry(key.to_string())
                .or_insert_with(|| ThrottleWindow::start(now, window, limit));
            let state = entry.value_mut();
            if state.expired(now) {
                *state = ThrottleWindow::start(now, window, limit);
            }
            state.count = state.count.saturating_add(1);

            if state.count <= state.limit {
                ThrottleDecision::Allowed {
                    remaining: state.limit - state.count,
                }
            } else {
                ThrottleDecision::Limited {
                    retry_after: state.resets_at().saturating_duration_since(now),
                }
            }
        };

        // The entry guard is released above; sweeping takes shard locks.
        self.maybe_sweep();
        decision
    }

    /// Returns a snapshot of the window for `key`, if one is live.
    pub fn window(&self, key: &str) -> Option<ThrottleWindow> {
        self.windows.get(key).map(|entry| *entry.value())
    }

    /// Drops every entry whose window has elapsed and returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|_, state| !state.expired(now));
        let dropped = before.saturating_sub(self.windows.len());
        if dropped > 0 {
            tracing::debug!(dropped, "swept idle throttle windows");
        }
        dropped
    }

    /// Returns the number of tracked keys.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Returns true when no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    fn maybe_sweep(&self) {
        if self.sweep_every == 0 {
            return;
        }
        let hits = self.hits.fetch_add(1, Ordering::Relaxed) + 1;
        if hits % self.sweep_every == 0 {
            self.sweep();
        }
    }
}

/// Throttles requests per source address and scope.
#[derive(Debug, Clone)]
pub struct ThrottleCheck {
    limiter: Arc<RateLimiter>,
    rule: ThrottleRule,
}

impl ThrottleCheck {
    /// Creates a check counting against `limiter` under `rule`.
    pub fn new(limiter: Arc<RateLimiter>, rule: ThrottleRule) -> Self {
        Self { limiter, rule }
    }

    /// Returns the throttle key for a request.
    pub fn key_for(&self, ctx: &RequestContext) -> String {
        format!("{}|{}", ctx.source(), self.rule.scope)
    }
}

impl Check for ThrottleCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::Throttle
    }

    fn evaluate(&self, ctx: &RequestContext) -> Verdict {
        let key = self.key_for(ctx);
        match self.limiter.hit(&key, self.rule.limit, self.rule.window) {
            ThrottleDecision::Allowed { .. } => Verdict::Allow,
            ThrottleDecision::Limited { retry_after } => Verdict::Deny(
                Denial::new(
                    DenyReason::RateLimited,
                    format!("too many requests; retry in {}s", ceil_secs(retry_after)),
                )
                .retry_after(retry_after),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::net::{IpAddr, Ipv4Addr};

    const WINDOW: Duration = Duration::from_secs(20);

    fn limiter() -> (Arc<ManualClock>, Arc<RateLimiter>) {
        let clock = Arc::new(ManualClock::new());
        let limiter = Arc::new(RateLimiter::new(clock.clone()));
        (clock, limiter)
    }

    fn login_from(ip: [u8; 4]) -> RequestContext {
        RequestContext::builder("req-login", IpAddr::V4(Ipv4Addr::from(ip))).build()
    }

    #[test]
    fn sixth_login_in_window_is_limited() {
        let (clock, limiter) = limiter();
        let check = ThrottleCheck::new(limiter, ThrottleRule::new("login", 5, WINDOW));
        let ctx = login_from([203, 0, 113, 9]);

        for _ in 0..5 {
            assert!(check.evaluate(&ctx).is_allowed());
        }
        clock.advance(Duration::from_secs(5));
        let v = check.evaluate(&ctx);
        assert_eq!(v.reason(), Some(DenyReason::RateLimited));
        assert_eq!(v.denial().unwrap().retry_after_secs(), Some(15));
    }

    #[test]
    fn window_reset_allows_again() {
        let (clock, limiter) = limiter();
        let check = ThrottleCheck::new(limiter, ThrottleRule::new("login", 5, WINDOW));
        let ctx = login_from([203, 0, 113, 9]);

        for _ in 0..6 {
            let _ = check.evaluate(&ctx);
        }
        clock.advance(WINDOW);
        assert!(check.evaluate(&ctx).is_allowed());
    }

    #[test]
    fn sources_are_counted_separately() {
        let (_clock, limiter) = limiter();
        let check = ThrottleCheck::new(limiter, ThrottleRule::new("login", 1, WINDOW));

        assert!(check.evaluate(&login_from([198, 51, 100, 1])).is_allowed());
        assert!(check.evaluate(&login_from([198, 51, 100, 2])).is_allowed());
        assert!(!check.evaluate(&login_from([198, 51, 100, 1])).is_allowed());
    }

    #[test]
    fn scopes_are_counted_separately() {
        let (_clock, limiter) = limiter();
        let login = ThrottleCheck::new(limiter.clone(), ThrottleRule::new("login", 1, WINDOW));
        let resets = ThrottleCheck::new(limiter, ThrottleRule::new("password_resets", 1, WINDOW));
        let ctx = login_from([198, 51, 100, 1]);

        assert!(login.evaluate(&ctx).is_allowed());
        assert!(resets.evaluate(&ctx).is_allowed());
        assert!(!login.evaluate(&ctx).is_allowed());
    }

    #[test]
    fn denied_requests_still_count() {
        let (_clock, limiter) = limiter();
        for _ in 0..7 {
            let _ = limiter.hit("k", 5, WINDOW);
        }
        assert_eq!(limiter.window("k").map(|w| w.count()), Some(7));
    }

    #[test]
    fn concurrent_hits_never_exceed_limit() {
        let (_clock, limiter) = limiter();
        let allowed = AtomicU64::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..25 {
                        if matches!(limiter.hit("shared", 5, WINDOW), ThrottleDecision::Allowed { .. }) {
                            allowed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        assert_eq!(allowed.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn sweep_drops_only_expired_windows() {
        let (clock, limiter) = limiter();
        let _ = limiter.hit("old", 5, Duration::from_secs(1));
        let _ = limiter.hit("live", 5, Duration::from_secs(60));

        clock.advance(Duration::from_secs(2));
        assert_eq!(limiter.sweep(), 1);
        assert!(limiter.window("old").is_none());
        assert!(limiter.window("live").is_some());
    }

    #[test]
    fn automatic_sweep_runs_on_interval() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_sweep_interval(clock.clone(), 2);
        let _ = limiter.hit("a", 5, Duration::from_secs(1));
        clock.advance(Duration::from_secs(5));
        let _ = limiter.hit("b", 5, Duration::from_secs(60));

        assert!(limiter.window("a").is_none());
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn zero_limit_or_window_is_a_config_error() {
        assert!(ThrottleRule::new("login", 0, WINDOW).validate("login").is_err());
        assert!(ThrottleRule::new("login", 5, Duration::ZERO).validate("login").is_err());
        assert!(ThrottleRule::new("login", 5, WINDOW).validate("login").is_ok());
    }

    #[test]
    fn shorter_rule_does_not_shrink_live_window() {
        let (clock, limiter) = limiter();
        let strict = Duration::from_secs(3600);
        let lenient = Duration::from_secs(1);

        let mut strict_allowed = 0;
        for _ in 0..10 {
            for _ in 0..2 {
                if matches!(limiter.hit("auth", 2, strict), ThrottleDecision::Allowed { .. }) {
                    strict_allowed += 1;
                }
            }
            let _ = limiter.hit("auth", 100, lenient);
            clock.advance(Duration::from_secs(2));
        }

        assert_eq!(strict_allowed, 2);
        let window = limiter.window("auth").unwrap();
        assert_eq!(window.limit(), 2);
        assert_eq!(window.resets_at() - window.started_at(), strict);
    }
}
