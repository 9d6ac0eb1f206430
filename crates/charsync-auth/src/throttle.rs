//! Per-source sliding-window failure throttle.
//!
//! Every failed secret-key lookup from a source address is timestamped.
//! Once a source has `max_failures` failures inside the window it is locked
//! out: the authenticator stops looking keys up for it at all, so a locked
//! out caller can't tell a valid key from an invalid one.
//!
//! Sources that stop failing are dropped by a sweep. Once the map is large
//! it runs at most once per window, on the next recorded failure.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::ThrottleConfig;

/// Tracked sources below which expired windows are never swept.
const SWEEP_THRESHOLD: usize = 1024;

pub struct FailureThrottle {
    config: ThrottleConfig,
    failures: Mutex<Failures>,
}

struct Failures {
    by_source: HashMap<IpAddr, VecDeque<Instant>>,
    last_sweep: Instant,
}

impl FailureThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            failures: Mutex::new(Failures {
                by_source: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Returns `true` if `source` is currently locked out.
    pub async fn is_locked(&self, source: IpAddr) -> bool {
        if self.is_exempt(source) {
            return false;
        }
        let now = Instant::now();
        let mut failures = self.failures.lock().await;
        let Some(window) = failures.by_source.get_mut(&source) else {
            return false;
        };
        self.prune(window, now);
        if window.is_empty() {
            failures.by_source.remove(&source);
            return false;
        }
        window.len() >= self.config.max_failures
    }

    /// Records one failed attempt from `source`.
    pub async fn record_failure(&self, source: IpAddr) {
        if self.is_exempt(source) {
            return;
        }
        let now = Instant::now();
        let mut failures = self.failures.lock().await;
        if failures.by_source.len() >= SWEEP_THRESHOLD
            && now.duration_since(failures.last_sweep) >= self.config.window()
        {
            self.sweep(&mut failures, now);
        }
        let window = failures.by_source.entry(source).or_default();
        self.prune(window, now);
        window.push_back(now);
        tracing::debug!(%source, failures = window.len(), "recorded failed authentication");
    }

    /// Forgets every failure from `source` (after a successful login).
    pub async fn clear(&self, source: IpAddr) {
        self.failures.lock().await.by_source.remove(&source);
    }

    /// Number of sources with a failure window on record.
    pub async fn tracked_sources(&self) -> usize {
        self.failures.lock().await.by_source.len()
    }

    /// Drops every source whose window has fully expired.
    fn sweep(&self, failures: &mut Failures, now: Instant) {
        let before = failures.by_source.len();
        failures.by_source.retain(|_, window| {
            self.prune(window, now);
            !window.is_empty()
        });
        let after = failures.by_source.len();
        failures.last_sweep = now;
        tracing::debug!(before, after, "swept expired failure windows");
    }

    fn is_exempt(&self, source: IpAddr) -> bool {
        self.config.exempt_sources.contains(&source)
    }

    fn prune(&self, window: &mut VecDeque<Instant>, now: Instant) {
        let horizon = self.config.window();
        while window
            .front()
            .is_some_and(|t| now.duration_since(*t) >= horizon)
        {
            window.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use super::*;

    const SOURCE: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

    fn throttle(max_failures: usize, window_secs: u64) -> FailureThrottle {
        FailureThrottle::new(ThrottleConfig {
            max_failures,
            window_secs,
            exempt_sources: Vec::new(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_locked_below_threshold_returns_false() {
        let t = throttle(3, 60);
        t.record_failure(SOURCE).await;
        t.record_failure(SOURCE).await;

        assert!(!t.is_locked(SOURCE).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_locked_at_threshold_returns_true() {
        let t = throttle(3, 60);
        for _ in 0..3 {
            t.record_failure(SOURCE).await;
        }

        assert!(t.is_locked(SOURCE).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_locked_old_failures_slide_out() {
        let t = throttle(3, 60);
        t.record_failure(SOURCE).await;
        t.record_failure(SOURCE).await;
        tokio::time::advance(Duration::from_secs(45)).await;
        t.record_failure(SOURCE).await;
        assert!(t.is_locked(SOURCE).await);

        // The first two failures leave the window; only one remains.
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(!t.is_locked(SOURCE).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_unlocks_source() {
        let t = throttle(1, 60);
        t.record_failure(SOURCE).await;
        assert!(t.is_locked(SOURCE).await);

        t.clear(SOURCE).await;

        assert!(!t.is_locked(SOURCE).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exempt_source_never_locked() {
        let t = FailureThrottle::new(ThrottleConfig {
            max_failures: 1,
            window_secs: 60,
            exempt_sources: vec![SOURCE],
        });
        t.record_failure(SOURCE).await;
        t.record_failure(SOURCE).await;

        assert!(!t.is_locked(SOURCE).await);
    }

    fn nth_source(n: u32) -> IpAddr {
        IpAddr::V4(Ipv4Addr::from(0x0a01_0000 + n))
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_failure_sweeps_expired_sources() {
        let t = throttle(3, 60);
        for n in 0..10_000 {
            t.record_failure(nth_source(n)).await;
        }
        assert!(t.tracked_sources().await >= SWEEP_THRESHOLD);

        tokio::time::advance(Duration::from_secs(3600)).await;
        t.record_failure(SOURCE).await;

        assert_eq!(t.tracked_sources().await, 1);
        assert!(!t.is_locked(nth_source(0)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_failure_sweep_keeps_live_windows() {
        let t = throttle(2, 60);
        t.record_failure(SOURCE).await;
        t.record_failure(SOURCE).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        for n in 1..=SWEEP_THRESHOLD as u32 {
            t.record_failure(nth_source(n)).await;
        }
        assert_eq!(t.tracked_sources().await, SWEEP_THRESHOLD + 1);

        // SOURCE's failures are 70s old, the rest 40s.
        tokio::time::advance(Duration::from_secs(40)).await;
        t.record_failure(nth_source(5000)).await;

        assert_eq!(t.tracked_sources().await, SWEEP_THRESHOLD + 1);
        assert!(!t.is_locked(SOURCE).await);
        assert!(!t.is_locked(nth_source(1)).await);
        t.record_failure(nth_source(1)).await;
        assert!(t.is_locked(nth_source(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sources_are_independent() {
        let other = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        let t = throttle(1, 60);
        t.record_failure(SOURCE).await;

        assert!(t.is_locked(SOURCE).await);
        assert!(!t.is_locked(other).await);
    }
}
