//! Sliding-window rate limiter

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::config::SchedulerConfig;

/// Global admission control shared by all workers.
///
/// At most `max_requests` admissions fall within any trailing window.
/// Waiters queue on a fair mutex, so they are admitted in arrival order.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    /// Admission timestamps, oldest first
    admissions: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        debug!(max_requests, ?window, "RateLimiter::new: called");
        Self {
            max_requests: (max_requests as usize).max(1),
            window,
            admissions: Mutex::new(VecDeque::new()),
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.max_requests_per_window, config.rate_window())
    }

    fn prune(&self, admissions: &mut VecDeque<Instant>, now: Instant) {
        while admissions
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= self.window)
        {
            admissions.pop_front();
        }
    }

    /// How long until one more admission fits, or `None` if it fits now
    fn retry_after(&self, admissions: &VecDeque<Instant>, now: Instant) -> Option<Duration> {
        if admissions.len() < self.max_requests {
            return None;
        }
        let oldest = admissions.front()?;
        Some(self.window.saturating_sub(now.saturating_duration_since(*oldest)))
    }

    /// Block until one more admission fits in the window, then record it
    pub async fn admit(&self) {
        debug!("RateLimiter::admit: called");
        let mut admissions = self.admissions.lock().await;
        loop {
            let now = Instant::now();
            self.prune(&mut admissions, now);
            match self.retry_after(&admissions, now) {
                None => {
                    admissions.push_back(now);
                    debug!(in_window = admissions.len(), "RateLimiter::admit: admitted");
                    return;
                }
                Some(wait) => {
                    debug!(?wait, "RateLimiter::admit: window full, sleeping");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Admissions inside the current window
    pub async fn in_window(&self) -> usize {
        let mut admissions = self.admissions.lock().await;
        self.prune(&mut admissions, Instant::now());
        admissions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn max_in_any_window(times: &[Instant], window: Duration) -> usize {
        let mut best = 0;
        for (i, start) in times.iter().enumerate() {
            let count = times[i..].iter().take_while(|t| t.duration_since(*start) < window).count();
            best = best.max(count);
        }
        best
    }

    #[tokio::test(start_paused = true)]
    async fn test_admits_up_to_limit_immediately() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.admit().await;
        }
        assert_eq!(Instant::now(), start);
        assert_eq!(limiter.in_window().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fourth_admission_waits_for_oldest_to_expire() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();
        limiter.admit().await;
        tokio::time::advance(Duration::from_secs(10)).await;
        limiter.admit().await;
        limiter.admit().await;

        limiter.admit().await;
        assert_eq!(Instant::now().duration_since(start), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_all_admitted() {
        let limiter = Arc::new(RateLimiter::new(2, Duration::from_secs(60)));
        let mut handles = Vec::new();
        for _ in 0..6 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.admit().await;
                Instant::now()
            }));
        }
        let mut times = Vec::new();
        for handle in handles {
            times.push(handle.await.unwrap());
        }
        times.sort();
        assert_eq!(times.len(), 6);
        assert!(max_in_any_window(&times, Duration::from_secs(60)) <= 2);
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        let limiter = RateLimiter::new(0, Duration::from_secs(1));
        assert_eq!(limiter.max_requests, 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_no_window_exceeds_limit(
            max in 1u32..6,
            gaps in proptest::collection::vec(0u64..40, 1..30),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            let window = Duration::from_secs(60);
            let times = rt.block_on(async {
                let limiter = RateLimiter::new(max, window);
                let mut times = Vec::new();
                for gap in gaps {
                    tokio::time::advance(Duration::from_secs(gap)).await;
                    limiter.admit().await;
                    times.push(Instant::now());
                }
                times
            });
            prop_assert!(max_in_any_window(&times, window) <= max as usize);
        }
    }
}
