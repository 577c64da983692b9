//! Adaptive Rate Limiter: per-host backoff, 429/5xx handling (spec §4.5).

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::errors::WebFetchError;

const SUCCESSES_BEFORE_SPEEDUP: u32 = 10;
const SPEEDUP_FACTOR: f64 = 0.8;

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub baseline_delay: Duration,
    pub max_retries: u32,
    pub adaptive: bool,
}

#[derive(Debug)]
struct LimiterState {
    baseline_delay: Duration,
    current_delay: Duration,
    consecutive_successes: u32,
}

/// Shared, mutable rate-limiter state for one fetcher. State mutation is
/// serialized through an internal mutex so concurrent workers observe a
/// single consistent `currentDelay`.
pub struct AdaptiveRateLimiter {
    adaptive: bool,
    max_retries: u32,
    state: Mutex<LimiterState>,
}

impl AdaptiveRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            adaptive: config.adaptive,
            max_retries: config.max_retries,
            state: Mutex::new(LimiterState {
                baseline_delay: config.baseline_delay,
                current_delay: config.baseline_delay,
                consecutive_successes: 0,
            }),
        }
    }

    pub async fn current_delay(&self) -> Duration {
        self.state.lock().await.current_delay
    }

    /// Raises `baselineDelay` and `currentDelay` to at least `floor`,
    /// called once per origin when a robots `Crawl-delay` is discovered.
    pub async fn set_crawl_delay_floor(&self, floor: Duration) {
        let mut state = self.state.lock().await;
        state.baseline_delay = state.baseline_delay.max(floor);
        state.current_delay = state.current_delay.max(floor);
    }

    /// Sleeps `currentDelay`, then invokes `f`, applying the retry/backoff
    /// policy described in spec §4.5.
    pub async fn execute<F, Fut, T>(&self, mut f: F) -> Result<T, WebFetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, WebFetchError>>,
    {
        let mut attempt = 0u32;
        loop {
            // Only the first attempt waits out the limiter's baseline/current
            // delay; retries are paced solely by `server_error_backoff` below,
            // otherwise each retry gap would be baseline+backoff instead of
            // just backoff.
            if attempt == 0 {
                let delay = self.state.lock().await.current_delay;
                sleep(delay).await;
            }

            match f().await {
                Ok(value) => {
                    self.on_success().await;
                    return Ok(value);
                }
                Err(err) => match err.http_status() {
                    Some(429) => {
                        self.on_too_many_requests(err.retry_after_header()).await;
                        return Err(err);
                    }
                    Some(status) if (500..600).contains(&status) => {
                        self.on_server_error().await;
                        if attempt >= self.max_retries {
                            return Err(err);
                        }
                        attempt += 1;
                        let backoff = self.server_error_backoff(attempt).await;
                        warn!(status, attempt, ?backoff, "retrying after server error");
                        sleep(backoff).await;
                        continue;
                    }
                    _ => return Err(err),
                },
            }
        }
    }

    async fn on_success(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_successes += 1;
        if self.adaptive && state.consecutive_successes >= SUCCESSES_BEFORE_SPEEDUP {
            let baseline = state.baseline_delay;
            state.current_delay = scale(state.current_delay, SPEEDUP_FACTOR).max(baseline);
            state.consecutive_successes = 0;
            debug!(new_delay = ?state.current_delay, "rate limiter sped up after consecutive successes");
        }
    }

    async fn on_too_many_requests(&self, retry_after: Option<&str>) {
        let mut state = self.state.lock().await;
        state.consecutive_successes = 0;
        if self.adaptive {
            let doubled = state.current_delay * 2;
            state.current_delay = retry_after
                .and_then(parse_retry_after)
                .unwrap_or(doubled)
                .max(state.baseline_delay);
        }
    }

    async fn on_server_error(&self) {
        self.state.lock().await.consecutive_successes = 0;
    }

    async fn server_error_backoff(&self, attempt: u32) -> Duration {
        let baseline = self.state.lock().await.baseline_delay;
        baseline * 2u32.saturating_pow(attempt)
    }
}

fn scale(d: Duration, factor: f64) -> Duration {
    Duration::from_secs_f64(d.as_secs_f64() * factor)
}

/// Parses a `Retry-After` header value: a bare number is seconds; otherwise
/// attempt HTTP-date parsing; negative/past dates yield zero; unparseable
/// values return `None` so the caller falls back to doubling.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let trimmed = value.trim();
    if let Ok(secs) = trimmed.parse::<i64>() {
        return Some(Duration::from_secs(secs.max(0) as u64));
    }
    if let Ok(when) = httpdate::parse_http_date(trimmed) {
        let now = std::time::SystemTime::now();
        return Some(when.duration_since(now).unwrap_or(Duration::ZERO));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn cfg(baseline_ms: u64, max_retries: u32, adaptive: bool) -> RateLimiterConfig {
        RateLimiterConfig {
            baseline_delay: Duration::from_millis(baseline_ms),
            max_retries,
            adaptive,
        }
    }

    fn http_error(status: u16, retry_after: Option<&str>) -> WebFetchError {
        let mut headers = std::collections::HashMap::new();
        if let Some(ra) = retry_after {
            headers.insert("retry-after".to_string(), ra.to_string());
        }
        WebFetchError::HttpError {
            url: "https://example.com".into(),
            status,
            headers,
        }
    }

    #[test]
    fn retry_after_numeric_seconds() {
        assert_eq!(parse_retry_after("5"), Some(Duration::from_secs(5)));
    }

    #[test]
    fn retry_after_unparseable_returns_none() {
        assert_eq!(parse_retry_after("not-a-date"), None);
    }

    #[tokio::test]
    async fn current_delay_never_drops_below_baseline() {
        let limiter = AdaptiveRateLimiter::new(cfg(100, 3, true));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        let _ = limiter
            .execute(|| {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, WebFetchError>(())
                }
            })
            .await;
        assert!(limiter.current_delay().await >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn speeds_up_after_ten_consecutive_successes() {
        let limiter = AdaptiveRateLimiter::new(cfg(100, 3, true));
        for _ in 0..10 {
            limiter.execute(|| async { Ok::<_, WebFetchError>(()) }).await.unwrap();
        }
        let delay = limiter.current_delay().await;
        assert!(delay < Duration::from_millis(100) || delay == Duration::from_millis(100));
    }

    #[tokio::test]
    async fn too_many_requests_uses_retry_after_header() {
        let limiter = AdaptiveRateLimiter::new(cfg(100, 3, true));
        let result = limiter
            .execute(|| async { Err::<(), _>(http_error(429, Some("5"))) })
            .await;
        assert!(result.is_err());
        assert_eq!(limiter.current_delay().await, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn server_error_retries_up_to_max_then_fails() {
        let limiter = AdaptiveRateLimiter::new(cfg(10, 3, true));
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);
        let result = limiter
            .execute(|| {
                let attempts = Arc::clone(&attempts_clone);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(http_error(500, None))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn server_error_backoff_gaps_exclude_baseline_delay() {
        // Spec scenario: baselineDelay=100, maxRetries=3, HTTPError(500) four
        // times. Gaps between calls should be ~200/400/800ms, not
        // ~300/500/900ms (baseline + backoff).
        let limiter = AdaptiveRateLimiter::new(cfg(100, 3, true));
        let call_times = Arc::new(Mutex::new(Vec::<Duration>::new()));
        let started = Instant::now();
        let call_times_clone = Arc::clone(&call_times);
        let _ = limiter
            .execute(|| {
                let call_times = Arc::clone(&call_times_clone);
                async move {
                    call_times.lock().await.push(started.elapsed());
                    Err::<(), _>(http_error(500, None))
                }
            })
            .await;

        let times = call_times.lock().await.clone();
        assert_eq!(times.len(), 4);
        let gap1 = times[1] - times[0];
        let gap2 = times[2] - times[1];
        let gap3 = times[3] - times[2];
        assert!(gap1 < Duration::from_millis(300), "gap1 {gap1:?} should be ~200ms, not baseline+backoff");
        assert!(gap2 < Duration::from_millis(500), "gap2 {gap2:?} should be ~400ms, not baseline+backoff");
        assert!(gap3 < Duration::from_millis(900), "gap3 {gap3:?} should be ~800ms, not baseline+backoff");
    }

    #[tokio::test]
    async fn non_retryable_4xx_fails_immediately() {
        let limiter = AdaptiveRateLimiter::new(cfg(10, 3, true));
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);
        let _ = limiter
            .execute(|| {
                let attempts = Arc::clone(&attempts_clone);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(http_error(404, None))
                }
            })
            .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn crawl_delay_floor_raises_baseline_and_current() {
        let limiter = AdaptiveRateLimiter::new(cfg(10, 3, true));
        limiter.set_crawl_delay_floor(Duration::from_millis(500)).await;
        assert_eq!(limiter.current_delay().await, Duration::from_millis(500));
    }
}
