//! Adaptive per-provider rate limiting with circuit breaking
//!
//! One `AdaptiveRateLimiter` per external provider, shared across all
//! sessions for the lifetime of the process. Enforces minimum call spacing,
//! a trailing one-minute burst cap, and a CLOSED/OPEN/HALF_OPEN circuit
//! breaker; the spacing interval adapts to observed latencies and 429s.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ApiError;

/// Latency samples kept for adaptive interval scaling.
const LATENCY_WINDOW: usize = 10;

/// Successes between adaptive scaling passes.
const ADAPT_EVERY: u64 = 10;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Blocking all calls until the cooldown elapses.
    Open,
    /// Cooldown elapsed; exactly one trial call is allowed through.
    HalfOpen,
}

/// Per-provider rate limiting configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub burst_limit: usize,
    pub backoff_multiplier: f64,
    /// Ceiling for the adaptive interval, in seconds.
    pub max_backoff_secs: f64,
    pub failure_threshold: u32,
    /// How long the circuit stays OPEN before a trial call is allowed.
    pub circuit_timeout: Duration,
    pub adaptive_scaling: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst_limit: 10,
            backoff_multiplier: 1.5,
            max_backoff_secs: 300.0,
            failure_threshold: 5,
            circuit_timeout: Duration::from_secs(60),
            adaptive_scaling: true,
        }
    }
}

impl RateLimitConfig {
    fn min_interval_secs(&self) -> f64 {
        60.0 / f64::from(self.requests_per_minute.max(1))
    }
}

/// Point-in-time view of a limiter, for operators and tests.
#[derive(Debug, Clone, Serialize)]
pub struct LimiterStats {
    pub provider: String,
    pub circuit_state: CircuitState,
    pub current_interval_secs: f64,
    pub calls_last_minute: usize,
    pub failure_count: u32,
    pub success_count: u64,
    pub avg_latency_secs: Option<f64>,
}

struct LimiterInner {
    recent_calls: VecDeque<Instant>,
    last_call: Option<Instant>,
    current_interval_secs: f64,
    circuit: CircuitState,
    failure_count: u32,
    next_attempt_at: Option<Instant>,
    trial_in_flight: bool,
    success_count: u64,
    recent_latencies: VecDeque<f64>,
}

/// Adaptive rate limiter with circuit breaker for one external provider.
///
/// Shared across sessions; all mutation is serialized behind one mutex.
pub struct AdaptiveRateLimiter {
    provider: String,
    config: RateLimitConfig,
    inner: Mutex<LimiterInner>,
}

impl AdaptiveRateLimiter {
    pub fn new(provider: impl Into<String>, config: RateLimitConfig) -> Self {
        let provider = provider.into();
        let inner = LimiterInner {
            recent_calls: VecDeque::new(),
            last_call: None,
            current_interval_secs: config.min_interval_secs(),
            circuit: CircuitState::Closed,
            failure_count: 0,
            next_attempt_at: None,
            trial_in_flight: false,
            success_count: 0,
            recent_latencies: VecDeque::new(),
        };
        debug!(provider = %provider, "initialized rate limiter");
        Self {
            provider,
            config,
            inner: Mutex::new(inner),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Whether a call may proceed now.
    ///
    /// Returns `(false, wait_seconds)` when the caller must back off: the
    /// circuit is OPEN, the minimum interval has not elapsed, the trailing
    /// one-minute window is at the burst cap, or a HALF_OPEN trial is
    /// already in flight.
    pub fn can_proceed(&self) -> (bool, f64) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();

        match inner.circuit {
            CircuitState::Open => {
                if let Some(at) = inner.next_attempt_at {
                    if now < at {
                        return (false, (at - now).as_secs_f64());
                    }
                }
                inner.circuit = CircuitState::HalfOpen;
                inner.trial_in_flight = false;
                info!(provider = %self.provider, "circuit breaker OPEN -> HALF_OPEN");
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    // One probe at a time until its outcome is recorded.
                    return (false, inner.current_interval_secs);
                }
            }
            CircuitState::Closed => {}
        }

        if let Some(last) = inner.last_call {
            let since_last = (now - last).as_secs_f64();
            if since_last < inner.current_interval_secs {
                return (false, inner.current_interval_secs - since_last);
            }
        }

        while inner
            .recent_calls
            .front()
            .is_some_and(|&t| now.duration_since(t) >= Duration::from_secs(60))
        {
            inner.recent_calls.pop_front();
        }
        if inner.recent_calls.len() >= self.config.burst_limit {
            let oldest = *inner.recent_calls.front().unwrap();
            let wait = (oldest + Duration::from_secs(60)).saturating_duration_since(now);
            return (false, wait.as_secs_f64());
        }

        if inner.circuit == CircuitState::HalfOpen {
            inner.trial_in_flight = true;
        }
        inner.last_call = Some(now);
        inner.recent_calls.push_back(now);
        (true, 0.0)
    }

    /// Record a successful call and its latency.
    pub fn record_success(&self, latency: Duration) {
        let mut inner = self.inner.lock().unwrap();

        if inner.circuit == CircuitState::HalfOpen {
            inner.circuit = CircuitState::Closed;
            inner.failure_count = 0;
            inner.trial_in_flight = false;
            info!(provider = %self.provider, "circuit breaker HALF_OPEN -> CLOSED");
        }

        inner.success_count += 1;
        inner.recent_latencies.push_back(latency.as_secs_f64());
        if inner.recent_latencies.len() > LATENCY_WINDOW {
            inner.recent_latencies.pop_front();
        }

        if self.config.adaptive_scaling && inner.success_count % ADAPT_EVERY == 0 {
            self.adapt(&mut inner);
        }
    }

    /// Record a failed call; `status` carries the HTTP-style code when known.
    pub fn record_failure(&self, status: Option<u16>) {
        let mut inner = self.inner.lock().unwrap();
        inner.failure_count += 1;

        if status == Some(429) {
            inner.current_interval_secs = (inner.current_interval_secs
                * self.config.backoff_multiplier)
                .min(self.config.max_backoff_secs);
            warn!(
                provider = %self.provider,
                interval_secs = inner.current_interval_secs,
                "rate limit hit, increasing call interval"
            );
        }

        let tripped = inner.circuit == CircuitState::HalfOpen
            || (inner.failure_count >= self.config.failure_threshold
                && inner.circuit != CircuitState::Open);
        if tripped {
            inner.circuit = CircuitState::Open;
            inner.trial_in_flight = false;
            inner.next_attempt_at = Some(Instant::now() + self.config.circuit_timeout);
            warn!(
                provider = %self.provider,
                failures = inner.failure_count,
                "circuit breaker -> OPEN"
            );
        }
    }

    fn adapt(&self, inner: &mut LimiterInner) {
        if inner.recent_latencies.is_empty() {
            return;
        }
        let avg: f64 =
            inner.recent_latencies.iter().sum::<f64>() / inner.recent_latencies.len() as f64;

        if avg < 1.0 {
            inner.current_interval_secs =
                (inner.current_interval_secs * 0.9).max(self.config.min_interval_secs());
        } else if avg > 3.0 {
            inner.current_interval_secs =
                (inner.current_interval_secs * 1.2).min(self.config.max_backoff_secs);
        }
    }

    pub fn stats(&self) -> LimiterStats {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        while inner
            .recent_calls
            .front()
            .is_some_and(|&t| now.duration_since(t) >= Duration::from_secs(60))
        {
            inner.recent_calls.pop_front();
        }
        let avg = if inner.recent_latencies.is_empty() {
            None
        } else {
            Some(inner.recent_latencies.iter().sum::<f64>() / inner.recent_latencies.len() as f64)
        };
        LimiterStats {
            provider: self.provider.clone(),
            circuit_state: inner.circuit,
            current_interval_secs: inner.current_interval_secs,
            calls_last_minute: inner.recent_calls.len(),
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            avg_latency_secs: avg,
        }
    }

    #[cfg(test)]
    fn current_interval_secs(&self) -> f64 {
        self.inner.lock().unwrap().current_interval_secs
    }
}

/// Registry of limiters, one per provider, constructed once at startup.
pub struct LimiterRegistry {
    limiters: Mutex<HashMap<String, Arc<AdaptiveRateLimiter>>>,
}

impl LimiterRegistry {
    /// Registry preloaded with the providers this crate calls.
    ///
    /// Presets follow the upstream free-tier limits: CoinGecko is the most
    /// generous, alternative.me moderate, and the generation service very
    /// conservative (long calls, strict quota).
    pub fn with_defaults() -> Self {
        let registry = Self {
            limiters: Mutex::new(HashMap::new()),
        };
        registry.insert(
            "coingecko",
            RateLimitConfig {
                requests_per_minute: 50,
                burst_limit: 5,
                failure_threshold: 3,
                ..RateLimitConfig::default()
            },
        );
        registry.insert(
            "alternative_me",
            RateLimitConfig {
                requests_per_minute: 30,
                burst_limit: 3,
                failure_threshold: 3,
                ..RateLimitConfig::default()
            },
        );
        registry.insert(
            "generation",
            RateLimitConfig {
                requests_per_minute: 10,
                burst_limit: 3,
                backoff_multiplier: 2.0,
                failure_threshold: 3,
                ..RateLimitConfig::default()
            },
        );
        registry
    }

    /// Empty registry; unknown providers get default-config limiters.
    pub fn new() -> Self {
        Self {
            limiters: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, provider: &str, config: RateLimitConfig) {
        let limiter = Arc::new(AdaptiveRateLimiter::new(provider, config));
        self.limiters
            .lock()
            .unwrap()
            .insert(provider.to_string(), limiter);
    }

    /// Limiter for `provider`, creating a default-config one if absent.
    pub fn get(&self, provider: &str) -> Arc<AdaptiveRateLimiter> {
        let mut limiters = self.limiters.lock().unwrap();
        limiters
            .entry(provider.to_string())
            .or_insert_with(|| {
                Arc::new(AdaptiveRateLimiter::new(provider, RateLimitConfig::default()))
            })
            .clone()
    }

    pub fn all_stats(&self) -> Vec<LimiterStats> {
        let limiters = self.limiters.lock().unwrap();
        let mut stats: Vec<LimiterStats> = limiters.values().map(|l| l.stats()).collect();
        stats.sort_by(|a, b| a.provider.cmp(&b.provider));
        stats
    }
}

impl Default for LimiterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait until the limiter admits a call, sleeping in bounded steps.
///
/// Gives up with a rate-limit error once the accumulated wait would exceed
/// `max_wait`, so a tripped breaker surfaces as a retryable failure instead
/// of stalling the stage indefinitely.
pub async fn wait_until_allowed(
    limiter: &AdaptiveRateLimiter,
    max_wait: Duration,
) -> Result<(), ApiError> {
    let deadline = Instant::now() + max_wait;
    loop {
        let (allowed, wait_secs) = limiter.can_proceed();
        if allowed {
            return Ok(());
        }
        let wait = Duration::from_secs_f64(wait_secs.max(0.01));
        let now = Instant::now();
        if now + wait > deadline {
            return Err(ApiError::RateLimited(format!(
                "{} unavailable, retry in {:.1}s",
                limiter.provider(),
                wait_secs
            )));
        }
        tokio::time::sleep(wait.min(deadline - now)).await;
    }
}
