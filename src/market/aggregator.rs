//! Parallel market data aggregation under a shared deadline

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::{MarketDataProvider, MarketSnapshot, ProviderFields};
use crate::ratelimit::LimiterRegistry;

/// Fans out one task per provider and merges the results.
///
/// Each call is gated by that provider's rate limiter and bounded by an
/// individual timeout; the whole batch is additionally bounded by a shared
/// deadline. A provider that errors, times out, is rate-limited, or is
/// still pending at the deadline contributes its documented fallback
/// fields instead; the aggregate snapshot is always returned.
pub struct MarketAggregator {
    providers: Vec<Arc<dyn MarketDataProvider>>,
    limiters: Arc<LimiterRegistry>,
    call_timeout: Duration,
    deadline: Duration,
}

impl MarketAggregator {
    pub fn new(
        providers: Vec<Arc<dyn MarketDataProvider>>,
        limiters: Arc<LimiterRegistry>,
        call_timeout: Duration,
        deadline: Duration,
    ) -> Self {
        Self {
            providers,
            limiters,
            call_timeout,
            deadline,
        }
    }

    /// Fetch all providers concurrently and merge into one snapshot.
    pub async fn snapshot(&self) -> MarketSnapshot {
        let mut tasks: JoinSet<(&'static str, Option<ProviderFields>)> = JoinSet::new();

        for provider in &self.providers {
            let provider = Arc::clone(provider);
            let limiter = self.limiters.get(provider.name());
            let call_timeout = self.call_timeout;

            tasks.spawn(async move {
                let name = provider.name();

                let (allowed, wait_secs) = limiter.can_proceed();
                if !allowed {
                    // Waiting here would eat the shared deadline for the
                    // whole batch; the field is defaulted instead.
                    warn!(
                        provider = name,
                        wait_secs, "provider rate-limited, using fallback data"
                    );
                    return (name, None);
                }

                let started = Instant::now();
                match tokio::time::timeout(call_timeout, provider.fetch()).await {
                    Ok(Ok(fields)) => {
                        limiter.record_success(started.elapsed());
                        debug!(
                            provider = name,
                            latency_ms = started.elapsed().as_millis() as u64,
                            "provider fetch succeeded"
                        );
                        (name, Some(fields))
                    }
                    Ok(Err(err)) => {
                        limiter.record_failure(err.status_hint());
                        warn!(provider = name, error = %err, "provider fetch failed");
                        (name, None)
                    }
                    Err(_) => {
                        limiter.record_failure(Some(408));
                        warn!(
                            provider = name,
                            timeout_ms = call_timeout.as_millis() as u64,
                            "provider fetch timed out"
                        );
                        (name, None)
                    }
                }
            });
        }

        let mut outcomes: HashMap<&'static str, Option<ProviderFields>> = HashMap::new();
        let deadline = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!(
                        deadline_ms = self.deadline.as_millis() as u64,
                        pending = tasks.len(),
                        "aggregation deadline reached, defaulting pending providers"
                    );
                    break;
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok((name, fields))) => {
                        outcomes.insert(name, fields);
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "provider task failed");
                    }
                    None => break,
                }
            }
        }
        tasks.abort_all();

        self.merge(outcomes)
    }

    fn merge(
        &self,
        mut outcomes: HashMap<&'static str, Option<ProviderFields>>,
    ) -> MarketSnapshot {
        let mut fields = ProviderFields::new();
        let mut live_providers = Vec::new();
        let mut defaulted_providers = Vec::new();

        for provider in &self.providers {
            let name = provider.name();
            match outcomes.remove(name).flatten() {
                Some(live) => {
                    fields.extend(live);
                    live_providers.push(name.to_string());
                }
                None => {
                    fields.extend(provider.fallback());
                    defaulted_providers.push(name.to_string());
                }
            }
        }

        MarketSnapshot {
            fields,
            live_providers,
            defaulted_providers,
            fetched_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::ratelimit::{RateLimitConfig, LimiterRegistry};
    use async_trait::async_trait;
    use serde_json::Value;

    struct StubProvider {
        name: &'static str,
        delay: Duration,
        result: Result<f64, ()>,
    }

    #[async_trait]
    impl MarketDataProvider for StubProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch(&self) -> Result<ProviderFields, ApiError> {
            tokio::time::sleep(self.delay).await;
            match self.result {
                Ok(value) => {
                    let mut fields = ProviderFields::new();
                    fields.insert(self.name.to_string(), serde_json::json!(value));
                    Ok(fields)
                }
                Err(()) => Err(ApiError::Connection("stub failure".to_string())),
            }
        }

        fn fallback(&self) -> ProviderFields {
            let mut fields = ProviderFields::new();
            fields.insert(self.name.to_string(), Value::Null);
            fields
        }
    }

    fn aggregator(providers: Vec<Arc<dyn MarketDataProvider>>) -> MarketAggregator {
        MarketAggregator::new(
            providers,
            Arc::new(LimiterRegistry::new()),
            Duration::from_millis(100),
            Duration::from_millis(250),
        )
    }

    #[tokio::test]
    async fn all_live_providers_merge() {
        let agg = aggregator(vec![
            Arc::new(StubProvider {
                name: "fast_a",
                delay: Duration::from_millis(5),
                result: Ok(1.0),
            }),
            Arc::new(StubProvider {
                name: "fast_b",
                delay: Duration::from_millis(5),
                result: Ok(2.0),
            }),
        ]);
        let snapshot = agg.snapshot().await;
        assert!(snapshot.is_fully_live());
        assert_eq!(snapshot.fields.get("fast_a"), Some(&serde_json::json!(1.0)));
        assert_eq!(snapshot.fields.get("fast_b"), Some(&serde_json::json!(2.0)));
    }

    #[tokio::test]
    async fn slow_provider_is_defaulted_within_deadline() {
        let agg = aggregator(vec![
            Arc::new(StubProvider {
                name: "fast",
                delay: Duration::from_millis(5),
                result: Ok(1.0),
            }),
            Arc::new(StubProvider {
                name: "hung",
                delay: Duration::from_secs(30),
                result: Ok(2.0),
            }),
        ]);
        let started = Instant::now();
        let snapshot = agg.snapshot().await;
        assert!(started.elapsed() < Duration::from_secs(1));

        assert_eq!(snapshot.live_providers, vec!["fast".to_string()]);
        assert_eq!(snapshot.defaulted_providers, vec!["hung".to_string()]);
        assert_eq!(snapshot.fields.get("fast"), Some(&serde_json::json!(1.0)));
        assert!(snapshot.fields.get("hung").unwrap().is_null());
        assert_eq!(snapshot.source_label(), "mixed");
    }

    #[tokio::test]
    async fn failing_provider_is_defaulted() {
        let agg = aggregator(vec![Arc::new(StubProvider {
            name: "broken",
            delay: Duration::from_millis(1),
            result: Err(()),
        })]);
        let snapshot = agg.snapshot().await;
        assert_eq!(snapshot.source_label(), "fallback");
        assert!(snapshot.fields.get("broken").unwrap().is_null());
    }

    #[tokio::test]
    async fn rate_limited_provider_is_defaulted_immediately() {
        let registry = Arc::new(LimiterRegistry::new());
        registry.insert(
            "limited",
            RateLimitConfig {
                failure_threshold: 1,
                circuit_timeout: Duration::from_secs(60),
                ..RateLimitConfig::default()
            },
        );
        registry.get("limited").record_failure(None); // trip the breaker

        let agg = MarketAggregator::new(
            vec![Arc::new(StubProvider {
                name: "limited",
                delay: Duration::from_millis(1),
                result: Ok(3.0),
            })],
            registry,
            Duration::from_millis(100),
            Duration::from_millis(250),
        );
        let snapshot = agg.snapshot().await;
        assert_eq!(snapshot.defaulted_providers, vec!["limited".to_string()]);
    }
}
