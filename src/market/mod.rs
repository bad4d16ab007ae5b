//! Market data providers and the parallel snapshot aggregator
//!
//! Each provider fetches one slice of the live market picture (global
//! stats, BTC spot price, sentiment index). The aggregator fans out to all
//! of them under a shared deadline and merges the results into a single
//! `MarketSnapshot`, substituting each provider's documented fallback for
//! anything that errors or runs late.

pub mod aggregator;
pub mod alternative_me;
pub mod coingecko;

pub use aggregator::MarketAggregator;
pub use alternative_me::FearGreedProvider;
pub use coingecko::{BtcPriceProvider, GlobalMarketProvider};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::ApiError;

/// Flat field map contributed by one provider.
pub type ProviderFields = serde_json::Map<String, Value>;

/// One independent source of market data.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Stable name, also the rate-limiter key.
    fn name(&self) -> &'static str;

    async fn fetch(&self) -> Result<ProviderFields, ApiError>;

    /// Neutral fields substituted when this provider fails or times out.
    fn fallback(&self) -> ProviderFields;
}

/// Merged point-in-time market snapshot.
///
/// Fetched once per session during Prepare and reused by every later stage,
/// so all of them validate against the same market picture. Records which
/// providers contributed live data and which were defaulted.
#[derive(Debug, Clone, Serialize)]
pub struct MarketSnapshot {
    pub fields: ProviderFields,
    pub live_providers: Vec<String>,
    pub defaulted_providers: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn is_fully_live(&self) -> bool {
        self.defaulted_providers.is_empty() && !self.live_providers.is_empty()
    }

    /// Coarse origin label, mirrored into the field map for consumers that
    /// only see the JSON.
    pub fn source_label(&self) -> &'static str {
        if self.live_providers.is_empty() {
            "fallback"
        } else if self.defaulted_providers.is_empty() {
            "real_time"
        } else {
            "mixed"
        }
    }

    /// Pretty JSON for injection into a generation prompt.
    pub fn to_prompt_json(&self) -> String {
        let mut fields = self.fields.clone();
        fields.insert(
            "data_source".to_string(),
            Value::String(self.source_label().to_string()),
        );
        serde_json::to_string_pretty(&Value::Object(fields))
            .unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(live: &[&str], defaulted: &[&str]) -> MarketSnapshot {
        let mut fields = ProviderFields::new();
        fields.insert("btc_price_usd".into(), serde_json::json!(65000.0));
        MarketSnapshot {
            fields,
            live_providers: live.iter().map(|s| s.to_string()).collect(),
            defaulted_providers: defaulted.iter().map(|s| s.to_string()).collect(),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn source_label_reflects_provider_outcomes() {
        assert_eq!(snapshot(&["a", "b"], &[]).source_label(), "real_time");
        assert_eq!(snapshot(&["a"], &["b"]).source_label(), "mixed");
        assert_eq!(snapshot(&[], &["a", "b"]).source_label(), "fallback");
    }

    #[test]
    fn prompt_json_carries_data_source() {
        let json = snapshot(&["a"], &[]).to_prompt_json();
        assert!(json.contains("\"data_source\": \"real_time\""));
        assert!(json.contains("btc_price_usd"));
    }
}
