//! CoinGecko market data providers
//!
//! Two independent providers against the public CoinGecko v3 API: global
//! market statistics (total cap and 24h volume) and the BTC spot price with
//! its 24h change. Endpoints are overridable through environment variables
//! for testing against stubs.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{MarketDataProvider, ProviderFields};
use crate::error::ApiError;

const GLOBAL_URL: &str = "https://api.coingecko.com/api/v3/global";
const BTC_PRICE_URL: &str =
    "https://api.coingecko.com/api/v3/simple/price?ids=bitcoin&vs_currencies=usd&include_24hr_change=true";

#[derive(Debug, Deserialize)]
struct GlobalResponse {
    data: GlobalData,
}

#[derive(Debug, Deserialize)]
struct GlobalData {
    #[serde(default)]
    total_market_cap: std::collections::HashMap<String, f64>,
    #[serde(default)]
    total_volume: std::collections::HashMap<String, f64>,
}

/// Total market cap and 24h volume, in USD.
pub struct GlobalMarketProvider {
    client: reqwest::Client,
    url: String,
}

impl GlobalMarketProvider {
    pub fn new(client: reqwest::Client) -> Self {
        let url = std::env::var("COINGECKO_GLOBAL_URL").unwrap_or_else(|_| GLOBAL_URL.to_string());
        Self { client, url }
    }

    pub fn with_url(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl MarketDataProvider for GlobalMarketProvider {
    fn name(&self) -> &'static str {
        "coingecko"
    }

    async fn fetch(&self) -> Result<ProviderFields, ApiError> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::from(response.error_for_status().unwrap_err()));
        }
        let body: GlobalResponse = response.json().await?;

        let mut fields = ProviderFields::new();
        fields.insert(
            "market_cap".to_string(),
            body.data
                .total_market_cap
                .get("usd")
                .map_or(Value::Null, |v| serde_json::json!(v)),
        );
        fields.insert(
            "volume_24h".to_string(),
            body.data
                .total_volume
                .get("usd")
                .map_or(Value::Null, |v| serde_json::json!(v)),
        );
        Ok(fields)
    }

    fn fallback(&self) -> ProviderFields {
        let mut fields = ProviderFields::new();
        fields.insert("market_cap".to_string(), Value::Null);
        fields.insert("volume_24h".to_string(), Value::Null);
        fields
    }
}

#[derive(Debug, Deserialize)]
struct SimplePriceResponse {
    bitcoin: BtcEntry,
}

#[derive(Debug, Deserialize)]
struct BtcEntry {
    usd: Option<f64>,
    #[serde(rename = "usd_24h_change")]
    usd_24h_change: Option<f64>,
}

/// BTC spot price and 24h change, in USD.
pub struct BtcPriceProvider {
    client: reqwest::Client,
    url: String,
}

impl BtcPriceProvider {
    pub fn new(client: reqwest::Client) -> Self {
        let url =
            std::env::var("COINGECKO_BTC_PRICE_URL").unwrap_or_else(|_| BTC_PRICE_URL.to_string());
        Self { client, url }
    }

    pub fn with_url(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl MarketDataProvider for BtcPriceProvider {
    fn name(&self) -> &'static str {
        "coingecko_btc"
    }

    async fn fetch(&self) -> Result<ProviderFields, ApiError> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::from(response.error_for_status().unwrap_err()));
        }
        let body: SimplePriceResponse = response.json().await?;

        let mut fields = ProviderFields::new();
        fields.insert(
            "btc_price_usd".to_string(),
            body.bitcoin.usd.map_or(Value::Null, |v| serde_json::json!(v)),
        );
        fields.insert(
            "btc_change_24h".to_string(),
            body.bitcoin
                .usd_24h_change
                .map_or(Value::Null, |v| serde_json::json!(v)),
        );
        Ok(fields)
    }

    fn fallback(&self) -> ProviderFields {
        let mut fields = ProviderFields::new();
        fields.insert("btc_price_usd".to_string(), Value::Null);
        fields.insert("btc_change_24h".to_string(), Value::Null);
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_response_deserializes() {
        let json = r#"{
            "data": {
                "total_market_cap": {"usd": 2500000000000.0, "eur": 2300000000000.0},
                "total_volume": {"usd": 98000000000.0}
            }
        }"#;
        let body: GlobalResponse = serde_json::from_str(json).unwrap();
        assert_eq!(body.data.total_market_cap.get("usd"), Some(&2.5e12));
        assert_eq!(body.data.total_volume.get("usd"), Some(&9.8e10));
    }

    #[test]
    fn simple_price_response_deserializes() {
        let json = r#"{"bitcoin": {"usd": 65123.5, "usd_24h_change": -1.42}}"#;
        let body: SimplePriceResponse = serde_json::from_str(json).unwrap();
        assert_eq!(body.bitcoin.usd, Some(65123.5));
        assert_eq!(body.bitcoin.usd_24h_change, Some(-1.42));
    }

    #[test]
    fn fallbacks_are_null_fields() {
        let provider = GlobalMarketProvider::with_url(reqwest::Client::new(), "http://unused");
        let fields = provider.fallback();
        assert!(fields.get("market_cap").unwrap().is_null());
        assert!(fields.get("volume_24h").unwrap().is_null());
    }
}
