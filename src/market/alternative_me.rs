//! alternative.me Fear & Greed index provider

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{MarketDataProvider, ProviderFields};
use crate::error::ApiError;

const FNG_URL: &str = "https://api.alternative.me/fng/?limit=1";

/// Neutral midpoint used when the index is unavailable.
const NEUTRAL_VALUE: u32 = 50;

#[derive(Debug, Deserialize)]
struct FngResponse {
    data: Vec<FngEntry>,
}

#[derive(Debug, Deserialize)]
struct FngEntry {
    value: String,
    value_classification: String,
}

/// Crypto Fear & Greed index (0 = extreme fear, 100 = extreme greed).
pub struct FearGreedProvider {
    client: reqwest::Client,
    url: String,
}

impl FearGreedProvider {
    pub fn new(client: reqwest::Client) -> Self {
        let url = std::env::var("ALTERNATIVE_ME_FNG_URL").unwrap_or_else(|_| FNG_URL.to_string());
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
impl MarketDataProvider for FearGreedProvider {
    fn name(&self) -> &'static str {
        "alternative_me"
    }

    async fn fetch(&self) -> Result<ProviderFields, ApiError> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::from(response.error_for_status().unwrap_err()));
        }
        let body: FngResponse = response.json().await?;
        let entry = body
            .data
            .first()
            .ok_or_else(|| ApiError::Parse("empty Fear & Greed response".to_string()))?;
        let value: u32 = entry
            .value
            .parse()
            .map_err(|_| ApiError::Parse(format!("non-numeric index value: {}", entry.value)))?;

        let mut fields = ProviderFields::new();
        fields.insert("fng_value".to_string(), serde_json::json!(value));
        fields.insert(
            "fng_classification".to_string(),
            Value::String(entry.value_classification.clone()),
        );
        Ok(fields)
    }

    fn fallback(&self) -> ProviderFields {
        let mut fields = ProviderFields::new();
        fields.insert("fng_value".to_string(), serde_json::json!(NEUTRAL_VALUE));
        fields.insert(
            "fng_classification".to_string(),
            Value::String("Neutral".to_string()),
        );
        fields
    }
}
