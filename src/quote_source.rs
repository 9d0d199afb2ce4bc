use crate::error::AggregatorError;
use crate::models::{Quote, RebalancerId};
use alloy_primitives::U256;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error};

/// A rebalancer's data provider.
///
/// `fetch` never fails: any problem reaching or reading the provider yields an
/// invalid quote, which the selector excludes from comparison.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    fn rebalancer_id(&self) -> RebalancerId;

    async fn fetch(&self) -> Quote;
}

/// Reads a numeric field from the first row of a JSON array endpoint.
pub struct HttpQuoteSource {
    client: Client,
    rebalancer_id: RebalancerId,
    endpoint: String,
    field: String,
    timeout: Duration,
}

impl HttpQuoteSource {
    pub fn new(
        rebalancer_id: RebalancerId,
        endpoint: impl Into<String>,
        field: impl Into<String>,
        timeout: Duration,
    ) -> crate::error::Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            AggregatorError::ConfigurationError(format!("Failed to build HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            rebalancer_id,
            endpoint: endpoint.into(),
            field: field.into(),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request(&self) -> Result<U256, String> {
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|e| format!("request error: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| format!("malformed payload: {}", e))?;

        parse_quote_payload(&body, &self.field)
    }

    fn fetch_failed(&self, reason: String) -> AggregatorError {
        AggregatorError::QuoteFetchFailed {
            rebalancer: self.rebalancer_id.to_string(),
            reason: format!("{} ({})", reason, self.endpoint),
        }
    }
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    fn rebalancer_id(&self) -> RebalancerId {
        self.rebalancer_id
    }

    async fn fetch(&self) -> Quote {
        let outcome = match tokio::time::timeout(self.timeout, self.request()).await {
            Ok(result) => result,
            Err(_) => Err(format!("timed out after {:?}", self.timeout)),
        };

        match outcome {
            Ok(value) => {
                debug!("Quote from {}: {}", self.rebalancer_id, value);
                Quote::valid(self.rebalancer_id, value)
            }
            Err(reason) => {
                error!("{}", self.fetch_failed(reason));
                Quote::invalid(self.rebalancer_id)
            }
        }
    }
}

/// Fixed quote, for local simulation runs.
pub struct StaticQuoteSource {
    rebalancer_id: RebalancerId,
    value: Option<U256>,
}

impl StaticQuoteSource {
    pub fn new(rebalancer_id: RebalancerId, value: U256) -> Self {
        Self {
            rebalancer_id,
            value: Some(value),
        }
    }

    pub fn unavailable(rebalancer_id: RebalancerId) -> Self {
        Self {
            rebalancer_id,
            value: None,
        }
    }
}

#[async_trait]
impl QuoteSource for StaticQuoteSource {
    fn rebalancer_id(&self) -> RebalancerId {
        self.rebalancer_id
    }

    async fn fetch(&self) -> Quote {
        match self.value {
            Some(value) => Quote::valid(self.rebalancer_id, value),
            None => Quote::invalid(self.rebalancer_id),
        }
    }
}

/// Extract `field` from the first element of a JSON array payload.
///
/// The value may be a JSON integer or a decimal (or `0x` hex) string and must
/// fit in 256 bits. Fractions, exponents and negatives are rejected.
pub fn parse_quote_payload(body: &Value, field: &str) -> Result<U256, String> {
    let first = body
        .as_array()
        .ok_or_else(|| "payload is not a JSON array".to_string())?
        .first()
        .ok_or_else(|| "payload array is empty".to_string())?;

    let raw = match first.get(field) {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => return Err(format!("field {} is not numeric: {}", field, other)),
        None => return Err(format!("field {} missing", field)),
    };

    parse_unsigned(&raw).ok_or_else(|| format!("field {} is not an unsigned integer: {}", field, raw))
}

fn parse_unsigned(raw: &str) -> Option<U256> {
    if let Some(hex) = raw.strip_prefix("0x") {
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        return U256::from_str_radix(hex, 16).ok();
    }

    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    U256::from_str_radix(raw, 10).ok()
}
