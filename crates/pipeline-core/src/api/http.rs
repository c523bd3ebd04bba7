//! JSON-over-HTTP adapters for the market-data, analysis and decision
//! services.

use crate::providers::{AnalysisProvider, DecisionProvider, MarketDataProvider};
use crate::types::{Analysis, Decision, Opportunity, PriceHistory, PriceSnapshot};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration as StdDuration;
use tracing::{debug, warn};

/// Thin reqwest wrapper with retry on 429/5xx.
#[derive(Clone)]
pub struct JsonClient {
    name: &'static str,
    base_url: String,
    http_client: reqwest::Client,
}

impl JsonClient {
    /// Maximum retry attempts for API calls.
    const MAX_RETRIES: u32 = 3;

    pub fn new(name: &'static str, base_url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(timeout_secs))
            .connect_timeout(StdDuration::from_secs(10))
            .build()?;
        Ok(Self {
            name,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let response = self
            .send_with_retry(|| self.http_client.get(&url), &url)
            .await?;
        Ok(response.json().await?)
    }

    pub async fn post<B: Serialize + Sync, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.url(path);
        let response = self
            .send_with_retry(|| self.http_client.post(&url).json(body), &url)
            .await?;
        Ok(response.json().await?)
    }

    /// Execute a request with retry and exponential backoff.
    ///
    /// Retries on 5xx and 429 (with a longer backoff for 429). Other 4xx
    /// responses fail immediately.
    async fn send_with_retry<F>(&self, build: F, url: &str) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last_error = None;

        for attempt in 0..Self::MAX_RETRIES {
            match build().send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response)
                    if response.status().as_u16() == 429 || response.status().is_server_error() =>
                {
                    let status = response.status();
                    let is_rate_limited = status.as_u16() == 429;
                    warn!(
                        provider = self.name,
                        attempt = attempt + 1,
                        status = %status,
                        url = url,
                        "Retryable provider error, backing off"
                    );
                    last_error = Some(Error::provider(self.name, format!("status {}", status)));

                    if attempt + 1 < Self::MAX_RETRIES {
                        let backoff = if is_rate_limited {
                            StdDuration::from_millis(2000 * 2u64.pow(attempt))
                        } else {
                            StdDuration::from_millis(500 * 2u64.pow(attempt))
                        };
                        tokio::time::sleep(backoff).await;
                    }
                    continue;
                }
                Ok(response) => {
                    return Err(Error::provider(
                        self.name,
                        format!("status {}", response.status()),
                    ));
                }
                Err(e) => {
                    warn!(
                        provider = self.name,
                        attempt = attempt + 1,
                        error = %e,
                        url = url,
                        "Provider request failed, backing off"
                    );
                    last_error = Some(Error::Http(e));
                }
            }

            if attempt + 1 < Self::MAX_RETRIES {
                tokio::time::sleep(StdDuration::from_millis(500 * 2u64.pow(attempt))).await;
            }
        }

        Err(last_error.unwrap_or_else(|| Error::provider(self.name, "max retries exceeded")))
    }
}

/// Market-data service client.
pub struct HttpMarketData {
    client: JsonClient,
}

impl HttpMarketData {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: JsonClient::new("market-data", base_url, timeout_secs)?,
        })
    }
}

#[async_trait]
impl MarketDataProvider for HttpMarketData {
    async fn scan(&self) -> Result<Vec<Opportunity>> {
        let opportunities: Vec<Opportunity> = self.client.get("opportunities").await?;
        debug!(count = opportunities.len(), "Fetched scan opportunities");
        Ok(opportunities)
    }

    async fn current_price(&self, symbol: &str) -> Result<PriceSnapshot> {
        self.client.get(&format!("price/{}", symbol)).await
    }

    async fn history(&self, symbol: &str, lookback: usize) -> Result<PriceHistory> {
        self.client
            .get(&format!("history/{}?limit={}", symbol, lookback))
            .await
    }
}

/// Analysis service client. Response bodies are decoded leniently.
pub struct HttpAnalysisProvider {
    client: JsonClient,
}

impl HttpAnalysisProvider {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: JsonClient::new("analysis", base_url, timeout_secs)?,
        })
    }
}

#[async_trait]
impl AnalysisProvider for HttpAnalysisProvider {
    async fn analyze(&self, opportunity: &Opportunity) -> Result<Analysis> {
        let body: serde_json::Value = self.client.post("analyze", opportunity).await?;
        Ok(Analysis::from_value_lenient(&opportunity.symbol, body))
    }
}

#[derive(Serialize)]
struct DecideRequest<'a> {
    opportunity: &'a Opportunity,
    analysis: &'a Analysis,
}

/// Decision service client. Response bodies are decoded leniently.
pub struct HttpDecisionProvider {
    client: JsonClient,
}

impl HttpDecisionProvider {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: JsonClient::new("decision", base_url, timeout_secs)?,
        })
    }
}

#[async_trait]
impl DecisionProvider for HttpDecisionProvider {
    async fn decide(&self, opportunity: &Opportunity, analysis: &Analysis) -> Result<Decision> {
        let body: serde_json::Value = self
            .client
            .post(
                "decide",
                &DecideRequest {
                    opportunity,
                    analysis,
                },
            )
            .await?;
        let mut decision = Decision::from_value_lenient(&opportunity.symbol, body);
        decision.analysis_id = Some(analysis.id);
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let client = JsonClient::new("test", "http://localhost:8080/", 5).unwrap();
        assert_eq!(client.url("/price/BTCUSDT"), "http://localhost:8080/price/BTCUSDT");
        assert_eq!(client.url("analyze"), "http://localhost:8080/analyze");
    }
}
