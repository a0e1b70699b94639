use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::error::{FetchError, FetchResult};

/// The two upstream endpoints the fetcher needs. Timeouts are applied by
/// the caller, so implementations only have to do the request itself.
#[async_trait]
pub trait HnApi: Send + Sync {
    /// Ranked ids from the top stories endpoint.
    async fn top_story_ids(&self) -> FetchResult<Vec<u64>>;

    /// A single item; `None` when upstream answers with JSON `null`.
    async fn item(&self, id: u64) -> FetchResult<Option<Value>>;
}

pub struct HackerNewsClient {
    client: Client,
    base_url: String,
}

impl HackerNewsClient {
    pub fn new(base_url: impl Into<String>) -> FetchResult<Self> {
        let client = Client::builder()
            // Backstop only; per-call deadlines are shorter
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("hn_cache_proxy/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, url: String) -> FetchResult<Value> {
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { status, url });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl HnApi for HackerNewsClient {
    async fn top_story_ids(&self) -> FetchResult<Vec<u64>> {
        let url = format!("{}/topstories.json", self.base_url);
        let value = self.get_json(url).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn item(&self, id: u64) -> FetchResult<Option<Value>> {
        let url = format!("{}/item/{}.json", self.base_url, id);
        match self.get_json(url).await? {
            Value::Null => Ok(None),
            value => Ok(Some(value)),
        }
    }
}
