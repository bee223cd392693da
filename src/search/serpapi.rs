use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::SearchConfig;
use crate::error::{AppError, Result};
use crate::search::{SearchHit, SearchProvider};

pub struct SerpApiClient {
    client: Client,
    api_url: String,
    api_key: String,
}

impl SerpApiClient {
    pub fn new(api_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Build a client when a search key is configured.
    pub fn from_config(config: &SearchConfig) -> Option<Self> {
        config
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .map(|key| Self::new(&config.api_url, key))
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic_results: Vec<OrganicResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

fn into_hits(response: SearchResponse, limit: usize) -> Result<Vec<SearchHit>> {
    if let Some(error) = response.error {
        // SerpAPI reports an empty result set as an error string
        if error.contains("hasn't returned any results") {
            return Ok(Vec::new());
        }
        return Err(AppError::SearchApi(error));
    }

    Ok(response
        .organic_results
        .into_iter()
        .filter(|r| !r.link.is_empty())
        .take(limit)
        .map(|r| SearchHit {
            title: r.title,
            url: r.link,
            snippet: r.snippet,
        })
        .collect())
}

#[async_trait]
impl SearchProvider for SerpApiClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let num = limit.to_string();
        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("engine", "google"),
                ("q", query),
                ("num", num.as_str()),
                ("api_key", self.api_key.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::SearchApi(format!("API returned {status}: {body}")));
        }

        let body = response.json::<SearchResponse>().await?;
        let hits = into_hits(body, limit)?;
        tracing::debug!(query = query, hits = hits.len(), "Web search complete");
        Ok(hits)
    }
}
