pub mod serpapi;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use serpapi::SerpApiClient;

/// One organic web result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;
}
