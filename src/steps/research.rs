use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::llm::{extract_json_block, prompt, LanguageModel};
use crate::search::SearchProvider;
use crate::steps::{ResearchInput, StepError, StepProcessor};
use crate::workflow::types::Finding;

pub struct LlmResearcher {
    llm: Arc<dyn LanguageModel>,
    search: Option<Arc<dyn SearchProvider>>,
    max_results: usize,
}

impl LlmResearcher {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        search: Option<Arc<dyn SearchProvider>>,
        max_results: usize,
    ) -> Self {
        Self {
            llm,
            search,
            max_results,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawFinding {
    #[serde(default)]
    claim: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != "null")
}

fn parse_findings(response: &str) -> Result<Vec<Finding>, StepError> {
    let json = extract_json_block(response)
        .ok_or_else(|| StepError::Content("research response contained no JSON".to_string()))?;

    let raw: Vec<RawFinding> = serde_json::from_str(json)
        .map_err(|e| StepError::Content(format!("research response was not a findings array: {e}")))?;

    Ok(raw
        .into_iter()
        .filter_map(|r| {
            let claim = non_blank(r.claim)?;
            Some(Finding {
                claim,
                source: non_blank(r.source),
                title: non_blank(r.title),
            })
        })
        .collect())
}

#[async_trait]
impl StepProcessor for LlmResearcher {
    type Input = ResearchInput;
    type Output = Vec<Finding>;

    fn name(&self) -> &str {
        "research"
    }

    async fn process(&self, input: ResearchInput) -> Result<Vec<Finding>, StepError> {
        let hits = match &self.search {
            Some(search) => search.search(input.request.topic(), self.max_results).await?,
            None => Vec::new(),
        };

        tracing::debug!(hits = hits.len(), "Research search results");

        let response = self
            .llm
            .complete(
                &prompt::research_system_prompt(),
                &prompt::research_prompt(&input.request, &hits),
            )
            .await?;

        parse_findings(&response)
    }
}
