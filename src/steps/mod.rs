pub mod draft;
pub mod refine;
pub mod research;
pub mod verify;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::llm::LanguageModel;
use crate::search::SearchProvider;
use crate::workflow::types::{ArticleRequest, Finding, VerificationIssue, VerificationStatus};

/// The domain work behind one phase.
///
/// Implementations must not write to the run logger or result store; their
/// only effect visible to the orchestrator is the returned value.
#[async_trait]
pub trait StepProcessor: Send + Sync {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn name(&self) -> &str;

    async fn process(&self, input: Self::Input) -> Result<Self::Output, StepError>;
}

/// Why a step invocation failed. The orchestrator treats every variant alike.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("content failure: {0}")]
    Content(String),

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl From<AppError> for StepError {
    fn from(e: AppError) -> Self {
        match e {
            AppError::Serialization(_) => StepError::Content(e.to_string()),
            other => StepError::Transient(other.to_string()),
        }
    }
}

/// Research as seen by the draft step: findings, or an explicit marker that there are none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResearchContext {
    Findings(Vec<Finding>),
    NoFindings,
}

impl ResearchContext {
    pub fn from_findings(findings: &[Finding]) -> Self {
        if findings.is_empty() {
            ResearchContext::NoFindings
        } else {
            ResearchContext::Findings(findings.to_vec())
        }
    }

    pub fn findings(&self) -> Option<&[Finding]> {
        match self {
            ResearchContext::Findings(findings) => Some(findings),
            ResearchContext::NoFindings => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResearchInput {
    pub request: ArticleRequest,
}

#[derive(Debug, Clone)]
pub struct DraftInput {
    pub request: ArticleRequest,
    pub research: ResearchContext,
    /// Issues from the previous VERIFY; empty on the first draft.
    pub revision_notes: Vec<VerificationIssue>,
}

#[derive(Debug, Clone)]
pub struct VerifyInput {
    pub draft: String,
    pub findings: Vec<Finding>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutput {
    pub status: VerificationStatus,
    pub issues: Vec<VerificationIssue>,
}

#[derive(Debug, Clone)]
pub struct RefineInput {
    pub draft: String,
    pub style: String,
    pub target_length: u32,
}

pub type ResearchProcessor = dyn StepProcessor<Input = ResearchInput, Output = Vec<Finding>>;
pub type DraftProcessor = dyn StepProcessor<Input = DraftInput, Output = String>;
pub type VerifyProcessor = dyn StepProcessor<Input = VerifyInput, Output = VerifyOutput>;
pub type RefineProcessor = dyn StepProcessor<Input = RefineInput, Output = String>;

/// One processor per step kind.
#[derive(Clone)]
pub struct StepSet {
    pub research: Arc<ResearchProcessor>,
    pub draft: Arc<DraftProcessor>,
    pub verify: Arc<VerifyProcessor>,
    pub refine: Arc<RefineProcessor>,
}

impl StepSet {
    /// Language-model backed processors, with web search when a provider is given.
    pub fn llm_backed(
        llm: Arc<dyn LanguageModel>,
        search: Option<Arc<dyn SearchProvider>>,
        config: &AppConfig,
    ) -> Self {
        Self {
            research: Arc::new(research::LlmResearcher::new(
                Arc::clone(&llm),
                search,
                config.search.max_results,
            )),
            draft: Arc::new(draft::LlmDrafter::new(Arc::clone(&llm))),
            verify: Arc::new(verify::LlmVerifier::new(Arc::clone(&llm))),
            refine: Arc::new(refine::LlmRefiner::new(llm)),
        }
    }
}

/// Reject empty model output as a content failure.
pub(crate) fn require_text(step: &str, text: String) -> Result<String, StepError> {
    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(StepError::Content(format!("{step} returned empty output")));
    }
    Ok(text)
}
