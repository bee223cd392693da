use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::StepLogEntry;
use crate::workflow::{ArticleRequest, Phase, RunFailure, RunId, RunMetadata, RunSuccess};

/// Body of `POST /generate`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    pub requirements_text: String,
    pub topic: String,
    #[serde(default)]
    pub target_length: Option<u32>,
    #[serde(default)]
    pub style: Option<String>,
}

impl GenerateRequest {
    pub fn into_article_request(self) -> Result<ArticleRequest> {
        ArticleRequest::new(
            self.requirements_text,
            self.topic,
            self.target_length,
            self.style,
        )
    }
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub run_id: RunId,
    pub content: String,
    pub status: &'static str,
    pub metadata: RunMetadata,
}

impl From<RunSuccess> for GenerateResponse {
    fn from(success: RunSuccess) -> Self {
        Self {
            run_id: success.run_id,
            content: success.final_artifact,
            status: "success",
            metadata: success.metadata,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<Phase>,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            status: "error",
            run_id: None,
            failed_phase: None,
            error: error.into(),
        }
    }
}

impl From<RunFailure> for ErrorResponse {
    fn from(failure: RunFailure) -> Self {
        Self {
            status: "error",
            run_id: Some(failure.run_id),
            failed_phase: Some(failure.failed_phase),
            error: failure.cause,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunLogsResponse {
    pub run_id: RunId,
    pub entries: Vec<StepLogEntry>,
    pub valid_trail: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trail_error: Option<String>,
}
