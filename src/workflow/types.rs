use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};

pub const DEFAULT_TARGET_LENGTH: u32 = 1000;
pub const DEFAULT_STYLE: &str = "professional";

/// Correlation key shared by every log entry and the result record of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated generation request. Immutable once a run has started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRequest {
    requirements_text: String,
    topic: String,
    target_length: u32,
    style: String,
}

impl ArticleRequest {
    /// Validate and normalize a request. Failures here never reach the state machine.
    pub fn new(
        requirements_text: impl Into<String>,
        topic: impl Into<String>,
        target_length: Option<u32>,
        style: Option<String>,
    ) -> Result<Self> {
        let requirements_text = requirements_text.into().trim().to_string();
        let topic = topic.into().trim().to_string();

        if requirements_text.is_empty() {
            return Err(AppError::InvalidRequest(
                "requirements_text must not be empty".to_string(),
            ));
        }
        if topic.is_empty() {
            return Err(AppError::InvalidRequest("topic must not be empty".to_string()));
        }

        let target_length = target_length.unwrap_or(DEFAULT_TARGET_LENGTH);
        if target_length == 0 {
            return Err(AppError::InvalidRequest(
                "target_length must be greater than zero".to_string(),
            ));
        }

        let style = match style {
            Some(s) if s.trim().is_empty() => {
                return Err(AppError::InvalidRequest("style must not be blank".to_string()))
            }
            Some(s) => s.trim().to_string(),
            None => DEFAULT_STYLE.to_string(),
        };

        Ok(Self {
            requirements_text,
            topic,
            target_length,
            style,
        })
    }

    pub fn requirements_text(&self) -> &str {
        &self.requirements_text
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn target_length(&self) -> u32 {
        self.target_length
    }

    pub fn style(&self) -> &str {
        &self.style
    }

    /// One-line description used as the RESEARCH log input.
    pub fn summary(&self) -> String {
        format!(
            "topic={:?} target_length={} style={:?} requirements_chars={}",
            self.topic,
            self.target_length,
            self.style,
            self.requirements_text.chars().count()
        )
    }
}

/// A fact or source discovered by the research step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub claim: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Finding {
    pub fn new(claim: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
            source: None,
            title: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Pending,
    Passed,
    Failed,
}

impl VerificationStatus {
    /// Map a raw status label to a status. Anything that is not clearly a pass is a failure.
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(|l| l.trim().to_ascii_lowercase()) {
            Some(l) if l == "passed" || l == "pass" => VerificationStatus::Passed,
            _ => VerificationStatus::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Passed => "passed",
            VerificationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A problem flagged by the verify step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationIssue {
    #[serde(default)]
    pub claim: String,
    pub problem: String,
}

impl VerificationIssue {
    pub fn new(claim: impl Into<String>, problem: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
            problem: problem.into(),
        }
    }
}

/// Position in the orchestration state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Init,
    Research,
    Draft,
    Verify,
    Refine,
    Done,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "INIT",
            Phase::Research => "RESEARCH",
            Phase::Draft => "DRAFT",
            Phase::Verify => "VERIFY",
            Phase::Refine => "REFINE",
            Phase::Done => "DONE",
            Phase::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INIT" => Ok(Phase::Init),
            "RESEARCH" => Ok(Phase::Research),
            "DRAFT" => Ok(Phase::Draft),
            "VERIFY" => Ok(Phase::Verify),
            "REFINE" => Ok(Phase::Refine),
            "DONE" => Ok(Phase::Done),
            "FAILED" => Ok(Phase::Failed),
            other => Err(AppError::Internal(format!("Unknown phase: {other}"))),
        }
    }
}

/// The record threaded through one run.
///
/// Mutators are crate-private so only the orchestrator can move a run forward.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    run_id: RunId,
    request: ArticleRequest,
    research_findings: Option<Vec<Finding>>,
    draft: Option<String>,
    verification_issues: Vec<VerificationIssue>,
    verification_status: VerificationStatus,
    iteration_count: u32,
    final_artifact: Option<String>,
    phase: Phase,
}

impl WorkflowState {
    pub fn new(run_id: RunId, request: ArticleRequest) -> Self {
        Self {
            run_id,
            request,
            research_findings: None,
            draft: None,
            verification_issues: Vec::new(),
            verification_status: VerificationStatus::Pending,
            iteration_count: 0,
            final_artifact: None,
            phase: Phase::Init,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn request(&self) -> &ArticleRequest {
        &self.request
    }

    pub fn research_findings(&self) -> &[Finding] {
        self.research_findings.as_deref().unwrap_or(&[])
    }

    pub fn draft(&self) -> Option<&str> {
        self.draft.as_deref()
    }

    pub fn verification_issues(&self) -> &[VerificationIssue] {
        &self.verification_issues
    }

    pub fn verification_status(&self) -> VerificationStatus {
        self.verification_status
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    pub fn final_artifact(&self) -> Option<&str> {
        self.final_artifact.as_deref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    /// Findings are written exactly once, by RESEARCH.
    pub(crate) fn set_research_findings(&mut self, findings: Vec<Finding>) {
        debug_assert!(self.research_findings.is_none(), "research findings set twice");
        self.research_findings = Some(findings);
    }

    pub(crate) fn replace_draft(&mut self, draft: String) {
        self.draft = Some(draft);
    }

    pub(crate) fn record_verification(
        &mut self,
        status: VerificationStatus,
        issues: Vec<VerificationIssue>,
    ) {
        self.verification_status = status;
        self.verification_issues = issues;
    }

    pub(crate) fn increment_iteration(&mut self) {
        self.iteration_count += 1;
    }

    pub(crate) fn set_final_artifact(&mut self, artifact: String) {
        self.final_artifact = Some(artifact);
    }
}

/// Wall-clock cost of one step invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub phase: Phase,
    pub iteration: u32,
    pub duration_ms: u64,
}

/// Metadata returned alongside a finished article.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub iteration_count: u32,
    pub verification_status: VerificationStatus,
    /// Issues from the last VERIFY. Only non-empty when the run failed open.
    pub unresolved_issues: Vec<VerificationIssue>,
    pub fail_open: bool,
    pub finding_count: usize,
    pub word_count: usize,
    pub style: String,
    pub timings: Vec<PhaseTiming>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSuccess {
    pub run_id: RunId,
    pub final_artifact: String,
    pub metadata: RunMetadata,
}

/// Terminal failure of a run, reported with the phase it occurred in.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("run {run_id} failed during {failed_phase}: {cause}")]
pub struct RunFailure {
    pub run_id: RunId,
    pub failed_phase: Phase,
    pub cause: String,
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
