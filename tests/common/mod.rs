//! Scripted step processors and stores shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use scrivener::config::{AppConfig, PipelineConfig};
use scrivener::error::{AppError, Result};
use scrivener::steps::{
    DraftInput, RefineInput, ResearchInput, StepError, StepProcessor, StepSet, VerifyInput,
    VerifyOutput,
};
use scrivener::store::{MemoryStore, ResultStore, RunLogger, RunRecord, StepLogEntry};
use scrivener::workflow::{
    ArticleRequest, Finding, Orchestrator, RunId, VerificationIssue, VerificationStatus,
};

pub fn request() -> ArticleRequest {
    ArticleRequest::new(
        "Write an explainer about Rust ownership for backend engineers.",
        "Rust ownership",
        Some(800),
        Some("casual".to_string()),
    )
    .unwrap()
}

pub fn pipeline(max_iterations: u32) -> PipelineConfig {
    PipelineConfig {
        max_iterations,
        step_timeout_secs: 5,
    }
}

/// Minimal valid configuration with an in-memory store.
pub fn app_config() -> AppConfig {
    config::Config::builder()
        .add_source(config::File::from_str(
            r#"
[llm]
api_key = "sk-test"

[storage]
backend = "memory"

[server]
max_concurrent_runs = 2
shutdown_grace_secs = 1
"#,
            config::FileFormat::Toml,
        ))
        .build()
        .unwrap()
        .try_deserialize()
        .unwrap()
}

// --- Research ---

pub struct FixedResearch {
    findings: Vec<Finding>,
}

impl FixedResearch {
    pub fn new(findings: Vec<Finding>) -> Self {
        Self { findings }
    }

    pub fn default_findings() -> Self {
        Self::new(vec![
            Finding::new("Each value in Rust has a single owner")
                .with_source("https://doc.rust-lang.org/book/ch04-01-what-is-ownership.html"),
            Finding::new("Borrowing lets code use a value without taking ownership"),
        ])
    }
}

#[async_trait]
impl StepProcessor for FixedResearch {
    type Input = ResearchInput;
    type Output = Vec<Finding>;

    fn name(&self) -> &str {
        "fixed-research"
    }

    async fn process(&self, _input: ResearchInput) -> std::result::Result<Vec<Finding>, StepError> {
        Ok(self.findings.clone())
    }
}

// --- Draft ---

/// What the draft step was handed on one invocation.
#[derive(Debug, Clone)]
pub struct DraftCall {
    pub had_findings: bool,
    pub revision_notes: Vec<VerificationIssue>,
}

#[derive(Default)]
pub struct CountingDraft {
    calls: Mutex<Vec<DraftCall>>,
}

impl CountingDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<DraftCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StepProcessor for CountingDraft {
    type Input = DraftInput;
    type Output = String;

    fn name(&self) -> &str {
        "counting-draft"
    }

    async fn process(&self, input: DraftInput) -> std::result::Result<String, StepError> {
        let mut calls = self.calls.lock().unwrap();
        let n = calls.len();
        calls.push(DraftCall {
            had_findings: input.research.findings().is_some(),
            revision_notes: input.revision_notes,
        });
        Ok(format!("# {}\n\nDraft number {n}.", input.request.topic()))
    }
}

// --- Verify ---

/// Replays a fixed sequence of verdicts, then passes.
pub struct ScriptedVerify {
    verdicts: Mutex<VecDeque<VerificationStatus>>,
    drafts: Mutex<Vec<String>>,
}

impl ScriptedVerify {
    pub fn new(verdicts: Vec<VerificationStatus>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts.into()),
            drafts: Mutex::new(Vec::new()),
        }
    }

    pub fn always(status: VerificationStatus) -> Self {
        Self::new(vec![status; 64])
    }

    pub fn drafts(&self) -> Vec<String> {
        self.drafts.lock().unwrap().clone()
    }
}

#[async_trait]
impl StepProcessor for ScriptedVerify {
    type Input = VerifyInput;
    type Output = VerifyOutput;

    fn name(&self) -> &str {
        "scripted-verify"
    }

    async fn process(&self, input: VerifyInput) -> std::result::Result<VerifyOutput, StepError> {
        let attempt = {
            let mut drafts = self.drafts.lock().unwrap();
            drafts.push(input.draft);
            drafts.len() - 1
        };
        let status = self
            .verdicts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(VerificationStatus::Passed);

        let issues = match status {
            VerificationStatus::Passed => Vec::new(),
            _ => vec![VerificationIssue::new(
                "ownership is optional",
                format!("unsupported claim in attempt {attempt}"),
            )],
        };
        Ok(VerifyOutput { status, issues })
    }
}

// --- Refine ---

#[derive(Default)]
pub struct RecordingRefine {
    inputs: Mutex<Vec<RefineInput>>,
}

impl RecordingRefine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inputs(&self) -> Vec<RefineInput> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl StepProcessor for RecordingRefine {
    type Input = RefineInput;
    type Output = String;

    fn name(&self) -> &str {
        "recording-refine"
    }

    async fn process(&self, input: RefineInput) -> std::result::Result<String, StepError> {
        let polished = format!("{}\n\n(polished)", input.draft);
        self.inputs.lock().unwrap().push(input);
        Ok(polished)
    }
}

// --- Failure modes ---

/// Always fails with a transient error.
pub struct FailingStep<I, O> {
    message: String,
    _marker: std::marker::PhantomData<fn(I) -> O>,
}

impl<I, O> FailingStep<I, O> {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            _marker: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<I: Send + 'static, O: Send + 'static> StepProcessor for FailingStep<I, O> {
    type Input = I;
    type Output = O;

    fn name(&self) -> &str {
        "failing"
    }

    async fn process(&self, _input: I) -> std::result::Result<O, StepError> {
        Err(StepError::Transient(self.message.clone()))
    }
}

/// Never finishes within any reasonable step timeout.
pub struct StalledDraft;

#[async_trait]
impl StepProcessor for StalledDraft {
    type Input = DraftInput;
    type Output = String;

    fn name(&self) -> &str {
        "stalled-draft"
    }

    async fn process(&self, _input: DraftInput) -> std::result::Result<String, StepError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(String::new())
    }
}

/// Which store writes should fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreFaults {
    pub create: bool,
    pub complete: bool,
    pub append: bool,
}

/// Wraps a `MemoryStore`, failing the selected writes.
pub struct FaultyStore {
    inner: MemoryStore,
    faults: StoreFaults,
}

impl FaultyStore {
    pub fn new(faults: StoreFaults) -> Self {
        Self {
            inner: MemoryStore::new(),
            faults,
        }
    }
}

#[async_trait]
impl RunLogger for FaultyStore {
    async fn append(&self, entry: &StepLogEntry) -> Result<()> {
        if self.faults.append {
            return Err(AppError::Storage("log sink unavailable".to_string()));
        }
        self.inner.append(entry).await
    }

    async fn entries(&self, run_id: RunId) -> Result<Vec<StepLogEntry>> {
        self.inner.entries(run_id).await
    }
}

#[async_trait]
impl ResultStore for FaultyStore {
    async fn create(&self, run_id: RunId, request: &ArticleRequest) -> Result<()> {
        if self.faults.create {
            return Err(AppError::Storage("database is locked".to_string()));
        }
        self.inner.create(run_id, request).await
    }

    async fn complete(&self, run_id: RunId, final_artifact: &str) -> Result<()> {
        if self.faults.complete {
            return Err(AppError::Storage("disk full".to_string()));
        }
        self.inner.complete(run_id, final_artifact).await
    }

    async fn get(&self, run_id: RunId) -> Result<Option<RunRecord>> {
        self.inner.get(run_id).await
    }
}

// --- Harness ---

/// Scripted processors plus a memory store, kept around for inspection.
pub struct Harness {
    pub draft: Arc<CountingDraft>,
    pub verify: Arc<ScriptedVerify>,
    pub refine: Arc<RecordingRefine>,
    pub store: Arc<MemoryStore>,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub fn new(verdicts: Vec<VerificationStatus>, max_iterations: u32) -> Self {
        Self::with_research(FixedResearch::default_findings(), verdicts, max_iterations)
    }

    pub fn with_verify(verify: ScriptedVerify, max_iterations: u32) -> Self {
        Self::build(FixedResearch::default_findings(), verify, max_iterations)
    }

    pub fn with_research(
        research: FixedResearch,
        verdicts: Vec<VerificationStatus>,
        max_iterations: u32,
    ) -> Self {
        Self::build(research, ScriptedVerify::new(verdicts), max_iterations)
    }

    fn build(research: FixedResearch, verify: ScriptedVerify, max_iterations: u32) -> Self {
        let draft = Arc::new(CountingDraft::new());
        let verify = Arc::new(verify);
        let refine = Arc::new(RecordingRefine::new());
        let store = Arc::new(MemoryStore::new());

        let steps = StepSet {
            research: Arc::new(research),
            draft: draft.clone(),
            verify: verify.clone(),
            refine: refine.clone(),
        };
        let orchestrator = Orchestrator::new(
            steps,
            store.clone(),
            store.clone(),
            &pipeline(max_iterations),
        );

        Self {
            draft,
            verify,
            refine,
            store,
            orchestrator,
        }
    }

    pub async fn entries(&self, run_id: RunId) -> Vec<StepLogEntry> {
        self.store.entries(run_id).await.unwrap()
    }
}

/// A step set where every step succeeds and verification passes first time.
pub fn passing_steps() -> StepSet {
    StepSet {
        research: Arc::new(FixedResearch::default_findings()),
        draft: Arc::new(CountingDraft::new()),
        verify: Arc::new(ScriptedVerify::new(vec![])),
        refine: Arc::new(RecordingRefine::new()),
    }
}
