use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::config::PipelineConfig;
use crate::steps::{
    DraftInput, RefineInput, ResearchContext, ResearchInput, StepError, StepProcessor, StepSet,
    VerifyInput,
};
use crate::store::{summarize, ResultStore, RunLogger, StepLogEntry, SUMMARY_LIMIT};
use crate::workflow::types::{
    word_count, ArticleRequest, Phase, PhaseTiming, RunFailure, RunId, RunMetadata, RunSuccess,
    VerificationStatus, WorkflowState,
};

/// Where a run goes after a successful VERIFY invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyRoute {
    /// Verification passed.
    Refine,
    /// Verification failed with retry budget left; loop back to DRAFT.
    Retry,
    /// Verification failed on the last allowed attempt; refine that draft anyway.
    FailOpen,
}

/// Branch decision after VERIFY. Only `Passed` counts as a pass.
///
/// `iteration_count` is the attempt just verified, counting from 0. A run gets
/// `max_iterations` attempts (at least one), so a failure at attempt
/// `max_iterations - 1` is the last one.
pub fn route_after_verify(
    status: VerificationStatus,
    iteration_count: u32,
    max_iterations: u32,
) -> VerifyRoute {
    match status {
        VerificationStatus::Passed => VerifyRoute::Refine,
        VerificationStatus::Failed | VerificationStatus::Pending => {
            if iteration_count.saturating_add(1) < max_iterations {
                VerifyRoute::Retry
            } else {
                VerifyRoute::FailOpen
            }
        }
    }
}

/// Drives one run at a time through RESEARCH, DRAFT, VERIFY and REFINE.
///
/// Holds no per-run state; any number of runs may execute concurrently
/// against one orchestrator.
pub struct Orchestrator {
    steps: StepSet,
    logger: Arc<dyn RunLogger>,
    results: Arc<dyn ResultStore>,
    max_iterations: u32,
    step_timeout: Duration,
}

/// Per-run bookkeeping that lives alongside the workflow state.
struct RunContext {
    state: WorkflowState,
    next_sequence: u32,
    timings: Vec<PhaseTiming>,
    fail_open: bool,
    started_at: DateTime<Utc>,
}

/// A step invocation that ended the run.
struct Halt {
    cause: String,
}

impl From<StepError> for Halt {
    fn from(e: StepError) -> Self {
        Halt {
            cause: e.to_string(),
        }
    }
}

impl Orchestrator {
    pub fn new(
        steps: StepSet,
        logger: Arc<dyn RunLogger>,
        results: Arc<dyn ResultStore>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            steps,
            logger,
            results,
            max_iterations: config.max_iterations,
            step_timeout: config.step_timeout(),
        }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Execute a run under a freshly allocated run id.
    pub async fn run(&self, request: ArticleRequest) -> Result<RunSuccess, RunFailure> {
        self.run_with_id(RunId::new(), request).await
    }

    /// Execute a run under a caller-chosen run id.
    #[tracing::instrument(skip_all, fields(run_id = %run_id))]
    pub async fn run_with_id(
        &self,
        run_id: RunId,
        request: ArticleRequest,
    ) -> Result<RunSuccess, RunFailure> {
        let mut run = RunContext {
            state: WorkflowState::new(run_id, request),
            next_sequence: 0,
            timings: Vec::new(),
            fail_open: false,
            started_at: Utc::now(),
        };

        tracing::info!(topic = %run.state.request().topic(), "Run started");

        loop {
            let phase = run.state.phase();
            let next = match phase {
                Phase::Init => self.init(&mut run).await,
                Phase::Research => self.research(&mut run).await,
                Phase::Draft => self.draft(&mut run).await,
                Phase::Verify => self.verify(&mut run).await,
                Phase::Refine => self.refine(&mut run).await,
                Phase::Done => return self.finish(run).await,
                Phase::Failed => {
                    return Err(self.fail(&mut run, phase, "run entered FAILED without a cause"))
                }
            };

            match next {
                Ok(next) => {
                    tracing::info!(
                        from = %phase,
                        to = %next,
                        iteration = run.state.iteration_count(),
                        "Phase transition"
                    );
                    run.state.set_phase(next);
                }
                Err(halt) => return Err(self.fail(&mut run, phase, &halt.cause)),
            }
        }
    }

    async fn init(&self, run: &mut RunContext) -> Result<Phase, Halt> {
        self.results
            .create(run.state.run_id(), run.state.request())
            .await
            .map_err(|e| Halt {
                cause: format!("could not create run record: {e}"),
            })?;
        Ok(Phase::Research)
    }

    async fn research(&self, run: &mut RunContext) -> Result<Phase, Halt> {
        let input = ResearchInput {
            request: run.state.request().clone(),
        };
        let input_summary = run.state.request().summary();

        let (result, elapsed) = self.invoke(self.steps.research.as_ref(), input).await;
        let findings = match result {
            Ok(findings) => findings,
            Err(e) => {
                self.record_failure(run, Phase::Research, input_summary, &e, elapsed)
                    .await;
                return Err(e.into());
            }
        };

        let output_summary = findings
            .iter()
            .map(|f| f.claim.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        let metadata = json!({
            "outcome": "ok",
            "finding_count": findings.len(),
        });

        if findings.is_empty() {
            tracing::warn!("Research returned no findings; drafting without them");
        }

        run.state.set_research_findings(findings);
        self.record(run, Phase::Research, input_summary, output_summary, metadata, elapsed)
            .await;
        Ok(Phase::Draft)
    }

    async fn draft(&self, run: &mut RunContext) -> Result<Phase, Halt> {
        let iteration = run.state.iteration_count();
        // Issues from the previous VERIFY guide a retry; the first draft has none.
        let revision_notes = if iteration > 0 {
            run.state.verification_issues().to_vec()
        } else {
            Vec::new()
        };
        let input = DraftInput {
            request: run.state.request().clone(),
            research: ResearchContext::from_findings(run.state.research_findings()),
            revision_notes,
        };
        let input_summary = format!(
            "iteration={} findings={} revision_notes={}",
            iteration,
            run.state.research_findings().len(),
            input.revision_notes.len()
        );

        let (result, elapsed) = self.invoke(self.steps.draft.as_ref(), input).await;
        let draft = match result.and_then(|text| non_empty(text, "draft")) {
            Ok(draft) => draft,
            Err(e) => {
                self.record_failure(run, Phase::Draft, input_summary, &e, elapsed)
                    .await;
                return Err(e.into());
            }
        };

        let metadata = json!({
            "outcome": "ok",
            "iteration": iteration,
            "word_count": word_count(&draft),
        });
        let output_summary = draft.clone();

        run.state.replace_draft(draft);
        self.record(run, Phase::Draft, input_summary, output_summary, metadata, elapsed)
            .await;
        Ok(Phase::Verify)
    }

    async fn verify(&self, run: &mut RunContext) -> Result<Phase, Halt> {
        let iteration = run.state.iteration_count();
        let draft = match run.state.draft() {
            Some(draft) => draft.to_string(),
            None => {
                return Err(Halt {
                    cause: "no draft available to verify".to_string(),
                })
            }
        };
        let input_summary = format!(
            "iteration={} draft_words={} findings={}",
            iteration,
            word_count(&draft),
            run.state.research_findings().len()
        );
        let input = VerifyInput {
            draft,
            findings: run.state.research_findings().to_vec(),
        };

        let (result, elapsed) = self.invoke(self.steps.verify.as_ref(), input).await;
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                self.record_failure(run, Phase::Verify, input_summary, &e, elapsed)
                    .await;
                return Err(e.into());
            }
        };

        // Anything other than an explicit pass is a failure.
        let status = match output.status {
            VerificationStatus::Passed => VerificationStatus::Passed,
            _ => VerificationStatus::Failed,
        };
        let issues = output.issues;

        let metadata = json!({
            "outcome": "ok",
            "iteration": iteration,
            "status": status.as_str(),
            "issue_count": issues.len(),
            "issues": issues,
        });
        let output_summary = format!("status={} issues={}", status, issues.len());

        run.state.record_verification(status, issues);
        self.record(run, Phase::Verify, input_summary, output_summary, metadata, elapsed)
            .await;

        match route_after_verify(status, iteration, self.max_iterations) {
            VerifyRoute::Refine => Ok(Phase::Refine),
            VerifyRoute::Retry => {
                run.state.increment_iteration();
                Ok(Phase::Draft)
            }
            VerifyRoute::FailOpen => {
                // The counter ends at the budget, never above it.
                if iteration < self.max_iterations {
                    run.state.increment_iteration();
                }
                tracing::warn!(
                    iteration,
                    max_iterations = self.max_iterations,
                    unresolved = run.state.verification_issues().len(),
                    "Verification retry budget exhausted; refining last draft"
                );
                run.fail_open = true;
                Ok(Phase::Refine)
            }
        }
    }

    async fn refine(&self, run: &mut RunContext) -> Result<Phase, Halt> {
        let draft = match run.state.draft() {
            Some(draft) => draft.to_string(),
            None => {
                return Err(Halt {
                    cause: "no draft available to refine".to_string(),
                })
            }
        };
        let input_summary = format!("draft_words={} fail_open={}", word_count(&draft), run.fail_open);
        let input = RefineInput {
            draft,
            style: run.state.request().style().to_string(),
            target_length: run.state.request().target_length(),
        };

        let (result, elapsed) = self.invoke(self.steps.refine.as_ref(), input).await;
        let artifact = match result.and_then(|text| non_empty(text, "refine")) {
            Ok(artifact) => artifact,
            Err(e) => {
                self.record_failure(run, Phase::Refine, input_summary, &e, elapsed)
                    .await;
                return Err(e.into());
            }
        };

        let metadata = json!({
            "outcome": "ok",
            "iteration": run.state.iteration_count(),
            "word_count": word_count(&artifact),
            "fail_open": run.fail_open,
        });
        let output_summary = artifact.clone();

        run.state.set_final_artifact(artifact);
        self.record(run, Phase::Refine, input_summary, output_summary, metadata, elapsed)
            .await;
        Ok(Phase::Done)
    }

    async fn finish(&self, mut run: RunContext) -> Result<RunSuccess, RunFailure> {
        let run_id = run.state.run_id();
        let Some(artifact) = run.state.final_artifact().map(str::to_string) else {
            return Err(self.fail(&mut run, Phase::Done, "reached DONE without a final artifact"));
        };

        if let Err(e) = self.results.complete(run_id, &artifact).await {
            return Err(self.fail(
                &mut run,
                Phase::Done,
                &format!("could not persist final artifact: {e}"),
            ));
        }

        let metadata = RunMetadata {
            iteration_count: run.state.iteration_count(),
            verification_status: run.state.verification_status(),
            unresolved_issues: if run.fail_open {
                run.state.verification_issues().to_vec()
            } else {
                Vec::new()
            },
            fail_open: run.fail_open,
            finding_count: run.state.research_findings().len(),
            word_count: word_count(&artifact),
            style: run.state.request().style().to_string(),
            timings: run.timings,
            started_at: run.started_at,
            finished_at: Utc::now(),
        };

        tracing::info!(
            iterations = metadata.iteration_count,
            fail_open = metadata.fail_open,
            word_count = metadata.word_count,
            "Run completed"
        );

        Ok(RunSuccess {
            run_id,
            final_artifact: artifact,
            metadata,
        })
    }

    fn fail(&self, run: &mut RunContext, failed_phase: Phase, cause: &str) -> RunFailure {
        run.state.set_phase(Phase::Failed);
        tracing::error!(failed_phase = %failed_phase, cause = %cause, "Run failed");
        RunFailure {
            run_id: run.state.run_id(),
            failed_phase,
            cause: cause.to_string(),
        }
    }

    /// Call a step processor under the per-step timeout.
    async fn invoke<P>(&self, processor: &P, input: P::Input) -> (Result<P::Output, StepError>, Duration)
    where
        P: StepProcessor + ?Sized,
    {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.step_timeout, processor.process(input)).await {
            Ok(result) => result,
            Err(_) => Err(StepError::Timeout(self.step_timeout)),
        };
        let elapsed = started.elapsed();
        tracing::debug!(
            step = processor.name(),
            elapsed_ms = elapsed.as_millis() as u64,
            ok = result.is_ok(),
            "Step invocation finished"
        );
        (result, elapsed)
    }

    async fn record_failure(
        &self,
        run: &mut RunContext,
        phase: Phase,
        input_summary: String,
        error: &StepError,
        elapsed: Duration,
    ) {
        let metadata = json!({
            "outcome": "error",
            "iteration": run.state.iteration_count(),
            "error": error.to_string(),
        });
        self.record(run, phase, input_summary, error.to_string(), metadata, elapsed)
            .await;
    }

    /// Append one log entry. The write is awaited so it is durable before the
    /// next step runs, but its failure never changes the run's outcome.
    async fn record(
        &self,
        run: &mut RunContext,
        phase: Phase,
        input_summary: String,
        output_summary: String,
        mut metadata: serde_json::Value,
        elapsed: Duration,
    ) {
        let duration_ms = elapsed.as_millis() as u64;
        let iteration = run.state.iteration_count();
        if let Some(map) = metadata.as_object_mut() {
            map.insert("duration_ms".to_string(), json!(duration_ms));
        }

        let entry = StepLogEntry {
            run_id: run.state.run_id(),
            sequence: run.next_sequence,
            phase,
            iteration,
            input_summary: summarize(&input_summary, SUMMARY_LIMIT),
            output_summary: summarize(&output_summary, SUMMARY_LIMIT),
            metadata,
            timestamp: Utc::now(),
        };
        run.next_sequence += 1;
        run.timings.push(PhaseTiming {
            phase,
            iteration,
            duration_ms,
        });

        if let Err(e) = self.logger.append(&entry).await {
            tracing::error!(
                phase = %phase,
                sequence = entry.sequence,
                error = %e,
                "Failed to append run log entry"
            );
        }
    }
}

fn non_empty(text: String, step: &str) -> Result<String, StepError> {
    if text.trim().is_empty() {
        Err(StepError::Content(format!("{step} produced empty text")))
    } else {
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_always_refines() {
        assert_eq!(
            route_after_verify(VerificationStatus::Passed, 0, 3),
            VerifyRoute::Refine
        );
        assert_eq!(
            route_after_verify(VerificationStatus::Passed, 3, 3),
            VerifyRoute::Refine
        );
    }

    #[test]
    fn test_failure_retries_until_budget() {
        assert_eq!(route_after_verify(VerificationStatus::Failed, 0, 3), VerifyRoute::Retry);
        assert_eq!(route_after_verify(VerificationStatus::Failed, 1, 3), VerifyRoute::Retry);
        // Third attempt of three: no fourth DRAFT.
        assert_eq!(
            route_after_verify(VerificationStatus::Failed, 2, 3),
            VerifyRoute::FailOpen
        );
    }

    #[test]
    fn test_pending_is_treated_as_failure() {
        assert_eq!(route_after_verify(VerificationStatus::Pending, 0, 3), VerifyRoute::Retry);
        assert_eq!(
            route_after_verify(VerificationStatus::Pending, 2, 3),
            VerifyRoute::FailOpen
        );
    }

    #[test]
    fn test_zero_budget_never_retries() {
        assert_eq!(
            route_after_verify(VerificationStatus::Failed, 0, 0),
            VerifyRoute::FailOpen
        );
        assert_eq!(
            route_after_verify(VerificationStatus::Failed, 0, 1),
            VerifyRoute::FailOpen
        );
    }

    #[test]
    fn test_saturated_counter_does_not_overflow() {
        assert_eq!(
            route_after_verify(VerificationStatus::Failed, u32::MAX, u32::MAX),
            VerifyRoute::FailOpen
        );
    }

    #[test]
    fn test_non_empty() {
        assert!(non_empty("text".into(), "draft").is_ok());
        assert!(matches!(non_empty(" \n".into(), "draft"), Err(StepError::Content(_))));
    }
}
