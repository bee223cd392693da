use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::llm::{extract_json_block, prompt, LanguageModel};
use crate::steps::{StepError, StepProcessor, VerifyInput, VerifyOutput};
use crate::workflow::types::{VerificationIssue, VerificationStatus};

pub struct LlmVerifier {
    llm: Arc<dyn LanguageModel>,
}

impl LlmVerifier {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    issues: Vec<RawIssue>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawIssue {
    Structured {
        #[serde(default)]
        claim: String,
        problem: String,
    },
    Text(String),
}

impl From<RawIssue> for VerificationIssue {
    fn from(raw: RawIssue) -> Self {
        match raw {
            RawIssue::Structured { claim, problem } => VerificationIssue::new(claim, problem),
            RawIssue::Text(problem) => VerificationIssue::new(String::new(), problem),
        }
    }
}

/// Interpret a verdict. Missing or unreadable status counts as a failure.
fn parse_verdict(response: &str) -> VerifyOutput {
    let parsed = extract_json_block(response)
        .and_then(|json| serde_json::from_str::<RawVerdict>(json).ok());

    let Some(verdict) = parsed else {
        return VerifyOutput {
            status: VerificationStatus::Failed,
            issues: vec![VerificationIssue::new(
                String::new(),
                "verification response could not be parsed",
            )],
        };
    };

    let issues: Vec<VerificationIssue> = verdict.issues.into_iter().map(Into::into).collect();
    let status = VerificationStatus::from_label(verdict.status.as_deref());

    VerifyOutput { status, issues }
}

#[async_trait]
impl StepProcessor for LlmVerifier {
    type Input = VerifyInput;
    type Output = VerifyOutput;

    fn name(&self) -> &str {
        "verify"
    }

    async fn process(&self, input: VerifyInput) -> Result<VerifyOutput, StepError> {
        let response = self
            .llm
            .complete(
                &prompt::verify_system_prompt(),
                &prompt::verify_prompt(&input.draft, &input.findings),
            )
            .await?;

        let output = parse_verdict(&response);
        tracing::debug!(
            status = %output.status,
            issues = output.issues.len(),
            "Verification verdict"
        );
        Ok(output)
    }
}
