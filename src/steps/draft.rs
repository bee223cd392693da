use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::{prompt, LanguageModel};
use crate::steps::{require_text, DraftInput, StepError, StepProcessor};

pub struct LlmDrafter {
    llm: Arc<dyn LanguageModel>,
}

impl LlmDrafter {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl StepProcessor for LlmDrafter {
    type Input = DraftInput;
    type Output = String;

    fn name(&self) -> &str {
        "draft"
    }

    async fn process(&self, input: DraftInput) -> Result<String, StepError> {
        let user_prompt = prompt::draft_prompt(
            &input.request,
            input.research.findings(),
            &input.revision_notes,
        );

        let response = self
            .llm
            .complete(&prompt::draft_system_prompt(), &user_prompt)
            .await?;

        tracing::debug!(chars = response.len(), "Draft generated");
        require_text(self.name(), response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use crate::steps::ResearchContext;
    use crate::workflow::types::ArticleRequest;

    fn input(research: ResearchContext) -> DraftInput {
        DraftInput {
            request: ArticleRequest::new("Explain X", "X", Some(500), None).unwrap(),
            research,
            revision_notes: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_draft_without_findings_uses_marker() {
        let model = Arc::new(ScriptedModel::replying("# X\n\nX is a thing."));
        let drafter = LlmDrafter::new(model.clone());

        let draft = drafter.process(input(ResearchContext::NoFindings)).await.unwrap();
        assert_eq!(draft, "# X\n\nX is a thing.");
        assert!(model.prompts()[0].contains(prompt::NO_FINDINGS_MARKER));
    }

    #[tokio::test]
    async fn test_empty_draft_is_content_failure() {
        let drafter = LlmDrafter::new(Arc::new(ScriptedModel::replying("  \n ")));
        assert!(matches!(
            drafter.process(input(ResearchContext::NoFindings)).await,
            Err(StepError::Content(_))
        ));
    }
}
