use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::{prompt, LanguageModel};
use crate::steps::{require_text, RefineInput, StepError, StepProcessor};

pub struct LlmRefiner {
    llm: Arc<dyn LanguageModel>,
}

impl LlmRefiner {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl StepProcessor for LlmRefiner {
    type Input = RefineInput;
    type Output = String;

    fn name(&self) -> &str {
        "refine"
    }

    async fn process(&self, input: RefineInput) -> Result<String, StepError> {
        let response = self
            .llm
            .complete(
                &prompt::refine_system_prompt(),
                &prompt::refine_prompt(&input.draft, &input.style, input.target_length),
            )
            .await?;

        require_text(self.name(), response)
    }
}
