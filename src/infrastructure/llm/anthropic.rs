use async_trait::async_trait;
use rig::client::{CompletionClient, ProviderClient};
use rig::completion::Prompt;
use rig::providers::anthropic;

use crate::domain::{ports::LlmService, DomainError};
use crate::infrastructure::config::LlmConfig;

/// Anthropic models through rig. Reads `ANTHROPIC_API_KEY` from the
/// environment when constructed.
pub struct AnthropicLlm {
    client: anthropic::Client,
    model: String,
}

impl AnthropicLlm {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: anthropic::Client::from_env(),
            model: model.into(),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(&config.model)
    }
}

#[async_trait]
impl LlmService for AnthropicLlm {
    async fn complete_with_system(
        &self,
        system: &str,
        prompt: &str,
    ) -> Result<String, DomainError> {
        let agent = self.client.agent(&self.model).preamble(system).build();
        agent
            .prompt(prompt)
            .await
            .map_err(|e| DomainError::external(e.to_string()))
    }

    fn model(&self) -> &str {
        &self.model
    }
}
