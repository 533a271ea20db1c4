use crate::domain::errors::DomainError;
use async_trait::async_trait;

/// Completion backend used by the chat service.
///
/// Implementations should map transport failures to
/// `DomainError::ExternalService` or `DomainError::Timeout` so they are
/// retried, and bad requests to `DomainError::Validation` so they are not.
#[async_trait]
pub trait LlmService: Send + Sync {
    async fn complete_with_system(&self, system: &str, prompt: &str)
        -> Result<String, DomainError>;

    fn model(&self) -> &str;
}
