use super::types::{CompletionReply, CompletionRequest, ModelError};
use async_trait::async_trait;

/// Boundary to the language-model completion API.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionReply, ModelError>;
}
