use crate::domain::types::{ChatMessage, FunctionCallRequest, FunctionDeclaration};
use reqwest::StatusCode;
use thiserror::Error;

/// One completion request: the full ordered history plus, optionally, the
/// function declarations the model may call this round.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub functions: Option<Vec<FunctionDeclaration>>,
}

/// The model's decision for one completion: a direct reply, a function-call
/// request, or both fields absent (an empty reply, which is preserved).
#[derive(Debug, Clone, Default)]
pub struct CompletionReply {
    pub content: Option<String>,
    pub function_call: Option<FunctionCallRequest>,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("completion provider requires an API key")]
    MissingApiKey,
    #[error("network error calling completion provider: {source}")]
    Network {
        #[source]
        source: reqwest::Error,
    },
    #[error("completion provider returned invalid response: {reason}")]
    InvalidResponse { reason: String },
}

impl ModelError {
    pub fn network(source: reqwest::Error) -> Self {
        Self::Network { source }
    }

    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            ModelError::MissingApiKey => {
                "The completion provider requires an API key. Set OPENAI_API_KEY.".to_string()
            }
            ModelError::Network { source } => {
                if source.is_connect() {
                    "Could not connect to the completion provider.".to_string()
                } else if source.is_timeout() {
                    "The completion request timed out.".to_string()
                } else if let Some(status) = source.status() {
                    match status {
                        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                            "The completion provider rejected the API key.".to_string()
                        }
                        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
                            "The completion provider is currently unavailable.".to_string()
                        }
                        other => format!("Completion request failed: {}", other.as_u16()),
                    }
                } else {
                    "Network error while calling the completion provider.".to_string()
                }
            }
            ModelError::InvalidResponse { .. } => {
                "The completion provider returned an invalid response.".to_string()
            }
        }
    }
}
