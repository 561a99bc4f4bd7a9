use super::dispatch::{DispatchError, Dispatcher};
use crate::domain::types::{ChatMessage, FunctionCallRequest, FunctionDeclaration};
use crate::infrastructure::model::{
    CompletionProvider, CompletionReply, CompletionRequest, ModelError,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[cfg(test)]
mod tests;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("completion request timed out after {0:?}")]
    CompletionTimeout(Duration),
}

impl SessionError {
    /// True when the tool backend connection is gone; the session cannot
    /// continue and the caller should terminate it with a diagnostic.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Dispatch(err) if err.is_connection_loss())
    }

    pub fn user_message(&self) -> String {
        match self {
            SessionError::Model(err) => err.user_message(),
            SessionError::Dispatch(err) => err.to_string(),
            SessionError::CompletionTimeout(limit) => {
                format!("The completion request exceeded the {}s limit.", limit.as_secs())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    pub system_prompt: Option<String>,
    pub request_timeout: Duration,
}

impl SessionConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Result of one conversational turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The turn's final text, which may legitimately be empty: an empty model
    /// reply is displayed as `""` rather than dropped.
    Reply(String),
    /// The user issued an exit token; no completion was requested.
    Closed,
}

/// One interactive conversation. Owns the ordered, append-only message
/// history, the declaration snapshot derived from the registry at startup,
/// and the dispatcher onto the tool backend. Strictly turn-sequential: no
/// two completions or invocations are ever in flight at once.
pub struct Session {
    id: String,
    dispatcher: Dispatcher,
    provider: Arc<dyn CompletionProvider>,
    config: SessionConfig,
    declarations: Vec<FunctionDeclaration>,
    messages: Vec<ChatMessage>,
}

impl Session {
    pub fn new(
        dispatcher: Dispatcher,
        provider: Arc<dyn CompletionProvider>,
        config: SessionConfig,
    ) -> Self {
        let declarations = dispatcher.registry().to_function_declarations();
        let mut messages = Vec::new();
        if let Some(prompt) = &config.system_prompt {
            messages.push(ChatMessage::system(prompt.clone()));
        }
        let id = Uuid::new_v4().to_string();
        info!(
            session_id = id.as_str(),
            declarations = declarations.len(),
            "Session started"
        );
        Self {
            id,
            dispatcher,
            provider,
            config,
            declarations,
            messages,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn declarations(&self) -> &[FunctionDeclaration] {
        &self.declarations
    }

    /// Run one turn: user input through to the final assistant reply, with at
    /// most one tool round-trip. On any error the partial turn is rolled back
    /// so the history never ends with an unanswered user message.
    pub async fn run_turn(&mut self, input: &str) -> Result<TurnOutcome, SessionError> {
        if is_exit_token(input) {
            info!(session_id = self.id.as_str(), "Session closed by user");
            return Ok(TurnOutcome::Closed);
        }

        let checkpoint = self.messages.len();
        self.messages.push(ChatMessage::user(input));

        match self.drive_turn().await {
            Ok(reply) => Ok(TurnOutcome::Reply(reply)),
            Err(err) => {
                self.messages.truncate(checkpoint);
                Err(err)
            }
        }
    }

    async fn drive_turn(&mut self) -> Result<String, SessionError> {
        let reply = self.request_completion(true).await?;

        let final_text = if let Some(call) = reply.function_call {
            debug!(
                session_id = self.id.as_str(),
                tool = call.name.as_str(),
                "Model requested a tool call"
            );
            let arguments = parse_arguments(&call.arguments);
            self.messages
                .push(ChatMessage::assistant_function_call(call.clone()));

            let limit = self.config.request_timeout;
            let invocation = tokio::time::timeout(limit, self.dispatcher.invoke(&call.name, arguments));
            let result_text = match invocation.await {
                Ok(Ok(result)) => result.text,
                Ok(Err(err)) if err.is_connection_loss() => return Err(err.into()),
                // Recovered: the model gets a chance to react to the error
                // in natural language.
                Ok(Err(err)) => {
                    warn!(
                        session_id = self.id.as_str(),
                        tool = call.name.as_str(),
                        %err,
                        "Tool invocation failed; surfacing error text to the model"
                    );
                    err.to_string()
                }
                Err(_) => {
                    warn!(
                        session_id = self.id.as_str(),
                        tool = call.name.as_str(),
                        "Tool invocation timed out; surfacing error text to the model"
                    );
                    format!(
                        "failed to invoke tool '{}': timed out after {}s",
                        call.name,
                        limit.as_secs()
                    )
                }
            };
            self.messages
                .push(ChatMessage::tool_result(call.name, result_text));

            // Exactly one follow-up completion, with no declarations offered:
            // a second tool call in the same turn is not supported.
            let followup = self.request_completion(false).await?;
            followup.content.unwrap_or_default()
        } else {
            reply.content.unwrap_or_default()
        };

        let final_text = if final_text.trim().is_empty() {
            String::new()
        } else {
            final_text
        };
        self.messages.push(ChatMessage::assistant(final_text.clone()));
        Ok(final_text)
    }

    async fn request_completion(
        &self,
        offer_declarations: bool,
    ) -> Result<CompletionReply, SessionError> {
        let request = CompletionRequest {
            model: self.config.model.clone(),
            messages: self.messages.clone(),
            functions: if offer_declarations && !self.declarations.is_empty() {
                Some(self.declarations.clone())
            } else {
                None
            },
        };

        let limit = self.config.request_timeout;
        match tokio::time::timeout(limit, self.provider.complete(request)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SessionError::CompletionTimeout(limit)),
        }
    }
}

fn is_exit_token(input: &str) -> bool {
    let trimmed = input.trim();
    trimmed.eq_ignore_ascii_case("quit") || trimmed.eq_ignore_ascii_case("exit")
}

/// Parse model-issued argument text defensively: empty, malformed, or
/// non-object payloads become an empty argument set rather than aborting
/// the turn.
fn parse_arguments(raw: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            debug!(payload = %other, "Function-call arguments were not an object; using empty set");
            Map::new()
        }
        Err(err) => {
            if !raw.trim().is_empty() {
                warn!(%err, "Malformed function-call arguments; using empty set");
            }
            Map::new()
        }
    }
}
