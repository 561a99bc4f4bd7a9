//! OpenAI-compatible completion client with function calling.

use super::traits::CompletionProvider;
use super::types::{CompletionReply, CompletionRequest, ModelError};
use crate::domain::types::{ChatMessage, FunctionCallRequest, FunctionDeclaration};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Clone)]
pub struct OpenAiClient {
    endpoint: String,
    api_key: Option<String>,
    http: Client,
}

impl OpenAiClient {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            http: Client::new(),
        }
    }

    fn build_url(&self) -> String {
        let base = self.endpoint.trim_end_matches('/');
        format!("{base}/v1/chat/completions")
    }

    fn require_api_key(&self) -> Result<&str, ModelError> {
        self.api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ModelError::MissingApiKey)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionReply, ModelError> {
        let api_key = self.require_api_key()?;
        let url = self.build_url();

        let payload = OpenAiRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(WireMessage::from).collect(),
            functions: request.functions.as_deref(),
            stream: false,
        };

        info!(
            model = request.model.as_str(),
            messages = request.messages.len(),
            functions = request.functions.as_ref().map(Vec::len).unwrap_or(0),
            "Sending completion request"
        );

        let response: OpenAiResponse = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&payload)
            .send()
            .await
            .map_err(ModelError::network)?
            .error_for_status()
            .map_err(ModelError::network)?
            .json()
            .await
            .map_err(ModelError::network)?;
        debug!("Received completion response");

        let message = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .ok_or_else(|| ModelError::invalid_response("missing choices in completion"))?;

        Ok(CompletionReply {
            content: message.content,
            function_call: message.function_call.map(|call| FunctionCallRequest {
                name: call.name,
                arguments: call.arguments.unwrap_or_default(),
            }),
        })
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: String,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    functions: Option<&'a [FunctionDeclaration]>,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    // The wire format requires the field even when empty; tool results always
    // carry content, assistant function-call messages send null.
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<WireFunctionCall<'a>>,
}

#[derive(Serialize)]
struct WireFunctionCall<'a> {
    name: &'a str,
    arguments: &'a str,
}

impl<'a> From<&'a ChatMessage> for WireMessage<'a> {
    fn from(message: &'a ChatMessage) -> Self {
        Self {
            role: message.role.as_str(),
            content: message.content.as_deref(),
            name: message.name.as_deref(),
            function_call: message.function_call.as_ref().map(|call| WireFunctionCall {
                name: &call.name,
                arguments: &call.arguments,
            }),
        }
    }
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: Option<OpenAiMessage>,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
    function_call: Option<OpenAiFunctionCall>,
}

#[derive(Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::MessageRole;

    #[test]
    fn serializes_tool_message_with_name() {
        let message = ChatMessage::tool_result("get_messages", "[]");
        let wire = WireMessage::from(&message);
        let value = serde_json::to_value(&wire).expect("serialize");
        assert_eq!(value["role"], "tool");
        assert_eq!(value["name"], "get_messages");
        assert_eq!(value["content"], "[]");
    }

    #[test]
    fn serializes_function_call_with_null_content() {
        let message = ChatMessage::assistant_function_call(FunctionCallRequest {
            name: "send_email".into(),
            arguments: "{\"to_email\":\"a@b.c\"}".into(),
        });
        assert_eq!(message.role, MessageRole::Assistant);
        let value = serde_json::to_value(WireMessage::from(&message)).expect("serialize");
        assert!(value["content"].is_null());
        assert_eq!(value["function_call"]["name"], "send_email");
    }
}
