use super::*;
use crate::application::registry::ToolRegistry;
use crate::domain::types::{ContentItem, MessageRole, ToolCallOutput, ToolDescriptor};
use crate::infrastructure::mcp::{McpError, ToolBackend};
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;

#[derive(Default)]
struct ScriptedProvider {
    replies: Mutex<Vec<CompletionReply>>,
    recordings: Mutex<Vec<CompletionRequest>>,
    fail: bool,
}

impl ScriptedProvider {
    fn new(replies: Vec<CompletionReply>) -> Self {
        Self {
            replies: Mutex::new(replies),
            recordings: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    async fn requests(&self) -> Vec<CompletionRequest> {
        self.recordings.lock().await.clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionReply, ModelError> {
        self.recordings.lock().await.push(request);
        if self.fail {
            return Err(ModelError::invalid_response("scripted failure"));
        }
        let mut replies = self.replies.lock().await;
        Ok(replies.remove(0))
    }
}

struct StubBackend {
    output: Result<ToolCallOutput, fn() -> McpError>,
    calls: Mutex<Vec<(String, serde_json::Value)>>,
}

impl StubBackend {
    fn text(text: &str) -> Self {
        Self {
            output: Ok(ToolCallOutput {
                content: vec![ContentItem::Text(text.to_string())],
                is_error: false,
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn terminated() -> Self {
        Self {
            output: Err(|| McpError::Terminated {
                server: "stub".into(),
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    async fn calls(&self) -> Vec<(String, serde_json::Value)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl ToolBackend for StubBackend {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        Ok(Vec::new())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallOutput, McpError> {
        self.calls.lock().await.push((name.to_string(), arguments));
        match &self.output {
            Ok(output) => Ok(output.clone()),
            Err(make) => Err(make()),
        }
    }
}

fn registry() -> Arc<ToolRegistry> {
    Arc::new(ToolRegistry::from_descriptors(vec![
        ToolDescriptor {
            name: "get_messages".into(),
            description: "Retrieve mail messages".into(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        ToolDescriptor {
            name: "send_email".into(),
            description: "Send an email".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "to_email": { "type": "string" } }
            }),
        },
    ]))
}

fn session_with(provider: Arc<ScriptedProvider>, backend: Arc<StubBackend>) -> Session {
    let dispatcher = Dispatcher::new(registry(), backend);
    Session::new(dispatcher, provider, SessionConfig::new("gpt-4"))
}

fn direct_reply(text: &str) -> CompletionReply {
    CompletionReply {
        content: Some(text.to_string()),
        function_call: None,
    }
}

fn tool_call(name: &str, arguments: &str) -> CompletionReply {
    CompletionReply {
        content: None,
        function_call: Some(FunctionCallRequest {
            name: name.to_string(),
            arguments: arguments.to_string(),
        }),
    }
}

#[tokio::test]
async fn tool_round_trip_feeds_result_back_to_model() {
    // Scenario: the model asks for get_messages, the backend has no mail.
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_call("get_messages", "{}"),
        direct_reply("Your inbox is empty."),
    ]));
    let backend = Arc::new(StubBackend::text("[]"));
    let mut session = session_with(provider.clone(), backend);

    let outcome = session
        .run_turn("List the recent emails in my inbox.")
        .await
        .expect("turn succeeds");

    assert_eq!(outcome, TurnOutcome::Reply("Your inbox is empty.".into()));

    let requests = provider.requests().await;
    assert_eq!(requests.len(), 2);
    // The follow-up completion sees the tool message with the literal result.
    let followup = &requests[1];
    let tool_message = followup
        .messages
        .iter()
        .find(|message| message.role == MessageRole::Tool)
        .expect("tool message present");
    assert_eq!(tool_message.content.as_deref(), Some("[]"));
    assert_eq!(tool_message.name.as_deref(), Some("get_messages"));

    // History: user, assistant function call, tool result, final assistant.
    let roles: Vec<MessageRole> = session.messages().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::Tool,
            MessageRole::Assistant,
        ]
    );
}

#[tokio::test]
async fn unknown_tool_surfaces_error_text_and_turn_continues() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_call("nonexistent_tool", "{}"),
        direct_reply("I could not find that tool."),
    ]));
    let backend = Arc::new(StubBackend::text("unused"));
    let mut session = session_with(provider.clone(), backend.clone());

    let outcome = session.run_turn("Do something odd.").await.expect("turn succeeds");
    assert_eq!(
        outcome,
        TurnOutcome::Reply("I could not find that tool.".into())
    );

    // No outbound backend call was made for the unknown name.
    assert!(backend.calls().await.is_empty());

    let tool_message = session
        .messages()
        .iter()
        .find(|message| message.role == MessageRole::Tool)
        .expect("tool message present");
    let content = tool_message.content.as_deref().expect("error text");
    assert!(!content.is_empty());
    assert!(content.contains("nonexistent_tool"));
}

#[tokio::test]
async fn quit_closes_session_without_any_completion() {
    let provider = Arc::new(ScriptedProvider::new(Vec::new()));
    let backend = Arc::new(StubBackend::text("unused"));
    let mut session = session_with(provider.clone(), backend);

    for token in ["quit", "QUIT", "  Exit  "] {
        let outcome = session.run_turn(token).await.expect("close succeeds");
        assert_eq!(outcome, TurnOutcome::Closed);
    }

    assert!(provider.requests().await.is_empty());
    assert!(session.messages().is_empty());
}

#[tokio::test]
async fn empty_model_reply_is_preserved_as_empty_turn() {
    let provider = Arc::new(ScriptedProvider::new(vec![CompletionReply {
        content: Some("   ".into()),
        function_call: None,
    }]));
    let backend = Arc::new(StubBackend::text("unused"));
    let mut session = session_with(provider, backend);

    let before = session.messages().len();
    let outcome = session.run_turn("hello?").await.expect("turn succeeds");

    assert_eq!(outcome, TurnOutcome::Reply(String::new()));
    // The turn still counts: user plus empty assistant message appended.
    assert_eq!(session.messages().len(), before + 2);
    let last = session.messages().last().expect("assistant message");
    assert_eq!(last.role, MessageRole::Assistant);
    assert_eq!(last.content.as_deref(), Some(""));
}

#[tokio::test]
async fn malformed_arguments_become_empty_set() {
    for raw in ["", "{", "not json", "[1,2]", "\"text\""] {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call("get_messages", raw),
            direct_reply("done"),
        ]));
        let backend = Arc::new(StubBackend::text("[]"));
        let mut session = session_with(provider, backend.clone());

        session
            .run_turn("check my mail")
            .await
            .expect("turn proceeds despite malformed arguments");

        let calls = backend.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, json!({}));
    }
}

#[tokio::test]
async fn followup_completion_offers_no_declarations() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_call("get_messages", "{}"),
        direct_reply("done"),
    ]));
    let backend = Arc::new(StubBackend::text("[]"));
    let mut session = session_with(provider.clone(), backend);

    session.run_turn("check mail").await.expect("turn succeeds");

    let requests = provider.requests().await;
    assert_eq!(requests.len(), 2);
    assert!(requests[0].functions.is_some());
    assert!(requests[1].functions.is_none());
}

#[tokio::test]
async fn provider_failure_rolls_back_the_pending_user_message() {
    let provider = Arc::new(ScriptedProvider::failing());
    let backend = Arc::new(StubBackend::text("unused"));
    let mut session = session_with(provider, backend);

    let error = session.run_turn("hello").await.expect_err("turn fails");
    assert!(!error.is_fatal());
    // No dangling user message without a matching assistant reply.
    assert!(session.messages().is_empty());
}

#[tokio::test]
async fn backend_connection_loss_is_fatal_and_rolls_back() {
    let provider = Arc::new(ScriptedProvider::new(vec![tool_call(
        "get_messages",
        "{}",
    )]));
    let backend = Arc::new(StubBackend::terminated());
    let mut session = session_with(provider, backend);

    let error = session.run_turn("check mail").await.expect_err("turn fails");
    assert!(error.is_fatal());
    assert!(session.messages().is_empty());
}

struct HangingBackend;

#[async_trait]
impl ToolBackend for HangingBackend {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        Ok(Vec::new())
    }

    async fn call_tool(
        &self,
        _name: &str,
        _arguments: serde_json::Value,
    ) -> Result<ToolCallOutput, McpError> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        unreachable!("the invocation timeout must fire first")
    }
}

#[tokio::test]
async fn hanging_tool_call_times_out_into_error_text() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_call("get_messages", "{}"),
        direct_reply("The tool did not respond."),
    ]));
    let dispatcher = Dispatcher::new(registry(), Arc::new(HangingBackend));
    let config =
        SessionConfig::new("gpt-4").with_request_timeout(std::time::Duration::from_millis(50));
    let mut session = Session::new(dispatcher, provider, config);

    let outcome = session.run_turn("check mail").await.expect("turn succeeds");
    assert_eq!(
        outcome,
        TurnOutcome::Reply("The tool did not respond.".into())
    );

    let tool_message = session
        .messages()
        .iter()
        .find(|message| message.role == MessageRole::Tool)
        .expect("tool message present");
    let content = tool_message.content.as_deref().expect("error text");
    assert!(content.contains("timed out"));
}

#[tokio::test]
async fn second_hop_function_call_is_not_honored() {
    // The follow-up completion gets no declarations; if the model still asks
    // for a tool there, the reply's content is the turn's final text.
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_call("get_messages", "{}"),
        CompletionReply {
            content: None,
            function_call: Some(FunctionCallRequest {
                name: "send_email".into(),
                arguments: "{}".into(),
            }),
        },
    ]));
    let backend = Arc::new(StubBackend::text("[]"));
    let mut session = session_with(provider.clone(), backend.clone());

    let outcome = session.run_turn("check mail").await.expect("turn succeeds");
    assert_eq!(outcome, TurnOutcome::Reply(String::new()));
    // Only the first hop reached the backend.
    assert_eq!(backend.calls().await.len(), 1);
}

#[tokio::test]
async fn system_prompt_is_seeded_ahead_of_history() {
    let provider = Arc::new(ScriptedProvider::new(vec![direct_reply("hi")]));
    let backend = Arc::new(StubBackend::text("unused"));
    let dispatcher = Dispatcher::new(registry(), backend);
    let config = SessionConfig::new("gpt-4").with_system_prompt("You manage an Outlook mailbox.");
    let mut session = Session::new(dispatcher, provider.clone(), config);

    session.run_turn("hello").await.expect("turn succeeds");

    let requests = provider.requests().await;
    assert_eq!(requests[0].messages[0].role, MessageRole::System);
    assert_eq!(requests[0].messages[1].role, MessageRole::User);
}
