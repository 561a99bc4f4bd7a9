//! MCP-style tool server: serves the Microsoft Graph tools as line-delimited
//! JSON-RPC over the process's own stdio. The catalog is static; each tool
//! forwards onto exactly one [`GraphClient`] operation.

use super::graph::GraphClient;
use crate::domain::types::ToolDescriptor;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

const PROTOCOL_VERSION: &str = "2025-06-18";
const DEFAULT_TOP: u32 = 10;
const DEFAULT_FOLDER: &str = "inbox";

#[derive(Debug, Error)]
pub enum ToolServerError {
    #[error("stdin/stdout I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct ToolServer {
    graph: GraphClient,
}

impl ToolServer {
    pub fn new(graph: GraphClient) -> Self {
        Self { graph }
    }

    /// The static, ordered tool catalog. Ordering is part of the contract:
    /// clients snapshot it once and project it in this order.
    pub fn catalog() -> Vec<ToolDescriptor> {
        vec![
            tool(
                "send_email",
                "Send an email using Microsoft Graph API.",
                json!({
                    "type": "object",
                    "properties": {
                        "to_email": { "type": "string", "description": "Recipient address" },
                        "subject": { "type": "string" },
                        "body": { "type": "string" }
                    },
                    "required": ["to_email", "subject", "body"]
                }),
            ),
            tool(
                "create_calendar_event",
                "Create a calendar event using Microsoft Graph API.",
                json!({
                    "type": "object",
                    "properties": {
                        "subject": { "type": "string" },
                        "start_time": { "type": "string", "description": "UTC date-time" },
                        "end_time": { "type": "string", "description": "UTC date-time" },
                        "attendees": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["subject", "start_time", "end_time"]
                }),
            ),
            tool(
                "create_contact",
                "Create a contact using Microsoft Graph API.",
                json!({
                    "type": "object",
                    "properties": {
                        "display_name": { "type": "string" },
                        "email": { "type": "string" },
                        "phone": { "type": "string" }
                    },
                    "required": ["display_name", "email"]
                }),
            ),
            tool(
                "create_task",
                "Create a task in a specific task list using Microsoft Graph API.",
                json!({
                    "type": "object",
                    "properties": {
                        "task_list_id": { "type": "string" },
                        "title": { "type": "string" },
                        "due_date": { "type": "string", "description": "UTC date-time" }
                    },
                    "required": ["task_list_id", "title"]
                }),
            ),
            tool(
                "get_messages",
                "Retrieve mail messages using Microsoft Graph API.",
                json!({
                    "type": "object",
                    "properties": {
                        "top": { "type": "integer", "description": "Number of messages (default 10)" },
                        "filter": { "type": "string", "description": "OData $filter expression" }
                    }
                }),
            ),
            tool(
                "list_folders",
                "List mail folders using Microsoft Graph API.",
                json!({ "type": "object", "properties": {} }),
            ),
            tool(
                "list_emails",
                "List recent emails from a specified folder.",
                json!({
                    "type": "object",
                    "properties": {
                        "folder": { "type": "string", "description": "Mail folder (default inbox)" },
                        "limit": { "type": "integer", "description": "Number of messages (default 10)" }
                    }
                }),
            ),
            tool(
                "list_onedrive_items",
                "List OneDrive items using Microsoft Graph API.",
                json!({ "type": "object", "properties": {} }),
            ),
            tool(
                "get_user_profile",
                "Retrieve user profile details using Microsoft Graph API (beta).",
                json!({ "type": "object", "properties": {} }),
            ),
        ]
    }

    /// Serve requests from stdin until EOF.
    pub async fn run(&self) -> Result<(), ToolServerError> {
        info!("Tool server listening on stdio");
        let stdin = BufReader::new(io::stdin());
        let mut lines = stdin.lines();
        let mut stdout = io::stdout();

        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let value = match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => value,
                Err(source) => {
                    warn!(line = trimmed, %source, "received invalid JSON; ignoring");
                    continue;
                }
            };

            if let Some(response) = self.handle_message(value).await {
                let mut payload = serde_json::to_vec(&response)
                    .map_err(|source| std::io::Error::other(source))?;
                payload.push(b'\n');
                stdout.write_all(&payload).await?;
                stdout.flush().await?;
            }
        }

        info!("Stdin closed; tool server shutting down");
        Ok(())
    }

    /// Route one inbound message. Notifications yield no response.
    pub async fn handle_message(&self, value: Value) -> Option<Value> {
        let method = value.get("method").and_then(Value::as_str)?.to_string();
        let id = value.get("id").cloned();
        let params = value.get("params").cloned().unwrap_or(Value::Null);

        let Some(id) = id else {
            debug!(method, "notification received");
            return None;
        };

        let response = match method.as_str() {
            "initialize" => success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "serverInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                    "capabilities": { "tools": {} }
                }),
            ),
            "ping" => success(id, json!({})),
            "tools/list" => {
                let tools: Vec<Value> = Self::catalog()
                    .into_iter()
                    .map(|descriptor| {
                        json!({
                            "name": descriptor.name,
                            "description": descriptor.description,
                            "inputSchema": descriptor.input_schema,
                        })
                    })
                    .collect();
                success(id, json!({ "tools": tools }))
            }
            "tools/call" => {
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let arguments = match params.get("arguments") {
                    Some(Value::Object(map)) => map.clone(),
                    _ => Map::new(),
                };
                let (text, is_error) = self.call_tool(&name, &arguments).await;
                success(
                    id,
                    json!({
                        "content": [ { "type": "text", "text": text } ],
                        "isError": is_error
                    }),
                )
            }
            other => {
                warn!(method = other, "unsupported method requested");
                error_response(
                    id,
                    -32601,
                    format!("server does not implement method '{other}'"),
                )
            }
        };

        Some(response)
    }

    /// Invoke one Graph-backed tool. Failures degrade to error text with
    /// `is_error` set; the transport never sees a Rust error from here.
    async fn call_tool(&self, name: &str, arguments: &Map<String, Value>) -> (String, bool) {
        debug!(tool = name, "tool invocation");
        let outcome = match name {
            "send_email" => {
                match (arg_str(arguments, "to_email"), arg_str(arguments, "subject"), arg_str(arguments, "body")) {
                    (Some(to), Some(subject), Some(body)) => {
                        self.graph.send_email(to, subject, body).await.map_err(|e| e.to_string())
                    }
                    _ => Err(missing_argument("send_email", "to_email, subject, body")),
                }
            }
            "create_calendar_event" => {
                match (
                    arg_str(arguments, "subject"),
                    arg_str(arguments, "start_time"),
                    arg_str(arguments, "end_time"),
                ) {
                    (Some(subject), Some(start), Some(end)) => {
                        let attendees = arg_string_list(arguments, "attendees");
                        self.graph
                            .create_event(subject, start, end, attendees.as_deref())
                            .await
                            .map_err(|e| e.to_string())
                    }
                    _ => Err(missing_argument(
                        "create_calendar_event",
                        "subject, start_time, end_time",
                    )),
                }
            }
            "create_contact" => {
                match (arg_str(arguments, "display_name"), arg_str(arguments, "email")) {
                    (Some(display_name), Some(email)) => self
                        .graph
                        .create_contact(display_name, email, arg_str(arguments, "phone"))
                        .await
                        .map_err(|e| e.to_string()),
                    _ => Err(missing_argument("create_contact", "display_name, email")),
                }
            }
            "create_task" => {
                match (arg_str(arguments, "task_list_id"), arg_str(arguments, "title")) {
                    (Some(list_id), Some(title)) => self
                        .graph
                        .create_task(list_id, title, arg_str(arguments, "due_date"))
                        .await
                        .map_err(|e| e.to_string()),
                    _ => Err(missing_argument("create_task", "task_list_id, title")),
                }
            }
            "get_messages" => {
                let top = arg_u32(arguments, "top").unwrap_or(DEFAULT_TOP);
                let filter = arg_str(arguments, "filter");
                self.graph
                    .get_messages(top, filter)
                    .await
                    .map(|value| value.to_string())
                    .map_err(|e| format!("Error retrieving mails: {e}"))
            }
            "list_folders" => self
                .graph
                .list_folders()
                .await
                .map(|value| value.to_string())
                .map_err(|e| format!("Error listing folders: {e}")),
            "list_emails" => {
                let folder = arg_str(arguments, "folder").unwrap_or(DEFAULT_FOLDER);
                let limit = arg_u32(arguments, "limit").unwrap_or(DEFAULT_TOP);
                self.graph
                    .list_emails(folder, limit)
                    .await
                    .map(|value| value.to_string())
                    .map_err(|e| format!("Error listing emails: {e}"))
            }
            "list_onedrive_items" => self
                .graph
                .list_drive_items()
                .await
                .map(|value| value.to_string())
                .map_err(|e| format!("Error listing OneDrive items: {e}")),
            "get_user_profile" => self
                .graph
                .get_user_profile()
                .await
                .map(|value| value.to_string())
                .map_err(|e| format!("Error retrieving user profile: {e}")),
            other => Err(format!("unknown tool: {other}")),
        };

        match outcome {
            Ok(text) => (text, false),
            Err(message) => {
                warn!(tool = name, message = message.as_str(), "tool invocation failed");
                (message, true)
            }
        }
    }
}

fn tool(name: &str, description: &str, input_schema: Value) -> ToolDescriptor {
    ToolDescriptor {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

fn success(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_response(id: Value, code: i64, message: String) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}

fn missing_argument(tool: &str, expected: &str) -> String {
    format!("{tool} requires arguments: {expected}")
}

fn arg_str<'a>(arguments: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    arguments.get(key).and_then(Value::as_str)
}

// Out-of-range values fall back to None (and so to the tool's default)
// instead of wrapping.
fn arg_u32(arguments: &Map<String, Value>, key: &str) -> Option<u32> {
    arguments
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|value| u32::try_from(value).ok())
}

fn arg_string_list(arguments: &Map<String, Value>, key: &str) -> Option<Vec<String>> {
    let array = arguments.get(key)?.as_array()?;
    Some(
        array
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> ToolServer {
        ToolServer::new(GraphClient::new("test-token"))
    }

    #[tokio::test]
    async fn initialize_reports_protocol_and_server_info() {
        let response = server()
            .handle_message(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": { "protocolVersion": PROTOCOL_VERSION }
            }))
            .await
            .expect("response expected");

        assert_eq!(response["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(response["result"]["serverInfo"]["name"], env!("CARGO_PKG_NAME"));
    }

    #[tokio::test]
    async fn tools_list_matches_catalog_order() {
        let response = server()
            .handle_message(json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }))
            .await
            .expect("response expected");

        let listed = response["result"]["tools"]
            .as_array()
            .expect("tools array");
        let catalog = ToolServer::catalog();
        assert_eq!(listed.len(), catalog.len());
        for (entry, descriptor) in listed.iter().zip(&catalog) {
            assert_eq!(entry["name"], descriptor.name.as_str());
            assert!(entry["inputSchema"].is_object());
        }
    }

    #[tokio::test]
    async fn unknown_method_yields_method_not_found() {
        let response = server()
            .handle_message(json!({ "jsonrpc": "2.0", "id": 3, "method": "resources/list" }))
            .await
            .expect("response expected");

        assert_eq!(response["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let response = server()
            .handle_message(json!({
                "jsonrpc": "2.0",
                "method": "notifications/initialized",
                "params": {}
            }))
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn unknown_tool_call_is_error_text_not_transport_failure() {
        let response = server()
            .handle_message(json!({
                "jsonrpc": "2.0",
                "id": 4,
                "method": "tools/call",
                "params": { "name": "nonexistent_tool", "arguments": {} }
            }))
            .await
            .expect("response expected");

        assert_eq!(response["result"]["isError"], true);
        let text = response["result"]["content"][0]["text"]
            .as_str()
            .expect("text content");
        assert!(text.contains("nonexistent_tool"));
    }

    #[tokio::test]
    async fn missing_required_arguments_fail_without_network_traffic() {
        let response = server()
            .handle_message(json!({
                "jsonrpc": "2.0",
                "id": 5,
                "method": "tools/call",
                "params": { "name": "send_email", "arguments": { "subject": "hi" } }
            }))
            .await
            .expect("response expected");

        assert_eq!(response["result"]["isError"], true);
        let text = response["result"]["content"][0]["text"]
            .as_str()
            .expect("text content");
        assert!(text.contains("to_email"));
    }

    #[test]
    fn catalog_covers_folder_listing_and_message_filtering() {
        let catalog = ToolServer::catalog();
        let names: Vec<&str> = catalog.iter().map(|tool| tool.name.as_str()).collect();
        assert!(names.contains(&"list_folders"));

        let get_messages = catalog
            .iter()
            .find(|tool| tool.name == "get_messages")
            .expect("get_messages in catalog");
        assert!(get_messages.input_schema["properties"]["filter"].is_object());
    }

    #[test]
    fn oversized_numeric_argument_is_rejected_not_wrapped() {
        let mut args = Map::new();
        args.insert("top".to_string(), json!(4_294_967_306_u64));
        assert_eq!(arg_u32(&args, "top"), None);

        args.insert("top".to_string(), json!(25));
        assert_eq!(arg_u32(&args, "top"), Some(25));

        args.insert("top".to_string(), json!(-5));
        assert_eq!(arg_u32(&args, "top"), None);
    }

    #[tokio::test]
    async fn ping_answers_empty_result() {
        let response = server()
            .handle_message(json!({ "jsonrpc": "2.0", "id": 6, "method": "ping" }))
            .await
            .expect("response expected");
        assert!(response["result"].as_object().expect("object").is_empty());
    }
}
