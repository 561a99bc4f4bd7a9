use super::graph::GraphClient;
use super::toolserver::ToolServer;
use crate::domain::types::ToolDescriptor;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind HTTP listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP server error: {0}")]
    Serve(#[from] std::io::Error),
}

pub(crate) struct ServerState {
    graph: GraphClient,
}

impl ServerState {
    pub(crate) fn new(graph: GraphClient) -> Self {
        Self { graph }
    }

    pub(crate) fn graph(&self) -> &GraphClient {
        &self.graph
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(health_handler, messages_handler, send_email_handler, tools_handler),
    components(
        schemas(
            HealthResponse,
            SendEmailResponse,
            ErrorResponse,
            ToolListResponse,
            ToolDescriptor
        )
    ),
    tags(
        (name = "mail", description = "Mailbox operations via Microsoft Graph"),
        (name = "tools", description = "Tool catalog served to clients"),
        (name = "meta", description = "Service health")
    )
)]
struct ApiDoc;

pub async fn serve(graph: GraphClient, addr: SocketAddr) -> Result<(), ServerError> {
    let api = ApiDoc::openapi();
    info!(%addr, "Binding control server");

    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:5173"),
            HeaderValue::from_static("http://127.0.0.1:5173"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let state = Arc::new(ServerState::new(graph));
    let app = Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", api))
        .route("/health", get(health_handler))
        .route("/messages", get(messages_handler))
        .route("/send-email", post(send_email_handler))
        .route("/tools", get(tools_handler))
        .layer(cors)
        .with_state(state);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    info!(%addr, "Control server ready to accept connections");

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(ServerError::Serve)
}

#[derive(Debug, Serialize, ToSchema)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Debug, Serialize, ToSchema)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    top: Option<u32>,
    filter: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
struct SendEmailResponse {
    status: String,
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "meta",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/messages",
    tag = "mail",
    params(
        ("top" = Option<u32>, Query, description = "Number of messages to retrieve (default 10)"),
        ("filter" = Option<String>, Query, description = "OData $filter expression")
    ),
    responses(
        (status = 200, description = "Recent mail messages as returned by Microsoft Graph"),
        (status = 502, description = "Microsoft Graph could not be reached", body = ErrorResponse)
    )
)]
async fn messages_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Value>, (StatusCode, Json<ErrorResponse>)> {
    let top = query.top.unwrap_or(10);
    debug!(top, "Serving /messages request");

    match state.graph().get_messages(top, query.filter.as_deref()).await {
        Ok(messages) => Ok(Json(messages)),
        Err(error) => {
            error!(%error, "Failed to retrieve messages from Microsoft Graph");
            Err((
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: error.to_string(),
                }),
            ))
        }
    }
}

#[utoipa::path(
    post,
    path = "/send-email",
    tag = "mail",
    request_body = Value,
    responses(
        (status = 200, description = "Email accepted by Microsoft Graph", body = SendEmailResponse),
        (status = 400, description = "Payload missing the 'message' envelope", body = ErrorResponse),
        (status = 502, description = "Microsoft Graph rejected the request", body = ErrorResponse)
    )
)]
async fn send_email_handler(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<Value>,
) -> Result<Json<SendEmailResponse>, (StatusCode, Json<ErrorResponse>)> {
    info!("Received /send-email request");

    if payload.get("message").is_none() {
        error!("Rejecting /send-email request without a 'message' envelope");
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "payload must contain a 'message' object".to_string(),
            }),
        ));
    }

    match state.graph().send_email_payload(&payload).await {
        Ok(()) => {
            info!("Email forwarded to Microsoft Graph");
            Ok(Json(SendEmailResponse {
                status: "Email sent successfully".to_string(),
            }))
        }
        Err(error) => {
            error!(%error, "Microsoft Graph rejected the sendMail request");
            Err((
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: error.to_string(),
                }),
            ))
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
struct ToolListResponse {
    tools: Vec<ToolDescriptor>,
}

#[utoipa::path(
    get,
    path = "/tools",
    tag = "tools",
    responses(
        (status = 200, description = "The static tool catalog", body = ToolListResponse)
    )
)]
async fn tools_handler() -> Json<ToolListResponse> {
    let tools = ToolServer::catalog();
    debug!(tool_count = tools.len(), "Serving /tools request");
    Json(ToolListResponse { tools })
}
