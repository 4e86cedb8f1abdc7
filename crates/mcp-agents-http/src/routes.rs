//! Axum routes over a [`SessionManager`].

use std::{convert::Infallible, sync::Arc};

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use futures::StreamExt;
use mcp_agents_core::{ChatMessage, EventItem, RuntimeFactory};
use mcp_agents_session::{Launcher, SessionManager, StreamBridge};
use tower_http::trace::TraceLayer;

use crate::{
    cors::CorsConfig,
    error::ApiError,
    protocol::{
        GenerateRequest, GenerateResponse, HealthResponse, ListToolsResponse, StreamFailure,
        ToolInfo,
    },
};

pub const NDJSON: &str = "application/x-ndjson";

/// Build the API router.
pub fn router<L, F>(manager: Arc<SessionManager<L, F>>, cors: &CorsConfig) -> Router
where
    L: Launcher,
    F: RuntimeFactory + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/generate", post(generate::<L, F>))
        .route("/list_tools", get(list_tools::<L, F>))
        .layer(TraceLayer::new_for_http())
        .layer(cors.layer())
        .with_state(manager)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}

async fn generate<L, F>(
    State(manager): State<Arc<SessionManager<L, F>>>,
    Json(request): Json<GenerateRequest>,
) -> Result<Response, ApiError>
where
    L: Launcher,
    F: RuntimeFactory + 'static,
{
    tracing::info!(stream = request.stream, "generate");
    let message = ChatMessage::user(request.query);

    if request.stream {
        let bridge = manager
            .query_stream(message)
            .map_err(ApiError::context("Error starting stream"))?;
        return Ok(ndjson(bridge));
    }

    let messages = manager
        .query(message)
        .await
        .map_err(ApiError::context("Error processing query"))?;
    Ok(Json(GenerateResponse { messages }).into_response())
}

async fn list_tools<L, F>(
    State(manager): State<Arc<SessionManager<L, F>>>,
) -> Result<Json<ListToolsResponse>, ApiError>
where
    L: Launcher,
    F: RuntimeFactory + 'static,
{
    let tools = manager
        .tools()
        .map_err(ApiError::context("Error listing tools"))?;
    Ok(Json(ListToolsResponse {
        tools: tools.into_iter().map(ToolInfo::from).collect(),
    }))
}

/// Dropping the response body drops the bridge, which cancels the query.
fn ndjson(bridge: StreamBridge) -> Response {
    let lines = bridge.map(|item| Ok::<_, Infallible>(encode_line(item)));
    (
        [(header::CONTENT_TYPE, NDJSON), (header::CACHE_CONTROL, "no-cache")],
        Body::from_stream(lines),
    )
        .into_response()
}

fn encode_line(item: EventItem) -> Bytes {
    let encoded = match item {
        Ok(event) => serde_json::to_vec(&event),
        Err(e) => {
            tracing::warn!(error = %e, "stream failed");
            serde_json::to_vec(&StreamFailure::Error {
                message: e.to_string(),
            })
        }
    };
    let mut line = encoded.unwrap_or_else(|e| {
        tracing::error!("failed to encode stream line: {e}");
        br#"{"type":"error","message":"unencodable event"}"#.to_vec()
    });
    line.push(b'\n');
    Bytes::from(line)
}
