// src/transport/http.rs
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::protocol::{
    Capabilities, JsonRpcResponse, Message, INTERNAL_ERROR, PROTOCOL_VERSION, SERVER_NAME,
    SERVER_VERSION,
};

// Stateless-per-request HTTP surface. Every POST /mcp is one JSON-RPC
// message in, at most one out; no sessions, no connection affinity.
pub async fn run_http_server(dispatcher: Arc<Dispatcher>, port: u16) -> Result<()> {
    let app = build_router(dispatcher);

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind HTTP transport on port {port}"))?;
    info!(port, "HTTP transport listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP transport exited unexpectedly")?;

    info!("HTTP transport shut down");
    Ok(())
}

pub fn build_router(dispatcher: Arc<Dispatcher>) -> Router {
    // Cross-origin requests are allowed from anywhere: the server carries no
    // credentials and the tools are the whole point.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_descriptor))
        .route("/health", get(health))
        .route("/mcp", get(mcp_discovery).post(mcp_post))
        // Credential-less discovery stubs so auth-probing clients move on
        // instead of stalling.
        .route(
            "/.well-known/oauth-protected-resource",
            get(oauth_protected_resource),
        )
        .route(
            "/.well-known/oauth-authorization-server",
            get(oauth_authorization_server),
        )
        .route("/register", post(register_stub))
        .layer(cors)
        .with_state(dispatcher)
}

// GET /: static server descriptor.
async fn root_descriptor() -> Json<Value> {
    Json(json!({
        "name": SERVER_NAME,
        "version": SERVER_VERSION,
        "transport": "http",
        "endpoints": {
            "mcp": "/mcp",
            "health": "/health"
        }
    }))
}

// GET /health: liveness with a current timestamp.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "version": SERVER_VERSION
    }))
}

// GET /mcp: capability discovery, informational only.
async fn mcp_discovery() -> Json<Value> {
    Json(json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": Capabilities::empty(),
        "serverInfo": {
            "name": SERVER_NAME,
            "version": SERVER_VERSION
        }
    }))
}

// POST /mcp: one JSON-RPC message per request body.
//
// JSON-RPC-level errors still travel as HTTP 200; only an undecodable body
// is an HTTP-level failure (500 with a generic internal-error envelope).
// Notifications have no reply, so they get 202 and an empty body.
async fn mcp_post(State(dispatcher): State<Arc<Dispatcher>>, body: String) -> Response {
    let message = match Message::decode(&body) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "rejecting undecodable POST /mcp body");
            let envelope = JsonRpcResponse::error_with_data(
                Value::Null,
                INTERNAL_ERROR,
                "Internal error: request body is not a JSON-RPC message",
                json!(e.to_string()),
            );
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(envelope)).into_response();
        }
    };

    match dispatcher.dispatch(message).await {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn oauth_protected_resource() -> Json<Value> {
    Json(json!({
        "resource": "/mcp",
        "authorization_required": false,
        "authorization_servers": []
    }))
}

async fn oauth_authorization_server() -> Json<Value> {
    Json(json!({
        "issuer": SERVER_NAME,
        "authorization_required": false
    }))
}

async fn register_stub() -> Json<Value> {
    Json(json!({
        "client_id": "public",
        "authorization_required": false
    }))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("failed to install interrupt handler, running until killed");
        std::future::pending::<()>().await;
    }
    info!("interrupt received, draining HTTP transport");
}
