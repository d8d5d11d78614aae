// tests/http_server.rs
//
// End-to-end tests against a real bound listener: the router is served on
// an ephemeral port and exercised with a plain HTTP client, the same way an
// MCP-over-HTTP agent would reach it.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{json, Value};

use matlab_mcp::dispatcher::Dispatcher;
use matlab_mcp::engine::MatlabEngine;
use matlab_mcp::transport::http::build_router;

async fn spawn_server() -> SocketAddr {
    // Engine binary that does not exist: tool calls must surface that as
    // tool output, not as transport failures.
    let engine = Arc::new(MatlabEngine::new("/nonexistent/matlab-binary"));
    let dispatcher = Arc::new(Dispatcher::new(engine));
    let app = build_router(dispatcher);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn post_mcp(addr: SocketAddr, body: Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://{addr}/mcp"))
        .json(&body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn health_reports_ok_with_timestamp() {
    let addr = spawn_server().await;

    let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    let timestamp = body["timestamp"].as_str().unwrap();
    chrono::DateTime::parse_from_rfc3339(timestamp).expect("timestamp must be RFC 3339");
}

#[tokio::test]
async fn root_describes_the_server() {
    let addr = spawn_server().await;

    let body: Value = reqwest::get(format!("http://{addr}/"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["name"], "matlab-mcp");
    assert_eq!(body["endpoints"]["mcp"], "/mcp");
}

#[tokio::test]
async fn mcp_get_is_informational_discovery() {
    let addr = spawn_server().await;

    let body: Value = reqwest::get(format!("http://{addr}/mcp"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["protocolVersion"], "2025-03-26");
    assert_eq!(body["capabilities"]["tools"], json!({}));
    assert_eq!(body["serverInfo"]["name"], "matlab-mcp");
}

#[tokio::test]
async fn initialize_roundtrip_echoes_protocol_version() {
    let addr = spawn_server().await;

    let response = post_mcp(
        addr,
        json!({
            "jsonrpc": "2.0",
            "method": "initialize",
            "params": {"protocolVersion": "2025-03-26"},
            "id": 1
        }),
    )
    .await;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["jsonrpc"], "2.0");
    assert_eq!(body["id"], 1);
    assert_eq!(body["result"]["protocolVersion"], "2025-03-26");
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn tools_list_roundtrip() {
    let addr = spawn_server().await;

    let body: Value = post_mcp(
        addr,
        json!({"jsonrpc": "2.0", "method": "tools/list", "id": 2}),
    )
    .await
    .json()
    .await
    .unwrap();

    let tools = body["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 2);
    assert_eq!(tools[0]["name"], "execute_code");
    assert_eq!(tools[1]["name"], "generate_code");
}

#[tokio::test]
async fn execute_with_unavailable_engine_is_http_200_tool_error() {
    let addr = spawn_server().await;

    let response = post_mcp(
        addr,
        json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {"name": "execute_code", "arguments": {"code": "disp(1+1)"}},
            "id": 3
        }),
    )
    .await;
    // Engine failure is tool output, not an HTTP failure.
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["isError"], json!(true));
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("not available"));
}

#[tokio::test]
async fn missing_code_parameter_is_invalid_params_over_http() {
    let addr = spawn_server().await;

    let body: Value = post_mcp(
        addr,
        json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {"name": "execute_code", "arguments": {}},
            "id": 4
        }),
    )
    .await
    .json()
    .await
    .unwrap();

    assert_eq!(body["error"]["code"], -32602);
}

#[tokio::test]
async fn notification_gets_202_and_no_body() {
    let addr = spawn_server().await;

    let response = post_mcp(
        addr,
        json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
    )
    .await;
    assert_eq!(response.status(), 202);
    assert!(response.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn undecodable_body_is_http_500_with_error_envelope() {
    let addr = spawn_server().await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/mcp"))
        .body("this is not json-rpc")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32603);
}

#[tokio::test]
async fn cors_allows_any_origin() {
    let addr = spawn_server().await;

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/health"))
        .header("Origin", "http://example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}

#[tokio::test]
async fn auth_discovery_stubs_declare_no_authorization() {
    let addr = spawn_server().await;

    for path in [
        "/.well-known/oauth-protected-resource",
        "/.well-known/oauth-authorization-server",
    ] {
        let body: Value = reqwest::get(format!("http://{addr}{path}"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["authorization_required"], json!(false), "{path}");
    }

    let body: Value = reqwest::Client::new()
        .post(format!("http://{addr}/register"))
        .json(&json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["authorization_required"], json!(false));
}
