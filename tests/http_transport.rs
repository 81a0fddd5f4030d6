//! HTTP transport integration tests.
//!
//! Each test starts an in-process server on an auto-assigned port and
//! drives it with reqwest, exercising the full pipeline: HTTP POST → axum →
//! dispatcher → pending table → sink → resolve → JSON-RPC response.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use popupd::config::{Config, HttpConfig, StdioConfig};
use popupd::{PopupReply, PopupRequest, PopupResponder, PopupServer, PopupSink};

// ============================================================================
// Test harness
// ============================================================================

fn http_only_config(timeout: Duration) -> Config {
    Config {
        http: HttpConfig {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        stdio: StdioConfig { enabled: false },
        response_timeout: timeout,
        sweep_interval: Duration::from_secs(60),
    }
}

async fn spawn_server(timeout: Duration) -> (PopupServer, String) {
    let mut server = PopupServer::new(http_only_config(timeout));
    server.start().await.expect("server should start");
    let addr = server.bound_addr().expect("HTTP transport should bind");
    (server, format!("http://{addr}"))
}

/// Sink that forwards every delivered request (and its responder) to the
/// test, which decides when and how to reply.
struct ForwardingSink {
    tx: mpsc::UnboundedSender<(PopupRequest, PopupResponder)>,
}

#[async_trait]
impl PopupSink for ForwardingSink {
    async fn deliver(
        &self,
        request: PopupRequest,
        responder: PopupResponder,
    ) -> anyhow::Result<()> {
        let _ = self.tx.send((request, responder));
        Ok(())
    }
}

fn forwarding_sink() -> (
    Arc<ForwardingSink>,
    mpsc::UnboundedReceiver<(PopupRequest, PopupResponder)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ForwardingSink { tx }), rx)
}

async fn post_rpc(base: &str, body: &str) -> Value {
    let response = reqwest::Client::new()
        .post(format!("{base}/mcp"))
        .header("content-type", "application/json")
        .body(body.to_string())
        .send()
        .await
        .expect("HTTP request failed");
    assert_eq!(
        response.headers()["content-type"],
        "application/json",
        "RPC responses carry a fixed content type"
    );
    response.json().await.expect("response should be JSON")
}

fn popup_body(id: &str) -> String {
    json!({
        "jsonrpc": "2.0",
        "method": "triggerPopup",
        "params": {
            "workspacePath": "/w",
            "title": "T",
            "message": "M",
            "options": [{"label": "Yes", "value": "yes"}]
        },
        "id": id
    })
    .to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn health_check_method() {
    let (mut server, base) = spawn_server(Duration::from_secs(5)).await;

    let response = post_rpc(
        &base,
        r#"{"jsonrpc":"2.0","method":"healthCheck","id":"h1"}"#,
    )
    .await;

    assert_eq!(response["jsonrpc"], "2.0");
    assert_eq!(response["id"], "h1");
    assert_eq!(response["result"]["status"], "active");
    assert!(response["result"]["uptime"].is_u64());
    assert!(response.get("error").is_none());

    server.stop().await;
}

#[tokio::test]
async fn popup_round_trip() {
    let (mut server, base) = spawn_server(Duration::from_secs(5)).await;
    let (sink, mut delivered) = forwarding_sink();
    server.attach_sink(sink);

    let request_task = tokio::spawn({
        let base = base.clone();
        async move { post_rpc(&base, &popup_body("p1")).await }
    });

    let (request, responder) = delivered.recv().await.expect("sink should receive request");
    assert!(request.request_id.starts_with("mcp_"));
    assert_eq!(request.workspace_path, "/w");

    assert!(responder.resolve(PopupReply {
        request_id: request.request_id,
        selected_value: "yes".to_string(),
    }));

    let response = request_task.await.unwrap();
    assert_eq!(response["jsonrpc"], "2.0");
    assert_eq!(response["id"], "p1");
    assert_eq!(response["result"]["selectedValue"], "yes");

    server.stop().await;
}

#[tokio::test]
async fn popup_timeout_returns_application_error() {
    let (mut server, base) = spawn_server(Duration::from_millis(50)).await;
    let (sink, mut delivered) = forwarding_sink();
    server.attach_sink(sink);

    let response = post_rpc(&base, &popup_body("p1")).await;
    // The delivery happened; nobody replied.
    assert!(delivered.try_recv().is_ok());

    assert_eq!(response["id"], "p1");
    assert_eq!(response["error"]["code"], -32000);
    assert_eq!(response["error"]["data"]["timeoutMs"], 50);

    server.stop().await;
}

#[tokio::test]
async fn popup_without_sink_unavailable() {
    let (mut server, base) = spawn_server(Duration::from_secs(5)).await;

    let response = post_rpc(&base, &popup_body("p1")).await;
    assert_eq!(response["id"], "p1");
    assert_eq!(response["error"]["code"], -32000);
    assert!(response["error"]["message"]
        .as_str()
        .unwrap()
        .contains("not available"));

    server.stop().await;
}

#[tokio::test]
async fn malformed_json_returns_parse_error() {
    let (mut server, base) = spawn_server(Duration::from_secs(5)).await;

    let response = post_rpc(&base, "not json").await;
    assert_eq!(response["error"]["code"], -32700);
    assert_eq!(response["id"], Value::Null);

    // Requests are independent; the server still works.
    let response = post_rpc(
        &base,
        r#"{"jsonrpc":"2.0","method":"healthCheck","id":"h2"}"#,
    )
    .await;
    assert_eq!(response["id"], "h2");

    server.stop().await;
}

#[tokio::test]
async fn empty_options_rejected_by_validation() {
    let (mut server, base) = spawn_server(Duration::from_secs(5)).await;

    let body = json!({
        "jsonrpc": "2.0",
        "method": "triggerPopup",
        "params": {
            "workspacePath": "/w",
            "title": "T",
            "message": "M",
            "options": []
        },
        "id": "p1"
    })
    .to_string();

    let response = post_rpc(&base, &body).await;
    assert_eq!(response["id"], "p1");
    assert_eq!(response["error"]["code"], -32602);
    assert!(response["error"]["message"]
        .as_str()
        .unwrap()
        .contains("At least one option"));

    server.stop().await;
}

#[tokio::test]
async fn concurrent_popups_resolved_out_of_order() {
    let (mut server, base) = spawn_server(Duration::from_secs(5)).await;
    let (sink, mut delivered) = forwarding_sink();
    server.attach_sink(sink);

    let body_for = |id: &str, title: &str| {
        json!({
            "jsonrpc": "2.0",
            "method": "triggerPopup",
            "params": {
                "workspacePath": "/w",
                "title": title,
                "message": "M",
                "options": [{"label": "Yes", "value": "yes"}]
            },
            "id": id
        })
        .to_string()
    };

    let task_a = tokio::spawn({
        let base = base.clone();
        let body = body_for("a", "A");
        async move { post_rpc(&base, &body).await }
    });
    let task_b = tokio::spawn({
        let base = base.clone();
        let body = body_for("b", "B");
        async move { post_rpc(&base, &body).await }
    });

    let (first, responder) = delivered.recv().await.unwrap();
    let (second, _) = delivered.recv().await.unwrap();

    // Map each internal key to the title it was registered for, then
    // resolve B before A with title-specific values.
    let key_of = |title: &str| {
        [&first, &second]
            .iter()
            .find(|r| r.title == title)
            .map(|r| r.request_id.clone())
            .unwrap()
    };
    responder.resolve(PopupReply {
        request_id: key_of("B"),
        selected_value: "picked-b".to_string(),
    });
    responder.resolve(PopupReply {
        request_id: key_of("A"),
        selected_value: "picked-a".to_string(),
    });

    // Each caller receives the payload matching its own key, never the
    // other's, regardless of resolution order.
    let response_a = task_a.await.unwrap();
    let response_b = task_b.await.unwrap();
    assert_eq!(response_a["id"], "a");
    assert_eq!(response_a["result"]["selectedValue"], "picked-a");
    assert_eq!(response_b["id"], "b");
    assert_eq!(response_b["result"]["selectedValue"], "picked-b");

    server.stop().await;
}

#[tokio::test]
async fn health_endpoint_snapshot() {
    let (mut server, base) = spawn_server(Duration::from_secs(5)).await;

    let response = reqwest::get(format!("{base}/health")).await.unwrap();
    assert!(response.status().is_success());
    let health: Value = response.json().await.unwrap();

    assert_eq!(health["status"], "active");
    assert_eq!(health["httpStatus"], "listening");
    assert_eq!(health["stdioStatus"], "disabled");
    assert!(health["uptime"].is_u64());
    assert!(health["activeConnections"].is_u64());
    assert!(health.get("lastError").is_none());

    server.stop().await;
}

#[tokio::test]
async fn unknown_route_is_404() {
    let (mut server, base) = spawn_server(Duration::from_secs(5)).await;

    let response = reqwest::get(format!("{base}/nope")).await.unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Not found");

    server.stop().await;
}

#[tokio::test]
async fn options_answered_with_200() {
    let (mut server, base) = spawn_server(Duration::from_secs(5)).await;
    let client = reqwest::Client::new();

    for path in ["/mcp", "/health", "/anything"] {
        let response = client
            .request(reqwest::Method::OPTIONS, format!("{base}{path}"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200, "OPTIONS {path} should be 200");
    }

    server.stop().await;
}

#[tokio::test]
async fn remote_origin_rejected() {
    let (mut server, base) = spawn_server(Duration::from_secs(5)).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/mcp"))
        .header("origin", "https://evil.example")
        .body(r#"{"jsonrpc":"2.0","method":"healthCheck","id":1}"#.to_string())
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32602);

    // Localhost origins pass.
    let response = reqwest::Client::new()
        .post(format!("{base}/mcp"))
        .header("origin", "http://localhost:3000")
        .body(r#"{"jsonrpc":"2.0","method":"healthCheck","id":2}"#.to_string())
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["id"], 2);
    assert_eq!(body["result"]["status"], "active");

    server.stop().await;
}

#[tokio::test]
async fn stop_settles_inflight_popup_with_disposal_error() {
    let (mut server, base) = spawn_server(Duration::from_secs(30)).await;
    let (sink, mut delivered) = forwarding_sink();
    server.attach_sink(sink);

    let request_task = tokio::spawn({
        let base = base.clone();
        async move { post_rpc(&base, &popup_body("p1")).await }
    });

    // Wait until the popup is registered, then shut down mid-flight.
    let _ = delivered.recv().await.unwrap();
    server.stop().await;

    let response = request_task.await.unwrap();
    assert_eq!(response["id"], "p1");
    assert_eq!(response["error"]["code"], -32000);
    assert!(response["error"]["message"]
        .as_str()
        .unwrap()
        .contains("shutting down"));
}
