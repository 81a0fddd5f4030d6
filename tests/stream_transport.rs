//! Stream transport integration tests.
//!
//! Drives the newline-delimited loop through an in-memory duplex pipe:
//! lines in, JSON-RPC lines out, with popup waits suspended across the
//! stream while other lines keep being serviced.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};

use popupd::stdio::run_stream;
use popupd::{
    Dispatcher, PendingTable, PopupReply, PopupRequest, PopupResponder, PopupSink,
};

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

struct StreamHarness {
    writer: WriteHalf<tokio::io::DuplexStream>,
    reader: tokio::io::Lines<BufReader<ReadHalf<tokio::io::DuplexStream>>>,
    dispatcher: Arc<Dispatcher>,
    delivered: mpsc::UnboundedReceiver<(PopupRequest, PopupResponder)>,
    _shutdown: watch::Sender<bool>,
}

impl StreamHarness {
    fn new(timeout: Duration) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(PendingTable::with_timeout(
            timeout,
        ))));
        let (tx, delivered) = mpsc::unbounded_channel();
        dispatcher.attach_sink(Arc::new(ForwardingSink { tx }));

        let (client, server) = tokio::io::duplex(16 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, client_write) = tokio::io::split(client);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(run_stream(
            Arc::clone(&dispatcher),
            server_read,
            server_write,
            shutdown_rx,
        ));

        Self {
            writer: client_write,
            reader: BufReader::new(client_read).lines(),
            dispatcher,
            delivered,
            _shutdown: shutdown_tx,
        }
    }

    async fn send_line(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn read_response(&mut self) -> Value {
        let line = self
            .reader
            .next_line()
            .await
            .unwrap()
            .expect("stream should produce a response line");
        serde_json::from_str(&line).unwrap()
    }
}

fn popup_line(id: &str, title: &str) -> String {
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
}

#[tokio::test]
async fn health_check_line() {
    let mut harness = StreamHarness::new(Duration::from_secs(5));

    harness
        .send_line(r#"{"jsonrpc":"2.0","method":"healthCheck","id":"h1"}"#)
        .await;

    let response = harness.read_response().await;
    assert_eq!(response["jsonrpc"], "2.0");
    assert_eq!(response["id"], "h1");
    assert_eq!(response["result"]["status"], "active");
}

#[tokio::test]
async fn popup_round_trip_over_stream() {
    let mut harness = StreamHarness::new(Duration::from_secs(5));

    harness.send_line(&popup_line("p1", "T")).await;

    let (request, responder) = harness.delivered.recv().await.unwrap();
    responder.resolve(PopupReply {
        request_id: request.request_id,
        selected_value: "yes".to_string(),
    });

    let response = harness.read_response().await;
    assert_eq!(response["id"], "p1");
    assert_eq!(response["result"]["selectedValue"], "yes");
}

#[tokio::test]
async fn suspended_popup_does_not_block_other_lines() {
    let mut harness = StreamHarness::new(Duration::from_secs(30));

    // A popup wait is outstanding...
    harness.send_line(&popup_line("p1", "T")).await;
    let (request, responder) = harness.delivered.recv().await.unwrap();

    // ...and a health check sent afterwards is answered first.
    harness
        .send_line(r#"{"jsonrpc":"2.0","method":"healthCheck","id":"h1"}"#)
        .await;
    let response = harness.read_response().await;
    assert_eq!(response["id"], "h1");

    responder.resolve(PopupReply {
        request_id: request.request_id,
        selected_value: "yes".to_string(),
    });
    let response = harness.read_response().await;
    assert_eq!(response["id"], "p1");
}

#[tokio::test]
async fn concurrent_stream_popups_correlate() {
    let mut harness = StreamHarness::new(Duration::from_secs(5));

    harness.send_line(&popup_line("a", "A")).await;
    harness.send_line(&popup_line("b", "B")).await;

    let (first, responder) = harness.delivered.recv().await.unwrap();
    let (second, _) = harness.delivered.recv().await.unwrap();
    let key_of = |title: &str| {
        [&first, &second]
            .iter()
            .find(|r| r.title == title)
            .map(|r| r.request_id.clone())
            .unwrap()
    };

    // Response delivery order follows reply arrival: B first.
    responder.resolve(PopupReply {
        request_id: key_of("B"),
        selected_value: "picked-b".to_string(),
    });
    let response = harness.read_response().await;
    assert_eq!(response["id"], "b");
    assert_eq!(response["result"]["selectedValue"], "picked-b");

    responder.resolve(PopupReply {
        request_id: key_of("A"),
        selected_value: "picked-a".to_string(),
    });
    let response = harness.read_response().await;
    assert_eq!(response["id"], "a");
    assert_eq!(response["result"]["selectedValue"], "picked-a");
}

#[tokio::test]
async fn popup_timeout_over_stream() {
    let mut harness = StreamHarness::new(Duration::from_millis(50));

    harness.send_line(&popup_line("p1", "T")).await;
    let _ = harness.delivered.recv().await.unwrap();

    let response = harness.read_response().await;
    assert_eq!(response["id"], "p1");
    assert_eq!(response["error"]["code"], -32000);
    assert_eq!(response["error"]["data"]["timeoutMs"], 50);
}

#[tokio::test]
async fn malformed_then_valid_line() {
    let mut harness = StreamHarness::new(Duration::from_secs(5));

    harness.send_line("garbage").await;
    let response = harness.read_response().await;
    assert_eq!(response["error"]["code"], -32700);
    assert_eq!(response["id"], Value::Null);

    harness
        .send_line(r#"{"jsonrpc":"2.0","method":"healthCheck","id":"h1"}"#)
        .await;
    let response = harness.read_response().await;
    assert_eq!(response["id"], "h1");
}

#[tokio::test]
async fn orphan_reply_after_timeout_is_ignored() {
    let mut harness = StreamHarness::new(Duration::from_millis(30));

    harness.send_line(&popup_line("p1", "T")).await;
    let (request, responder) = harness.delivered.recv().await.unwrap();

    // Let the entry time out, then reply anyway.
    let response = harness.read_response().await;
    assert_eq!(response["error"]["code"], -32000);

    let routed = responder.resolve(PopupReply {
        request_id: request.request_id,
        selected_value: "too-late".to_string(),
    });
    assert!(!routed, "late reply is an orphan");
    assert_eq!(harness.dispatcher.pending().pending_count(), 0);
}
