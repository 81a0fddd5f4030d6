//! Request dispatcher: raw bytes in, raw bytes out.
//!
//! Decode, validate, route, await (for the long-lived method), serialize.
//! Every failure at every step is converted to a wire-format error response
//! here; nothing propagates to a transport adapter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::pending::PendingTable;
use crate::protocol::{
    JsonRpcRequest, JsonRpcResponse, PopupRequest, Transport, TriggerPopupParams,
    APPLICATION_ERROR, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::sink::{PopupResponder, PopupSink};
use crate::validator;

/// Transport-scoped context built by each adapter and passed explicitly;
/// transport identity is never inferred from payload content.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub transport: Transport,
    /// HTTP request origin, used for egress validation only.
    pub origin: Option<String>,
}

impl RequestContext {
    pub fn stdio() -> Self {
        Self {
            transport: Transport::Stdio,
            origin: None,
        }
    }

    pub fn http(origin: Option<String>) -> Self {
        Self {
            transport: Transport::Http,
            origin,
        }
    }
}

/// Routes decoded requests to method handlers.
///
/// Stateless across requests except for the counter feeding internal key
/// generation and the attached sink.
pub struct Dispatcher {
    pending: Arc<PendingTable>,
    sink: RwLock<Option<Arc<dyn PopupSink>>>,
    request_counter: AtomicU64,
    started_at: Instant,
}

impl Dispatcher {
    pub fn new(pending: Arc<PendingTable>) -> Self {
        Self {
            pending,
            sink: RwLock::new(None),
            request_counter: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Attach the external trigger sink. Until one is attached,
    /// `triggerPopup` answers "Popup system not available".
    pub fn attach_sink(&self, sink: Arc<dyn PopupSink>) {
        *self.sink.write().expect("sink lock poisoned") = Some(sink);
        info!("Popup sink attached");
    }

    pub fn has_sink(&self) -> bool {
        self.sink.read().expect("sink lock poisoned").is_some()
    }

    pub fn pending(&self) -> &Arc<PendingTable> {
        &self.pending
    }

    pub fn responder(&self) -> PopupResponder {
        PopupResponder::new(Arc::clone(&self.pending))
    }

    /// Process one raw request and return the serialized response.
    ///
    /// This is the one place a request may suspend (awaiting an external
    /// popup reply); it never blocks the transport's ability to service
    /// other requests.
    pub async fn dispatch(&self, raw: &str, ctx: RequestContext) -> String {
        // Decode. Parse errors cannot be attributed to an id.
        let decoded: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, transport = %ctx.transport, "Failed to parse request");
                return JsonRpcResponse::error(
                    Value::Null,
                    PARSE_ERROR,
                    "Parse error: Invalid JSON",
                )
                .to_json();
            }
        };

        // Validate, echoing the caller's id if one was decodable.
        let decoded_id = decoded.get("id").cloned().unwrap_or(Value::Null);
        if let Err(e) = validator::validate_request(&decoded) {
            return JsonRpcResponse::error(decoded_id, INVALID_PARAMS, e.to_string()).to_json();
        }
        if !validator::validate_origin(ctx.origin.as_deref()) {
            warn!(origin = ?ctx.origin, "Rejected request origin");
            return JsonRpcResponse::error(decoded_id, INVALID_PARAMS, "Invalid request origin")
                .to_json();
        }

        let request: JsonRpcRequest = match serde_json::from_value(decoded) {
            Ok(r) => r,
            Err(e) => {
                // Validation accepted the envelope, so this cannot happen.
                error!(error = %e, "Validated request failed to decode");
                return JsonRpcResponse::error(decoded_id, INTERNAL_ERROR, "Internal error")
                    .to_json();
            }
        };

        let method = request.method.clone();
        match method.as_str() {
            "healthCheck" => self.handle_health_check(request),
            "triggerPopup" => self.handle_trigger_popup(request, &ctx).await,
            // Unreachable in practice: validation rejects unknown methods.
            other => JsonRpcResponse::error(
                request.id,
                METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            )
            .to_json(),
        }
    }

    fn handle_health_check(&self, request: JsonRpcRequest) -> String {
        let uptime_ms = u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        let result = json!({
            "status": "active",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "uptime": uptime_ms,
            "version": env!("CARGO_PKG_VERSION"),
        });
        JsonRpcResponse::success(request.id, result).to_json()
    }

    async fn handle_trigger_popup(&self, request: JsonRpcRequest, ctx: &RequestContext) -> String {
        // Nothing is registered when no sink is attached; the caller gets
        // an immediate, fixed error instead of a guaranteed timeout.
        let sink = match self.sink.read().expect("sink lock poisoned").clone() {
            Some(s) => s,
            None => {
                warn!(transport = %ctx.transport, "Popup requested but no sink attached");
                return JsonRpcResponse::error(
                    request.id,
                    APPLICATION_ERROR,
                    "Popup system not available",
                )
                .to_json();
            }
        };

        let params: TriggerPopupParams = match serde_json::from_value(request.params.clone()) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "Validated params failed to decode");
                return JsonRpcResponse::error(request.id, INTERNAL_ERROR, "Internal error")
                    .to_json();
            }
        };

        let request_id = self.next_request_id();
        let rx = match self.pending.register(
            &request_id,
            request.id.clone(),
            ctx.transport,
            ctx.origin.clone(),
        ) {
            Ok(rx) => rx,
            Err(e) => {
                error!(error = %e, "Failed to register pending response");
                return JsonRpcResponse::error(request.id, INTERNAL_ERROR, "Internal error")
                    .to_json();
            }
        };

        info!(
            request_id = %request_id,
            id = %request.id,
            transport = %ctx.transport,
            workspace = %params.workspace_path,
            title = %params.title,
            "Popup request registered"
        );

        // Fire-and-forget handoff. The await below depends only on the
        // pending table; a sink failure is recovered by the timeout path.
        let delivery = PopupRequest::new(request_id.clone(), params);
        let responder = self.responder();
        tokio::spawn(async move {
            let key = delivery.request_id.clone();
            if let Err(e) = sink.deliver(delivery, responder).await {
                error!(request_id = %key, error = %e, "Popup sink delivery failed");
            }
        });

        match rx.await {
            Ok(response) => response.to_json(),
            // The table settles every entry before dropping a sender.
            Err(_) => {
                error!(request_id = %request_id, "Pending channel closed without settlement");
                JsonRpcResponse::error(request.id, INTERNAL_ERROR, "Internal error").to_json()
            }
        }
    }

    /// Internal correlation keys: monotonic counter plus a timestamp,
    /// collision-free within the process lifetime.
    fn next_request_id(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let counter = self.request_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("mcp_{millis}_{counter}")
    }
}
