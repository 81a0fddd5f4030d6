//! Pending-response correlation table.
//!
//! Event-driven request/reply registry using oneshot channels, shared
//! between the dispatcher (which registers a pending entry and suspends on
//! the receiver) and the host's reply path (which resolves entries by
//! internal request id). No polling; the waiting dispatcher is woken the
//! moment a reply, timeout, or disposal settles its entry.
//!
//! Removal from the map under the lock is the single state transition: for
//! any key, exactly one of resolve / timeout / dispose wins the removal and
//! performs the settlement; the other contenders observe "already removed"
//! and no-op.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{PopupError, Result};
use crate::protocol::{JsonRpcResponse, Transport, APPLICATION_ERROR};

/// Default bound on every popup wait. A configuration point, not a law of
/// the protocol.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default cadence of the safety-net sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct PendingEntry {
    /// Caller-supplied JSON-RPC id, echoed back in the settlement envelope.
    caller_id: Value,
    transport: Transport,
    /// HTTP origin, kept for diagnostics only.
    origin: Option<String>,
    tx: oneshot::Sender<JsonRpcResponse>,
    registered_at: Instant,
    deadline: Instant,
    timer: Option<JoinHandle<()>>,
}

/// Snapshot of one pending entry, for operator diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSnapshot {
    pub request_id: String,
    pub transport: Transport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub age_ms: u64,
}

/// Registry of requests awaiting an out-of-band reply.
///
/// Table size equals the number of requests currently suspended; every
/// entry is settled exactly once, by whichever of reply, per-entry timer,
/// sweep, or disposal removes it first.
pub struct PendingTable {
    entries: Mutex<HashMap<String, PendingEntry>>,
    timeout: Duration,
    sweep: Mutex<Option<JoinHandle<()>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_RESPONSE_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            timeout,
            sweep: Mutex::new(None),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a pending entry under `request_id` and return the receiver
    /// the caller suspends on. Spawns a per-entry timer that settles the
    /// entry with a timeout error if no reply arrives in time.
    ///
    /// Fails if the key already exists; internal keys are unique for the
    /// process lifetime, so a collision is a programmer error and is never
    /// silently overwritten.
    pub fn register(
        self: &Arc<Self>,
        request_id: &str,
        caller_id: Value,
        transport: Transport,
        origin: Option<String>,
    ) -> Result<oneshot::Receiver<JsonRpcResponse>> {
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        let deadline = now + self.timeout;

        let mut entries = self.entries.lock().expect("pending table lock poisoned");
        if entries.contains_key(request_id) {
            error!(request_id, "Duplicate pending key, refusing to overwrite");
            return Err(PopupError::DuplicateKey(request_id.to_string()));
        }

        let timer = {
            let table = Arc::clone(self);
            let key = request_id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                table.expire(&key);
            })
        };

        entries.insert(
            request_id.to_string(),
            PendingEntry {
                caller_id,
                transport,
                origin,
                tx,
                registered_at: now,
                deadline,
                timer: Some(timer),
            },
        );
        debug!(request_id, %transport, "Pending response registered");

        Ok(rx)
    }

    /// Route an external reply to its suspended caller, wrapping `payload`
    /// in a success envelope that echoes the original caller id.
    ///
    /// Returns `false` for orphan replies (the entry already timed out,
    /// was already resolved, or was never registered). Orphans are logged
    /// and otherwise ignored; there is no waiting caller to notify.
    pub fn resolve(&self, request_id: &str, payload: Value) -> bool {
        let entry = {
            let mut entries = self.entries.lock().expect("pending table lock poisoned");
            entries.remove(request_id)
        };

        let Some(entry) = entry else {
            warn!(request_id, "No pending entry for reply, dropping orphan");
            return false;
        };

        if let Some(timer) = &entry.timer {
            timer.abort();
        }

        info!(request_id, transport = %entry.transport, "Response routed");

        let response = JsonRpcResponse::success(entry.caller_id, payload);
        if entry.tx.send(response).is_err() {
            debug!(request_id, "Waiting caller gone before settlement");
        }
        true
    }

    /// Settle an entry with a timeout error. Idempotent against a racing
    /// `resolve` or disposal; returns whether this call won the removal.
    fn expire(&self, request_id: &str) -> bool {
        let entry = {
            let mut entries = self.entries.lock().expect("pending table lock poisoned");
            entries.remove(request_id)
        };

        let Some(entry) = entry else {
            return false;
        };

        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        warn!(request_id, transport = %entry.transport, timeout_ms, "Pending response timed out");

        let response = JsonRpcResponse::error_with_data(
            entry.caller_id,
            APPLICATION_ERROR,
            "Popup response timeout",
            json!({ "requestId": request_id, "timeoutMs": timeout_ms }),
        );
        if entry.tx.send(response).is_err() {
            debug!(request_id, "Waiting caller gone before timeout settlement");
        }
        true
    }

    /// Start the periodic sweep that evicts entries whose deadline passed
    /// but whose timer never fired (clock skew, missed timers). Replaces
    /// any previous sweep task.
    pub fn start_sweep(self: &Arc<Self>, interval: Duration) {
        let table = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let swept = table.sweep_expired();
                if swept > 0 {
                    warn!(count = swept, "Swept expired pending responses");
                }
            }
        });

        let mut sweep = self.sweep.lock().expect("sweep handle lock poisoned");
        if let Some(old) = sweep.replace(handle) {
            old.abort();
        }
    }

    /// One sweep pass: settle every overdue entry as a timeout. Returns the
    /// number of entries this pass actually settled.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let overdue: Vec<String> = {
            let entries = self.entries.lock().expect("pending table lock poisoned");
            entries
                .iter()
                .filter(|(_, e)| e.deadline <= now)
                .map(|(k, _)| k.clone())
                .collect()
        };

        overdue.iter().filter(|key| self.expire(key)).count()
    }

    /// Settle every still-pending entry with a disposal error and stop the
    /// sweep. Used at shutdown; safe to call while requests are in flight
    /// and with settlement failures (they are logged and swallowed).
    pub fn dispose_all(&self) {
        if let Some(sweep) = self
            .sweep
            .lock()
            .expect("sweep handle lock poisoned")
            .take()
        {
            sweep.abort();
        }

        let drained: Vec<(String, PendingEntry)> = {
            let mut entries = self.entries.lock().expect("pending table lock poisoned");
            entries.drain().collect()
        };

        if drained.is_empty() {
            return;
        }
        info!(count = drained.len(), "Disposing pending responses");

        for (request_id, entry) in drained {
            if let Some(timer) = &entry.timer {
                timer.abort();
            }
            let response = JsonRpcResponse::error_with_data(
                entry.caller_id,
                APPLICATION_ERROR,
                "Server shutting down",
                json!({ "requestId": request_id }),
            );
            if entry.tx.send(response).is_err() {
                debug!(request_id = %request_id, "Waiting caller gone before disposal settlement");
            }
        }
    }

    /// Number of requests currently awaiting an external reply.
    pub fn pending_count(&self) -> usize {
        self.entries
            .lock()
            .expect("pending table lock poisoned")
            .len()
    }

    /// Diagnostic snapshot of all pending entries.
    pub fn snapshot(&self) -> Vec<PendingSnapshot> {
        let now = Instant::now();
        let entries = self.entries.lock().expect("pending table lock poisoned");
        entries
            .iter()
            .map(|(request_id, e)| PendingSnapshot {
                request_id: request_id.clone(),
                transport: e.transport,
                origin: e.origin.clone(),
                age_ms: u64::try_from(now.duration_since(e.registered_at).as_millis())
                    .unwrap_or(u64::MAX),
            })
            .collect()
    }

    /// Insert an entry with no per-entry timer, so sweep behavior can be
    /// exercised in isolation.
    #[cfg(test)]
    fn register_unmonitored(
        &self,
        request_id: &str,
        caller_id: Value,
        transport: Transport,
    ) -> oneshot::Receiver<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("pending table lock poisoned");
        entries.insert(
            request_id.to_string(),
            PendingEntry {
                caller_id,
                transport,
                origin: None,
                tx,
                registered_at: now,
                deadline: now + self.timeout,
                timer: None,
            },
        );
        rx
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}
