//! External trigger sink seam.
//!
//! The host application implements [`PopupSink`] to present prompts to a
//! user (webview, terminal pane, whatever the host has). Delivery is
//! fire-and-forget from the dispatcher's point of view: a sink error is
//! logged and the waiting caller recovers through the pending table's
//! timeout path, never through the delivery task.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::pending::PendingTable;
use crate::protocol::{PopupReply, PopupRequest};

/// Receives validated, internally-tagged popup requests.
///
/// Exactly one reply per request is expected back through the
/// [`PopupResponder`] handed over alongside the request; never replying is
/// fine (the entry times out).
#[async_trait]
pub trait PopupSink: Send + Sync {
    async fn deliver(&self, request: PopupRequest, responder: PopupResponder)
        -> anyhow::Result<()>;
}

/// Handle the sink uses to route the user's eventual reply back into the
/// pending table. Cheap to clone; each clone resolves against the same
/// table.
#[derive(Clone)]
pub struct PopupResponder {
    pending: Arc<PendingTable>,
}

impl PopupResponder {
    pub fn new(pending: Arc<PendingTable>) -> Self {
        Self { pending }
    }

    /// Deliver a reply for the given internal request id.
    ///
    /// Returns `false` if the request was no longer pending (already
    /// resolved, timed out, or disposed): an orphan reply, logged by the
    /// table and otherwise ignored.
    pub fn resolve(&self, reply: PopupReply) -> bool {
        self.pending.resolve(
            &reply.request_id,
            json!({ "selectedValue": reply.selected_value }),
        )
    }
}
