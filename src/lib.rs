//! popupd: interactive popup prompts over JSON-RPC 2.0.
//!
//! A host application embeds [`PopupServer`], attaches a [`PopupSink`] that
//! presents prompts to a user, and routes the user's eventual choice back
//! through the [`PopupResponder`]. The server speaks JSON-RPC 2.0 over two
//! concurrent transports (newline-delimited stdio and HTTP) and correlates
//! each `triggerPopup` request with its out-of-band reply via an internally
//! keyed pending table.
//!
//! # Architecture
//!
//! ```text
//! stdio lines ─┐                                    ┌─ PopupSink (host UI)
//!              ├─> Dispatcher ──register──> PendingTable
//! HTTP /mcp  ──┘    decode / validate / route   │        ▲
//!                        │                      │        │ resolve(key, reply)
//!                        └───── suspended ◀─────┘   PopupResponder
//! ```
//!
//! Each registered wait is settled exactly once by the first of: the
//! external reply, the per-entry timeout, the safety-net sweep, or shutdown
//! disposal. Awaiting one popup never blocks other requests on either
//! transport.
//!
//! # Methods
//!
//! - `healthCheck`: immediate status/uptime/version payload.
//! - `triggerPopup`: suspends until the external actor replies with a
//!   `selectedValue`, or fails with an application error on timeout or
//!   unavailability.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod pending;
pub mod protocol;
pub mod server;
pub mod sink;
pub mod stdio;
pub mod validator;

pub use config::Config;
pub use dispatch::{Dispatcher, RequestContext};
pub use error::{PopupError, Result};
pub use pending::PendingTable;
pub use protocol::{PopupOption, PopupReply, PopupRequest, Transport};
pub use server::{PopupServer, ServerHealth};
pub use sink::{PopupResponder, PopupSink};
