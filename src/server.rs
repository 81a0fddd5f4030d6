//! Server lifecycle: owns the dispatcher, the pending table, and both
//! transports.
//!
//! A host constructs a [`PopupServer`] from a [`Config`], attaches its
//! [`PopupSink`], and calls [`PopupServer::start`]. A configuration-changed
//! notification maps to [`PopupServer::restart`], which fully stops and
//! restarts both transports (disposing any in-flight waits).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::{PopupError, Result};
use crate::http::{self, HttpState};
use crate::pending::PendingTable;
use crate::protocol::PopupReply;
use crate::sink::{PopupResponder, PopupSink};
use crate::stdio;

// ============================================================================
// Health reporting
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpStatus {
    Listening,
    Error,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StdioStatus {
    Active,
    Error,
    Disabled,
}

/// Operator-facing health snapshot, served at `GET /health`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerHealth {
    pub status: &'static str,
    pub http_status: HttpStatus,
    pub stdio_status: StdioStatus,
    pub uptime: u64,
    pub active_connections: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Mutable server status shared with the transport tasks.
pub struct ServerState {
    started_at: Instant,
    http_enabled: AtomicBool,
    stdio_enabled: AtomicBool,
    http_listening: AtomicBool,
    stdio_active: AtomicBool,
    active_connections: AtomicUsize,
    last_error: Mutex<Option<String>>,
}

impl ServerState {
    fn new() -> Self {
        Self {
            started_at: Instant::now(),
            http_enabled: AtomicBool::new(false),
            stdio_enabled: AtomicBool::new(false),
            http_listening: AtomicBool::new(false),
            stdio_active: AtomicBool::new(false),
            active_connections: AtomicUsize::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, message: &str) {
        *self.last_error.lock().expect("last_error lock poisoned") = Some(message.to_string());
    }

    fn set_enabled(&self, http: bool, stdio: bool) {
        self.http_enabled.store(http, Ordering::Relaxed);
        self.stdio_enabled.store(stdio, Ordering::Relaxed);
    }

    pub(crate) fn set_http_listening(&self, listening: bool) {
        self.http_listening.store(listening, Ordering::Relaxed);
    }

    pub(crate) fn set_stdio_active(&self, active: bool) {
        self.stdio_active.store(active, Ordering::Relaxed);
    }

    fn http_status(&self) -> HttpStatus {
        if !self.http_enabled.load(Ordering::Relaxed) {
            HttpStatus::Disabled
        } else if self.http_listening.load(Ordering::Relaxed) {
            HttpStatus::Listening
        } else {
            HttpStatus::Error
        }
    }

    fn stdio_status(&self) -> StdioStatus {
        if !self.stdio_enabled.load(Ordering::Relaxed) {
            StdioStatus::Disabled
        } else if self.stdio_active.load(Ordering::Relaxed) {
            StdioStatus::Active
        } else {
            StdioStatus::Error
        }
    }

    fn is_running(&self) -> bool {
        let http_ok = !self.http_enabled.load(Ordering::Relaxed)
            || self.http_listening.load(Ordering::Relaxed);
        let stdio_ok = !self.stdio_enabled.load(Ordering::Relaxed)
            || self.stdio_active.load(Ordering::Relaxed);
        http_ok && stdio_ok
    }

    pub fn health(&self) -> ServerHealth {
        ServerHealth {
            status: if self.is_running() { "active" } else { "inactive" },
            http_status: self.http_status(),
            stdio_status: self.stdio_status(),
            uptime: u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            last_error: self
                .last_error
                .lock()
                .expect("last_error lock poisoned")
                .clone(),
        }
    }
}

// ============================================================================
// PopupServer
// ============================================================================

/// The popup RPC server: both transports plus the correlation core.
pub struct PopupServer {
    config: Config,
    pending: Arc<PendingTable>,
    dispatcher: Arc<Dispatcher>,
    state: Arc<ServerState>,
    shutdown: Option<watch::Sender<bool>>,
    http_task: Option<JoinHandle<()>>,
    stdio_task: Option<JoinHandle<()>>,
    bound_addr: Option<SocketAddr>,
}

impl PopupServer {
    pub fn new(config: Config) -> Self {
        let pending = Arc::new(PendingTable::with_timeout(config.response_timeout));
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&pending)));
        Self {
            config,
            pending,
            dispatcher,
            state: Arc::new(ServerState::new()),
            shutdown: None,
            http_task: None,
            stdio_task: None,
            bound_addr: None,
        }
    }

    /// Attach the external trigger sink that presents popups to a user.
    pub fn attach_sink(&self, sink: Arc<dyn PopupSink>) {
        self.dispatcher.attach_sink(sink);
    }

    /// Handle for routing out-of-band popup replies back to their callers.
    pub fn responder(&self) -> PopupResponder {
        self.dispatcher.responder()
    }

    /// Convenience wrapper around [`PopupResponder::resolve`].
    pub fn resolve_popup(&self, reply: PopupReply) -> bool {
        self.responder().resolve(reply)
    }

    pub fn health(&self) -> ServerHealth {
        self.state.health()
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running() && self.shutdown.is_some()
    }

    /// Actual bound HTTP address (useful with port 0 auto-assignment).
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.bound_addr
    }

    pub fn pending_count(&self) -> usize {
        self.pending.pending_count()
    }

    /// Start the configured transports and the pending-table sweep.
    pub async fn start(&mut self) -> Result<()> {
        if !self.config.http.enabled && !self.config.stdio.enabled {
            let message = "At least one transport must be enabled";
            self.state.record_error(message);
            return Err(PopupError::Transport(message.to_string()));
        }

        info!(
            http = self.config.http.enabled,
            stdio = self.config.stdio.enabled,
            timeout_secs = self.config.response_timeout.as_secs(),
            "Popup RPC server starting"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.state
            .set_enabled(self.config.http.enabled, self.config.stdio.enabled);
        self.pending.start_sweep(self.config.sweep_interval);

        if self.config.http.enabled {
            let bind_addr = format!("{}:{}", self.config.http.host, self.config.http.port);
            let listener = match TcpListener::bind(&bind_addr).await {
                Ok(l) => l,
                Err(e) => {
                    let message = format!("HTTP transport failed to bind {bind_addr}: {e}");
                    self.state.record_error(&message);
                    return Err(PopupError::Transport(message));
                }
            };
            let local_addr = listener.local_addr()?;
            self.bound_addr = Some(local_addr);
            info!(addr = %local_addr, "HTTP transport listening");

            let http_state = HttpState {
                dispatcher: Arc::clone(&self.dispatcher),
                server: Arc::clone(&self.state),
            };
            let state = Arc::clone(&self.state);
            let rx = shutdown_rx.clone();
            state.set_http_listening(true);
            self.http_task = Some(tokio::spawn(async move {
                if let Err(e) = http::serve(listener, http_state, rx).await {
                    error!(error = %e, "HTTP transport error");
                    state.record_error(&e.to_string());
                }
                state.set_http_listening(false);
            }));
        }

        if self.config.stdio.enabled {
            let dispatcher = Arc::clone(&self.dispatcher);
            let state = Arc::clone(&self.state);
            let rx = shutdown_rx.clone();
            state.set_stdio_active(true);
            info!("Stdio transport active");
            self.stdio_task = Some(tokio::spawn(async move {
                if let Err(e) = stdio::run_stdio(dispatcher, rx).await {
                    error!(error = %e, "Stdio transport error");
                    state.record_error(&e.to_string());
                }
                state.set_stdio_active(false);
            }));
        }

        self.shutdown = Some(shutdown_tx);
        info!("Popup RPC server started");
        Ok(())
    }

    /// Stop both transports and settle every pending entry with a disposal
    /// error. Safe to call with requests in flight and safe to call twice.
    ///
    /// Disposal happens before the transport tasks are awaited: suspended
    /// dispatches settle immediately, so draining cannot deadlock on waits
    /// that only shutdown itself would have released.
    pub async fn stop(&mut self) {
        info!("Popup RPC server stopping");

        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        self.pending.dispose_all();

        if let Some(task) = self.http_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.stdio_task.take() {
            let _ = task.await;
        }

        self.state.set_http_listening(false);
        self.state.set_stdio_active(false);
        self.bound_addr = None;
        info!("Popup RPC server stopped");
    }

    /// Full stop/start cycle with a new configuration, triggered by an
    /// external configuration-changed notification.
    pub async fn restart(&mut self, config: Config) -> Result<()> {
        info!("Configuration changed, restarting transports");
        self.stop().await;
        self.config = config;
        self.start().await
    }
}
