//! Loopback HTTP server.
//!
//! Every request is answered by one fallback handler:
//!
//! | Method  | Path           | Response                              |
//! |---------|----------------|---------------------------------------|
//! | GET     | `/printwindow` | the relay page (HTML)                 |
//! | GET     | anything else  | `1`                                   |
//! | POST    | any            | dispatcher JSON response              |
//! | OPTIONS | any            | CORS preflight / empty 200            |
//! | other   | any            | 405 (HEAD included)                   |
//!
//! All responses carry permissive CORS headers so any page may talk to the
//! bridge; access itself is controlled per origin by the dispatcher.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderName, Method, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::application::dispatcher::Dispatcher;

/// The page a site opens in a popup to relay `postMessage` requests.
const PRINT_WINDOW: &str = include_str!("../../assets/printwindow.html");

/// How long [`BridgeServer::stop`] lets in-flight requests finish.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

// ── Router ────────────────────────────────────────────────────────────────────

/// Builds the request router around `dispatcher`.
pub fn router(dispatcher: Arc<Dispatcher>, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::GET, Method::OPTIONS, Method::DELETE])
        .allow_headers([HeaderName::from_static("x-requested-with")])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .fallback(serve_request)
        .with_state(dispatcher)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn serve_request(
    State(dispatcher): State<Arc<Dispatcher>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    match method {
        Method::GET if uri.path() == "/printwindow" => Html(PRINT_WINDOW).into_response(),
        Method::GET => "1".into_response(),
        Method::POST => Json(dispatcher.handle(&body).await).into_response(),
        Method::OPTIONS => StatusCode::OK.into_response(),
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

// ── Server lifecycle ──────────────────────────────────────────────────────────

/// Whether the server is accepting connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    /// Not listening.  `error` holds the reason the last start failed.
    Stopped { error: Option<String> },
    Running { addr: SocketAddr },
}

struct RunningServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

/// Owns the listening socket and the serve task.
pub struct BridgeServer {
    dispatcher: Arc<Dispatcher>,
    max_body_bytes: usize,
    shutdown_grace: Duration,
    running: Option<RunningServer>,
    last_error: Option<String>,
}

impl BridgeServer {
    pub fn new(dispatcher: Arc<Dispatcher>, max_body_bytes: usize) -> Self {
        Self {
            dispatcher,
            max_body_bytes,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            running: None,
            last_error: None,
        }
    }

    /// Sets how long `stop` waits for in-flight requests.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn status(&self) -> ServerStatus {
        match &self.running {
            Some(running) => ServerStatus::Running { addr: running.addr },
            None => ServerStatus::Stopped {
                error: self.last_error.clone(),
            },
        }
    }

    /// Binds `addr` and starts serving.  Returns the bound address, which
    /// differs from `addr` when port 0 was requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.  The server stays
    /// stopped and keeps the message for [`BridgeServer::status`]; the bind
    /// is not retried.
    pub async fn start(&mut self, addr: SocketAddr) -> anyhow::Result<SocketAddr> {
        if let Some(running) = &self.running {
            warn!(addr = %running.addr, "server already running");
            return Ok(running.addr);
        }

        let bound = TcpListener::bind(addr)
            .await
            .and_then(|listener| Ok((listener.local_addr()?, listener)));
        let (local, listener) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                let message = format!("could not listen on {addr}: {e}");
                error!("{message}");
                self.last_error = Some(message);
                return Err(e).with_context(|| format!("failed to bind {addr}"));
            }
        };

        let app = router(Arc::clone(&self.dispatcher), self.max_body_bytes);
        let (shutdown, signal) = oneshot::channel::<()>();
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = signal.await;
        });
        let task = tokio::spawn(async move { server.await });

        info!(addr = %local, "web print bridge listening");
        self.last_error = None;
        self.running = Some(RunningServer {
            addr: local,
            shutdown,
            task,
        });
        Ok(local)
    }

    /// Closes the listener, asks open connections to finish and closes the
    /// serial port.  Requests still running after the shutdown grace (a
    /// pending consent prompt, a slow device) are abandoned rather than
    /// awaited.  Stopping a stopped server does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the serve task failed or panicked.
    pub async fn stop(&mut self) -> anyhow::Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        let _ = running.shutdown.send(());
        let mut task = running.task;
        let served = match tokio::time::timeout(self.shutdown_grace, &mut task).await {
            Ok(joined) => joined.context("server task panicked")?,
            Err(_) => {
                warn!(
                    addr = %running.addr,
                    grace_ms = self.shutdown_grace.as_millis() as u64,
                    "requests still in flight, abandoning them"
                );
                task.abort();
                let _ = task.await;
                Ok(())
            }
        };
        self.dispatcher.close_serial();
        info!(addr = %running.addr, "web print bridge stopped");
        served.context("server failed")
    }
}
