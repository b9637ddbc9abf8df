//! HTTP server and graceful shutdown.
//!
//! # Shutdown
//!
//! On SIGTERM or Ctrl-C (or the future given to
//! [`Server::serve_with_shutdown`]) the server:
//! 1. Stops `listener.accept()`; no new connections are made.
//! 2. Asks every open connection to finish its in-flight request and close.
//! 3. Waits up to the grace period (`app.shutdown_grace_secs`) for them.
//! 4. Aborts what is left and reports it as [`Error::DrainTimeout`].
//!
//! Set your orchestrator's termination grace period longer than this one.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, HttpError};
use crate::request::PeerAddr;
use crate::router::Router;

const DEFAULT_GRACE: Duration = Duration::from_secs(5);
const DEFAULT_BODY_LIMIT: usize = 4 << 20;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
    grace: Duration,
    body_limit: usize,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    ///
    /// ```rust,no_run
    /// use torii::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        let addr: SocketAddr = addr.parse().expect("invalid socket address");
        Self { addr, grace: DEFAULT_GRACE, body_limit: DEFAULT_BODY_LIMIT }
    }

    /// All interfaces on `app.port`, draining for `app.shutdown_grace_secs`
    /// and reading at most `app.max_body_bytes` per request body.
    pub fn from_config(config: &Config) -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], config.app.port)),
            grace: config.app.shutdown_grace(),
            body_limit: config.app.max_body_bytes,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Bodies longer than `limit` bytes are answered with `413` before any
    /// route runs.
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Serves until SIGTERM or Ctrl-C, then shuts down gracefully.
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        self.serve_with_shutdown(router, shutdown_signal()).await
    }

    /// Serves until `signal` resolves, then shuts down gracefully.
    pub async fn serve_with_shutdown(
        self,
        router: Router,
        signal: impl Future<Output = ()> + Send,
    ) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_listener(listener, router, signal).await
    }

    /// Serves on an already bound listener; the configured address is
    /// ignored. Useful with port `0`.
    pub async fn serve_listener(
        self,
        listener: TcpListener,
        router: Router,
        signal: impl Future<Output = ()> + Send,
    ) -> Result<(), Error> {
        info!(addr = %listener.local_addr()?, "torii listening");
        let router = Arc::new(router);
        let (closing_tx, closing_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();

        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Check shutdown first so a signal stops accepting right away,
                // even with connections queued.
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, peer) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };
                    tasks.spawn(serve_connection(
                        Arc::clone(&router),
                        stream,
                        peer,
                        self.body_limit,
                        closing_rx.clone(),
                    ));
                }

                // Reap finished connection tasks so the set stays bounded.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        drop(listener);
        let _ = closing_tx.send(true);

        let drained = tokio::time::timeout(self.grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            let abandoned = tasks.len();
            tasks.abort_all();
            warn!(abandoned, grace = ?self.grace, "grace period elapsed, aborting connections");
            return Err(Error::DrainTimeout { abandoned });
        }

        info!("torii stopped");
        Ok(())
    }
}

async fn serve_connection(
    router: Arc<Router>,
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    body_limit: usize,
    mut closing: watch::Receiver<bool>,
) {
    let svc = service_fn(move |req| {
        let router = Arc::clone(&router);
        async move { dispatch(router, req, peer, body_limit).await }
    });

    // `auto::Builder` serves HTTP/1.1 and HTTP/2, whichever the client speaks.
    let builder = ConnBuilder::new(TokioExecutor::new());
    let conn = builder.serve_connection(TokioIo::new(stream), svc);
    tokio::pin!(conn);

    let result = tokio::select! {
        res = conn.as_mut() => res,
        _ = closing.changed() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = result {
        debug!(%peer, "connection error: {e}");
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Buffers the body up to `body_limit`, tags the peer address and hands the
/// request to the router. Never fails: every problem becomes a response.
async fn dispatch(
    router: Arc<Router>,
    req: hyper::Request<Incoming>,
    peer: SocketAddr,
    body_limit: usize,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (mut parts, body) = req.into_parts();
    parts.extensions.insert(PeerAddr(peer));

    let body = match Limited::new(body, body_limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let err = if e.downcast_ref::<LengthLimitError>().is_some() {
                debug!(%peer, limit = body_limit, "request body over the limit");
                HttpError::new(StatusCode::PAYLOAD_TOO_LARGE)
            } else {
                debug!(%peer, "failed to read request body: {e}");
                HttpError::new(StatusCode::BAD_REQUEST)
            };
            let req = http::Request::from_parts(parts, Bytes::new());
            return Ok(router.reject_raw(req, err));
        }
    };

    Ok(router.handle(http::Request::from_parts(parts, body)).await)
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or SIGINT (Ctrl-C). Only Ctrl-C exists on
/// Windows.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
