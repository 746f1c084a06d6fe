//! HTTP server, per-client connection ceiling and graceful shutdown.
//!
//! # Shutdown
//!
//! On SIGTERM or Ctrl-C (or when the future given to
//! [`Server::serve_with_shutdown`] resolves) the server:
//! 1. stops accepting connections;
//! 2. asks every open connection to finish its in-flight request and close;
//! 3. returns once all connection tasks are done.
//!
//! # Connection ceiling
//!
//! [`Server::max_conns_per_ip`] caps how many connections one peer address
//! may hold open at once. A connection over the ceiling is answered with a
//! bare `429 Too Many Requests` and closed before any request is read.

use std::convert::Infallible;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::app::App;
use crate::error::Error;
use crate::response::{IntoResponse, Response};
use crate::router::Router;

/// The HTTP server.
///
/// ```rust,no_run
/// use trellis::{Context, Router, Server};
///
/// #[tokio::main]
/// async fn main() -> trellis::Result<()> {
///     let app = Router::new().get("/index", |_ctx: Context| async { "GET: index" });
///     Server::bind("0.0.0.0:8000").max_conns_per_ip(1).serve(app).await
/// }
/// ```
pub struct Server {
    listen: Listen,
    max_conns_per_ip: usize,
}

enum Listen {
    Addr(String),
    Listener(TcpListener),
}

impl Server {
    /// Configures the server to bind to `addr` (`host:port`) when it starts
    /// serving. An address that does not parse or bind makes `serve` fail
    /// with [`Error::Io`].
    pub fn bind(addr: impl Into<String>) -> Self {
        Self { listen: Listen::Addr(addr.into()), max_conns_per_ip: 0 }
    }

    /// Serves on an already bound listener, e.g. one bound to port 0.
    pub fn from_listener(listener: TcpListener) -> Self {
        Self { listen: Listen::Listener(listener), max_conns_per_ip: 0 }
    }

    /// Caps the number of concurrent connections per peer IP. `0`, the
    /// default, means no limit.
    pub fn max_conns_per_ip(mut self, limit: usize) -> Self {
        self.max_conns_per_ip = limit;
        self
    }

    /// Builds `router` and serves it until SIGTERM or Ctrl-C.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the router is invalid (nothing is bound then) and
    /// [`Error::Io`] if the address cannot be bound.
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        self.serve_with_shutdown(router, shutdown_signal()).await
    }

    /// Like [`serve`](Server::serve), stopping when `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, router: Router, signal: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let app = Arc::new(router.build()?);
        let listener = match self.listen {
            Listen::Addr(addr) => TcpListener::bind(addr.as_str()).await?,
            Listen::Listener(listener) => listener,
        };
        let limiter = ConnectionLimiter::new(self.max_conns_per_ip);

        info!(
            addr = %listener.local_addr()?,
            max_conns_per_ip = self.max_conns_per_ip,
            "trellis listening"
        );

        let (stop_tx, stop_rx) = watch::channel(());
        let mut tasks = tokio::task::JoinSet::new();

        tokio::pin!(signal);

        loop {
            tokio::select! {
                biased;

                () = &mut signal => {
                    info!(
                        in_flight = tasks.len(),
                        "shutdown signal received, draining connections"
                    );
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    match limiter.try_acquire(remote_addr.ip()) {
                        Some(permit) => {
                            let app = Arc::clone(&app);
                            let stop = stop_rx.clone();
                            tasks.spawn(serve_connection(app, stream, remote_addr, permit, stop));
                        }
                        None => {
                            warn!(peer = %remote_addr, "connection limit reached, rejecting");
                            tasks.spawn(reject(stream));
                        }
                    }
                }

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Dropping the listener first refuses new connections at the socket.
        drop(listener);
        let _ = stop_tx.send(());
        while tasks.join_next().await.is_some() {}

        info!("trellis stopped");
        Ok(())
    }
}

async fn serve_connection(
    app: Arc<App>,
    stream: TcpStream,
    remote_addr: SocketAddr,
    _permit: Option<ConnectionPermit>,
    mut stop: watch::Receiver<()>,
) {
    let svc = service_fn(move |req| dispatch(Arc::clone(&app), req, remote_addr));
    let builder = ConnBuilder::new(TokioExecutor::new());
    let conn = builder.serve_connection(TokioIo::new(stream), svc);
    tokio::pin!(conn);

    let res = tokio::select! {
        res = conn.as_mut() => res,
        _ = stop.changed() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = res {
        debug!(peer = %remote_addr, "connection error: {e}");
    }
}

async fn reject(mut stream: TcpStream) {
    let response = Response::builder()
        .status(StatusCode::TOO_MANY_REQUESTS)
        .text("Too Many Requests");
    if let Err(e) = response.write_to(&mut stream).await {
        debug!("failed to write rejection: {e}");
    }
}

/// Routes one request through the app. Every failure is turned into a
/// response, so hyper never sees an error.
async fn dispatch(
    app: Arc<App>,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(peer = %remote_addr, "failed to read request body: {e}");
            return Ok(Error::bad_request("invalid request body").into_response().into_http());
        }
    };

    let response = app.handle(http::Request::from_parts(parts, body), remote_addr).await;
    Ok(response.into_http())
}

// ── Connection ceiling ───────────────────────────────────────────────────────

struct ConnectionLimiter {
    limit: usize,
    active: Arc<DashMap<IpAddr, usize>>,
}

/// Held by a connection task; releases its slot when dropped.
struct ConnectionPermit {
    ip: IpAddr,
    active: Arc<DashMap<IpAddr, usize>>,
}

impl ConnectionLimiter {
    fn new(limit: usize) -> Self {
        Self { limit, active: Arc::new(DashMap::new()) }
    }

    /// `None` when `ip` is at the ceiling; `Some(None)` when no ceiling is set.
    fn try_acquire(&self, ip: IpAddr) -> Option<Option<ConnectionPermit>> {
        if self.limit == 0 {
            return Some(None);
        }
        let mut count = self.active.entry(ip).or_insert(0);
        if *count >= self.limit {
            return None;
        }
        *count += 1;
        Some(Some(ConnectionPermit { ip, active: Arc::clone(&self.active) }))
    }

    #[cfg(test)]
    fn active(&self, ip: IpAddr) -> usize {
        self.active.get(&ip).map_or(0, |count| *count)
    }
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        if let Some(mut count) = self.active.get_mut(&self.ip) {
            *count = count.saturating_sub(1);
        }
        self.active.remove_if(&self.ip, |_, count| *count == 0);
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on SIGTERM or Ctrl-C (Ctrl-C only off Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
    }
}
