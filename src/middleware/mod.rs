//! Middleware layer.
//!
//! A middleware is an `async fn(Context, Next) -> impl Responder` registered
//! on a path prefix with [`Router::middleware`](crate::Router::middleware).
//! For each request, every middleware whose prefix covers the path runs in
//! registration order, outermost first, and the matched handler runs last.
//!
//! ```rust
//! use trellis::{Context, Next, Result, Response, Router};
//!
//! async fn tag_version(mut ctx: Context, next: Next) -> Result<Response> {
//!     ctx.set_header("version", "v1")?;
//!     next.run(ctx).await
//! }
//!
//! let app = Router::new()
//!     .middleware("/v1", tag_version)
//!     .get("/v1/index", |_ctx: Context| async { "Index v1" });
//! ```
//!
//! [`Next::run`] takes `self`, so a middleware can resume the chain at most
//! once. Not calling it short-circuits: later middleware and the handler
//! never run and whatever the middleware returns is the response.
//!
//! Built-in middleware:
//! - [`trace`]: a per-request span plus one log line with status and latency
//! - [`request_id`]: propagates or generates `x-request-id`

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use http::HeaderMap;

use crate::context::{Context, RequestToken};
use crate::error::Error;
use crate::handler::{BoxFuture, BoxedHandler};
use crate::response::{Responder, Response};
use crate::static_files::StaticFiles;

mod request_id;
mod trace;

pub use request_id::{REQUEST_ID_HEADER, RequestId, request_id};
pub use trace::trace;

// ── Erasure ───────────────────────────────────────────────────────────────────

#[doc(hidden)]
pub trait ErasedMiddleware {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<Result<Response, Error>>;
}

#[doc(hidden)]
pub type BoxedMiddleware = Arc<dyn ErasedMiddleware + Send + Sync + 'static>;

/// Implemented for every `async fn(Context, Next) -> impl Responder`.
pub trait Middleware: Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_middleware(self) -> BoxedMiddleware;
}

impl<F, Fut, R> Middleware for F
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: Responder + Send + 'static,
{
    fn into_boxed_middleware(self) -> BoxedMiddleware {
        Arc::new(FnMiddleware(self))
    }
}

struct FnMiddleware<F>(F);

impl<F, Fut, R> ErasedMiddleware for FnMiddleware<F>
where
    F: Fn(Context, Next) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: Responder + Send + 'static,
{
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<Result<Response, Error>> {
        let fut = (self.0)(ctx, next);
        Box::pin(async move { fut.await.into_result() })
    }
}

// ── Next ──────────────────────────────────────────────────────────────────────

/// The rest of the chain: later middleware, then the handler.
pub struct Next {
    pipeline: Arc<Pipeline>,
    index: usize,
    token: RequestToken,
}

impl Next {
    /// Runs the remaining stages with `ctx` and returns their outcome.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyResponded`] if a body was already written to `ctx`;
    ///   downstream stages do not run.
    /// - [`Error::ProtocolViolation`] if `ctx` is not the context this
    ///   continuation was created for.
    /// - whatever the downstream stages fail with.
    pub async fn run(self, ctx: Context) -> Result<Response, Error> {
        if !self.token.same(ctx.token()) {
            return Err(Error::ProtocolViolation(
                "continuation resumed with another request's context",
            ));
        }
        if ctx.is_responded() {
            return Err(Error::AlreadyResponded);
        }
        Pipeline::run_from(self.pipeline, self.index, ctx).await
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.pipeline.stages.len().saturating_sub(self.index))
            .finish_non_exhaustive()
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

/// What runs after the last middleware.
#[derive(Clone)]
pub(crate) enum Terminal {
    Handler(BoxedHandler),
    Static(Arc<StaticFiles>),
    NotFound,
}

impl Terminal {
    fn call(self, ctx: Context) -> BoxFuture<Result<Response, Error>> {
        match self {
            Self::Handler(handler) => handler.call(ctx),
            Self::Static(files) => Box::pin(async move { files.serve(&ctx).await }),
            Self::NotFound => Box::pin(async move {
                Err(Error::NotFound {
                    method: ctx.method().clone(),
                    path: ctx.uri().path().to_owned(),
                })
            }),
        }
    }
}

/// The stages selected for one request.
pub(crate) struct Pipeline {
    stages: Vec<BoxedMiddleware>,
    terminal: Terminal,
    // headers staged before a terminal that failed
    unsent: OnceLock<HeaderMap>,
}

impl Pipeline {
    pub(crate) fn new(stages: Vec<BoxedMiddleware>, terminal: Terminal) -> Arc<Self> {
        Arc::new(Self { stages, terminal, unsent: OnceLock::new() })
    }

    pub(crate) fn start(self: Arc<Self>, ctx: Context) -> BoxFuture<Result<Response, Error>> {
        Self::run_from(self, 0, ctx)
    }

    /// Headers middleware staged for a request whose handler, static lookup
    /// or route match failed. The error boundary adds them to its response.
    pub(crate) fn unsent_headers(&self) -> Option<&HeaderMap> {
        self.unsent.get()
    }

    fn run_from(self: Arc<Self>, index: usize, ctx: Context) -> BoxFuture<Result<Response, Error>> {
        let stage = self.stages.get(index).cloned();
        match stage {
            Some(stage) => {
                let next = Next { pipeline: self, index: index + 1, token: ctx.token().clone() };
                stage.call(ctx, next)
            }
            None => self.finish(ctx),
        }
    }

    fn finish(self: Arc<Self>, mut ctx: Context) -> BoxFuture<Result<Response, Error>> {
        let (status, headers) = ctx.take_staged();
        let pending = self.terminal.clone().call(ctx);
        Box::pin(async move {
            match pending.await {
                Ok(mut response) => {
                    response.merge_staged(&headers);
                    response.default_status(status);
                    Ok(response)
                }
                Err(err) => {
                    let _ = self.unsent.set(headers);
                    Err(err)
                }
            }
        })
    }
}
