//! Route handlers.
//!
//! A handler is any `async fn(Context) -> impl Responder`. Handlers of many
//! concrete types share one route table, so registration erases each one
//! into a [`BoxedHandler`]: an `Arc` around a small adapter whose `call`
//! boxes the handler's future and normalizes its output into
//! `Result<Response, Error>`.
//!
//! ```text
//! router.get("/index", index)      index: fn(Context) -> impl Future<Output = &str>
//!   -> index.into_boxed_handler()  Arc<FnHandler<index>> as BoxedHandler
//!   -> handler.call(ctx)           Box::pin(async { index(ctx).await.into_result() })
//! ```
//!
//! Middleware is stored the same way, see [`middleware`](crate::middleware).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Error;
use crate::response::{Responder, Response};

/// Boxed future shared by handlers, middleware and the pipeline.
pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Object-safe face of a handler.
///
/// Public only because it shows up in [`Handler::into_boxed_handler`].
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, ctx: Context) -> BoxFuture<Result<Response, Error>>;
}

#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Satisfied by every `async fn(Context) -> impl Responder` and by closures
/// of the same shape. Sealed.
///
/// Closures need their argument annotated, since the trait is implemented
/// generically rather than named as an `Fn` bound:
///
/// ```rust
/// use trellis::{Context, Router};
///
/// let router = Router::new().get("/ping", |_ctx: Context| async { "pong" });
/// ```
pub trait Handler: sealed::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod sealed {
    pub trait Sealed {}
}

impl<F, Fut, R> sealed::Sealed for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: Responder + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: Responder + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: Responder + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture<Result<Response, Error>> {
        let pending = (self.0)(ctx);
        Box::pin(async move { pending.await.into_result() })
    }
}
