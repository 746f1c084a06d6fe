//! # trellis
//!
//! A small HTTP framework: pattern routing, prefix-scoped middleware,
//! route groups, mountable sub-routers and static files, on hyper and tokio.
//!
//! ## Routing
//!
//! Patterns are `/`-separated. `:name` captures one segment, `:name?` an
//! optional one (empty string when absent), and a trailing `*` the rest of
//! the path, slashes included. When several routes match, the more specific
//! one wins (literal over `:param` over `:param?` over `*`); equally
//! specific routes are tried in registration order.
//!
//! ## Request lifecycle
//!
//! 1. A mounted router whose prefix covers the path takes the request over,
//!    with the prefix stripped from [`Context::path`].
//! 2. The route table picks the handler (`HEAD` falls back to `GET`).
//! 3. Every middleware whose prefix covers the path runs, in registration
//!    order; each decides whether to call [`Next::run`].
//! 4. The handler runs, or the static directory for unmatched `GET`s, or
//!    the request ends in [`Error::NotFound`].
//! 5. Any error raised along the way goes through the app's error boundary,
//!    so every request gets exactly one response.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use trellis::{Context, Error, Next, Response, Result, Router, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let api = Router::new()
//!         .middleware("/", trellis::middleware::trace)
//!         .get("/users/:id", get_user)
//!         .group("/admin", |g| g.middleware(admin_only).delete("/users/:id", get_user));
//!
//!     Server::bind("0.0.0.0:3000").serve(api).await
//! }
//!
//! async fn get_user(ctx: Context) -> Result<String> {
//!     Ok(format!("user {}", ctx.param_int("id")?))
//! }
//!
//! async fn admin_only(ctx: Context, next: Next) -> Result<Response> {
//!     if ctx.header("x-admin").is_none() {
//!         return Err(Error::new(StatusCode::FORBIDDEN, "admins only"));
//!     }
//!     next.run(ctx).await
//! }
//! ```

mod app;
mod context;
mod error;
mod handler;
mod locals;
mod pattern;
mod response;
mod router;
mod server;
mod static_files;

pub mod middleware;

pub use app::App;
pub use context::Context;
pub use error::{ConfigError, DecodeError, Error, LocalError, Result};
pub use handler::Handler;
pub use http::{Method, StatusCode};
pub use locals::Locals;
pub use middleware::{Middleware, Next};
pub use pattern::WILDCARD;
pub use response::{IntoResponse, Json, Responder, Response, ResponseBuilder};
pub use router::{Group, Router, RouterConfig};
pub use server::Server;
pub use static_files::StaticConfig;
