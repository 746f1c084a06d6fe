//! The frozen routing table and per-request dispatch.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::Method;
use tracing::{debug, error};

use crate::context::Context;
use crate::error::Error;
use crate::handler::BoxedHandler;
use crate::middleware::{BoxedMiddleware, Pipeline, Terminal};
use crate::pattern::{self, Pattern};
use crate::response::{IntoResponse, Response};
use crate::router::Router;
use crate::static_files::StaticFiles;

pub(crate) type ErrorHandler = Arc<dyn Fn(&Error) -> Response + Send + Sync + 'static>;

type Matched = (BoxedHandler, HashMap<String, String>);

struct Entry {
    pattern: Pattern,
    handler: BoxedHandler,
}

/// A validated, immutable [`Router`], ready to answer requests.
///
/// [`Server`](crate::Server) builds one per `serve` call and shares it across
/// connections. [`App::handle`] is also the entry point for tests that want
/// to exercise routing without a socket.
pub struct App {
    case_sensitive: bool,
    routes: HashMap<Method, Vec<Entry>>,
    middleware: Vec<(String, BoxedMiddleware)>,
    // longest prefix first
    mounts: Vec<(String, App)>,
    statics: Vec<Arc<StaticFiles>>,
    error_handler: Option<ErrorHandler>,
}

impl App {
    pub(crate) fn from_router(router: Router) -> Result<Self, Error> {
        let Router { config, routes, middleware, mounts, statics, error_handler, errors } =
            router;
        let case_sensitive = config.case_sensitive;

        if let Some(err) = errors.into_iter().next() {
            return Err(err.into());
        }

        let mut table: HashMap<Method, Vec<Entry>> = HashMap::new();
        for route in routes {
            table
                .entry(route.method)
                .or_default()
                .push(Entry { pattern: route.pattern, handler: route.handler });
        }
        // Stable: equally specific patterns keep registration order.
        for entries in table.values_mut() {
            entries.sort_by_cached_key(|entry| entry.pattern.specificity());
        }

        let mut mounts = mounts
            .into_iter()
            .map(|(prefix, router)| Ok((prefix, router.build()?)))
            .collect::<Result<Vec<_>, Error>>()?;
        mounts.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));

        let mut statics: Vec<Arc<StaticFiles>> = statics.into_iter().map(Arc::new).collect();
        statics.sort_by(|a, b| b.prefix().len().cmp(&a.prefix().len()));

        debug!(
            routes = table.values().map(Vec::len).sum::<usize>(),
            middleware = middleware.len(),
            mounts = mounts.len(),
            "app built"
        );

        Ok(Self { case_sensitive, routes: table, middleware, mounts, statics, error_handler })
    }

    /// Routes one request and produces its response. Never fails: errors
    /// raised anywhere in the chain go through the error boundary.
    pub async fn handle(&self, request: http::Request<Bytes>, remote_addr: SocketAddr) -> Response {
        self.dispatch(Context::new(request, remote_addr)).await
    }

    fn dispatch(&self, mut ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send + '_>> {
        Box::pin(async move {
            if let Some((prefix, mounted)) = self.mount_for(ctx.path()) {
                let rest = pattern::strip(prefix, ctx.path(), self.case_sensitive)
                    .unwrap_or("/")
                    .to_owned();
                ctx.set_path(rest);
                return mounted.dispatch(ctx).await;
            }

            let method = ctx.method().clone();
            let path = ctx.uri().path().to_owned();
            let pipeline = self.pipeline_for(&mut ctx);
            match Arc::clone(&pipeline).start(ctx).await {
                Ok(response) => response,
                Err(err) => {
                    let mut response = self.recover(err, &method, &path);
                    if let Some(headers) = pipeline.unsent_headers() {
                        response.merge_staged(headers);
                    }
                    response
                }
            }
        })
    }

    fn mount_for(&self, path: &str) -> Option<(&str, &App)> {
        self.mounts
            .iter()
            .find(|(prefix, _)| pattern::covers(prefix, path, self.case_sensitive))
            .map(|(prefix, app)| (prefix.as_str(), app))
    }

    fn pipeline_for(&self, ctx: &mut Context) -> Arc<Pipeline> {
        let terminal = match self.lookup(ctx.method(), ctx.path()) {
            Some((handler, params)) => {
                ctx.set_params(params);
                Terminal::Handler(handler)
            }
            None => self.fallback(ctx.method(), ctx.path()),
        };

        let stages = self
            .middleware
            .iter()
            .filter(|(prefix, _)| pattern::covers(prefix, ctx.path(), self.case_sensitive))
            .map(|(_, middleware)| Arc::clone(middleware))
            .collect();

        Pipeline::new(stages, terminal)
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<Matched> {
        let segments: Vec<&str> = pattern::split(path).collect();
        self.find(method, &segments).or_else(|| {
            if *method == Method::HEAD {
                self.find(&Method::GET, &segments)
            } else {
                None
            }
        })
    }

    fn find(&self, method: &Method, segments: &[&str]) -> Option<Matched> {
        self.routes.get(method)?.iter().find_map(|entry| {
            entry
                .pattern
                .captures(segments, self.case_sensitive)
                .map(|params| (Arc::clone(&entry.handler), params))
        })
    }

    fn fallback(&self, method: &Method, path: &str) -> Terminal {
        if *method == Method::GET || *method == Method::HEAD {
            let files = self.statics.iter().find(|files| files.covers(path, self.case_sensitive));
            if let Some(files) = files {
                return Terminal::Static(Arc::clone(files));
            }
        }
        Terminal::NotFound
    }

    fn recover(&self, err: Error, method: &Method, path: &str) -> Response {
        if err.is_internal() {
            error!(%method, path, error = %err, "request failed");
        } else {
            debug!(%method, path, status = err.status().as_u16(), error = %err, "request rejected");
        }
        match &self.error_handler {
            Some(handler) => handler(&err),
            None => err.into_response(),
        }
    }
}
