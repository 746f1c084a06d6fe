//! Route registration and composition.
//!
//! A [`Router`] collects routes, middleware, mounted sub-routers and static
//! directories. Registration never fails on the spot: a malformed pattern is
//! remembered and reported by [`Router::build`], which turns the router into
//! an immutable [`App`] before the server accepts its first connection.

use std::path::PathBuf;
use std::sync::Arc;

use http::Method;

use crate::app::{App, ErrorHandler};
use crate::error::{ConfigError, Error};
use crate::handler::{BoxedHandler, Handler};
use crate::middleware::{BoxedMiddleware, Middleware};
use crate::pattern::{self, Pattern};
use crate::response::Response;
use crate::static_files::{StaticConfig, StaticFiles};

/// Methods registered by [`Router::all`].
const ALL_METHODS: [Method; 9] = [
    Method::GET,
    Method::HEAD,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::CONNECT,
    Method::OPTIONS,
    Method::TRACE,
    Method::PATCH,
];

/// Matching behaviour of one router. Mounted routers keep their own.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouterConfig {
    /// Compare literal segments and prefixes byte for byte. Off by default:
    /// `/Index` reaches a route registered as `/index`.
    pub case_sensitive: bool,
}

pub(crate) struct Route {
    pub(crate) method: Method,
    pub(crate) pattern: Pattern,
    pub(crate) handler: BoxedHandler,
}

macro_rules! method_shortcuts {
    ($($name:ident => $method:ident),* $(,)?) => {
        $(
            #[doc = concat!("Registers a `", stringify!($method), "` route.")]
            pub fn $name(self, pattern: &str, handler: impl Handler) -> Self {
                self.on(Method::$method, pattern, handler)
            }
        )*
    };
}

/// The application router.
///
/// Build it once at startup and pass it to
/// [`Server::serve`](crate::Server::serve). Every method returns `self` so
/// registrations chain:
///
/// ```rust
/// use trellis::{Context, Result, Router};
///
/// async fn paint(ctx: Context) -> Result<String> {
///     Ok(format!("ID: {}", ctx.param_int("id")?))
/// }
///
/// let app = Router::new()
///     .get("/index", |_ctx: Context| async { "GET: index" })
///     .get("/index/paint/:id", paint)
///     .build()
///     .unwrap();
/// ```
pub struct Router {
    pub(crate) config: RouterConfig,
    pub(crate) routes: Vec<Route>,
    pub(crate) middleware: Vec<(String, BoxedMiddleware)>,
    pub(crate) mounts: Vec<(String, Router)>,
    pub(crate) statics: Vec<StaticFiles>,
    pub(crate) error_handler: Option<ErrorHandler>,
    pub(crate) errors: Vec<ConfigError>,
}

impl Router {
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    pub fn with_config(config: RouterConfig) -> Self {
        Self {
            config,
            routes: Vec::new(),
            middleware: Vec::new(),
            mounts: Vec::new(),
            statics: Vec::new(),
            error_handler: None,
            errors: Vec::new(),
        }
    }

    pub fn config(&self) -> RouterConfig {
        self.config
    }

    /// Registers a handler for a method + pattern pair.
    ///
    /// Patterns use `:name` for one segment, `:name?` for an optional
    /// segment and a trailing `*` for the rest of the path. Registering the
    /// same pattern twice for one method is a configuration error.
    pub fn on(self, method: Method, pattern: &str, handler: impl Handler) -> Self {
        self.add(method, pattern, handler.into_boxed_handler())
    }

    method_shortcuts! {
        get => GET,
        head => HEAD,
        post => POST,
        put => PUT,
        patch => PATCH,
        delete => DELETE,
        options => OPTIONS,
    }

    /// Registers one handler for every standard method.
    pub fn all(self, pattern: &str, handler: impl Handler) -> Self {
        let handler = handler.into_boxed_handler();
        ALL_METHODS
            .into_iter()
            .fold(self, |router, method| router.add(method, pattern, Arc::clone(&handler)))
    }

    /// Runs `middleware` for every request whose path lies under `prefix`
    /// (`""` or `"/"` for all of them), in registration order.
    pub fn middleware(mut self, prefix: &str, middleware: impl Middleware) -> Self {
        match pattern::parse_prefix(prefix) {
            Ok(prefix) => self.middleware.push((prefix, middleware.into_boxed_middleware())),
            Err(err) => self.errors.push(err),
        }
        self
    }

    /// Registers routes and middleware under a shared prefix.
    ///
    /// ```rust
    /// use trellis::{Context, Next, Result, Response, Router};
    ///
    /// async fn v1(mut ctx: Context, next: Next) -> Result<Response> {
    ///     ctx.set_header("version", "v1")?;
    ///     next.run(ctx).await
    /// }
    ///
    /// let app = Router::new().group("/v1", |g| {
    ///     g.middleware(v1).get("/index", |_ctx: Context| async { "Index v1" })
    /// });
    /// ```
    pub fn group(mut self, prefix: &str, build: impl FnOnce(Group) -> Group) -> Self {
        match pattern::parse_prefix(prefix) {
            Ok(prefix) => build(Group { prefix, router: self }).router,
            Err(err) => {
                self.errors.push(err);
                self
            }
        }
    }

    /// Hands every request under `prefix` to `router`, with the prefix
    /// stripped. The mounted router keeps its own middleware, static files
    /// and error handler; this router's middleware does not run for it.
    pub fn mount(mut self, prefix: &str, router: Router) -> Self {
        match pattern::parse_prefix(prefix) {
            Ok(prefix) if self.mounts.iter().any(|(existing, _)| *existing == prefix) => {
                self.errors.push(ConfigError::DuplicateMount { prefix });
            }
            Ok(prefix) => self.mounts.push((prefix, router)),
            Err(err) => self.errors.push(err),
        }
        self
    }

    /// Serves files from `dir` for `GET`/`HEAD` requests under `prefix` that
    /// no route matched.
    pub fn static_files(
        mut self,
        prefix: &str,
        dir: impl Into<PathBuf>,
        config: StaticConfig,
    ) -> Self {
        match pattern::parse_prefix(prefix) {
            Ok(prefix) => self.statics.push(StaticFiles::new(prefix, dir.into(), config)),
            Err(err) => self.errors.push(err),
        }
        self
    }

    /// Replaces the default error boundary, which answers with the error
    /// message and [`Error::status`].
    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Error) -> Response + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Freezes the router into an [`App`].
    ///
    /// # Errors
    ///
    /// [`Error::Config`] with the first registration problem found here or in
    /// any mounted router.
    pub fn build(self) -> Result<App, Error> {
        App::from_router(self)
    }

    fn add(mut self, method: Method, raw: &str, handler: BoxedHandler) -> Self {
        let pattern = match Pattern::parse(raw) {
            Ok(pattern) => pattern,
            Err(err) => {
                self.errors.push(err);
                return self;
            }
        };

        let key = self.route_key(&pattern);
        let taken = self
            .routes
            .iter()
            .any(|route| route.method == method && self.route_key(&route.pattern) == key);
        if taken {
            let pattern = pattern.as_str().to_owned();
            self.errors.push(ConfigError::DuplicateRoute { method, pattern });
        } else {
            self.routes.push(Route { method, pattern, handler });
        }
        self
    }

    fn route_key(&self, pattern: &Pattern) -> String {
        if self.config.case_sensitive {
            pattern.as_str().to_owned()
        } else {
            pattern.as_str().to_ascii_lowercase()
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes and middleware sharing a prefix, registered on the parent router.
///
/// Obtained inside [`Router::group`].
pub struct Group {
    prefix: String,
    router: Router,
}

impl Group {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Runs `middleware` for every route under this group's prefix.
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.router = self.router.middleware(&self.prefix, middleware);
        self
    }

    pub fn on(mut self, method: Method, pattern: &str, handler: impl Handler) -> Self {
        let full = pattern::join(&self.prefix, pattern);
        self.router = self.router.on(method, &full, handler);
        self
    }

    method_shortcuts! {
        get => GET,
        head => HEAD,
        post => POST,
        put => PUT,
        patch => PATCH,
        delete => DELETE,
        options => OPTIONS,
    }

    pub fn all(mut self, pattern: &str, handler: impl Handler) -> Self {
        let full = pattern::join(&self.prefix, pattern);
        self.router = self.router.all(&full, handler);
        self
    }

    /// A nested group; its prefix is appended to this one.
    pub fn group(self, prefix: &str, build: impl FnOnce(Group) -> Group) -> Self {
        let Self { prefix: outer, router } = self;
        let router = router.group(&pattern::join(&outer, prefix), build);
        Self { prefix: outer, router }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    async fn ok(_ctx: Context) -> &'static str {
        "ok"
    }

    async fn pass(ctx: Context, next: crate::Next) -> Result<Response, Error> {
        next.run(ctx).await
    }

    fn first_error(router: Router) -> ConfigError {
        match router.build() {
            Err(Error::Config(err)) => err,
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("router built despite invalid configuration"),
        }
    }

    #[test]
    fn duplicate_route_is_rejected() {
        let err = first_error(Router::new().get("/index", ok).get("/index/", ok));
        assert_eq!(
            err,
            ConfigError::DuplicateRoute { method: Method::GET, pattern: "/index".into() }
        );
    }

    #[test]
    fn duplicate_respects_case_setting() {
        assert!(matches!(
            first_error(Router::new().get("/Index", ok).get("/index", ok)),
            ConfigError::DuplicateRoute { .. }
        ));

        let sensitive = RouterConfig { case_sensitive: true };
        assert!(Router::with_config(sensitive).get("/Index", ok).get("/index", ok).build().is_ok());
    }

    #[test]
    fn same_pattern_on_other_method_is_fine() {
        assert!(Router::new().get("/index", ok).post("/index", ok).build().is_ok());
    }

    #[test]
    fn malformed_pattern_is_reported_at_build() {
        assert!(matches!(
            first_error(Router::new().get("/a/*/b", ok)),
            ConfigError::WildcardNotLast { .. }
        ));
    }

    #[test]
    fn invalid_prefixes() {
        assert!(matches!(
            first_error(Router::new().middleware("/users/:id", pass)),
            ConfigError::InvalidPrefix { .. }
        ));
        assert!(matches!(
            first_error(Router::new().group("/*", |g| g)),
            ConfigError::InvalidPrefix { .. }
        ));
    }

    #[test]
    fn mount_errors_surface_in_parent() {
        let sub = Router::new().get("/:a/:a", ok);
        assert!(matches!(
            first_error(Router::new().mount("/user", sub)),
            ConfigError::DuplicateParam { .. }
        ));

        let err = first_error(
            Router::new().mount("/user", Router::new()).mount("/user/", Router::new()),
        );
        assert_eq!(err, ConfigError::DuplicateMount { prefix: "/user".into() });
    }

    #[test]
    fn group_prefixes_routes() {
        let router = Router::new().group("/v1", |g| {
            g.get("/index", ok).group("/admin", |g| g.get("users", ok))
        });
        let patterns: Vec<&str> = router.routes.iter().map(|r| r.pattern.as_str()).collect();
        assert_eq!(patterns, ["/v1/index", "/v1/admin/users"]);
    }

    #[test]
    fn all_registers_every_method() {
        let router = Router::new().all("/any", ok);
        assert_eq!(router.routes.len(), ALL_METHODS.len());
    }
}
