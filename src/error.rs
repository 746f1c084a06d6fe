//! Unified error type.
//!
//! Every failure a request can hit, from a malformed route pattern to a body
//! that does not decode, is a variant of [`Error`]. Handlers and middleware
//! return it with `?`; the error boundary of the [`App`](crate::App) that
//! dispatched the request turns it into exactly one response.

use http::{Method, StatusCode};
use thiserror::Error;

/// Shorthand used throughout the crate and handy in handler signatures.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error type returned by trellis' fallible operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Binding, accepting or reading from disk failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// A route, prefix or mount was registered with an invalid shape.
    /// Fatal at startup: [`Router::build`](crate::Router::build) refuses to
    /// produce an [`App`](crate::App).
    #[error("invalid router configuration: {0}")]
    Config(#[from] ConfigError),

    /// No route, mount or static file answers the request.
    #[error("Cannot {method} {path}")]
    NotFound { method: Method, path: String },

    /// A request value had the wrong shape (e.g. a non-integer `:id`).
    #[error("{0}")]
    BadRequest(String),

    /// The query string or body could not be decoded into the requested type.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A response value could not be serialised.
    #[error("failed to encode response: {0}")]
    Encode(#[source] serde_json::Error),

    /// A middleware continuation was driven outside of the request it belongs to.
    #[error("middleware protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// A second response was written for the same request.
    #[error("a response has already been written for this request")]
    AlreadyResponded,

    /// A local was missing or stored with another type.
    #[error(transparent)]
    Local(#[from] LocalError),

    /// A header name or value set on the context is not valid HTTP.
    #[error("invalid header `{0}`")]
    InvalidHeader(String),

    /// An application-raised error carrying its own status and message.
    #[error("{message}")]
    Status { status: StatusCode, message: String },
}

impl Error {
    /// An application error with an explicit status code.
    ///
    /// ```rust
    /// use trellis::{Error, StatusCode};
    ///
    /// let err = Error::new(StatusCode::NOT_FOUND, "content not found");
    /// assert_eq!(err.status(), StatusCode::NOT_FOUND);
    /// ```
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// The HTTP status the default error boundary answers with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Decode(DecodeError::UnsupportedContentType(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Decode(_) => StatusCode::BAD_REQUEST,
            Self::Status { status, .. } => *status,
            Self::Io(_)
            | Self::Config(_)
            | Self::Encode(_)
            | Self::ProtocolViolation(_)
            | Self::AlreadyResponded
            | Self::Local(_)
            | Self::InvalidHeader(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error points at a bug in the application rather than at
    /// the client. The error boundary logs these at `error` level.
    pub fn is_internal(&self) -> bool {
        self.status().is_server_error()
    }
}

/// Why a route, prefix or mount registration was rejected.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("route `{pattern}`: wildcard `*` must be the last segment")]
    WildcardNotLast { pattern: String },

    #[error("route `{pattern}`: `*` is only allowed as a whole segment")]
    MisplacedWildcard { pattern: String },

    #[error("route `{pattern}`: parameter `{name}` appears more than once")]
    DuplicateParam { pattern: String, name: String },

    #[error("route `{pattern}`: empty parameter name")]
    EmptyParam { pattern: String },

    #[error("route `{pattern}`: invalid parameter name `{name}`")]
    InvalidParam { pattern: String, name: String },

    #[error("route `{pattern}`: segment `{segment}` follows an optional parameter")]
    RequiredAfterOptional { pattern: String, segment: String },

    #[error("{method} `{pattern}` is already registered")]
    DuplicateRoute { method: Method, pattern: String },

    #[error("prefix `{prefix}` must be made of literal segments only")]
    InvalidPrefix { prefix: String },

    #[error("a router is already mounted at `{prefix}`")]
    DuplicateMount { prefix: String },
}

/// Why a query string or request body could not be decoded.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("invalid JSON body: {0}")]
    Json(#[source] serde_json::Error),

    #[error("invalid form body: {0}")]
    Form(#[source] serde_urlencoded::de::Error),

    #[error("invalid query string: {0}")]
    Query(#[source] serde_urlencoded::de::Error),

    #[error("unsupported content type `{0}`")]
    UnsupportedContentType(String),
}

/// Why a typed lookup in [`Locals`](crate::Locals) failed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum LocalError {
    #[error("local `{key}` is not set")]
    Missing { key: String },

    #[error("local `{key}` is not a `{expected}`")]
    TypeMismatch { key: String, expected: &'static str },
}
