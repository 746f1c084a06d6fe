//! Outgoing HTTP response type and the conversion traits handlers rely on.
//!
//! Build a [`Response`] in your handler and return it, or return anything
//! implementing [`IntoResponse`]. Fallible handlers return
//! `Result<T, Error>`; the error side travels up the middleware chain to the
//! error boundary instead of being turned into a response on the spot.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use http_body_util::Full;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::error::Error;

pub(crate) const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
pub(crate) const APPLICATION_JSON: &str = "application/json";

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// # Shortcuts (200 OK, no custom headers needed)
///
/// ```rust
/// use trellis::{Response, StatusCode};
///
/// Response::json(br#"{"id":1}"#.to_vec());
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
/// ```
///
/// # Builder (custom status or headers)
///
/// ```rust
/// use trellis::{Response, StatusCode};
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header("location", "/users/42")
///     .json(br#"{"id":42}"#.to_vec());
/// ```
#[derive(Debug)]
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
}

impl Response {
    /// `200 OK` with `application/json`. Pass the bytes from your serialiser;
    /// use [`Json`] to let trellis serialise for you.
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self::with_type(APPLICATION_JSON, body.into())
    }

    /// `200 OK` with `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::with_type(TEXT_PLAIN, Bytes::from(body.into()))
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self { status: code, headers: HeaderMap::new(), body: Bytes::new() }
    }

    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: HeaderMap::new(), status: StatusCode::OK }
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// First value of a header, if present and printable.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    fn with_type(content_type: &'static str, body: Bytes) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        Self { status: StatusCode::OK, headers, body }
    }

    /// Adds headers staged on the context by earlier middleware. Headers the
    /// response already carries take precedence.
    pub(crate) fn merge_staged(&mut self, staged: &HeaderMap) {
        let missing: Vec<HeaderName> = staged
            .keys()
            .filter(|name| !self.headers.contains_key(*name))
            .cloned()
            .collect();
        for name in missing {
            for value in staged.get_all(&name) {
                self.headers.append(name.clone(), value.clone());
            }
        }
    }

    /// Replaces a plain `200 OK` with a status staged by middleware.
    pub(crate) fn default_status(&mut self, staged: StatusCode) {
        if self.status == StatusCode::OK {
            self.status = staged;
        }
    }

    pub(crate) fn into_http(self) -> http::Response<Full<Bytes>> {
        let mut response = http::Response::new(Full::new(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }

    /// Writes the response as raw HTTP/1.1 and closes the exchange. Used for
    /// connections rejected before hyper takes them over.
    pub(crate) async fn write_to<W: AsyncWrite + Unpin>(
        self,
        writer: &mut W,
    ) -> std::io::Result<()> {
        writer.write_all(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason().unwrap_or(""),
            )
            .as_bytes(),
        ).await?;
        writer.write_all(format!("content-length: {}\r\n", self.body.len()).as_bytes()).await?;
        writer.write_all(b"connection: close\r\n").await?;
        for (name, value) in &self.headers {
            writer.write_all(name.as_str().as_bytes()).await?;
            writer.write_all(b": ").await?;
            writer.write_all(value.as_bytes()).await?;
            writer.write_all(b"\r\n").await?;
        }
        writer.write_all(b"\r\n").await?;
        writer.write_all(&self.body).await?;
        writer.flush().await
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`. Terminated by a
/// typed body method.
#[derive(Debug)]
pub struct ResponseBuilder {
    headers: HeaderMap,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    /// Appends a header. Names or values that are not valid HTTP are dropped
    /// with a warning.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => warn!(header = name, "dropping invalid response header"),
        }
        self
    }

    pub fn json(self, body: impl Into<Bytes>) -> Response {
        self.finish(HeaderValue::from_static(APPLICATION_JSON), body.into())
    }

    pub fn text(self, body: impl Into<String>) -> Response {
        self.finish(HeaderValue::from_static(TEXT_PLAIN), Bytes::from(body.into()))
    }

    /// Terminate with an arbitrary content type (HTML, CSS, images, ...).
    pub fn bytes(self, content_type: &str, body: impl Into<Bytes>) -> Response {
        let content_type = HeaderValue::try_from(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
        self.finish(content_type, body.into())
    }

    /// Terminate with no body.
    pub fn no_body(self) -> Response {
        Response { status: self.status, headers: self.headers, body: Bytes::new() }
    }

    fn finish(mut self, content_type: HeaderValue, body: Bytes) -> Response {
        self.headers.insert(CONTENT_TYPE, content_type);
        Response { status: self.status, headers: self.headers, body }
    }
}

// ── Json ─────────────────────────────────────────────────────────────────────

/// Serialises the wrapped value as the JSON response body.
///
/// ```rust
/// use serde::Serialize;
/// use trellis::{Context, Json};
///
/// #[derive(Serialize)]
/// struct User { id: u32, name: String }
///
/// async fn get_user(_ctx: Context) -> Json<User> {
///     Json(User { id: 1, name: "alice".into() })
/// }
/// ```
#[derive(Clone, Debug)]
pub struct Json<T>(pub T);

impl<T: Serialize> Json<T> {
    fn encode(&self) -> Result<Response, Error> {
        serde_json::to_vec(&self.0)
            .map(Response::json)
            .map_err(Error::Encode)
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Infallible conversion into an HTTP [`Response`].
///
/// Implement on your own types to return them directly from handlers.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

/// Return a status directly from a handler: `return StatusCode::NO_CONTENT`
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

/// `200 OK` with an empty body.
impl IntoResponse for () {
    fn into_response(self) -> Response { Response::status(StatusCode::OK) }
}

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        self.encode().unwrap_or_else(IntoResponse::into_response)
    }
}

/// The default error boundary: the error message as plain text, with the
/// status from [`Error::status`]. Internal errors do not leak their details.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if self.is_internal() {
            status.canonical_reason().unwrap_or("Internal Server Error").to_owned()
        } else {
            self.to_string()
        };
        Response::builder().status(status).text(message)
    }
}

// ── Responder ─────────────────────────────────────────────────────────────────

/// Anything a handler or middleware may return.
///
/// Plain values become a response; the `Err` side of a `Result` is handed to
/// the error boundary of the app that dispatched the request.
pub trait Responder {
    fn into_result(self) -> Result<Response, Error>;
}

macro_rules! infallible_responder {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Responder for $ty {
                fn into_result(self) -> Result<Response, Error> {
                    Ok(self.into_response())
                }
            }
        )*
    };
}

infallible_responder!(Response, &'static str, String, StatusCode, (), crate::Context);

impl<T: Serialize> Responder for Json<T> {
    fn into_result(self) -> Result<Response, Error> {
        self.encode()
    }
}

impl<T, E> Responder for Result<T, E>
where
    T: IntoResponse,
    E: Into<Error>,
{
    fn into_result(self) -> Result<Response, Error> {
        self.map(IntoResponse::into_response).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_content_type_last() {
        let res = Response::builder()
            .status(StatusCode::CREATED)
            .header("location", "/users/99")
            .header("bad header", "x")
            .json(r#"{"id":"99"}"#);

        assert_eq!(res.status_code(), StatusCode::CREATED);
        assert_eq!(res.header("location"), Some("/users/99"));
        assert_eq!(res.header("content-type"), Some(APPLICATION_JSON));
        assert_eq!(res.headers().len(), 2);
    }

    #[test]
    fn staged_headers_do_not_override() {
        let mut staged = HeaderMap::new();
        staged.insert("version", HeaderValue::from_static("v1"));
        staged.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));

        let mut res = Response::text("Index v1");
        res.merge_staged(&staged);

        assert_eq!(res.header("version"), Some("v1"));
        assert_eq!(res.header("content-type"), Some(TEXT_PLAIN));
    }

    #[test]
    fn internal_errors_are_not_leaked() {
        let res = Error::ProtocolViolation("secret detail").into_response();
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(&res.body()[..], b"Internal Server Error");

        let res = Error::new(StatusCode::NOT_FOUND, "content not found").into_response();
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(&res.body()[..], b"content not found");
    }

    #[test]
    fn result_responder_keeps_error() {
        let ok: Result<&'static str, Error> = Ok("fine");
        assert_eq!(ok.into_result().unwrap().status_code(), StatusCode::OK);

        let err: Result<(), Error> = Err(Error::bad_request("nope"));
        assert!(matches!(err.into_result(), Err(Error::BadRequest(_))));
    }

    #[tokio::test]
    async fn raw_write() {
        let mut out = Vec::new();
        Response::builder()
            .status(StatusCode::TOO_MANY_REQUESTS)
            .text("slow down")
            .write_to(&mut out)
            .await
            .unwrap();

        let raw = String::from_utf8(out).unwrap();
        assert!(raw.starts_with("HTTP/1.1 429 Too Many Requests\r\n"));
        assert!(raw.contains("content-length: 9\r\n"));
        assert!(raw.ends_with("\r\n\r\nslow down"));
    }
}
