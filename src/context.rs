//! Per-request context.
//!
//! A [`Context`] is created for every incoming request and owned by the task
//! handling it. It travels by value through the middleware chain into the
//! terminal handler and carries:
//!
//! - the request head and body, read-only
//! - the path parameters captured by the router
//! - [`Locals`] written by middleware for later stages
//! - a response buffer: status, headers and at most one body
//!
//! Headers set on the buffer before the handler runs are merged into
//! whatever the handler returns, so a group middleware can tag every
//! response under its prefix. They are also kept on the error response when
//! the handler fails or no route matches. A status staged the same way
//! replaces a plain `200 OK` from the handler.

use std::any::Any;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode, Uri};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{DecodeError, Error};
use crate::locals::Locals;
use crate::response::{APPLICATION_JSON, IntoResponse, Response, TEXT_PLAIN};

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Identity of one request; continuations compare against it.
#[derive(Clone, Debug, Default)]
pub(crate) struct RequestToken(Arc<()>);

impl RequestToken {
    pub(crate) fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Everything one request carries through the pipeline.
#[derive(Debug)]
pub struct Context {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    path: String,
    remote_addr: SocketAddr,
    params: HashMap<String, String>,
    locals: Locals,
    response: Buffer,
    token: RequestToken,
}

#[derive(Debug)]
struct Buffer {
    status: StatusCode,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl Context {
    pub(crate) fn new(request: http::Request<Bytes>, remote_addr: SocketAddr) -> Self {
        let (parts, body) = request.into_parts();
        let path = parts.uri.path().to_owned();
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            path,
            remote_addr,
            params: HashMap::new(),
            locals: Locals::new(),
            response: Buffer {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: None,
            },
            token: RequestToken::default(),
        }
    }

    // ── Request ──────────────────────────────────────────────────────────────

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The path being routed. Inside a mounted app the mount prefix is
    /// already stripped: `/user/login` is seen as `/login`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The request target as received, query included (`/env?id=123`).
    pub fn original_url(&self) -> &str {
        self.uri.path_and_query().map_or("/", |pq| pq.as_str())
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Raw query string without the leading `?`, empty when absent.
    pub fn query_string(&self) -> &str {
        self.uri.query().unwrap_or("")
    }

    /// First value of a query parameter, percent-decoded.
    pub fn query(&self, name: &str) -> Option<String> {
        form_urlencoded::parse(self.query_string().as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Decodes the whole query string into `T`.
    ///
    /// ```rust,ignore
    /// #[derive(Deserialize)]
    /// struct Person { id: i64, name: String }
    ///
    /// // GET /qrypar?id=1&name=som
    /// let person: Person = ctx.query_parser()?;
    /// ```
    pub fn query_parser<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_urlencoded::from_str(self.query_string())
            .map_err(|e| DecodeError::Query(e).into())
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/:id`, `ctx.param("id")` on `/users/42` returns
    /// `Some("42")`. An absent optional parameter is `Some("")`; the
    /// remainder captured by `*` is under the name `"*"`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// A path parameter parsed as a base-10 integer.
    ///
    /// Fails with [`Error::BadRequest`] for anything else, so `?` turns a
    /// malformed `/index/paint/abc` into a 400 response.
    pub fn param_int(&self, name: &str) -> Result<i64, Error> {
        let raw = self.param(name).unwrap_or("");
        raw.parse::<i64>().map_err(|_| {
            Error::bad_request(format!("parameter `{name}` must be an integer, got `{raw}`"))
        })
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a request header, if present and printable.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Whether the request content type corresponds to the file extension
    /// `ext` (`"json"`, `"html"`, `".txt"`, ...). Parameters such as
    /// `charset` are ignored.
    pub fn is(&self, ext: &str) -> bool {
        let Some(content_type) = self.content_type() else {
            return false;
        };
        mime_guess::from_ext(ext.trim_start_matches('.'))
            .iter()
            .any(|mime| mime.essence_str().eq_ignore_ascii_case(content_type))
    }

    /// Decodes the body according to its content type: JSON
    /// (`application/json`, `*+json`) or `application/x-www-form-urlencoded`.
    /// Any other content type is a [`DecodeError::UnsupportedContentType`],
    /// answered with `422 Unprocessable Entity`.
    pub fn body_parser<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let content_type = self.content_type().unwrap_or("").to_ascii_lowercase();
        if content_type == APPLICATION_JSON || content_type.ends_with("+json") {
            serde_json::from_slice(&self.body).map_err(|e| DecodeError::Json(e).into())
        } else if content_type == FORM_URLENCODED {
            serde_urlencoded::from_bytes(&self.body).map_err(|e| DecodeError::Form(e).into())
        } else {
            Err(DecodeError::UnsupportedContentType(content_type).into())
        }
    }

    /// Content type without parameters.
    fn content_type(&self) -> Option<&str> {
        let raw = self.header(CONTENT_TYPE.as_str())?;
        raw.split(';').next().map(str::trim).filter(|s| !s.is_empty())
    }

    // ── Derived request metadata ─────────────────────────────────────────────

    /// `x-forwarded-proto` when a proxy set it, otherwise the scheme of the
    /// request target, otherwise `http`.
    pub fn protocol(&self) -> &str {
        if let Some(proto) = self.header(X_FORWARDED_PROTO) {
            let proto = proto.split(',').next().unwrap_or("").trim();
            if !proto.is_empty() {
                return proto;
            }
        }
        self.uri.scheme_str().unwrap_or("http")
    }

    /// The `Host` header (port included), or the authority of the request
    /// target for HTTP/2.
    pub fn hostname(&self) -> &str {
        self.header(HOST.as_str())
            .or_else(|| self.uri.authority().map(|a| a.as_str()))
            .unwrap_or("")
    }

    /// `scheme://host`, e.g. `http://localhost:8000`.
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol(), self.hostname())
    }

    /// Address of the directly connected peer.
    pub fn ip(&self) -> IpAddr {
        self.remote_addr.ip()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Client chain from `x-forwarded-for`, client first. Empty without the
    /// header.
    pub fn ips(&self) -> Vec<&str> {
        self.headers
            .get_all(X_FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .collect()
    }

    /// Host labels minus the last `offset` (the registrable domain). With
    /// fewer labels than `offset`, every label is returned.
    pub fn subdomains(&self, offset: usize) -> Vec<&str> {
        let labels: Vec<&str> = self.hostname().split('.').collect();
        match labels.len().checked_sub(offset) {
            Some(keep) => labels[..keep].to_vec(),
            None => labels,
        }
    }

    // ── Locals ───────────────────────────────────────────────────────────────

    pub fn locals(&self) -> &Locals {
        &self.locals
    }

    pub fn locals_mut(&mut self) -> &mut Locals {
        &mut self.locals
    }

    pub fn set_local<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.locals.insert(key, value);
    }

    /// Typed read of a value stored by earlier middleware.
    pub fn local<T: Any>(&self, key: &str) -> Result<&T, Error> {
        Ok(self.locals.get::<T>(key)?)
    }

    // ── Response buffer ──────────────────────────────────────────────────────

    /// Sets the response status. Staged by middleware before [`Next::run`],
    /// it applies to a handler response that would otherwise be `200 OK`;
    /// error responses keep their own status.
    ///
    /// [`Next::run`]: crate::Next::run
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.response.status = status;
        self
    }

    /// Sets (replaces) a response header.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<&mut Self, Error> {
        let header = HeaderName::try_from(name).map_err(|_| Error::InvalidHeader(name.to_owned()))?;
        let value =
            HeaderValue::try_from(value).map_err(|_| Error::InvalidHeader(name.to_owned()))?;
        self.response.headers.insert(header, value);
        Ok(self)
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.response.headers
    }

    /// Whether a body has already been written to the buffer.
    pub fn is_responded(&self) -> bool {
        self.response.body.is_some()
    }

    /// Writes a plain-text body. Fails with [`Error::AlreadyResponded`] when
    /// a body was written before.
    pub fn send_string(&mut self, body: impl Into<String>) -> Result<&mut Self, Error> {
        self.send(TEXT_PLAIN, Bytes::from(body.into()))
    }

    /// Writes a binary body (`application/octet-stream` unless a content type
    /// was set).
    pub fn send_bytes(&mut self, body: impl Into<Bytes>) -> Result<&mut Self, Error> {
        self.send("application/octet-stream", body.into())
    }

    /// Serialises `value` as the JSON body.
    pub fn json<T: Serialize>(&mut self, value: &T) -> Result<&mut Self, Error> {
        if self.is_responded() {
            return Err(Error::AlreadyResponded);
        }
        let body = serde_json::to_vec(value).map_err(Error::Encode)?;
        self.response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        self.response.body = Some(Bytes::from(body));
        Ok(self)
    }

    fn send(&mut self, default_type: &'static str, body: Bytes) -> Result<&mut Self, Error> {
        if self.is_responded() {
            return Err(Error::AlreadyResponded);
        }
        self.response
            .headers
            .entry(CONTENT_TYPE)
            .or_insert_with(|| HeaderValue::from_static(default_type));
        self.response.body = Some(body);
        Ok(self)
    }

    // ── Pipeline plumbing ────────────────────────────────────────────────────

    pub(crate) fn token(&self) -> &RequestToken {
        &self.token
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    pub(crate) fn set_path(&mut self, path: String) {
        self.path = path;
    }

    /// Hands the status and headers staged so far to the caller and resets
    /// the buffer to a bare `200 OK`.
    pub(crate) fn take_staged(&mut self) -> (StatusCode, HeaderMap) {
        let status = std::mem::replace(&mut self.response.status, StatusCode::OK);
        (status, std::mem::take(&mut self.response.headers))
    }
}

/// The buffer as a response: status, headers and body (empty if none was
/// written).
impl IntoResponse for Context {
    fn into_response(self) -> Response {
        Response {
            status: self.response.status,
            headers: self.response.headers,
            body: self.response.body.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(uri: &str) -> Context {
        let request = http::Request::builder()
            .uri(uri)
            .header("host", "api.shop.example.com:8000")
            .body(Bytes::new())
            .unwrap();
        Context::new(request, "127.0.0.1:40000".parse().unwrap())
    }

    fn with_body(content_type: &str, body: &'static str) -> Context {
        let request = http::Request::builder()
            .method(Method::POST)
            .uri("/body")
            .header("content-type", content_type)
            .body(Bytes::from_static(body.as_bytes()))
            .unwrap();
        Context::new(request, "127.0.0.1:40000".parse().unwrap())
    }

    #[derive(Debug, serde::Deserialize, PartialEq)]
    struct Person {
        id: i64,
        name: String,
    }

    #[test]
    fn query_access() {
        let ctx = ctx("/index/qry?qry=hello%20world&x=1&x=2");
        assert_eq!(ctx.query_string(), "qry=hello%20world&x=1&x=2");
        assert_eq!(ctx.query("qry").as_deref(), Some("hello world"));
        assert_eq!(ctx.query("x").as_deref(), Some("1"));
        assert_eq!(ctx.query("missing"), None);
        assert_eq!(ctx.original_url(), "/index/qry?qry=hello%20world&x=1&x=2");
        assert_eq!(ctx.path(), "/index/qry");
    }

    #[test]
    fn query_parser_decodes_and_rejects() {
        let person: Person = ctx("/qrypar?id=1&name=som").query_parser().unwrap();
        assert_eq!(person, Person { id: 1, name: "som".into() });

        let err = ctx("/qrypar?id=one&name=som").query_parser::<Person>().unwrap_err();
        assert!(matches!(err, Error::Decode(DecodeError::Query(_))));
    }

    #[test]
    fn param_int_rejects_non_integers() {
        let mut ctx = ctx("/index/paint/42");
        ctx.set_params(HashMap::from([("id".to_owned(), "42".to_owned())]));
        assert_eq!(ctx.param_int("id").unwrap(), 42);

        ctx.set_params(HashMap::from([("id".to_owned(), "abc".to_owned())]));
        assert!(matches!(ctx.param_int("id"), Err(Error::BadRequest(_))));
        assert!(matches!(ctx.param_int("missing"), Err(Error::BadRequest(_))));
    }

    #[test]
    fn body_parser_by_content_type() {
        let json = r#"{"id":7,"name":"ann"}"#;
        let person: Person =
            with_body("application/json; charset=utf-8", json).body_parser().unwrap();
        assert_eq!(person.id, 7);

        let person: Person = with_body("application/x-www-form-urlencoded", "id=8&name=bo")
            .body_parser()
            .unwrap();
        assert_eq!(person.name, "bo");

        let err = with_body("application/json", "{not json").body_parser::<Person>().unwrap_err();
        assert!(matches!(err, Error::Decode(DecodeError::Json(_))));

        let err = with_body("text/plain", "id=1").body_parser::<Person>().unwrap_err();
        let Error::Decode(DecodeError::UnsupportedContentType(content_type)) = err else {
            panic!("expected an unsupported content type");
        };
        assert_eq!(content_type, "text/plain");
        assert_eq!(
            Error::from(DecodeError::UnsupportedContentType(content_type)).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn content_type_check() {
        let ctx = with_body("application/json; charset=utf-8", "{}");
        assert!(ctx.is("json"));
        assert!(ctx.is(".json"));
        assert!(!ctx.is("html"));
    }

    #[test]
    fn derived_metadata() {
        let ctx = ctx("/env?id=123");
        assert_eq!(ctx.protocol(), "http");
        assert_eq!(ctx.hostname(), "api.shop.example.com:8000");
        assert_eq!(ctx.base_url(), "http://api.shop.example.com:8000");
        assert_eq!(ctx.ip().to_string(), "127.0.0.1");
        assert!(ctx.ips().is_empty());
        assert_eq!(ctx.subdomains(2), vec!["api", "shop"]);
    }

    #[test]
    fn forwarded_headers() {
        let request = http::Request::builder()
            .uri("/env")
            .header("host", "localhost:8000")
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.2")
            .header("x-forwarded-proto", "https")
            .body(Bytes::new())
            .unwrap();
        let ctx = Context::new(request, "10.0.0.3:1234".parse().unwrap());

        assert_eq!(ctx.ips(), vec!["203.0.113.9", "10.0.0.2"]);
        assert_eq!(ctx.base_url(), "https://localhost:8000");
        assert_eq!(ctx.subdomains(2), vec!["localhost:8000"]);
    }

    #[test]
    fn second_write_is_rejected() {
        let mut ctx = ctx("/");
        ctx.status(StatusCode::ACCEPTED).send_string("first").unwrap();
        assert!(ctx.is_responded());
        assert!(matches!(ctx.send_string("second"), Err(Error::AlreadyResponded)));
        assert!(matches!(ctx.json(&1), Err(Error::AlreadyResponded)));

        let res = ctx.into_response();
        assert_eq!(res.status_code(), StatusCode::ACCEPTED);
        assert_eq!(&res.body()[..], b"first");
        assert_eq!(res.header("content-type"), Some(TEXT_PLAIN));
    }

    #[test]
    fn headers_are_staged() {
        let mut ctx = ctx("/v1/index");
        ctx.set_header("Version", "v1").unwrap();
        assert!(matches!(ctx.set_header("bad name", "x"), Err(Error::InvalidHeader(_))));
        assert_eq!(ctx.response_headers().get("version").unwrap(), "v1");

        ctx.status(StatusCode::CREATED);
        let (status, staged) = ctx.take_staged();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(staged.len(), 1);
        assert!(ctx.response_headers().is_empty());
        assert_eq!(ctx.into_response().status_code(), StatusCode::OK);
    }

    #[test]
    fn locals_are_typed() {
        let mut ctx = ctx("/getmiddleware");
        ctx.set_local("id", 1_i64);
        assert_eq!(*ctx.local::<i64>("id").unwrap(), 1);
        assert!(matches!(ctx.local::<String>("id"), Err(Error::Local(_))));
    }
}
