#![allow(dead_code)]

use bytes::Bytes;
use trellis::{App, Method, Response};

pub async fn send(app: &App, method: Method, uri: &str) -> Response {
    let request = http::Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "localhost:8000")
        .body(Bytes::new())
        .unwrap();
    app.handle(request, "127.0.0.1:40000".parse().unwrap()).await
}

pub async fn get(app: &App, uri: &str) -> Response {
    send(app, Method::GET, uri).await
}

pub fn text(response: &Response) -> &str {
    std::str::from_utf8(response.body()).unwrap()
}
