//! Tour of the framework: params, queries, bodies, middleware, groups,
//! mounts, static files and the per-IP connection limit.
//!
//! Run with:
//!   RUST_LOG=info cargo run --bin showcase
//!
//! Try:
//!   curl http://localhost:8000/index
//!   curl http://localhost:8000/index/params/hello/world
//!   curl 'http://localhost:8000/qrypar?id=1&name=som'
//!   curl http://localhost:8000/wildcards/a/b/c/d/e/1
//!   curl -i http://localhost:8000/v1/index
//!   curl http://localhost:8000/user/login
//!   curl -X POST http://localhost:8000/bodytostruct \
//!        -H 'content-type: application/json' \
//!        -d '{"id":1,"name":"som"}'

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;
use trellis::{
    Context, Error, Json, Next, Response, Result, Router, Server, StaticConfig, StatusCode,
    WILDCARD, middleware,
};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Person {
    id: i64,
    name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    Server::bind("0.0.0.0:8000")
        .max_conns_per_ip(1)
        .serve(app())
        .await
}

fn app() -> Router {
    Router::new()
        .middleware("/error", around_error)
        .middleware("/getmiddleware", provide_locals)
        .middleware("/", middleware::request_id)
        .middleware("/", middleware::trace)
        .get("index", |_ctx: Context| async { "GET: index" })
        .post("index", |_ctx: Context| async { "POST: index" })
        .get("/getmiddleware", greet)
        .get("/index/params/:say", say)
        .get("/index/params/:say/:say2?", say_twice)
        .get("/index/paint/:id", paint)
        .get("/index/qry", query_string)
        .get("/qrypar", query_parser)
        .get("/wildcards/*", wildcards)
        .static_files(
            "/",
            "./wwwroot",
            StaticConfig { index: "index.html".into(), cache_duration: Duration::from_secs(10) },
        )
        .get("/error", |_ctx: Context| async {
            Err::<(), _>(Error::new(StatusCode::NOT_FOUND, "content not found"))
        })
        .group("/v1", |g| {
            g.middleware(|ctx: Context, next: Next| version(ctx, next, "v1"))
                .get("/index", |_ctx: Context| async { "Index v1" })
        })
        .group("/v2", |g| {
            g.middleware(|ctx: Context, next: Next| version(ctx, next, "v2"))
                .get("/index", |_ctx: Context| async { "Index v2" })
        })
        .mount("/user", Router::new().get("/login", |_ctx: Context| async { "login" }))
        .get("/server", slow)
        .get("/env", env)
        .post("/body", body)
        .post("/bodytostruct", body_to_struct)
        .post("/bodytomap", body_to_map)
}

// ── Middleware ───────────────────────────────────────────────────────────────

async fn around_error(ctx: Context, next: Next) -> Result<Response> {
    info!("middleware");
    let result = next.run(ctx).await;
    info!("end middleware");
    result
}

async fn provide_locals(mut ctx: Context, next: Next) -> Result<Response> {
    ctx.set_local("id", 1_i64);
    ctx.set_local("name", String::from("mid Man"));
    let result = next.run(ctx).await;
    info!("end middleware");
    result
}

async fn version(mut ctx: Context, next: Next, version: &'static str) -> Result<Response> {
    ctx.set_header("version", version)?;
    next.run(ctx).await
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn greet(ctx: Context) -> Result<String> {
    let id = ctx.local::<i64>("id")?;
    let name = ctx.local::<String>("name")?;
    Ok(format!("hello {id} , {name}"))
}

async fn say(ctx: Context) -> String {
    format!("say: {}", ctx.param("say").unwrap_or_default())
}

async fn say_twice(ctx: Context) -> String {
    format!(
        "say: {},\n say2: {}",
        ctx.param("say").unwrap_or_default(),
        ctx.param("say2").unwrap_or_default(),
    )
}

async fn paint(ctx: Context) -> Result<String> {
    Ok(format!("ID: {}", ctx.param_int("id")?))
}

async fn query_string(ctx: Context) -> String {
    format!("qry: {}", ctx.query("qry").unwrap_or_default())
}

async fn query_parser(ctx: Context) -> Result<Json<Person>> {
    Ok(Json(ctx.query_parser::<Person>()?))
}

async fn wildcards(ctx: Context) -> String {
    ctx.param(WILDCARD).unwrap_or_default().to_owned()
}

async fn slow(_ctx: Context) -> &'static str {
    tokio::time::sleep(Duration::from_secs(10)).await;
    "server"
}

async fn env(ctx: Context) -> Json<Value> {
    Json(serde_json::json!({
        "BaseURL": ctx.base_url(),
        "Hostname": ctx.hostname(),
        "IP": ctx.ip().to_string(),
        "IPs": ctx.ips(),
        "OriginalURL": ctx.original_url(),
        "Path": ctx.path(),
        "Protocol": ctx.protocol(),
        "Subdomains": ctx.subdomains(2),
    }))
}

async fn body(ctx: Context) {
    info!(is_json = ctx.is("json"), body = %String::from_utf8_lossy(ctx.body()), "body received");
}

async fn body_to_struct(ctx: Context) -> Result<()> {
    info!(is_json = ctx.is("json"), body = %String::from_utf8_lossy(ctx.body()), "body received");
    let person: Person = ctx.body_parser()?;
    info!(?person, "decoded person");
    Ok(())
}

async fn body_to_map(ctx: Context) -> Result<()> {
    info!(is_json = ctx.is("json"), "body received");
    let data: HashMap<String, Value> = ctx.body_parser()?;
    info!(?data, "decoded map");
    Ok(())
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::Method;
    use trellis::App;

    use super::*;

    async fn call(
        app: &App,
        method: Method,
        uri: &str,
        content_type: Option<&str>,
        body: &str,
    ) -> Response {
        let mut request =
            http::Request::builder().method(method).uri(uri).header("host", "localhost:8000");
        if let Some(content_type) = content_type {
            request = request.header("content-type", content_type);
        }
        let request = request.body(Bytes::from(body.to_owned())).unwrap();
        app.handle(request, "127.0.0.1:50000".parse().unwrap()).await
    }

    async fn get(app: &App, uri: &str) -> Response {
        call(app, Method::GET, uri, None, "").await
    }

    fn text(response: &Response) -> &str {
        std::str::from_utf8(response.body()).unwrap()
    }

    #[tokio::test]
    async fn index_by_method() {
        let app = app().build().unwrap();
        assert_eq!(text(&get(&app, "/index").await), "GET: index");
        assert_eq!(text(&call(&app, Method::POST, "/index", None, "").await), "POST: index");
    }

    #[tokio::test]
    async fn locals_from_middleware() {
        let app = app().build().unwrap();
        assert_eq!(text(&get(&app, "/getmiddleware").await), "hello 1 , mid Man");
    }

    #[tokio::test]
    async fn params_and_optional_params() {
        let app = app().build().unwrap();
        assert_eq!(text(&get(&app, "/index/params/hello").await), "say: hello");
        assert_eq!(
            text(&get(&app, "/index/params/hello/world").await),
            "say: hello,\n say2: world"
        );
    }

    #[tokio::test]
    async fn paint_requires_an_integer() {
        let app = app().build().unwrap();
        assert_eq!(text(&get(&app, "/index/paint/42").await), "ID: 42");
        assert_eq!(get(&app, "/index/paint/abc").await.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn query_values() {
        let app = app().build().unwrap();
        assert_eq!(text(&get(&app, "/index/qry?qry=hi").await), "qry: hi");
        assert_eq!(text(&get(&app, "/index/qry").await), "qry: ");

        let res = get(&app, "/qrypar?id=1&name=som").await;
        let person: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(person, serde_json::json!({ "id": 1, "name": "som" }));
    }

    #[tokio::test]
    async fn wildcard_remainder() {
        let app = app().build().unwrap();
        assert_eq!(text(&get(&app, "/wildcards/a/b/c/d/e/1").await), "a/b/c/d/e/1");
    }

    #[tokio::test]
    async fn application_error() {
        let app = app().build().unwrap();
        let res = get(&app, "/error").await;
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(text(&res), "content not found");
        assert!(res.header(middleware::REQUEST_ID_HEADER).is_some());
    }

    #[tokio::test]
    async fn error_responses_keep_middleware_headers() {
        let app = app().build().unwrap();

        let res = get(&app, "/nope").await;
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        assert!(res.header(middleware::REQUEST_ID_HEADER).is_some());

        let res = get(&app, "/index/paint/abc").await;
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
        assert!(res.header(middleware::REQUEST_ID_HEADER).is_some());

        let res = get(&app, "/v1/missing").await;
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(res.header("version"), Some("v1"));
    }

    #[tokio::test]
    async fn groups_tag_version_and_request_id() {
        let app = app().build().unwrap();
        let res = get(&app, "/v2/index").await;
        assert_eq!(text(&res), "Index v2");
        assert_eq!(res.header("version"), Some("v2"));
        assert!(res.header(middleware::REQUEST_ID_HEADER).is_some());
    }

    #[tokio::test]
    async fn mounted_login() {
        let app = app().build().unwrap();
        assert_eq!(text(&get(&app, "/user/login").await), "login");
    }

    #[tokio::test]
    async fn env_reports_request_metadata() {
        let app = app().build().unwrap();
        let res = get(&app, "/env?id=123").await;
        let env: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(
            env,
            serde_json::json!({
                "BaseURL": "http://localhost:8000",
                "Hostname": "localhost:8000",
                "IP": "127.0.0.1",
                "IPs": [],
                "OriginalURL": "/env?id=123",
                "Path": "/env",
                "Protocol": "http",
                "Subdomains": ["localhost:8000"],
            })
        );
    }

    #[tokio::test]
    async fn bodies() {
        let app = app().build().unwrap();
        let json = Some("application/json");

        let res = call(&app, Method::POST, "/bodytostruct", json, r#"{"id":1,"name":"som"}"#).await;
        assert_eq!(res.status_code(), StatusCode::OK);

        let res = call(&app, Method::POST, "/bodytomap", json, r#"{"any":["thing"]}"#).await;
        assert_eq!(res.status_code(), StatusCode::OK);

        let res = call(&app, Method::POST, "/bodytostruct", json, "{oops").await;
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);

        let res = call(&app, Method::POST, "/bodytostruct", Some("text/plain"), "hi").await;
        assert_eq!(res.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
