//! Static file serving.
//!
//! A directory registered with [`Router::static_files`](crate::Router::static_files)
//! is the last resort for `GET`/`HEAD` requests no route matched: the path
//! below the prefix is percent-decoded segment by segment and resolved inside
//! the directory, directories answer with their index file, and a
//! `cache-control` max-age is attached. Decoded `..` segments and encoded
//! separators are refused.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use http::StatusCode;
use percent_encoding::percent_decode_str;

use crate::context::Context;
use crate::error::Error;
use crate::pattern::{self, split};
use crate::response::Response;

/// How a static directory is served.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticConfig {
    /// File served for a request naming a directory.
    pub index: String,
    /// `max-age` attached as `cache-control`; zero omits the header.
    pub cache_duration: Duration,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self { index: "index.html".to_owned(), cache_duration: Duration::from_secs(10) }
    }
}

#[derive(Debug)]
pub(crate) struct StaticFiles {
    prefix: String,
    root: PathBuf,
    config: StaticConfig,
}

impl StaticFiles {
    pub(crate) fn new(prefix: String, root: PathBuf, config: StaticConfig) -> Self {
        Self { prefix, root, config }
    }

    pub(crate) fn prefix(&self) -> &str {
        &self.prefix
    }

    pub(crate) fn covers(&self, path: &str, case_sensitive: bool) -> bool {
        pattern::covers(&self.prefix, path, case_sensitive)
    }

    pub(crate) async fn serve(&self, ctx: &Context) -> Result<Response, Error> {
        let not_found = || Error::NotFound {
            method: ctx.method().clone(),
            path: ctx.uri().path().to_owned(),
        };

        let relative = pattern::strip(&self.prefix, ctx.path(), false).ok_or_else(not_found)?;
        let mut file = self.root.clone();
        for raw in split(relative) {
            let segment = percent_decode_str(raw).decode_utf8().map_err(|_| not_found())?;
            if segment == ".." || segment == "." || segment.contains(['/', '\\', '\0']) {
                return Err(not_found());
            }
            file.push(&*segment);
        }

        let metadata = match tokio::fs::metadata(&file).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };
        if metadata.is_dir() {
            file.push(&self.config.index);
        }

        let body = match tokio::fs::read(&file).await {
            Ok(body) => body,
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::IsADirectory) => {
                return Err(not_found());
            }
            Err(e) => return Err(e.into()),
        };

        let mut response = Response::builder().status(StatusCode::OK);
        let max_age = self.config.cache_duration.as_secs();
        if max_age > 0 {
            response = response.header("cache-control", &format!("public, max-age={max_age}"));
        }
        Ok(response.bytes(&content_type(&file), body))
    }
}

fn content_type(file: &Path) -> String {
    let mime = mime_guess::from_path(file).first_or_octet_stream();
    if mime.type_() == mime_guess::mime::TEXT {
        format!("{}; charset=utf-8", mime.essence_str())
    } else {
        mime.essence_str().to_owned()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn ctx(path: &str) -> Context {
        let request = http::Request::builder().uri(path).body(Bytes::new()).unwrap();
        Context::new(request, "127.0.0.1:9".parse().unwrap())
    }

    fn site() -> (tempfile::TempDir, StaticFiles) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        std::fs::create_dir(dir.path().join("css")).unwrap();
        std::fs::write(dir.path().join("css/site.css"), "body{}").unwrap();
        let files = StaticFiles::new("/".into(), dir.path().to_path_buf(), StaticConfig::default());
        (dir, files)
    }

    #[tokio::test]
    async fn root_serves_index() {
        let (_dir, files) = site();
        let res = files.serve(&ctx("/")).await.unwrap();
        assert_eq!(&res.body()[..], b"<h1>home</h1>");
        assert_eq!(res.header("content-type"), Some("text/html; charset=utf-8"));
        assert_eq!(res.header("cache-control"), Some("public, max-age=10"));
    }

    #[tokio::test]
    async fn nested_file_with_mime() {
        let (_dir, files) = site();
        let res = files.serve(&ctx("/css/site.css")).await.unwrap();
        assert_eq!(res.header("content-type"), Some("text/css; charset=utf-8"));
    }

    #[tokio::test]
    async fn traversal_and_missing_are_not_found() {
        let (_dir, files) = site();
        assert!(matches!(files.serve(&ctx("/../etc/passwd")).await, Err(Error::NotFound { .. })));
        assert!(matches!(files.serve(&ctx("/nope.txt")).await, Err(Error::NotFound { .. })));
        assert!(matches!(files.serve(&ctx("/css")).await, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn encoded_segments_are_decoded_before_lookup() {
        let (dir, files) = site();
        std::fs::write(dir.path().join("my page.html"), "spaced").unwrap();

        let res = files.serve(&ctx("/my%20page.html")).await.unwrap();
        assert_eq!(&res.body()[..], b"spaced");

        let escapes = ["/%2e%2e/etc/passwd", "/css/%2E%2E/%2e%2e/etc", "/..%2Fetc%2Fpasswd"];
        for path in escapes {
            let result = files.serve(&ctx(path)).await;
            assert!(matches!(result, Err(Error::NotFound { .. })), "{path}");
        }
    }

    #[tokio::test]
    async fn zero_cache_duration_omits_header() {
        let (dir, _) = site();
        let config = StaticConfig { cache_duration: Duration::ZERO, ..StaticConfig::default() };
        let files = StaticFiles::new("/assets".into(), dir.path().to_path_buf(), config);
        let res = files.serve(&ctx("/assets/index.html")).await.unwrap();
        assert!(res.header("cache-control").is_none());
    }
}
