//! Request tracing middleware.

use std::time::Instant;

use tracing::{Instrument, info, info_span, warn};

use crate::context::Context;
use crate::error::Error;
use crate::middleware::Next;
use crate::response::Response;

/// Wraps the rest of the chain in a `request` span and logs one line per
/// request with its status and latency.
///
/// Register it globally, before anything whose logs should carry the span:
///
/// ```rust
/// use trellis::{Router, middleware};
///
/// let app = Router::new().middleware("/", middleware::trace);
/// ```
pub async fn trace(ctx: Context, next: Next) -> Result<Response, Error> {
    let method = ctx.method().clone();
    let url = ctx.original_url().to_owned();
    let span = info_span!("request", %method, %url, ip = %ctx.ip());
    let started = Instant::now();

    let result = next.run(ctx).instrument(span.clone()).await;

    let _entered = span.enter();
    let elapsed = started.elapsed();
    match &result {
        Ok(response) => {
            info!(status = response.status_code().as_u16(), ?elapsed, "request completed")
        }
        Err(err) => warn!(status = err.status().as_u16(), ?elapsed, error = %err, "request failed"),
    }
    result
}
