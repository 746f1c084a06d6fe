//! Request id middleware.

use uuid::Uuid;

use crate::context::Context;
use crate::error::Error;
use crate::middleware::Next;
use crate::response::Response;

/// Header carrying the request id, in both directions.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The id of the current request, stored in locals under
/// [`RequestId::LOCAL`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub const LOCAL: &'static str = "request_id";

    /// The id stored by [`request_id`], if that middleware ran.
    pub fn of(ctx: &Context) -> Option<&str> {
        ctx.local::<RequestId>(Self::LOCAL).ok().map(|id| id.0.as_str())
    }
}

/// Reuses the caller's `x-request-id` or generates a UUID v4, stores it in
/// locals and stages it on the response.
pub async fn request_id(mut ctx: Context, next: Next) -> Result<Response, Error> {
    let id = ctx
        .header(REQUEST_ID_HEADER)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_owned);

    ctx.set_header(REQUEST_ID_HEADER, &id)?;
    ctx.set_local(RequestId::LOCAL, RequestId(id));
    next.run(ctx).await
}
