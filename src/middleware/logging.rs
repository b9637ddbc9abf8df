//! Request logging.

use std::time::Instant;

use http::header::{HeaderName, HeaderValue};
use tracing::info;
use uuid::Uuid;

use super::Middleware;
use crate::context::Context;
use crate::handler::Next;

static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Emits one `request_log` event per request.
///
/// The request id is taken from `X-Request-Id` or generated, and echoed on
/// the response. An error from the chain is logged and passed on unchanged;
/// the status it turns into is decided by the error normalizer afterwards.
pub fn logging() -> Middleware {
    Middleware::from_fn(|ctx: Context, next: Next| async move {
        let started = Instant::now();
        let request_id = ctx
            .header(X_REQUEST_ID.as_str())
            .map(str::to_owned)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            ctx.set_header(X_REQUEST_ID.clone(), value);
        }

        let result = next.run(ctx.clone()).await;

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let status = ctx.status().as_u16();
        let remote_ip = ctx.real_ip().unwrap_or_default();
        let user_agent = ctx.header("user-agent").unwrap_or_default();
        match &result {
            Ok(()) => info!(
                method = %ctx.method(),
                uri = %ctx.uri(),
                status,
                latency_ms,
                request_id = %request_id,
                remote_ip = %remote_ip,
                user_agent,
                "request_log"
            ),
            Err(e) => info!(
                method = %ctx.method(),
                uri = %ctx.uri(),
                latency_ms,
                request_id = %request_id,
                remote_ip = %remote_ip,
                user_agent,
                error = %e,
                "request_log"
            ),
        }
        result
    })
}
