//! Centralized error normalization.
//!
//! Every error a chain returns ends up here. This is the only place that
//! writes error responses and the only place that logs them, so handlers can
//! just return `Err(..)`.

use http::StatusCode;
use serde_json::{Value, json};
use tracing::{debug, error};

use crate::auth::AuthError;
use crate::bind::BindError;
use crate::context::Context;
use crate::error::{BoxError, HttpError};

/// Replaces whatever the chain wrote with an error response for `err`.
///
/// HEAD requests get the status alone. Everything else gets
/// `{"message": ..}`, plus `"error"` with the underlying cause in debug mode.
pub(crate) fn handle(ctx: &Context, err: BoxError) {
    let (status, message) = classify(err.as_ref());

    if status.is_server_error() {
        error!(method = %ctx.method(), path = %ctx.path(), status = status.as_u16(), "request failed: {err}");
    } else {
        debug!(method = %ctx.method(), path = %ctx.path(), status = status.as_u16(), "request rejected: {err}");
    }

    if ctx.method() == http::Method::HEAD {
        ctx.error_status(status);
        return;
    }

    let mut body = json!({ "message": message });
    if ctx.config().app.debug {
        body["error"] = Value::from(cause(err.as_ref()));
    }
    if let Err(e) = ctx.error_json(status, &body) {
        error!(path = %ctx.path(), "failed to write error response: {e}");
    }
}

fn classify(err: &(dyn std::error::Error + Send + Sync + 'static)) -> (StatusCode, String) {
    if let Some(e) = err.downcast_ref::<HttpError>() {
        return (e.status(), e.message().to_owned());
    }
    if let Some(e) = err.downcast_ref::<BindError>() {
        return (e.status(), e.to_string());
    }
    if let Some(e) = err.downcast_ref::<AuthError>() {
        let status = e.status();
        let message = if status.is_server_error() {
            reason(status)
        } else {
            e.to_string()
        };
        return (status, message);
    }
    (StatusCode::INTERNAL_SERVER_ERROR, reason(StatusCode::INTERNAL_SERVER_ERROR))
}

fn cause(err: &(dyn std::error::Error + Send + Sync + 'static)) -> String {
    match err.downcast_ref::<HttpError>().and_then(HttpError::internal_error) {
        Some(internal) => internal.to_string(),
        None => err.to_string(),
    }
}

fn reason(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or("Unknown Error").to_owned()
}
