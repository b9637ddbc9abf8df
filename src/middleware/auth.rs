//! Login gates.

use std::sync::Arc;

use http::StatusCode;
use tracing::debug;

use super::Middleware;
use crate::context::Context;
use crate::handler::Next;

/// Lets identified users through and sends guests to `redirect_path` with a
/// `302 Found`. The rest of the chain does not run for guests.
pub fn authenticated(redirect_path: impl Into<String>) -> Middleware {
    redirect_when(redirect_path.into(), true)
}

/// The inverse gate, for pages like the login form: identified users are
/// redirected, guests pass.
pub fn guest(redirect_path: impl Into<String>) -> Middleware {
    redirect_when(redirect_path.into(), false)
}

fn redirect_when(redirect_path: String, guest: bool) -> Middleware {
    let redirect_path: Arc<str> = redirect_path.into();
    Middleware::from_fn(move |ctx: Context, next: Next| {
        let redirect_path = Arc::clone(&redirect_path);
        async move {
            if ctx.current_user().is_guest() == guest {
                debug!(path = %ctx.path(), to = %redirect_path, "redirected by login gate");
                ctx.redirect(StatusCode::FOUND, &redirect_path)?;
                return Ok(());
            }
            next.run(ctx).await
        }
    })
}
