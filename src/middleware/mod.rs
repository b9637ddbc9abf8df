//! Middleware layer.
//!
//! A middleware is a decorator: it takes the rest of the chain ([`Next`]) and
//! returns a new handler wrapping it. That is the right place for cross-cutting
//! concerns such as request logging, CSRF checks and authentication gates.
//!
//! Routes get their middleware from two places: names the router resolves
//! against the [`MiddlewareRegistry`], and values passed inline at
//! registration. Both end up in one [`MiddlewareStack`] that is composed
//! around the route handler once, when the route is registered.
//!
//! ```rust,no_run
//! use torii::middleware::Middleware;
//! use torii::{BoxError, Context, Next};
//!
//! let timing = Middleware::from_fn(|ctx: Context, next: Next| async move {
//!     let started = std::time::Instant::now();
//!     let result = next.run(ctx).await;
//!     tracing::debug!(elapsed = ?started.elapsed(), "handled");
//!     result
//! });
//! ```

mod auth;
mod csrf;
mod logging;
mod registry;

pub use auth::{authenticated, guest};
pub use csrf::{CsrfConfig, TokenLookup, csrf};
pub use logging::logging;
pub use registry::{MiddlewareRegistry, RegistryError};

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::context::Context;
use crate::error::BoxError;
use crate::handler::{BoxedHandler, Handler, Next};

/// A function from the inner handler to a wrapping handler.
#[derive(Clone)]
pub struct Middleware(Arc<dyn Fn(Next) -> BoxedHandler + Send + Sync + 'static>);

impl Middleware {
    /// Decorator form: `f` receives the rest of the chain and returns the
    /// handler that replaces it.
    pub fn new<F, H>(f: F) -> Self
    where
        F: Fn(Next) -> H + Send + Sync + 'static,
        H: Handler,
    {
        Self(Arc::new(move |next| f(next).into_boxed_handler()))
    }

    /// Convenience form: `f` runs per request with the context and the rest
    /// of the chain. Returning without awaiting `next.run(ctx)` short-circuits.
    pub fn from_fn<F, Fut, E>(f: F) -> Self
    where
        F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let f = Arc::new(f);
        Self::new(move |next: Next| {
            let f = Arc::clone(&f);
            move |ctx: Context| f(ctx, next.clone())
        })
    }

    pub(crate) fn wrap(&self, inner: BoxedHandler) -> BoxedHandler {
        (self.0)(Next::new(inner))
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Middleware")
    }
}

/// An ordered list of middleware to compose around a terminal handler.
///
/// The first entry becomes the outermost wrapper: its pre-handler logic runs
/// first and its post-handler logic runs last.
#[derive(Clone, Debug, Default)]
pub struct MiddlewareStack {
    stack: Vec<(String, Middleware)>,
}

impl MiddlewareStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `middleware`; `label` is only used for route introspection.
    pub fn push(&mut self, label: impl Into<String>, middleware: Middleware) {
        self.stack.push((label.into(), middleware));
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn labels(&self) -> Vec<String> {
        self.stack.iter().map(|(label, _)| label.clone()).collect()
    }

    /// Builds the chain. A right fold wraps the last entry around `terminal`
    /// first, so the first entry ends up outermost.
    pub fn compose(&self, terminal: BoxedHandler) -> BoxedHandler {
        self.stack
            .iter()
            .rfold(terminal, |inner, (_, middleware)| middleware.wrap(inner))
    }
}
