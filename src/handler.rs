//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! A route's chain mixes user handlers of many concrete types with middleware
//! closures. All of them are stored behind one trait object so the router can
//! keep a single `BoxedHandler` per route:
//!
//! ```text
//! async fn show(ctx: Context) -> Result<(), E> { … }   ← user writes this
//!        ↓ router.get("/users/{id}", show)
//! show.into_boxed_handler()                            ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(show))                            ← heap-allocated wrapper
//!        ↓  wrapped by each middleware in the route's stack
//! chain.call(ctx)  at request time                     ← one vtable dispatch per layer
//! ```
//!
//! A handler writes its response through the [`Context`] and returns `Ok(())`,
//! or returns an error for the centralized normalizer to turn into a response.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::BoxError;

// ── Internal types ────────────────────────────────────────────────────────────

/// The result every link of a chain resolves to.
pub type HandlerResult = Result<(), BoxError>;

/// A heap-allocated, type-erased future resolving to a [`HandlerResult`].
pub type BoxFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'static>>;

#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, ctx: Context) -> BoxFuture;
}

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// Satisfied by any `async fn` (or closure returning a future) of the shape:
///
/// ```text
/// async fn name(ctx: Context) -> Result<(), E>   where E: Into<BoxError>
/// ```
///
/// The trait is sealed; the blanket impl below is the only implementation.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, E> private::Sealed for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
}

impl<F, Fut, E> Handler for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

struct FnHandler<F>(F);

impl<F, Fut, E> ErasedHandler for FnHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture {
        let fut = (self.0)(ctx);
        Box::pin(async move { fut.await.map_err(Into::into) })
    }
}

// ── Next ──────────────────────────────────────────────────────────────────────

/// The inner part of a chain, handed to a middleware when it wraps it.
///
/// Calling [`Next::run`] continues towards the terminal handler. Not calling
/// it short-circuits: nothing further down the chain executes.
#[derive(Clone)]
pub struct Next(BoxedHandler);

impl Next {
    pub(crate) fn new(inner: BoxedHandler) -> Self {
        Self(inner)
    }

    pub fn run(&self, ctx: Context) -> BoxFuture {
        self.0.call(ctx)
    }
}
