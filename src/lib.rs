//! # torii
//!
//! The request-dispatch core of a server-side web framework: routing,
//! middleware pipelines, per-request context, cookie sessions with flash
//! messages, and authentication.
//!
//! ## The pieces
//!
//! - [`App`] collects configuration, named middleware and a template renderer
//!   while the process starts, then freezes them into a [`Router`].
//! - [`Router`] keeps one radix tree per method (via [`matchit`]), named
//!   routes for URL reversal, prefix groups, and composes each route's
//!   middleware chain once, at registration.
//! - [`Context`] is what handlers receive: merged parameters, scratch data,
//!   the [`Session`], the current user and the response writers.
//! - Errors returned by a chain go to one normalizer that writes
//!   `{"message": ..}` with the right status.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use http::StatusCode;
//! use torii::{App, BoxError, Config, Context, Server, middleware};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), torii::Error> {
//!     let mut config = Config::default();
//!     config.session.secret = std::env::var("SESSION_SECRET").unwrap_or_default();
//!
//!     let mut app = App::new(config.clone());
//!     app.middleware()
//!         .register("logging", middleware::logging())?
//!         .register("auth", middleware::authenticated("/login"))?;
//!
//!     let router = app
//!         .into_router()?
//!         .use_middleware("logging")
//!         .get_named("/users/{id}", "user.show", show_user)
//!         .group_inheriting("/account", |account| {
//!             account.use_middleware("auth").get("/", show_user)
//!         });
//!
//!     Server::from_config(&config).serve(router).await
//! }
//!
//! async fn show_user(ctx: Context) -> Result<(), BoxError> {
//!     ctx.json(StatusCode::OK, &serde_json::json!({ "id": ctx.param("id") }))?;
//!     Ok(())
//! }
//! ```

mod app;
mod bind;
mod context;
mod error;
mod error_handler;
mod handler;
mod method;
mod request;
mod response;
mod router;
mod server;

pub mod auth;
pub mod config;
pub mod middleware;
pub mod session;

#[cfg(test)]
mod test_support;

pub use app::App;
pub use auth::{AuthUser, Authenticatable, Authentication};
pub use bind::{BindError, MAX_BODY_BYTES};
pub use config::Config;
pub use context::{Context, Params, Renderer};
pub use error::{BoxError, Error, HttpError};
pub use handler::{BoxFuture, Handler, HandlerResult, Next};
pub use method::Method;
pub use middleware::Middleware;
pub use request::{PeerAddr, Request};
pub use response::{ContentType, Response};
pub use router::{RouteConfig, Router};
pub use server::Server;
pub use session::Session;
