//! Application startup phase.
//!
//! Everything that must not change while serving (configuration, the
//! middleware registry, the template renderer) is collected by [`App`] and
//! frozen into shared state by [`App::into_router`]. The registry cannot be
//! written after that point because nothing holds a mutable reference to it.

use std::sync::Arc;

use tracing::info;

use crate::auth::Authentication;
use crate::config::Config;
use crate::context::Renderer;
use crate::error::Error;
use crate::middleware::MiddlewareRegistry;
use crate::router::Router;
use crate::session::SessionStore;

pub struct App {
    config: Config,
    registry: MiddlewareRegistry,
    renderer: Option<Arc<dyn Renderer>>,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: MiddlewareRegistry::new(),
            renderer: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registry of named middleware and stacks; writable until
    /// [`into_router`](Self::into_router).
    pub fn middleware(&mut self) -> &mut MiddlewareRegistry {
        &mut self.registry
    }

    pub fn with_renderer(mut self, renderer: impl Renderer) -> Self {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    /// Validates the configuration and ends the startup phase.
    pub fn into_router(self) -> Result<Router, Error> {
        self.config.validate()?;
        let shared = Shared::new(self.config, self.registry, self.renderer)?;
        info!(
            app = %shared.config.app.name,
            environment = shared.config.app.environment.as_str(),
            middleware = shared.registry.names().count(),
            "application configured"
        );
        Ok(Router::root(Arc::new(shared)))
    }
}

/// Read-only state shared by every router and request.
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) registry: MiddlewareRegistry,
    pub(crate) sessions: Arc<SessionStore>,
    pub(crate) auth: Authentication,
    pub(crate) renderer: Option<Arc<dyn Renderer>>,
}

impl Shared {
    pub(crate) fn new(
        config: Config,
        registry: MiddlewareRegistry,
        renderer: Option<Arc<dyn Renderer>>,
    ) -> Result<Self, Error> {
        Ok(Self {
            sessions: Arc::new(SessionStore::from_config(&config)),
            auth: Authentication::new(&config)?,
            config,
            registry,
            renderer,
        })
    }
}
