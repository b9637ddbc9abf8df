//! Catalog of named middleware and named middleware stacks.
//!
//! The registry is filled while the application starts
//! ([`App::middleware`](crate::App::middleware)) and moved into read-only
//! shared state when the root router is created, so no registration can race
//! with serving.

use std::collections::HashMap;

use tracing::debug;

use super::Middleware;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("middleware {0} is not registered")]
    NotRegistered(String),

    #[error("middleware {0} is already registered")]
    Duplicate(String),
}

#[derive(Debug, Default)]
pub struct MiddlewareRegistry {
    middlewares: Vec<(String, Middleware)>,
    stacks: HashMap<String, Vec<String>>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `middleware` under `name`. A second registration under the
    /// same name would be unreachable, so it is refused.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        middleware: Middleware,
    ) -> Result<&mut Self, RegistryError> {
        let name = name.into();
        if self.middlewares.iter().any(|(n, _)| *n == name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.middlewares.push((name, middleware));
        Ok(self)
    }

    /// Stores (or replaces) an ordered list of middleware names. The names are
    /// not checked here; unknown ones are reported when a route resolves them.
    pub fn register_stack<I, S>(&mut self, name: impl Into<String>, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stacks.insert(name.into(), names.into_iter().map(Into::into).collect());
        self
    }

    pub fn find(&self, name: &str) -> Result<&Middleware, RegistryError> {
        self.middlewares
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, m)| m)
            .ok_or_else(|| RegistryError::NotRegistered(name.to_owned()))
    }

    /// Names in the stack `name`; an unknown stack is empty.
    pub fn stack(&self, name: &str) -> &[String] {
        match self.stacks.get(name) {
            Some(names) => names,
            None => {
                debug!(stack = name, "unknown middleware stack, resolving to empty");
                &[]
            }
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.middlewares.iter().map(|(n, _)| n.as_str())
    }
}
