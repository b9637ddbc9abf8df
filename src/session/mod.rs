//! Cookie-backed session for one request, with one-shot flash values.
//!
//! Changes stay in memory until [`Session::save`] runs. Saving stages a
//! `Set-Cookie` header on the outgoing response; the response carries the
//! state of the last save. Flash reads save immediately, so a flash value is
//! gone for every later request that presents the new cookie.

mod store;

pub use store::{SessionError, SessionStore};

use std::sync::Arc;

use http::HeaderMap;
use http::header::HeaderValue;
use serde_json::{Map, Value};
use tracing::warn;

use store::Payload;

/// Flash key holding the previous form submission.
pub const OLD_INPUT_KEY: &str = "_old_inputs";

pub struct Session {
    store: Arc<SessionStore>,
    payload: Payload,
    is_new: bool,
    staged: Option<HeaderValue>,
}

impl Session {
    pub(crate) fn load(store: Arc<SessionStore>, headers: &HeaderMap) -> Self {
        let loaded = store.load(headers);
        Self {
            is_new: loaded.is_none(),
            payload: loaded.unwrap_or_default(),
            store,
            staged: None,
        }
    }

    /// `true` when the request carried no valid session cookie.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.payload.values.insert(key.into(), value.into());
    }

    pub fn delete(&mut self, key: &str) -> Option<Value> {
        self.payload.values.remove(key)
    }

    /// Removes every value and pending flash.
    pub fn clear(&mut self) {
        self.payload.values.clear();
        self.payload.flashes.clear();
    }

    /// Reads and removes `key` in one step, for one-shot tokens.
    pub fn get_once(&mut self, key: &str) -> Option<Value> {
        self.delete(key)
    }

    /// Encodes the session and stages the cookie on the response.
    pub fn save(&mut self) -> Result<(), SessionError> {
        self.staged = Some(self.store.set_cookie(&self.payload)?);
        Ok(())
    }

    /// Appends a flash value under `key` and saves.
    pub fn flash(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<(), SessionError> {
        self.payload.flashes.entry(key.into()).or_default().push(value.into());
        self.save()
    }

    /// Removes and returns every flash value under `key`, saving right away.
    pub fn get_flash(&mut self, key: &str) -> Vec<Value> {
        let Some(values) = self.payload.flashes.remove(key) else {
            return Vec::new();
        };
        if let Err(e) = self.save() {
            warn!(key, "failed to persist session after flash read: {e}");
        }
        values
    }

    pub fn has_flash(&self, key: &str) -> bool {
        self.payload.flashes.get(key).is_some_and(|v| !v.is_empty())
    }

    /// Flashes the submitted form input so the next page can refill the form.
    pub fn with_old(&mut self, input: Map<String, Value>) -> Result<(), SessionError> {
        self.flash(OLD_INPUT_KEY, Value::Object(input))
    }

    /// Consumes the input stored by [`Session::with_old`].
    pub fn old_input(&mut self) -> Map<String, Value> {
        self.get_flash(OLD_INPUT_KEY)
            .into_iter()
            .rev()
            .find_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .unwrap_or_default()
    }

    pub(crate) fn take_staged(&mut self) -> Option<HeaderValue> {
        self.staged.take()
    }
}
