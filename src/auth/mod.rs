//! Session-backed authentication.
//!
//! Identity lives in the session under one key. A request is either a
//! [`AuthUser::Guest`] or an [`AuthUser::Identified`] user; there is no third
//! state. Verifying credentials is the caller's job, using
//! [`hash_password`]/[`verify_password`] or the OAuth helpers, before calling
//! [`Authentication::login`].

mod oauth;
mod password;

pub use oauth::OAuthToken;
pub use password::{PasswordError, PasswordHashParams, hash_password, verify_password};

use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::{AuthConfig, Config};
use crate::context::Context;
use crate::error::HttpError;
use crate::session::SessionError;

const AUTH_USER_KEY: &str = "auth_user";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("the nil id cannot be logged in")]
    InvalidIdentity,

    #[error("oauth state does not match")]
    StateMismatch,

    #[error("no oauth state stored in the session")]
    MissingState,

    #[error("token endpoint unreachable: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("token endpoint answered {status}: {error} {description}")]
    Provider {
        status: StatusCode,
        error: String,
        description: String,
    },

    #[error("token endpoint response could not be decoded: {0}")]
    InvalidResponse(#[source] reqwest::Error),

    #[error("invalid provider url: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Password(#[from] PasswordError),
}

impl AuthError {
    /// Status the client gets when this error reaches the normalizer.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::StateMismatch | Self::MissingState => StatusCode::UNAUTHORIZED,
            Self::Transport(_) | Self::Provider { .. } | Self::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AuthError> for HttpError {
    fn from(err: AuthError) -> Self {
        let status = err.status();
        if status.is_server_error() {
            HttpError::new(status).with_internal(err)
        } else {
            HttpError::with_message(status, err.to_string()).with_internal(err)
        }
    }
}

/// Who is making the request.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthUser {
    Guest,
    #[serde(rename = "user")]
    Identified { id: Uuid, payload: Value },
}

impl AuthUser {
    pub fn is_guest(&self) -> bool {
        matches!(self, Self::Guest)
    }

    pub fn id(&self) -> Option<Uuid> {
        match self {
            Self::Guest => None,
            Self::Identified { id, .. } => Some(*id),
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Guest => None,
            Self::Identified { payload, .. } => Some(payload),
        }
    }
}

/// Anything that can be logged in.
pub trait Authenticatable {
    fn auth_id(&self) -> Uuid;

    /// Extra data kept next to the id, e.g. a display name.
    fn auth_payload(&self) -> Value {
        Value::Null
    }
}

/// Session representation of an identity.
#[derive(Serialize, Deserialize)]
struct StoredUser {
    id: Uuid,
    #[serde(default)]
    data: Value,
}

/// Login state and OAuth client, shared by every request.
pub struct Authentication {
    config: AuthConfig,
    redirect_uri: String,
    client: reqwest::Client,
}

impl Authentication {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.auth.request_timeout())
            .build()?;
        Ok(Self {
            config: config.auth.clone(),
            redirect_uri: format!(
                "{}{}",
                config.app.domain.trim_end_matches('/'),
                config.auth.redirect_path
            ),
            client,
        })
    }

    pub fn current_user(&self, ctx: &Context) -> AuthUser {
        let session = ctx.session();
        let Some(stored) = session
            .get(AUTH_USER_KEY)
            .and_then(|v| serde_json::from_value::<StoredUser>(v.clone()).ok())
        else {
            return AuthUser::Guest;
        };
        if stored.id.is_nil() {
            return AuthUser::Guest;
        }
        AuthUser::Identified { id: stored.id, payload: stored.data }
    }

    /// Stores `user` as the session identity and persists the session.
    pub fn login(&self, ctx: &Context, user: &impl Authenticatable) -> Result<(), AuthError> {
        let id = user.auth_id();
        if id.is_nil() {
            return Err(AuthError::InvalidIdentity);
        }
        let stored = serde_json::to_value(StoredUser { id, data: user.auth_payload() })
            .map_err(SessionError::from)?;

        let mut session = ctx.session();
        session.set(AUTH_USER_KEY, stored);
        session.save()?;
        Ok(())
    }

    pub fn logout(&self, ctx: &Context) -> Result<(), AuthError> {
        let mut session = ctx.session();
        session.delete(AUTH_USER_KEY);
        session.save()?;
        Ok(())
    }

    /// Hashes with the configured cost parameters.
    pub fn hash_password(&self, password: &str) -> Result<String, PasswordError> {
        hash_password(password, &self.config.password)
    }

    /// Verifies and reports whether the stored hash should be upgraded to the
    /// configured parameters.
    pub fn verify_password(&self, password: &str, encoded: &str) -> Result<(bool, bool), PasswordError> {
        let (matched, params) = verify_password(password, encoded)?;
        Ok((matched, params.is_weaker_than(&self.config.password)))
    }
}
