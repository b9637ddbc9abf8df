//! Application configuration consumed by the dispatch core.
//!
//! Loading it (files, environment) is the host application's business. Every
//! struct here derives `Deserialize` with field defaults, so any serde source
//! works and partial documents are fine.

use std::time::Duration;

use serde::Deserialize;

use crate::auth::PasswordHashParams;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("session secret must not be empty")]
    EmptySessionSecret,

    #[error("session cookie name `{0}` is not a valid cookie token")]
    InvalidSessionName(String),

    #[error("session max age must be greater than zero")]
    ZeroSessionMaxAge,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub session: SessionConfig,
    pub auth: AuthConfig,
}

impl Config {
    /// Checks the settings the core cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.secret.is_empty() {
            return Err(ConfigError::EmptySessionSecret);
        }
        let name = &self.session.name;
        if name.is_empty() || !name.bytes().all(is_cookie_token_byte) {
            return Err(ConfigError::InvalidSessionName(name.clone()));
        }
        if self.session.max_age_secs == 0 {
            return Err(ConfigError::ZeroSessionMaxAge);
        }
        Ok(())
    }
}

// RFC 6265 §4.1.1 cookie-name is an RFC 2616 token.
fn is_cookie_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    #[default]
    Development,
    Testing,
    Staging,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Self::Production
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Production  => "production",
            Self::Development => "development",
            Self::Testing     => "testing",
            Self::Staging     => "staging",
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub port: u16,
    pub environment: Environment,
    /// Public origin of the application, e.g. `https://app.example.com`.
    pub domain: String,
    /// Expose underlying error text in error responses.
    pub debug: bool,
    pub shutdown_grace_secs: u64,
    /// Largest request body the server reads; bigger bodies get `413`.
    pub max_body_bytes: usize,
}

impl AppConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "torii".to_owned(),
            port: 3000,
            environment: Environment::Development,
            domain: "http://localhost:3000".to_owned(),
            debug: false,
            shutdown_grace_secs: 5,
            max_body_bytes: 4 << 20,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Cookie name.
    pub name: String,
    /// HMAC key used to sign the session cookie.
    pub secret: String,
    pub max_age_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "_session".to_owned(),
            secret: String::new(),
            max_age_secs: 30 * 24 * 60 * 60,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    #[default]
    OAuth,
    Database,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub provider: AuthProvider,
    /// OAuth provider base URL; `/authorize` and `/token` are appended.
    pub endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    /// Callback path on [`AppConfig::domain`].
    pub redirect_path: String,
    /// Upper bound for calls to the provider's token endpoint.
    pub request_timeout_secs: u64,
    pub password: PasswordHashParams,
}

impl AuthConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            provider: AuthProvider::OAuth,
            endpoint: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            scopes: Vec::new(),
            redirect_path: "/auth/callback".to_owned(),
            request_timeout_secs: 10,
            password: PasswordHashParams::default(),
        }
    }
}
