//! Synchronizer-token CSRF protection.
//!
//! Each session gets one random token. Safe methods just publish it in the
//! context scratch data (for forms and templates); every other method must
//! echo it back through the configured [`TokenLookup`].

use std::str::FromStr;
use std::sync::Arc;

use http::header::{HeaderValue, VARY};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::Value;
use subtle::ConstantTimeEq;

use super::Middleware;
use crate::context::Context;
use crate::error::{BoxError, HttpError};
use crate::handler::Next;
use crate::method::Method;

/// Where a request carries its CSRF token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenLookup {
    Header(String),
    /// Field of a form-encoded body.
    Form(String),
    Query(String),
}

impl TokenLookup {
    fn extract(&self, ctx: &Context) -> Option<String> {
        match self {
            Self::Header(name) => ctx.header(name).map(str::to_owned),
            Self::Form(name) => {
                let is_form = ctx.request().media_type().as_deref()
                    == Some(mime::APPLICATION_WWW_FORM_URLENCODED.as_ref());
                if !is_form {
                    return None;
                }
                find_pair(ctx.body(), name)
            }
            Self::Query(name) => find_pair(ctx.uri().query()?.as_bytes(), name),
        }
        .filter(|token| !token.is_empty())
    }

    fn source(&self) -> &'static str {
        match self {
            Self::Header(_) => "request header",
            Self::Form(_) => "form parameter",
            Self::Query(_) => "query string",
        }
    }
}

fn find_pair(encoded: &[u8], name: &str) -> Option<String> {
    url::form_urlencoded::parse(encoded)
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// Parses `header:<name>`, `form:<name>` or `query:<name>`.
impl FromStr for TokenLookup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("header", name)) if !name.is_empty() => Ok(Self::Header(name.to_owned())),
            Some(("form", name)) if !name.is_empty() => Ok(Self::Form(name.to_owned())),
            Some(("query", name)) if !name.is_empty() => Ok(Self::Query(name.to_owned())),
            _ => Err(format!("invalid csrf token lookup `{s}`")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CsrfConfig {
    pub token_length: usize,
    pub lookup: TokenLookup,
    /// Scratch-data key the token is published under.
    pub context_key: String,
    /// Session key the token is stored under.
    pub session_key: String,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            token_length: 32,
            lookup: TokenLookup::Header("X-CSRF-Token".to_owned()),
            context_key: "csrf".to_owned(),
            session_key: "_csrf".to_owned(),
        }
    }
}

/// Rejects unsafe requests without the session's token: a missing token is
/// `400`, a wrong one `403 invalid csrf token`.
pub fn csrf(config: CsrfConfig) -> Middleware {
    let config = Arc::new(config);
    Middleware::from_fn(move |ctx: Context, next: Next| {
        let config = Arc::clone(&config);
        async move {
            let token = session_token(&ctx, &config)?;
            ctx.set_header(VARY, HeaderValue::from_static("Cookie"));

            // Methods outside the RFC set are treated as unsafe.
            let safe = Method::try_from(ctx.method()).is_ok_and(Method::is_safe);
            if !safe {
                let Some(sent) = config.lookup.extract(&ctx) else {
                    return Err(HttpError::bad_request(format!(
                        "missing csrf token in the {}",
                        config.lookup.source()
                    ))
                    .into());
                };
                if !bool::from(token.as_bytes().ct_eq(sent.as_bytes())) {
                    return Err(HttpError::forbidden("invalid csrf token").into());
                }
            }

            ctx.set(config.context_key.clone(), token);
            next.run(ctx).await
        }
    })
}

/// The session's token, minted and saved on first use.
fn session_token(ctx: &Context, config: &CsrfConfig) -> Result<String, BoxError> {
    let mut session = ctx.session();
    if let Some(token) = session.get(&config.session_key).and_then(Value::as_str) {
        return Ok(token.to_owned());
    }
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(config.token_length)
        .map(char::from)
        .collect();
    session.set(config.session_key.clone(), token.clone());
    session.save()?;
    Ok(token)
}
