//! OAuth 2.0 authorization-code flow helpers.

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use subtle::ConstantTimeEq;
use tracing::debug;
use url::Url;

use super::{AuthError, Authentication};
use crate::context::Context;

const OAUTH_STATE_KEY: &str = "oauth_state";
const STATE_LEN: usize = 32;

/// Token endpoint response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub token_type: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Lifetime in seconds. Some providers send it as `expires_at`.
    #[serde(default, alias = "expires_at")]
    pub expires_in: u64,
    #[serde(default)]
    pub scope: String,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
    redirect_uri: &'a str,
    code: &'a str,
}

/// RFC 6749 §5.2 error body.
#[derive(Default, Deserialize)]
struct ProviderErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

impl Authentication {
    /// Builds the provider's authorization URL and remembers a fresh `state`
    /// in the session for [`compare_oauth_state`](Self::compare_oauth_state).
    pub fn authorization_redirect_uri(&self, ctx: &Context) -> Result<String, AuthError> {
        let mut url = Url::parse(&format!("{}/authorize", self.endpoint()))?;
        let state = random_state();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("state", &state);

        let mut session = ctx.session();
        session.set(OAUTH_STATE_KEY, state);
        session.save()?;
        Ok(url.into())
    }

    /// Checks the `state` returned on the callback against the stored one.
    /// A match consumes the stored state, so each state is good for one
    /// callback only.
    pub fn compare_oauth_state(&self, ctx: &Context, received: &str) -> Result<(), AuthError> {
        let mut session = ctx.session();
        let Some(stored) = session.get(OAUTH_STATE_KEY).and_then(Value::as_str) else {
            return Err(AuthError::MissingState);
        };
        if !bool::from(stored.as_bytes().ct_eq(received.as_bytes())) {
            return Err(AuthError::StateMismatch);
        }
        session.delete(OAUTH_STATE_KEY);
        session.save()?;
        Ok(())
    }

    /// Exchanges an authorization code at `<endpoint>/token`.
    ///
    /// Not retried; a transport failure or a provider error goes back to the
    /// caller.
    pub async fn exchange_authorization_code(&self, code: &str) -> Result<OAuthToken, AuthError> {
        let body = TokenRequest {
            grant_type: "authorization_code",
            client_id: &self.config.client_id,
            client_secret: &self.config.client_secret,
            redirect_uri: &self.redirect_uri,
            code,
        };
        let url = format!("{}/token", self.endpoint());

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(AuthError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let body: ProviderErrorBody = response.json().await.unwrap_or_default();
            debug!(%status, error = %body.error, "token exchange refused");
            return Err(AuthError::Provider {
                status,
                error: body.error,
                description: body.error_description,
            });
        }

        response.json().await.map_err(AuthError::InvalidResponse)
    }

    fn endpoint(&self) -> &str {
        self.config.endpoint.trim_end_matches('/')
    }
}

fn random_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_LEN)
        .map(char::from)
        .collect()
}
