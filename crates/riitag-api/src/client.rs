use riitag_core::config::{OAuth2Config, RiitagConfig};
use riitag_core::RemoteState;

use crate::error::ApiError;
use crate::oauth2::TokenStore;
use crate::traits::StateSource;
use crate::types::{DiscordUser, RiitagResponse};

/// Client for the public RiiTag JSON endpoint.
#[derive(Debug, Clone)]
pub struct RiitagClient {
    http: reqwest::Client,
    state_endpoint: String,
}

impl RiitagClient {
    pub fn new(http: reqwest::Client, state_endpoint: impl Into<String>) -> Self {
        Self {
            http,
            state_endpoint: state_endpoint.into(),
        }
    }

    pub fn from_config(http: reqwest::Client, config: &RiitagConfig) -> Self {
        Self::new(http, config.state_endpoint.clone())
    }

    fn state_url(&self, user_id: &str) -> String {
        format!("{}/{user_id}/json", self.state_endpoint.trim_end_matches('/'))
    }
}

impl StateSource for RiitagClient {
    async fn fetch_state(&self, user_id: &str) -> Result<RemoteState, ApiError> {
        let resp = self.http.get(self.state_url(user_id)).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            // An error body still means "no such tag", whatever the status.
            if let Ok(RiitagResponse::Error { error }) = serde_json::from_str(&body) {
                return Err(ApiError::NotFound(format!("{user_id}: {error}")));
            }
            return Err(ApiError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        parse_state(user_id, &body)
    }
}

/// Decode a RiiTag response body.
pub fn parse_state(user_id: &str, body: &str) -> Result<RemoteState, ApiError> {
    match serde_json::from_str::<RiitagResponse>(body) {
        Ok(RiitagResponse::Tag(tag)) => Ok(tag.into_remote_state()),
        Ok(RiitagResponse::Error { error }) => {
            Err(ApiError::NotFound(format!("{user_id}: {error}")))
        }
        Err(e) => Err(ApiError::Parse(e.to_string())),
    }
}

/// Client for the Discord REST API, authenticated with the user's token.
#[derive(Debug, Clone)]
pub struct DiscordClient {
    http: reqwest::Client,
    api_endpoint: String,
}

impl DiscordClient {
    pub fn new(http: reqwest::Client, api_endpoint: impl Into<String>) -> Self {
        Self {
            http,
            api_endpoint: api_endpoint.into(),
        }
    }

    pub fn from_config(http: reqwest::Client, config: &OAuth2Config) -> Self {
        Self::new(http, config.api_endpoint.clone())
    }

    /// `GET /users/@me`. Refreshes the token first if it has expired.
    pub async fn current_user(&self, tokens: &mut TokenStore) -> Result<DiscordUser, ApiError> {
        let bearer = tokens.bearer().await?;
        let url = format!("{}/users/@me", self.api_endpoint.trim_end_matches('/'));
        let resp = self.http.get(&url).bearer_auth(bearer).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Api {
                status,
                message: body,
            });
        }

        let user = resp
            .json::<DiscordUser>()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))?;
        tracing::debug!(user_id = %user.id, "Fetched Discord user");
        Ok(user)
    }
}
