use chrono::Utc;
use url::Url;

use riitag_core::config::OAuth2Config;

use super::token::{OAuth2Token, TokenResponse};
use crate::error::ApiError;

const SCOPE: &str = "identify";
pub(crate) const CALLBACK_PATH: &str = "/callback";

/// Discord OAuth2 authorization-code client.
#[derive(Debug, Clone)]
pub struct OAuth2Client {
    http: reqwest::Client,
    config: OAuth2Config,
}

impl OAuth2Client {
    pub fn new(http: reqwest::Client, config: OAuth2Config) -> Self {
        Self { http, config }
    }

    /// Port the loopback redirect listener binds to.
    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}{CALLBACK_PATH}", self.config.port)
    }

    /// The consent page the user is sent to.
    pub fn authorize_url(&self) -> Result<Url, ApiError> {
        Url::parse_with_params(
            &self.config.authorize_endpoint,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.redirect_uri().as_str()),
                ("response_type", "code"),
                ("scope", SCOPE),
            ],
        )
        .map_err(|e| ApiError::Parse(format!("invalid authorize endpoint: {e}")))
    }

    /// Exchange an authorization code for a fresh token.
    pub async fn exchange_code(&self, code: &str) -> Result<OAuth2Token, ApiError> {
        let resp = self
            .request_token(&[("grant_type", "authorization_code"), ("code", code)])
            .await?;
        Ok(OAuth2Token::from_response(resp, Utc::now()))
    }

    /// Refresh `token` in place. Nothing is written unless the endpoint
    /// answered with a complete token.
    pub async fn refresh(&self, token: &mut OAuth2Token) -> Result<(), ApiError> {
        let resp = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", token.refresh_token.as_str()),
            ])
            .await?;
        token.apply(resp, Utc::now());
        Ok(())
    }

    async fn request_token(&self, grant: &[(&str, &str)]) -> Result<TokenResponse, ApiError> {
        let redirect_uri = self.redirect_uri();
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("scope", SCOPE),
        ];
        form.extend_from_slice(grant);

        let resp = self
            .http
            .post(&self.config.token_endpoint)
            .form(&form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Auth {
                status,
                message: body,
            });
        }

        resp.json::<TokenResponse>()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))
    }
}
