use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::client::OAuth2Client;
use crate::error::ApiError;

/// Body of a successful token endpoint response.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(default)]
    pub scope: String,
}

/// A Discord OAuth2 token as persisted in the cache directory.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Token {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub scope: String,
    /// Lifetime in seconds, counted from `last_refresh`.
    pub expires_in: u64,
    pub last_refresh: DateTime<Utc>,
}

impl std::fmt::Debug for OAuth2Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Token")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_in", &self.expires_in)
            .field("last_refresh", &self.last_refresh)
            .finish()
    }
}

impl OAuth2Token {
    pub fn from_response(resp: TokenResponse, now: DateTime<Utc>) -> Self {
        Self {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
            token_type: resp.token_type,
            scope: resp.scope,
            expires_in: resp.expires_in,
            last_refresh: now,
        }
    }

    /// Overwrite every field with a freshly issued token.
    pub fn apply(&mut self, resp: TokenResponse, now: DateTime<Utc>) {
        *self = Self::from_response(resp, now);
    }

    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh_at(Utc::now())
    }

    /// Strictly more than `expires_in` seconds since the last refresh. A
    /// lifetime too long to represent never expires.
    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        match i64::try_from(self.expires_in)
            .ok()
            .and_then(Duration::try_seconds)
        {
            Some(lifetime) => now - self.last_refresh > lifetime,
            None => false,
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ApiError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            serde_json::to_string_pretty(self).map_err(|e| ApiError::Parse(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// `Ok(None)` when no token has been cached yet.
    pub fn load(path: &Path) -> Result<Option<Self>, ApiError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| ApiError::Parse(e.to_string()))
    }
}

/// A token bound to the client that refreshes it and the file it lives in.
#[derive(Debug)]
pub struct TokenStore {
    token: OAuth2Token,
    client: OAuth2Client,
    path: PathBuf,
}

impl TokenStore {
    pub fn new(token: OAuth2Token, client: OAuth2Client, path: PathBuf) -> Self {
        Self {
            token,
            client,
            path,
        }
    }

    pub fn load(client: OAuth2Client, path: PathBuf) -> Result<Option<Self>, ApiError> {
        Ok(OAuth2Token::load(&path)?.map(|token| Self::new(token, client, path)))
    }

    pub fn token(&self) -> &OAuth2Token {
        &self.token
    }

    pub fn needs_refresh(&self) -> bool {
        self.token.needs_refresh()
    }

    /// Refresh and persist. On failure the held token is left untouched.
    pub async fn refresh(&mut self) -> Result<(), ApiError> {
        self.client.refresh(&mut self.token).await?;
        self.persist()?;
        tracing::info!("Discord token refreshed");
        Ok(())
    }

    /// Access token for an `Authorization: Bearer` header, refreshed first if
    /// it has expired.
    pub async fn bearer(&mut self) -> Result<String, ApiError> {
        if self.needs_refresh() {
            self.refresh().await?;
        }
        Ok(self.token.access_token.clone())
    }

    pub fn persist(&self) -> Result<(), ApiError> {
        self.token.save(&self.path)
    }

    /// Delete the cached token file.
    pub fn discard(self) -> Result<(), ApiError> {
        discard_file(&self.path)
    }
}

pub(crate) fn discard_file(path: &Path) -> Result<(), ApiError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
