use thiserror::Error;

/// Errors from the Discord OAuth2 and RiiTag endpoints.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The token endpoint rejected a code exchange or refresh. The cached
    /// token is unusable and authorization has to start over.
    #[error("authorization rejected (status {status}): {message}")]
    Auth { status: u16, message: String },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("RiiTag not found: {0}")]
    NotFound(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("callback listener error: {0}")]
    Listener(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// True when the stored credentials should be thrown away.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::Auth { .. } | Self::Api { status: 401, .. } | Self::Api { status: 403, .. }
        )
    }

    /// True for network failures and non-success responses, which are worth
    /// retrying.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Api { .. })
    }
}
