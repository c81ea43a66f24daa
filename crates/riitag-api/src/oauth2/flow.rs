use std::path::PathBuf;

use url::Url;

use super::client::OAuth2Client;
use super::listener::CallbackListener;
use super::token::{discard_file, TokenStore};
use crate::client::DiscordClient;
use crate::error::ApiError;
use crate::types::DiscordUser;

/// Sends the user to the consent page.
pub type BrowserOpener = fn(&Url) -> std::io::Result<()>;

/// Open `url` in the system browser.
pub fn open_browser(url: &Url) -> std::io::Result<()> {
    open::that(url.as_str())
}

/// Interactive Discord login backed by the cached token file.
///
/// 1. Reuse the cached token if Discord still accepts it.
/// 2. Otherwise open the consent page and wait for the redirect.
/// 3. Exchange the code and persist the new token.
#[derive(Clone)]
pub struct AuthFlow {
    client: OAuth2Client,
    token_path: PathBuf,
    opener: BrowserOpener,
}

impl std::fmt::Debug for AuthFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthFlow")
            .field("client", &self.client)
            .field("token_path", &self.token_path)
            .finish_non_exhaustive()
    }
}

impl AuthFlow {
    pub fn new(client: OAuth2Client, token_path: PathBuf) -> Self {
        Self {
            client,
            token_path,
            opener: open_browser,
        }
    }

    /// Replace how the consent page is opened.
    pub fn with_opener(mut self, opener: BrowserOpener) -> Self {
        self.opener = opener;
        self
    }

    /// Log in and identify the user, authorizing again only when needed.
    pub async fn login(&self, discord: &DiscordClient) -> Result<(TokenStore, DiscordUser), ApiError> {
        match TokenStore::load(self.client.clone(), self.token_path.clone()) {
            Ok(Some(mut store)) => match discord.current_user(&mut store).await {
                Ok(user) => return Ok((store, user)),
                Err(e) if e.is_auth() => {
                    tracing::warn!(error = %e, "Cached Discord token rejected, authorizing again");
                    store.discard()?;
                }
                Err(e) => return Err(e),
            },
            Ok(None) => {}
            Err(ApiError::Parse(e)) => {
                tracing::warn!(error = %e, "Cached Discord token is unreadable, discarding");
                discard_file(&self.token_path)?;
            }
            Err(e) => return Err(e),
        }

        let mut store = self.acquire().await?;
        let user = discord.current_user(&mut store).await?;
        Ok((store, user))
    }

    /// Run the authorization-code flow from scratch.
    pub async fn acquire(&self) -> Result<TokenStore, ApiError> {
        let mut listener = CallbackListener::bind(self.client.port()).await?;
        let auth_url = self.client.authorize_url()?;

        tracing::info!("Opening Discord authorization page in browser");
        if let Err(e) = (self.opener)(&auth_url) {
            tracing::warn!(error = %e, url = %auth_url, "Failed to open browser, visit the URL manually");
        }

        let code = listener.wait_for_code().await;
        listener.shutdown().await;

        let token = self.client.exchange_code(&code?).await?;
        let store = TokenStore::new(token, self.client.clone(), self.token_path.clone());
        store.persist()?;
        tracing::info!("Discord authorization complete");
        Ok(store)
    }

    /// Forget the cached token.
    pub fn logout(&self) -> Result<(), ApiError> {
        discard_file(&self.token_path)?;
        tracing::info!("Discord token removed");
        Ok(())
    }
}
