pub mod client;
pub mod error;
pub mod oauth2;
pub mod traits;
pub mod types;

pub use client::{DiscordClient, RiitagClient};
pub use error::ApiError;
pub use oauth2::{AuthFlow, CallbackListener, OAuth2Client, OAuth2Token, TokenStore};
pub use traits::StateSource;
pub use types::DiscordUser;
