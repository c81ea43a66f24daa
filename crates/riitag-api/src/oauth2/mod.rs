pub mod client;
pub mod flow;
pub mod listener;
pub mod token;

pub use client::OAuth2Client;
pub use flow::{open_browser, AuthFlow, BrowserOpener};
pub use listener::{CallbackListener, CallbackOutcome};
pub use token::{OAuth2Token, TokenResponse, TokenStore};
