pub mod config;
pub mod error;
pub mod http;
pub mod models;
pub mod preferences;
pub mod presence;
pub mod titles;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

pub use config::{AppConfig, AppContext, CachePaths};
pub use error::CoreError;
pub use models::{LastPlayed, RemoteState, RiitagUser};
pub use preferences::{Preferences, PreferencesHandle};
pub use presence::{PresenceButton, PresenceFormatter, PresencePayload};
pub use titles::{ResolvedTitle, TitleCache};
