//! Wire types for the RiiTag JSON endpoint and the Discord user API.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use riitag_core::{LastPlayed, RemoteState, RiitagUser};

/// `GET {state_endpoint}/{user_id}/json` either returns a tag or an error.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RiitagResponse {
    Error { error: String },
    Tag(RiitagTag),
}

#[derive(Debug, Deserialize)]
pub struct RiitagTag {
    pub user: RiitagUserJson,
    pub game_data: GameData,
}

#[derive(Debug, Deserialize)]
pub struct RiitagUserJson {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GameData {
    #[serde(default)]
    pub games: Vec<String>,
    #[serde(default)]
    pub last_played: Option<LastPlayedJson>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LastPlayedJson {
    #[serde(default)]
    pub game_id: Option<String>,
    #[serde(default)]
    pub console: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// Epoch seconds.
    #[serde(default)]
    pub time: Option<f64>,
}

impl RiitagTag {
    /// Convert to the domain state. The outdated flag starts out false; the
    /// watcher computes it.
    pub fn into_remote_state(self) -> RemoteState {
        RemoteState {
            user: RiitagUser {
                name: self.user.name,
                id: self.user.id,
            },
            games: self.game_data.games,
            last_played: self.game_data.last_played.and_then(LastPlayedJson::into_last_played),
            outdated: false,
        }
    }
}

impl LastPlayedJson {
    /// `None` unless both a game ID and a console are present.
    fn into_last_played(self) -> Option<LastPlayed> {
        let game_id = self.game_id.filter(|id| !id.is_empty())?;
        let console = self.console.filter(|c| !c.is_empty())?;
        let played_at = self
            .time
            .and_then(|secs| Utc.timestamp_opt(secs.trunc() as i64, 0).single());

        Some(LastPlayed {
            console,
            game_id,
            region: self.region.filter(|r| !r.is_empty()),
            played_at,
        })
    }
}

/// `GET /users/@me`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
}

impl DiscordUser {
    pub fn display_name(&self) -> &str {
        self.global_name.as_deref().unwrap_or(&self.username)
    }
}
