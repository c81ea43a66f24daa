//! Remote RiiTag state as seen by the watcher.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Identity of the RiiTag owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiitagUser {
    pub name: Option<String>,
    pub id: Option<String>,
}

/// The most recently played title on a RiiTag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastPlayed {
    pub console: String,
    pub game_id: String,
    pub region: Option<String>,
    pub played_at: Option<DateTime<Utc>>,
}

/// One polled snapshot of a user's RiiTag.
///
/// Two states compare equal when their last-played descriptor and outdated
/// flag match. The user identity and the game list are carried along for
/// display but never cause a re-sync on their own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteState {
    pub user: RiitagUser,
    pub games: Vec<String>,
    pub last_played: Option<LastPlayed>,
    pub outdated: bool,
}

impl PartialEq for RemoteState {
    fn eq(&self, other: &Self) -> bool {
        self.last_played == other.last_played && self.outdated == other.outdated
    }
}

impl Eq for RemoteState {}

impl RemoteState {
    /// True for the sentinel produced when no RiiTag exists.
    pub fn is_empty(&self) -> bool {
        self.user.name.is_none() && self.user.id.is_none() && self.games.is_empty()
    }

    /// Whether presence should be shown for this state at all.
    pub fn should_display(&self) -> bool {
        !self.outdated && self.last_played.is_some()
    }

    /// A state is stale when its last play has no timestamp or is at least
    /// `timeout` old.
    pub fn is_stale_at(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        match self.last_played.as_ref().and_then(|lp| lp.played_at) {
            Some(played_at) => now - played_at >= timeout,
            None => true,
        }
    }

    /// Recompute the outdated flag, discarding whatever it held before.
    pub fn with_staleness(mut self, now: DateTime<Utc>, timeout: Duration) -> Self {
        self.outdated = self.is_stale_at(now, timeout);
        self
    }
}
