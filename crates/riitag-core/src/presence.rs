//! Turning a RiiTag state into a rich presence payload.

use serde::Serialize;

use crate::config::{RiitagConfig, TitlesConfig};
use crate::models::RemoteState;
use crate::titles::{ResolvedTitle, TitleCache};

const IMG_TYPES: &[&str] = &["coverHQ", "cover", "cover3D", "disc", "discM"];
const REGIONS: &[&str] = &["EN", "US", "JA"];
const FILE_TYPES: &[&str] = &["png", "jpg"];

const SMALL_IMAGE: &str = "logo";
const SMALL_TEXT: &str = "tag.rc24.xyz";
const PROFILE_BUTTON_LABEL: &str = "View RiiTag";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceButton {
    pub label: String,
    pub url: String,
}

/// Everything pushed to the presence host. The default value is the empty
/// payload, which callers treat as "clear presence".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PresencePayload {
    pub details: Option<String>,
    pub state: Option<String>,
    /// UTC epoch seconds of the last play.
    pub start: Option<i64>,
    pub large_image: Option<String>,
    pub large_text: Option<String>,
    pub small_image: Option<String>,
    pub small_text: Option<String>,
    pub buttons: Vec<PresenceButton>,
}

impl PresencePayload {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Build the payload for `state`. Returns the empty payload when nothing was
/// played.
pub fn format_presence(
    state: &RemoteState,
    title: &ResolvedTitle,
    cover_url: &str,
    profile_url: Option<String>,
) -> PresencePayload {
    let Some(last_played) = &state.last_played else {
        return PresencePayload::default();
    };

    let buttons = profile_url
        .map(|url| {
            vec![PresenceButton {
                label: PROFILE_BUTTON_LABEL.into(),
                url,
            }]
        })
        .unwrap_or_default();

    PresencePayload {
        details: Some(format!("Playing {}", title.name)),
        state: Some(format!("Playing on {}", title.console_name())),
        start: last_played.played_at.map(|t| t.timestamp()),
        large_image: Some(cover_url.to_string()),
        large_text: Some(title.name.clone()),
        small_image: Some(SMALL_IMAGE.into()),
        small_text: Some(SMALL_TEXT.into()),
        buttons,
    }
}

/// Finds the first cover art URL that exists on the art server.
#[derive(Debug, Clone)]
pub struct CoverResolver {
    http: reqwest::Client,
    template: String,
    not_found_url: String,
}

impl CoverResolver {
    pub fn new(http: reqwest::Client, template: String, not_found_url: String) -> Self {
        Self {
            http,
            template,
            not_found_url,
        }
    }

    /// Candidate URLs in lookup order: image kind, then region, then extension.
    /// The record's own region is tried before the fixed fallbacks.
    pub fn candidates(&self, console: &str, game_id: &str, region: Option<&str>) -> Vec<String> {
        let mut regions: Vec<&str> = Vec::with_capacity(REGIONS.len() + 1);
        if let Some(region) = region.filter(|r| !r.is_empty()) {
            regions.push(region);
        }
        for &region in REGIONS {
            if !regions.iter().any(|r| r.eq_ignore_ascii_case(region)) {
                regions.push(region);
            }
        }

        let console = console.to_lowercase();
        let mut urls = Vec::with_capacity(IMG_TYPES.len() * regions.len() * FILE_TYPES.len());
        for img_type in IMG_TYPES {
            for region in &regions {
                for file_type in FILE_TYPES {
                    urls.push(
                        self.template
                            .replace("{console}", &console)
                            .replace("{img_type}", img_type)
                            .replace("{region}", region)
                            .replace("{game_id}", game_id)
                            .replace("{file_type}", file_type),
                    );
                }
            }
        }
        urls
    }

    /// Try candidates with HEAD requests; the first success wins.
    pub async fn resolve(&self, console: &str, game_id: &str, region: Option<&str>) -> String {
        for url in self.candidates(console, game_id, region) {
            match self.http.head(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(%url, "Cover art found");
                    return url;
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "Cover lookup failed"),
            }
        }
        self.not_found_url.clone()
    }
}

/// Title resolution, cover probing and payload formatting in one place.
#[derive(Debug, Clone)]
pub struct PresenceFormatter {
    covers: CoverResolver,
    profile_url: String,
}

impl PresenceFormatter {
    pub fn new(covers: CoverResolver, profile_url: String) -> Self {
        Self {
            covers,
            profile_url,
        }
    }

    pub fn from_config(http: reqwest::Client, titles: &TitlesConfig, riitag: &RiitagConfig) -> Self {
        Self::new(
            CoverResolver::new(http, titles.cover_url.clone(), titles.not_found_url.clone()),
            riitag.profile_url.clone(),
        )
    }

    pub async fn build(&self, state: &RemoteState, titles: &mut TitleCache) -> PresencePayload {
        let Some(last_played) = &state.last_played else {
            return PresencePayload::default();
        };

        let title = titles
            .resolve(&last_played.console, &last_played.game_id)
            .await;
        let cover = self
            .covers
            .resolve(&title.console, &title.game_id, last_played.region.as_deref())
            .await;

        format_presence(state, &title, &cover, self.profile_url_for(state))
    }

    fn profile_url_for(&self, state: &RemoteState) -> Option<String> {
        state
            .user
            .id
            .as_deref()
            .map(|id| self.profile_url.replace("{id}", id))
    }
}
