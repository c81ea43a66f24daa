//! Game title resolution backed by the GameTDB text databases.
//!
//! The cache is refreshed wholesale: every refresh cycle fetches each
//! console's database and swaps that console's partition in one go. There is
//! no per-entry expiry.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;

use crate::config::TitlesConfig;
use crate::error::CoreError;

/// Name returned for any pair missing from the databases.
pub const UNKNOWN_TITLE: &str = "Unknown";

/// First line of every database (`TITLES = https://www.gametdb.com`).
const HEADER_SENTINEL: &str = "TITLES";
const SEPARATOR: &str = " = ";
const REFRESH_EVERY_HOURS: i64 = 24;

/// One downloadable database and the console partition it fills.
#[derive(Debug, Clone)]
pub struct TitleSource {
    pub console: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTitle {
    /// Lower-cased console key.
    pub console: String,
    /// Upper-cased game ID.
    pub game_id: String,
    pub name: String,
}

impl ResolvedTitle {
    pub fn is_known(&self) -> bool {
        self.name != UNKNOWN_TITLE
    }

    /// Human-readable console name.
    pub fn console_name(&self) -> &str {
        match self.console.as_str() {
            "wii" => "Wii",
            "wiiu" => "Wii U",
            other => other,
        }
    }
}

pub struct TitleCache {
    http: reqwest::Client,
    sources: Vec<TitleSource>,
    partitions: HashMap<String, HashMap<String, String>>,
    last_refresh: Option<DateTime<Utc>>,
}

impl TitleCache {
    pub fn new(http: reqwest::Client, sources: Vec<TitleSource>) -> Self {
        Self {
            http,
            sources,
            partitions: HashMap::new(),
            last_refresh: None,
        }
    }

    /// Cache over the Wii and Wii U databases.
    pub fn from_config(http: reqwest::Client, config: &TitlesConfig) -> Self {
        Self::new(
            http,
            vec![
                TitleSource {
                    console: "wii".into(),
                    url: config.wii_db_url.clone(),
                },
                TitleSource {
                    console: "wiiu".into(),
                    url: config.wiiu_db_url.clone(),
                },
            ],
        )
    }

    /// Refresh if due, then look the title up. Never fails.
    pub async fn resolve(&mut self, console: &str, game_id: &str) -> ResolvedTitle {
        self.update_maybe().await;
        self.lookup(console, game_id)
    }

    /// Look a title up without touching the network.
    pub fn lookup(&self, console: &str, game_id: &str) -> ResolvedTitle {
        let console = console.to_lowercase();
        let game_id = game_id.to_uppercase();
        let name = self
            .partitions
            .get(&console)
            .and_then(|titles| titles.get(&game_id))
            .cloned()
            .unwrap_or_else(|| UNKNOWN_TITLE.to_string());

        ResolvedTitle {
            console,
            game_id,
            name,
        }
    }

    pub async fn update_maybe(&mut self) -> bool {
        self.update_maybe_at(Utc::now()).await
    }

    /// Refresh when the last successful refresh is at least 24 hours before
    /// `now`, or when there has never been one.
    pub async fn update_maybe_at(&mut self, now: DateTime<Utc>) -> bool {
        if let Some(last) = self.last_refresh {
            if now - last < Duration::hours(REFRESH_EVERY_HOURS) {
                return false;
            }
        }
        self.refresh_at(now).await
    }

    /// Fetch every database and replace the partitions that came back.
    ///
    /// The refresh timestamp only advances if at least one database was
    /// fetched, so a total failure is retried on the next resolve.
    pub async fn refresh_at(&mut self, now: DateTime<Utc>) -> bool {
        let results = join_all(
            self.sources
                .iter()
                .map(|source| fetch_database(&self.http, &source.url)),
        )
        .await;

        let mut refreshed = 0;
        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(text) => {
                    let titles = parse_database(&text);
                    tracing::debug!(
                        console = %source.console,
                        titles = titles.len(),
                        "Title database refreshed"
                    );
                    self.partitions.insert(source.console.clone(), titles);
                    refreshed += 1;
                }
                Err(e) => {
                    tracing::warn!(console = %source.console, error = %e, "Failed to fetch title database");
                }
            }
        }

        if refreshed == 0 {
            return false;
        }
        self.last_refresh = Some(now);
        tracing::info!(titles = self.len(), refreshed, "Title cache refreshed");
        true
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.last_refresh
    }

    /// Number of titles across all partitions.
    fn len(&self) -> usize {
        self.partitions.values().map(HashMap::len).sum()
    }
}

async fn fetch_database(http: &reqwest::Client, url: &str) -> Result<String, CoreError> {
    let resp = http.get(url).send().await?;
    if !resp.status().is_success() {
        return Err(CoreError::TitleDb {
            status: resp.status().as_u16(),
            url: url.to_string(),
        });
    }
    Ok(resp.text().await?)
}

/// Parse `ID = Name` lines. Lines without the separator and the header line
/// are skipped.
pub fn parse_database(text: &str) -> HashMap<String, String> {
    let mut titles = HashMap::new();
    for line in text.lines() {
        let Some((id, name)) = line.split_once(SEPARATOR) else {
            continue;
        };
        let id = id.trim();
        if id.is_empty() || id == HEADER_SENTINEL {
            continue;
        }
        titles.insert(id.to_uppercase(), name.trim().to_string());
    }
    titles
}
