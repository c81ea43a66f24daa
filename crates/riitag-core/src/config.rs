use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

use crate::error::CoreError;

const DEFAULT_CONFIG: &str = include_str!("../../../config/default.toml");

const TOKEN_FILE: &str = "token.json";
const PREFS_FILE: &str = "prefs.json";
const LOG_DIR: &str = "logs";

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub oauth2: OAuth2Config,
    pub rpc: RpcConfig,
    pub riitag: RiitagConfig,
    pub titles: TitlesConfig,
}

/// Discord OAuth2 application and endpoints.
#[derive(Clone, Deserialize)]
pub struct OAuth2Config {
    pub client_id: String,
    pub client_secret: String,
    pub port: u16,
    pub authorize_endpoint: String,
    pub token_endpoint: String,
    pub api_endpoint: String,
}

// Hand-written so the client secret never reaches a log line.
impl std::fmt::Debug for OAuth2Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Config")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("port", &self.port)
            .field("authorize_endpoint", &self.authorize_endpoint)
            .field("token_endpoint", &self.token_endpoint)
            .field("api_endpoint", &self.api_endpoint)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    pub client_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiitagConfig {
    pub state_endpoint: String,
    /// Profile link shown on the presence button; `{id}` is the user id.
    pub profile_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TitlesConfig {
    pub wii_db_url: String,
    pub wiiu_db_url: String,
    /// Cover art template with `{console}`, `{img_type}`, `{region}`,
    /// `{game_id}` and `{file_type}` placeholders.
    pub cover_url: String,
    pub not_found_url: String,
}

impl AppConfig {
    /// Load config: the user file if it exists, otherwise the built-in defaults.
    pub fn load() -> Result<Self, CoreError> {
        let user_path = Self::config_path();
        if user_path.exists() {
            Self::load_from(&user_path)
        } else {
            toml::from_str(DEFAULT_CONFIG).map_err(|e| CoreError::Config(e.to_string()))
        }
    }

    /// Load config from an explicit TOML file.
    pub fn load_from(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CoreError::Config(e.to_string()))
    }

    /// Fail on the credentials that ship empty and must come from the user
    /// config file.
    pub fn validate(&self) -> Result<(), CoreError> {
        let required = [
            ("oauth2.client_id", &self.oauth2.client_id),
            ("oauth2.client_secret", &self.oauth2.client_secret),
            ("rpc.client_id", &self.rpc.client_id),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(key, _)| *key)
            .collect();

        if missing.is_empty() {
            return Ok(());
        }
        Err(CoreError::Config(format!(
            "missing {} in {}",
            missing.join(", "),
            Self::config_path().display()
        )))
    }

    /// Path to user config file (XDG on Linux, AppData on Windows).
    pub fn config_path() -> PathBuf {
        project_dirs()
            .map(|d| d.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("built-in default config is valid TOML")
    }
}

/// Locations of everything persisted between runs.
#[derive(Debug, Clone)]
pub struct CachePaths {
    root: PathBuf,
}

impl CachePaths {
    /// Resolve the platform cache directory, falling back to `./cache`.
    pub fn resolve() -> Self {
        let root = project_dirs()
            .map(|d| d.cache_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("cache"));
        Self { root }
    }

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the cache and log directories.
    pub fn ensure(&self) -> Result<(), CoreError> {
        std::fs::create_dir_all(self.log_dir())?;
        Ok(())
    }

    pub fn token_file(&self) -> PathBuf {
        self.root.join(TOKEN_FILE)
    }

    pub fn prefs_file(&self) -> PathBuf {
        self.root.join(PREFS_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join(LOG_DIR)
    }
}

/// Configuration and paths, constructed once at startup and handed to
/// every component that needs them.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub config: AppConfig,
    pub paths: CachePaths,
}

impl AppContext {
    pub fn load() -> Result<Self, CoreError> {
        let config = AppConfig::load()?;
        let paths = CachePaths::resolve();
        paths.ensure()?;
        Ok(Self { config, paths })
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("xyz", "rc24", "riitag-rpc")
}
