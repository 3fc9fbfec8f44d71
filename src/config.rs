use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::{Selection, SortBy};

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub subfeed: SubfeedConfig,
    #[serde(default)]
    pub youtube: YouTubeConfig,
    #[serde(default)]
    pub settings: Settings,
}

impl Config {
    /// Where the persisted snapshot (channels, settings, cache) lives.
    pub fn state_path(&self) -> PathBuf {
        self.subfeed.data_dir.join("state.json")
    }
}

#[derive(Debug, Deserialize)]
pub struct SubfeedConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for SubfeedConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct YouTubeConfig {
    /// YouTube Data API v3 key. Remote fetches fail without one; cached
    /// views keep working.
    #[serde(default)]
    pub api_key: String,
}

/// Engine settings. Also persisted as part of the state snapshot, so the
/// stored cache can be interpreted with the settings that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Max results per channel per view, applied after sort/filter.
    #[serde(default = "default_videos_per_channel")]
    pub videos_per_channel: usize,
    /// How many days back a cold or forced fetch requests activity for.
    #[serde(default = "default_videos_anteriority")]
    pub videos_anteriority: u32,
    #[serde(default)]
    pub sort_videos_by: SortBy,
    #[serde(default)]
    pub default_selection: DefaultSelection,
    #[serde(default)]
    pub open_videos_in_inactive_tabs: bool,
    #[serde(default = "default_true")]
    pub auto_remove_watch_later_videos: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            videos_per_channel: default_videos_per_channel(),
            videos_anteriority: default_videos_anteriority(),
            sort_videos_by: SortBy::default(),
            default_selection: DefaultSelection::default(),
            open_videos_in_inactive_tabs: false,
            auto_remove_watch_later_videos: true,
        }
    }
}

fn default_videos_per_channel() -> usize {
    9
}
fn default_videos_anteriority() -> u32 {
    30 // days
}
fn default_true() -> bool {
    true
}

/// Which view opens by default. Only named views make sense here; a channel
/// index would dangle as the channel list changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DefaultSelection {
    #[default]
    All,
    Today,
    Recent,
    WatchLater,
}

impl DefaultSelection {
    pub fn to_selection(self) -> Selection {
        match self {
            DefaultSelection::All => Selection::All,
            DefaultSelection::Today => Selection::Today,
            DefaultSelection::Recent => Selection::Recent,
            DefaultSelection::WatchLater => Selection::WatchLater,
        }
    }
}

/// Load config from a TOML file. A missing file yields the defaults so the
/// CLI works before any setup.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(ConfigError::ReadFile)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .map_err(ConfigError::Parse)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    // The Data API caps a result page at 50, so a larger per-channel limit
    // could never be honored.
    if config.settings.videos_per_channel == 0 || config.settings.videos_per_channel > 50 {
        return Err(ConfigError::Validation(format!(
            "videos_per_channel must be between 1 and 50, got {}",
            config.settings.videos_per_channel
        ))
        .into());
    }

    if config.settings.videos_anteriority == 0 || config.settings.videos_anteriority > 365 {
        return Err(ConfigError::Validation(format!(
            "videos_anteriority must be between 1 and 365 days, got {}",
            config.settings.videos_anteriority
        ))
        .into());
    }

    if config.subfeed.data_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation("data_dir must not be empty".to_string()).into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.settings.videos_per_channel, 9);
        assert_eq!(config.settings.videos_anteriority, 30);
        assert_eq!(config.settings.sort_videos_by, SortBy::Date);
        assert_eq!(config.settings.default_selection, DefaultSelection::All);
        assert!(config.settings.auto_remove_watch_later_videos);
        assert!(!config.settings.open_videos_in_inactive_tabs);
        assert_eq!(config.subfeed.log_level, "info");
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn full_config_parses() {
        let raw = r#"
            [subfeed]
            data_dir = "/tmp/subfeed"
            log_level = "debug"

            [youtube]
            api_key = "key"

            [settings]
            videos_per_channel = 12
            videos_anteriority = 7
            sort_videos_by = "views"
            default_selection = "watch-later"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.settings.videos_per_channel, 12);
        assert_eq!(config.settings.sort_videos_by, SortBy::Views);
        assert_eq!(config.settings.default_selection, DefaultSelection::WatchLater);
        assert_eq!(config.state_path(), PathBuf::from("/tmp/subfeed/state.json"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn per_channel_limit_is_bounded() {
        let config: Config = toml::from_str("[settings]\nvideos_per_channel = 51").unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("videos_per_channel"));

        let config: Config = toml::from_str("[settings]\nvideos_per_channel = 0").unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn anteriority_is_bounded() {
        let config: Config = toml::from_str("[settings]\nvideos_anteriority = 0").unwrap();
        assert!(validate_config(&config).is_err());
    }
}
