use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub stations: StationsConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Startup volume, percent 0-100.
    #[serde(default = "default_volume")]
    pub default_volume: f32,
}

/// Remote now-playing API.  Stations hosted on this endpoint's domain are
/// "remote tracked": inband metadata is ignored for them and the feed is
/// polled instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Endpoint returning the now-playing JSON array.  Empty disables
    /// remote tracking entirely.
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationsConfig {
    /// Path to the TOML station file.
    #[serde(default = "default_stations_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Snippet length captured for fingerprinting, seconds.
    #[serde(default = "default_capture_secs")]
    pub capture_secs: u32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { url: String::new() }
    }
}

impl Default for StationsConfig {
    fn default() -> Self {
        Self {
            path: default_stations_path(),
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            capture_secs: default_capture_secs(),
        }
    }
}

fn default_volume() -> f32 {
    50.0
}

fn default_stations_path() -> PathBuf {
    platform::config_dir().join("stations.toml")
}

fn default_capture_secs() -> u32 {
    10
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    /// Host part of the feed URL, e.g. "radio.example.net".  Streams whose
    /// URL contains this host are remote tracked.  None when no feed is
    /// configured.
    pub fn feed_host(&self) -> Option<String> {
        feed_host_of(&self.feed.url)
    }
}

fn feed_host_of(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let host = rest
        .split(|c| c == '/' || c == '?')
        .next()
        .unwrap_or("")
        .trim();
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.player.default_volume, 50.0);
        assert!(config.feed.url.is_empty());
        assert!(config.feed_host().is_none());
        assert_eq!(config.recognition.capture_secs, 10);
        assert!(config.stations.path.ends_with("nightwave/stations.toml"));
    }

    #[test]
    fn test_feed_host_parsing() {
        assert_eq!(
            feed_host_of("https://radio.example.net/api/nowplaying").as_deref(),
            Some("radio.example.net")
        );
        assert_eq!(
            feed_host_of("http://radio.example.net").as_deref(),
            Some("radio.example.net")
        );
        assert_eq!(feed_host_of(""), None);
    }
}
