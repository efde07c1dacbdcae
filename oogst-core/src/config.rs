//! Harvest configuration.
//!
//! Every field has a default, so an absent or partial TOML file is fine.
//! Command-line flags are applied on top by the binary.

use crate::harvest::HarvestOptions;
use oogst_scanner::paginator::SearchOptions;
use oogst_scanner::visitor::VisitOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DATABASE_ENV: &str = "OOGST_DATABASE";
pub const CONFIG_ENV: &str = "OOGST_CONFIG";
pub const DEFAULT_DATABASE: &str = "~/.config/oogst/oogst.db";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub site: SiteConfig,
    pub timing: TimingConfig,
    pub capture: CaptureConfig,
    pub store: StoreConfig,
    pub monitor: MonitorConfig,
    pub browser: BrowserConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub base_url: String,
    /// Search path and query; `{page}` is replaced by the page number.
    pub search_path: String,
    pub detail_marker: String,
    pub user_agent: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://open.overheid.nl".to_string(),
            search_path: "/zoeken?zoeken=&pagina={page}".to_string(),
            detail_marker: "/details/".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub navigation_timeout_secs: u64,
    pub link_wait_secs: u64,
    pub settle_delay_ms: u64,
    pub pace_ms: u64,
    pub max_retries: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_secs: 60,
            link_wait_secs: 10,
            settle_delay_ms: 2000,
            pace_ms: 1000,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub min_body_len: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { min_body_len: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: DEFAULT_DATABASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    pub recent_window_mins: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            recent_window_mins: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub headless: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chrome_executable: Option<PathBuf>,
    pub chrome_args: Vec<String>,
    /// DevTools endpoint of a Chrome that is already running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
            chrome_args: Vec::new(),
            remote_url: None,
        }
    }
}

impl HarvestConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load `path` if given, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Database path with `~` and environment variables expanded.
    pub fn database_path(&self) -> PathBuf {
        expand_path(&self.store.database)
    }

    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            base_url: self.site.base_url.clone(),
            search_path: self.site.search_path.clone(),
            detail_marker: self.site.detail_marker.clone(),
            navigation_timeout: Duration::from_secs(self.timing.navigation_timeout_secs),
            link_wait: Duration::from_secs(self.timing.link_wait_secs),
        }
    }

    pub fn visit_options(&self) -> VisitOptions {
        VisitOptions {
            navigation_timeout: Duration::from_secs(self.timing.navigation_timeout_secs),
            settle_delay: Duration::from_millis(self.timing.settle_delay_ms),
            min_body_len: self.capture.min_body_len,
        }
    }

    pub fn harvest_options(&self) -> HarvestOptions {
        HarvestOptions {
            pace: Duration::from_millis(self.timing.pace_ms),
            max_retries: self.timing.max_retries,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.poll_interval_secs)
    }

    pub fn recent_window(&self) -> Duration {
        Duration::from_secs(self.monitor.recent_window_mins * 60)
    }
}

pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(raw).as_ref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = HarvestConfig::from_toml("").unwrap();
        assert_eq!(config, HarvestConfig::default());
        assert_eq!(config.timing.navigation_timeout_secs, 60);
        assert_eq!(config.capture.min_body_len, 10);
        assert!(config.browser.headless);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = HarvestConfig::from_toml(
            r#"
            [timing]
            pace_ms = 250

            [browser]
            headless = false
            chrome_args = ["--lang=nl"]
            "#,
        )
        .unwrap();

        assert_eq!(config.timing.pace_ms, 250);
        assert_eq!(config.timing.link_wait_secs, 10);
        assert!(!config.browser.headless);
        assert_eq!(config.browser.chrome_args, vec!["--lang=nl"]);
        assert_eq!(config.site.base_url, "https://open.overheid.nl");
    }

    #[test]
    fn test_unknown_type_is_an_error() {
        assert!(HarvestConfig::from_toml("[timing]\npace_ms = \"fast\"").is_err());
    }

    #[test]
    fn test_derived_options() {
        let config = HarvestConfig::default();
        assert_eq!(config.visit_options().settle_delay, Duration::from_secs(2));
        assert_eq!(config.search_options().link_wait, Duration::from_secs(10));
        assert_eq!(config.harvest_options().pace, Duration::from_secs(1));
        assert_eq!(config.recent_window(), Duration::from_secs(600));
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/oogst.db");
        if std::env::var_os("HOME").is_some() {
            assert!(!expanded.to_string_lossy().starts_with('~'));
        }
        assert!(expanded.to_string_lossy().ends_with("oogst.db"));
    }
}
