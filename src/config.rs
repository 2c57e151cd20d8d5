use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::viewport::ViewportConfig;

/// Capacity of the channels feeding the event loop
pub const DEFAULT_CHANNEL_BUFFER: usize = 1000;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8888/api/v1";

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Page sizes offered by the task list, cycled with `+`/`-`
pub const PAGE_SIZE_CHOICES: [usize; 4] = [5, 10, 20, 50];

/// Fixed delay before the event channel reconnects
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;

/// One render frame; buffered log lines are flushed at most once per frame
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

const ENV_PREFIX: &str = "TASKDECK_";

/// Configuration for taskdeck
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Base URL of the task service REST API, including the version prefix
    pub api_base_url: String,
    /// Number of tasks per page in the task list
    pub page_size: usize,
    /// Delay before reconnecting a dropped event stream
    pub reconnect_delay_ms: u64,
    /// Where downloaded task logs are written
    pub download_dir: Option<PathBuf>,
    /// Where taskdeck writes its own diagnostics
    pub log_file: Option<PathBuf>,
    /// Default tracing filter when `TASKDECK_LOG` is unset
    pub log_level: String,
    pub viewport: ViewportConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            download_dir: None,
            log_file: None,
            log_level: "info".to_string(),
            viewport: ViewportConfig::default(),
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("taskdeck").join("config.toml"))
    }

    /// Load defaults, then the config file, then `TASKDECK_*` environment overrides.
    ///
    /// An explicitly given path must exist; the default path is optional.
    /// Not validated: command-line flags still apply on top.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply environment overrides; unparseable values are ignored
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(url) = var("API_URL") {
            self.api_base_url = url;
        }
        if let Some(size) = var("PAGE_SIZE").and_then(|s| s.parse().ok()) {
            self.page_size = size;
        }
        if let Some(ms) = var("RECONNECT_DELAY_MS").and_then(|s| s.parse().ok()) {
            self.reconnect_delay_ms = ms;
        }
        if let Some(dir) = var("DOWNLOAD_DIR") {
            self.download_dir = Some(PathBuf::from(dir));
        }
        if let Some(max) = var("MAX_DISPLAY_LINES").and_then(|s| s.parse().ok()) {
            self.viewport.max_display_lines = max;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            bail!("page_size must be at least 1");
        }
        if self.page_size > 100 {
            bail!("page_size must not exceed 100 (the server caps list requests)");
        }
        url::Url::parse(&self.api_base_url)
            .with_context(|| format!("invalid api_base_url '{}'", self.api_base_url))?;
        self.viewport.validate()
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_file.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("taskdeck")
                .join("taskdeck.log")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.viewport.initial_batch, 100);
        assert_eq!(config.viewport.max_batch, 500);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            api_base_url = "http://tasks.internal:9000/api/v1"

            [viewport]
            max_display_lines = 2000
            "#,
        )
        .unwrap();

        assert_eq!(config.api_base_url, "http://tasks.internal:9000/api/v1");
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.viewport.max_display_lines, 2000);
        assert_eq!(config.viewport.flush_threshold, 50);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(Config::from_toml_str("page_sise = 4").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TASKDECK_API_URL", "http://10.0.0.2:8888/api/v1"),
            ("TASKDECK_PAGE_SIZE", "20"),
            ("TASKDECK_RECONNECT_DELAY_MS", "not-a-number"),
            ("TASKDECK_MAX_DISPLAY_LINES", "300"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.api_base_url, "http://10.0.0.2:8888/api/v1");
        assert_eq!(config.page_size, 20);
        assert_eq!(config.reconnect_delay_ms, DEFAULT_RECONNECT_DELAY_MS);
        assert_eq!(config.viewport.max_display_lines, 300);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.page_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.api_base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "page_size = 5\nreconnect_delay_ms = 1000\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.page_size, 5);
        assert_eq!(config.reconnect_delay(), Duration::from_secs(1));

        assert!(Config::from_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_load_leaves_validation_to_the_caller() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "page_size = 500\n").unwrap();

        let mut config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.page_size, 500);
        assert!(config.validate().is_err());

        config.page_size = 50;
        assert!(config.validate().is_ok());
    }
}
