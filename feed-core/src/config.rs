use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::DEFAULT_QUOTA_BYTES;

pub const APP_DIR_NAME: &str = "substack-feed";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeedConfig {
    /// Page the hidden refresh surface loads.
    pub feed_url: String,
    pub max_posts: usize,
    pub retention_days: u32,
    /// Fraction of `quota_bytes` at which eviction starts.
    pub high_water_ratio: f64,
    pub quota_bytes: u64,
    pub refresh_timeout_secs: u64,
    pub settle_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            feed_url: "https://substack.com/inbox".to_string(),
            max_posts: 500,
            retention_days: 30,
            high_water_ratio: 0.8,
            quota_bytes: DEFAULT_QUOTA_BYTES,
            refresh_timeout_secs: 30,
            settle_delay_ms: 2000,
            request_timeout_secs: 15,
            user_agent: "substack-feed/0.1".to_string(),
        }
    }
}

impl FeedConfig {
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retention(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::days(i64::from(self.retention_days))
    }

    /// `~/.config/substack-feed` on Linux; falls back to the working directory.
    pub fn default_dir() -> PathBuf {
        let mut dir = dirs::config_dir()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_default();
        dir.push(APP_DIR_NAME);
        dir
    }

    /// Loads the configuration at `path`, or writes and returns defaults when
    /// the file is missing or unreadable.
    pub fn load_or_init(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "using default configuration");
                let config = Self::default();
                if let Err(save_err) = config.save(path) {
                    warn!(error = %save_err, path = %path.display(), "failed to write default configuration");
                }
                config
            }
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_files_fill_in_defaults() {
        let config: FeedConfig = serde_json::from_str(r#"{ "max_posts": 50 }"#).unwrap();
        assert_eq!(config.max_posts, 50);
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.feed_url, "https://substack.com/inbox");
    }

    #[test]
    fn missing_file_writes_defaults() {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "substack_feed_config_{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let path = dir.join("config.json");
        let config = FeedConfig::load_or_init(&path);
        assert_eq!(config, FeedConfig::default());
        assert!(path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
