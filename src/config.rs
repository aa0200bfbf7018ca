use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Periodic refresh interval in minutes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    /// Minimum minutes between two refreshes of the same feed
    #[serde(default = "default_throttle_window")]
    pub throttle_window: u64,
    /// Maximum number of feeds refreshed at the same time
    #[serde(default = "default_max_concurrent_refreshes")]
    pub max_concurrent_refreshes: usize,
    /// Per-feed fetch deadline in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: u64,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_throttle_window() -> u64 {
    10
}

fn default_max_concurrent_refreshes() -> usize {
    5
}

fn default_fetch_timeout() -> u64 {
    15
}

fn default_database_url() -> String {
    "sqlite:unread.db?mode=rwc".to_string()
}

fn default_listen() -> String {
    "0.0.0.0:3000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub title: String,
    pub url: String,
}

/// Tunables of the refresh engine, derived from [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    pub refresh_interval: Duration,
    pub throttle_window: Duration,
    pub max_concurrent_refreshes: usize,
    pub fetch_timeout: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(default_refresh_interval() * 60),
            throttle_window: Duration::from_secs(default_throttle_window() * 60),
            max_concurrent_refreshes: default_max_concurrent_refreshes(),
            fetch_timeout: Duration::from_secs(default_fetch_timeout()),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent_refreshes == 0 {
            anyhow::bail!("max_concurrent_refreshes must be at least 1");
        }
        if self.refresh_interval == 0 {
            anyhow::bail!("refresh_interval must be positive");
        }
        if self.refresh_interval.checked_mul(60).is_none() {
            anyhow::bail!("refresh_interval is too large");
        }
        if self.throttle_window.checked_mul(60).is_none() {
            anyhow::bail!("throttle_window is too large");
        }
        if self.refresh_interval <= self.throttle_window {
            tracing::warn!(
                refresh_interval = self.refresh_interval,
                throttle_window = self.throttle_window,
                "Refresh interval does not exceed the throttle window; periodic refreshes may be throttled"
            );
        }
        Ok(())
    }

    pub fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            refresh_interval: Duration::from_secs(self.refresh_interval.saturating_mul(60)),
            throttle_window: Duration::from_secs(self.throttle_window.saturating_mul(60)),
            max_concurrent_refreshes: self.max_concurrent_refreshes,
            fetch_timeout: Duration::from_secs(self.fetch_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::from_str("").unwrap();

        assert_eq!(config.refresh_interval, 60);
        assert_eq!(config.throttle_window, 10);
        assert_eq!(config.max_concurrent_refreshes, 5);
        assert_eq!(config.fetch_timeout, 15);
        assert_eq!(config.listen, "0.0.0.0:3000");
        assert!(config.feeds.is_empty());
    }

    #[test]
    fn test_default_settings_match_default_config() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config.refresh_settings(), RefreshSettings::default());
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
            refresh_interval = 30
            throttle_window = 5
            max_concurrent_refreshes = 2
            fetch_timeout = 20
            database_url = "sqlite::memory:"

            [[feeds]]
            title = "Test Feed"
            url = "https://example.com/feed.xml"

            [[feeds]]
            title = "Another Feed"
            url = "https://example.org/rss"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.feeds.len(), 2);
        assert_eq!(config.feeds[0].title, "Test Feed");
        assert_eq!(config.feeds[1].url, "https://example.org/rss");
        assert_eq!(config.database_url, "sqlite::memory:");

        let settings = config.refresh_settings();
        assert_eq!(settings.refresh_interval, Duration::from_secs(30 * 60));
        assert_eq!(settings.throttle_window, Duration::from_secs(5 * 60));
        assert_eq!(settings.max_concurrent_refreshes, 2);
        assert_eq!(settings.fetch_timeout, Duration::from_secs(20));
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let result = Config::from_str("this is not valid toml {{{");
        assert!(result.is_err());
    }

    #[test]
    fn test_feed_missing_url() {
        let content = r#"
            [[feeds]]
            title = "Test Feed"
        "#;

        assert!(Config::from_str(content).is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let result = Config::from_str("max_concurrent_refreshes = 0");
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_refresh_interval_rejected() {
        let result = Config::from_str("refresh_interval = 0");
        assert!(result.is_err());
    }

    #[test]
    fn test_oversized_minutes_rejected() {
        assert!(Config::from_str("refresh_interval = 9223372036854775807").is_err());
        assert!(Config::from_str("throttle_window = 9223372036854775807").is_err());
    }

    #[test]
    fn test_refresh_settings_saturate() {
        let mut config = Config::from_str("").unwrap();
        config.refresh_interval = u64::MAX;
        config.throttle_window = u64::MAX;

        let settings = config.refresh_settings();
        assert_eq!(settings.refresh_interval, Duration::from_secs(u64::MAX));
        assert_eq!(settings.throttle_window, Duration::from_secs(u64::MAX));
    }
}
