//! Runtime configuration
//!
//! `RelayConfig` collects every tunable the relay needs: where the database
//! and media live, how hard the catalog may be hit, how often the upload
//! timer fires and the hosting platform credentials.

use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default hosting API base URL
pub const DEFAULT_HOSTING_API_BASE: &str = "https://partner.api.dailymotion.com";

/// Default hosting OAuth token endpoint
pub const DEFAULT_HOSTING_TOKEN_URL: &str = "https://partner.api.dailymotion.com/oauth/v1/token";

/// Hosting platform credentials and endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostingConfig {
    pub api_base: String,
    pub token_url: String,
    pub client_id: Option<String>,
    #[serde(skip_serializing)]
    pub client_secret: Option<String>,
    pub scope: String,
}

impl Default for HostingConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_HOSTING_API_BASE.to_string(),
            token_url: DEFAULT_HOSTING_TOKEN_URL.to_string(),
            client_id: None,
            client_secret: None,
            scope: "manage_videos".to_string(),
        }
    }
}

impl HostingConfig {
    /// Both halves of the client-credentials pair are present
    pub fn has_credentials(&self) -> bool {
        self.client_id.as_deref().map_or(false, |s| !s.is_empty())
            && self.client_secret.as_deref().map_or(false, |s| !s.is_empty())
    }
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// SQLite database file
    pub database_path: PathBuf,

    /// Root directory for downloaded media, one sub-directory per collection
    pub video_dir: PathBuf,

    /// Default number of assets fetched concurrently per batch
    pub download_concurrency: usize,

    /// Pause between consecutive download batches
    pub batch_delay: Duration,

    /// Minimum interval between download progress writes to the store
    pub download_write_interval: Duration,

    /// Minimum interval between upload progress writes to the store
    pub upload_write_interval: Duration,

    /// Upload scheduler timer period
    pub scheduler_interval: Duration,

    /// Connect timeout and bound on short API calls; media transfers fail
    /// only after going this long without moving a byte
    pub transfer_timeout: Duration,

    /// Endpoint queried by the HTTP catalog client
    pub catalog_endpoint: Option<String>,

    /// Endpoint queried by the HTTP stream resolver
    pub stream_endpoint: Option<String>,

    pub hosting: HostingConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/relay.db"),
            video_dir: PathBuf::from("./video"),
            download_concurrency: 1,
            batch_delay: Duration::from_secs(1),
            download_write_interval: Duration::from_secs(2),
            upload_write_interval: Duration::from_secs(5),
            scheduler_interval: Duration::from_secs(3600),
            transfer_timeout: Duration::from_secs(300),
            catalog_endpoint: None,
            stream_endpoint: None,
            hosting: HostingConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::new()
    }

    /// Load configuration from the process environment on top of defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("RELAY_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("RELAY_VIDEO_DIR") {
            config.video_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup("RELAY_DOWNLOAD_CONCURRENCY") {
            config.download_concurrency = parse_var("RELAY_DOWNLOAD_CONCURRENCY", &value)?;
        }
        if let Some(value) = lookup("RELAY_BATCH_DELAY_MS") {
            config.batch_delay = Duration::from_millis(parse_var("RELAY_BATCH_DELAY_MS", &value)?);
        }
        if let Some(value) = lookup("RELAY_SCHEDULER_INTERVAL_SECS") {
            config.scheduler_interval =
                Duration::from_secs(parse_var("RELAY_SCHEDULER_INTERVAL_SECS", &value)?);
        }
        if let Some(value) = lookup("RELAY_TRANSFER_TIMEOUT_SECS") {
            config.transfer_timeout =
                Duration::from_secs(parse_var("RELAY_TRANSFER_TIMEOUT_SECS", &value)?);
        }
        if let Some(endpoint) = lookup("RELAY_CATALOG_ENDPOINT") {
            config.catalog_endpoint = Some(endpoint);
        }
        if let Some(endpoint) = lookup("RELAY_STREAM_ENDPOINT") {
            config.stream_endpoint = Some(endpoint);
        }
        config.hosting.client_id = lookup("DAILYMOTION_API_KEY");
        config.hosting.client_secret = lookup("DAILYMOTION_API_SECRET");

        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.download_concurrency == 0 {
            return Err(RelayError::InvalidConfiguration(
                "download concurrency must be at least 1".to_string(),
            ));
        }
        if self.scheduler_interval.is_zero() {
            return Err(RelayError::InvalidConfiguration(
                "scheduler interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| {
        RelayError::InvalidConfiguration(format!("{} has an invalid value: {:?}", key, value))
    })
}

/// Builder for RelayConfig
#[derive(Debug)]
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RelayConfig::default(),
        }
    }

    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.database_path = path.into();
        self
    }

    pub fn video_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.video_dir = dir.into();
        self
    }

    pub fn download_concurrency(mut self, concurrency: usize) -> Self {
        self.config.download_concurrency = concurrency;
        self
    }

    pub fn batch_delay(mut self, delay: Duration) -> Self {
        self.config.batch_delay = delay;
        self
    }

    pub fn download_write_interval(mut self, interval: Duration) -> Self {
        self.config.download_write_interval = interval;
        self
    }

    pub fn upload_write_interval(mut self, interval: Duration) -> Self {
        self.config.upload_write_interval = interval;
        self
    }

    pub fn scheduler_interval(mut self, interval: Duration) -> Self {
        self.config.scheduler_interval = interval;
        self
    }

    pub fn transfer_timeout(mut self, timeout: Duration) -> Self {
        self.config.transfer_timeout = timeout;
        self
    }

    pub fn catalog_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.config.catalog_endpoint = Some(endpoint.into());
        self
    }

    pub fn stream_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.config.stream_endpoint = Some(endpoint.into());
        self
    }

    pub fn hosting(mut self, hosting: HostingConfig) -> Self {
        self.config.hosting = hosting;
        self
    }

    pub fn build(self) -> RelayConfig {
        self.config
    }
}

impl Default for RelayConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.download_concurrency, 1);
        assert_eq!(config.scheduler_interval, Duration::from_secs(3600));
        assert_eq!(config.download_write_interval, Duration::from_secs(2));
        assert!(!config.hosting.has_credentials());
    }

    #[test]
    fn test_env_overrides() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("RELAY_DOWNLOAD_CONCURRENCY", "4"),
            ("RELAY_BATCH_DELAY_MS", "250"),
            ("RELAY_VIDEO_DIR", "/srv/media"),
            ("DAILYMOTION_API_KEY", "key"),
            ("DAILYMOTION_API_SECRET", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.download_concurrency, 4);
        assert_eq!(config.batch_delay, Duration::from_millis(250));
        assert_eq!(config.video_dir, PathBuf::from("/srv/media"));
        assert!(config.hosting.has_credentials());
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = RelayConfig::from_lookup(lookup_from(&[("RELAY_DOWNLOAD_CONCURRENCY", "lots")]))
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidConfiguration(_)));

        let err = RelayConfig::from_lookup(lookup_from(&[("RELAY_DOWNLOAD_CONCURRENCY", "0")]))
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidConfiguration(_)));
    }
}
