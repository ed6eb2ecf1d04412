use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use liblarder::hub::HubConfig;

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,
    /// Max concurrent event streams per identity; the oldest beyond this
    /// are evicted when the same identity connects again.
    #[serde(default = "default_identity_limit")]
    pub identity_stream_limit: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Static bearer -> subject table for the development verifier. Real
    /// deployments sit behind the household auth service.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

impl ServerConfig {
    /// Load from a TOML file, falling back to defaults when it is absent.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path(),
        };
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn config_path() -> PathBuf {
        dirs_path().join("config.toml")
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            identity_stream_limit: self.identity_stream_limit,
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs.max(1)),
            channel_capacity: self.channel_capacity,
            write_timeout: Duration::from_millis(self.write_timeout_ms.max(1)),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            heartbeat_interval_secs: default_heartbeat_secs(),
            identity_stream_limit: default_identity_limit(),
            channel_capacity: default_channel_capacity(),
            write_timeout_ms: default_write_timeout_ms(),
            tokens: HashMap::new(),
        }
    }
}

fn dirs_path() -> PathBuf {
    if let Ok(config_dir) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(config_dir).join("larder")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config").join("larder")
    } else {
        PathBuf::from("/tmp/larder")
    }
}

fn default_listen() -> String {
    "127.0.0.1:8688".to_string()
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_identity_limit() -> usize {
    1
}

fn default_channel_capacity() -> usize {
    64
}

fn default_write_timeout_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let config = ServerConfig::load(Some(Path::new("/nonexistent/larder.toml"))).unwrap();
        assert_eq!(config.listen, "127.0.0.1:8688");
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert_eq!(config.identity_stream_limit, 1);
        assert!(config.tokens.is_empty());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "listen = \"0.0.0.0:9000\"\n\n[tokens]\n\"alice-token\" = \"alice\"\n",
        )
        .unwrap();

        let config = ServerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert_eq!(config.tokens.get("alice-token").map(String::as_str), Some("alice"));
    }

    #[test]
    fn hub_config_conversion() {
        let config = ServerConfig {
            heartbeat_interval_secs: 2,
            write_timeout_ms: 250,
            ..ServerConfig::default()
        };
        let hub = config.hub_config();
        assert_eq!(hub.heartbeat_interval, Duration::from_secs(2));
        assert_eq!(hub.write_timeout, Duration::from_millis(250));
    }
}
