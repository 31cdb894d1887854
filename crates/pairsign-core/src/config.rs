//! Server configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the pairsign server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Port to listen on
    pub port: u16,

    /// Directory for credentials, signing keys, and TLS material.
    /// Falls back to the platform config directory when unset.
    pub data_dir: Option<PathBuf>,

    /// Issuer URL advertised in discovery and tokens.
    /// Derived from request headers when unset.
    pub issuer: Option<String>,

    /// Seconds an empty pairing session lingers before its worker exits
    pub session_idle_secs: u64,

    /// Seconds between sweeps of expired codes and access tokens
    pub sweep_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8443,
            data_dir: None,
            issuer: None,
            session_idle_secs: 60,
            sweep_interval_secs: 300,
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the data directory
    pub fn with_data_dir(mut self, dir: PathBuf) -> Self {
        self.data_dir = Some(dir);
        self
    }

    /// Set the issuer URL
    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.issuer = Some(issuer);
        self
    }

    /// Set the pairing-session idle timeout in seconds
    pub fn with_session_idle_secs(mut self, secs: u64) -> Self {
        self.session_idle_secs = secs;
        self
    }

    /// Set the sweep interval in seconds
    pub fn with_sweep_interval_secs(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = secs;
        self
    }

    /// Resolve the data directory, falling back to the platform config dir
    pub fn resolve_data_dir(&self) -> Option<PathBuf> {
        self.data_dir
            .clone()
            .or_else(|| dirs::config_dir().map(|dir| dir.join("pairsign")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8443);
        assert!(config.data_dir.is_none());
        assert!(config.issuer.is_none());
        assert_eq!(config.session_idle_secs, 60);
        assert_eq!(config.sweep_interval_secs, 300);
    }

    #[test]
    fn test_builder_methods() {
        let config = Config::new()
            .with_port(9000)
            .with_data_dir(PathBuf::from("/tmp/pairsign"))
            .with_issuer("https://id.example.com".to_string())
            .with_session_idle_secs(5);

        assert_eq!(config.port, 9000);
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/pairsign")));
        assert_eq!(config.issuer.as_deref(), Some("https://id.example.com"));
        assert_eq!(config.session_idle_secs, 5);
    }

    #[test]
    fn test_resolve_data_dir_prefers_override() {
        let config = Config::new().with_data_dir(PathBuf::from("/srv/pairsign"));
        assert_eq!(config.resolve_data_dir(), Some(PathBuf::from("/srv/pairsign")));
    }
}
