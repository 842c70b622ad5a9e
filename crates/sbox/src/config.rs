//! Relay configuration and the source the runtime reads it from.
//!
//! The runtime never edits configuration. It asks its [`ConfigSource`] for
//! a fresh [`RelayConfig`] on every `start()`, keeps that copy for the whole
//! run, and drops it on `stop()`.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::SboxError;

/// Connection endpoints and credentials for one run of the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the bot gateway listens on.
    pub bot_host: String,
    pub bot_port: u16,
    /// Coordination server endpoint.
    pub server_host: String,
    pub server_port: u16,
    /// Credentials forwarded verbatim to the server and every engine.
    pub team_id: String,
    pub api_key: String,
    pub player_email: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bot_host: "127.0.0.1".to_string(),
            bot_port: 2025,
            server_host: "127.0.0.1".to_string(),
            server_port: 50505,
            team_id: String::new(),
            api_key: String::new(),
            player_email: String::new(),
        }
    }
}

impl RelayConfig {
    /// Parses a TOML document. Missing keys take their default values.
    pub fn from_toml_str(text: &str) -> Result<Self, SboxError> {
        toml::from_str(text).map_err(|e| SboxError::Config(e.to_string()))
    }

    /// Reads and parses a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, SboxError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SboxError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks the fields the runtime cannot work without.
    ///
    /// Credentials are not checked: an empty key is forwarded as-is and
    /// the server decides.
    pub fn validate(&self) -> Result<(), SboxError> {
        if self.bot_host.trim().is_empty() {
            return Err(SboxError::Config("bot_host is empty".into()));
        }
        if self.server_host.trim().is_empty() {
            return Err(SboxError::Config("server_host is empty".into()));
        }
        if self.server_port == 0 {
            return Err(SboxError::Config("server_port must be 1-65535".into()));
        }
        Ok(())
    }

    /// `host:port` the bot gateway binds to. Port 0 asks the OS for a free
    /// port.
    pub fn bot_addr(&self) -> String {
        let host = if self.bot_host.eq_ignore_ascii_case("localhost") {
            "127.0.0.1"
        } else {
            self.bot_host.as_str()
        };
        format!("{host}:{}", self.bot_port)
    }

    /// `host:port` of the coordination server.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// WebSocket URL of the coordination server.
    pub fn server_url(&self) -> String {
        format!("ws://{}", self.server_addr())
    }
}

/// Provides configuration snapshots to the runtime.
pub trait ConfigSource: Send + Sync + 'static {
    /// Returns the current configuration.
    fn snapshot(&self) -> RelayConfig;
}

impl ConfigSource for RelayConfig {
    fn snapshot(&self) -> RelayConfig {
        self.clone()
    }
}

/// A configuration that can be edited while the relay runs. Edits take
/// effect on the next `start()` or `restart()`.
impl ConfigSource for Arc<RwLock<RelayConfig>> {
    fn snapshot(&self) -> RelayConfig {
        self.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.bot_addr(), "127.0.0.1:2025");
        assert_eq!(config.server_url(), "ws://127.0.0.1:50505");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_localhost_binds_loopback() {
        let config = RelayConfig {
            bot_host: "LocalHost".into(),
            bot_port: 3000,
            ..RelayConfig::default()
        };
        assert_eq!(config.bot_addr(), "127.0.0.1:3000");
    }

    #[test]
    fn test_from_toml_fills_missing_keys() {
        let config = RelayConfig::from_toml_str(
            r#"
            server_host = "spl.example.org"
            team_id = "17"
            api_key = "k"
            player_email = "bot@example.org"
            "#,
        )
        .unwrap();

        assert_eq!(config.server_addr(), "spl.example.org:50505");
        assert_eq!(config.bot_port, 2025);
        assert_eq!(config.team_id, "17");
    }

    #[test]
    fn test_from_toml_rejects_bad_types() {
        let result = RelayConfig::from_toml_str("bot_port = \"many\"");
        assert!(matches!(result, Err(SboxError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_empty_host_and_zero_server_port() {
        let config = RelayConfig {
            server_host: " ".into(),
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());

        let config = RelayConfig {
            server_port: 0,
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shared_source_sees_edits() {
        let shared = Arc::new(RwLock::new(RelayConfig::default()));
        shared.write().unwrap().team_id = "99".into();
        assert_eq!(shared.snapshot().team_id, "99");
    }
}
