//! Node configuration.
//!
//! Everything a node needs is one [`NodeConfig`], normally read from a
//! TOML file. Every section has defaults, so a file only has to name what
//! it changes:
//!
//! ```toml
//! bind_addr = "0.0.0.0:6000"
//! shard_name = "eu-1"
//! is_main = false
//!
//! [auth]
//! secret_key_pepper = "..."
//!
//! [auth.signing]
//! current = "2024-06"
//! keys = { "2024-06" = "..." }
//! ```

use std::path::Path;
use std::time::Duration;

use charsync_auth::AuthConfig;
use charsync_presence::PresenceConfig;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Full configuration of one ingress node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: String,

    /// Name reported to clients in the welcome message.
    pub shard_name: String,

    /// The main node broadcasts fleet-wide system info to its clients and
    /// polls more often. Exactly one node in a fleet should set this.
    pub is_main: bool,

    /// Header carrying the client address when the node runs behind a
    /// reverse proxy, e.g. `X-Forwarded-For`. Unset means the socket peer
    /// is the client.
    pub client_ip_header: Option<String>,

    pub auth: AuthConfig,
    pub presence: PresenceConfig,
    pub census: CensusConfig,
    pub handler: HandlerConfig,
}

impl NodeConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that parse but would stall or crash the node.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("census.main_interval_secs", self.census.main_interval_secs),
            ("census.shard_interval_secs", self.census.shard_interval_secs),
            ("handler.upgrade_timeout_secs", self.handler.upgrade_timeout_secs),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// How often this node reports system info.
    pub fn census_interval(&self) -> Duration {
        if self.is_main {
            Duration::from_secs(self.census.main_interval_secs)
        } else {
            Duration::from_secs(self.census.shard_interval_secs)
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:6000".to_string(),
            shard_name: "main".to_string(),
            is_main: true,
            client_ip_header: None,
            auth: AuthConfig::default(),
            presence: PresenceConfig::default(),
            census: CensusConfig::default(),
            handler: HandlerConfig::default(),
        }
    }
}

/// System-info polling periods.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CensusConfig {
    /// Default: 15 seconds.
    pub main_interval_secs: u64,
    /// Default: 30 seconds.
    pub shard_interval_secs: u64,
}

impl Default for CensusConfig {
    fn default() -> Self {
        Self {
            main_interval_secs: 15,
            shard_interval_secs: 30,
        }
    }
}

/// Per-connection timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// How long a new socket has to finish the WebSocket upgrade.
    ///
    /// Default: 10 seconds.
    pub upgrade_timeout_secs: u64,

    /// How long a fresh connection has to send its first message.
    ///
    /// Default: 5 seconds.
    pub first_message_timeout_secs: u64,

    /// A live session that sends nothing for this long is dropped. Must be
    /// longer than the client heartbeat interval.
    ///
    /// Default: 60 seconds.
    pub idle_timeout_secs: u64,
}

impl HandlerConfig {
    pub fn upgrade_timeout(&self) -> Duration {
        Duration::from_secs(self.upgrade_timeout_secs)
    }

    pub fn first_message_timeout(&self) -> Duration {
        Duration::from_secs(self.first_message_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            upgrade_timeout_secs: 10,
            first_message_timeout_secs: 5,
            idle_timeout_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_toml_str_empty_uses_defaults() {
        let config = NodeConfig::from_toml_str("").unwrap();

        assert!(config.is_main);
        assert!(config.client_ip_header.is_none());
        assert_eq!(config.presence.ttl_secs, 90);
        assert_eq!(config.auth.token_lifetime_secs, 6 * 3600);
        assert_eq!(config.auth.throttle.max_failures, 5);
        assert_eq!(config.census_interval(), Duration::from_secs(15));
    }

    #[test]
    fn test_from_toml_str_partial_sections() {
        let raw = r#"
            shard_name = "eu-1"
            is_main = false
            client_ip_header = "X-Forwarded-For"

            [auth]
            secret_key_pepper = "pepper"

            [auth.signing]
            current = "k2"
            keys = { k1 = "one", k2 = "two" }

            [auth.throttle]
            exempt_sources = ["127.0.0.1"]

            [handler]
            idle_timeout_secs = 120
        "#;

        let config = NodeConfig::from_toml_str(raw).unwrap();

        assert_eq!(config.shard_name, "eu-1");
        assert_eq!(config.client_ip_header.as_deref(), Some("X-Forwarded-For"));
        assert_eq!(config.census_interval(), Duration::from_secs(30));
        assert_eq!(config.auth.signing.current, "k2");
        assert_eq!(config.auth.signing.keys.len(), 2);
        assert_eq!(config.auth.throttle.exempt_sources.len(), 1);
        assert_eq!(config.auth.throttle.window_secs, 300);
        assert_eq!(config.handler.idle_timeout(), Duration::from_secs(120));
        assert_eq!(config.handler.first_message_timeout_secs, 5);
    }

    #[test]
    fn test_from_toml_str_wrong_type_errors() {
        let result = NodeConfig::from_toml_str("is_main = \"yes\"");

        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_toml_str_zero_census_interval_rejected() {
        let raw = r#"
            [census]
            shard_interval_secs = 0
        "#;

        let result = NodeConfig::from_toml_str(raw);

        assert!(matches!(
            result,
            Err(ConfigError::Invalid(msg)) if msg.contains("census.shard_interval_secs")
        ));
    }

    #[test]
    fn test_validate_zero_upgrade_timeout_rejected() {
        let mut config = NodeConfig::default();
        config.handler.upgrade_timeout_secs = 0;

        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_defaults_pass() {
        NodeConfig::default().validate().unwrap();
        assert_eq!(HandlerConfig::default().upgrade_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_load_missing_file_errors() {
        let result = NodeConfig::load("/nonexistent/charsync.toml");

        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
