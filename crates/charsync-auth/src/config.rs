//! Configuration for the auth layer.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for authentication and token issuance.
///
/// `#[serde(default)]` lets a config file name only the fields it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Lifetime of an issued session token.
    ///
    /// Default: 6 hours.
    pub token_lifetime_secs: u64,

    /// Server-side secret mixed into every secret-key digest. Must match
    /// what the registration flow used when it stored the hashes.
    pub secret_key_pepper: String,

    /// Token signing keys.
    pub signing: SigningKeys,

    /// Per-source failure throttling.
    pub throttle: ThrottleConfig,
}

impl AuthConfig {
    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.token_lifetime_secs)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_lifetime_secs: 6 * 60 * 60,
            secret_key_pepper: String::new(),
            signing: SigningKeys::default(),
            throttle: ThrottleConfig::default(),
        }
    }
}

/// The symmetric keys tokens are signed with, by key id.
///
/// New tokens are always signed with `current`. Verification picks the key
/// named by the token's `kid`, so keeping an old id listed after a rotation
/// keeps the tokens it signed valid until they expire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKeys {
    pub current: String,
    pub keys: HashMap<String, String>,
}

impl SigningKeys {
    /// A key set with exactly one key, which is also current.
    pub fn single(kid: impl Into<String>, secret: impl Into<String>) -> Self {
        let kid = kid.into();
        Self {
            keys: HashMap::from([(kid.clone(), secret.into())]),
            current: kid,
        }
    }
}

/// Settings for the per-source failed-attempt throttle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Failures inside the window that trigger a lockout.
    ///
    /// Default: 5.
    pub max_failures: usize,

    /// Length of the sliding window.
    ///
    /// Default: 300 seconds.
    pub window_secs: u64,

    /// Sources that are never throttled (e.g. the operators' own hosts).
    pub exempt_sources: Vec<IpAddr>,
}

impl ThrottleConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            window_secs: 300,
            exempt_sources: Vec::new(),
        }
    }
}
