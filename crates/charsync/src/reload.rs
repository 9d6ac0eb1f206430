//! Signing-key reload from the config file.
//!
//! Operators rotate token keys by editing `[auth.signing]` and sending the
//! node `SIGHUP`. Only the key set is reloaded; every other setting needs
//! a restart.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use charsync_auth::KeyRing;

use crate::{ConfigError, NodeConfig};

/// Re-reads `path` and swaps its signing keys into `keys`.
///
/// On any error the current keys stay in place.
pub fn reload_signing_keys(path: &Path, keys: &KeyRing) -> Result<(), ConfigError> {
    let config = NodeConfig::load(path)?;
    keys.reload(config.auth.signing)?;
    Ok(())
}

/// Spawns a task that reloads signing keys on every `SIGHUP`.
#[cfg(unix)]
pub fn spawn_sighup_reload(path: PathBuf, keys: Arc<KeyRing>) {
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "cannot install SIGHUP handler");
                return;
            }
        };
        tracing::info!(path = %path.display(), "SIGHUP reloads signing keys");

        while hangup.recv().await.is_some() {
            match reload_signing_keys(&path, &keys) {
                Ok(()) => tracing::info!(kid = %keys.current_kid(), "SIGHUP reload applied"),
                Err(e) => tracing::warn!(error = %e, "SIGHUP reload failed, keeping current keys"),
            }
        }
    });
}
