//! `charsyncd`: runs one charsync ingress node.
//!
//! ```text
//! charsyncd [config.toml]
//! ```
//!
//! Without a config file the node runs on defaults with in-memory store
//! and registry, which is only useful for local development.

use std::path::PathBuf;
use std::sync::Arc;

use charsync::prelude::*;
use charsync::telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init("info,charsync=debug");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match &config_path {
        Some(path) => NodeConfig::load(path)?,
        None => {
            tracing::warn!("no config file given, using development defaults");
            let mut config = NodeConfig::default();
            config.auth.signing = SigningKeys::single("dev", "dev-only-signing-key");
            config
        }
    };

    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(MemoryRegistry::new(config.presence.clone()));

    let server = CharsyncServerBuilder::new()
        .config(config)
        .build(store, registry, Arc::new(NoopHooks))
        .await?;

    #[cfg(unix)]
    if let Some(path) = config_path {
        charsync::reload::spawn_sighup_reload(path, server.key_ring());
    }

    tracing::info!(addr = %server.local_addr()?, "listening");
    server.run().await?;
    Ok(())
}
