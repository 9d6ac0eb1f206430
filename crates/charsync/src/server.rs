//! `CharsyncServer` builder and accept loop.
//!
//! This is the entry point for running a node. It ties the layers
//! together: transport → protocol → auth → lifecycle.

use std::sync::Arc;

use charsync_auth::{AuthService, KeyRing, TokenIssuer};
use charsync_presence::PresenceRegistry;
use charsync_protocol::{Codec, JsonCodec};
use charsync_store::Store;
use charsync_transport::{Transport, TransportError, WebSocketTransport};
use tokio::sync::watch;

use crate::census::{Census, SystemInfo, SystemInfoReporter};
use crate::handler::handle_connection;
use crate::lifecycle::{LifecycleManager, SessionHooks};
use crate::notify::{ArtifactNotifier, LocalChannels};
use crate::{CharsyncError, ConfigError, NodeConfig};

/// The live-channel protocol version. Clients must send this in their
/// handshake or be rejected.
pub const PROTOCOL_VERSION: u32 = 1;

/// Shared node state passed to each connection handler task.
pub(crate) struct NodeState<S, R, H, C> {
    pub(crate) config: NodeConfig,
    pub(crate) auth: AuthService<S, R>,
    pub(crate) lifecycle: LifecycleManager<S, R, H>,
    pub(crate) registry: Arc<R>,
    pub(crate) census: Arc<Census>,
    pub(crate) channels: Arc<LocalChannels>,
    pub(crate) system_info: watch::Receiver<SystemInfo>,
    pub(crate) codec: C,
}

/// Builder for configuring and starting a node.
///
/// # Example
///
/// ```rust,ignore
/// let server = CharsyncServerBuilder::new()
///     .config(NodeConfig::load("charsync.toml")?)
///     .build(store, registry, Arc::new(NoopHooks))
///     .await?;
/// server.run().await
/// ```
pub struct CharsyncServerBuilder {
    config: NodeConfig,
}

impl CharsyncServerBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the bind address.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Binds the listener and wires the node together.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`.
    pub async fn build<S, R, H>(
        self,
        store: Arc<S>,
        registry: Arc<R>,
        hooks: Arc<H>,
    ) -> Result<CharsyncServer<S, R, H, JsonCodec>, CharsyncError>
    where
        S: Store,
        R: PresenceRegistry,
        H: SessionHooks,
    {
        let config = self.config;
        config.validate()?;
        let keys =
            Arc::new(KeyRing::new(config.auth.signing.clone()).map_err(ConfigError::from)?);
        let issuer = Arc::new(TokenIssuer::new(Arc::clone(&keys)));

        let transport = WebSocketTransport::bind(&config.bind_addr)
            .await?
            .with_client_ip_header(config.client_ip_header.clone())
            .with_upgrade_timeout(config.handler.upgrade_timeout());

        let census = Arc::new(Census::new());
        let channels = Arc::new(LocalChannels::new());
        let reporter = SystemInfoReporter::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&census),
            config.census_interval(),
        );

        let state = Arc::new(NodeState {
            auth: AuthService::new(
                Arc::clone(&store),
                Arc::clone(&registry),
                issuer,
                &config.auth,
            ),
            lifecycle: LifecycleManager::new(
                store,
                Arc::clone(&registry),
                hooks,
                Arc::clone(&census),
            ),
            registry,
            census,
            channels,
            system_info: reporter.subscribe(),
            codec: JsonCodec,
            config,
        });

        Ok(CharsyncServer {
            transport,
            state,
            keys,
            reporter,
        })
    }
}

impl Default for CharsyncServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound node, ready to run.
pub struct CharsyncServer<S, R, H, C> {
    transport: WebSocketTransport,
    state: Arc<NodeState<S, R, H, C>>,
    keys: Arc<KeyRing>,
    reporter: SystemInfoReporter<S, R>,
}

impl<S, R, H, C> CharsyncServer<S, R, H, C>
where
    S: Store,
    R: PresenceRegistry,
    H: SessionHooks,
    C: Codec,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The signing key ring, for reloads while running.
    pub fn key_ring(&self) -> Arc<KeyRing> {
        Arc::clone(&self.keys)
    }

    /// The handle the file-distribution tier uses to reach clients on
    /// this node.
    pub fn artifact_notifier(&self) -> ArtifactNotifier {
        ArtifactNotifier::new(Arc::clone(&self.state.channels))
    }

    /// Outbound queues of this node's live sessions. Hooks use this to
    /// push `PeerOffline` and similar messages.
    pub fn local_channels(&self) -> Arc<LocalChannels> {
        Arc::clone(&self.state.channels)
    }

    /// Runs the accept loop and the system-info reporter.
    ///
    /// Spawns a handler task per accepted connection. Runs until the
    /// process is terminated or the listener stops.
    pub async fn run(mut self) -> Result<(), CharsyncError> {
        let _reporter = AbortOnDrop(self.reporter.spawn());
        tracing::info!(
            shard = %self.state.config.shard_name,
            is_main = self.state.config.is_main,
            "charsync node running"
        );

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(TransportError::Closed) => {
                    tracing::error!("listener closed, node stopping");
                    return Err(TransportError::Closed.into());
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}

/// Stops the reporter task when `run` returns or is cancelled.
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
