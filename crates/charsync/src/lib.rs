//! # charsync
//!
//! Session coordination node for real-time character data sync.
//!
//! A node accepts WebSocket connections and serves three requests:
//! exchange a secret key for a session token (`Authenticate`), refresh a
//! token (`Renew`), and open a live session with a token (`Handshake`).
//! Nodes share nothing but the persistent [`Store`](charsync_store::Store)
//! and the [`PresenceRegistry`](charsync_presence::PresenceRegistry), which
//! keeps each account down to one live connection across the fleet.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use charsync::prelude::*;
//!
//! # async fn run() -> Result<(), CharsyncError> {
//! let server = CharsyncServerBuilder::new()
//!     .config(NodeConfig::load("charsync.toml")?)
//!     .build(
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(MemoryRegistry::default()),
//!         Arc::new(NoopHooks),
//!     )
//!     .await?;
//! server.run().await
//! # }
//! ```

#![allow(async_fn_in_trait)]

pub mod census;
mod config;
mod error;
mod handler;
pub mod lifecycle;
pub mod notify;
pub mod reload;
mod server;
pub mod telemetry;

pub use config::{CensusConfig, HandlerConfig, NodeConfig};
pub use error::{CharsyncError, ConfigError, HookError, LifecycleError};
pub use server::{CharsyncServer, CharsyncServerBuilder, PROTOCOL_VERSION};

pub mod prelude {
    pub use charsync_auth::{AuthConfig, AuthService, KeyRing, SigningKeys, TokenIssuer};
    pub use charsync_presence::{MemoryRegistry, PresenceConfig, PresenceRegistry};
    pub use charsync_protocol::{
        ClientMessage, RejectReason, ServerMessage, SessionClaims, Ticks, Uid,
    };
    pub use charsync_store::{MemoryStore, Store};

    pub use crate::lifecycle::{
        DisconnectCause, LifecycleManager, LifecycleState, NoopHooks, Session, SessionHooks,
        TeardownReport,
    };
    pub use crate::notify::ArtifactNotifier;
    pub use crate::{CharsyncError, CharsyncServer, CharsyncServerBuilder, NodeConfig};
}
