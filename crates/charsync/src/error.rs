//! Error types for the charsync node.

use charsync_auth::{AuthError, TokenError};
use charsync_presence::RegistryError;
use charsync_protocol::{ProtocolError, RejectReason, Uid};
use charsync_store::StoreError;
use charsync_transport::{ConnectionId, TransportError};

/// Top-level error that wraps every crate-specific error.
///
/// The `#[from]` attribute on each variant generates the `From` impl, so
/// `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum CharsyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors loading a [`NodeConfig`](crate::NodeConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid signing keys: {0}")]
    SigningKeys(#[from] TokenError),

    /// A value parsed but can't be used, e.g. a zero interval.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A collaborator hook (pairing cache, lobby, peer notification) failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HookError(pub String);

/// Why a live session couldn't be opened.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("fingerprint is banned")]
    FingerprintBanned,

    /// The token is valid but its account no longer exists.
    #[error("account {0} not found")]
    UnknownAccount(Uid),

    /// Another connection, here or on another node, owns the account.
    #[error("account already connected as {owner}")]
    DuplicateSession { owner: ConnectionId },

    /// The pairing cache refused the player. The presence record was
    /// released again.
    #[error("player init failed: {0}")]
    Init(#[from] HookError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl LifecycleError {
    /// The reason shown to the client.
    pub fn reason(&self) -> RejectReason {
        match self {
            Self::FingerprintBanned => RejectReason::FingerprintBanned,
            Self::UnknownAccount(_) => RejectReason::InvalidCredential,
            Self::DuplicateSession { .. } => RejectReason::DuplicateSession,
            Self::Init(_) | Self::Store(_) | Self::Registry(_) => RejectReason::Unknown,
        }
    }
}
