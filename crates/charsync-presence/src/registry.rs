//! The presence registry contract.
//!
//! Every ingress node shares one key-value store. For each connected
//! account it holds a single record:
//!
//! ```text
//! UID:<uid>  →  <connection id>
//! ```
//!
//! Each operation below is one atomic round trip on that store
//! (test-and-set, compare-and-swap, compare-and-delete). Nothing is ever
//! read and then written in two steps, so two nodes racing on the same
//! uid can't both win.

use std::future::Future;
use std::time::Duration;

use charsync_protocol::Uid;
use charsync_transport::ConnectionId;
use serde::{Deserialize, Serialize};

use crate::RegistryError;

/// Builds the registry key for `uid`.
pub fn presence_key(uid: &Uid) -> String {
    format!("UID:{uid}")
}

/// Result of [`PresenceRegistry::try_admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The record was created; the caller now owns the session.
    Admitted,
    /// Another connection already owns the session.
    Duplicate { owner: ConnectionId },
}

/// Registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Lifetime of a record that nobody refreshes. Records are normally
    /// released explicitly; the TTL only reclaims entries left behind by a
    /// node that crashed. Heartbeats refresh it, so it must comfortably
    /// exceed the client heartbeat interval.
    pub ttl_secs: u64,
}

impl PresenceConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self { ttl_secs: 90 }
    }
}

/// Cross-node source of truth for "which connection owns this account".
pub trait PresenceRegistry: Send + Sync + 'static {
    /// Creates `UID:<uid> → conn` only if no live record exists.
    fn try_admit(
        &self,
        uid: &Uid,
        conn: ConnectionId,
    ) -> impl Future<Output = Result<Admission, RegistryError>> + Send;

    /// Deletes the record only if it still points at `conn`.
    ///
    /// Returns `true` if a record was removed. A disconnect from a
    /// superseded connection therefore can't clobber the newer session.
    fn release(
        &self,
        uid: &Uid,
        conn: ConnectionId,
    ) -> impl Future<Output = Result<bool, RegistryError>> + Send;

    /// Rewrites the record from `expected` to `conn` only if it still
    /// points at `expected`. Returns `true` on success.
    fn replace(
        &self,
        uid: &Uid,
        expected: ConnectionId,
        conn: ConnectionId,
    ) -> impl Future<Output = Result<bool, RegistryError>> + Send;

    /// Pushes the record's expiry out by one TTL if `conn` still owns it.
    fn refresh(
        &self,
        uid: &Uid,
        conn: ConnectionId,
    ) -> impl Future<Output = Result<bool, RegistryError>> + Send;

    /// Returns the connection currently owning `uid`, if any.
    fn owner(
        &self,
        uid: &Uid,
    ) -> impl Future<Output = Result<Option<ConnectionId>, RegistryError>> + Send;

    /// Number of live `UID:*` records across the fleet.
    fn online_count(&self) -> impl Future<Output = Result<usize, RegistryError>> + Send;
}
