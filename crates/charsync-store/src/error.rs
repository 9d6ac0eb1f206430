//! Error types for the store layer.

use charsync_protocol::Uid;

/// Errors a [`Store`](crate::Store) can return.
///
/// "Not found" for lookups is *not* an error: lookups return `Option`.
/// These variants are infrastructure failures callers must fail closed on.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing database is unreachable or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A write referenced an account that doesn't exist. The whole unit
    /// of work was aborted.
    #[error("account {0} not found")]
    AccountNotFound(Uid),
}
