//! The persistent store interface.
//!
//! The relational database lives outside this system. The core reaches it
//! only through [`Store`], one method per question it needs answered. Each
//! call acquires whatever connection it needs and releases it before
//! returning, so no handle outlives an operation.

use std::future::Future;

use charsync_protocol::{Fingerprint, Ticks, Uid};

use crate::{
    Account, BanOutcome, BanPlan, Credential, CredentialRecord, ExternalIdentity, StoreError,
};

/// Account, credential, and ban persistence.
///
/// # Trait bounds
///
/// `Send + Sync + 'static` because one store is shared by every
/// connection task on the node. Every returned future is `Send` so
/// callers can hold it across `tokio::spawn`.
///
/// Implementations can use `async fn` directly:
///
/// ```rust,ignore
/// impl Store for PgStore {
///     async fn account(&self, uid: &Uid) -> Result<Option<Account>, StoreError> {
///         // SELECT ... FROM users WHERE uid = $1
///     }
///     // ...
/// }
/// ```
pub trait Store: Send + Sync + 'static {
    /// Looks up the credential whose hashed key equals `hashed_key`,
    /// joined with its account and primary account.
    ///
    /// `Ok(None)` is the normal "no such key" answer.
    fn credential_by_hash(
        &self,
        hashed_key: &str,
    ) -> impl Future<Output = Result<Option<CredentialRecord>, StoreError>> + Send;

    /// Looks up the active credential owned by `uid`.
    fn credential_of(
        &self,
        uid: &Uid,
    ) -> impl Future<Output = Result<Option<Credential>, StoreError>> + Send;

    /// Updates the failed-attempt counter of the credential keyed by
    /// `hashed_key`: a refused login increments it, an accepted one resets
    /// it to zero. Returns the new count, or `None` for an unknown key.
    fn record_login_attempt(
        &self,
        hashed_key: &str,
        accepted: bool,
    ) -> impl Future<Output = Result<Option<u32>, StoreError>> + Send;

    /// Looks up an account.
    fn account(
        &self,
        uid: &Uid,
    ) -> impl Future<Output = Result<Option<Account>, StoreError>> + Send;

    /// Returns `true` if `uid` or any secondary whose primary is `uid` is
    /// flagged `mark_for_ban`.
    fn is_marked_for_ban_linked(
        &self,
        uid: &Uid,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Returns `true` if a fingerprint ban row exists.
    fn is_fingerprint_banned(
        &self,
        fingerprint: &Fingerprint,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Looks up the verified external identity bound to `uid`.
    fn external_identity(
        &self,
        uid: &Uid,
    ) -> impl Future<Output = Result<Option<ExternalIdentity>, StoreError>> + Send;

    /// Applies every write of `plan` in one transaction.
    ///
    /// Either all of it lands or none of it does. A missing target account
    /// aborts with [`StoreError::AccountNotFound`].
    fn commit_ban(
        &self,
        plan: BanPlan,
    ) -> impl Future<Output = Result<BanOutcome, StoreError>> + Send;

    /// Returns `true` if `marker` (hashed or raw external id) is blocked
    /// from registering.
    fn is_registration_banned(
        &self,
        marker: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Records a successful login.
    fn touch_last_login(
        &self,
        uid: &Uid,
        at: Ticks,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Deletes uploads `uid` started but never finalized. Returns how many
    /// were removed.
    fn discard_pending_uploads(
        &self,
        uid: &Uid,
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// Number of registered accounts (census).
    fn registered_accounts(&self) -> impl Future<Output = Result<usize, StoreError>> + Send;
}
