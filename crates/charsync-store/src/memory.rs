//! In-memory [`Store`] used by development nodes and tests.
//!
//! All tables sit behind one `Mutex`, so each trait call is trivially
//! atomic, which is exactly the guarantee `commit_ban` needs. An
//! availability switch lets tests simulate the database going away.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use charsync_protocol::{Fingerprint, Ticks, Uid};
use tokio::sync::Mutex;

use crate::{
    Account, BanOutcome, BanPlan, BannedRegistration, Credential, CredentialRecord,
    ExternalIdentity, FingerprintBan, PendingUpload, Store, StoreError,
};

#[derive(Default)]
struct Tables {
    accounts: HashMap<Uid, Account>,
    /// Keyed by hashed secret key.
    credentials: HashMap<String, Credential>,
    identities: HashMap<Uid, ExternalIdentity>,
    /// Kept as rows (not a set) so a duplicate insert would be visible.
    fingerprint_bans: Vec<FingerprintBan>,
    banned_registrations: Vec<BannedRegistration>,
    pending_uploads: Vec<PendingUpload>,
}

/// A [`Store`] that keeps every table in process memory.
pub struct MemoryStore {
    tables: Mutex<Tables>,
    available: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty, available store.
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`]
    /// (or succeed again with `true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store switched off".into()))
        }
    }

    // -- Registration-side writes -------------------------------------------

    /// Inserts or replaces an account.
    pub async fn insert_account(&self, account: Account) {
        self.tables
            .lock()
            .await
            .accounts
            .insert(account.uid.clone(), account);
    }

    /// Inserts a credential. Any earlier credential of the same account is
    /// dropped: one active credential per account.
    pub async fn insert_credential(&self, credential: Credential) {
        let mut tables = self.tables.lock().await;
        tables.credentials.retain(|_, c| c.uid != credential.uid);
        tables
            .credentials
            .insert(credential.hashed_key.clone(), credential);
    }

    pub async fn insert_external_identity(&self, identity: ExternalIdentity) {
        self.tables
            .lock()
            .await
            .identities
            .insert(identity.uid.clone(), identity);
    }

    pub async fn insert_fingerprint_ban(&self, ban: FingerprintBan) {
        self.tables.lock().await.fingerprint_bans.push(ban);
    }

    pub async fn add_pending_upload(&self, upload: PendingUpload) {
        self.tables.lock().await.pending_uploads.push(upload);
    }

    // -- Inspection ----------------------------------------------------------

    /// Snapshot of all fingerprint ban rows.
    pub async fn fingerprint_bans(&self) -> Vec<FingerprintBan> {
        self.tables.lock().await.fingerprint_bans.clone()
    }

    /// Snapshot of all banned registration rows.
    pub async fn banned_registrations(&self) -> Vec<BannedRegistration> {
        self.tables.lock().await.banned_registrations.clone()
    }

    /// Pending uploads owned by `uid`.
    pub async fn pending_uploads(&self, uid: &Uid) -> Vec<PendingUpload> {
        self.tables
            .lock()
            .await
            .pending_uploads
            .iter()
            .filter(|u| &u.uploader == uid)
            .cloned()
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    async fn credential_by_hash(
        &self,
        hashed_key: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        self.check_available()?;
        let tables = self.tables.lock().await;

        let Some(credential) = tables.credentials.get(hashed_key) else {
            return Ok(None);
        };
        // A credential without its account is a dangling row; treat it
        // like an unknown key.
        let Some(account) = tables.accounts.get(&credential.uid) else {
            tracing::warn!(uid = %credential.uid, "credential without account");
            return Ok(None);
        };
        let primary = account
            .primary_uid
            .as_ref()
            .and_then(|p| tables.accounts.get(p))
            .cloned();

        Ok(Some(CredentialRecord {
            credential: credential.clone(),
            account: account.clone(),
            primary,
        }))
    }

    async fn credential_of(&self, uid: &Uid) -> Result<Option<Credential>, StoreError> {
        self.check_available()?;
        Ok(self
            .tables
            .lock()
            .await
            .credentials
            .values()
            .find(|c| &c.uid == uid)
            .cloned())
    }

    async fn record_login_attempt(
        &self,
        hashed_key: &str,
        accepted: bool,
    ) -> Result<Option<u32>, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let Some(credential) = tables.credentials.get_mut(hashed_key) else {
            return Ok(None);
        };
        credential.failed_attempts = if accepted {
            0
        } else {
            credential.failed_attempts.saturating_add(1)
        };
        Ok(Some(credential.failed_attempts))
    }

    async fn account(&self, uid: &Uid) -> Result<Option<Account>, StoreError> {
        self.check_available()?;
        Ok(self.tables.lock().await.accounts.get(uid).cloned())
    }

    async fn is_marked_for_ban_linked(&self, uid: &Uid) -> Result<bool, StoreError> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        Ok(tables.accounts.values().any(|a| {
            a.mark_for_ban && (&a.uid == uid || a.primary_uid.as_ref() == Some(uid))
        }))
    }

    async fn is_fingerprint_banned(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self
            .tables
            .lock()
            .await
            .fingerprint_bans
            .iter()
            .any(|b| &b.fingerprint == fingerprint))
    }

    async fn external_identity(&self, uid: &Uid) -> Result<Option<ExternalIdentity>, StoreError> {
        self.check_available()?;
        Ok(self.tables.lock().await.identities.get(uid).cloned())
    }

    async fn commit_ban(&self, plan: BanPlan) -> Result<BanOutcome, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;

        // Validate before the first write so an abort leaves no trace.
        if !tables.accounts.contains_key(&plan.target) {
            return Err(StoreError::AccountNotFound(plan.target));
        }

        let mut outcome = BanOutcome::default();

        if !tables
            .fingerprint_bans
            .iter()
            .any(|b| b.fingerprint == plan.fingerprint_ban.fingerprint)
        {
            tables.fingerprint_bans.push(plan.fingerprint_ban);
            outcome.fingerprint_added = true;
        }

        if let Some(account) = tables.accounts.get_mut(&plan.target) {
            account.is_banned = true;
            account.mark_for_ban = false;
        }
        for credential in tables.credentials.values_mut() {
            if credential.uid == plan.target {
                credential.is_banned = true;
            }
        }

        for registration in plan.registration_bans {
            if !tables.banned_registrations.contains(&registration) {
                tables.banned_registrations.push(registration);
                outcome.registrations_added += 1;
            }
        }

        Ok(outcome)
    }

    async fn is_registration_banned(&self, marker: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self
            .tables
            .lock()
            .await
            .banned_registrations
            .iter()
            .any(|r| r.marker == marker))
    }

    async fn touch_last_login(&self, uid: &Uid, at: Ticks) -> Result<(), StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let account = tables
            .accounts
            .get_mut(uid)
            .ok_or_else(|| StoreError::AccountNotFound(uid.clone()))?;
        account.last_logged_in = Some(at);
        Ok(())
    }

    async fn discard_pending_uploads(&self, uid: &Uid) -> Result<usize, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let before = tables.pending_uploads.len();
        tables.pending_uploads.retain(|u| &u.uploader != uid);
        Ok(before - tables.pending_uploads.len())
    }

    async fn registered_accounts(&self) -> Result<usize, StoreError> {
        self.check_available()?;
        Ok(self.tables.lock().await.accounts.len())
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(s: &str) -> Uid {
        Uid::new(s)
    }

    fn plan(target: &str, fingerprint: &str) -> BanPlan {
        BanPlan {
            target: uid(target),
            fingerprint_ban: FingerprintBan {
                fingerprint: Fingerprint::new(fingerprint),
                reason: "test".into(),
            },
            registration_bans: vec![BannedRegistration {
                marker: "ext-1".into(),
            }],
        }
    }

    #[tokio::test]
    async fn test_credential_by_hash_unknown_returns_none() {
        let store = MemoryStore::new();
        let found = store.credential_by_hash("nope").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_credential_by_hash_joins_primary() {
        let store = MemoryStore::new();
        store.insert_account(Account::new("P")).await;
        store.insert_account(Account::secondary("S", "P")).await;
        store.insert_credential(Credential::new("H", "S")).await;

        let record = store.credential_by_hash("H").await.unwrap().unwrap();
        assert_eq!(record.account.uid, uid("S"));
        assert_eq!(record.primary.map(|p| p.uid), Some(uid("P")));
    }

    #[tokio::test]
    async fn test_insert_credential_replaces_previous_for_same_account() {
        let store = MemoryStore::new();
        store.insert_account(Account::new("U1")).await;
        store.insert_credential(Credential::new("OLD", "U1")).await;
        store.insert_credential(Credential::new("NEW", "U1")).await;

        assert!(store.credential_by_hash("OLD").await.unwrap().is_none());
        assert!(store.credential_by_hash("NEW").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_is_marked_for_ban_linked_sees_secondary() {
        let store = MemoryStore::new();
        store.insert_account(Account::new("P")).await;
        let mut secondary = Account::secondary("S", "P");
        secondary.mark_for_ban = true;
        store.insert_account(secondary).await;

        assert!(store.is_marked_for_ban_linked(&uid("P")).await.unwrap());
        assert!(!store.is_marked_for_ban_linked(&uid("X")).await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_ban_twice_has_no_duplicate_rows() {
        let store = MemoryStore::new();
        store.insert_account(Account::new("U1")).await;

        let first = store.commit_ban(plan("U1", "F")).await.unwrap();
        let second = store.commit_ban(plan("U1", "F")).await.unwrap();

        assert!(first.fingerprint_added);
        assert_eq!(first.registrations_added, 1);
        assert_eq!(second, BanOutcome::default());
        assert_eq!(store.fingerprint_bans().await.len(), 1);
        assert_eq!(store.banned_registrations().await.len(), 1);
    }

    #[tokio::test]
    async fn test_commit_ban_unknown_target_writes_nothing() {
        let store = MemoryStore::new();

        let result = store.commit_ban(plan("GHOST", "F")).await;

        assert!(matches!(result, Err(StoreError::AccountNotFound(u)) if u == uid("GHOST")));
        assert!(store.fingerprint_bans().await.is_empty());
        assert!(store.banned_registrations().await.is_empty());
    }

    #[tokio::test]
    async fn test_commit_ban_marks_account_and_credential() {
        let store = MemoryStore::new();
        let mut account = Account::new("U1");
        account.mark_for_ban = true;
        store.insert_account(account).await;
        store.insert_credential(Credential::new("H", "U1")).await;

        store.commit_ban(plan("U1", "F")).await.unwrap();

        let account = store.account(&uid("U1")).await.unwrap().unwrap();
        assert!(account.is_banned);
        assert!(!account.mark_for_ban);
        assert!(store.credential_of(&uid("U1")).await.unwrap().unwrap().is_banned);
    }

    #[tokio::test]
    async fn test_record_login_attempt_counts_and_resets() {
        let store = MemoryStore::new();
        store.insert_account(Account::new("U1")).await;
        store.insert_credential(Credential::new("H", "U1")).await;

        assert_eq!(store.record_login_attempt("H", false).await.unwrap(), Some(1));
        assert_eq!(store.record_login_attempt("H", false).await.unwrap(), Some(2));
        assert_eq!(
            store.credential_of(&uid("U1")).await.unwrap().unwrap().failed_attempts,
            2
        );
        assert_eq!(store.record_login_attempt("H", true).await.unwrap(), Some(0));
        assert_eq!(store.record_login_attempt("NOPE", false).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.insert_account(Account::new("U1")).await;
        store.set_available(false);

        assert!(matches!(
            store.account(&uid("U1")).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.commit_ban(plan("U1", "F")).await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_available(true);
        assert!(store.account(&uid("U1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_discard_pending_uploads_only_touches_owner() {
        let store = MemoryStore::new();
        store
            .add_pending_upload(PendingUpload {
                hash: "a".into(),
                uploader: uid("U1"),
            })
            .await;
        store
            .add_pending_upload(PendingUpload {
                hash: "b".into(),
                uploader: uid("U2"),
            })
            .await;

        assert_eq!(store.discard_pending_uploads(&uid("U1")).await.unwrap(), 1);
        assert!(store.pending_uploads(&uid("U1")).await.is_empty());
        assert_eq!(store.pending_uploads(&uid("U2")).await.len(), 1);
    }
}
