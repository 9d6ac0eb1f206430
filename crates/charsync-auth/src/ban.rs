//! Ban propagation.
//!
//! A ban never lands on just one row. It spreads to:
//!
//! - the **primary** account (a secondary's ban is its primary's ban),
//! - the **fingerprint** the client presented, so a fresh key on the same
//!   character is still refused,
//! - the **external identity** the primary registered with, so it can't
//!   register again.
//!
//! All of it is planned up front and committed as one [`BanPlan`].

use std::sync::Arc;

use charsync_protocol::{Fingerprint, Uid};
use charsync_store::{BanOutcome, BanPlan, BannedRegistration, FingerprintBan, Store, StoreError};

pub struct BanEngine<S> {
    store: Arc<S>,
}

impl<S: Store> BanEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Bans `uid` (or its primary) and everything linked to it.
    ///
    /// Idempotent: a second call adds no rows. An unknown target account or
    /// an unreachable store aborts without writing anything.
    pub async fn ensure_ban(
        &self,
        uid: &Uid,
        primary_uid: Option<&Uid>,
        fingerprint: &Fingerprint,
    ) -> Result<BanOutcome, StoreError> {
        let target = primary_uid.unwrap_or(uid).clone();

        let mut registration_bans = Vec::new();
        if let Some(identity) = self.store.external_identity(&target).await? {
            registration_bans.push(BannedRegistration {
                marker: identity.hashed_external_id,
            });
            registration_bans.push(BannedRegistration {
                marker: identity.raw_external_id,
            });
        }

        let plan = BanPlan {
            target: target.clone(),
            fingerprint_ban: FingerprintBan {
                fingerprint: fingerprint.clone(),
                reason: format!("Autobanned CharacterIdent ({uid})"),
            },
            registration_bans,
        };

        let outcome = self.store.commit_ban(plan).await?;
        tracing::warn!(
            %uid,
            %target,
            %fingerprint,
            fingerprint_added = outcome.fingerprint_added,
            registrations_added = outcome.registrations_added,
            "ban applied"
        );
        Ok(outcome)
    }
}
