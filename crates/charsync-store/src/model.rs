//! Rows of the persistent store.
//!
//! These mirror the relational schema the registration flow writes. The
//! core only reads most of them; the ban engine is the one writer, and it
//! writes through a single [`BanPlan`].

use charsync_protocol::{Fingerprint, Ticks, Uid};
use serde::{Deserialize, Serialize};

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub uid: Uid,
    pub alias: Option<String>,
    /// Set for secondary accounts: the primary they belong to. Bans walk
    /// this link.
    pub primary_uid: Option<Uid>,
    pub is_admin: bool,
    pub is_moderator: bool,
    pub is_banned: bool,
    /// Flagged by moderation; the ban is applied the next time the
    /// account authenticates or renews.
    pub mark_for_ban: bool,
    pub last_logged_in: Option<Ticks>,
}

impl Account {
    /// A plain, unbanned primary account.
    pub fn new(uid: impl Into<Uid>) -> Self {
        Self {
            uid: uid.into(),
            alias: None,
            primary_uid: None,
            is_admin: false,
            is_moderator: false,
            is_banned: false,
            mark_for_ban: false,
            last_logged_in: None,
        }
    }

    /// A secondary account linked to `primary`.
    pub fn secondary(uid: impl Into<Uid>, primary: impl Into<Uid>) -> Self {
        Self {
            primary_uid: Some(primary.into()),
            ..Self::new(uid)
        }
    }
}

/// The hashed secret key an account authenticates with.
///
/// One active credential per account; `hashed_key` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub hashed_key: String,
    pub uid: Uid,
    /// Consecutive refused logins with this key; reset by an accepted one.
    pub failed_attempts: u32,
    /// Permanent ban on the credential itself.
    pub is_banned: bool,
}

impl Credential {
    pub fn new(hashed_key: impl Into<String>, uid: impl Into<Uid>) -> Self {
        Self {
            hashed_key: hashed_key.into(),
            uid: uid.into(),
            failed_attempts: 0,
            is_banned: false,
        }
    }
}

/// A credential joined with its owning account and, for secondaries, the
/// primary account. One lookup gives the authenticator everything it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub credential: Credential,
    pub account: Account,
    pub primary: Option<Account>,
}

/// A banned fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintBan {
    pub fingerprint: Fingerprint,
    pub reason: String,
}

/// An external-identity marker blocked from registering again. Holds
/// either the hashed or the raw external id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BannedRegistration {
    pub marker: String,
}

/// A verified external identity bound to an account at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub uid: Uid,
    pub hashed_external_id: String,
    pub raw_external_id: String,
}

/// An upload the client started but never finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUpload {
    pub hash: String,
    pub uploader: Uid,
}

/// Every write a ban makes, applied as one atomic unit by
/// [`Store::commit_ban`](crate::Store::commit_ban).
///
/// Inserts are "if absent", so committing the same plan twice leaves the
/// store exactly as committing it once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanPlan {
    /// The account to mark banned (the primary, for a secondary).
    pub target: Uid,
    pub fingerprint_ban: FingerprintBan,
    pub registration_bans: Vec<BannedRegistration>,
}

/// What a [`BanPlan`] commit actually changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BanOutcome {
    pub fingerprint_added: bool,
    pub registrations_added: usize,
}
