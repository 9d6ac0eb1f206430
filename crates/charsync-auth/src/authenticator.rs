//! Secret-key authentication.
//!
//! Turns a raw secret key into an [`AuthReply`]: who the key belongs to
//! and which ban flags apply. The authenticator only reports; deciding
//! what a flag means (reject, cascade a ban) is the auth service's job.

use std::net::IpAddr;
use std::sync::Arc;

use charsync_protocol::Uid;
use charsync_store::{Store, StoreError};

use crate::{AuthConfig, FailureThrottle, hash_secret_key};

/// Outcome of [`SecretKeyAuthenticator::authorize`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthReply {
    /// The key matched a credential.
    pub success: bool,
    pub uid: Option<Uid>,
    /// For a secondary account, the primary it belongs to.
    pub primary_uid: Option<Uid>,
    pub alias: Option<String>,
    /// Credential, account, or primary account is permanently banned.
    pub permaban: bool,
    /// The source is locked out after too many failures. The key was not
    /// looked up.
    pub temp_ban: bool,
    /// Account or primary account is flagged for a pending ban.
    pub marked_for_ban: bool,
}

impl AuthReply {
    fn failed() -> Self {
        Self::default()
    }

    fn locked_out() -> Self {
        Self {
            temp_ban: true,
            ..Self::default()
        }
    }
}

/// Looks secret keys up by their keyed digest.
pub struct SecretKeyAuthenticator<S> {
    store: Arc<S>,
    pepper: String,
    throttle: FailureThrottle,
}

impl<S: Store> SecretKeyAuthenticator<S> {
    pub fn new(store: Arc<S>, config: &AuthConfig) -> Self {
        Self {
            store,
            pepper: config.secret_key_pepper.clone(),
            throttle: FailureThrottle::new(config.throttle.clone()),
        }
    }

    /// Resolves `secret_key` presented from `source`.
    ///
    /// An unknown key is `Ok` with `success == false`; only a store
    /// failure is an `Err`.
    pub async fn authorize(&self, source: IpAddr, secret_key: &str) -> Result<AuthReply, StoreError> {
        if self.throttle.is_locked(source).await {
            tracing::warn!(%source, "authentication refused: source locked out");
            return Ok(AuthReply::locked_out());
        }

        let hashed = hash_secret_key(&self.pepper, secret_key);
        let Some(record) = self.store.credential_by_hash(&hashed).await? else {
            self.throttle.record_failure(source).await;
            tracing::info!(%source, "authentication failed: unknown secret key");
            return Ok(AuthReply::failed());
        };

        self.throttle.clear(source).await;

        let account = &record.account;
        let primary = record.primary.as_ref();
        let permaban = record.credential.is_banned
            || account.is_banned
            || primary.is_some_and(|p| p.is_banned);
        let marked_for_ban = account.mark_for_ban || primary.is_some_and(|p| p.mark_for_ban);

        let accepted = !permaban && !marked_for_ban;
        match self.store.record_login_attempt(&hashed, accepted).await {
            Ok(Some(failed)) if !accepted => {
                tracing::info!(uid = %account.uid, failed, "login refused for banned credential");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(uid = %account.uid, error = %e, "could not record login attempt"),
        }

        Ok(AuthReply {
            success: true,
            uid: Some(account.uid.clone()),
            primary_uid: account.primary_uid.clone(),
            alias: account.alias.clone(),
            permaban,
            temp_ban: false,
            marked_for_ban,
        })
    }
}
