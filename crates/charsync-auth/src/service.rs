//! The Authenticate and Renew operations.
//!
//! These are the two requests a client makes before it opens its live
//! channel. Both end in a freshly signed token or a rejection. Checks run
//! in a fixed order, and the first one that fails decides the reason the
//! client sees:
//!
//! ```text
//! Authenticate                         Renew
//! ────────────                         ─────
//! empty key / fingerprint              token signature + expiry
//! authorize (throttle, lookup)         linked account marked → ban
//! fingerprint banned                   account / primary / credential banned
//! unknown key                          fingerprint banned
//! source locked out                    sign
//! banned / marked (marked → ban)
//! live session elsewhere
//! sign
//! ```

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use charsync_presence::PresenceRegistry;
use charsync_protocol::{Fingerprint, SessionClaims, Ticks};
use charsync_store::Store;

use crate::{AuthConfig, AuthError, BanEngine, SecretKeyAuthenticator, TokenIssuer};

/// A signed token and the claims inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub claims: SessionClaims,
}

/// Authenticate and Renew, wired to the store, the presence registry, and
/// the token issuer.
pub struct AuthService<S, R> {
    store: Arc<S>,
    registry: Arc<R>,
    authenticator: SecretKeyAuthenticator<S>,
    bans: BanEngine<S>,
    issuer: Arc<TokenIssuer>,
    token_lifetime: Duration,
}

impl<S: Store, R: PresenceRegistry> AuthService<S, R> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<R>,
        issuer: Arc<TokenIssuer>,
        config: &AuthConfig,
    ) -> Self {
        Self {
            authenticator: SecretKeyAuthenticator::new(Arc::clone(&store), config),
            bans: BanEngine::new(Arc::clone(&store)),
            store,
            registry,
            issuer,
            token_lifetime: config.token_lifetime(),
        }
    }

    pub fn issuer(&self) -> &Arc<TokenIssuer> {
        &self.issuer
    }

    pub fn bans(&self) -> &BanEngine<S> {
        &self.bans
    }

    /// Exchanges a secret key for a session token.
    pub async fn authenticate(
        &self,
        source: IpAddr,
        secret_key: &str,
        fingerprint: &str,
    ) -> Result<IssuedToken, AuthError> {
        self.authenticate_at(source, secret_key, fingerprint, Ticks::now())
            .await
    }

    /// [`authenticate`](Self::authenticate) with an explicit clock.
    pub async fn authenticate_at(
        &self,
        source: IpAddr,
        secret_key: &str,
        fingerprint: &str,
        now: Ticks,
    ) -> Result<IssuedToken, AuthError> {
        if secret_key.trim().is_empty() || fingerprint.trim().is_empty() {
            return Err(AuthError::InvalidCredential);
        }
        let fingerprint = Fingerprint::new(fingerprint);

        let reply = self.authenticator.authorize(source, secret_key).await?;

        if self.store.is_fingerprint_banned(&fingerprint).await? {
            tracing::info!(%source, %fingerprint, "authenticate refused: fingerprint banned");
            return Err(AuthError::FingerprintBanned);
        }
        if reply.temp_ban {
            return Err(AuthError::TemporaryLockout);
        }
        let Some(uid) = reply.uid.filter(|_| reply.success) else {
            return Err(AuthError::InvalidCredential);
        };

        if reply.permaban || reply.marked_for_ban {
            if reply.marked_for_ban {
                self.bans
                    .ensure_ban(&uid, reply.primary_uid.as_ref(), &fingerprint)
                    .await?;
            }
            tracing::info!(%uid, %fingerprint, "authenticate refused: account banned");
            return Err(AuthError::AccountBanned);
        }

        if let Some(owner) = self.registry.owner(&uid).await? {
            tracing::info!(%uid, %owner, "authenticate refused: session already live");
            return Err(AuthError::DuplicateSession);
        }

        let claims = SessionClaims::new(uid, fingerprint, reply.alias, now, self.token_lifetime);
        let issued = self.sign(claims, now)?;
        tracing::info!(uid = %issued.claims.uid, fingerprint = %issued.claims.chara_ident, "authenticate succeeded");
        Ok(issued)
    }

    /// Exchanges a still-valid token for a fresh one, re-checking bans.
    pub async fn renew(&self, token: &str) -> Result<IssuedToken, AuthError> {
        self.renew_at(token, Ticks::now()).await
    }

    /// [`renew`](Self::renew) with an explicit clock.
    pub async fn renew_at(&self, token: &str, now: Ticks) -> Result<IssuedToken, AuthError> {
        let claims = self.issuer.verify_at(token, now)?;
        let uid = &claims.uid;

        let account = self.store.account(uid).await?;
        let primary_uid = account.as_ref().and_then(|a| a.primary_uid.clone());

        if self.store.is_marked_for_ban_linked(uid).await? {
            self.bans
                .ensure_ban(uid, primary_uid.as_ref(), &claims.chara_ident)
                .await?;
            tracing::info!(%uid, "renew refused: account marked for ban");
            return Err(AuthError::AccountBanned);
        }

        // The account was deleted since the token was issued.
        let Some(account) = account else {
            return Err(AuthError::InvalidCredential);
        };
        let primary_banned = match &primary_uid {
            Some(p) => self.store.account(p).await?.is_some_and(|a| a.is_banned),
            None => false,
        };
        if account.is_banned || primary_banned {
            tracing::info!(%uid, "renew refused: account banned");
            return Err(AuthError::AccountBanned);
        }
        if self
            .store
            .credential_of(uid)
            .await?
            .is_some_and(|c| c.is_banned)
        {
            tracing::info!(%uid, "renew refused: credential banned");
            return Err(AuthError::AccountBanned);
        }

        if self.store.is_fingerprint_banned(&claims.chara_ident).await? {
            tracing::info!(%uid, fingerprint = %claims.chara_ident, "renew refused: fingerprint banned");
            return Err(AuthError::FingerprintBanned);
        }

        let renewed = SessionClaims::new(
            claims.uid.clone(),
            claims.chara_ident.clone(),
            claims.alias.clone(),
            now,
            self.token_lifetime,
        );
        let issued = self.sign(renewed, now)?;
        tracing::debug!(%uid, "token renewed");
        Ok(issued)
    }

    fn sign(&self, claims: SessionClaims, now: Ticks) -> Result<IssuedToken, AuthError> {
        let token = self
            .issuer
            .issue_at(&claims, now)
            .map_err(AuthError::Signing)?;
        Ok(IssuedToken { token, claims })
    }
}
