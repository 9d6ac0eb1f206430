//! Integration tests for Authenticate and Renew.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use charsync_auth::{
    AuthConfig, AuthError, AuthService, KeyRing, SigningKeys, ThrottleConfig, TokenError,
    TokenIssuer, hash_secret_key,
};
use charsync_presence::{MemoryRegistry, PresenceRegistry};
use charsync_protocol::{Fingerprint, RejectReason, SessionClaims, Ticks, Uid};
use charsync_store::{Account, Credential, ExternalIdentity, FingerprintBan, MemoryStore, Store};
use charsync_transport::ConnectionId;

const PEPPER: &str = "integration-pepper";
const SOURCE: IpAddr = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7));
const NOW: Ticks = Ticks(638_500_000_000_000_000);

struct Fixture {
    store: Arc<MemoryStore>,
    registry: Arc<MemoryRegistry>,
    service: AuthService<MemoryStore, MemoryRegistry>,
}

fn config() -> AuthConfig {
    AuthConfig {
        secret_key_pepper: PEPPER.into(),
        signing: SigningKeys::single("k1", "signing-secret"),
        throttle: ThrottleConfig {
            max_failures: 3,
            window_secs: 300,
            exempt_sources: Vec::new(),
        },
        ..AuthConfig::default()
    }
}

fn fixture() -> Fixture {
    let config = config();
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(MemoryRegistry::default());
    let issuer = Arc::new(TokenIssuer::new(Arc::new(
        KeyRing::new(config.signing.clone()).unwrap(),
    )));
    let service = AuthService::new(Arc::clone(&store), Arc::clone(&registry), issuer, &config);
    Fixture {
        store,
        registry,
        service,
    }
}

async fn register(store: &MemoryStore, account: Account, key: &str) {
    store
        .insert_credential(Credential::new(hash_secret_key(PEPPER, key), account.uid.clone()))
        .await;
    store.insert_account(account).await;
}

// =========================================================================
// Authenticate
// =========================================================================

#[tokio::test]
async fn test_authenticate_valid_key_issues_six_hour_token() {
    let f = fixture();
    let mut account = Account::new("U1");
    account.alias = Some("Bob".into());
    register(&f.store, account, "K1").await;

    let issued = f.service.authenticate_at(SOURCE, "K1", "F1", NOW).await.unwrap();

    assert_eq!(issued.claims.uid, Uid::new("U1"));
    assert_eq!(issued.claims.chara_ident, Fingerprint::new("F1"));
    assert_eq!(issued.claims.alias.as_deref(), Some("Bob"));
    assert_eq!(
        issued.claims.exp,
        NOW.saturating_add(Duration::from_secs(6 * 3600))
    );
    let verified = f.service.issuer().verify_at(&issued.token, NOW).unwrap();
    assert_eq!(verified, issued.claims);
}

#[tokio::test]
async fn test_authenticate_empty_inputs_invalid_credential() {
    let f = fixture();
    register(&f.store, Account::new("U1"), "K1").await;

    assert!(matches!(
        f.service.authenticate_at(SOURCE, "", "F1", NOW).await,
        Err(AuthError::InvalidCredential)
    ));
    assert!(matches!(
        f.service.authenticate_at(SOURCE, "K1", "  ", NOW).await,
        Err(AuthError::InvalidCredential)
    ));
}

#[tokio::test]
async fn test_authenticate_unknown_key_invalid_credential() {
    let f = fixture();

    let err = f
        .service
        .authenticate_at(SOURCE, "nope", "F1", NOW)
        .await
        .unwrap_err();

    assert_eq!(err.reason(), RejectReason::InvalidCredential);
}

#[tokio::test]
async fn test_authenticate_banned_fingerprint_beats_valid_key() {
    let f = fixture();
    register(&f.store, Account::new("U1"), "K1").await;
    f.store
        .insert_fingerprint_ban(FingerprintBan {
            fingerprint: Fingerprint::new("F-BAD"),
            reason: "manual".into(),
        })
        .await;

    assert!(matches!(
        f.service.authenticate_at(SOURCE, "K1", "F-BAD", NOW).await,
        Err(AuthError::FingerprintBanned)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_authenticate_repeated_failures_lock_source_out() {
    let f = fixture();
    register(&f.store, Account::new("U1"), "K1").await;
    for _ in 0..3 {
        let _ = f.service.authenticate_at(SOURCE, "wrong", "F1", NOW).await;
    }

    let locked = f.service.authenticate_at(SOURCE, "K1", "F1", NOW).await;
    assert!(matches!(locked, Err(AuthError::TemporaryLockout)));

    tokio::time::advance(Duration::from_secs(301)).await;
    assert!(f.service.authenticate_at(SOURCE, "K1", "F1", NOW).await.is_ok());
}

#[tokio::test]
async fn test_authenticate_permabanned_account_rejected_without_writes() {
    let f = fixture();
    let mut account = Account::new("U1");
    account.is_banned = true;
    register(&f.store, account, "K1").await;

    let result = f.service.authenticate_at(SOURCE, "K1", "F1", NOW).await;

    assert!(matches!(result, Err(AuthError::AccountBanned)));
    assert!(f.store.fingerprint_bans().await.is_empty());
}

#[tokio::test]
async fn test_authenticate_marked_secondary_bans_primary() {
    let f = fixture();
    register(&f.store, Account::new("U1"), "K1").await;
    let mut secondary = Account::secondary("U2", "U1");
    secondary.mark_for_ban = true;
    register(&f.store, secondary, "K2").await;
    f.store
        .insert_external_identity(ExternalIdentity {
            uid: Uid::new("U1"),
            hashed_external_id: "HASHED-D".into(),
            raw_external_id: "RAW-D".into(),
        })
        .await;

    let result = f.service.authenticate_at(SOURCE, "K2", "F2", NOW).await;

    assert!(matches!(result, Err(AuthError::AccountBanned)));
    let primary = f.store.account(&Uid::new("U1")).await.unwrap().unwrap();
    assert!(primary.is_banned);
    let secondary = f.store.account(&Uid::new("U2")).await.unwrap().unwrap();
    assert!(!secondary.is_banned);
    assert!(f.store.is_fingerprint_banned(&Fingerprint::new("F2")).await.unwrap());
    assert!(f.store.is_registration_banned("HASHED-D").await.unwrap());
    assert!(f.store.is_registration_banned("RAW-D").await.unwrap());

    // The primary's own key is now refused too.
    assert!(matches!(
        f.service.authenticate_at(SOURCE, "K1", "F1", NOW).await,
        Err(AuthError::AccountBanned)
    ));
}

#[tokio::test]
async fn test_authenticate_live_session_rejected_as_duplicate() {
    let f = fixture();
    register(&f.store, Account::new("U1"), "K1").await;
    f.registry
        .try_admit(&Uid::new("U1"), ConnectionId::new(42))
        .await
        .unwrap();

    let result = f.service.authenticate_at(SOURCE, "K1", "F1", NOW).await;

    assert!(matches!(result, Err(AuthError::DuplicateSession)));
}

#[tokio::test]
async fn test_authenticate_store_down_fails_closed() {
    let f = fixture();
    register(&f.store, Account::new("U1"), "K1").await;
    f.store.set_available(false);

    let err = f
        .service
        .authenticate_at(SOURCE, "K1", "F1", NOW)
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::StoreUnavailable(_)));
    assert_eq!(err.reason(), RejectReason::Unknown);
}

#[tokio::test]
async fn test_authenticate_registry_down_fails_closed() {
    let f = fixture();
    register(&f.store, Account::new("U1"), "K1").await;
    f.registry.set_available(false);

    let err = f
        .service
        .authenticate_at(SOURCE, "K1", "F1", NOW)
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::Registry(_)));
}

// =========================================================================
// Renew
// =========================================================================

#[tokio::test]
async fn test_renew_valid_token_extends_expiry() {
    let f = fixture();
    register(&f.store, Account::new("U1"), "K1").await;
    let issued = f.service.authenticate_at(SOURCE, "K1", "F1", NOW).await.unwrap();
    let later = NOW.saturating_add(Duration::from_secs(3600));

    let renewed = f.service.renew_at(&issued.token, later).await.unwrap();

    assert_eq!(renewed.claims.uid, issued.claims.uid);
    assert_eq!(renewed.claims.chara_ident, issued.claims.chara_ident);
    assert!(renewed.claims.exp > issued.claims.exp);
}

#[tokio::test]
async fn test_renew_marked_account_bans_and_rejects() {
    let f = fixture();
    register(&f.store, Account::new("U1"), "K1").await;
    let issued = f.service.authenticate_at(SOURCE, "K1", "F1", NOW).await.unwrap();

    let mut flagged = f.store.account(&Uid::new("U1")).await.unwrap().unwrap();
    flagged.mark_for_ban = true;
    f.store.insert_account(flagged).await;

    let result = f.service.renew_at(&issued.token, NOW).await;

    assert!(matches!(result, Err(AuthError::AccountBanned)));
    let account = f.store.account(&Uid::new("U1")).await.unwrap().unwrap();
    assert!(account.is_banned);
    assert!(!account.mark_for_ban);
    let bans = f.store.fingerprint_bans().await;
    assert_eq!(bans.len(), 1);
    assert_eq!(bans[0].fingerprint, Fingerprint::new("F1"));
}

#[tokio::test]
async fn test_renew_marked_secondary_bans_primary_holder() {
    let f = fixture();
    register(&f.store, Account::new("U1"), "K1").await;
    register(&f.store, Account::secondary("U2", "U1"), "K2").await;
    let issued = f.service.authenticate_at(SOURCE, "K1", "F1", NOW).await.unwrap();

    let mut secondary = f.store.account(&Uid::new("U2")).await.unwrap().unwrap();
    secondary.mark_for_ban = true;
    f.store.insert_account(secondary).await;

    let result = f.service.renew_at(&issued.token, NOW).await;

    assert!(matches!(result, Err(AuthError::AccountBanned)));
    assert!(
        f.store
            .account(&Uid::new("U1"))
            .await
            .unwrap()
            .unwrap()
            .is_banned
    );
}

#[tokio::test]
async fn test_renew_expired_token_rejected() {
    let f = fixture();
    register(&f.store, Account::new("U1"), "K1").await;
    let issued = f.service.authenticate_at(SOURCE, "K1", "F1", NOW).await.unwrap();

    let result = f.service.renew_at(&issued.token, issued.claims.exp).await;

    assert!(matches!(
        result,
        Err(AuthError::TokenExpiredOrInvalid(TokenError::Expired))
    ));
}

#[tokio::test]
async fn test_renew_fingerprint_banned_after_issue_rejected() {
    let f = fixture();
    register(&f.store, Account::new("U1"), "K1").await;
    let issued = f.service.authenticate_at(SOURCE, "K1", "F1", NOW).await.unwrap();
    f.store
        .insert_fingerprint_ban(FingerprintBan {
            fingerprint: Fingerprint::new("F1"),
            reason: "manual".into(),
        })
        .await;

    assert!(matches!(
        f.service.renew_at(&issued.token, NOW).await,
        Err(AuthError::FingerprintBanned)
    ));
}

#[tokio::test]
async fn test_renew_credential_banned_after_issue_rejected() {
    let f = fixture();
    register(&f.store, Account::new("U1"), "K1").await;
    let issued = f.service.authenticate_at(SOURCE, "K1", "F1", NOW).await.unwrap();
    let mut credential = Credential::new(hash_secret_key(PEPPER, "K1"), "U1");
    credential.is_banned = true;
    f.store.insert_credential(credential).await;

    assert!(matches!(
        f.service.renew_at(&issued.token, NOW).await,
        Err(AuthError::AccountBanned)
    ));
}

#[tokio::test]
async fn test_renew_token_from_other_key_rejected() {
    let f = fixture();
    register(&f.store, Account::new("U1"), "K1").await;
    let foreign = TokenIssuer::new(Arc::new(
        KeyRing::new(SigningKeys::single("k1", "someone-else")).unwrap(),
    ));
    let claims = SessionClaims::new(
        Uid::new("U1"),
        Fingerprint::new("F1"),
        None,
        NOW,
        Duration::from_secs(60),
    );
    let token = foreign.issue_at(&claims, NOW).unwrap();

    let err = f.service.renew_at(&token, NOW).await.unwrap_err();

    assert_eq!(err.reason(), RejectReason::TokenExpiredOrInvalid);
}
