//! Signed session tokens.
//!
//! A token is a compact JWS with an HS256 signature:
//!
//! ```text
//! base64url(header) . base64url(claims) . base64url(HMAC-SHA256(key, header.claims))
//! header = {"alg":"HS256","typ":"JWT","kid":"<key id>"}
//! claims = {"uid":"...","chara_ident":"...","alias":"...","exp":<ticks>}
//! ```
//!
//! Tokens are stateless. Verification checks the signature under the key
//! named by `kid` and that `exp` is still in the future; nothing else.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use charsync_protocol::{SessionClaims, Ticks};
use hmac::Mac;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::digest::keyed_mac;
use crate::{KeyRing, TokenError};

const ALGORITHM: &str = "HS256";

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
    kid: String,
}

/// Mints and checks session tokens with the keys of a shared [`KeyRing`].
pub struct TokenIssuer {
    keys: Arc<KeyRing>,
}

impl TokenIssuer {
    pub fn new(keys: Arc<KeyRing>) -> Self {
        Self { keys }
    }

    /// The key ring, for operator reloads.
    pub fn keys(&self) -> &Arc<KeyRing> {
        &self.keys
    }

    /// Signs `claims` with the current key.
    pub fn issue(&self, claims: &SessionClaims) -> Result<String, TokenError> {
        self.issue_at(claims, Ticks::now())
    }

    /// Signs `claims` as of `now`. Refuses claims with an empty uid or
    /// fingerprint, or whose expiry isn't after `now`.
    pub fn issue_at(&self, claims: &SessionClaims, now: Ticks) -> Result<String, TokenError> {
        check_required(claims)?;
        if !claims.is_valid_at(now) {
            return Err(TokenError::ExpiryNotInFuture);
        }

        let (kid, secret) = self.keys.current()?;
        let header = Header {
            alg: ALGORITHM.to_string(),
            typ: "JWT".to_string(),
            kid,
        };
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?),
        );
        let signature = sign(&secret, &signing_input)?;
        Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }

    /// Verifies `token` against the wall clock.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
        self.verify_at(token, Ticks::now())
    }

    /// Verifies `token` as of `now`: well-formed, signed by a known key,
    /// required claims present, and `now < exp`.
    pub fn verify_at(&self, token: &str, now: Ticks) -> Result<SessionClaims, TokenError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed("expected three segments".into()));
        };

        let header: Header = decode_segment(header_b64, "header")?;
        if header.alg != ALGORITHM {
            return Err(TokenError::UnsupportedAlgorithm(header.alg));
        }
        let secret = self
            .keys
            .key(&header.kid)
            .ok_or_else(|| TokenError::UnknownKeyId(header.kid.clone()))?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|e| TokenError::Malformed(format!("signature: {e}")))?;
        let signing_input = &token[..header_b64.len() + 1 + claims_b64.len()];
        let mut mac = keyed_mac(&secret).ok_or(TokenError::BadSignature)?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let claims: SessionClaims = decode_segment(claims_b64, "claims")?;
        check_required(&claims)?;
        if !claims.is_valid_at(now) {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

fn sign(secret: &[u8], signing_input: &str) -> Result<Vec<u8>, TokenError> {
    let mut mac = keyed_mac(secret).ok_or_else(|| TokenError::KeyRing("unusable key".into()))?;
    mac.update(signing_input.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

fn decode_segment<T: DeserializeOwned>(segment: &str, what: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| TokenError::Malformed(format!("{what}: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| TokenError::Malformed(format!("{what}: {e}")))
}

fn check_required(claims: &SessionClaims) -> Result<(), TokenError> {
    if claims.uid.is_empty() {
        return Err(TokenError::MissingClaim("uid"));
    }
    if claims.chara_ident.is_empty() {
        return Err(TokenError::MissingClaim("chara_ident"));
    }
    Ok(())
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use charsync_protocol::{Fingerprint, Uid};

    use super::*;
    use crate::SigningKeys;

    const NOW: Ticks = Ticks(638_000_000_000_000_000);

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(Arc::new(
            KeyRing::new(SigningKeys::single("k1", "first-secret")).unwrap(),
        ))
    }

    fn claims(lifetime: Duration) -> SessionClaims {
        SessionClaims::new(
            Uid::new("U1"),
            Fingerprint::new("F1"),
            Some("alias".into()),
            NOW,
            lifetime,
        )
    }

    fn hours(h: u64) -> Duration {
        Duration::from_secs(h * 3600)
    }

    // =====================================================================
    // issue_at() / verify_at()
    // =====================================================================

    #[test]
    fn test_verify_at_fresh_token_returns_claims() {
        let issuer = issuer();
        let original = claims(hours(6));
        let token = issuer.issue_at(&original, NOW).unwrap();

        let verified = issuer.verify_at(&token, NOW).unwrap();

        assert_eq!(verified, original);
    }

    #[test]
    fn test_verify_at_expiry_boundary() {
        let issuer = issuer();
        let c = claims(hours(6));
        let token = issuer.issue_at(&c, NOW).unwrap();

        let just_before = Ticks(c.exp.0 - 1);
        assert!(issuer.verify_at(&token, just_before).is_ok());
        assert!(matches!(
            issuer.verify_at(&token, c.exp),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn test_issue_at_expired_claims_errors() {
        let issuer = issuer();
        let mut c = claims(hours(6));
        c.exp = NOW;

        assert!(matches!(
            issuer.issue_at(&c, NOW),
            Err(TokenError::ExpiryNotInFuture)
        ));
    }

    #[test]
    fn test_issue_at_empty_fingerprint_errors() {
        let issuer = issuer();
        let mut c = claims(hours(6));
        c.chara_ident = Fingerprint::new("");

        assert!(matches!(
            issuer.issue_at(&c, NOW),
            Err(TokenError::MissingClaim("chara_ident"))
        ));
    }

    #[test]
    fn test_token_header_carries_kid() {
        let token = issuer().issue_at(&claims(hours(1)), NOW).unwrap();
        let header_b64 = token.split('.').next().unwrap();
        let header: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header_b64).unwrap()).unwrap();

        assert_eq!(header["alg"], "HS256");
        assert_eq!(header["kid"], "k1");
    }

    #[test]
    fn test_claims_exp_is_integer_ticks() {
        let c = claims(hours(1));
        let token = issuer().issue_at(&c, NOW).unwrap();
        let claims_b64 = token.split('.').nth(1).unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(claims_b64).unwrap()).unwrap();

        assert_eq!(value["exp"].as_i64(), Some(c.exp.0));
        assert_eq!(value["uid"], "U1");
    }

    // =====================================================================
    // Rejections
    // =====================================================================

    #[test]
    fn test_verify_at_tampered_claims_rejected() {
        let issuer = issuer();
        let token = issuer.issue_at(&claims(hours(1)), NOW).unwrap();
        let mut forged = claims(hours(1));
        forged.uid = Uid::new("ADMIN");
        let forged_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let parts: Vec<&str> = token.split('.').collect();
        let tampered = format!("{}.{}.{}", parts[0], forged_b64, parts[2]);

        assert!(matches!(
            issuer.verify_at(&tampered, NOW),
            Err(TokenError::BadSignature)
        ));
    }

    #[test]
    fn test_verify_at_malformed_rejected() {
        let issuer = issuer();

        assert!(matches!(
            issuer.verify_at("not-a-token", NOW),
            Err(TokenError::Malformed(_))
        ));
        assert!(matches!(
            issuer.verify_at("a.b.c.d", NOW),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn test_verify_at_unknown_kid_rejected() {
        let issuer = issuer();
        let token = issuer.issue_at(&claims(hours(1)), NOW).unwrap();
        issuer
            .keys()
            .reload(SigningKeys::single("k2", "second-secret"))
            .unwrap();

        assert!(matches!(
            issuer.verify_at(&token, NOW),
            Err(TokenError::UnknownKeyId(kid)) if kid == "k1"
        ));
    }

    #[test]
    fn test_rotation_only_affects_new_tokens() {
        let issuer = issuer();
        let old = issuer.issue_at(&claims(hours(1)), NOW).unwrap();

        issuer.keys().rotate("k2", "second-secret").unwrap();
        let new = issuer.issue_at(&claims(hours(1)), NOW).unwrap();

        assert!(issuer.verify_at(&old, NOW).is_ok());
        assert!(issuer.verify_at(&new, NOW).is_ok());
        assert_ne!(old.split('.').next(), new.split('.').next());
    }

    #[test]
    fn test_verify_at_other_issuer_key_rejected() {
        let token = issuer().issue_at(&claims(hours(1)), NOW).unwrap();
        let other = TokenIssuer::new(Arc::new(
            KeyRing::new(SigningKeys::single("k1", "different")).unwrap(),
        ));

        assert!(matches!(
            other.verify_at(&token, NOW),
            Err(TokenError::BadSignature)
        ));
    }
}
