//! Error types for the auth layer.

use charsync_presence::RegistryError;
use charsync_protocol::RejectReason;
use charsync_store::StoreError;

/// Why a token couldn't be issued or verified.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Not three dot-separated base64url segments, or a segment that
    /// doesn't decode to the expected JSON.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// The header names an algorithm other than HS256.
    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The header names a key id the key ring doesn't hold.
    #[error("unknown signing key id: {0}")]
    UnknownKeyId(String),

    #[error("token signature does not match")]
    BadSignature,

    /// A required claim is empty.
    #[error("missing claim: {0}")]
    MissingClaim(&'static str),

    /// The token was valid once but its expiry has passed.
    #[error("token expired")]
    Expired,

    /// Refused to sign claims that are already expired.
    #[error("token expiry must be in the future")]
    ExpiryNotInFuture,

    /// The key ring has no usable current key.
    #[error("key ring misconfigured: {0}")]
    KeyRing(String),

    #[error("claims serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Why an Authenticate or Renew request was refused.
///
/// The first six variants are verdicts about the caller. The last three
/// are infrastructure failures on our side; the request fails closed and
/// the client only ever sees [`RejectReason::Unknown`] for them.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credential")]
    InvalidCredential,

    #[error("too many failed attempts from this source")]
    TemporaryLockout,

    #[error("account is banned")]
    AccountBanned,

    #[error("fingerprint is banned")]
    FingerprintBanned,

    #[error("account already has a live session")]
    DuplicateSession,

    #[error("token rejected: {0}")]
    TokenExpiredOrInvalid(#[from] TokenError),

    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Signing a fresh token failed (misconfigured key ring).
    #[error("token signing failed: {0}")]
    Signing(TokenError),
}

impl AuthError {
    /// The reason shown to the client.
    pub fn reason(&self) -> RejectReason {
        match self {
            Self::InvalidCredential => RejectReason::InvalidCredential,
            Self::TemporaryLockout => RejectReason::TemporaryLockout,
            Self::AccountBanned => RejectReason::AccountBanned,
            Self::FingerprintBanned => RejectReason::FingerprintBanned,
            Self::DuplicateSession => RejectReason::DuplicateSession,
            Self::TokenExpiredOrInvalid(_) => RejectReason::TokenExpiredOrInvalid,
            Self::StoreUnavailable(_) | Self::Registry(_) | Self::Signing(_) => {
                RejectReason::Unknown
            }
        }
    }

    /// Returns `true` for failures on our side rather than verdicts about
    /// the caller. The boundary logs these at `error`.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::Registry(_) | Self::Signing(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_domain_variants_map_one_to_one() {
        assert_eq!(AuthError::InvalidCredential.reason(), RejectReason::InvalidCredential);
        assert_eq!(AuthError::DuplicateSession.reason(), RejectReason::DuplicateSession);
        assert_eq!(
            AuthError::TokenExpiredOrInvalid(TokenError::Expired).reason(),
            RejectReason::TokenExpiredOrInvalid
        );
    }

    #[test]
    fn test_reason_infrastructure_maps_to_unknown() {
        let err = AuthError::from(StoreError::Unavailable("down".into()));

        assert_eq!(err.reason(), RejectReason::Unknown);
        assert!(err.is_infrastructure());
    }
}
