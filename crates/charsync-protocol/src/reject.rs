//! Client-facing rejection reasons.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why the server refused an authentication, renewal, or connection.
///
/// These are expected, high-frequency outcomes, so they are plain values
/// sent to the client rather than server-side errors. Infrastructure
/// failures are deliberately collapsed into [`RejectReason::Unknown`] so
/// clients never learn what broke inside the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    /// The secret key doesn't match any credential.
    InvalidCredential,
    /// Too many failed attempts from this source address.
    TemporaryLockout,
    /// The account (or its primary) is banned.
    AccountBanned,
    /// The presented fingerprint is banned.
    FingerprintBanned,
    /// Another live connection already owns this account's session.
    DuplicateSession,
    /// The bearer token is malformed, badly signed, or expired.
    TokenExpiredOrInvalid,
    /// The client speaks a different protocol version.
    VersionMismatch,
    /// Something failed inside the service.
    Unknown,
}

impl RejectReason {
    /// Human-readable message shown to the user.
    pub fn message(self) -> &'static str {
        match self {
            Self::InvalidCredential => {
                "The provided secret key is invalid. Verify your account exists and/or recover the secret key."
            }
            Self::TemporaryLockout => {
                "Due to an excessive amount of failed authentication attempts you are temporarily locked out. Check your secret key configuration and try connecting again in 5 minutes."
            }
            Self::AccountBanned => "Your account is banned from using the service.",
            Self::FingerprintBanned => "Your character is banned from using the service.",
            Self::DuplicateSession => {
                "Already logged in to this account. Reconnect in 60 seconds. If you keep seeing this issue, restart your game."
            }
            Self::TokenExpiredOrInvalid => "Your session token is invalid or has expired.",
            Self::VersionMismatch => "Your client is outdated, please update.",
            Self::Unknown => "Unknown internal server error.",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}
