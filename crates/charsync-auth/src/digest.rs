//! Keyed digest of secret keys.

use hmac::{Hmac, Mac};
use sha2::Sha256;

pub(crate) type HmacSha256 = Hmac<Sha256>;

/// Creates an HMAC-SHA256 instance keyed with `key`.
///
/// HMAC accepts keys of any length, so `None` never happens in practice;
/// callers treat it as a failed check.
pub(crate) fn keyed_mac(key: &[u8]) -> Option<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(key).ok()
}

/// Hashes a client secret key the way credentials are stored: HMAC-SHA256
/// keyed with the server pepper, upper-case hex.
///
/// The registration flow calls this too, so the two sides must agree on
/// the pepper.
pub fn hash_secret_key(pepper: &str, secret_key: &str) -> String {
    // An empty digest never matches a stored credential.
    let Some(mut mac) = keyed_mac(pepper.as_bytes()) else {
        return String::new();
    };
    mac.update(secret_key.as_bytes());
    hex::encode_upper(mac.finalize().into_bytes())
}
