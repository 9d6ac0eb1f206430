//! Live-reloadable set of token signing keys.

use std::sync::{PoisonError, RwLock};

use crate::{SigningKeys, TokenError};

/// Holds the signing keys and which one is current.
///
/// Reads happen on every issue and verify; writes only on operator
/// reload, so a std `RwLock` (never held across an `.await`) is enough.
pub struct KeyRing {
    keys: RwLock<SigningKeys>,
}

impl KeyRing {
    /// Creates a key ring, rejecting sets whose current key is missing or
    /// empty.
    pub fn new(keys: SigningKeys) -> Result<Self, TokenError> {
        validate(&keys)?;
        Ok(Self {
            keys: RwLock::new(keys),
        })
    }

    /// Returns the current key id and its secret.
    pub fn current(&self) -> Result<(String, Vec<u8>), TokenError> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        let secret = keys
            .keys
            .get(&keys.current)
            .ok_or_else(|| TokenError::KeyRing(format!("current key {} missing", keys.current)))?;
        Ok((keys.current.clone(), secret.as_bytes().to_vec()))
    }

    /// Returns the secret for `kid`, if known.
    pub fn key(&self, kid: &str) -> Option<Vec<u8>> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        keys.keys.get(kid).map(|s| s.as_bytes().to_vec())
    }

    /// Id of the key new tokens are signed with.
    pub fn current_kid(&self) -> String {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .clone()
    }

    /// Replaces the whole key set.
    ///
    /// Ids missing from `keys` stop verifying immediately, which is how a
    /// leaked key is revoked. An invalid set is refused and the old one
    /// stays in place.
    pub fn reload(&self, keys: SigningKeys) -> Result<(), TokenError> {
        validate(&keys)?;
        let current = keys.current.clone();
        *self.keys.write().unwrap_or_else(PoisonError::into_inner) = keys;
        tracing::info!(kid = %current, "signing keys reloaded");
        Ok(())
    }

    /// Adds a key and makes it current. Older keys keep verifying.
    pub fn rotate(&self, kid: impl Into<String>, secret: impl Into<String>) -> Result<(), TokenError> {
        let (kid, secret) = (kid.into(), secret.into());
        if kid.is_empty() || secret.is_empty() {
            return Err(TokenError::KeyRing("rotated key id and secret must be non-empty".into()));
        }
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        keys.keys.insert(kid.clone(), secret);
        keys.current = kid;
        tracing::info!(kid = %keys.current, "signing key rotated");
        Ok(())
    }
}

fn validate(keys: &SigningKeys) -> Result<(), TokenError> {
    match keys.keys.get(&keys.current) {
        Some(secret) if !keys.current.is_empty() && !secret.is_empty() => Ok(()),
        Some(_) => Err(TokenError::KeyRing(format!(
            "current key {:?} is empty",
            keys.current
        ))),
        None => Err(TokenError::KeyRing(format!(
            "current key {:?} is not in the key set",
            keys.current
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_missing_current_key_errors() {
        let keys = SigningKeys {
            current: "k2".into(),
            ..SigningKeys::single("k1", "secret")
        };

        assert!(matches!(KeyRing::new(keys), Err(TokenError::KeyRing(_))));
    }

    #[test]
    fn test_new_empty_secret_errors() {
        assert!(KeyRing::new(SigningKeys::single("k1", "")).is_err());
    }

    #[test]
    fn test_rotate_keeps_old_keys_verifiable() {
        let ring = KeyRing::new(SigningKeys::single("k1", "one")).unwrap();

        ring.rotate("k2", "two").unwrap();

        assert_eq!(ring.current_kid(), "k2");
        assert_eq!(ring.key("k1"), Some(b"one".to_vec()));
        assert_eq!(ring.current().unwrap(), ("k2".to_string(), b"two".to_vec()));
    }

    #[test]
    fn test_reload_drops_unlisted_keys() {
        let ring = KeyRing::new(SigningKeys::single("k1", "one")).unwrap();

        ring.reload(SigningKeys::single("k2", "two")).unwrap();

        assert_eq!(ring.key("k1"), None);
        assert_eq!(ring.current_kid(), "k2");
    }

    #[test]
    fn test_reload_invalid_set_keeps_old_keys() {
        let ring = KeyRing::new(SigningKeys::single("k1", "one")).unwrap();

        assert!(ring.reload(SigningKeys::default()).is_err());
        assert_eq!(ring.current_kid(), "k1");
    }
}
