//! In-memory [`PresenceRegistry`].
//!
//! Share one `Arc<MemoryRegistry>` between several node instances in a
//! test and they behave like a fleet pointed at the same key-value store.
//! Every operation takes the single lock once, which stands in for the
//! store's atomic round trip.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use charsync_protocol::Uid;
use charsync_transport::ConnectionId;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{Admission, PresenceConfig, PresenceRegistry, RegistryError, presence_key};

#[derive(Debug, Clone, Copy)]
struct Record {
    owner: ConnectionId,
    expires_at: Instant,
}

impl Record {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// A [`PresenceRegistry`] held in process memory.
pub struct MemoryRegistry {
    records: Mutex<HashMap<String, Record>>,
    ttl: Duration,
    available: AtomicBool,
}

impl MemoryRegistry {
    pub fn new(config: PresenceConfig) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            ttl: config.ttl(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulates losing (or regaining) the shared store.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), RegistryError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RegistryError::Unavailable("memory registry switched off".into()))
        }
    }

    /// Looks up the live record for `key`, dropping it if it has expired.
    fn live(records: &mut HashMap<String, Record>, key: &str, now: Instant) -> Option<Record> {
        match records.get(key) {
            Some(record) if record.is_live(now) => Some(*record),
            Some(expired) => {
                tracing::debug!(key, owner = %expired.owner, "presence record expired");
                records.remove(key);
                None
            }
            None => None,
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new(PresenceConfig::default())
    }
}

impl PresenceRegistry for MemoryRegistry {
    async fn try_admit(&self, uid: &Uid, conn: ConnectionId) -> Result<Admission, RegistryError> {
        self.check_available()?;
        let key = presence_key(uid);
        let now = Instant::now();
        let mut records = self.records.lock().await;

        if let Some(existing) = Self::live(&mut records, &key, now) {
            tracing::debug!(%uid, %conn, owner = %existing.owner, "admission refused");
            return Ok(Admission::Duplicate {
                owner: existing.owner,
            });
        }
        records.insert(
            key,
            Record {
                owner: conn,
                expires_at: now + self.ttl,
            },
        );
        Ok(Admission::Admitted)
    }

    async fn release(&self, uid: &Uid, conn: ConnectionId) -> Result<bool, RegistryError> {
        self.check_available()?;
        let key = presence_key(uid);
        let mut records = self.records.lock().await;

        match Self::live(&mut records, &key, Instant::now()) {
            Some(record) if record.owner == conn => {
                records.remove(&key);
                Ok(true)
            }
            Some(record) => {
                tracing::debug!(%uid, %conn, owner = %record.owner, "release by non-owner ignored");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn replace(
        &self,
        uid: &Uid,
        expected: ConnectionId,
        conn: ConnectionId,
    ) -> Result<bool, RegistryError> {
        self.check_available()?;
        let key = presence_key(uid);
        let now = Instant::now();
        let mut records = self.records.lock().await;

        match Self::live(&mut records, &key, now) {
            Some(record) if record.owner == expected => {
                records.insert(
                    key,
                    Record {
                        owner: conn,
                        expires_at: now + self.ttl,
                    },
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn refresh(&self, uid: &Uid, conn: ConnectionId) -> Result<bool, RegistryError> {
        self.check_available()?;
        let key = presence_key(uid);
        let now = Instant::now();
        let mut records = self.records.lock().await;

        if Self::live(&mut records, &key, now).is_some_and(|r| r.owner == conn) {
            if let Some(record) = records.get_mut(&key) {
                record.expires_at = now + self.ttl;
            }
            return Ok(true);
        }
        Ok(false)
    }

    async fn owner(&self, uid: &Uid) -> Result<Option<ConnectionId>, RegistryError> {
        self.check_available()?;
        let key = presence_key(uid);
        let mut records = self.records.lock().await;
        Ok(Self::live(&mut records, &key, Instant::now()).map(|r| r.owner))
    }

    async fn online_count(&self) -> Result<usize, RegistryError> {
        self.check_available()?;
        let now = Instant::now();
        let mut records = self.records.lock().await;
        records.retain(|_, r| r.is_live(now));
        Ok(records.keys().filter(|k| k.starts_with("UID:")).count())
    }
}

// =========================================================================
// Tests
// =========================================================================
