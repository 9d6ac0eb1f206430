//! Census statistics and the periodic system-info report.
//!
//! Clients report a small [`CensusEntry`] about their character. The node
//! keeps it only while the user is connected; teardown clears it. The
//! [`SystemInfoReporter`] polls fleet-wide counters on a fixed period and
//! publishes them on a `watch` channel, which the main node forwards to
//! every client it holds.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use charsync_presence::PresenceRegistry;
use charsync_protocol::{CensusEntry, Uid};
use charsync_store::Store;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// Census
// ---------------------------------------------------------------------------

/// Per-user census entries held by this node.
#[derive(Default)]
pub struct Census {
    entries: Mutex<HashMap<Uid, CensusEntry>>,
}

/// Aggregated view of the census.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CensusSnapshot {
    /// Users per world id.
    pub by_world: BTreeMap<u16, usize>,
    pub total: usize,
}

impl Census {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records (or replaces) `uid`'s entry.
    pub async fn record(&self, uid: &Uid, entry: CensusEntry) {
        self.entries.lock().await.insert(uid.clone(), entry);
    }

    /// Drops `uid`'s entry. Returns `true` if one existed.
    pub async fn clear(&self, uid: &Uid) -> bool {
        self.entries.lock().await.remove(uid).is_some()
    }

    pub async fn snapshot(&self) -> CensusSnapshot {
        let entries = self.entries.lock().await;
        let mut by_world = BTreeMap::new();
        for entry in entries.values() {
            *by_world.entry(entry.world).or_insert(0) += 1;
        }
        CensusSnapshot {
            by_world,
            total: entries.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// SystemInfoReporter
// ---------------------------------------------------------------------------

/// Fleet-wide counters published to clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemInfo {
    pub online_users: usize,
}

/// Polls the presence registry on a fixed period and publishes the result.
///
/// A failed poll is logged and the previous value stays published; the
/// loop never stops on its own.
pub struct SystemInfoReporter<S, R> {
    store: Arc<S>,
    registry: Arc<R>,
    census: Arc<Census>,
    period: Duration,
    tx: watch::Sender<SystemInfo>,
}

impl<S: Store, R: PresenceRegistry> SystemInfoReporter<S, R> {
    pub fn new(store: Arc<S>, registry: Arc<R>, census: Arc<Census>, period: Duration) -> Self {
        let (tx, _) = watch::channel(SystemInfo::default());
        Self {
            store,
            registry,
            census,
            period,
            tx,
        }
    }

    /// A receiver that sees every published value.
    pub fn subscribe(&self) -> watch::Receiver<SystemInfo> {
        self.tx.subscribe()
    }

    /// Runs one poll. Returns the published value, or `None` if the
    /// registry couldn't be read.
    pub async fn poll(&self) -> Option<SystemInfo> {
        let online_users = match self.registry.online_count().await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "system info poll failed");
                return None;
            }
        };
        let info = SystemInfo { online_users };
        self.tx.send_replace(info);

        let census = self.census.snapshot().await;
        match self.store.registered_accounts().await {
            Ok(registered) => tracing::debug!(
                online_users,
                registered,
                census_total = census.total,
                worlds = census.by_world.len(),
                "system info"
            ),
            Err(e) => tracing::debug!(online_users, error = %e, "system info without account count"),
        }
        Some(info)
    }

    /// Spawns the polling loop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.poll().await;
            }
        })
    }
}
