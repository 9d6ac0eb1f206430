//! Connection lifecycle: admission, heartbeats, and teardown.
//!
//! Each connection moves through a small state machine:
//!
//! ```text
//!   Disconnected ──(connect)──→ Connecting ──(admitted)──→ Active
//!        ↑                          │                        │
//!        └────────(rejected)────────┘                  (disconnect)
//!        │                                                   ↓
//!        └──────────────(teardown done)────────────── Disconnecting
//! ```
//!
//! The presence registry decides who owns an account. The node also keeps
//! a local `uid → connection` map, but only as a hint: it enables the
//! same-node reconnect fast path and filters out stale disconnects, and
//! every decision it leads to is still made atomically in the registry.
//!
//! Connect and teardown for the same uid take turns on a node. A reconnect
//! that arrives while the old connection is still tearing down waits for
//! the teardown to finish, then admits against a clean registry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError};

use charsync_presence::{Admission, PresenceRegistry};
use charsync_protocol::{Fingerprint, SessionClaims, Ticks, Uid};
use charsync_store::Store;
use charsync_transport::ConnectionId;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::census::Census;
use crate::{HookError, LifecycleError};

// ---------------------------------------------------------------------------
// SessionHooks
// ---------------------------------------------------------------------------

/// The pairing/online cache and co-location lobby service.
///
/// These live outside the node. Connect calls [`init_player`]; teardown
/// calls the other three, each independently.
///
/// [`init_player`]: SessionHooks::init_player
pub trait SessionHooks: Send + Sync + 'static {
    /// Loads the player's pairs into the online cache.
    fn init_player(&self, uid: &Uid) -> impl Future<Output = Result<(), HookError>> + Send;

    /// Removes the player from any co-location lobby.
    fn leave_lobby(&self, uid: &Uid) -> impl Future<Output = Result<(), HookError>> + Send;

    /// Drops the player from the online cache.
    fn dispose_player(&self, uid: &Uid) -> impl Future<Output = Result<(), HookError>> + Send;

    /// Tells the player's online pairs that they went offline.
    fn notify_peers_offline(
        &self,
        uid: &Uid,
    ) -> impl Future<Output = Result<(), HookError>> + Send;
}

/// Hooks that do nothing. For nodes without a pairing cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl SessionHooks for NoopHooks {
    async fn init_player(&self, _uid: &Uid) -> Result<(), HookError> {
        Ok(())
    }

    async fn leave_lobby(&self, _uid: &Uid) -> Result<(), HookError> {
        Ok(())
    }

    async fn dispose_player(&self, _uid: &Uid) -> Result<(), HookError> {
        Ok(())
    }

    async fn notify_peers_offline(&self, _uid: &Uid) -> Result<(), HookError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Disconnected,
    Connecting,
    Active,
    Disconnecting,
}

/// A live session, handed out by [`LifecycleManager::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub uid: Uid,
    pub conn: ConnectionId,
    pub fingerprint: Fingerprint,
    pub alias: Option<String>,
    pub is_admin: bool,
    pub is_moderator: bool,
}

/// Why a session ended. Logged with the teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    /// The client sent `Disconnect`.
    ClientRequested(String),
    /// The socket closed or errored.
    ConnectionLost,
    /// Nothing received within the idle timeout.
    IdleTimeout,
    /// A newer connection took over the account.
    Superseded,
}

/// One step of teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    LeaveLobby,
    DisposePlayer,
    ReleasePresence,
    NotifyPeersOffline,
    DiscardUploads,
}

/// What [`LifecycleManager::disconnect`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// The connection no longer owned the uid locally; nothing was done.
    pub stale: bool,
    /// Steps that failed, with the error. The rest still ran.
    pub failed: Vec<(TeardownStep, String)>,
    pub presence_released: bool,
    pub uploads_discarded: usize,
}

impl TeardownReport {
    fn stale() -> Self {
        Self {
            stale: true,
            ..Self::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn record<T, E: std::fmt::Display>(
        &mut self,
        step: TeardownStep,
        result: Result<T, E>,
    ) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(?step, error = %e, "teardown step failed");
                self.failed.push((step, e.to_string()));
                None
            }
        }
    }
}

#[derive(Default)]
struct LocalState {
    /// Hint: which connection on this node serves each uid.
    by_uid: HashMap<Uid, ConnectionId>,
    /// Lifecycle state of each connection on this node. Absent means
    /// `Disconnected`.
    states: HashMap<ConnectionId, LifecycleState>,
}

// ---------------------------------------------------------------------------
// Turns
// ---------------------------------------------------------------------------

type Slots = HashMap<Uid, Arc<Mutex<()>>>;

/// One async lock per uid with a connect or teardown in flight.
#[derive(Default)]
struct Turns {
    slots: std::sync::Mutex<Slots>,
}

impl Turns {
    /// Waits until no other connect or teardown holds `uid`.
    async fn take(self: &Arc<Self>, uid: &Uid) -> Turn {
        let slot = Arc::clone(self.slots().entry(uid.clone()).or_default());
        let guard = slot.lock_owned().await;
        Turn {
            turns: Arc::clone(self),
            uid: uid.clone(),
            guard: Some(guard),
        }
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Turn {
    turns: Arc<Turns>,
    uid: Uid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for Turn {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut slots = self.turns.slots();
        // Nobody else waiting: the map entry is the last reference.
        if slots
            .get(&self.uid)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.uid);
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectGuard
// ---------------------------------------------------------------------------

/// How far a connect got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ConnectStage {
    Started,
    /// The registry record names this connection.
    Registered,
    /// `init_player` succeeded.
    Initialized,
    Done,
}

/// Rolls a connect back if its future is dropped before it finishes.
///
/// `Drop` is synchronous, so the undo runs on a detached task that keeps
/// the uid's turn until it is done.
struct ConnectGuard<R: PresenceRegistry, H: SessionHooks> {
    local: Arc<Mutex<LocalState>>,
    registry: Arc<R>,
    hooks: Arc<H>,
    uid: Uid,
    conn: ConnectionId,
    stage: ConnectStage,
    turn: Option<Turn>,
}

impl<R: PresenceRegistry, H: SessionHooks> Drop for ConnectGuard<R, H> {
    fn drop(&mut self) {
        let stage = self.stage;
        if stage == ConnectStage::Done {
            return;
        }
        let local = Arc::clone(&self.local);
        let registry = Arc::clone(&self.registry);
        let hooks = Arc::clone(&self.hooks);
        let uid = self.uid.clone();
        let conn = self.conn;
        let turn = self.turn.take();
        tracing::info!(%uid, %conn, ?stage, "connect abandoned, rolling back");
        tokio::spawn(async move {
            let _turn = turn;
            if stage >= ConnectStage::Initialized {
                if let Err(e) = hooks.dispose_player(&uid).await {
                    tracing::warn!(%uid, error = %e, "dispose after abandoned connect");
                }
            }
            if stage >= ConnectStage::Registered {
                if let Err(e) = registry.release(&uid, conn).await {
                    tracing::warn!(%uid, %conn, error = %e, "release after abandoned connect");
                }
            }
            local.lock().await.states.remove(&conn);
        });
    }
}

// ---------------------------------------------------------------------------
// LifecycleManager
// ---------------------------------------------------------------------------

/// Opens and closes live sessions on one node.
///
/// The local lock is only held for map updates, never across a registry,
/// store, or hook call. The per-uid turn is held across the whole of a
/// connect or a teardown.
pub struct LifecycleManager<S, R, H> {
    store: Arc<S>,
    registry: Arc<R>,
    hooks: Arc<H>,
    census: Arc<Census>,
    local: Arc<Mutex<LocalState>>,
    turns: Arc<Turns>,
}

impl<S: Store, R: PresenceRegistry, H: SessionHooks> LifecycleManager<S, R, H> {
    pub fn new(store: Arc<S>, registry: Arc<R>, hooks: Arc<H>, census: Arc<Census>) -> Self {
        Self {
            store,
            registry,
            hooks,
            census,
            local: Arc::new(Mutex::new(LocalState::default())),
            turns: Arc::new(Turns::default()),
        }
    }

    /// Current state of `conn` on this node.
    pub async fn state(&self, conn: ConnectionId) -> LifecycleState {
        self.local
            .lock()
            .await
            .states
            .get(&conn)
            .copied()
            .unwrap_or(LifecycleState::Disconnected)
    }

    /// The connection this node believes serves `uid`.
    pub async fn local_owner(&self, uid: &Uid) -> Option<ConnectionId> {
        self.local.lock().await.by_uid.get(uid).copied()
    }

    /// Number of sessions active on this node.
    pub async fn local_count(&self) -> usize {
        self.local.lock().await.by_uid.len()
    }

    /// Admits `conn` as the live connection for the token's account.
    ///
    /// Waits for any teardown of the same uid on this node first. If the
    /// returned future is dropped midway, whatever it had claimed is given
    /// back.
    pub async fn connect(
        &self,
        claims: SessionClaims,
        conn: ConnectionId,
    ) -> Result<Session, LifecycleError> {
        let turn = self.turns.take(&claims.uid).await;
        let mut guard = ConnectGuard {
            local: Arc::clone(&self.local),
            registry: Arc::clone(&self.registry),
            hooks: Arc::clone(&self.hooks),
            uid: claims.uid.clone(),
            conn,
            stage: ConnectStage::Started,
            turn: Some(turn),
        };
        self.set_state(conn, LifecycleState::Connecting).await;
        let result = self.admit(claims, conn, &mut guard).await;

        let mut local = self.local.lock().await;
        guard.stage = ConnectStage::Done;
        match result {
            Ok(session) => {
                local.by_uid.insert(session.uid.clone(), conn);
                local.states.insert(conn, LifecycleState::Active);
                drop(local);
                tracing::info!(uid = %session.uid, %conn, "session active");
                Ok(session)
            }
            Err(e) => {
                local.states.remove(&conn);
                drop(local);
                tracing::info!(%conn, error = %e, "connect rejected");
                Err(e)
            }
        }
    }

    async fn admit(
        &self,
        claims: SessionClaims,
        conn: ConnectionId,
        guard: &mut ConnectGuard<R, H>,
    ) -> Result<Session, LifecycleError> {
        let SessionClaims {
            uid,
            chara_ident: fingerprint,
            alias,
            ..
        } = claims;

        if self.store.is_fingerprint_banned(&fingerprint).await? {
            return Err(LifecycleError::FingerprintBanned);
        }
        let account = self
            .store
            .account(&uid)
            .await?
            .ok_or_else(|| LifecycleError::UnknownAccount(uid.clone()))?;

        let previous = self.local_owner(&uid).await;
        let took_over = match previous {
            Some(previous) if previous != conn => {
                let swapped = self.registry.replace(&uid, previous, conn).await?;
                if swapped {
                    tracing::debug!(%uid, old = %previous, new = %conn, "same-node reconnect");
                }
                swapped
            }
            _ => false,
        };

        if !took_over {
            if let Admission::Duplicate { owner } = self.registry.try_admit(&uid, conn).await? {
                return Err(LifecycleError::DuplicateSession { owner });
            }
        }
        guard.stage = ConnectStage::Registered;

        if let Err(e) = self.hooks.init_player(&uid).await {
            // Give the slot back so the client can retry.
            if let Err(release) = self.registry.release(&uid, conn).await {
                tracing::warn!(%uid, %conn, error = %release, "release after failed init");
            }
            guard.stage = ConnectStage::Started;
            return Err(e.into());
        }
        guard.stage = ConnectStage::Initialized;

        if let Err(e) = self.store.touch_last_login(&uid, Ticks::now()).await {
            tracing::debug!(%uid, error = %e, "could not record last login");
        }

        Ok(Session {
            uid,
            conn,
            fingerprint,
            alias: alias.or(account.alias),
            is_admin: account.is_admin,
            is_moderator: account.is_moderator,
        })
    }

    /// Refreshes the session's presence record. Returns `false` if this
    /// connection no longer owns it.
    pub async fn heartbeat(&self, session: &Session) -> Result<bool, LifecycleError> {
        Ok(self.registry.refresh(&session.uid, session.conn).await?)
    }

    /// Tears the session down.
    ///
    /// Runs only if this node still maps the uid to `session.conn`; a
    /// disconnect from a superseded connection is reported as stale and
    /// touches nothing. Each step runs even if earlier ones failed.
    pub async fn disconnect(&self, session: &Session, cause: DisconnectCause) -> TeardownReport {
        let uid = &session.uid;
        let conn = session.conn;
        let _turn = self.turns.take(uid).await;
        {
            let mut local = self.local.lock().await;
            if local.by_uid.get(uid) != Some(&conn) {
                local.states.remove(&conn);
                tracing::debug!(%uid, %conn, ?cause, "stale disconnect ignored");
                return TeardownReport::stale();
            }
            local.states.insert(conn, LifecycleState::Disconnecting);
        }
        tracing::info!(%uid, %conn, ?cause, "session closing");

        let mut report = TeardownReport::default();
        report.record(TeardownStep::LeaveLobby, self.hooks.leave_lobby(uid).await);
        report.record(TeardownStep::DisposePlayer, self.hooks.dispose_player(uid).await);
        report.presence_released = report
            .record(TeardownStep::ReleasePresence, self.registry.release(uid, conn).await)
            .unwrap_or(false);
        self.census.clear(uid).await;
        report.record(
            TeardownStep::NotifyPeersOffline,
            self.hooks.notify_peers_offline(uid).await,
        );
        report.uploads_discarded = report
            .record(TeardownStep::DiscardUploads, self.store.discard_pending_uploads(uid).await)
            .unwrap_or(0);

        {
            let mut local = self.local.lock().await;
            if local.by_uid.get(uid) == Some(&conn) {
                local.by_uid.remove(uid);
            }
            local.states.remove(&conn);
        }
        tracing::info!(%uid, %conn, failed = report.failed.len(), "session closed");
        report
    }

    async fn set_state(&self, conn: ConnectionId, state: LifecycleState) {
        self.local.lock().await.states.insert(conn, state);
    }
}
