//! Per-connection handler: token requests and live sessions.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The first message decides what the connection is for:
//!
//!   - `Authenticate` / `Renew` → reply with a token or a rejection, close
//!   - `Handshake` → check version and token, admit through the lifecycle
//!     manager, send `Welcome`, then loop over heartbeats, census updates,
//!     and server pushes until the session ends

use std::sync::Arc;
use std::time::Instant;

use charsync_auth::{AuthError, IssuedToken};
use charsync_presence::PresenceRegistry;
use charsync_protocol::{
    ClientMessage, Codec, ConnectionInfo, ProtocolError, RejectReason, ServerMessage,
};
use charsync_store::Store;
use charsync_transport::{Connection, WebSocketConnection};

use crate::CharsyncError;
use crate::lifecycle::{DisconnectCause, Session, SessionHooks};
use crate::server::{NodeState, PROTOCOL_VERSION};

/// Drop guard that tears the session down when the handler exits.
///
/// Teardown runs even if the handler task is cancelled or panics. `Drop`
/// is synchronous, so it spawns a detached task for the async work.
struct TeardownGuard<S: Store, R: PresenceRegistry, H: SessionHooks, C: Codec> {
    session: Session,
    cause: DisconnectCause,
    state: Arc<NodeState<S, R, H, C>>,
}

impl<S: Store, R: PresenceRegistry, H: SessionHooks, C: Codec> Drop for TeardownGuard<S, R, H, C> {
    fn drop(&mut self) {
        let session = self.session.clone();
        let cause = self.cause.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            state.channels.unregister(&session.uid, session.conn).await;
            let report = state.lifecycle.disconnect(&session, cause).await;
            if !report.is_clean() {
                tracing::warn!(uid = %session.uid, failed = ?report.failed, "teardown incomplete");
            }
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<S, R, H, C>(
    conn: WebSocketConnection,
    state: Arc<NodeState<S, R, H, C>>,
) -> Result<(), CharsyncError>
where
    S: Store,
    R: PresenceRegistry,
    H: SessionHooks,
    C: Codec,
{
    let conn_id = conn.id();
    tracing::debug!(
        %conn_id,
        peer = %conn.peer_addr(),
        client = %conn.client_ip(),
        "handling new connection"
    );

    let data = match tokio::time::timeout(
        state.config.handler.first_message_timeout(),
        conn.recv(),
    )
    .await
    {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::InvalidMessage(
                "connection closed before first message".into(),
            )
            .into());
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(ProtocolError::InvalidMessage("first message timed out".into()).into());
        }
    };

    let first: ClientMessage = match state.codec.decode(&data) {
        Ok(msg) => msg,
        Err(e) => {
            send(&conn, &state.codec, &ServerMessage::rejected(RejectReason::Unknown)).await?;
            return Err(e.into());
        }
    };

    match first {
        ClientMessage::Authenticate {
            secret_key,
            fingerprint,
        } => {
            let source = conn.client_ip();
            let result = state.auth.authenticate(source, &secret_key, &fingerprint).await;
            reply_token(&conn, &state.codec, result).await
        }
        ClientMessage::Renew { token } => {
            let result = state.auth.renew(&token).await;
            reply_token(&conn, &state.codec, result).await
        }
        ClientMessage::Handshake { version, token } => {
            run_session(&conn, &state, version, &token).await
        }
        _ => {
            send(&conn, &state.codec, &ServerMessage::rejected(RejectReason::Unknown)).await?;
            Err(ProtocolError::InvalidMessage(
                "first message must be Authenticate, Renew, or Handshake".into(),
            )
            .into())
        }
    }
}

/// Sends the outcome of an Authenticate or Renew request and closes.
async fn reply_token(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    result: Result<IssuedToken, AuthError>,
) -> Result<(), CharsyncError> {
    let reply = match &result {
        Ok(issued) => ServerMessage::Token {
            token: issued.token.clone(),
        },
        Err(e) => {
            if e.is_infrastructure() {
                tracing::error!(conn_id = %conn.id(), error = %e, "token request failed");
            }
            ServerMessage::rejected(e.reason())
        }
    };
    send(conn, codec, &reply).await?;
    let _ = conn.close().await;
    result.map(|_| ()).map_err(CharsyncError::from)
}

/// Opens a live session and runs it until it ends.
async fn run_session<S, R, H, C>(
    conn: &WebSocketConnection,
    state: &Arc<NodeState<S, R, H, C>>,
    version: u32,
    token: &str,
) -> Result<(), CharsyncError>
where
    S: Store,
    R: PresenceRegistry,
    H: SessionHooks,
    C: Codec,
{
    let start = Instant::now();

    if version != PROTOCOL_VERSION {
        send(conn, &state.codec, &ServerMessage::rejected(RejectReason::VersionMismatch)).await?;
        return Err(ProtocolError::InvalidMessage(format!(
            "version mismatch: expected {PROTOCOL_VERSION}, got {version}"
        ))
        .into());
    }

    let claims = match state.auth.issuer().verify(token) {
        Ok(claims) => claims,
        Err(e) => {
            send(
                conn,
                &state.codec,
                &ServerMessage::rejected(RejectReason::TokenExpiredOrInvalid),
            )
            .await?;
            return Err(AuthError::from(e).into());
        }
    };

    let session = match state.lifecycle.connect(claims, conn.id()).await {
        Ok(session) => session,
        Err(e) => {
            send(conn, &state.codec, &ServerMessage::rejected(e.reason())).await?;
            return Err(e.into());
        }
    };
    let uid = session.uid.clone();

    let mut guard = TeardownGuard {
        session: session.clone(),
        cause: DisconnectCause::ConnectionLost,
        state: Arc::clone(state),
    };
    let mut outbox = state.channels.register(&uid, session.conn).await;

    let online_users = match state.registry.online_count().await {
        Ok(n) => n,
        Err(e) => {
            tracing::debug!(%uid, error = %e, "online count unavailable for welcome");
            state.system_info.borrow().online_users
        }
    };
    let welcome = ServerMessage::Welcome(ConnectionInfo {
        uid: uid.clone(),
        alias: session.alias.clone(),
        is_admin: session.is_admin,
        is_moderator: session.is_moderator,
        shard_name: state.config.shard_name.clone(),
        online_users,
        server_version: PROTOCOL_VERSION,
    });
    send(conn, &state.codec, &welcome).await?;

    let mut system_info = state.system_info.clone();
    // Only values published after the welcome are pushed.
    drop(system_info.borrow_and_update());
    let mut broadcast_info = state.config.is_main;
    let idle = state.config.handler.idle_timeout();
    // Only inbound traffic counts as activity; pushes don't extend it.
    let mut deadline = tokio::time::Instant::now() + idle;

    loop {
        tokio::select! {
            inbound = tokio::time::timeout_at(deadline, conn.recv()) => {
                let data = match inbound {
                    Ok(Ok(Some(data))) => {
                        deadline = tokio::time::Instant::now() + idle;
                        data
                    }
                    Ok(Ok(None)) => {
                        tracing::info!(%uid, "connection closed cleanly");
                        break;
                    }
                    Ok(Err(e)) => {
                        tracing::debug!(%uid, error = %e, "recv error");
                        break;
                    }
                    Err(_) => {
                        tracing::info!(%uid, "connection timed out");
                        guard.cause = DisconnectCause::IdleTimeout;
                        break;
                    }
                };

                let msg: ClientMessage = match state.codec.decode(&data) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::debug!(%uid, error = %e, "failed to decode message");
                        continue;
                    }
                };

                match msg {
                    ClientMessage::Heartbeat { client_time } => {
                        match state.lifecycle.heartbeat(&session).await {
                            Ok(true) => {}
                            Ok(false) => {
                                tracing::warn!(%uid, "presence record lost, closing session");
                                guard.cause = DisconnectCause::Superseded;
                                break;
                            }
                            Err(e) => {
                                tracing::warn!(%uid, error = %e, "heartbeat refresh failed");
                            }
                        }
                        let ack = ServerMessage::HeartbeatAck {
                            client_time,
                            server_time: start.elapsed().as_millis() as u64,
                        };
                        send(conn, &state.codec, &ack).await?;
                    }
                    ClientMessage::Census { entry } => {
                        state.census.record(&uid, entry).await;
                    }
                    ClientMessage::Disconnect { reason } => {
                        tracing::info!(%uid, %reason, "client disconnected");
                        guard.cause = DisconnectCause::ClientRequested(reason);
                        break;
                    }
                    _ => {
                        tracing::debug!(%uid, "ignoring unexpected message in session");
                    }
                }
            }

            pushed = outbox.recv() => {
                match pushed {
                    Some(msg) => send(conn, &state.codec, &msg).await?,
                    None => {
                        tracing::info!(%uid, "superseded by a newer connection");
                        guard.cause = DisconnectCause::Superseded;
                        break;
                    }
                }
            }

            changed = system_info.changed(), if broadcast_info => {
                match changed {
                    Ok(()) => {
                        let online_users = system_info.borrow_and_update().online_users;
                        send(conn, &state.codec, &ServerMessage::SystemInfo { online_users }).await?;
                    }
                    Err(_) => broadcast_info = false,
                }
            }
        }
    }

    if guard.cause == DisconnectCause::Superseded {
        let _ = conn.close().await;
    }
    // guard drops here → teardown runs.
    Ok(())
}

/// Encodes and sends one server message.
async fn send(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    msg: &ServerMessage,
) -> Result<(), CharsyncError> {
    let bytes = codec.encode(msg)?;
    conn.send(&bytes).await?;
    Ok(())
}
