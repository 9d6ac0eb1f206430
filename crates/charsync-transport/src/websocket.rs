//! WebSocket ingress using `tokio-tungstenite`.
//!
//! Nodes usually sit behind a reverse proxy, so the socket's peer is the
//! proxy. When a client-address header is configured, the upgrade request
//! is inspected and the first address in that header becomes the
//! connection's [`client_ip`](Connection::client_ip).
//!
//! The TCP accept loop runs on its own task and hands each socket to a
//! per-socket upgrade task bounded by the upgrade timeout. A client that
//! opens a socket and never finishes the handshake only ties up its own
//! task. [`accept`](Transport::accept) yields connections in the order
//! their upgrades complete.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use crate::{Connection, ConnectionId, Transport, TransportError};

type WsStream = tokio_tungstenite::WebSocketStream<TcpStream>;

/// Default limit on how long a socket may take to finish the upgrade.
pub const DEFAULT_UPGRADE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upgraded connections waiting for `accept`.
const UPGRADED_BACKLOG: usize = 128;

/// Pause after a failed TCP accept (e.g. out of file descriptors).
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Listens for WebSocket clients.
pub struct WebSocketTransport {
    local_addr: SocketAddr,
    /// Moved into the accept task on the first `accept`.
    listener: Option<TcpListener>,
    client_ip_header: Option<String>,
    upgrade_timeout: Duration,
    upgraded: Option<mpsc::Receiver<WebSocketConnection>>,
    acceptor: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    /// Binds a listener to `addr`.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let bind_error = |source: std::io::Error| TransportError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        tracing::info!(%local_addr, "WebSocket transport listening");
        Ok(Self {
            local_addr,
            listener: Some(listener),
            client_ip_header: None,
            upgrade_timeout: DEFAULT_UPGRADE_TIMEOUT,
            upgraded: None,
            acceptor: None,
        })
    }

    /// Trusts `header` (e.g. `X-Forwarded-For`) for the client address.
    ///
    /// Only set this when every connection arrives through a proxy that
    /// overwrites the header; otherwise clients can pick their own address.
    pub fn with_client_ip_header(mut self, header: Option<String>) -> Self {
        self.client_ip_header = header;
        self
    }

    /// Drops sockets that haven't finished the upgrade within `timeout`.
    pub fn with_upgrade_timeout(mut self, timeout: Duration) -> Self {
        self.upgrade_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        Ok(self.local_addr)
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        if let Some(listener) = self.listener.take() {
            let (tx, rx) = mpsc::channel(UPGRADED_BACKLOG);
            let upgrade = Arc::new(Upgrade {
                client_ip_header: self.client_ip_header.clone(),
                timeout: self.upgrade_timeout,
            });
            self.acceptor = Some(tokio::spawn(accept_loop(listener, upgrade, tx)));
            self.upgraded = Some(rx);
        }
        let upgraded = self.upgraded.as_mut().ok_or(TransportError::Closed)?;
        upgraded.recv().await.ok_or(TransportError::Closed)
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }
    }
}

/// Settings every upgrade task needs.
struct Upgrade {
    client_ip_header: Option<String>,
    timeout: Duration,
}

async fn accept_loop(
    listener: TcpListener,
    upgrade: Arc<Upgrade>,
    upgraded: mpsc::Sender<WebSocketConnection>,
) {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept failed");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };
        if upgraded.is_closed() {
            return;
        }

        let upgrade = Arc::clone(&upgrade);
        let upgraded = upgraded.clone();
        tokio::spawn(async move {
            let result =
                tokio::time::timeout(upgrade.timeout, upgrade.run(stream, peer_addr)).await;
            match result {
                Ok(Ok(conn)) => {
                    // Fails only once the transport is gone.
                    let _ = upgraded.send(conn).await;
                }
                Ok(Err(e)) => tracing::debug!(%peer_addr, error = %e, "upgrade failed"),
                Err(_) => tracing::debug!(%peer_addr, "upgrade timed out"),
            }
        });
    }
}

impl Upgrade {
    async fn run(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<WebSocketConnection, TransportError> {
        let mut forwarded = None;
        let header = self.client_ip_header.as_deref();
        let inspect = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            forwarded = header.and_then(|name| forwarded_ip(req, name));
            Ok(resp)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, inspect)
            .await
            .map_err(|e| TransportError::Upgrade(Box::new(e)))?;

        let id = ConnectionId::generate();
        let client_ip = forwarded.unwrap_or_else(|| peer_addr.ip());
        tracing::debug!(%id, %peer_addr, %client_ip, "accepted WebSocket connection");

        // Split so a pending `recv` never blocks a push on the same socket.
        let (sink, stream) = ws.split();
        Ok(WebSocketConnection {
            id,
            peer_addr,
            client_ip,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }
}

/// First well-formed address in `name`, if present.
fn forwarded_ip(req: &Request, name: &str) -> Option<IpAddr> {
    let value = req.headers().get(name)?.to_str().ok()?;
    value.split(',').next()?.trim().parse().ok()
}

/// One accepted WebSocket client.
pub struct WebSocketConnection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    client_ip: IpAddr,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let msg = Message::Binary(data.to_vec().into());
        self.sink
            .lock()
            .await
            .send(msg)
            .await
            .map_err(|e| TransportError::Send(Box::new(e)))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.into())),
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // ping/pong are answered by tungstenite
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::Receive(Box::new(e))),
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.sink
            .lock()
            .await
            .close()
            .await
            .map_err(|e| TransportError::Send(Box::new(e)))
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    fn client_ip(&self) -> IpAddr {
        self.client_ip
    }
}
