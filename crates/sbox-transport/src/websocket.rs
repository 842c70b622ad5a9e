//! WebSocket transport implementation using `tokio-tungstenite`.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Connection, ConnectionId, Frame, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Upper bound on how long a close handshake may hold up the caller.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on the opening handshake of an accepted socket.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// A connection accepted by [`WebSocketTransport`].
pub type InboundConnection = WebSocketConnection<TcpStream>;

/// A connection opened with [`WebSocketConnection::connect`].
pub type OutboundConnection = WebSocketConnection<MaybeTlsStream<TcpStream>>;

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::BindFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener })
    }
}

impl WebSocketTransport {
    /// Accepts the next TCP connection without running the WebSocket
    /// handshake.
    ///
    /// The caller decides where [`PendingConnection::handshake`] runs, so a
    /// client that never completes its upgrade does not hold up the
    /// listener.
    pub async fn accept_tcp(&mut self) -> Result<PendingConnection, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::trace!(%addr, "accepted TCP connection");
        Ok(PendingConnection { stream, addr })
    }
}

impl Transport for WebSocketTransport {
    type Connection = InboundConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        self.accept_tcp().await?.handshake().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// A TCP connection that has not completed its WebSocket upgrade yet.
pub struct PendingConnection {
    stream: TcpStream,
    addr: SocketAddr,
}

impl PendingConnection {
    /// Address of the remote peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Runs the server side of the opening handshake.
    ///
    /// Fails if the peer sends something other than an upgrade request, or
    /// does not finish within 10 seconds.
    pub async fn handshake(self) -> Result<InboundConnection, TransportError> {
        let addr = self.addr;
        let upgrade = tokio_tungstenite::accept_async(self.stream);
        let ws = match tokio::time::timeout(HANDSHAKE_TIMEOUT, upgrade).await {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                return Err(TransportError::AcceptFailed(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    e,
                )));
            }
            Err(_) => {
                return Err(TransportError::AcceptFailed(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("handshake with {addr} timed out"),
                )));
            }
        };

        let conn = WebSocketConnection::new(ws);
        tracing::debug!(id = %conn.id, %addr, "accepted WebSocket connection");
        Ok(conn)
    }
}

/// A single WebSocket connection.
///
/// The socket is split into its sink and stream halves, each behind its own
/// lock, so a task parked in [`recv`](Connection::recv) never holds up a
/// [`send`](Connection::send) from another task.
pub struct WebSocketConnection<S> {
    id: ConnectionId,
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    stream: Mutex<SplitStream<WebSocketStream<S>>>,
    open: AtomicBool,
}

impl<S> WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn new(ws: WebSocketStream<S>) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id: ConnectionId::new(
                NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            ),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            open: AtomicBool::new(true),
        }
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl OutboundConnection {
    /// Opens a client connection to `url` (e.g. `ws://127.0.0.1:50505`).
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (ws, _response) =
            tokio_tungstenite::connect_async(url).await.map_err(|e| {
                TransportError::ConnectFailed(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    e,
                ))
            })?;
        let conn = WebSocketConnection::new(ws);
        tracing::debug!(id = %conn.id, url, "opened WebSocket connection");
        Ok(conn)
    }
}

impl<S> Connection for WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Error = TransportError;

    async fn send(&self, frame: Frame) -> Result<(), Self::Error> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed(format!(
                "{} is closed",
                self.id
            )));
        }

        let msg = match frame {
            Frame::Text(text) => Message::text(text),
            Frame::Binary(data) => Message::binary(data),
        };
        self.sink.lock().await.send(msg).await.map_err(|e| {
            if matches!(
                e,
                tungstenite::Error::ConnectionClosed
                    | tungstenite::Error::AlreadyClosed
                    | tungstenite::Error::Io(_)
            ) {
                self.mark_closed();
            }
            TransportError::SendFailed(io::Error::new(
                io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    async fn recv(&self) -> Result<Option<Frame>, Self::Error> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Frame::Text(text.as_str().to_owned())));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(Frame::Binary(data.into())));
                }
                Some(Ok(Message::Close(_))) | None => {
                    self.mark_closed();
                    return Ok(None);
                }
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(
                    tungstenite::Error::ConnectionClosed
                    | tungstenite::Error::AlreadyClosed,
                )) => {
                    self.mark_closed();
                    return Ok(None);
                }
                Some(Err(tungstenite::Error::Protocol(e))) => {
                    self.mark_closed();
                    return Err(TransportError::ProtocolViolation(
                        e.to_string(),
                    ));
                }
                Some(Err(e)) => {
                    self.mark_closed();
                    return Err(TransportError::ReceiveFailed(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }

        let closing = async { self.sink.lock().await.close().await };
        match tokio::time::timeout(CLOSE_TIMEOUT, closing).await {
            Ok(Ok(())) => tracing::debug!(id = %self.id, "connection closed"),
            Ok(Err(e)) => {
                tracing::debug!(id = %self.id, error = %e, "close failed, dropping connection");
            }
            Err(_) => {
                tracing::debug!(id = %self.id, "close timed out, dropping connection");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
