//! Bot gateway: the inbound listener the local bot connects to.
//!
//! Exactly one bot is active at a time. A newcomer replaces the current bot
//! (which is closed without draining) and triggers the server link. Each
//! bot connection has its own reader task that relays frames to the engine.
//!
//! Opening handshakes run on their own tasks and hand finished connections
//! back to the accept loop, so replacement happens in one place and a
//! client that stalls mid-upgrade never blocks the listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sbox_state::{ConnectionState, Link};
use sbox_transport::{
    Connection, InboundConnection, PendingConnection, Transport,
    TransportError, WebSocketTransport,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::relay::{self, Direction};
use crate::runtime::{Shared, WAITING_FOR_BOT};
use crate::SboxError;

/// Pause after a listener-level accept error (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Handshakes that finished but have not been picked up by the accept loop.
const HANDSHAKE_QUEUE: usize = 8;

/// The running accept loop and the address it is bound to.
pub(crate) struct GatewayHandle {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl GatewayHandle {
    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Shared {
    /// Binds the listener and spawns the accept loop.
    pub(crate) async fn start_gateway(
        self: &Arc<Self>,
        addr: &str,
        cancel: CancellationToken,
    ) -> Result<(), SboxError> {
        let bind_error = |source| SboxError::Bind {
            addr: addr.to_string(),
            source,
        };

        let transport = WebSocketTransport::bind(addr).await.map_err(bind_error)?;
        let local = transport
            .local_addr()
            .map_err(|e| bind_error(TransportError::BindFailed(e)))?;
        self.state
            .info("Bot", format!("Bot gateway listening on ws://{local}"));

        let task = tokio::spawn(accept_loop(Arc::clone(self), transport, cancel));
        self.gateway.replace(GatewayHandle { addr: local, task });
        Ok(())
    }

    /// Waits for the accept loop to finish so the port is released. The run
    /// scope must already be cancelled.
    pub(crate) async fn stop_gateway(&self) {
        let Some(handle) = self.gateway.take() else {
            return;
        };
        if let Err(e) = handle.task.await {
            tracing::warn!(error = %e, "bot gateway task failed");
        }
        tracing::debug!(addr = %handle.addr, "bot gateway closed");
    }

    async fn on_bot_connected(
        self: &Arc<Self>,
        conn: InboundConnection,
        cancel: &CancellationToken,
    ) {
        let conn = Arc::new(conn);
        if let Some(previous) = self.bot.replace(Arc::clone(&conn)) {
            self.state.info("Bot", "Replacing previous bot connection");
            previous.close().await;
        }

        self.state
            .update_link(Link::Bot, ConnectionState::Online, "Bot connected");
        self.state.info("Bot", "Bot connected");

        tokio::spawn(bot_reader(Arc::clone(self), conn, cancel.clone()));
        tokio::spawn(Arc::clone(self).ensure_server_connected());
    }

    async fn on_bot_disconnected(self: &Arc<Self>, conn: &Arc<InboundConnection>) {
        if self.bot.take_if_same(conn).is_none() {
            tracing::debug!(conn_id = %conn.id(), "replaced bot connection closed");
            return;
        }
        conn.close().await;

        self.state
            .update_link(Link::Bot, ConnectionState::Offline, "Bot disconnected");
        self.state.warn("Bot", "Bot disconnected");

        if !self.is_live() {
            self.state
                .update_link(Link::Server, ConnectionState::Offline, WAITING_FOR_BOT);
            return;
        }
        self.spawn_recovery();
    }

    /// Restarts the whole runtime after the bot went away, unless a
    /// recovery is already running.
    fn spawn_recovery(self: &Arc<Self>) {
        if !self.recovery.try_begin() {
            self.state.info("Runtime", "Bot recovery already in progress");
            return;
        }

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            shared.state.info("Runtime", "Restarting after bot disconnect");
            let result = Arc::clone(&shared).restart().await;
            shared.recovery.finish();
            if let Err(e) = result {
                shared
                    .state
                    .error("Runtime", format!("Recovery restart failed: {e}"));
                shared.state.update_link(
                    Link::Server,
                    ConnectionState::Offline,
                    WAITING_FOR_BOT,
                );
            }
        });
    }
}

async fn accept_loop(
    shared: Arc<Shared>,
    mut transport: WebSocketTransport,
    cancel: CancellationToken,
) {
    let (ready_tx, mut ready_rx) = mpsc::channel(HANDSHAKE_QUEUE);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(conn) = ready_rx.recv() => {
                shared.on_bot_connected(conn, &cancel).await;
            }
            accepted = transport.accept_tcp() => match accepted {
                Ok(pending) => {
                    tokio::spawn(handshake(
                        Arc::clone(&shared),
                        pending,
                        ready_tx.clone(),
                        cancel.clone(),
                    ));
                }
                Err(e) => {
                    shared.state.error("Bot", format!("Bot gateway accept failed: {e}"));
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                    }
                }
            },
        }
    }
    tracing::debug!("bot accept loop exited");
}

/// Completes one opening handshake and queues the connection for the
/// accept loop.
async fn handshake(
    shared: Arc<Shared>,
    pending: PendingConnection,
    ready: mpsc::Sender<InboundConnection>,
    cancel: CancellationToken,
) {
    let peer = pending.peer_addr();
    let upgraded = tokio::select! {
        _ = cancel.cancelled() => return,
        upgraded = pending.handshake() => upgraded,
    };

    match upgraded {
        Ok(conn) => {
            let permit = tokio::select! {
                _ = cancel.cancelled() => None,
                permit = ready.reserve() => permit.ok(),
            };
            match permit {
                Some(permit) => permit.send(conn),
                None => conn.close().await,
            }
        }
        Err(e) => {
            shared
                .state
                .warn("Bot", format!("Rejected bot connection from {peer}: {e}"));
        }
    }
}

/// Relays every frame from one bot connection to the current engine.
async fn bot_reader(
    shared: Arc<Shared>,
    conn: Arc<InboundConnection>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => return,
            received = conn.recv() => received,
        };

        match received {
            Ok(Some(frame)) => {
                let engine = shared.engine_connection();
                relay::forward(&shared.state, Direction::BotToEngine, engine, frame)
                    .await;
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(conn_id = %conn.id(), error = %e, "bot recv failed");
                break;
            }
        }
    }
    shared.on_bot_disconnected(&conn).await;
}
