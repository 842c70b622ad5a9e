//! Server link: the single outbound connection to the coordination server.
//!
//! Once a bot is attached the relay connects, registers with the configured
//! credentials, and then waits for instructions. `join-room` and
//! `leave-room` drive the engine link; every join gets a `join-room-resp`.

use std::sync::Arc;

use sbox_protocol::{
    Codec, Envelope, JoinRoomPayload, JoinRoomResponsePayload, MessageKind,
    ProtocolError, RegistrationRequest, ServerMessage, leave_room_target,
};
use sbox_state::{ConnectionState, Link};
use sbox_transport::{Connection, OutboundConnection};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::relay::Slot;
use crate::runtime::{BoxFuture, Shared};
use crate::SboxError;

/// Comment sent with a failed `join-room-resp`.
const JOIN_REFUSED: &str = "Connection refused";

pub(crate) struct ServerLink {
    conn: Slot<Arc<OutboundConnection>>,
    /// Serializes connect attempts against each other and against
    /// `stop_server`.
    connect_gate: Mutex<()>,
}

impl ServerLink {
    pub(crate) fn new() -> Self {
        Self {
            conn: Slot::new(),
            connect_gate: Mutex::new(()),
        }
    }

    fn open_connection(&self) -> Option<Arc<OutboundConnection>> {
        self.conn.get().filter(|conn| conn.is_open())
    }
}

impl Shared {
    /// Connects and registers unless a live connection already exists.
    pub(crate) fn ensure_server_connected(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let _gate = self.server.connect_gate.lock().await;
            if self.server.open_connection().is_some() {
                return;
            }
            let Some(run) = self.live_run() else {
                return;
            };

            let connected = tokio::select! {
                _ = run.cancel.cancelled() => return,
                connected = self.connect_server(&run.config) => connected,
            };

            let conn = match connected {
                Ok(conn) => conn,
                Err(e) => {
                    let detail = e.connect_detail();
                    self.state
                        .update_link(Link::Server, ConnectionState::Error, detail.clone());
                    self.state.error("Server", detail);
                    return;
                }
            };

            if run.cancel.is_cancelled() {
                conn.close().await;
                return;
            }
            if let Some(stale) = self.server.conn.replace(Arc::clone(&conn)) {
                stale.close().await;
            }
            tokio::spawn(server_loop(Arc::clone(&self), conn, run.cancel));
        })
    }

    async fn connect_server(
        &self,
        config: &RelayConfig,
    ) -> Result<Arc<OutboundConnection>, SboxError> {
        let url = config.server_url();
        let addr = config.server_addr();
        self.state.update_link(
            Link::Server,
            ConnectionState::Connecting,
            format!("Connecting to {url}"),
        );
        self.state.info("Server", format!("Connecting to {url}"));

        let conn = OutboundConnection::connect(&url)
            .await
            .map_err(|source| SboxError::Connect {
                addr: addr.clone(),
                source,
            })?;

        self.state.update_link(
            Link::Server,
            ConnectionState::Online,
            format!("Connected to {addr}"),
        );
        self.state.info("Server", format!("Connected to {addr}"));

        let request = RegistrationRequest::new(
            config.team_id.as_str(),
            config.api_key.as_str(),
            config.player_email.as_str(),
        );
        let sent = match self.codec.encode(&request) {
            Ok(text) => conn.send_text(text).await.map_err(SboxError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = sent {
            conn.close().await;
            return Err(e);
        }
        tracing::debug!(conn_id = %conn.id(), team_id = %config.team_id, "registration sent");
        self.state.info("Server", "Registration request sent");
        Ok(Arc::new(conn))
    }

    /// Closes the server connection. Waits for any connect in progress.
    pub(crate) async fn stop_server(&self) {
        let _gate = self.server.connect_gate.lock().await;
        if let Some(conn) = self.server.conn.take() {
            conn.close().await;
            self.state.info("Server", "Server connection closed");
        }
        self.state
            .update_link(Link::Server, ConnectionState::Offline, "Disconnected");
    }

    /// Wraps `payload` in an envelope and sends it to the server.
    ///
    /// Returns `false` if nothing was sent; the reason has been logged.
    pub(crate) async fn send_to_server<T: Serialize>(
        &self,
        kind: MessageKind,
        payload: &T,
    ) -> bool {
        let text = match Envelope::wrap(&self.codec, kind.clone(), payload)
            .and_then(|envelope| self.codec.encode(&envelope))
        {
            Ok(text) => text,
            Err(e) => {
                self.state
                    .error("Server", format!("Unable to encode {kind}: {e}"));
                return false;
            }
        };

        let Some(conn) = self.server.open_connection() else {
            self.state
                .warn("Server", format!("Server offline, unable to send {kind}"));
            return false;
        };
        match conn.send_text(text).await {
            Ok(()) => {
                tracing::debug!(%kind, "sent to server");
                true
            }
            Err(e) => {
                self.state
                    .error("Server", format!("Failed to send {kind}: {e}"));
                false
            }
        }
    }

    async fn handle_server_message(self: &Arc<Self>, text: &str) {
        match ServerMessage::parse(text) {
            Ok(ServerMessage::RegistrationAck { accepted: true }) => {
                self.state
                    .update_link(Link::Server, ConnectionState::Online, "Registered");
                self.state.info("Server", "Registered");
            }
            Ok(ServerMessage::RegistrationAck { accepted: false }) => {
                self.state.update_link(
                    Link::Server,
                    ConnectionState::Error,
                    "Registration denied",
                );
                self.state.error("Server", "Registration denied");
            }
            Ok(ServerMessage::Envelope(envelope)) => {
                self.handle_envelope(&envelope).await;
            }
            Err(ProtocolError::InvalidMessage(reason)) => {
                self.state
                    .warn("Server", format!("Unknown server message ({reason}): {text}"));
            }
            Err(e) => {
                self.state
                    .error("Server", format!("Protocol error from server: {e}"));
            }
        }
    }

    async fn handle_envelope(self: &Arc<Self>, envelope: &Envelope) {
        match envelope.message_kind() {
            Some(MessageKind::JoinRoom) => self.handle_join_room(envelope).await,
            Some(MessageKind::LeaveRoom) => self.handle_leave_room(envelope).await,
            Some(other) => {
                self.state
                    .warn("Server", format!("Unsupported message type: {other}"));
            }
            None => {
                self.state.warn("Server", "Unknown server message without type");
            }
        }
    }

    async fn handle_join_room(self: &Arc<Self>, envelope: &Envelope) {
        let payload: JoinRoomPayload = match envelope.decode_payload(&self.codec) {
            Ok(payload) => payload,
            Err(e) => {
                self.state
                    .error("Server", format!("Invalid join-room payload: {e}"));
                return;
            }
        };
        self.state.info(
            "Server",
            format!(
                "Join requested: room {} ({}) at {}",
                payload.room_name,
                payload.game_name,
                payload.engine_address()
            ),
        );

        let joined = self.start_engine(&payload).await;
        let response = JoinRoomResponsePayload {
            room_name: payload.room_name,
            joined,
            comment: if joined { String::new() } else { JOIN_REFUSED.to_string() },
        };
        self.send_to_server(MessageKind::JoinRoomResp, &response).await;
    }

    async fn handle_leave_room(&self, envelope: &Envelope) {
        let room = match leave_room_target(envelope) {
            Ok(room) => room,
            Err(e) => {
                self.state
                    .warn("Server", format!("Malformed leave-room payload: {e}"));
                None
            }
        };
        self.stop_engine("Server requested leave", true, room.as_deref())
            .await;
    }

    async fn on_server_disconnected(self: &Arc<Self>, conn: &Arc<OutboundConnection>) {
        let current = self.server.conn.take_if_same(conn).is_some();
        conn.close().await;
        if !current {
            tracing::debug!(conn_id = %conn.id(), "stale server connection closed");
            return;
        }

        self.state
            .update_link(Link::Server, ConnectionState::Offline, "Disconnected");
        self.state.warn("Server", "Disconnected");

        if self.is_live() && self.bot.is_some() {
            self.state.info("Server", "Reconnecting to server after fault");
            tokio::spawn(Arc::clone(self).ensure_server_connected());
        }
    }
}

/// Reads instructions from the server until it goes away or the run ends.
///
/// Exiting on cancellation leaves the socket open: `stop()` still needs it
/// to send the final `leave-room-resp`.
async fn server_loop(
    shared: Arc<Shared>,
    conn: Arc<OutboundConnection>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => return,
            received = conn.recv() => received,
        };

        match received {
            Ok(Some(frame)) => match frame.into_text() {
                Some(text) => shared.handle_server_message(&text).await,
                None => shared.state.warn("Server", "Ignoring non-UTF-8 frame from server"),
            },
            Ok(None) => break,
            Err(e) => {
                shared
                    .state
                    .error("Server", format!("Server connection fault: {e}"));
                break;
            }
        }
    }
    shared.on_server_disconnected(&conn).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_link_has_no_connection() {
        let link = ServerLink::new();
        assert!(link.open_connection().is_none());
    }
}
