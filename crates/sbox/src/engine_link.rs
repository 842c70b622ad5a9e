//! Engine link: one outbound connection to a game engine per room session.
//!
//! The engine is joined on the server's `join-room` instruction and left on
//! `leave-room`, on engine disconnect, on a switch to another engine, and on
//! `stop()`. While joined, every engine frame is relayed to the bot.

use std::sync::Arc;

use chrono::Utc;
use sbox_protocol::{
    Codec, JoinRoomPayload, LeaveRoomResponsePayload, MessageKind,
    RegistrationRequest, is_registration_accepted,
};
use sbox_state::{ConnectionState, Link, SessionInfo};
use sbox_transport::{Connection, OutboundConnection, TransportError};
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::relay::{self, Direction};
use crate::runtime::Shared;
use crate::SboxError;

/// A joined engine: the socket, the scope its receive loop runs in, and the
/// room it belongs to.
pub(crate) struct EngineSession {
    conn: Arc<OutboundConnection>,
    scope: CancellationToken,
    room_name: String,
    game_name: String,
}

impl Shared {
    /// The current engine socket, if any.
    pub(crate) fn engine_connection(&self) -> Option<Arc<OutboundConnection>> {
        self.engine.map(|session| Arc::clone(&session.conn))
    }

    /// Leaves any current engine, then connects and registers with the one
    /// named in `payload`. Returns whether the room was joined.
    pub(crate) async fn start_engine(self: &Arc<Self>, payload: &JoinRoomPayload) -> bool {
        let Some(run) = self.live_run() else {
            self.state.warn("Engine", "Runtime not running, ignoring join-room");
            return false;
        };

        self.stop_engine("Switching engine", false, None).await;

        let address = payload.engine_address();
        self.state.update_link(
            Link::Engine,
            ConnectionState::Connecting,
            format!("Connecting to {address}"),
        );
        self.state.update_session(SessionInfo {
            room_name: payload.room_name.clone(),
            game_name: payload.game_name.clone(),
            engine_address: address.clone(),
            joined_at: None,
        });

        let connected = tokio::select! {
            _ = run.cancel.cancelled() => return false,
            connected = self.connect_engine(payload, &run.config) => connected,
        };
        let conn = match connected {
            Ok(conn) => conn,
            Err(e @ SboxError::Connect { .. }) => {
                let detail = e.connect_detail();
                self.state
                    .update_link(Link::Engine, ConnectionState::Error, detail.clone());
                self.state.error("Engine", detail);
                return false;
            }
            Err(e) => {
                self.state.update_link(
                    Link::Engine,
                    ConnectionState::Error,
                    "Registration failed",
                );
                self.state
                    .error("Engine", format!("Registration with {address} failed: {e}"));
                return false;
            }
        };

        let session = Arc::new(EngineSession {
            conn,
            scope: run.cancel.child_token(),
            room_name: payload.room_name.clone(),
            game_name: payload.game_name.clone(),
        });
        if let Some(previous) = self.engine.replace(Arc::clone(&session)) {
            previous.scope.cancel();
            previous.conn.close().await;
        }
        // A stop that ran while we were connecting found an empty slot.
        if run.cancel.is_cancelled() {
            if let Some(orphan) = self.engine.take_if_same(&session) {
                orphan.conn.close().await;
            }
            return false;
        }

        self.state.update_link(
            Link::Engine,
            ConnectionState::Online,
            format!("Joined {}", session.room_name),
        );
        self.state.update_session(SessionInfo {
            room_name: session.room_name.clone(),
            game_name: session.game_name.clone(),
            engine_address: address,
            joined_at: Some(Utc::now()),
        });
        self.state
            .info("Engine", format!("Joined {}", session.room_name));

        tokio::spawn(engine_loop(Arc::clone(self), session));
        true
    }

    async fn connect_engine(
        &self,
        payload: &JoinRoomPayload,
        config: &RelayConfig,
    ) -> Result<Arc<OutboundConnection>, SboxError> {
        let conn = OutboundConnection::connect(&payload.engine_url())
            .await
            .map_err(|source| SboxError::Connect {
                addr: payload.engine_address(),
                source,
            })?;

        let request = RegistrationRequest::new(
            config.team_id.as_str(),
            config.api_key.as_str(),
            config.player_email.as_str(),
        );
        if let Err(e) = self.register_with_engine(&conn, &request).await {
            conn.close().await;
            return Err(e);
        }
        Ok(Arc::new(conn))
    }

    /// Sends the registration and reads exactly one reply.
    async fn register_with_engine(
        &self,
        conn: &OutboundConnection,
        request: &RegistrationRequest,
    ) -> Result<(), SboxError> {
        conn.send_text(self.codec.encode(request)?).await?;

        let Some(frame) = conn.recv().await? else {
            return Err(SboxError::Registration(
                "engine closed before acknowledging".into(),
            ));
        };
        let reply = frame.into_text().unwrap_or_default();
        if is_registration_accepted(&reply) {
            Ok(())
        } else {
            Err(SboxError::Registration(format!("engine replied {reply}")))
        }
    }

    /// Leaves the current engine, if any.
    ///
    /// The room reported to the server is `room_hint`, else the joined
    /// engine's room, else the session's room. With `notify_server` a
    /// `leave-room-resp` is sent when a room is known.
    pub(crate) async fn stop_engine(
        &self,
        reason: &str,
        notify_server: bool,
        room_hint: Option<&str>,
    ) {
        self.teardown_engine(reason, notify_server, room_hint, None)
            .await;
    }

    async fn teardown_engine(
        &self,
        reason: &str,
        notify_server: bool,
        room_hint: Option<&str>,
        only: Option<&Arc<EngineSession>>,
    ) {
        let room = room_hint
            .map(str::trim)
            .filter(|room| !room.is_empty())
            .map(str::to_string)
            .or_else(|| self.engine.map(|session| session.room_name.clone()))
            .or_else(|| self.state.session().active_room().map(str::to_string));

        let session = match only {
            Some(expected) => match self.engine.take_if_same(expected) {
                Some(session) => Some(session),
                None => return,
            },
            None => self.engine.take(),
        };

        self.state.info(
            "Engine",
            format!(
                "Stopping engine (reason: {reason}, notify server: {notify_server}, room: {})",
                room.as_deref().unwrap_or("--")
            ),
        );

        if let Some(session) = session {
            session.scope.cancel();
            session.conn.close().await;
            tracing::debug!(
                room = %session.room_name,
                game = %session.game_name,
                "engine session closed"
            );
        }
        self.state
            .update_link(Link::Engine, ConnectionState::Offline, reason);
        self.state.reset_session();

        if !notify_server {
            return;
        }
        let Some(room) = room else {
            self.state.warn(
                "Engine",
                "Unable to send leave response because room name is unknown.",
            );
            return;
        };
        let response = LeaveRoomResponsePayload {
            room_name: room,
            left: true,
            comment: reason.to_string(),
        };
        self.send_to_server(MessageKind::LeaveRoomResp, &response)
            .await;
    }
}

/// Relays engine frames to the bot until the engine goes away or the
/// session's scope is cancelled.
async fn engine_loop(shared: Arc<Shared>, session: Arc<EngineSession>) {
    loop {
        let received = tokio::select! {
            _ = session.scope.cancelled() => return,
            received = session.conn.recv() => received,
        };

        match received {
            Ok(Some(frame)) => {
                let bot = shared.bot.get();
                relay::forward(&shared.state, Direction::EngineToBot, bot, frame)
                    .await;
            }
            Ok(None) => {
                shared.state.info("Engine", "Engine closed the connection");
                break;
            }
            Err(TransportError::ProtocolViolation(detail)) => {
                shared
                    .state
                    .warn("Engine", format!("Engine protocol violation: {detail}"));
                break;
            }
            Err(e) => {
                shared
                    .state
                    .error("Engine", format!("Engine connection fault: {e}"));
                break;
            }
        }
    }

    shared
        .teardown_engine("Engine disconnected", true, None, Some(&session))
        .await;
}
