//! `SboxRuntime`: the start/stop/restart orchestrator.
//!
//! This is the only public surface of the relay core. It owns the bot
//! gateway, the server link and the engine link, and ties them to one run
//! scope: a `CancellationToken` created by `start()` and cancelled by
//! `stop()`. Every listener task selects on that token (or on a child of
//! it), so stopping the run stops every loop.
//!
//! ```text
//! start ─► bind gateway ─► bot attaches ─► server registers
//!                                   │
//!                 join-room ─► engine registers ─► relay bot ↔ engine
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use sbox_protocol::JsonCodec;
use sbox_state::{
    ConnectionState, Link, RuntimeSnapshot, SharedState, StateChange,
    StateStore,
};
use sbox_transport::{Connection, InboundConnection};
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigSource, RelayConfig};
use crate::engine_link::EngineSession;
use crate::gateway::GatewayHandle;
use crate::relay::Slot;
use crate::server_link::ServerLink;
use crate::SboxError;

/// Detail shown on the server link until a bot attaches.
pub(crate) const WAITING_FOR_BOT: &str = "Waiting for bot before registering";

/// A boxed, `Send` future. Used where a task ends up spawning itself again
/// (recovery restarts, server reconnects), so the future type stays named.
pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Per-run context, created by `start()` and dropped by `stop()`.
#[derive(Clone)]
pub(crate) struct RunContext {
    pub(crate) config: Arc<RelayConfig>,
    pub(crate) cancel: CancellationToken,
}

/// Allows at most one bot-recovery restart in flight.
pub(crate) struct RecoveryGuard {
    in_flight: AtomicBool,
}

impl RecoveryGuard {
    fn new() -> Self {
        Self {
            in_flight: AtomicBool::new(false),
        }
    }

    /// Claims the guard. Returns `false` if a recovery is already running.
    pub(crate) fn try_begin(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn finish(&self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

/// State shared by the runtime handle and every task it spawns.
pub(crate) struct Shared {
    pub(crate) state: SharedState,
    pub(crate) codec: JsonCodec,
    config_source: Box<dyn ConfigSource>,
    /// Held for the whole of `start()` and of `stop()`.
    lifecycle: Mutex<()>,
    pub(crate) run: Slot<RunContext>,
    pub(crate) gateway: Slot<GatewayHandle>,
    pub(crate) bot: Slot<Arc<InboundConnection>>,
    pub(crate) server: ServerLink,
    pub(crate) engine: Slot<Arc<EngineSession>>,
    shutting_down: AtomicBool,
    pub(crate) recovery: RecoveryGuard,
    generation: AtomicU64,
}

impl Shared {
    /// Returns the current run unless it is being torn down.
    pub(crate) fn live_run(&self) -> Option<RunContext> {
        if self.shutting_down.load(Ordering::Acquire) {
            return None;
        }
        self.run.get().filter(|run| !run.cancel.is_cancelled())
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live_run().is_some()
    }

    pub(crate) async fn start(self: &Arc<Self>) -> Result<(), SboxError> {
        let _lifecycle = self.lifecycle.lock().await;

        if self.run.is_some() {
            self.state.info("Runtime", "SBOX runtime already active.");
            return Ok(());
        }

        match self.start_locked().await {
            Ok(()) => {
                let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                tracing::debug!(generation, "runtime started");
                Ok(())
            }
            Err(e) => {
                self.state.error("Runtime", format!("Failed to start: {e}"));
                self.stop_locked().await;
                Err(SboxError::Startup(Box::new(e)))
            }
        }
    }

    async fn start_locked(self: &Arc<Self>) -> Result<(), SboxError> {
        let config = self.config_source.snapshot();
        config.validate()?;
        let config = Arc::new(config);
        let cancel = CancellationToken::new();

        self.shutting_down.store(false, Ordering::Release);
        self.run.replace(RunContext {
            config: Arc::clone(&config),
            cancel: cancel.clone(),
        });

        let bot_addr = config.bot_addr();
        self.state.set_running(true);
        self.state
            .update_team_profile(config.team_id.clone(), config.player_email.clone());
        self.state.update_link(
            Link::Bot,
            ConnectionState::Starting,
            format!("Listening on {bot_addr}"),
        );
        self.state
            .update_link(Link::Server, ConnectionState::Offline, WAITING_FOR_BOT);
        self.state
            .update_link(Link::Engine, ConnectionState::Offline, "Not connected");
        self.state.info("Runtime", "SBOX starting");

        self.start_gateway(&bot_addr, cancel).await
    }

    pub(crate) async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.run.is_some() {
            return;
        }
        self.stop_locked().await;
    }

    /// Tears everything down in dependency order. Safe to call on a
    /// partially started runtime: every step tolerates an empty slot.
    async fn stop_locked(&self) {
        self.shutting_down.store(true, Ordering::Release);
        if let Some(run) = self.run.take() {
            run.cancel.cancel();
        }

        self.stop_engine("Runtime stopped", true, None).await;
        self.stop_server().await;
        self.disconnect_bot().await;
        self.stop_gateway().await;

        self.state.set_running(false);
        self.state.update_team_profile("", "");
        for link in [Link::Bot, Link::Server, Link::Engine] {
            self.state.update_link(link, ConnectionState::Offline, "Stopped");
        }
        self.state.reset_session();
        self.state.info("Runtime", "SBOX stopped");
    }

    /// `stop()` then `start()`. The two halves take the lifecycle lock
    /// separately.
    pub(crate) fn restart(self: Arc<Self>) -> BoxFuture<'static, Result<(), SboxError>> {
        Box::pin(async move {
            self.stop().await;
            self.start().await
        })
    }

    async fn disconnect_bot(&self) {
        if let Some(conn) = self.bot.take() {
            tracing::debug!(conn_id = %conn.id(), "closing bot connection");
            conn.close().await;
        }
    }
}

/// Handle to the relay. Cheap to clone; clones drive the same runtime.
#[derive(Clone)]
pub struct SboxRuntime {
    shared: Arc<Shared>,
}

impl SboxRuntime {
    /// Creates a stopped runtime that will read its configuration from
    /// `config` on every start.
    pub fn new(config: impl ConfigSource) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Arc::new(StateStore::new()),
                codec: JsonCodec,
                config_source: Box::new(config),
                lifecycle: Mutex::new(()),
                run: Slot::new(),
                gateway: Slot::new(),
                bot: Slot::new(),
                server: ServerLink::new(),
                engine: Slot::new(),
                shutting_down: AtomicBool::new(false),
                recovery: RecoveryGuard::new(),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Starts the relay: binds the bot gateway and waits for a bot.
    ///
    /// Does nothing (and logs a notice) if already running.
    ///
    /// # Errors
    /// [`SboxError::Startup`] wrapping the cause. The runtime has been
    /// stopped and its state reset by the time this returns.
    pub async fn start(&self) -> Result<(), SboxError> {
        self.shared.start().await
    }

    /// Stops the relay, telling the server about any room being left.
    /// Does nothing if not running.
    pub async fn stop(&self) {
        self.shared.stop().await;
    }

    /// Stops, then starts again with a fresh configuration snapshot.
    ///
    /// # Errors
    /// Same as [`start`](Self::start).
    pub async fn restart(&self) -> Result<(), SboxError> {
        Arc::clone(&self.shared).restart().await
    }

    /// Number of successful starts so far.
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.shared.run.is_some()
    }

    /// A value copy of the current state.
    pub fn snapshot(&self) -> RuntimeSnapshot {
        self.shared.state.snapshot()
    }

    /// Subscribes to state changes made from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.shared.state.subscribe()
    }

    /// The address the bot gateway is actually bound to, while running.
    pub fn gateway_addr(&self) -> Option<SocketAddr> {
        self.shared.gateway.map(GatewayHandle::addr)
    }

    pub fn state(&self) -> &SharedState {
        &self.shared.state
    }
}
