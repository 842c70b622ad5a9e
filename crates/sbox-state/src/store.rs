//! The shared state store.
//!
//! # Concurrency note
//!
//! Every field lives behind one coarse `std::sync::Mutex`. Critical sections
//! are a handful of assignments and never await, so a blocking mutex is
//! cheaper than an async one here. Observers are told about changes through
//! a `broadcast` channel; sending never blocks, and a subscriber that falls
//! behind only sees `RecvError::Lagged`, it never slows the relay down.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::Level;

use crate::{
    ConnectionState, Link, LinkStatus, LogEntry, RuntimeSnapshot, SessionInfo,
};

/// Maximum number of log entries kept. Oldest entries are evicted first.
pub const LOG_CAPACITY: usize = 500;

/// Buffer size of the change-notification channel.
const CHANGE_CHANNEL_SIZE: usize = 1024;

/// A change published to subscribers, carrying the new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    Running(bool),
    Link {
        link: Link,
        state: ConnectionState,
        detail: String,
    },
    TeamProfile,
    Session(SessionInfo),
    Log(LogEntry),
    LogsCleared,
}

struct Inner {
    running: bool,
    bot: LinkStatus,
    server: LinkStatus,
    engine: LinkStatus,
    team_id: String,
    team_name: String,
    session: SessionInfo,
    logs: VecDeque<LogEntry>,
}

impl Inner {
    fn link_mut(&mut self, link: Link) -> &mut LinkStatus {
        match link {
            Link::Bot => &mut self.bot,
            Link::Server => &mut self.server,
            Link::Engine => &mut self.engine,
        }
    }
}

/// Thread-safe holder of connection states, session info, and the log ring.
pub struct StateStore {
    inner: Mutex<Inner>,
    changes: broadcast::Sender<StateChange>,
}

impl StateStore {
    /// Creates a store in the "never started" state.
    pub fn new() -> Self {
        let empty = RuntimeSnapshot::empty();
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_SIZE);
        Self {
            inner: Mutex::new(Inner {
                running: empty.running,
                bot: empty.bot,
                server: empty.server,
                engine: empty.engine,
                team_id: empty.team_id,
                team_name: empty.team_name,
                session: empty.session,
                logs: VecDeque::with_capacity(LOG_CAPACITY),
            }),
            changes,
        }
    }

    /// Subscribes to change notifications.
    ///
    /// Only changes made after this call are delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    /// Returns a value copy of the whole store.
    pub fn snapshot(&self) -> RuntimeSnapshot {
        let inner = self.lock();
        RuntimeSnapshot {
            running: inner.running,
            bot: inner.bot.clone(),
            server: inner.server.clone(),
            engine: inner.engine.clone(),
            team_id: inner.team_id.clone(),
            team_name: inner.team_name.clone(),
            session: inner.session.clone(),
            logs: inner.logs.iter().cloned().collect::<Vec<_>>().into(),
        }
    }

    pub fn set_running(&self, running: bool) {
        self.lock().running = running;
        self.notify(StateChange::Running(running));
    }

    /// Sets the state and detail text of one link.
    pub fn update_link(
        &self,
        link: Link,
        state: ConnectionState,
        detail: impl Into<String>,
    ) {
        let detail = detail.into();
        *self.lock().link_mut(link) = LinkStatus::new(state, detail.clone());
        self.notify(StateChange::Link {
            link,
            state,
            detail,
        });
    }

    /// Current status of one link.
    pub fn link(&self, link: Link) -> LinkStatus {
        self.lock().link_mut(link).clone()
    }

    pub fn update_team_profile(
        &self,
        team_id: impl Into<String>,
        team_name: impl Into<String>,
    ) {
        {
            let mut inner = self.lock();
            inner.team_id = team_id.into();
            inner.team_name = team_name.into();
        }
        self.notify(StateChange::TeamProfile);
    }

    pub fn update_session(&self, session: SessionInfo) {
        self.lock().session = session.clone();
        self.notify(StateChange::Session(session));
    }

    /// Puts the session back to the "no active session" sentinel.
    pub fn reset_session(&self) {
        self.update_session(SessionInfo::none());
    }

    pub fn session(&self) -> SessionInfo {
        self.lock().session.clone()
    }

    /// Appends a log entry, evicting the oldest once the ring is full.
    ///
    /// The entry is also emitted as a `tracing` event at the same level.
    pub fn log(&self, level: Level, source: &str, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            source: source.to_string(),
            message: message.into(),
        };
        emit(&entry);

        {
            let mut inner = self.lock();
            if inner.logs.len() == LOG_CAPACITY {
                inner.logs.pop_front();
            }
            inner.logs.push_back(entry.clone());
        }
        self.notify(StateChange::Log(entry));
    }

    pub fn info(&self, source: &str, message: impl Into<String>) {
        self.log(Level::INFO, source, message);
    }

    pub fn warn(&self, source: &str, message: impl Into<String>) {
        self.log(Level::WARN, source, message);
    }

    pub fn error(&self, source: &str, message: impl Into<String>) {
        self.log(Level::ERROR, source, message);
    }

    pub fn clear_logs(&self) {
        self.lock().logs.clear();
        self.notify(StateChange::LogsCleared);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock can only leave a half-written
        // field; the store stays usable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, change: StateChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle to a [`StateStore`].
pub type SharedState = Arc<StateStore>;

fn emit(entry: &LogEntry) {
    let source = entry.source.as_str();
    let message = entry.message.as_str();
    if entry.level == Level::ERROR {
        tracing::error!(source, "{message}");
    } else if entry.level == Level::WARN {
        tracing::warn!(source, "{message}");
    } else if entry.level == Level::INFO {
        tracing::info!(source, "{message}");
    } else if entry.level == Level::DEBUG {
        tracing::debug!(source, "{message}");
    } else {
        tracing::trace!(source, "{message}");
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Collects formatted tracing output in memory.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_log_entry_is_emitted_once_as_tracing_event() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let store = StateStore::new();
        tracing::subscriber::with_default(subscriber, || {
            store.warn("Bot", "Bot disconnected");
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert_eq!(output.matches("Bot disconnected").count(), 1);
        assert!(output.contains("WARN"));
        assert!(output.contains("source=\"Bot\""));
    }

    #[test]
    fn test_log_ring_evicts_oldest_first() {
        let store = StateStore::new();
        for n in 1..=501 {
            store.info("Test", format!("entry {n}"));
        }

        let logs = store.snapshot().logs;
        assert_eq!(logs.len(), LOG_CAPACITY);
        assert!(logs.iter().all(|entry| entry.message != "entry 1"));
        for (index, entry) in logs.iter().enumerate() {
            assert_eq!(entry.message, format!("entry {}", index + 2));
        }
    }

    #[test]
    fn test_log_ring_never_exceeds_capacity() {
        let store = StateStore::new();
        for n in 0..(LOG_CAPACITY * 3) {
            store.warn("Test", n.to_string());
            assert!(store.snapshot().logs.len() <= LOG_CAPACITY);
        }
    }

    #[test]
    fn test_update_link_and_read_back() {
        let store = StateStore::new();
        store.update_link(Link::Server, ConnectionState::Error, "Registration denied");

        let status = store.link(Link::Server);
        assert_eq!(status.state, ConnectionState::Error);
        assert_eq!(status.detail, "Registration denied");
        // Other links untouched.
        assert_eq!(store.link(Link::Bot).state, ConnectionState::Offline);
    }

    #[test]
    fn test_snapshot_is_a_value_copy() {
        let store = StateStore::new();
        store.info("Runtime", "first");
        let before = store.snapshot();

        store.info("Runtime", "second");
        store.set_running(true);

        assert_eq!(before.logs.len(), 1);
        assert!(!before.running);
        assert_eq!(store.snapshot().logs.len(), 2);
    }

    #[test]
    fn test_reset_session_restores_sentinel() {
        let store = StateStore::new();
        store.update_session(SessionInfo {
            room_name: "r1".into(),
            game_name: "chess".into(),
            engine_address: "127.0.0.1:9000".into(),
            joined_at: Some(Utc::now()),
        });
        assert_eq!(store.session().active_room(), Some("r1"));

        store.reset_session();
        assert!(store.session().is_none());
    }

    #[test]
    fn test_clear_logs() {
        let store = StateStore::new();
        store.error("Engine", "boom");
        store.clear_logs();
        assert!(store.snapshot().logs.is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_see_changes_in_order() {
        let store = StateStore::new();
        let mut changes = store.subscribe();

        store.update_link(Link::Engine, ConnectionState::Connecting, "Connecting");
        store.update_link(Link::Engine, ConnectionState::Online, "Joined r1");
        store.info("Engine", "Joined r1");

        let mut states = Vec::new();
        while let Ok(change) = changes.try_recv() {
            if let StateChange::Link { link: Link::Engine, state, .. } = change {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![ConnectionState::Connecting, ConnectionState::Online]
        );
    }

    #[test]
    fn test_notify_without_subscribers_does_not_fail() {
        let store = StateStore::new();
        store.set_running(true);
        assert!(store.snapshot().running);
    }
}
