//! Value types held by the state store.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::Level;

/// Placeholder shown for every session field when no session is active.
pub const NO_SESSION: &str = "--";

/// How far a connection has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Offline,
    Starting,
    Connecting,
    Online,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Offline => "offline",
            Self::Starting => "starting",
            Self::Connecting => "connecting",
            Self::Online => "online",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// The three connections the relay owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Link {
    Bot,
    Server,
    Engine,
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bot => "Bot",
            Self::Server => "Server",
            Self::Engine => "Engine",
        };
        f.write_str(name)
    }
}

/// State plus the detail text shown next to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStatus {
    pub state: ConnectionState,
    pub detail: String,
}

impl LinkStatus {
    pub fn new(state: ConnectionState, detail: impl Into<String>) -> Self {
        Self {
            state,
            detail: detail.into(),
        }
    }
}

/// The room the relay is currently playing in.
///
/// `joined_at` stays `None` while the engine link is still connecting and
/// is set once the engine accepts registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub room_name: String,
    pub game_name: String,
    pub engine_address: String,
    pub joined_at: Option<DateTime<Utc>>,
}

impl SessionInfo {
    /// The "no active session" sentinel: `{"--","--","--",None}`.
    pub fn none() -> Self {
        Self {
            room_name: NO_SESSION.to_string(),
            game_name: NO_SESSION.to_string(),
            engine_address: NO_SESSION.to_string(),
            joined_at: None,
        }
    }

    /// Returns `true` for the sentinel value.
    pub fn is_none(&self) -> bool {
        *self == Self::none()
    }

    /// The room name, unless this is the sentinel or the name is blank.
    pub fn active_room(&self) -> Option<&str> {
        let room = self.room_name.trim();
        (!room.is_empty() && room != NO_SESSION).then_some(room)
    }
}

impl Default for SessionInfo {
    fn default() -> Self {
        Self::none()
    }
}

/// One line of the in-memory activity log. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    /// Which part of the relay wrote it: `Runtime`, `Bot`, `Server`, `Engine`.
    pub source: String,
    pub message: String,
}

impl LogEntry {
    /// Local-time timestamp in `yyyy-mm-dd HH:MM:SS.mmm` form.
    pub fn formatted_timestamp(&self) -> String {
        self.timestamp
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S%.3f")
            .to_string()
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:>5} [{}] {}",
            self.formatted_timestamp(),
            self.level,
            self.source,
            self.message
        )
    }
}

/// Immutable copy of everything the store holds, for observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSnapshot {
    pub running: bool,
    pub bot: LinkStatus,
    pub server: LinkStatus,
    pub engine: LinkStatus,
    pub team_id: String,
    pub team_name: String,
    pub session: SessionInfo,
    pub logs: Arc<[LogEntry]>,
}

impl RuntimeSnapshot {
    /// The snapshot of a relay that has never been started.
    pub fn empty() -> Self {
        Self {
            running: false,
            bot: LinkStatus::new(ConnectionState::Offline, "Bot not connected"),
            server: LinkStatus::new(
                ConnectionState::Offline,
                "Server not connected",
            ),
            engine: LinkStatus::new(
                ConnectionState::Offline,
                "Waiting for instructions",
            ),
            team_id: String::new(),
            team_name: String::new(),
            session: SessionInfo::none(),
            logs: Arc::from(Vec::new()),
        }
    }

    /// Status of one link.
    pub fn link(&self, link: Link) -> &LinkStatus {
        match link {
            Link::Bot => &self.bot,
            Link::Server => &self.server,
            Link::Engine => &self.engine,
        }
    }
}

impl Default for RuntimeSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_sentinel() {
        let session = SessionInfo::none();
        assert_eq!(session.room_name, "--");
        assert_eq!(session.game_name, "--");
        assert_eq!(session.engine_address, "--");
        assert!(session.joined_at.is_none());
        assert!(session.is_none());
        assert_eq!(session.active_room(), None);
    }

    #[test]
    fn test_active_room_ignores_blank_names() {
        let session = SessionInfo {
            room_name: "  ".into(),
            ..SessionInfo::none()
        };
        assert_eq!(session.active_room(), None);

        let session = SessionInfo {
            room_name: "arena".into(),
            game_name: "chess".into(),
            engine_address: "10.0.0.1:9000".into(),
            joined_at: None,
        };
        assert_eq!(session.active_room(), Some("arena"));
        assert!(!session.is_none());
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = RuntimeSnapshot::empty();
        assert!(!snapshot.running);
        assert_eq!(snapshot.link(Link::Bot).state, ConnectionState::Offline);
        assert_eq!(snapshot.engine.detail, "Waiting for instructions");
        assert!(snapshot.logs.is_empty());
    }

    #[test]
    fn test_log_entry_display_contains_source_and_message() {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level: Level::WARN,
            source: "Bot".into(),
            message: "Bot disconnected".into(),
        };
        let line = entry.to_string();
        assert!(line.contains("[Bot] Bot disconnected"));
        assert!(line.contains("WARN"));
    }
}
