//! Runtime state for the SBOX relay.
//!
//! This crate holds what an observer needs to render the relay's condition:
//!
//! 1. **Connection states** — one [`ConnectionState`] plus detail text for
//!    each [`Link`] (bot, server, engine)
//! 2. **Session info** — the room currently being played ([`SessionInfo`]),
//!    or the `"--"` sentinel
//! 3. **Activity log** — a bounded ring of [`LogEntry`] values
//!
//! Everything is read through [`StateStore::snapshot`], which returns an
//! immutable [`RuntimeSnapshot`], and watched through
//! [`StateStore::subscribe`].
//!
//! # How it fits in the stack
//!
//! ```text
//! Runtime (above)  ← gateway, server link and engine link write here
//!     ↕
//! State (this crate)  ← no knowledge of sockets or wire formats
//! ```

mod store;
mod types;

pub use store::{LOG_CAPACITY, SharedState, StateChange, StateStore};
pub use types::{
    ConnectionState, Link, LinkStatus, LogEntry, NO_SESSION, RuntimeSnapshot,
    SessionInfo,
};
