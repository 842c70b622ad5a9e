//! # SBOX
//!
//! Bot gateway relay for networked game tournaments.
//!
//! SBOX sits between a locally attached bot, the coordination server, and
//! whichever game engine the server assigns. The bot connects to SBOX over
//! WebSocket; SBOX registers with the server on the bot's behalf, joins and
//! leaves engines when told to, and relays bot ↔ engine frames untouched.
//!
//! The only public surface is [`SboxRuntime`]: `start()`, `stop()`,
//! `restart()`, plus read access to the live state.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sbox::prelude::*;
//!
//! # async fn run() -> Result<(), SboxError> {
//! let runtime = SboxRuntime::new(RelayConfig {
//!     team_id: "17".into(),
//!     api_key: "secret".into(),
//!     player_email: "bot@example.org".into(),
//!     ..RelayConfig::default()
//! });
//! runtime.start().await?;
//! // ... the bot connects to ws://127.0.0.1:2025
//! runtime.stop().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod engine_link;
mod error;
mod gateway;
mod relay;
mod runtime;
mod server_link;

pub use config::{ConfigSource, RelayConfig};
pub use error::SboxError;
pub use runtime::SboxRuntime;

pub mod prelude {
    pub use crate::{ConfigSource, RelayConfig, SboxError, SboxRuntime};
    pub use sbox_state::{
        ConnectionState, Link, LogEntry, RuntimeSnapshot, SessionInfo,
        StateChange,
    };
}
