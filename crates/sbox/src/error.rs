//! Unified error type for the SBOX relay.

use sbox_protocol::ProtocolError;
use sbox_transport::TransportError;

/// Top-level error that wraps the sub-crate errors and the relay's own
/// failure kinds.
///
/// Only [`SboxRuntime::start`](crate::SboxRuntime::start) hands one of these
/// to a caller. Everywhere else they are logged into the state store and
/// turned into a connection state.
#[derive(Debug, thiserror::Error)]
pub enum SboxError {
    /// The bot gateway could not listen on the configured address.
    #[error("unable to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: TransportError,
    },

    /// An outbound connection to the server or an engine failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: TransportError,
    },

    /// A peer rejected the relay's credentials.
    #[error("registration rejected: {0}")]
    Registration(String),

    /// The configuration snapshot is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A transport-level fault (send, recv, unexpected close).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// `start()` failed; the runtime was stopped and its state reset.
    #[error("failed to start: {0}")]
    Startup(#[source] Box<SboxError>),
}

impl SboxError {
    /// Detail text shown on a link whose outbound connect failed.
    pub(crate) fn connect_detail(&self) -> String {
        match self {
            SboxError::Connect { source, .. } => {
                format!("Failed to connect: {source}")
            }
            other => format!("Failed to connect: {other}"),
        }
    }
}
