/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Binding the listening socket failed (port in use, bad host).
    #[error("bind failed: {0}")]
    BindFailed(#[source] std::io::Error),

    /// Accepting an inbound connection or its handshake failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// Opening an outbound connection failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The peer broke the WebSocket protocol, e.g. a server sending
    /// masked frames.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}
