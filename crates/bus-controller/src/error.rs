//! Controller error types.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    /// The listener could not bind.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: io::Error,
    },

    /// Socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An envelope could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A configuration value could not be parsed.
    #[error("Invalid value {value:?} for {key}")]
    InvalidConfig { key: &'static str, value: String },

    /// The handshake was refused.
    #[error("Handshake refused: {0}")]
    Handshake(String),

    /// The peer closed the connection.
    #[error("Connection closed")]
    ConnectionClosed,
}
