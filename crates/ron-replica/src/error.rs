//! Error types for the replica layer.

use thiserror::Error;

/// Errors that can occur in replica operations. Protocol-level failures
/// (wrong session, causality violations) travel as error *ops* over the
/// wire; this type covers the host-side failures around them.
#[derive(Error, Debug, Clone)]
pub enum ReplicaError {
    #[error("db write error")]
    StoreWrite(String),

    #[error("db read error: {0}")]
    StoreRead(String),

    #[error("op pattern error")]
    BadOpPattern,

    #[error("no handshake")]
    NoHandshake,

    #[error("stream closed: {0}")]
    StreamClosed(String),

    #[error("unknown object: {0}")]
    UnknownObject(String),
}

pub type Result<T> = std::result::Result<T, ReplicaError>;
