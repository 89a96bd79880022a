//! Error types for the privileged command channel.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("privileged channel is not bound")]
    Unavailable,

    #[error("privileged command failed: {0}")]
    CommandFailed(String),

    #[error("bridge io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bridge worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
