//! Error taxonomy.
//!
//! None of these are process-fatal. Decode errors drop a single message;
//! transport errors end a single connection.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Payload was not a well-formed message of a known kind.
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    /// Well-formed envelope carrying a kind this build does not understand.
    #[error("unsupported message kind `{0}`")]
    UnsupportedMessageKind(String),
    /// Transport closed, cleanly or not.
    #[error("connection lost")]
    ConnectionLost,
    /// Outbound delivery to one connection failed.
    #[error("send failure: {0}")]
    SendFailure(String),
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether the connection that produced this error must be torn down.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionLost | SyncError::FrameTooLarge { .. } | SyncError::Io(_)
        )
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
