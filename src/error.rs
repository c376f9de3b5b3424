// src/error.rs  —  Error kinds shared by queue, generator, keyer and receiver
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CwError {
    /// Tone queue is at capacity; wait for the level to drop and retry
    #[error("tone queue is full")]
    Full,

    #[error("tone queue is empty")]
    Empty,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no Morse representation for character {0:?}")]
    NoSuchCharacter(char),

    #[error("invalid Morse representation {0:?}")]
    InvalidRepresentation(String),

    /// Terminal for the generator; the tone queue itself stays usable
    #[error("sound sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("generator is already running")]
    AlreadyRunning,

    #[error("generator is not running")]
    NotRunning,

    /// Receiver has no complete event yet (also: noise spike filtered)
    #[error("operation would block")]
    WouldBlock,

    /// Receiver call does not fit its current state
    #[error("operation out of order")]
    OutOfOrder,

    #[error("timestamp is invalid")]
    TimestampInvalid,
}

pub type Result<T> = std::result::Result<T, CwError>;

impl CwError {
    pub(crate) fn invalid(what: impl Into<String>) -> Self {
        CwError::InvalidArgument(what.into())
    }
}
