//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while parsing a client frame.
///
/// Every variant is fatal for the connection that produced it.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("wrong argument count for {0}")]
    WrongArgumentCount(&'static str),

    #[error("empty nickname")]
    EmptyNickname,

    #[error("invalid direction {0:?}")]
    InvalidDirection(String),

    #[error("invalid room id {0:?}")]
    InvalidRoomId(String),
}
