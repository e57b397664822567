use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a room refused an action. Codes cross the wire inside `error`
/// payloads, so the serialized form is part of the protocol.
///
/// Only create and join carry a reply channel; refusals of one-way
/// messages such as start and reset are logged by the room and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoomError {
    #[error("room not found")]
    NotFound,
    #[error("only the host can do that")]
    Forbidden,
    #[error("room is full")]
    RoomFull,
    #[error("not allowed in the current phase")]
    WrongPhase,
    #[error("not enough players")]
    BelowMinimum,
    #[error("invalid input")]
    InvalidInput,
}
