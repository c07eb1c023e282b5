//! Error types for the wire codec and battle state machine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("frame contained a line with no ':' separator: {0:?}")]
    Malformed(String),

    #[error("frame is missing required field `message_type`")]
    MissingMessageType,

    #[error("unrecognized message_type: {0:?}")]
    UnknownMessageKind(String),

    #[error("frame of kind {kind} is missing required field `{field}`")]
    MissingField { kind: &'static str, field: &'static str },

    #[error("field `{field}` could not be parsed as {expected}: {value:?}")]
    InvalidField { field: &'static str, expected: &'static str, value: String },

    #[error("nested JSON in field `{field}` is invalid: {source}")]
    InvalidJson { field: &'static str, #[source] source: serde_json::Error },
}

#[derive(Error, Debug)]
pub enum BattleError {
    #[error("cannot attack: it is not this peer's turn or a turn is already in progress")]
    CannotAttack,

    #[error("received an attack announce while it is this peer's own turn")]
    UnexpectedAnnounce,

    #[error("battle has not been set up yet")]
    NotSetUp,

    #[error("unknown combatant name: {0:?}")]
    UnknownCombatant(String),
}
