//! Error taxonomy for command decoding and command application

use crate::command::CommandType;
use thiserror::Error;

/// Failures while turning a byte buffer into a command (or back)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Buffer too short: need {need} bytes, have {have}")]
    BufferTooShort { need: usize, have: usize },

    #[error("Unknown command type tag: {0}")]
    UnknownCommandType(u8),

    #[error("Invalid {field} byte: {value}")]
    InvalidField { field: &'static str, value: u8 },

    #[error("Header declares {header:?} but payload is {payload:?}")]
    TypeMismatch {
        header: CommandType,
        payload: CommandType,
    },

    #[error("Payload encoding failed: {0}")]
    Payload(String),
}

impl CodecError {
    /// Unknown tags mean the peer speaks a different protocol and the
    /// session cannot continue; everything else is a single bad buffer.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CodecError::UnknownCommandType(_))
    }
}

impl From<bincode::Error> for CodecError {
    fn from(e: bincode::Error) -> Self {
        CodecError::Payload(e.to_string())
    }
}

/// How the tick loop reacts to a failed command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Command refused at admission or by a gate; nothing was applied
    Rejected,
    /// Command started but referenced data was missing; its effect is dropped
    Aborted,
    /// The connection's session must be terminated
    Fatal,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("Protocol violation from connection {connection_id}: {reason}")]
    ProtocolViolation { connection_id: u32, reason: String },

    #[error("Item not found in slot {slot}")]
    MissingItem { slot: usize },

    #[error("No {table} config with id {id}")]
    MissingConfig { table: &'static str, id: u32 },

    #[error("Inventory full, cannot add item {item_id}")]
    InventoryFull { item_id: u32 },

    #[error("Player for connection {0} not found")]
    MissingPlayer(u32),

    #[error("Command rejected: {0}")]
    Rejected(String),

    #[error("Stale command for tick {tick}, already applied up to {applied}")]
    StaleTick { tick: u32, applied: u32 },

    #[error("Corrupt tick ordering: command tick {tick}, simulation tick {current}")]
    TickOrdering { tick: u32, current: u32 },

    #[error("Unknown command type: {0}")]
    UnknownCommandType(u8),

    #[error("Follow-up cascade exceeded {0} levels")]
    CascadeOverflow(usize),
}

impl CommandError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            CommandError::ProtocolViolation { .. }
            | CommandError::Rejected(_)
            | CommandError::StaleTick { .. } => ErrorSeverity::Rejected,
            CommandError::MissingItem { .. }
            | CommandError::MissingConfig { .. }
            | CommandError::InventoryFull { .. }
            | CommandError::MissingPlayer(_)
            | CommandError::CascadeOverflow(_) => ErrorSeverity::Aborted,
            CommandError::TickOrdering { .. } | CommandError::UnknownCommandType(_) => {
                ErrorSeverity::Fatal
            }
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        CommandError::Rejected(reason.into())
    }
}

impl From<CodecError> for CommandError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::UnknownCommandType(tag) => CommandError::UnknownCommandType(tag),
            other => CommandError::ProtocolViolation {
                connection_id: 0,
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_classification() {
        assert_eq!(
            CommandError::rejected("stunned").severity(),
            ErrorSeverity::Rejected
        );
        assert_eq!(
            CommandError::MissingItem { slot: 3 }.severity(),
            ErrorSeverity::Aborted
        );
        assert_eq!(
            CommandError::TickOrdering { tick: 1, current: 900 }.severity(),
            ErrorSeverity::Fatal
        );
    }

    #[test]
    fn test_unknown_tag_is_fatal() {
        let codec = CodecError::UnknownCommandType(250);
        assert!(codec.is_fatal());
        let command: CommandError = codec.into();
        assert_eq!(command.severity(), ErrorSeverity::Fatal);
    }

    #[test]
    fn test_truncated_buffer_not_fatal() {
        let codec = CodecError::BufferTooShort { need: 11, have: 4 };
        assert!(!codec.is_fatal());
        let command: CommandError = codec.into();
        assert_eq!(command.severity(), ErrorSeverity::Rejected);
    }
}
