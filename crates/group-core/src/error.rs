//! Error types for group membership.

use crate::member::ProcessId;
use crate::message::ProtocolErrorCode;
use thiserror::Error;

/// Errors produced by the membership core.
#[derive(Debug, Error)]
pub enum GroupError {
    /// A record was inserted with incarnation zero.
    #[error("Process {0} inserted with incarnation number 0")]
    ZeroIncarnation(ProcessId),

    /// A record was inserted under id zero.
    #[error("Process record inserted without an id")]
    MissingId,

    /// `add_without_id` was handed a record that already carries an id.
    #[error("Id allocation requested for a record that already has id {0}")]
    IdAlreadyAssigned(ProcessId),

    #[error("Failed to encode message: {0}")]
    Encode(#[source] bincode::Error),

    #[error("Failed to decode message: {0}")]
    Decode(#[source] bincode::Error),

    /// Message exceeds the accepted frame size.
    #[error("Message of {0} bytes exceeds limit")]
    MessageTooLarge(usize),

    #[error("Leader store error: {0}")]
    LeaderStore(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The configured own address is not `ipv4:port`.
    #[error("Supplied IPv4 address:port combination is illegal - got: {0}")]
    InvalidAddress(String),

    /// The command loop task has stopped.
    #[error("Command loop is not running")]
    CommandLoopClosed,
}

/// Result type for group operations.
pub type Result<T> = std::result::Result<T, GroupError>;

/// A failed attempt to join the group through the believed leader.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("join error code: {code} join error text: {message}")]
pub struct JoinError {
    pub code: ProtocolErrorCode,
    pub message: String,
}

impl JoinError {
    pub fn new(code: ProtocolErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Join errors that are worth retrying after a short random backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.code,
            ProtocolErrorCode::JoinNoContact | ProtocolErrorCode::JoinNotLeader
        )
    }
}
