//! Protocol message envelope.
//!
//! Every protocol exchange carries one [`GroupMessage`], bincode-encoded, in a
//! single binary WebSocket frame. The message kind determines which fields are
//! meaningful; everything else stays at its default.

use crate::error::{GroupError, Result};
use crate::member::{Member, MemberStatus, ProcessId};
use crate::omap::MembershipTable;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Upper bound for an encoded protocol message or cache delta (1MB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

pub const PING_PATH: &str = "/ping";
pub const JOIN_PATH: &str = "/join";
pub const DEPARTING_PATH: &str = "/departing";
pub const COORDINATOR_PATH: &str = "/coordinator";

/// Protocol message kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    #[default]
    Ping,
    Ack,
    Join,
    /// Deprecated: remove the target process outright.
    Failure,
    Coordinator,
    Departing,
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageKind::Ping => "PING",
            MessageKind::Ack => "ACK",
            MessageKind::Join => "JOIN",
            MessageKind::Failure => "FAILURE",
            MessageKind::Coordinator => "COORDINATOR",
            MessageKind::Departing => "DEPARTING",
        };
        f.write_str(s)
    }
}

/// Error codes carried in the message envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolErrorCode {
    JoinNoContact,
    JoinAddrInUse,
    JoinNotLeader,
    JoinUnknownErr,
    PingIncorrectReceiver,
    MemberMapFlushFailed,
}

impl Display for ProtocolErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProtocolErrorCode::JoinNoContact => "errJoinNoContact",
            ProtocolErrorCode::JoinAddrInUse => "errJoinAddrInUse",
            ProtocolErrorCode::JoinNotLeader => "errJoinNotLeader",
            ProtocolErrorCode::JoinUnknownErr => "errJoinUnknownErr",
            ProtocolErrorCode::PingIncorrectReceiver => "errPingIncorrectReceiver",
            ProtocolErrorCode::MemberMapFlushFailed => "errMemberMapFlushFailed",
        };
        f.write_str(s)
    }
}

/// The wire envelope exchanged between group members.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupMessage {
    pub kind: MessageKind,

    pub src_id: ProcessId,
    pub src_address: String,
    pub src_incarnation: u64,
    pub src_status: Option<MemberStatus>,
    pub src_status_count: u64,

    pub target_id: ProcessId,
    pub target_address: String,
    pub target_incarnation: u64,
    pub target_status: Option<MemberStatus>,
    pub target_status_count: u64,
    pub target_path: String,

    /// Process an election or coordinator announcement is about
    pub subject_id: ProcessId,
    pub subject_address: String,

    /// Deep copy of the sender's membership table
    pub snapshot: Option<MembershipTable>,

    pub expect_response: bool,
    pub in_election: bool,
    pub error_code: Option<ProtocolErrorCode>,

    /// Opaque payload, decoded according to `kind`
    pub value: Vec<u8>,
}

impl GroupMessage {
    /// An empty message of the given kind.
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    /// Set the source fields from the sending process.
    pub fn from_source(mut self, id: ProcessId, address: &str, incarnation: u64) -> Self {
        self.src_id = id;
        self.src_address = address.to_string();
        self.src_incarnation = incarnation;
        self
    }

    /// Set the target fields from a membership record.
    pub fn to_target(mut self, target: &Member) -> Self {
        self.target_id = target.id;
        self.target_address = target.address.clone();
        self.target_incarnation = target.incarnation;
        self.target_status = Some(target.status);
        self.target_status_count = target.status_count;
        self
    }

    /// The target as a membership record, as far as the message describes it.
    pub fn target_member(&self) -> Member {
        Member {
            id: self.target_id,
            address: self.target_address.clone(),
            status: self.target_status.unwrap_or(MemberStatus::Alive),
            status_count: self.target_status_count,
            incarnation: self.target_incarnation,
        }
    }

    /// The source as a membership record, as far as the message describes it.
    pub fn src_member(&self) -> Member {
        Member {
            id: self.src_id,
            address: self.src_address.clone(),
            status: self.src_status.unwrap_or(MemberStatus::Alive),
            status_count: self.src_status_count,
            incarnation: self.src_incarnation,
        }
    }

    /// Encode for transmission.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(GroupError::Encode)
    }

    /// Decode a received frame.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        decode_bounded(bytes)
    }
}

/// Decode any bincode payload, rejecting frames above [`MAX_MESSAGE_SIZE`].
pub fn decode_bounded<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(GroupError::MessageTooLarge(bytes.len()));
    }
    bincode::deserialize(bytes).map_err(GroupError::Decode)
}

/// Encode any serializable payload with the wire codec.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(GroupError::Encode)
}
