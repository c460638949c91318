//! Process records for the membership table.
//!
//! A process is identified by the integer id the leader assigned it at join
//! time. Ids are never reused; zero means "not yet assigned".

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Process identifier assigned by the group leader.
pub type ProcessId = u64;

/// Status of a process in the membership table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberStatus {
    /// Process is believed to be alive
    Alive,
    /// Process missed acknowledgements and awaits corroboration
    Suspect,
    /// Process confirmed failed
    Failed,
    /// Process announced its own departure
    Departed,
}

impl MemberStatus {
    /// Failed and departed records are immutable and never pinged.
    pub fn is_gone(&self) -> bool {
        matches!(self, MemberStatus::Failed | MemberStatus::Departed)
    }

    /// Alive or suspect.
    pub fn is_active(&self) -> bool {
        !self.is_gone()
    }
}

impl Display for MemberStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemberStatus::Alive => "ALIVE",
            MemberStatus::Suspect => "SUSPECT",
            MemberStatus::Failed => "FAILED",
            MemberStatus::Departed => "DEPARTED",
        };
        f.write_str(s)
    }
}

/// A process record.
///
/// `status_count` is a round counter whose meaning depends on `status`:
/// consecutive successful pings while alive, accumulated suspicion while
/// suspect, and dissemination rounds once failed or departed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: ProcessId,
    pub address: String,
    pub status: MemberStatus,
    pub status_count: u64,
    pub incarnation: u64,
}

impl Member {
    /// Create an alive record with a status count of one.
    pub fn alive(id: ProcessId, address: impl Into<String>, incarnation: u64) -> Self {
        Self {
            id,
            address: address.into(),
            status: MemberStatus::Alive,
            status_count: 1,
            incarnation,
        }
    }

    /// Builder-style status override.
    pub fn with_status(mut self, status: MemberStatus, status_count: u64) -> Self {
        self.status = status;
        self.status_count = status_count;
        self
    }
}

/// The current group leader.
///
/// Persisted externally through a [`LeaderStore`](crate::leader::LeaderStore)
/// and cached locally by the command loop. A zero id means no leader is known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderRecord {
    pub id: ProcessId,
    pub address: String,
}

impl LeaderRecord {
    pub fn new(id: ProcessId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }

    /// True when no leader id and no address are recorded.
    pub fn is_empty(&self) -> bool {
        self.id == 0 || self.address.is_empty()
    }
}

impl Display for LeaderRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.address)
    }
}
