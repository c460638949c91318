//! group-core: membership, failure detection and leader election for a
//! group of cooperating servers.
//!
//! This crate provides:
//! - The ordered membership table with incarnation-based merge rules
//! - The protocol message envelope and its wire codec
//! - The command loop that serializes all state access
//! - Leader persistence and the dissemination caches

pub mod cache;
pub mod command;
pub mod config;
pub mod error;
pub mod leader;
pub mod member;
pub mod message;
pub mod omap;
pub mod state;

pub use cache::{
    ActiveUserDelta, AuthDelta, CacheDelta, CacheOp, Caches, GroupAuthDelta, UsrGroupDelta,
};
pub use command::{spawn_command_loop, Command, GroupHandle};
pub use config::{GroupConfig, JoinPolicy};
pub use error::{GroupError, JoinError, Result};
pub use leader::{FileLeaderStore, LeaderStore, MemoryLeaderStore};
pub use member::{LeaderRecord, Member, MemberStatus, ProcessId};
pub use message::{GroupMessage, MessageKind, ProtocolErrorCode};
pub use omap::MembershipTable;
pub use state::{ElectionOutcome, Escalation, GroupState, LocalDetails, PingOutcome, SendPrep, SourceInfo};
