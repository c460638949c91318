//! Command loop.
//!
//! All reads and writes of [`GroupState`] are serialized through one task:
//! - callers hold a cloneable [`GroupHandle`]
//! - each request is a [`Command`] carrying a oneshot reply channel
//! - commands are processed strictly in arrival order
//!
//! The loop stops once every handle has been dropped.

use crate::error::{GroupError, Result};
use crate::member::{LeaderRecord, Member, ProcessId};
use crate::message::{GroupMessage, ProtocolErrorCode};
use crate::state::{ElectionOutcome, Escalation, GroupState, LocalDetails, PingOutcome, SendPrep, SourceInfo};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// A request to the command loop.
#[derive(Debug)]
pub enum Command {
    /// Inbound Ping or Join
    Ping {
        message: GroupMessage,
        reply: oneshot::Sender<PingOutcome>,
    },
    JoinAck {
        message: GroupMessage,
        reply: oneshot::Sender<()>,
    },
    Departing {
        message: GroupMessage,
        reply: oneshot::Sender<bool>,
    },
    /// Remove a process outright
    Failure {
        id: ProcessId,
        reply: oneshot::Sender<bool>,
    },
    Ack {
        member: Member,
        reply: oneshot::Sender<()>,
    },
    /// Escalate a process that did not answer a ping
    MissedAck {
        target: Member,
        reply: oneshot::Sender<Option<Escalation>>,
    },
    SelfUnreachable {
        reply: oneshot::Sender<u64>,
    },
    FlushMemberMap {
        reply: oneshot::Sender<Option<ProtocolErrorCode>>,
    },
    DoSendPrep {
        reply: oneshot::Sender<SendPrep>,
    },
    PrepareDeparture {
        reply: oneshot::Sender<SendPrep>,
    },
    GetMySrcInfo {
        reply: oneshot::Sender<SourceInfo>,
    },
    GetDbLeader {
        reply: oneshot::Sender<Result<LeaderRecord>>,
    },
    SetDbLeader {
        leader: LeaderRecord,
        reply: oneshot::Sender<Result<()>>,
    },
    SetLeader {
        leader: LeaderRecord,
        in_election: bool,
        reply: oneshot::Sender<()>,
    },
    GetLocalLeader {
        reply: oneshot::Sender<LeaderRecord>,
    },
    RunElection {
        reply: oneshot::Sender<Result<ElectionOutcome>>,
    },
    SetElectionState {
        in_election: bool,
        reply: oneshot::Sender<()>,
    },
    GetElectionState {
        reply: oneshot::Sender<bool>,
    },
    GetLocalDetails {
        reply: oneshot::Sender<LocalDetails>,
    },
    LeaderVacant {
        reply: oneshot::Sender<bool>,
    },
    SeizeLeadership {
        reply: oneshot::Sender<Result<()>>,
    },
    ResetIdentity {
        leader: LeaderRecord,
        reply: oneshot::Sender<()>,
    },
}

impl GroupState {
    /// Apply one command and answer it.
    ///
    /// A dropped reply receiver means the caller gave up; the state change
    /// still stands.
    pub async fn dispatch(&mut self, command: Command) {
        match command {
            Command::Ping { message, reply } => {
                let _ = reply.send(self.process_ping(&message));
            }
            Command::JoinAck { message, reply } => {
                self.join_ack(&message);
                let _ = reply.send(());
            }
            Command::Departing { message, reply } => {
                let _ = reply.send(self.departing(&message));
            }
            Command::Failure { id, reply } => {
                let _ = reply.send(self.remove_member(id));
            }
            Command::Ack { member, reply } => {
                self.ack(member);
                let _ = reply.send(());
            }
            Command::MissedAck { target, reply } => {
                let _ = reply.send(self.missed_ack(&target));
            }
            Command::SelfUnreachable { reply } => {
                let _ = reply.send(self.self_unreachable());
            }
            Command::FlushMemberMap { reply } => {
                let _ = reply.send(self.flush_member_map());
            }
            Command::DoSendPrep { reply } => {
                let _ = reply.send(self.do_send_prep());
            }
            Command::PrepareDeparture { reply } => {
                let _ = reply.send(self.prepare_departure());
            }
            Command::GetMySrcInfo { reply } => {
                let _ = reply.send(self.src_info());
            }
            Command::GetDbLeader { reply } => {
                let _ = reply.send(self.get_db_leader().await);
            }
            Command::SetDbLeader { leader, reply } => {
                let _ = reply.send(self.set_db_leader(leader).await);
            }
            Command::SetLeader {
                leader,
                in_election,
                reply,
            } => {
                self.set_leader(leader, in_election);
                let _ = reply.send(());
            }
            Command::GetLocalLeader { reply } => {
                let _ = reply.send(self.leader().clone());
            }
            Command::RunElection { reply } => {
                let _ = reply.send(self.run_election().await);
            }
            Command::SetElectionState { in_election, reply } => {
                self.set_election_state(in_election);
                let _ = reply.send(());
            }
            Command::GetElectionState { reply } => {
                let _ = reply.send(self.in_election());
            }
            Command::GetLocalDetails { reply } => {
                let _ = reply.send(self.local_details());
            }
            Command::LeaderVacant { reply } => {
                let _ = reply.send(self.leader_vacant());
            }
            Command::SeizeLeadership { reply } => {
                let _ = reply.send(self.seize_leadership().await);
            }
            Command::ResetIdentity { leader, reply } => {
                self.reset_identity(leader);
                let _ = reply.send(());
            }
        }
    }
}

/// Start the command loop that owns `state`.
pub fn spawn_command_loop(mut state: GroupState) -> (GroupHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            state.dispatch(command).await;
        }
        debug!("Command loop stopped");
    });
    (GroupHandle { tx }, task)
}

/// Cloneable handle to the command loop.
#[derive(Debug, Clone)]
pub struct GroupHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl GroupHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| GroupError::CommandLoopClosed)?;
        rx.await.map_err(|_| GroupError::CommandLoopClosed)
    }

    /// Process an inbound Ping or Join.
    pub async fn ping(&self, message: GroupMessage) -> Result<PingOutcome> {
        self.request(|reply| Command::Ping { message, reply }).await
    }

    pub async fn join_ack(&self, message: GroupMessage) -> Result<()> {
        self.request(|reply| Command::JoinAck { message, reply }).await
    }

    /// Returns true if the departing process was the leader.
    pub async fn departing(&self, message: GroupMessage) -> Result<bool> {
        self.request(|reply| Command::Departing { message, reply })
            .await
    }

    pub async fn remove_member(&self, id: ProcessId) -> Result<bool> {
        self.request(|reply| Command::Failure { id, reply }).await
    }

    pub async fn ack(&self, member: Member) -> Result<()> {
        self.request(|reply| Command::Ack { member, reply }).await
    }

    /// Escalate `target` from its current record after a missed Ack.
    pub async fn missed_ack(&self, target: Member) -> Result<Option<Escalation>> {
        self.request(|reply| Command::MissedAck { target, reply })
            .await
    }

    /// Returns the raised incarnation.
    pub async fn self_unreachable(&self) -> Result<u64> {
        self.request(|reply| Command::SelfUnreachable { reply }).await
    }

    pub async fn flush_member_map(&self) -> Result<Option<ProtocolErrorCode>> {
        self.request(|reply| Command::FlushMemberMap { reply }).await
    }

    pub async fn do_send_prep(&self) -> Result<SendPrep> {
        self.request(|reply| Command::DoSendPrep { reply }).await
    }

    pub async fn prepare_departure(&self) -> Result<SendPrep> {
        self.request(|reply| Command::PrepareDeparture { reply }).await
    }

    pub async fn src_info(&self) -> Result<SourceInfo> {
        self.request(|reply| Command::GetMySrcInfo { reply }).await
    }

    pub async fn get_db_leader(&self) -> Result<LeaderRecord> {
        self.request(|reply| Command::GetDbLeader { reply }).await?
    }

    pub async fn set_db_leader(&self, leader: LeaderRecord) -> Result<()> {
        self.request(|reply| Command::SetDbLeader { leader, reply })
            .await?
    }

    pub async fn set_leader(&self, leader: LeaderRecord, in_election: bool) -> Result<()> {
        self.request(|reply| Command::SetLeader {
            leader,
            in_election,
            reply,
        })
        .await
    }

    pub async fn local_leader(&self) -> Result<LeaderRecord> {
        self.request(|reply| Command::GetLocalLeader { reply }).await
    }

    pub async fn run_election(&self) -> Result<ElectionOutcome> {
        self.request(|reply| Command::RunElection { reply }).await?
    }

    pub async fn set_election_state(&self, in_election: bool) -> Result<()> {
        self.request(|reply| Command::SetElectionState { in_election, reply })
            .await
    }

    pub async fn election_state(&self) -> Result<bool> {
        self.request(|reply| Command::GetElectionState { reply }).await
    }

    pub async fn local_details(&self) -> Result<LocalDetails> {
        self.request(|reply| Command::GetLocalDetails { reply }).await
    }

    pub async fn leader_vacant(&self) -> Result<bool> {
        self.request(|reply| Command::LeaderVacant { reply }).await
    }

    pub async fn seize_leadership(&self) -> Result<()> {
        self.request(|reply| Command::SeizeLeadership { reply }).await?
    }

    pub async fn reset_identity(&self, leader: LeaderRecord) -> Result<()> {
        self.request(|reply| Command::ResetIdentity { leader, reply })
            .await
    }
}
