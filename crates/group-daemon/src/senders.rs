//! Outbound protocol senders.
//!
//! `Pinger` drives everything this process initiates:
//! - The failure-detector round (shuffled pings carrying the table snapshot)
//! - Joining through a leader
//! - The departing broadcast
//! - Elections and coordinator announcements
//!
//! All membership reads and writes go through the command loop; the network
//! calls happen here, outside it.

use crate::transport::{self, TransportError};
use futures::future::join_all;
use group_core::command::GroupHandle;
use group_core::config::GroupConfig;
use group_core::message::{COORDINATOR_PATH, DEPARTING_PATH, JOIN_PATH, PING_PATH};
use group_core::state::{ElectionOutcome, SendPrep};
use group_core::{
    GroupError, GroupMessage, JoinError, LeaderRecord, Member, MemberStatus, MessageKind,
    ProtocolErrorCode,
};
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Sender side of the group protocol.
#[derive(Debug, Clone)]
pub struct Pinger {
    group: GroupHandle,
    config: GroupConfig,
    /// Set when a self-ping fails; cleared by a successful join
    offline: Arc<AtomicBool>,
    /// Errors that must stop the process
    fatal: mpsc::UnboundedSender<GroupError>,
}

impl Pinger {
    pub fn new(
        group: GroupHandle,
        config: GroupConfig,
        fatal: mpsc::UnboundedSender<GroupError>,
    ) -> Self {
        Self {
            group,
            config,
            offline: Arc::new(AtomicBool::new(false)),
            fatal,
        }
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    // ==================== Failure detector ====================

    /// One failure-detector round.
    pub async fn ping_round(&self) {
        if self.is_offline() && self.recover_from_outage().await {
            return;
        }

        let prep = match self.group.do_send_prep().await {
            Ok(prep) => prep,
            Err(e) => {
                debug!("Skipping ping round: {}", e);
                return;
            }
        };

        let mut targets = prep.targets.clone();
        targets.shuffle(&mut rand::rng());
        for target in &targets {
            self.ping_one(&prep, target).await;
        }

        match self.group.leader_vacant().await {
            Ok(true) => {
                info!("Leader is no longer active; starting election");
                self.run_election().await;
            }
            Ok(false) => {}
            Err(e) => debug!("Leader check failed: {}", e),
        }
    }

    async fn ping_one(&self, prep: &SendPrep, target: &Member) {
        let msg = prep.message_for(MessageKind::Ping, PING_PATH, target);

        match transport::tx_rx(&msg, self.config.request_timeout).await {
            Ok(reply) => self.on_ack(target, reply).await,
            Err(e) if target.id == prep.source.id => {
                warn!("Self-ping failed ({}); assuming local network outage", e);
                self.offline.store(true, Ordering::SeqCst);
                if let Err(e) = self.group.self_unreachable().await {
                    debug!("Could not record self-ping failure: {}", e);
                }
            }
            Err(e) => self.on_no_ack(target, e).await,
        }
    }

    async fn on_no_ack(&self, target: &Member, cause: TransportError) {
        debug!("No ACK from process {} at {}: {}", target.id, target.address, cause);

        match self.group.missed_ack(target.clone()).await {
            Ok(Some(escalation)) => {
                if escalation.record.status != escalation.previous {
                    info!("Process {} is now {}", target.id, escalation.record.status);
                }
                if escalation.leader_failed {
                    info!("Leader {} failed; starting election", target.id);
                    self.run_election().await;
                }
            }
            Ok(None) => {}
            Err(e) => debug!("Could not record missed ACK: {}", e),
        }
    }

    async fn on_ack(&self, target: &Member, reply: GroupMessage) {
        if let Some(code) = reply.error_code {
            debug!("Process {} answered ping with {}", target.id, code);
            return;
        }
        if reply.src_id != target.id {
            debug!(
                "ACK for process {} came from process {}; ignoring",
                target.id, reply.src_id
            );
            return;
        }

        let count = match target.status {
            MemberStatus::Alive => target.status_count + 1,
            _ => 1,
        };
        let incarnation = reply.src_incarnation.max(target.incarnation).max(1);
        let record = Member::alive(reply.src_id, reply.src_address, incarnation)
            .with_status(MemberStatus::Alive, count);

        if let Err(e) = self.group.ack(record).await {
            debug!("Could not record ACK: {}", e);
        }
    }

    /// Rejoin through the persisted leader after a self-ping failure.
    ///
    /// Returns true if a rejoin was attempted.
    async fn recover_from_outage(&self) -> bool {
        let leader = match self.group.get_db_leader().await {
            Ok(leader) => leader,
            Err(e) => {
                warn!("Failed to read persisted leader: {}", e);
                return false;
            }
        };

        if leader.is_empty() || leader.address == self.config.address {
            self.offline.store(false, Ordering::SeqCst);
            return false;
        }

        info!("Rejoining group through leader {} after network outage", leader);
        if let Err(e) = self.group.reset_identity(leader.clone()).await {
            debug!("Could not reset identity: {}", e);
            return true;
        }
        if let Err(e) = self.send_join(&leader).await {
            warn!("Rejoin through {} failed: {}", leader, e);
        }
        true
    }

    // ==================== Join ====================

    /// Ask `leader` for an id and adopt the returned membership.
    pub async fn send_join(&self, leader: &LeaderRecord) -> Result<(), JoinError> {
        let src = self.group.src_info().await.map_err(|e| {
            JoinError::new(ProtocolErrorCode::JoinUnknownErr, e.to_string())
        })?;

        let mut msg = GroupMessage::new(MessageKind::Join).from_source(0, &src.address, src.incarnation);
        msg.target_id = leader.id;
        msg.target_address = leader.address.clone();
        msg.target_path = JOIN_PATH.to_string();
        msg.expect_response = true;

        let reply = transport::tx_rx(&msg, self.config.request_timeout)
            .await
            .map_err(|e| JoinError::new(ProtocolErrorCode::JoinNoContact, e.to_string()))?;

        if let Some(code) = reply.error_code {
            return Err(JoinError::new(code, format!("Leader {} refused join", leader)));
        }
        if reply.target_id == 0 {
            return Err(JoinError::new(
                ProtocolErrorCode::JoinUnknownErr,
                format!("Leader {} returned no id", leader),
            ));
        }

        let id = reply.target_id;
        let leader = LeaderRecord::new(reply.src_id, reply.src_address.clone());
        let leader_member =
            Member::alive(reply.src_id, reply.src_address.clone(), reply.src_incarnation.max(1));

        let applied = async {
            self.group.set_leader(leader.clone(), false).await?;
            self.group.join_ack(reply).await?;
            self.group.ack(leader_member).await
        };
        applied
            .await
            .map_err(|e| JoinError::new(ProtocolErrorCode::JoinUnknownErr, e.to_string()))?;

        self.offline.store(false, Ordering::SeqCst);
        info!("Process {} joined group with leader {}", id, leader);
        Ok(())
    }

    // ==================== Departure ====================

    /// Mark this process departed and tell every other active process.
    pub async fn send_departing(&self) {
        let prep = match self.group.prepare_departure().await {
            Ok(prep) => prep,
            Err(e) => {
                warn!("Cannot prepare departure: {}", e);
                return;
            }
        };

        let sends = prep.targets.iter().map(|target| {
            let msg = prep.message_for(MessageKind::Departing, DEPARTING_PATH, target);
            async move { (target.id, transport::tx(&msg, self.config.request_timeout).await) }
        });

        for (id, result) in join_all(sends).await {
            if let Err(e) = result {
                debug!("Departing notice to process {} failed: {}", id, e);
            }
        }
        info!("Departing notice sent to {} process(es)", prep.targets.len());
    }

    // ==================== Election ====================

    /// Run an election and announce the result if this process wins.
    ///
    /// A failure to persist the new leader is sent to the fatal channel.
    pub async fn run_election(&self) {
        match self.group.run_election().await {
            Ok(ElectionOutcome::Won {
                leader,
                incarnation,
                announce_to,
            }) => {
                self.announce_coordinator(&leader, incarnation, &announce_to)
                    .await;
            }
            Ok(ElectionOutcome::Deferred { top }) => {
                debug!("Election deferred to process {}", top);
            }
            Ok(ElectionOutcome::AlreadyRunning | ElectionOutcome::NotJoined) => {}
            Err(GroupError::CommandLoopClosed) => {}
            Err(e) => {
                error!("Election failed: {}", e);
                let _ = self.fatal.send(e);
            }
        }
    }

    async fn announce_coordinator(&self, leader: &LeaderRecord, incarnation: u64, targets: &[Member]) {
        let sends = targets.iter().map(|target| {
            let mut msg = GroupMessage::new(MessageKind::Coordinator)
                .from_source(leader.id, &leader.address, incarnation)
                .to_target(target);
            msg.target_path = COORDINATOR_PATH.to_string();
            msg.subject_id = leader.id;
            msg.subject_address = leader.address.clone();
            async move { (target.id, transport::tx(&msg, self.config.request_timeout).await) }
        });

        for (id, result) in join_all(sends).await {
            if let Err(e) = result {
                debug!("Coordinator announcement to process {} failed: {}", id, e);
            }
        }
        info!("Announced leadership to {} process(es)", targets.len());
    }
}
