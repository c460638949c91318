//! Local server state and the protocol rules applied to it.
//!
//! `GroupState` is the single owner of the membership table, this process's
//! identity and the believed leader. It is driven exclusively by the command
//! loop in [`crate::command`]; every method here runs to completion without
//! touching the network.

use crate::error::Result;
use crate::leader::LeaderStore;
use crate::member::{LeaderRecord, Member, MemberStatus, ProcessId};
use crate::message::{GroupMessage, MessageKind, ProtocolErrorCode};
use crate::omap::MembershipTable;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Identity fields of the local process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub id: ProcessId,
    pub address: String,
    pub incarnation: u64,
}

/// Result of processing an inbound Ping or Join.
#[derive(Debug, Clone)]
pub struct PingOutcome {
    /// Ack to return to the sender
    pub reply: GroupMessage,
    /// The believed leader was found failed or departed while merging
    pub check_election: bool,
}

/// A consistent view for one round of outbound messages.
#[derive(Debug, Clone)]
pub struct SendPrep {
    pub source: SourceInfo,
    /// Deep copy of the membership table
    pub snapshot: MembershipTable,
    /// Alive and suspect processes to contact
    pub targets: Vec<Member>,
}

impl SendPrep {
    /// Build a message of `kind` from the local process to `target`.
    pub fn message_for(&self, kind: MessageKind, path: &str, target: &Member) -> GroupMessage {
        let mut msg = GroupMessage::new(kind)
            .from_source(self.source.id, &self.source.address, self.source.incarnation)
            .to_target(target);
        msg.target_path = path.to_string();
        msg.expect_response = kind == MessageKind::Ping;
        if kind == MessageKind::Ping {
            msg.snapshot = Some(self.snapshot.clone());
        }
        msg
    }
}

/// Local identity plus a deep copy of the membership table.
#[derive(Debug, Clone)]
pub struct LocalDetails {
    pub id: ProcessId,
    pub address: String,
    pub incarnation: u64,
    pub leader: LeaderRecord,
    pub table: MembershipTable,
}

impl LocalDetails {
    /// Active processes other than the local one.
    pub fn active_peers(&self) -> Vec<Member> {
        self.table
            .read_active_process_list()
            .into_iter()
            .filter(|m| m.id != self.id)
            .collect()
    }
}

/// Result of a leader election round.
#[derive(Debug, Clone, PartialEq)]
pub enum ElectionOutcome {
    /// Another election is in progress; nothing was changed.
    AlreadyRunning,
    /// The local process became leader and must announce itself.
    Won {
        leader: LeaderRecord,
        incarnation: u64,
        announce_to: Vec<Member>,
    },
    /// A higher active id exists; it is expected to take over.
    Deferred { top: ProcessId },
    /// The local process has no id yet and cannot stand.
    NotJoined,
}

/// Escalate a target that did not acknowledge a ping.
///
/// Alive becomes suspect with count one. A suspect count is incremented and
/// the target becomes failed once the count exceeds `failure_threshold`.
pub fn escalate_missed_ack(target: &Member, failure_threshold: u64) -> Member {
    let mut next = target.clone();
    match target.status {
        MemberStatus::Alive => {
            next.status = MemberStatus::Suspect;
            next.status_count = 1;
        }
        MemberStatus::Suspect => {
            let count = target.status_count + 1;
            if count > failure_threshold {
                next.status = MemberStatus::Failed;
                next.status_count = 1;
            } else {
                next.status_count = count;
            }
        }
        MemberStatus::Failed | MemberStatus::Departed => {}
    }
    next
}

/// How a missed Ack changed a process's record.
#[derive(Debug, Clone, PartialEq)]
pub struct Escalation {
    /// Status before this miss
    pub previous: MemberStatus,
    pub record: Member,
    /// The process is now failed and is the believed leader
    pub leader_failed: bool,
}

/// State owned by the command loop.
pub struct GroupState {
    my_id: ProcessId,
    my_address: String,
    my_incarnation: u64,
    leader: LeaderRecord,
    in_election: bool,
    failure_threshold: u64,
    table: MembershipTable,
    store: Arc<dyn LeaderStore>,
}

impl GroupState {
    /// Fresh state for an unnumbered process at incarnation one.
    pub fn new(address: impl Into<String>, failure_threshold: u64, store: Arc<dyn LeaderStore>) -> Self {
        Self {
            my_id: 0,
            my_address: address.into(),
            my_incarnation: 1,
            leader: LeaderRecord::default(),
            in_election: false,
            failure_threshold,
            table: MembershipTable::new(),
            store,
        }
    }

    pub fn my_id(&self) -> ProcessId {
        self.my_id
    }

    pub fn my_incarnation(&self) -> u64 {
        self.my_incarnation
    }

    pub fn leader(&self) -> &LeaderRecord {
        &self.leader
    }

    pub fn table(&self) -> &MembershipTable {
        &self.table
    }

    pub fn in_election(&self) -> bool {
        self.in_election
    }

    pub fn is_leader(&self) -> bool {
        self.my_id != 0 && self.leader.id == self.my_id
    }

    pub fn src_info(&self) -> SourceInfo {
        SourceInfo {
            id: self.my_id,
            address: self.my_address.clone(),
            incarnation: self.my_incarnation,
        }
    }

    fn self_record(&self, status: MemberStatus) -> Member {
        Member::alive(self.my_id, self.my_address.clone(), self.my_incarnation).with_status(status, 1)
    }

    fn add(&mut self, member: Member) {
        if let Err(e) = self.table.add(member.id, member) {
            error!("Membership table rejected record: {}", e);
        }
    }

    // ==================== Ping / Join ====================

    /// Process an inbound Ping or Join and build the Ack.
    pub fn process_ping(&mut self, msg: &GroupMessage) -> PingOutcome {
        let mut reply = GroupMessage::new(MessageKind::Ack).from_source(
            self.my_id,
            &self.my_address,
            self.my_incarnation,
        );
        reply.src_status = Some(MemberStatus::Alive);
        reply.target_id = msg.src_id;
        reply.target_address = msg.src_address.clone();
        reply.target_incarnation = msg.src_incarnation;

        if msg.src_id == 0 {
            self.allocate_joiner(msg, &mut reply);
            return PingOutcome {
                reply,
                check_election: false,
            };
        }

        if msg.target_id != self.my_id {
            debug!(
                "Ping from {} addressed to process {} but this is process {}",
                msg.src_id, msg.target_id, self.my_id
            );
            reply.error_code = Some(ProtocolErrorCode::PingIncorrectReceiver);
            return PingOutcome {
                reply,
                check_election: false,
            };
        }

        let incarnation = msg.src_incarnation.max(1);
        let mut check_election = false;

        match self.table.read(msg.src_id).cloned() {
            None => {
                // skip the sender's snapshot this round
                self.add(Member::alive(msg.src_id, msg.src_address.clone(), incarnation));
            }
            Some(mut pj) => match pj.status {
                MemberStatus::Alive => {
                    pj.incarnation = pj.incarnation.max(incarnation);
                    pj.status_count += 1;
                    self.add(pj.clone());

                    if let Some(snapshot) = &msg.snapshot {
                        self.refute_suspicion(snapshot, msg.src_id);
                        check_election = self.merge(pj.id, snapshot);
                    }
                }
                MemberStatus::Suspect => {
                    if let Some(snapshot) = &msg.snapshot {
                        self.refute_suspicion(snapshot, msg.src_id);
                    }
                    if incarnation > pj.incarnation {
                        pj.status = MemberStatus::Alive;
                        pj.status_count = 1;
                        pj.incarnation = incarnation;
                        self.add(pj.clone());

                        if let Some(snapshot) = &msg.snapshot {
                            check_election = self.merge(pj.id, snapshot);
                        }
                    }
                }
                MemberStatus::Failed | MemberStatus::Departed => {}
            },
        }

        PingOutcome {
            reply,
            check_election,
        }
    }

    /// Leader-only id allocation for an unnumbered sender.
    fn allocate_joiner(&mut self, msg: &GroupMessage, reply: &mut GroupMessage) {
        if !self.is_leader() {
            info!(
                "Non-leader process {} received JOIN message from address {}",
                self.my_id, msg.src_address
            );
            reply.error_code = Some(ProtocolErrorCode::JoinNotLeader);
            return;
        }

        if let Some(holder) = self
            .table
            .read_by_address(&msg.src_address)
            .into_iter()
            .find(|m| m.status.is_active())
        {
            error!(
                "Address {} is in use with process {} status {}",
                holder.address, holder.id, holder.status
            );
            reply.error_code = Some(ProtocolErrorCode::JoinAddrInUse);
            return;
        }

        let mut joiner = Member::alive(0, msg.src_address.clone(), msg.src_incarnation.max(1));
        match self.table.add_without_id(&mut joiner) {
            Ok(id) => {
                info!("Process {} joined group from {}", id, joiner.address);
                reply.target_id = id;
                reply.target_incarnation = joiner.incarnation;
                reply.target_status = Some(MemberStatus::Alive);
                reply.snapshot = Some(self.table.clone());
            }
            Err(e) => {
                error!("Failed to allocate process id: {}", e);
                reply.error_code = Some(ProtocolErrorCode::JoinUnknownErr);
            }
        }
    }

    /// Reassert liveness if the sender's snapshot suspects this process.
    fn refute_suspicion(&mut self, snapshot: &MembershipTable, sender: ProcessId) {
        match snapshot.read(self.my_id).map(|m| m.status) {
            Some(MemberStatus::Alive) => {}
            Some(MemberStatus::Suspect) => {
                self.my_incarnation += 1;
                debug!(
                    "Process {} suspects this process; raising incarnation to {}",
                    sender, self.my_incarnation
                );
                let me = self.self_record(MemberStatus::Alive);
                self.add(me);
            }
            Some(status) => {
                warn!(
                    "Process {} reports this process ({}) as {}",
                    sender, self.my_id, status
                );
            }
            None => {
                debug!("Process {} has no record of this process yet", sender);
            }
        }
    }

    fn merge(&mut self, sender: ProcessId, snapshot: &MembershipTable) -> bool {
        self.table.upd_from_ping(
            self.my_id,
            sender,
            snapshot,
            self.failure_threshold,
            self.leader.id,
        )
    }

    /// Adopt the id granted by the leader's join reply.
    pub fn join_ack(&mut self, reply: &GroupMessage) {
        self.my_id = reply.target_id;
        let me = self.self_record(MemberStatus::Alive);
        self.add(me);
        info!("JOIN accepted; this process is now {}", self.my_id);

        if let Some(snapshot) = &reply.snapshot {
            self.merge(reply.src_id, snapshot);
        }
    }

    // ==================== Ack / NoAck ====================

    /// Record a process as described by an Ack.
    pub fn ack(&mut self, record: Member) {
        if record.id == 0 {
            return;
        }
        self.apply_observed(record);
    }

    /// Record the escalated state of a process that missed an Ack.
    ///
    /// Returns true if the process is now failed and is the believed leader.
    pub fn no_ack(&mut self, mut record: Member) -> bool {
        if record.incarnation == 0 {
            record.incarnation = 1;
        }
        let failed = record.status == MemberStatus::Failed;
        let id = record.id;
        self.apply_observed(record);
        failed && self.leader.id == id
    }

    /// Escalate the current record of `target` after a missed Ack.
    ///
    /// Counts raised by gossip since the round started are kept. Returns
    /// None if the process has left the table in the meantime.
    pub fn missed_ack(&mut self, target: &Member) -> Option<Escalation> {
        let Some(current) = self.table.read(target.id).cloned() else {
            debug!("Process {} left the table before its missed ACK was recorded", target.id);
            return None;
        };
        let record = escalate_missed_ack(&current, self.failure_threshold);
        let leader_failed = self.no_ack(record.clone());
        Some(Escalation {
            previous: current.status,
            record,
            leader_failed,
        })
    }

    fn apply_observed(&mut self, mut record: Member) {
        if let Some(existing) = self.table.read(record.id) {
            if existing.status.is_gone() && record.status.is_active() {
                debug!("Process {} is {}; ignoring {}", record.id, existing.status, record.status);
                return;
            }
            record.incarnation = record.incarnation.max(existing.incarnation);
        }
        self.add(record);
    }

    /// A self-ping failed: stay alive and raise the incarnation.
    pub fn self_unreachable(&mut self) -> u64 {
        self.my_incarnation += 1;
        let count = self
            .table
            .read(self.my_id)
            .map(|m| m.status_count + 1)
            .unwrap_or(1);
        if self.my_id != 0 {
            let me = self.self_record(MemberStatus::Alive).with_status(MemberStatus::Alive, count);
            self.add(me);
        }
        self.my_incarnation
    }

    // ==================== Departures and removal ====================

    /// Mark the sender of a Departing message as departed.
    ///
    /// Returns true if the sender is the believed leader.
    pub fn departing(&mut self, msg: &GroupMessage) -> bool {
        let leaving = msg.src_member().with_status(MemberStatus::Departed, 1);
        self.table.upd_from_departing(&leaving, self.leader.id)
    }

    /// Remove a process outright.
    pub fn remove_member(&mut self, id: ProcessId) -> bool {
        let removed = self.table.delete(id);
        if !removed {
            error!("Failed to delete failed process {}", id);
        }
        removed
    }

    pub fn flush_member_map(&mut self) -> Option<ProtocolErrorCode> {
        if self.table.flush() {
            None
        } else {
            error!("Requested flush of the membership table did not succeed");
            Some(ProtocolErrorCode::MemberMapFlushFailed)
        }
    }

    // ==================== Outbound preparation ====================

    /// Prune gone records, then snapshot the table and list ping targets.
    pub fn do_send_prep(&mut self) -> SendPrep {
        let removed = self.table.upd_failed_departed_processes();
        if !removed.is_empty() {
            debug!("Pruned processes {:?}", removed);
        }

        SendPrep {
            source: self.src_info(),
            snapshot: self.table.clone(),
            targets: self.table.read_active_process_list(),
        }
    }

    /// Mark this process departed and list the processes to notify.
    pub fn prepare_departure(&mut self) -> SendPrep {
        self.my_incarnation += 1;
        if self.my_id != 0 {
            let me = self.self_record(MemberStatus::Departed);
            self.add(me);
        }
        let mut prep = self.do_send_prep();
        prep.targets.retain(|m| m.id != self.my_id);
        prep
    }

    pub fn local_details(&self) -> LocalDetails {
        LocalDetails {
            id: self.my_id,
            address: self.my_address.clone(),
            incarnation: self.my_incarnation,
            leader: self.leader.clone(),
            table: self.table.clone(),
        }
    }

    // ==================== Leader ====================

    pub async fn get_db_leader(&self) -> Result<LeaderRecord> {
        self.store.get_leader().await
    }

    /// Set the local leader and persist it.
    pub async fn set_db_leader(&mut self, leader: LeaderRecord) -> Result<()> {
        self.leader = leader;
        self.store.set_leader(&self.leader).await?;
        info!("DB and local leader set to {}", self.leader);
        Ok(())
    }

    pub fn set_leader(&mut self, leader: LeaderRecord, in_election: bool) {
        info!("Local leader set to {}", leader);
        self.leader = leader;
        self.in_election = in_election;
    }

    pub fn set_election_state(&mut self, in_election: bool) {
        self.in_election = in_election;
    }

    /// The believed leader is missing from the active process list.
    pub fn leader_vacant(&self) -> bool {
        if self.my_id == 0 {
            return false;
        }
        self.table
            .read(self.leader.id)
            .map(|m| m.status.is_gone())
            .unwrap_or(true)
    }

    /// Take the founding id and lead an empty group.
    pub async fn seize_leadership(&mut self) -> Result<()> {
        self.my_id = 1;
        let me = self.self_record(MemberStatus::Alive);
        self.add(me);
        self.set_db_leader(LeaderRecord::new(self.my_id, self.my_address.clone()))
            .await
    }

    /// Forget identity and membership before rejoining.
    pub fn reset_identity(&mut self, leader: LeaderRecord) {
        self.my_id = 0;
        self.my_incarnation = 1;
        self.table.flush();
        self.leader = leader;
    }

    /// Bully election: the highest active id leads.
    pub async fn run_election(&mut self) -> Result<ElectionOutcome> {
        if self.in_election {
            debug!("Election already in progress");
            return Ok(ElectionOutcome::AlreadyRunning);
        }
        if self.my_id == 0 {
            return Ok(ElectionOutcome::NotJoined);
        }
        self.in_election = true;

        let top = self.table.read_max_active_id().map(|m| m.id);
        if let Some(top) = top.filter(|top| *top > self.my_id) {
            info!("Process {} outranks this process; deferring", top);
            self.in_election = false;
            return Ok(ElectionOutcome::Deferred { top });
        }

        self.my_incarnation += 1;
        let me = self.self_record(MemberStatus::Alive);
        self.add(me);

        let leader = LeaderRecord::new(self.my_id, self.my_address.clone());
        if let Err(e) = self.store.set_leader(&leader).await {
            error!("Failed to persist leader {}: {}", leader, e);
            self.in_election = false;
            return Err(e);
        }
        self.leader = leader.clone();
        self.in_election = false;
        info!("Process {} elected leader", self.my_id);

        let announce_to = self
            .table
            .read_active_process_list()
            .into_iter()
            .filter(|m| m.id != self.my_id)
            .collect();

        Ok(ElectionOutcome::Won {
            leader,
            incarnation: self.my_incarnation,
            announce_to,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GroupError;
    use crate::leader::MemoryLeaderStore;
    use async_trait::async_trait;

    const ME: &str = "127.0.0.1:5001";

    struct FailingStore;

    #[async_trait]
    impl LeaderStore for FailingStore {
        async fn get_leader(&self) -> Result<LeaderRecord> {
            Err(GroupError::LeaderStore("offline".into()))
        }
        async fn set_leader(&self, _leader: &LeaderRecord) -> Result<()> {
            Err(GroupError::LeaderStore("offline".into()))
        }
        async fn cleanup(&self) -> Result<()> {
            Ok(())
        }
    }

    fn state_with(store: Arc<dyn LeaderStore>) -> GroupState {
        GroupState::new(ME, 5, store)
    }

    async fn leader_state() -> (GroupState, Arc<MemoryLeaderStore>) {
        let store = Arc::new(MemoryLeaderStore::new());
        let mut state = state_with(store.clone());
        state.seize_leadership().await.unwrap();
        (state, store)
    }

    fn ping_from(id: ProcessId, address: &str, incarnation: u64, target: ProcessId) -> GroupMessage {
        let mut msg = GroupMessage::new(MessageKind::Ping).from_source(id, address, incarnation);
        msg.target_id = target;
        msg
    }

    fn join_from(address: &str) -> GroupMessage {
        GroupMessage::new(MessageKind::Join).from_source(0, address, 1)
    }

    // ==================== Join ====================

    #[tokio::test]
    async fn test_leader_allocates_id_and_returns_table() {
        let (mut state, _) = leader_state().await;
        let outcome = state.process_ping(&join_from("127.0.0.1:5002"));

        assert_eq!(outcome.reply.kind, MessageKind::Ack);
        assert_eq!(outcome.reply.target_id, 2);
        assert_eq!(outcome.reply.error_code, None);
        let snapshot = outcome.reply.snapshot.unwrap();
        assert_eq!(snapshot.ids(), &[1, 2]);
        assert_eq!(state.table().read(2).unwrap().address, "127.0.0.1:5002");
    }

    #[tokio::test]
    async fn test_leader_refuses_address_in_use() {
        let (mut state, _) = leader_state().await;
        state.process_ping(&join_from("127.0.0.1:5002"));
        let outcome = state.process_ping(&join_from("127.0.0.1:5002"));
        assert_eq!(outcome.reply.error_code, Some(ProtocolErrorCode::JoinAddrInUse));
        assert_eq!(outcome.reply.target_id, 0);
        assert_eq!(state.table().count(), 2);
    }

    #[tokio::test]
    async fn test_leader_reuses_address_of_failed_process() {
        let (mut state, _) = leader_state().await;
        state.process_ping(&join_from("127.0.0.1:5002"));
        state.no_ack(
            Member::alive(2, "127.0.0.1:5002", 1).with_status(MemberStatus::Failed, 1),
        );
        let outcome = state.process_ping(&join_from("127.0.0.1:5002"));
        assert_eq!(outcome.reply.target_id, 3);
    }

    #[test]
    fn test_non_leader_rejects_join() {
        let mut state = state_with(Arc::new(MemoryLeaderStore::new()));
        let outcome = state.process_ping(&join_from("127.0.0.1:5002"));
        assert_eq!(outcome.reply.error_code, Some(ProtocolErrorCode::JoinNotLeader));
        assert!(state.table().is_empty());
    }

    #[test]
    fn test_join_ack_adopts_id_and_merges_snapshot() {
        let mut state = state_with(Arc::new(MemoryLeaderStore::new()));
        state.set_leader(LeaderRecord::new(1, "127.0.0.1:5000"), false);

        let mut snapshot = MembershipTable::new();
        snapshot.add(1, Member::alive(1, "127.0.0.1:5000", 2)).unwrap();
        snapshot.add(3, Member::alive(3, "127.0.0.1:5003", 1)).unwrap();
        snapshot.add(4, Member::alive(4, ME, 1)).unwrap();

        let mut reply = GroupMessage::new(MessageKind::Ack).from_source(1, "127.0.0.1:5000", 2);
        reply.target_id = 4;
        reply.snapshot = Some(snapshot);

        state.join_ack(&reply);
        assert_eq!(state.my_id(), 4);
        assert_eq!(state.table().read(4).unwrap().status, MemberStatus::Alive);
        assert!(state.table().read(3).is_some());
        // the leader itself is recorded from the Ack, not the snapshot
        assert!(state.table().read(1).is_none());
    }

    // ==================== Ping ====================

    #[tokio::test]
    async fn test_ping_for_other_process_is_rejected() {
        let (mut state, _) = leader_state().await;
        let outcome = state.process_ping(&ping_from(2, "127.0.0.1:5002", 1, 9));
        assert_eq!(
            outcome.reply.error_code,
            Some(ProtocolErrorCode::PingIncorrectReceiver)
        );
        assert!(state.table().read(2).is_none());
    }

    #[tokio::test]
    async fn test_ping_from_unknown_sender_adds_it_without_merge() {
        let (mut state, _) = leader_state().await;
        let mut msg = ping_from(2, "127.0.0.1:5002", 3, 1);
        let mut snapshot = MembershipTable::new();
        snapshot.add(7, Member::alive(7, "127.0.0.1:5007", 1)).unwrap();
        msg.snapshot = Some(snapshot);

        let outcome = state.process_ping(&msg);
        assert_eq!(outcome.reply.target_id, 2);
        assert_eq!(outcome.reply.src_id, 1);
        let sender = state.table().read(2).unwrap();
        assert_eq!(sender.status, MemberStatus::Alive);
        assert_eq!(sender.incarnation, 3);
        assert!(state.table().read(7).is_none());
    }

    #[tokio::test]
    async fn test_ping_from_alive_sender_bumps_count_and_merges() {
        let (mut state, _) = leader_state().await;
        state.process_ping(&ping_from(2, "127.0.0.1:5002", 1, 1));

        let mut msg = ping_from(2, "127.0.0.1:5002", 2, 1);
        let mut snapshot = MembershipTable::new();
        snapshot.add(7, Member::alive(7, "127.0.0.1:5007", 1)).unwrap();
        msg.snapshot = Some(snapshot);
        state.process_ping(&msg);

        let sender = state.table().read(2).unwrap();
        assert_eq!(sender.status_count, 2);
        assert_eq!(sender.incarnation, 2);
        assert!(state.table().read(7).is_some());
    }

    #[tokio::test]
    async fn test_ping_merge_reports_leader_failure() {
        let store = Arc::new(MemoryLeaderStore::new());
        let mut state = state_with(store);
        state.join_ack(&{
            let mut r = GroupMessage::new(MessageKind::Ack);
            r.target_id = 2;
            r
        });
        state.set_leader(LeaderRecord::new(1, "127.0.0.1:5000"), false);
        state.ack(Member::alive(1, "127.0.0.1:5000", 1));
        state.ack(Member::alive(3, "127.0.0.1:5003", 1));

        let mut msg = ping_from(3, "127.0.0.1:5003", 1, 2);
        let mut snapshot = MembershipTable::new();
        snapshot
            .add(1, Member::alive(1, "127.0.0.1:5000", 1).with_status(MemberStatus::Failed, 1))
            .unwrap();
        msg.snapshot = Some(snapshot);

        assert!(state.process_ping(&msg).check_election);
        assert_eq!(state.table().read(1).unwrap().status, MemberStatus::Failed);
    }

    #[tokio::test]
    async fn test_suspicion_in_snapshot_raises_own_incarnation() {
        let (mut state, _) = leader_state().await;
        state.process_ping(&ping_from(2, "127.0.0.1:5002", 1, 1));
        let before = state.my_incarnation();

        let mut msg = ping_from(2, "127.0.0.1:5002", 1, 1);
        let mut snapshot = MembershipTable::new();
        snapshot
            .add(1, Member::alive(1, ME, before).with_status(MemberStatus::Suspect, 1))
            .unwrap();
        msg.snapshot = Some(snapshot);
        state.process_ping(&msg);

        assert_eq!(state.my_incarnation(), before + 1);
        let me = state.table().read(1).unwrap();
        assert_eq!(me.status, MemberStatus::Alive);
        assert_eq!(me.incarnation, before + 1);
    }

    #[tokio::test]
    async fn test_suspect_sender_recovers_only_with_higher_incarnation() {
        let (mut state, _) = leader_state().await;
        state.ack(Member::alive(2, "127.0.0.1:5002", 4).with_status(MemberStatus::Suspect, 2));

        state.process_ping(&ping_from(2, "127.0.0.1:5002", 4, 1));
        assert_eq!(state.table().read(2).unwrap().status, MemberStatus::Suspect);

        state.process_ping(&ping_from(2, "127.0.0.1:5002", 5, 1));
        let r = state.table().read(2).unwrap();
        assert_eq!(r.status, MemberStatus::Alive);
        assert_eq!(r.status_count, 1);
        assert_eq!(r.incarnation, 5);
    }

    // ==================== Failure detection ====================

    #[test]
    fn test_escalation_reaches_failed_after_threshold_plus_one_misses() {
        let threshold = 3;
        let mut target = Member::alive(2, "127.0.0.1:5002", 1);
        for miss in 1..=threshold {
            target = escalate_missed_ack(&target, threshold);
            assert_eq!(target.status, MemberStatus::Suspect, "miss {}", miss);
        }
        target = escalate_missed_ack(&target, threshold);
        assert_eq!(target.status, MemberStatus::Failed);
        assert_eq!(target.status_count, 1);
    }

    #[tokio::test]
    async fn test_failed_process_pruned_within_two_n_minus_one_rounds() {
        let (mut state, _) = leader_state().await;
        state.ack(Member::alive(2, "127.0.0.1:5002", 1));
        state.no_ack(Member::alive(2, "127.0.0.1:5002", 1).with_status(MemberStatus::Failed, 1));

        // two records: limit is 3
        let mut rounds = 0;
        while state.table().read(2).is_some() {
            state.do_send_prep();
            rounds += 1;
            assert!(rounds <= 3);
        }
        assert_eq!(rounds, 3);
    }

    #[tokio::test]
    async fn test_no_ack_does_not_resurrect_failed_record() {
        let (mut state, _) = leader_state().await;
        state.ack(Member::alive(2, "127.0.0.1:5002", 3).with_status(MemberStatus::Failed, 1));
        state.no_ack(Member::alive(2, "127.0.0.1:5002", 3).with_status(MemberStatus::Suspect, 1));
        assert_eq!(state.table().read(2).unwrap().status, MemberStatus::Failed);
    }

    #[tokio::test]
    async fn test_no_ack_failed_leader_requests_election() {
        let (mut state, _) = leader_state().await;
        state.set_leader(LeaderRecord::new(2, "127.0.0.1:5002"), false);
        state.ack(Member::alive(2, "127.0.0.1:5002", 1));
        assert!(state.no_ack(
            Member::alive(2, "127.0.0.1:5002", 0).with_status(MemberStatus::Failed, 1)
        ));
        assert_eq!(state.table().read(2).unwrap().incarnation, 1);
    }

    #[tokio::test]
    async fn test_missed_ack_escalates_current_record() {
        let (mut state, _) = leader_state().await;
        state.ack(Member::alive(2, "127.0.0.1:5002", 1));
        let snapshot = state.do_send_prep().snapshot.read(2).cloned().unwrap();

        // gossip raised the suspicion while the round was in flight
        state.ack(Member::alive(2, "127.0.0.1:5002", 1).with_status(MemberStatus::Suspect, 2));

        let escalation = state.missed_ack(&snapshot).unwrap();
        assert_eq!(escalation.previous, MemberStatus::Suspect);
        assert_eq!(escalation.record.status_count, 3);
        assert!(!escalation.leader_failed);
        assert_eq!(state.table().read(2).unwrap().status_count, 3);
    }

    #[tokio::test]
    async fn test_missed_ack_fails_leader_past_threshold() {
        let (mut state, _) = leader_state().await;
        state.set_leader(LeaderRecord::new(2, "127.0.0.1:5002"), false);
        let target = Member::alive(2, "127.0.0.1:5002", 1);
        state.ack(target.clone());

        let mut last = None;
        for _ in 0..=state.failure_threshold {
            last = state.missed_ack(&target);
        }
        let last = last.unwrap();
        assert_eq!(last.record.status, MemberStatus::Failed);
        assert!(last.leader_failed);
    }

    #[tokio::test]
    async fn test_missed_ack_for_removed_process_is_ignored() {
        let (mut state, _) = leader_state().await;
        let target = Member::alive(2, "127.0.0.1:5002", 1);
        state.ack(target.clone());
        state.remove_member(2);
        assert!(state.missed_ack(&target).is_none());
        assert!(state.table().read(2).is_none());
    }

    #[tokio::test]
    async fn test_self_unreachable_stays_alive_with_rising_incarnation() {
        let (mut state, _) = leader_state().await;
        let first = state.self_unreachable();
        let second = state.self_unreachable();
        assert!(second > first);
        let me = state.table().read(1).unwrap();
        assert_eq!(me.status, MemberStatus::Alive);
        assert_eq!(me.incarnation, second);
    }

    #[tokio::test]
    async fn test_send_prep_excludes_gone_processes_but_snapshot_keeps_them() {
        let (mut state, _) = leader_state().await;
        state.ack(Member::alive(2, "127.0.0.1:5002", 1).with_status(MemberStatus::Suspect, 1));
        state.ack(Member::alive(3, "127.0.0.1:5003", 1).with_status(MemberStatus::Failed, 1));

        let prep = state.do_send_prep();
        let ids: Vec<_> = prep.targets.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(prep.snapshot.read(3).is_some());

        let msg = prep.message_for(MessageKind::Ping, "/ping", &prep.targets[1]);
        assert_eq!(msg.target_status, Some(MemberStatus::Suspect));
        assert!(msg.expect_response);
        assert!(msg.snapshot.is_some());
    }

    // ==================== Departure ====================

    #[tokio::test]
    async fn test_prepare_departure_marks_self_and_skips_self_target() {
        let (mut state, _) = leader_state().await;
        state.ack(Member::alive(2, "127.0.0.1:5002", 1));
        let before = state.my_incarnation();

        let prep = state.prepare_departure();
        assert_eq!(prep.source.incarnation, before + 1);
        assert_eq!(prep.targets.iter().map(|m| m.id).collect::<Vec<_>>(), vec![2]);
        assert_eq!(state.table().read(1).unwrap().status, MemberStatus::Departed);
    }

    #[tokio::test]
    async fn test_departing_leader_requests_election() {
        let (mut state, _) = leader_state().await;
        state.ack(Member::alive(2, "127.0.0.1:5002", 1));
        state.set_leader(LeaderRecord::new(2, "127.0.0.1:5002"), false);

        let msg = GroupMessage::new(MessageKind::Departing).from_source(2, "127.0.0.1:5002", 3);
        assert!(state.departing(&msg));
        assert_eq!(state.table().read(2).unwrap().status, MemberStatus::Departed);
    }

    #[tokio::test]
    async fn test_remove_member() {
        let (mut state, _) = leader_state().await;
        state.ack(Member::alive(2, "127.0.0.1:5002", 1));
        assert!(state.remove_member(2));
        assert!(!state.remove_member(2));
    }

    // ==================== Election ====================

    #[tokio::test]
    async fn test_highest_id_wins_and_announces() {
        let store = Arc::new(MemoryLeaderStore::new());
        let mut state = state_with(store.clone());
        state.join_ack(&{
            let mut r = GroupMessage::new(MessageKind::Ack);
            r.target_id = 3;
            r
        });
        state.set_leader(LeaderRecord::new(4, "127.0.0.1:5004"), false);
        state.ack(Member::alive(1, "127.0.0.1:5000", 1));
        state.ack(Member::alive(2, "127.0.0.1:5002", 1));
        state.ack(Member::alive(4, "127.0.0.1:5004", 1).with_status(MemberStatus::Failed, 1));

        let before = state.my_incarnation();
        match state.run_election().await.unwrap() {
            ElectionOutcome::Won {
                leader,
                incarnation,
                announce_to,
            } => {
                assert_eq!(leader, LeaderRecord::new(3, ME));
                assert_eq!(incarnation, before + 1);
                let ids: Vec<_> = announce_to.iter().map(|m| m.id).collect();
                assert_eq!(ids, vec![1, 2]);
            }
            other => panic!("Expected Won, got {:?}", other),
        }
        assert!(state.is_leader());
        assert!(!state.in_election());
        assert_eq!(store.get_leader().await.unwrap(), LeaderRecord::new(3, ME));
    }

    #[tokio::test]
    async fn test_lower_id_defers_to_higher_active_id() {
        let store = Arc::new(MemoryLeaderStore::new());
        let mut state = state_with(store.clone());
        state.join_ack(&{
            let mut r = GroupMessage::new(MessageKind::Ack);
            r.target_id = 2;
            r
        });
        state.ack(Member::alive(5, "127.0.0.1:5005", 1).with_status(MemberStatus::Suspect, 1));

        assert_eq!(
            state.run_election().await.unwrap(),
            ElectionOutcome::Deferred { top: 5 }
        );
        assert!(store.get_leader().await.unwrap().is_empty());
        assert!(!state.in_election());
    }

    #[tokio::test]
    async fn test_election_in_progress_is_noop() {
        let (mut state, store) = leader_state().await;
        store.set_leader(&LeaderRecord::new(9, "127.0.0.1:5009")).await.unwrap();
        state.set_election_state(true);
        let table_before = state.table().clone();
        let incarnation_before = state.my_incarnation();

        assert_eq!(
            state.run_election().await.unwrap(),
            ElectionOutcome::AlreadyRunning
        );
        assert_eq!(state.table(), &table_before);
        assert_eq!(state.my_incarnation(), incarnation_before);
        assert_eq!(
            store.get_leader().await.unwrap(),
            LeaderRecord::new(9, "127.0.0.1:5009")
        );
    }

    #[tokio::test]
    async fn test_election_store_failure_is_error() {
        let mut state = state_with(Arc::new(FailingStore));
        state.join_ack(&{
            let mut r = GroupMessage::new(MessageKind::Ack);
            r.target_id = 1;
            r
        });
        assert!(state.run_election().await.is_err());
        assert!(!state.in_election());
    }

    #[tokio::test]
    async fn test_unjoined_process_cannot_stand() {
        let mut state = state_with(Arc::new(MemoryLeaderStore::new()));
        assert_eq!(
            state.run_election().await.unwrap(),
            ElectionOutcome::NotJoined
        );
    }

    #[tokio::test]
    async fn test_leader_vacant_after_leader_fails() {
        let (mut state, _) = leader_state().await;
        assert!(!state.leader_vacant());
        state.ack(Member::alive(2, "127.0.0.1:5002", 1));
        state.set_leader(LeaderRecord::new(2, "127.0.0.1:5002"), false);
        assert!(!state.leader_vacant());
        state.no_ack(Member::alive(2, "127.0.0.1:5002", 1).with_status(MemberStatus::Failed, 1));
        assert!(state.leader_vacant());
    }

    #[tokio::test]
    async fn test_reset_identity_clears_membership() {
        let (mut state, _) = leader_state().await;
        state.self_unreachable();
        state.reset_identity(LeaderRecord::new(3, "127.0.0.1:5003"));
        assert_eq!(state.my_id(), 0);
        assert_eq!(state.my_incarnation(), 1);
        assert!(state.table().is_empty());
        assert_eq!(state.leader().id, 3);
    }
}
