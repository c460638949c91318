//! Ordered membership table.
//!
//! The table is the core data structure of the failure detector. It keeps:
//! - An explicit id list that defines ring order for neighbour selection
//! - An id to record map holding status, status count and incarnation
//!
//! Every id in the list has a map entry and vice versa. The table is owned
//! by the command loop; everything else sees deep copies.

use crate::error::{GroupError, Result};
use crate::member::{Member, MemberStatus, ProcessId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Insertion-ordered map from process id to process record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipTable {
    /// Ring order
    ids: Vec<ProcessId>,
    /// Records indexed by id
    members: HashMap<ProcessId, Member>,
}

impl MembershipTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the record for `id`.
    ///
    /// A new id is appended to the ring. Incarnation zero and id zero are
    /// caller bugs and are rejected.
    pub fn add(&mut self, id: ProcessId, mut member: Member) -> Result<()> {
        if id == 0 {
            return Err(GroupError::MissingId);
        }
        if member.incarnation == 0 {
            return Err(GroupError::ZeroIncarnation(id));
        }
        member.id = id;
        if !self.members.contains_key(&id) {
            self.ids.push(id);
        }
        self.members.insert(id, member);
        Ok(())
    }

    /// Insert a record under a freshly allocated id of `max(id) + 1`.
    ///
    /// The allocated id is written back into `member` and returned.
    pub fn add_without_id(&mut self, member: &mut Member) -> Result<ProcessId> {
        if member.id != 0 {
            return Err(GroupError::IdAlreadyAssigned(member.id));
        }
        if member.incarnation == 0 {
            return Err(GroupError::ZeroIncarnation(0));
        }

        let id = self.ids.iter().copied().max().unwrap_or(0) + 1;
        member.id = id;
        self.ids.push(id);
        self.members.insert(id, member.clone());
        debug!("Allocated process id {} for {}", id, member.address);
        Ok(id)
    }

    /// Read a record by id.
    pub fn read(&self, id: ProcessId) -> Option<&Member> {
        self.members.get(&id)
    }

    /// Read the record at ring position `idx`.
    pub fn read_by_index(&self, idx: usize) -> Option<&Member> {
        self.ids.get(idx).and_then(|id| self.members.get(id))
    }

    /// All records in ring order, irrespective of status.
    pub fn read_all(&self) -> Vec<Member> {
        self.iter().cloned().collect()
    }

    /// All records registered at `address`.
    ///
    /// Linear scan; the leader uses this at join time to refuse an address
    /// that is still held by a live or suspect process.
    pub fn read_by_address(&self, address: &str) -> Vec<&Member> {
        self.iter().filter(|m| m.address == address).collect()
    }

    /// Alive and suspect records in ring order.
    pub fn read_active_process_list(&self) -> Vec<Member> {
        self.iter()
            .filter(|m| m.status.is_active())
            .cloned()
            .collect()
    }

    /// The record clockwise of `id` in the ring, wrapping at the end.
    ///
    /// A lone member is its own neighbour. Returns `None` if `id` is unknown.
    pub fn read_cw_neighbour(&self, id: ProcessId) -> Option<&Member> {
        let idx = self.ids.iter().position(|v| *v == id)?;
        let next = (idx + 1) % self.ids.len();
        self.read_by_index(next)
    }

    /// The highest-id alive or suspect record. Basis of the bully election.
    pub fn read_max_active_id(&self) -> Option<&Member> {
        self.iter()
            .filter(|m| m.status.is_active())
            .max_by_key(|m| m.id)
    }

    /// The lowest-id alive or suspect record.
    pub fn read_min_active_id(&self) -> Option<&Member> {
        self.iter()
            .filter(|m| m.status.is_active())
            .min_by_key(|m| m.id)
    }

    /// Merge the gossip snapshot `incoming` received from `sender_id`.
    ///
    /// Records for the local process and the sender are skipped; both are
    /// handled by the ping processor directly. Returns true if a record that
    /// became failed or departed during this merge is the believed leader.
    pub fn upd_from_ping(
        &mut self,
        local_id: ProcessId,
        sender_id: ProcessId,
        incoming: &MembershipTable,
        failure_threshold: u64,
        leader_id: ProcessId,
    ) -> bool {
        let mut check_election = false;

        for v in incoming.iter() {
            if v.id == sender_id || v.id == local_id {
                continue;
            }

            let Some(w) = self.members.get_mut(&v.id) else {
                if v.status.is_active() {
                    let mut fresh = v.clone();
                    fresh.status_count = 1;
                    if let Err(e) = self.add(v.id, fresh) {
                        debug!("Skipping gossip record {}: {}", v.id, e);
                    }
                }
                continue;
            };

            // failed and departed are terminal
            if w.status.is_gone() {
                continue;
            }

            match v.status {
                MemberStatus::Failed | MemberStatus::Departed => {
                    w.status = v.status;
                    w.status_count = 1;
                    info!("Gossip marks process {} as {}", w.id, v.status);
                    if leader_id == v.id {
                        check_election = true;
                    }
                }
                MemberStatus::Suspect => {
                    if v.incarnation < w.incarnation {
                        continue;
                    }
                    match w.status {
                        MemberStatus::Alive => {
                            w.status = MemberStatus::Suspect;
                            w.status_count = 1;
                            w.incarnation = v.incarnation;
                        }
                        MemberStatus::Suspect => {
                            w.status_count += 1;
                            if w.status_count > failure_threshold {
                                w.status = MemberStatus::Failed;
                                w.status_count = 1;
                                info!("Suspect process {} promoted to FAILED by gossip", w.id);
                                if leader_id == v.id {
                                    check_election = true;
                                }
                            } else {
                                w.incarnation = w.incarnation.max(v.incarnation);
                            }
                        }
                        MemberStatus::Failed | MemberStatus::Departed => {}
                    }
                }
                MemberStatus::Alive => {
                    if v.incarnation < w.incarnation {
                        continue;
                    }
                    match w.status {
                        MemberStatus::Alive => {
                            w.status_count += 1;
                            w.incarnation = v.incarnation;
                        }
                        MemberStatus::Suspect => {
                            if v.incarnation > w.incarnation {
                                w.status = MemberStatus::Alive;
                                w.status_count = 1;
                                w.incarnation = v.incarnation;
                            }
                        }
                        MemberStatus::Failed | MemberStatus::Departed => {}
                    }
                }
            }
        }
        check_election
    }

    /// Mark a departing process as departed.
    ///
    /// Unknown processes and records that are already failed or departed
    /// are left alone. Returns true if the departing process is the leader.
    pub fn upd_from_departing(&mut self, departing: &Member, leader_id: ProcessId) -> bool {
        let Some(w) = self.members.get_mut(&departing.id) else {
            return false;
        };
        if w.status.is_gone() {
            return false;
        }
        w.status = MemberStatus::Departed;
        w.status_count = 1;
        w.incarnation = w.incarnation.max(departing.incarnation);
        info!("Process {} set to DEPARTED", departing.id);
        leader_id == departing.id
    }

    /// Advance the dissemination count of failed and departed records.
    ///
    /// A record whose count has reached `2N - 1` (N = table size on entry)
    /// is removed instead. Returns the removed ids.
    pub fn upd_failed_departed_processes(&mut self) -> Vec<ProcessId> {
        let limit = (self.count() as u64 * 2).saturating_sub(1);
        let mut removed = Vec::new();

        for id in self.ids.clone() {
            let Some(m) = self.members.get_mut(&id) else {
                continue;
            };
            if m.status.is_active() {
                continue;
            }
            if m.status_count >= limit {
                removed.push(id);
            } else {
                m.status_count += 1;
            }
        }

        for id in &removed {
            self.delete(*id);
            debug!("Removed process {} after dissemination", id);
        }
        removed
    }

    /// Delete a record by id. Returns false if the id is unknown.
    pub fn delete(&mut self, id: ProcessId) -> bool {
        match self.ids.iter().position(|v| *v == id) {
            Some(idx) => self.delete_by_index(idx),
            None => false,
        }
    }

    /// Delete the record at ring position `idx`.
    pub fn delete_by_index(&mut self, idx: usize) -> bool {
        if idx >= self.ids.len() {
            return false;
        }
        let id = self.ids.remove(idx);
        self.members.remove(&id);
        true
    }

    /// Remove every record.
    pub fn flush(&mut self) -> bool {
        self.ids.clear();
        self.members.clear();
        true
    }

    /// Number of records.
    pub fn count(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Records in ring order.
    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.ids.iter().filter_map(|id| self.members.get(id))
    }

    /// Ids in ring order.
    pub fn ids(&self) -> &[ProcessId] {
        &self.ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: ProcessId, status: MemberStatus, count: u64, incarnation: u64) -> Member {
        Member {
            id,
            address: format!("127.0.0.1:{}", 5000 + id),
            status,
            status_count: count,
            incarnation,
        }
    }

    fn table(members: &[Member]) -> MembershipTable {
        let mut t = MembershipTable::new();
        for m in members {
            t.add(m.id, m.clone()).unwrap();
        }
        t
    }

    // ==================== Insertion ====================

    #[test]
    fn test_add_appends_new_ids_in_order() {
        let t = table(&[
            member(3, MemberStatus::Alive, 1, 1),
            member(1, MemberStatus::Alive, 1, 1),
        ]);
        assert_eq!(t.ids(), &[3, 1]);
        assert_eq!(t.count(), 2);
    }

    #[test]
    fn test_add_overwrite_keeps_position() {
        let mut t = table(&[
            member(1, MemberStatus::Alive, 1, 1),
            member(2, MemberStatus::Alive, 1, 1),
        ]);
        t.add(1, member(1, MemberStatus::Suspect, 1, 4)).unwrap();
        assert_eq!(t.ids(), &[1, 2]);
        assert_eq!(t.read(1).unwrap().status, MemberStatus::Suspect);
        assert_eq!(t.read(1).unwrap().incarnation, 4);
    }

    #[test]
    fn test_add_rejects_zero_incarnation() {
        let mut t = MembershipTable::new();
        let err = t.add(1, member(1, MemberStatus::Alive, 1, 0)).unwrap_err();
        assert!(matches!(err, GroupError::ZeroIncarnation(1)));
        assert!(t.is_empty());
    }

    #[test]
    fn test_add_rejects_zero_id() {
        let mut t = MembershipTable::new();
        assert!(matches!(
            t.add(0, member(0, MemberStatus::Alive, 1, 1)),
            Err(GroupError::MissingId)
        ));
    }

    #[test]
    fn test_add_without_id_on_empty_table_assigns_one() {
        let mut t = MembershipTable::new();
        let mut m = member(0, MemberStatus::Alive, 1, 1);
        assert_eq!(t.add_without_id(&mut m).unwrap(), 1);
        assert_eq!(m.id, 1);
        assert_eq!(t.read(1).unwrap().id, 1);
    }

    #[test]
    fn test_add_without_id_uses_max_plus_one() {
        let mut t = table(&[
            member(4, MemberStatus::Alive, 1, 1),
            member(2, MemberStatus::Failed, 1, 1),
        ]);
        let mut m = member(0, MemberStatus::Alive, 1, 1);
        assert_eq!(t.add_without_id(&mut m).unwrap(), 5);
        assert_eq!(t.ids(), &[4, 2, 5]);
    }

    #[test]
    fn test_add_without_id_rejects_numbered_record() {
        let mut t = MembershipTable::new();
        let mut m = member(7, MemberStatus::Alive, 1, 1);
        assert!(matches!(
            t.add_without_id(&mut m),
            Err(GroupError::IdAlreadyAssigned(7))
        ));
    }

    // ==================== Reads ====================

    #[test]
    fn test_cw_neighbour_wraps() {
        let t = table(&[
            member(1, MemberStatus::Alive, 1, 1),
            member(2, MemberStatus::Alive, 1, 1),
            member(3, MemberStatus::Alive, 1, 1),
        ]);
        assert_eq!(t.read_cw_neighbour(1).unwrap().id, 2);
        assert_eq!(t.read_cw_neighbour(3).unwrap().id, 1);
        assert!(t.read_cw_neighbour(9).is_none());
    }

    #[test]
    fn test_cw_neighbour_of_lone_member_is_itself() {
        let t = table(&[member(1, MemberStatus::Alive, 1, 1)]);
        assert_eq!(t.read_cw_neighbour(1).unwrap().id, 1);
    }

    #[test]
    fn test_max_and_min_active_skip_gone_records() {
        let t = table(&[
            member(2, MemberStatus::Suspect, 1, 1),
            member(5, MemberStatus::Failed, 1, 1),
            member(1, MemberStatus::Departed, 1, 1),
            member(3, MemberStatus::Alive, 1, 1),
        ]);
        assert_eq!(t.read_max_active_id().unwrap().id, 3);
        assert_eq!(t.read_max_active_id().unwrap().id, 3);
        assert_eq!(t.read_min_active_id().unwrap().id, 2);
    }

    #[test]
    fn test_max_active_on_all_failed_is_none() {
        let t = table(&[member(1, MemberStatus::Failed, 1, 1)]);
        assert!(t.read_max_active_id().is_none());
        assert!(MembershipTable::new().read_max_active_id().is_none());
    }

    #[test]
    fn test_read_by_address_and_active_list() {
        let mut dup = member(4, MemberStatus::Failed, 1, 1);
        dup.address = "127.0.0.1:5001".into();
        let t = table(&[
            member(1, MemberStatus::Alive, 1, 1),
            member(2, MemberStatus::Departed, 1, 1),
            dup,
        ]);
        let by_addr = t.read_by_address("127.0.0.1:5001");
        assert_eq!(by_addr.len(), 2);
        let active: Vec<_> = t.read_active_process_list().iter().map(|m| m.id).collect();
        assert_eq!(active, vec![1]);
    }

    #[test]
    fn test_read_by_index_out_of_range() {
        let t = table(&[member(1, MemberStatus::Alive, 1, 1)]);
        assert!(t.read_by_index(0).is_some());
        assert!(t.read_by_index(1).is_none());
    }

    // ==================== Deletion ====================

    #[test]
    fn test_delete_keeps_list_and_map_in_step() {
        let mut t = table(&[
            member(1, MemberStatus::Alive, 1, 1),
            member(2, MemberStatus::Alive, 1, 1),
            member(3, MemberStatus::Alive, 1, 1),
        ]);
        assert!(t.delete(2));
        assert!(!t.delete(2));
        assert_eq!(t.ids(), &[1, 3]);
        assert!(t.read(2).is_none());
        assert!(t.delete_by_index(0));
        assert_eq!(t.ids(), &[3]);
        assert!(!t.delete_by_index(4));
    }

    #[test]
    fn test_flush_empties_table() {
        let mut t = table(&[
            member(1, MemberStatus::Alive, 1, 1),
            member(2, MemberStatus::Alive, 1, 1),
        ]);
        assert!(t.flush());
        assert!(t.is_empty());
        assert!(t.read(1).is_none());
    }

    // ==================== Failed / departed pruning ====================

    #[test]
    fn test_failed_record_removed_after_two_n_minus_one_rounds() {
        let mut t = table(&[
            member(1, MemberStatus::Alive, 1, 1),
            member(2, MemberStatus::Failed, 1, 1),
            member(3, MemberStatus::Alive, 1, 1),
        ]);
        for round in 1..=4 {
            assert!(t.upd_failed_departed_processes().is_empty(), "round {}", round);
            assert!(t.read(2).is_some(), "round {}", round);
        }
        assert_eq!(t.upd_failed_departed_processes(), vec![2]);
        assert!(t.read(2).is_none());
        assert_eq!(t.ids(), &[1, 3]);
    }

    #[test]
    fn test_pruning_leaves_active_counts_alone() {
        let mut t = table(&[
            member(1, MemberStatus::Alive, 7, 1),
            member(2, MemberStatus::Departed, 1, 1),
        ]);
        t.upd_failed_departed_processes();
        assert_eq!(t.read(1).unwrap().status_count, 7);
        assert_eq!(t.read(2).unwrap().status_count, 2);
    }

    // ==================== Departing ====================

    #[test]
    fn test_departing_marks_record_and_flags_leader() {
        let mut t = table(&[
            member(1, MemberStatus::Alive, 3, 1),
            member(2, MemberStatus::Alive, 3, 2),
        ]);
        let leaving = member(2, MemberStatus::Departed, 1, 4);
        assert!(t.upd_from_departing(&leaving, 2));
        let r = t.read(2).unwrap();
        assert_eq!(r.status, MemberStatus::Departed);
        assert_eq!(r.status_count, 1);
        assert_eq!(r.incarnation, 4);

        // already departed
        assert!(!t.upd_from_departing(&leaving, 2));
    }

    #[test]
    fn test_departing_unknown_process_is_ignored() {
        let mut t = table(&[member(1, MemberStatus::Alive, 1, 1)]);
        assert!(!t.upd_from_departing(&member(8, MemberStatus::Departed, 1, 1), 8));
        assert_eq!(t.count(), 1);
    }

    // ==================== Gossip merge ====================

    #[test]
    fn test_merge_inserts_unknown_active_records_with_count_one() {
        let mut local = table(&[member(1, MemberStatus::Alive, 1, 1)]);
        let incoming = table(&[
            member(2, MemberStatus::Alive, 9, 3),
            member(3, MemberStatus::Suspect, 4, 1),
            member(4, MemberStatus::Failed, 1, 1),
            member(5, MemberStatus::Departed, 1, 1),
        ]);
        let elect = local.upd_from_ping(1, 9, &incoming, 5, 1);
        assert!(!elect);
        assert_eq!(local.read(2).unwrap().status_count, 1);
        assert_eq!(local.read(2).unwrap().incarnation, 3);
        assert_eq!(local.read(3).unwrap().status, MemberStatus::Suspect);
        assert!(local.read(4).is_none());
        assert!(local.read(5).is_none());
    }

    #[test]
    fn test_merge_skips_self_and_sender() {
        let mut local = table(&[
            member(1, MemberStatus::Alive, 1, 1),
            member(2, MemberStatus::Alive, 1, 1),
        ]);
        let incoming = table(&[
            member(1, MemberStatus::Failed, 1, 9),
            member(2, MemberStatus::Failed, 1, 9),
        ]);
        local.upd_from_ping(1, 2, &incoming, 5, 0);
        assert_eq!(local.read(1).unwrap().status, MemberStatus::Alive);
        assert_eq!(local.read(2).unwrap().status, MemberStatus::Alive);
    }

    #[test]
    fn test_merge_gone_records_are_immutable() {
        let mut local = table(&[
            member(1, MemberStatus::Alive, 1, 1),
            member(3, MemberStatus::Failed, 2, 1),
        ]);
        let incoming = table(&[member(3, MemberStatus::Alive, 1, 50)]);
        local.upd_from_ping(1, 2, &incoming, 5, 0);
        let r = local.read(3).unwrap();
        assert_eq!(r.status, MemberStatus::Failed);
        assert_eq!(r.incarnation, 1);
    }

    #[test]
    fn test_merge_incoming_failed_flags_election_for_leader() {
        let mut local = table(&[
            member(1, MemberStatus::Alive, 1, 1),
            member(3, MemberStatus::Alive, 5, 2),
        ]);
        let incoming = table(&[member(3, MemberStatus::Failed, 1, 2)]);
        assert!(local.upd_from_ping(1, 2, &incoming, 5, 3));
        assert_eq!(local.read(3).unwrap().status, MemberStatus::Failed);
        assert_eq!(local.read(3).unwrap().status_count, 1);
    }

    #[test]
    fn test_merge_incoming_departed_non_leader_no_election() {
        let mut local = table(&[
            member(1, MemberStatus::Alive, 1, 1),
            member(3, MemberStatus::Suspect, 2, 2),
        ]);
        let incoming = table(&[member(3, MemberStatus::Departed, 1, 2)]);
        assert!(!local.upd_from_ping(1, 2, &incoming, 5, 1));
        assert_eq!(local.read(3).unwrap().status, MemberStatus::Departed);
    }

    #[test]
    fn test_merge_stale_suspect_is_ignored() {
        let mut local = table(&[member(3, MemberStatus::Alive, 4, 6)]);
        let incoming = table(&[member(3, MemberStatus::Suspect, 1, 5)]);
        local.upd_from_ping(1, 2, &incoming, 5, 0);
        let r = local.read(3).unwrap();
        assert_eq!(r.status, MemberStatus::Alive);
        assert_eq!(r.status_count, 4);
    }

    #[test]
    fn test_merge_suspect_over_alive_adopts_higher_incarnation() {
        let mut local = table(&[member(3, MemberStatus::Alive, 4, 6)]);
        let incoming = table(&[member(3, MemberStatus::Suspect, 1, 8)]);
        local.upd_from_ping(1, 2, &incoming, 5, 0);
        let r = local.read(3).unwrap();
        assert_eq!(r.status, MemberStatus::Suspect);
        assert_eq!(r.status_count, 1);
        assert_eq!(r.incarnation, 8);
    }

    #[test]
    fn test_merge_suspect_escalates_to_failed_past_threshold() {
        let mut local = table(&[
            member(1, MemberStatus::Alive, 1, 1),
            member(5, MemberStatus::Suspect, 3, 10),
        ]);
        let incoming = table(&[member(5, MemberStatus::Suspect, 1, 10)]);

        assert!(!local.upd_from_ping(1, 2, &incoming, 5, 5));
        assert_eq!(local.read(5).unwrap().status_count, 4);
        assert_eq!(local.read(5).unwrap().status, MemberStatus::Suspect);

        assert!(!local.upd_from_ping(1, 2, &incoming, 5, 5));
        assert_eq!(local.read(5).unwrap().status_count, 5);
        assert_eq!(local.read(5).unwrap().status, MemberStatus::Suspect);

        assert!(local.upd_from_ping(1, 2, &incoming, 5, 5));
        assert_eq!(local.read(5).unwrap().status, MemberStatus::Failed);
        assert_eq!(local.read(5).unwrap().status_count, 1);
    }

    #[test]
    fn test_merge_alive_refreshes_alive_record() {
        let mut local = table(&[member(3, MemberStatus::Alive, 2, 4)]);
        let incoming = table(&[member(3, MemberStatus::Alive, 1, 4)]);
        local.upd_from_ping(1, 2, &incoming, 5, 0);
        assert_eq!(local.read(3).unwrap().status_count, 3);
        assert_eq!(local.read(3).unwrap().incarnation, 4);
    }

    #[test]
    fn test_merge_alive_needs_higher_incarnation_to_clear_suspicion() {
        let mut local = table(&[member(3, MemberStatus::Suspect, 2, 4)]);

        let same = table(&[member(3, MemberStatus::Alive, 1, 4)]);
        local.upd_from_ping(1, 2, &same, 5, 0);
        assert_eq!(local.read(3).unwrap().status, MemberStatus::Suspect);

        let newer = table(&[member(3, MemberStatus::Alive, 1, 5)]);
        local.upd_from_ping(1, 2, &newer, 5, 0);
        let r = local.read(3).unwrap();
        assert_eq!(r.status, MemberStatus::Alive);
        assert_eq!(r.status_count, 1);
        assert_eq!(r.incarnation, 5);
    }

    #[test]
    fn test_merge_never_lowers_incarnation() {
        let mut local = table(&[member(3, MemberStatus::Alive, 2, 9)]);
        let incoming = table(&[member(3, MemberStatus::Alive, 1, 2)]);
        local.upd_from_ping(1, 2, &incoming, 5, 0);
        assert_eq!(local.read(3).unwrap().incarnation, 9);
    }

    #[test]
    fn test_merge_twice_leaves_statuses_and_incarnations_unchanged() {
        let mut local = table(&[
            member(1, MemberStatus::Alive, 1, 1),
            member(3, MemberStatus::Alive, 2, 4),
            member(4, MemberStatus::Suspect, 1, 2),
        ]);
        let incoming = table(&[
            member(3, MemberStatus::Alive, 1, 6),
            member(4, MemberStatus::Alive, 1, 3),
            member(6, MemberStatus::Alive, 1, 1),
        ]);

        local.upd_from_ping(1, 2, &incoming, 5, 0);
        let first: Vec<_> = local
            .iter()
            .map(|m| (m.id, m.status, m.incarnation))
            .collect();

        local.upd_from_ping(1, 2, &incoming, 5, 0);
        let second: Vec<_> = local
            .iter()
            .map(|m| (m.id, m.status, m.incarnation))
            .collect();

        assert_eq!(first, second);
    }

    #[test]
    fn test_snapshot_is_independent_copy() {
        let mut t = table(&[member(1, MemberStatus::Alive, 1, 1)]);
        let snapshot = t.clone();
        t.add(1, member(1, MemberStatus::Suspect, 1, 2)).unwrap();
        assert_eq!(snapshot.read(1).unwrap().status, MemberStatus::Alive);
    }
}
