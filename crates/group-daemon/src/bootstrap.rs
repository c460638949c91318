//! Startup join sequence.
//!
//! A starting process looks up the persisted leader and asks it for an id.
//! If no usable leader is ever found, or the only leader on record cannot be
//! reached, the process founds the group itself as process 1.

use crate::senders::Pinger;
use group_core::command::GroupHandle;
use group_core::config::JoinPolicy;
use group_core::{GroupError, JoinError, LeaderRecord, ProtocolErrorCode};
use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Unable to join group: {0}")]
    Join(#[from] JoinError),

    #[error(transparent)]
    Group(#[from] GroupError),
}

/// Random backoff in `[0, max]`.
pub fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

/// Join the group or found it.
pub async fn join_or_found(
    group: &GroupHandle,
    pinger: &Pinger,
    policy: &JoinPolicy,
) -> Result<(), BootstrapError> {
    let me = group.src_info().await?;
    let mut last_err: Option<JoinError> = None;

    for attempt in 1..=policy.attempts {
        let Some(leader) = read_leader(group, &me.address, policy).await else {
            // nobody left to contact; earlier refusals no longer apply
            last_err = None;
            break;
        };

        group.set_leader(leader.clone(), false).await?;
        match pinger.send_join(&leader).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() => {
                info!("Join attempt {} through {} failed: {}", attempt, leader, e);
                last_err = Some(e);
                tokio::time::sleep(jitter(policy.max_jitter)).await;
            }
            Err(e) => {
                warn!("Join attempt {} through {} failed: {}", attempt, leader, e);
                last_err = Some(e);
                tokio::time::sleep(policy.hard_backoff).await;
            }
        }
    }

    match last_err {
        Some(e) if e.code != ProtocolErrorCode::JoinNoContact => Err(e.into()),
        Some(e) => {
            info!("Persisted leader unreachable ({}); founding group", e);
            found(group).await
        }
        None => {
            info!("No leader on record; founding group");
            found(group).await
        }
    }
}

async fn found(group: &GroupHandle) -> Result<(), BootstrapError> {
    group.reset_identity(LeaderRecord::default()).await?;
    group.seize_leadership().await?;
    info!("Process 1 leads the group");
    Ok(())
}

/// Read the persisted leader, ignoring records that point at this process.
async fn read_leader(group: &GroupHandle, own_address: &str, policy: &JoinPolicy) -> Option<LeaderRecord> {
    for read in 1..=policy.leader_reads {
        match group.get_db_leader().await {
            Ok(leader) if leader.is_empty() => {
                debug!("No persisted leader (read {})", read);
            }
            Ok(leader) if leader.address == own_address => {
                debug!("Persisted leader {} is this address; ignoring", leader);
            }
            Ok(leader) => return Some(leader),
            Err(e) => warn!("Failed to read persisted leader: {}", e),
        }
        tokio::time::sleep(jitter(policy.max_jitter)).await;
    }
    None
}
