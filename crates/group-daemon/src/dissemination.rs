//! Cache dissemination.
//!
//! A delta is applied to the local caches first and then pushed, with
//! `forward` cleared, to every other active process. Receivers apply it and
//! stop there, so each delta crosses the group exactly once.

use crate::transport;
use async_trait::async_trait;
use futures::future::join_all;
use group_core::cache::{ActiveUserDelta, AuthDelta, CacheDelta, Caches, GroupAuthDelta, UsrGroupDelta};
use group_core::command::GroupHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Apply a delta to the matching local cache.
#[async_trait]
pub trait LocalApply: CacheDelta {
    /// Returns false if the delta could not be applied.
    async fn apply_local(&mut self, caches: &Caches) -> bool;
}

#[async_trait]
impl LocalApply for ActiveUserDelta {
    async fn apply_local(&mut self, caches: &Caches) -> bool {
        caches.active_users.apply(self).await;
        true
    }
}

#[async_trait]
impl LocalApply for GroupAuthDelta {
    async fn apply_local(&mut self, caches: &Caches) -> bool {
        caches.apply_group_auth(self).await
    }
}

#[async_trait]
impl LocalApply for AuthDelta {
    async fn apply_local(&mut self, caches: &Caches) -> bool {
        caches.auths.apply(self).await;
        true
    }
}

#[async_trait]
impl LocalApply for UsrGroupDelta {
    async fn apply_local(&mut self, caches: &Caches) -> bool {
        caches.usr_groups.apply(self).await;
        true
    }
}

/// Applies deltas locally and fans them out to the group.
#[derive(Debug, Clone)]
pub struct CacheBridge {
    group: GroupHandle,
    caches: Caches,
    request_timeout: Duration,
}

impl CacheBridge {
    pub fn new(group: GroupHandle, caches: Caches, request_timeout: Duration) -> Self {
        Self {
            group,
            caches,
            request_timeout,
        }
    }

    pub fn caches(&self) -> &Caches {
        &self.caches
    }

    /// Apply a locally originated delta and send it to every other process.
    ///
    /// Returns false, without sending anything, if the local apply failed.
    pub async fn publish<D: LocalApply>(&self, mut delta: D) -> bool {
        if !delta.apply_local(&self.caches).await {
            return false;
        }
        delta.set_forward(false);
        self.fan_out(&delta).await;
        true
    }

    /// Apply a delta received on the wire.
    ///
    /// A delta with `forward` set is passed on to the rest of the group
    /// before this returns, so a sender that waits for the reply knows every
    /// reachable peer has seen it. Deltas from one sender therefore reach each
    /// peer in the order they were sent.
    pub async fn receive<D: LocalApply>(&self, mut delta: D) -> bool {
        let forward = delta.forward();
        if !delta.apply_local(&self.caches).await {
            return false;
        }
        if forward {
            delta.set_forward(false);
            self.fan_out(&delta).await;
        }
        true
    }

    /// Send `delta` as-is to every active process except this one.
    pub async fn fan_out<D: CacheDelta>(&self, delta: &D) {
        let details = match self.group.local_details().await {
            Ok(details) => details,
            Err(e) => {
                debug!("Cannot read membership for dissemination: {}", e);
                return;
            }
        };

        let peers = details.active_peers();
        let sends = peers.iter().map(|peer| async move {
            let result = transport::send_cache_update(&peer.address, delta, self.request_timeout).await;
            (peer, result)
        });

        for (peer, result) in join_all(sends).await {
            match result {
                Ok(true) => {}
                Ok(false) => warn!("Process {} refused {} update", peer.id, D::PATH),
                Err(e) => warn!("Failed to send {} update to process {}: {}", D::PATH, peer.id, e),
            }
        }
        debug!("Sent {} update to {} process(es)", D::PATH, peers.len());
    }
}
