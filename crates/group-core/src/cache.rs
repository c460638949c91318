//! Disseminated caches.
//!
//! Four application caches are kept consistent across the group by pushing
//! deltas to every active member:
//! - active users (user id -> active flag)
//! - group auths (group name -> auth name -> granted)
//! - auths (auth id -> auth name)
//! - usr groups (group id -> group name)
//!
//! The caches are touched directly by wire handlers on many connections, so
//! unlike the membership table each one sits behind its own read/write lock.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

pub const USR_CACHE_PATH: &str = "/updateusrcache";
pub const GROUP_AUTH_CACHE_PATH: &str = "/updategroupauthcache";
pub const AUTH_CACHE_PATH: &str = "/updateauthcache";
pub const USR_GROUP_CACHE_PATH: &str = "/updateusrgroupcache";

/// Entity operation that produced a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheOp {
    Create,
    Read,
    Update,
    Delete,
}

/// A cache delta that can be carried to other group members.
pub trait CacheDelta: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// Request path the delta is posted to.
    const PATH: &'static str;

    /// Whether the receiver should fan the delta out further.
    fn forward(&self) -> bool;

    fn set_forward(&mut self, forward: bool);
}

/// Active-user change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveUserDelta {
    pub forward: bool,
    pub id: u64,
    pub active: bool,
}

/// Group-auth change. Names are resolved by the receiver from its own
/// usr-group and auth caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAuthDelta {
    pub forward: bool,
    /// Id of the group-auth entity itself
    pub id: u64,
    pub group_name: String,
    pub auth_name: String,
    pub group_id: u64,
    pub auth_id: u64,
    pub op: CacheOp,
}

/// Auth change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthDelta {
    pub forward: bool,
    pub id: u64,
    pub auth_name: String,
    pub op: CacheOp,
}

/// Usr-group change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsrGroupDelta {
    pub forward: bool,
    pub id: u64,
    pub group_name: String,
    pub op: CacheOp,
}

macro_rules! impl_cache_delta {
    ($ty:ty, $path:expr) => {
        impl CacheDelta for $ty {
            const PATH: &'static str = $path;

            fn forward(&self) -> bool {
                self.forward
            }

            fn set_forward(&mut self, forward: bool) {
                self.forward = forward;
            }
        }
    };
}

impl_cache_delta!(ActiveUserDelta, USR_CACHE_PATH);
impl_cache_delta!(GroupAuthDelta, GROUP_AUTH_CACHE_PATH);
impl_cache_delta!(AuthDelta, AUTH_CACHE_PATH);
impl_cache_delta!(UsrGroupDelta, USR_GROUP_CACHE_PATH);

/// Active users cache.
#[derive(Debug, Clone, Default)]
pub struct ActiveUsers(Arc<RwLock<HashMap<u64, bool>>>);

impl ActiveUsers {
    pub async fn apply(&self, delta: &ActiveUserDelta) {
        self.0.write().await.insert(delta.id, delta.active);
    }

    pub async fn is_active(&self, id: u64) -> Option<bool> {
        self.0.read().await.get(&id).copied()
    }

    pub async fn snapshot(&self) -> HashMap<u64, bool> {
        self.0.read().await.clone()
    }
}

/// Group and auth names behind a group-auth id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupAuthNames {
    pub group_name: String,
    pub auth_name: String,
}

#[derive(Debug, Default)]
struct GroupAuthsInner {
    by_group: HashMap<String, HashMap<String, bool>>,
    by_id: HashMap<u64, GroupAuthNames>,
}

/// Group authorizations cache.
#[derive(Debug, Clone, Default)]
pub struct GroupAuths(Arc<RwLock<GroupAuthsInner>>);

impl GroupAuths {
    /// Apply a delta whose names are already resolved.
    pub async fn apply(&self, delta: &GroupAuthDelta) {
        let mut inner = self.0.write().await;
        match delta.op {
            CacheOp::Create | CacheOp::Update => {
                inner
                    .by_group
                    .entry(delta.group_name.clone())
                    .or_default()
                    .insert(delta.auth_name.clone(), true);
                inner.by_id.insert(
                    delta.id,
                    GroupAuthNames {
                        group_name: delta.group_name.clone(),
                        auth_name: delta.auth_name.clone(),
                    },
                );
            }
            CacheOp::Delete => {
                if let Some(auths) = inner.by_group.get_mut(&delta.group_name) {
                    auths.remove(&delta.auth_name);
                }
                inner.by_id.remove(&delta.id);
            }
            CacheOp::Read => {}
        }
    }

    /// Whether `group` currently holds `auth`.
    pub async fn has_auth(&self, group: &str, auth: &str) -> bool {
        self.0
            .read()
            .await
            .by_group
            .get(group)
            .and_then(|auths| auths.get(auth))
            .copied()
            .unwrap_or(false)
    }

    /// Names recorded for a group-auth id.
    pub async fn names(&self, id: u64) -> Option<GroupAuthNames> {
        self.0.read().await.by_id.get(&id).cloned()
    }
}

/// Auth names cache.
#[derive(Debug, Clone, Default)]
pub struct Auths(Arc<RwLock<HashMap<u64, String>>>);

impl Auths {
    pub async fn apply(&self, delta: &AuthDelta) {
        let mut auths = self.0.write().await;
        match delta.op {
            CacheOp::Create | CacheOp::Update => {
                auths.insert(delta.id, delta.auth_name.clone());
            }
            CacheOp::Delete => {
                auths.remove(&delta.id);
            }
            CacheOp::Read => {}
        }
    }

    pub async fn name(&self, id: u64) -> Option<String> {
        self.0.read().await.get(&id).cloned()
    }
}

/// Usr-group names cache.
#[derive(Debug, Clone, Default)]
pub struct UsrGroups(Arc<RwLock<HashMap<u64, String>>>);

impl UsrGroups {
    pub async fn apply(&self, delta: &UsrGroupDelta) {
        let mut groups = self.0.write().await;
        match delta.op {
            CacheOp::Create | CacheOp::Update => {
                groups.insert(delta.id, delta.group_name.clone());
            }
            CacheOp::Delete => {
                groups.remove(&delta.id);
            }
            CacheOp::Read => {}
        }
    }

    pub async fn name(&self, id: u64) -> Option<String> {
        self.0.read().await.get(&id).cloned()
    }
}

/// Handles to all four caches. Cloning shares the underlying maps.
#[derive(Debug, Clone, Default)]
pub struct Caches {
    pub active_users: ActiveUsers,
    pub group_auths: GroupAuths,
    pub auths: Auths,
    pub usr_groups: UsrGroups,
}

impl Caches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the group and auth names of `delta` from the local caches and
    /// apply it.
    ///
    /// Deletes fall back to the names recorded under the group-auth id.
    /// Returns false, leaving the cache untouched, if the names cannot be
    /// resolved.
    pub async fn apply_group_auth(&self, delta: &mut GroupAuthDelta) -> bool {
        let group_name = self.usr_groups.name(delta.group_id).await;
        let auth_name = self.auths.name(delta.auth_id).await;

        match (group_name, auth_name) {
            (Some(group), Some(auth)) if !group.is_empty() && !auth.is_empty() => {
                delta.group_name = group;
                delta.auth_name = auth;
            }
            (group, auth) => {
                let recorded = match delta.op {
                    CacheOp::Delete => self.group_auths.names(delta.id).await,
                    _ => None,
                };
                match recorded {
                    Some(names) => {
                        delta.group_name = names.group_name;
                        delta.auth_name = names.auth_name;
                    }
                    None => {
                        warn!(
                            "Could not update group auth cache with GroupName: {:?} and AuthName: {:?}",
                            group, auth
                        );
                        return false;
                    }
                }
            }
        }

        self.group_auths.apply(delta).await;
        true
    }
}
