//! Client calls for pushing cache changes into the group.
//!
//! The receiving member applies the delta and forwards it to every other
//! active member. Each call returns whether the receiver applied it.

use crate::transport::{self, Result};
use group_core::cache::{ActiveUserDelta, AuthDelta, CacheDelta, GroupAuthDelta, UsrGroupDelta};
use std::time::Duration;

async fn push<D: CacheDelta>(address: &str, mut delta: D, deadline: Duration) -> Result<bool> {
    delta.set_forward(true);
    transport::send_cache_update(address, &delta, deadline).await
}

pub async fn add_upd_usr_cache(address: &str, delta: ActiveUserDelta, deadline: Duration) -> Result<bool> {
    push(address, delta, deadline).await
}

pub async fn add_upd_group_auth_cache(
    address: &str,
    delta: GroupAuthDelta,
    deadline: Duration,
) -> Result<bool> {
    push(address, delta, deadline).await
}

pub async fn add_upd_auth_cache(address: &str, delta: AuthDelta, deadline: Duration) -> Result<bool> {
    push(address, delta, deadline).await
}

pub async fn add_upd_usr_group_cache(
    address: &str,
    delta: UsrGroupDelta,
    deadline: Duration,
) -> Result<bool> {
    push(address, delta, deadline).await
}
