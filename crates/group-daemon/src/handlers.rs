//! Inbound request handlers.
//!
//! Each connection is bound to one [`Route`] by its request path. Frames that
//! fail to decode, or whose kind does not belong on the route, are logged and
//! dropped without a reply.

use crate::dissemination::{CacheBridge, LocalApply};
use crate::senders::Pinger;
use group_core::cache::{
    ActiveUserDelta, AuthDelta, GroupAuthDelta, UsrGroupDelta, AUTH_CACHE_PATH,
    GROUP_AUTH_CACHE_PATH, USR_CACHE_PATH, USR_GROUP_CACHE_PATH,
};
use group_core::command::GroupHandle;
use group_core::message::{
    decode_bounded, COORDINATOR_PATH, DEPARTING_PATH, JOIN_PATH, PING_PATH,
};
use group_core::{GroupMessage, LeaderRecord, MessageKind, ProtocolErrorCode};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Request paths served by a group member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Ping,
    Join,
    Departing,
    Coordinator,
    UsrCache,
    GroupAuthCache,
    AuthCache,
    UsrGroupCache,
}

impl Route {
    pub fn from_path(path: &str) -> Option<Self> {
        match path {
            PING_PATH => Some(Route::Ping),
            JOIN_PATH => Some(Route::Join),
            DEPARTING_PATH => Some(Route::Departing),
            COORDINATOR_PATH => Some(Route::Coordinator),
            USR_CACHE_PATH => Some(Route::UsrCache),
            GROUP_AUTH_CACHE_PATH => Some(Route::GroupAuthCache),
            AUTH_CACHE_PATH => Some(Route::AuthCache),
            USR_GROUP_CACHE_PATH => Some(Route::UsrGroupCache),
            _ => None,
        }
    }
}

/// Handlers shared by all inbound connections.
#[derive(Debug, Clone)]
pub struct Handlers {
    group: GroupHandle,
    pinger: Pinger,
    bridge: CacheBridge,
}

impl Handlers {
    pub fn new(group: GroupHandle, pinger: Pinger, bridge: CacheBridge) -> Self {
        Self {
            group,
            pinger,
            bridge,
        }
    }

    /// Handle one frame and return the reply, if any.
    pub async fn handle(&self, route: Route, data: &[u8]) -> Option<Message> {
        match route {
            Route::Ping => self.on_ping(data).await,
            Route::Join => self.on_join(data).await,
            Route::Departing => {
                self.on_departing(data).await;
                None
            }
            Route::Coordinator => {
                self.on_coordinator(data).await;
                None
            }
            Route::UsrCache => self.on_cache_update::<ActiveUserDelta>(data).await,
            Route::GroupAuthCache => self.on_cache_update::<GroupAuthDelta>(data).await,
            Route::AuthCache => self.on_cache_update::<AuthDelta>(data).await,
            Route::UsrGroupCache => self.on_cache_update::<UsrGroupDelta>(data).await,
        }
    }

    fn decode(route: Route, data: &[u8]) -> Option<GroupMessage> {
        match GroupMessage::decode(data) {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!("Dropping undecodable {:?} frame: {}", route, e);
                None
            }
        }
    }

    fn encode_reply(reply: &GroupMessage) -> Option<Message> {
        match reply.encode() {
            Ok(bytes) => Some(Message::Binary(bytes.into())),
            Err(e) => {
                error!("Failed to encode {} reply: {}", reply.kind, e);
                None
            }
        }
    }

    fn spawn_election(&self) {
        let pinger = self.pinger.clone();
        tokio::spawn(async move {
            pinger.run_election().await;
        });
    }

    async fn on_ping(&self, data: &[u8]) -> Option<Message> {
        let msg = Self::decode(Route::Ping, data)?;

        match msg.kind {
            MessageKind::Ping => {
                let outcome = match self.group.ping(msg).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        debug!("Ping not processed: {}", e);
                        return None;
                    }
                };
                if outcome.check_election {
                    self.spawn_election();
                }

                let mut reply = outcome.reply;
                if reply.error_code == Some(ProtocolErrorCode::PingIncorrectReceiver) {
                    return None;
                }
                reply.snapshot = None;
                Self::encode_reply(&reply)
            }
            MessageKind::Failure => {
                if let Ok(true) = self.group.remove_member(msg.target_id).await {
                    info!("Process {} removed on request of {}", msg.target_id, msg.src_id);
                }
                None
            }
            kind => {
                debug!("Dropping {} message on {}", kind, PING_PATH);
                None
            }
        }
    }

    async fn on_join(&self, data: &[u8]) -> Option<Message> {
        let msg = Self::decode(Route::Join, data)?;
        if msg.kind != MessageKind::Join {
            debug!("Dropping {} message on {}", msg.kind, JOIN_PATH);
            return None;
        }

        match self.group.ping(msg).await {
            Ok(outcome) => Self::encode_reply(&outcome.reply),
            Err(e) => {
                debug!("Join not processed: {}", e);
                None
            }
        }
    }

    async fn on_departing(&self, data: &[u8]) {
        let Some(msg) = Self::decode(Route::Departing, data) else {
            return;
        };
        if msg.kind != MessageKind::Departing {
            debug!("Dropping {} message on {}", msg.kind, DEPARTING_PATH);
            return;
        }

        let id = msg.src_id;
        match self.group.departing(msg).await {
            Ok(true) => {
                info!("Leader {} departed; starting election", id);
                self.spawn_election();
            }
            Ok(false) => debug!("Process {} departed", id),
            Err(e) => debug!("Departing not processed: {}", e),
        }
    }

    async fn on_coordinator(&self, data: &[u8]) {
        let Some(msg) = Self::decode(Route::Coordinator, data) else {
            return;
        };
        if msg.kind != MessageKind::Coordinator {
            debug!("Dropping {} message on {}", msg.kind, COORDINATOR_PATH);
            return;
        }

        let leader = LeaderRecord::new(msg.subject_id, msg.subject_address);
        if let Err(e) = self.group.set_leader(leader, false).await {
            debug!("Coordinator not processed: {}", e);
        }
    }

    async fn on_cache_update<D: LocalApply>(&self, data: &[u8]) -> Option<Message> {
        let delta: D = match decode_bounded(data) {
            Ok(delta) => delta,
            Err(e) => {
                warn!("Dropping undecodable {} frame: {}", D::PATH, e);
                return None;
            }
        };

        let applied = self.bridge.receive(delta).await;
        Some(Message::Text(applied.to_string().into()))
    }
}
