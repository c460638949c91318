//! A running group member.
//!
//! `GroupNode` owns the command loop, the server and the ping ticker, and
//! runs the join sequence in between: the server must already be accepting
//! before the leader starts pinging the new member.

use crate::bootstrap;
use crate::dissemination::CacheBridge;
use crate::handlers::Handlers;
use crate::senders::Pinger;
use crate::server::GroupServer;
use anyhow::Result;
use group_core::cache::Caches;
use group_core::command::{spawn_command_loop, GroupHandle};
use group_core::config::GroupConfig;
use group_core::leader::LeaderStore;
use group_core::state::GroupState;
use group_core::GroupError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub struct GroupNode {
    config: GroupConfig,
    group: GroupHandle,
    pinger: Pinger,
    bridge: CacheBridge,
    store: Arc<dyn LeaderStore>,
    local_addr: SocketAddr,
    fatal_rx: mpsc::UnboundedReceiver<GroupError>,
    loop_task: JoinHandle<()>,
    server_task: JoinHandle<()>,
    ticker_task: Option<JoinHandle<()>>,
}

impl GroupNode {
    /// Bind the configured address and start.
    pub async fn start(config: GroupConfig, store: Arc<dyn LeaderStore>, caches: Caches) -> Result<Self> {
        config.validate()?;
        let listener = GroupServer::bind(&config.address).await?;
        Self::start_with_listener(config, store, caches, listener).await
    }

    /// Start on an already bound listener.
    ///
    /// `config.address` must be the address peers reach the listener on.
    pub async fn start_with_listener(
        config: GroupConfig,
        store: Arc<dyn LeaderStore>,
        caches: Caches,
        listener: TcpListener,
    ) -> Result<Self> {
        config.validate()?;

        let state = GroupState::new(config.address.clone(), config.failure_threshold, store.clone());
        let (group, loop_task) = spawn_command_loop(state);

        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        let pinger = Pinger::new(group.clone(), config.clone(), fatal_tx);
        let bridge = CacheBridge::new(group.clone(), caches, config.request_timeout);

        let server = GroupServer::new(
            listener,
            Handlers::new(group.clone(), pinger.clone(), bridge.clone()),
        );
        let local_addr = server.local_addr()?;
        let server_task = tokio::spawn(server.run());

        let mut node = Self {
            config,
            group,
            pinger,
            bridge,
            store,
            local_addr,
            fatal_rx,
            loop_task,
            server_task,
            ticker_task: None,
        };

        bootstrap::join_or_found(&node.group, &node.pinger, &node.config.join).await?;

        let details = node.group.local_details().await?;
        info!(
            "Process {} at {} running with leader {}",
            details.id, details.address, details.leader
        );

        node.ticker_task = Some(node.spawn_ticker());
        Ok(node)
    }

    fn spawn_ticker(&self) -> JoinHandle<()> {
        let pinger = self.pinger.clone();
        let cycle = self.config.ping_cycle;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cycle);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                pinger.ping_round().await;
            }
        })
    }

    pub fn group(&self) -> &GroupHandle {
        &self.group
    }

    pub fn bridge(&self) -> &CacheBridge {
        &self.bridge
    }

    pub fn caches(&self) -> &Caches {
        self.bridge.caches()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    /// Wait for an error that must stop the process.
    pub async fn fatal(&mut self) -> Option<GroupError> {
        self.fatal_rx.recv().await
    }

    /// Tell the group this process is leaving, then stop.
    pub async fn depart(mut self) -> Result<()> {
        if let Some(ticker) = self.ticker_task.take() {
            ticker.abort();
        }
        self.pinger.send_departing().await;
        self.server_task.abort();

        if let Err(e) = self.store.cleanup().await {
            warn!("Leader store cleanup failed: {}", e);
        }
        debug!("Process at {} departed", self.config.address);
        Ok(())
    }
}

impl Drop for GroupNode {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker_task.take() {
            ticker.abort();
        }
        self.server_task.abort();
        self.loop_task.abort();
    }
}
