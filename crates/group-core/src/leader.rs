//! Leader persistence port.
//!
//! Joining processes locate the group through the last leader written to a
//! store outside the group. Backends are pluggable; two are provided:
//! - [`MemoryLeaderStore`]: shared in-process record (single host, tests)
//! - [`FileLeaderStore`]: JSON file that processes on one host can share

use crate::error::{GroupError, Result};
use crate::member::LeaderRecord;
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// Read/write access to the persisted "current leader" record.
#[async_trait]
pub trait LeaderStore: Send + Sync {
    /// Read the persisted leader. An empty record means none is known.
    async fn get_leader(&self) -> Result<LeaderRecord>;

    /// Persist a new leader.
    async fn set_leader(&self, leader: &LeaderRecord) -> Result<()>;

    /// Release any resources held by the store.
    async fn cleanup(&self) -> Result<()>;
}

/// In-memory leader record.
///
/// Wrap in an `Arc` to share one record between several nodes.
#[derive(Debug, Default)]
pub struct MemoryLeaderStore {
    leader: RwLock<LeaderRecord>,
}

impl MemoryLeaderStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with a leader.
    pub fn with_leader(leader: LeaderRecord) -> Self {
        Self {
            leader: RwLock::new(leader),
        }
    }
}

#[async_trait]
impl LeaderStore for MemoryLeaderStore {
    async fn get_leader(&self) -> Result<LeaderRecord> {
        Ok(self.leader.read().await.clone())
    }

    async fn set_leader(&self, leader: &LeaderRecord) -> Result<()> {
        *self.leader.write().await = leader.clone();
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// Leader record stored as JSON on disk.
pub struct FileLeaderStore {
    path: PathBuf,
}

impl FileLeaderStore {
    /// Use the file at `path`. The file need not exist yet.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LeaderStore for FileLeaderStore {
    async fn get_leader(&self) -> Result<LeaderRecord> {
        if !self.path.exists() {
            return Ok(LeaderRecord::default());
        }
        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(LeaderRecord::default());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    async fn set_leader(&self, leader: &LeaderRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(leader)?;

        // write-then-rename so readers never see a partial record
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| GroupError::LeaderStore(format!("{}: {}", self.path.display(), e)))?;
        debug!("Persisted leader {} to {}", leader, self.path.display());
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}
