//! Coordination Service Client Module
//!
//! Abstracts the hierarchical, strongly-consistent coordination service
//! (ZooKeeper-style nodes, ephemeral/sequential modes and one-shot watches)
//! behind the `Coordinator` trait. The election layer only talks to this
//! trait, so any backend offering the same guarantees can be substituted.

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};

pub use memory::{MemoryEnsemble, MemorySession};

/// Width of the counter appended to sequential node names
pub const SEQUENCE_WIDTH: usize = 10;

/// How a node is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Survives the creating session
    Persistent,
    /// Persistent, with a monotonically increasing suffix
    PersistentSequential,
    /// Removed when the creating session ends
    Ephemeral,
    /// Ephemeral, with a monotonically increasing suffix
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_sequential(&self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }
}

/// Session connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Session establishment in progress
    Connecting,
    /// Session is live
    Connected,
    /// Transport lost; the session may still resume
    Disconnected,
    /// Session is gone along with its ephemeral nodes
    Expired,
    /// Session was closed by its owner
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Connected => write!(f, "CONNECTED"),
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionState::Expired => write!(f, "EXPIRED"),
            ConnectionState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// A change in session connectivity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEvent {
    /// New state of the session
    pub state: ConnectionState,
    /// Session the event belongs to
    pub session_id: u64,
    /// When the transition was observed
    pub at: chrono::DateTime<chrono::Utc>,
}

impl ConnectionEvent {
    pub fn new(state: ConnectionState, session_id: u64) -> Self {
        Self {
            state,
            session_id,
            at: chrono::Utc::now(),
        }
    }
}

/// Kind of change that fired a watch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// The child set of the watched node changed
    NodeChildrenChanged,
    /// The watched node itself was deleted
    NodeDeleted,
    /// The session holding the watch expired
    SessionExpired,
}

/// Notification delivered to a one-shot watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: String,
}

/// Client operations the election layer needs from the coordination service.
///
/// Implementations must be safe to share between tasks; every candidate
/// issues its own calls over the same session.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Identifier of the underlying session
    fn session_id(&self) -> u64;

    /// Create a node, returning its actual path (sequential modes append a counter)
    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> Result<String>;

    /// Delete a node that has no children
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check whether a node exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Read a node's data
    async fn get_data(&self, path: &str) -> Result<Vec<u8>>;

    /// List a node's children
    async fn children(&self, path: &str) -> Result<Vec<String>>;

    /// List a node's children and leave a one-shot watch on the child set
    async fn children_watch(
        &self,
        path: &str,
    ) -> Result<(Vec<String>, oneshot::Receiver<WatchEvent>)>;

    /// Create every missing persistent node along `path`
    async fn ensure_path(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        let mut current = String::new();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current.push('/');
            current.push_str(component);
            match self.create(&current, Vec::new(), CreateMode::Persistent).await {
                Ok(_) | Err(Error::NodeExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Opens sessions against a coordination service ensemble
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a session, returning the client handle and its
    /// connection-state event channel
    async fn open_session(
        &self,
        servers: &[String],
        session_timeout: Duration,
    ) -> Result<(Arc<dyn Coordinator>, mpsc::UnboundedReceiver<ConnectionEvent>)>;
}

/// Check that a path is absolute, has no empty components and no trailing slash
pub fn validate_path(path: &str) -> Result<()> {
    if path == "/" {
        return Ok(());
    }
    if !path.starts_with('/') || path.ends_with('/') || path.contains("//") {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Parent of a path, `None` for the root
pub fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Join a parent path and a child name
pub fn join_path(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Parse the counter a sequential node name ends with
pub fn sequence_of(name: &str) -> Option<u64> {
    let suffix = name.get(name.len().checked_sub(SEQUENCE_WIDTH)?..)?;
    if !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}
