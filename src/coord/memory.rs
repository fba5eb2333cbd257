//! In-Process Coordination Ensemble
//!
//! A single-process stand-in for the coordination service. It keeps the
//! node tree, ephemeral ownership, sequential counters and one-shot child
//! watches with the same observable semantics a real ensemble provides, and
//! exposes operator hooks (disconnect, reconnect, expire, outage) so session
//! failures can be injected deterministically.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};

use super::{
    join_path, parent_of, validate_path, ConnectionEvent, ConnectionState, Connector,
    Coordinator, CreateMode, WatchEvent, WatchEventKind, SEQUENCE_WIDTH,
};
use crate::error::{Error, Result};

/// A single node in the tree
struct ZNode {
    data: Vec<u8>,
    /// Session owning this node if it is ephemeral
    ephemeral_owner: Option<u64>,
    children: BTreeSet<String>,
    /// Counter for sequential children
    next_sequence: u64,
}

impl ZNode {
    fn new(data: Vec<u8>, ephemeral_owner: Option<u64>) -> Self {
        Self {
            data,
            ephemeral_owner,
            children: BTreeSet::new(),
            next_sequence: 0,
        }
    }
}

struct SessionEntry {
    state: ConnectionState,
    /// Dropped when the session is closed, which ends the event stream
    events: Option<mpsc::UnboundedSender<ConnectionEvent>>,
}

struct ChildWatch {
    session_id: u64,
    tx: oneshot::Sender<WatchEvent>,
}

struct Tree {
    available: bool,
    next_session: u64,
    nodes: HashMap<String, ZNode>,
    sessions: HashMap<u64, SessionEntry>,
    watches: HashMap<String, Vec<ChildWatch>>,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_string(), ZNode::new(Vec::new(), None));
        Self {
            available: true,
            next_session: 1,
            nodes,
            sessions: HashMap::new(),
            watches: HashMap::new(),
        }
    }

    fn check_session(&self, session_id: u64) -> Result<()> {
        match self.sessions.get(&session_id).map(|s| s.state) {
            Some(ConnectionState::Connected) => Ok(()),
            Some(ConnectionState::Expired) => Err(Error::SessionExpired(session_id)),
            _ => Err(Error::ConnectionLoss),
        }
    }

    fn session_mut(&mut self, session_id: u64) -> Result<&mut SessionEntry> {
        self.sessions
            .get_mut(&session_id)
            .ok_or_else(|| Error::Internal(format!("unknown session {:#x}", session_id)))
    }

    /// Move a session to a new state and publish the transition
    fn transition(&mut self, session_id: u64, state: ConnectionState) -> Result<()> {
        let session = self.session_mut(session_id)?;
        session.state = state;
        if let Some(events) = &session.events {
            let _ = events.send(ConnectionEvent::new(state, session_id));
        }
        Ok(())
    }

    fn fire(&mut self, path: &str, kind: WatchEventKind) {
        if let Some(watches) = self.watches.remove(path) {
            for watch in watches {
                let _ = watch.tx.send(WatchEvent {
                    kind,
                    path: path.to_string(),
                });
            }
        }
    }

    fn create(
        &mut self,
        session_id: u64,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> Result<String> {
        validate_path(path)?;
        let parent_path = parent_of(path).ok_or_else(|| Error::NodeExists(path.to_string()))?;
        let name = &path[path.rfind('/').map(|i| i + 1).unwrap_or(0)..];

        let parent = self
            .nodes
            .get_mut(parent_path)
            .ok_or_else(|| Error::NoNode(parent_path.to_string()))?;
        if parent.ephemeral_owner.is_some() {
            return Err(Error::InvalidPath(format!(
                "{} is ephemeral and cannot have children",
                parent_path
            )));
        }

        let name = if mode.is_sequential() {
            let seq = parent.next_sequence;
            parent.next_sequence += 1;
            format!("{}{:0width$}", name, seq, width = SEQUENCE_WIDTH)
        } else {
            name.to_string()
        };
        let actual = join_path(parent_path, &name);

        if self.nodes.contains_key(&actual) {
            return Err(Error::NodeExists(actual));
        }

        let owner = mode.is_ephemeral().then_some(session_id);
        if let Some(parent) = self.nodes.get_mut(parent_path) {
            parent.children.insert(name);
        }
        self.nodes.insert(actual.clone(), ZNode::new(data, owner));
        self.fire(parent_path, WatchEventKind::NodeChildrenChanged);

        Ok(actual)
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        validate_path(path)?;
        let node = self
            .nodes
            .get(path)
            .ok_or_else(|| Error::NoNode(path.to_string()))?;
        if !node.children.is_empty() {
            return Err(Error::NotEmpty(path.to_string()));
        }
        let parent_path = parent_of(path)
            .ok_or_else(|| Error::InvalidPath("cannot delete the root".into()))?
            .to_string();

        self.nodes.remove(path);
        if let Some(parent) = self.nodes.get_mut(&parent_path) {
            let name = &path[path.rfind('/').map(|i| i + 1).unwrap_or(0)..];
            parent.children.remove(name);
        }

        self.fire(path, WatchEventKind::NodeDeleted);
        self.fire(&parent_path, WatchEventKind::NodeChildrenChanged);
        Ok(())
    }

    /// Drop every ephemeral node the session owns
    fn remove_ephemerals(&mut self, session_id: u64) {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(session_id))
            .map(|(path, _)| path.clone())
            .collect();

        for path in owned {
            if let Err(e) = self.delete(&path) {
                tracing::warn!("Failed to remove ephemeral node {}: {}", path, e);
            }
        }
    }

    /// Fire and drop every watch the session registered
    fn drop_watches(&mut self, session_id: u64) {
        for (path, watches) in self.watches.iter_mut() {
            let (expired, kept): (Vec<_>, Vec<_>) = watches
                .drain(..)
                .partition(|w| w.session_id == session_id);
            *watches = kept;
            for watch in expired {
                let _ = watch.tx.send(WatchEvent {
                    kind: WatchEventKind::SessionExpired,
                    path: path.clone(),
                });
            }
        }
        self.watches.retain(|_, watches| !watches.is_empty());
    }
}

/// Shared in-process ensemble. Clones refer to the same tree.
#[derive(Clone)]
pub struct MemoryEnsemble {
    tree: Arc<Mutex<Tree>>,
}

impl Default for MemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEnsemble {
    /// Create an empty ensemble holding only the root node
    pub fn new() -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::new())),
        }
    }

    /// Open a new session.
    ///
    /// Emits `Connecting` then `Connected` on the returned event channel.
    pub async fn connect(
        &self,
        servers: &[String],
        session_timeout: Duration,
    ) -> Result<(MemorySession, mpsc::UnboundedReceiver<ConnectionEvent>)> {
        let mut tree = self.tree.lock().await;
        if !tree.available {
            return Err(Error::ConnectionFailed {
                servers: servers.join(","),
                reason: "no ensemble member reachable".into(),
            });
        }

        let session_id = tree.next_session;
        tree.next_session += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        tree.sessions.insert(
            session_id,
            SessionEntry {
                state: ConnectionState::Connecting,
                events: Some(tx),
            },
        );
        tree.transition(session_id, ConnectionState::Connecting)?;
        tree.transition(session_id, ConnectionState::Connected)?;

        tracing::debug!(
            "Session {:#x} established via {} (timeout {:?})",
            session_id,
            servers.join(","),
            session_timeout
        );

        Ok((
            MemorySession {
                id: session_id,
                ensemble: self.clone(),
            },
            rx,
        ))
    }

    /// Simulate an ensemble outage; new connections fail while unavailable
    pub async fn set_available(&self, available: bool) {
        self.tree.lock().await.available = available;
    }

    /// Sessions that have not been closed, oldest first
    pub async fn session_ids(&self) -> Vec<u64> {
        let tree = self.tree.lock().await;
        let mut ids: Vec<u64> = tree
            .sessions
            .iter()
            .filter(|(_, s)| s.state != ConnectionState::Closed)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Current state of a session
    pub async fn state(&self, session_id: u64) -> Option<ConnectionState> {
        self.tree.lock().await.sessions.get(&session_id).map(|s| s.state)
    }

    /// Drop the transport of a session without expiring it
    pub async fn disconnect(&self, session_id: u64) -> Result<()> {
        let mut tree = self.tree.lock().await;
        let state = tree.session_mut(session_id)?.state;
        match state {
            ConnectionState::Expired | ConnectionState::Closed => {
                Err(Error::SessionExpired(session_id))
            }
            _ => tree.transition(session_id, ConnectionState::Disconnected),
        }
    }

    /// Resume a disconnected session; its ephemeral nodes and watches survive
    pub async fn reconnect(&self, session_id: u64) -> Result<()> {
        let mut tree = self.tree.lock().await;
        let state = tree.session_mut(session_id)?.state;
        match state {
            ConnectionState::Expired | ConnectionState::Closed => {
                Err(Error::SessionExpired(session_id))
            }
            _ => tree.transition(session_id, ConnectionState::Connected),
        }
    }

    /// Expire a session: its watches fire, its ephemeral nodes disappear
    pub async fn expire(&self, session_id: u64) -> Result<()> {
        let mut tree = self.tree.lock().await;
        tree.session_mut(session_id)?;
        tree.drop_watches(session_id);
        tree.remove_ephemerals(session_id);
        tree.transition(session_id, ConnectionState::Expired)
    }

    /// Close a session and end its event stream
    pub async fn close(&self, session_id: u64) -> Result<()> {
        let mut tree = self.tree.lock().await;
        tree.session_mut(session_id)?;
        tree.drop_watches(session_id);
        tree.remove_ephemerals(session_id);
        tree.transition(session_id, ConnectionState::Closed)?;
        tree.session_mut(session_id)?.events = None;
        Ok(())
    }
}

#[async_trait]
impl Connector for MemoryEnsemble {
    async fn open_session(
        &self,
        servers: &[String],
        session_timeout: Duration,
    ) -> Result<(Arc<dyn Coordinator>, mpsc::UnboundedReceiver<ConnectionEvent>)> {
        let (session, events) = self.connect(servers, session_timeout).await?;
        Ok((Arc::new(session), events))
    }
}

/// A session handle on a `MemoryEnsemble`
#[derive(Clone)]
pub struct MemorySession {
    id: u64,
    ensemble: MemoryEnsemble,
}

impl MemorySession {
    /// The ensemble this session belongs to
    pub fn ensemble(&self) -> &MemoryEnsemble {
        &self.ensemble
    }

    /// Close the session, removing its ephemeral nodes
    pub async fn close(&self) -> Result<()> {
        self.ensemble.close(self.id).await
    }
}

#[async_trait]
impl Coordinator for MemorySession {
    fn session_id(&self) -> u64 {
        self.id
    }

    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> Result<String> {
        let mut tree = self.ensemble.tree.lock().await;
        tree.check_session(self.id)?;
        tree.create(self.id, path, data, mode)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut tree = self.ensemble.tree.lock().await;
        tree.check_session(self.id)?;
        tree.delete(path)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let tree = self.ensemble.tree.lock().await;
        tree.check_session(self.id)?;
        Ok(tree.nodes.contains_key(path))
    }

    async fn get_data(&self, path: &str) -> Result<Vec<u8>> {
        let tree = self.ensemble.tree.lock().await;
        tree.check_session(self.id)?;
        tree.nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| Error::NoNode(path.to_string()))
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        let tree = self.ensemble.tree.lock().await;
        tree.check_session(self.id)?;
        tree.nodes
            .get(path)
            .map(|node| node.children.iter().cloned().collect())
            .ok_or_else(|| Error::NoNode(path.to_string()))
    }

    async fn children_watch(
        &self,
        path: &str,
    ) -> Result<(Vec<String>, oneshot::Receiver<WatchEvent>)> {
        let mut tree = self.ensemble.tree.lock().await;
        tree.check_session(self.id)?;
        let children: Vec<String> = tree
            .nodes
            .get(path)
            .map(|node| node.children.iter().cloned().collect())
            .ok_or_else(|| Error::NoNode(path.to_string()))?;

        let (tx, rx) = oneshot::channel();
        tree.watches
            .entry(path.to_string())
            .or_default()
            .push(ChildWatch {
                session_id: self.id,
                tx,
            });

        Ok((children, rx))
    }
}
