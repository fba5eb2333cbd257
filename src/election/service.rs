//! Election Service contract
//!
//! The capability the candidates rely on: register, learn whether you lead
//! right now, get told whenever that changes, and resign.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

/// Service-assigned identity of a registration
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(String);

impl CandidateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CandidateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A contender's registration under an election path.
///
/// Owned by the candidate process that created it; invalid once resigned
/// or once the session that created it is lost.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Identity assigned at registration
    pub id: CandidateId,
    /// Election the candidate registered under
    pub election_path: String,
    /// Full path of the registration node
    pub node_path: String,
    /// When the registration was made
    pub registered_at: chrono::DateTime<chrono::Utc>,
}

/// Leadership status changes for one candidate: `true` means "you are now
/// leader", `false` means "you are not (or no longer) leader". Closed once
/// the registration is gone.
pub type LeadershipChanges = mpsc::UnboundedReceiver<bool>;

/// Result of a successful registration
pub struct Registration {
    pub candidate: Candidate,
    /// Whether the candidate leads at registration time
    pub is_leader: bool,
    pub changes: LeadershipChanges,
}

/// Leader election over a single election path.
///
/// Implementations must deliver changes in the order leadership actually
/// transitions, and must promote exactly one remaining contender when the
/// leader resigns.
#[async_trait]
pub trait ElectionService: Send + Sync {
    /// The election path candidates register under
    fn election_path(&self) -> &str;

    /// Register a new contender
    async fn register(&self, id_prefix: &str, metadata: &str) -> Result<Registration>;

    /// Withdraw a registration.
    ///
    /// Fails with `Error::Resignation` when the candidate is already gone.
    async fn resign(&self, candidate: &Candidate) -> Result<()>;

    /// Current leader, if any
    async fn leader(&self) -> Result<Option<CandidateId>>;

    /// Live candidates in leadership order
    async fn candidates(&self) -> Result<Vec<CandidateId>>;
}
