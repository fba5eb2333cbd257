//! Sequential-node election
//!
//! Each registration is an ephemeral sequential child of the election path.
//! The child with the lowest sequence number leads. A watcher task per
//! candidate re-reads the children after every change and reports status
//! transitions on the candidate's channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::service::{Candidate, CandidateId, ElectionService, Registration};
use crate::coord::{
    join_path, sequence_of, validate_path, Coordinator, CreateMode, WatchEvent, WatchEventKind,
};
use crate::error::{Error, Result};

/// Pause between attempts to re-arm a watch while the session is disconnected
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Election over ephemeral sequential nodes under one path
pub struct SequentialElection {
    client: Arc<dyn Coordinator>,
    path: String,
}

impl SequentialElection {
    /// Create an election on `path`, creating the path if needed
    pub async fn new(client: Arc<dyn Coordinator>, path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        validate_path(&path)?;
        if path == "/" {
            return Err(Error::InvalidPath(
                "election path cannot be the root".into(),
            ));
        }

        client.ensure_path(&path).await?;
        tracing::debug!("Election path {} ready", path);

        Ok(Self { client, path })
    }

    async fn ordered_children(&self) -> Result<Vec<String>> {
        Ok(leadership_order(self.client.children(&self.path).await?))
    }
}

/// Sort sequential children by their counter; anything else is ignored
fn leadership_order(children: Vec<String>) -> Vec<String> {
    let mut ordered: Vec<(u64, String)> = children
        .into_iter()
        .filter_map(|name| sequence_of(&name).map(|seq| (seq, name)))
        .collect();
    ordered.sort();
    ordered.into_iter().map(|(_, name)| name).collect()
}

fn leads(children: Vec<String>, name: &str) -> bool {
    leadership_order(children)
        .first()
        .map(|first| first == name)
        .unwrap_or(false)
}

#[async_trait]
impl ElectionService for SequentialElection {
    fn election_path(&self) -> &str {
        &self.path
    }

    async fn register(&self, id_prefix: &str, metadata: &str) -> Result<Registration> {
        let registration_error = |reason: String| Error::Registration {
            path: self.path.clone(),
            reason,
        };

        if id_prefix.contains('/') {
            return Err(registration_error(format!(
                "id prefix '{}' cannot contain '/'",
                id_prefix
            )));
        }

        let node_path = self
            .client
            .create(
                &join_path(&self.path, id_prefix),
                metadata.as_bytes().to_vec(),
                CreateMode::EphemeralSequential,
            )
            .await
            .map_err(|e| registration_error(e.to_string()))?;
        let name = node_path
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        let (children, watch) = self
            .client
            .children_watch(&self.path)
            .await
            .map_err(|e| registration_error(e.to_string()))?;
        let is_leader = leads(children, &name);

        let (tx, changes) = mpsc::unbounded_channel();
        tokio::spawn(watch_leadership(
            Arc::clone(&self.client),
            self.path.clone(),
            name.clone(),
            is_leader,
            watch,
            tx,
        ));

        tracing::info!(
            "Registered candidate {} under {} (leader: {})",
            name,
            self.path,
            is_leader
        );

        Ok(Registration {
            candidate: Candidate {
                id: CandidateId::new(name),
                election_path: self.path.clone(),
                node_path,
                registered_at: chrono::Utc::now(),
            },
            is_leader,
            changes,
        })
    }

    async fn resign(&self, candidate: &Candidate) -> Result<()> {
        match self.client.delete(&candidate.node_path).await {
            Ok(()) => {
                tracing::info!("Candidate {} resigned", candidate.id);
                Ok(())
            }
            Err(Error::NoNode(_)) => Err(Error::Resignation {
                candidate_id: candidate.id.to_string(),
                reason: "candidate is not registered".into(),
            }),
            Err(e) => Err(Error::Resignation {
                candidate_id: candidate.id.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn leader(&self) -> Result<Option<CandidateId>> {
        Ok(self
            .ordered_children()
            .await?
            .into_iter()
            .next()
            .map(CandidateId::new))
    }

    async fn candidates(&self) -> Result<Vec<CandidateId>> {
        Ok(self
            .ordered_children()
            .await?
            .into_iter()
            .map(CandidateId::new)
            .collect())
    }
}

/// Follow one candidate's leadership status until its node is gone.
///
/// Only transitions are sent, so the first `true` a waiting candidate sees
/// is its promotion.
async fn watch_leadership(
    client: Arc<dyn Coordinator>,
    path: String,
    name: String,
    mut last: bool,
    mut watch: oneshot::Receiver<WatchEvent>,
    tx: mpsc::UnboundedSender<bool>,
) {
    loop {
        match watch.await {
            Ok(event) if event.kind == WatchEventKind::SessionExpired => {
                tracing::debug!("Watch for {} ended with its session", name);
                return;
            }
            Ok(_) => {}
            Err(_) => return,
        }

        let (children, next) = loop {
            match client.children_watch(&path).await {
                Ok(result) => break result,
                Err(Error::ConnectionLoss) if !tx.is_closed() => {
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
                Err(e) => {
                    tracing::debug!("Stopped watching leadership for {}: {}", name, e);
                    return;
                }
            }
        };

        if !children.iter().any(|child| child == &name) {
            tracing::debug!("Registration {} is gone, closing its change channel", name);
            return;
        }

        let now = leads(children, &name);
        if now != last {
            tracing::debug!("Leadership of {} changed: {} -> {}", name, last, now);
            if tx.send(now).is_err() {
                return;
            }
            last = now;
        }
        watch = next;
    }
}
