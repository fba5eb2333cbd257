//! Candidate Process
//!
//! One contender's control loop: register, wait to lead (bounded), do
//! leader-only work, resign, report.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::service::{Candidate, CandidateId, ElectionService, Registration};
use crate::config::ElectionConfig;

/// Reported once by every candidate that became leader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionResponse {
    pub is_leader: bool,
    pub candidate_id: CandidateId,
}

/// How a candidate process ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CandidateOutcome {
    /// Led, worked and resigned
    Resigned,
    /// Led and worked, but the resignation was rejected
    ResignFailed(String),
    /// Gave up waiting for leadership
    TimedOut,
    /// The registration vanished while waiting (session loss)
    Lost,
    /// Never got registered
    RegistrationFailed(String),
    /// The candidate task panicked
    Panicked(String),
}

impl CandidateOutcome {
    /// Whether the candidate held leadership at some point
    pub fn was_leader(&self) -> bool {
        matches!(
            self,
            CandidateOutcome::Resigned | CandidateOutcome::ResignFailed(_)
        )
    }
}

impl std::fmt::Display for CandidateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CandidateOutcome::Resigned => write!(f, "resigned"),
            CandidateOutcome::ResignFailed(reason) => write!(f, "resign failed: {}", reason),
            CandidateOutcome::TimedOut => write!(f, "timed out"),
            CandidateOutcome::Lost => write!(f, "registration lost"),
            CandidateOutcome::RegistrationFailed(reason) => {
                write!(f, "registration failed: {}", reason)
            }
            CandidateOutcome::Panicked(reason) => write!(f, "panicked: {}", reason),
        }
    }
}

/// A single contender
#[derive(Debug, Clone)]
pub struct CandidateProcess {
    /// Position in the batch; only used to vary the simulated work
    ordinal: u32,
    id_prefix: String,
    metadata: String,
    leader_wait_timeout: Duration,
    work_unit: Duration,
}

impl CandidateProcess {
    pub fn new(ordinal: u32, config: &ElectionConfig) -> Self {
        Self {
            ordinal,
            id_prefix: config.id_prefix.clone(),
            metadata: config.metadata.clone(),
            leader_wait_timeout: config.leader_wait_timeout(),
            work_unit: config.work_unit(),
        }
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Simulated leader work: `(ordinal² + 1)` work units
    pub fn work_duration(&self) -> Duration {
        let units = self
            .ordinal
            .saturating_mul(self.ordinal)
            .saturating_add(1);
        self.work_unit.saturating_mul(units)
    }

    /// Run the candidate to completion.
    ///
    /// Sends at most one `ElectionResponse` and always returns an outcome,
    /// whichever way the candidate ends.
    pub async fn run(
        &self,
        service: &dyn ElectionService,
        responses: &mpsc::Sender<ElectionResponse>,
    ) -> CandidateOutcome {
        let Registration {
            candidate,
            is_leader,
            mut changes,
        } = match service.register(&self.id_prefix, &self.metadata).await {
            Ok(registration) => registration,
            Err(e) => {
                tracing::error!("Candidate #{} failed to register: {}", self.ordinal, e);
                return CandidateOutcome::RegistrationFailed(e.to_string());
            }
        };

        if !is_leader {
            let timer = tokio::time::sleep_until(Instant::now() + self.leader_wait_timeout);
            tokio::pin!(timer);

            loop {
                tokio::select! {
                    biased;

                    change = changes.recv() => match change {
                        Some(true) => {
                            tracing::info!("Candidate {} promoted to leader", candidate.id);
                            break;
                        }
                        Some(false) => {
                            tracing::debug!("Candidate {} is still not leader", candidate.id);
                        }
                        None => {
                            tracing::warn!(
                                "Candidate {} lost its registration while waiting",
                                candidate.id
                            );
                            return CandidateOutcome::Lost;
                        }
                    },
                    _ = &mut timer => {
                        tracing::info!(
                            "Timer expired, stop waiting to become leader for {}",
                            candidate.id
                        );
                        self.withdraw(service, &candidate).await;
                        return CandidateOutcome::TimedOut;
                    }
                }
            }
        } else {
            tracing::info!("Candidate {} is leader at registration", candidate.id);
        }

        let response = ElectionResponse {
            is_leader: true,
            candidate_id: candidate.id.clone(),
        };
        if responses.send(response).await.is_err() {
            tracing::warn!("Result stream closed before {} reported", candidate.id);
        }

        let work = self.work_duration();
        tracing::info!("Leader {} working for {:?}", candidate.id, work);
        tokio::time::sleep(work).await;

        match service.resign(&candidate).await {
            Ok(()) => CandidateOutcome::Resigned,
            Err(e) => {
                tracing::warn!("Leader {} failed to resign: {}", candidate.id, e);
                CandidateOutcome::ResignFailed(e.to_string())
            }
        }
    }

    /// Leave the line after giving up so the registration cannot be promoted later
    async fn withdraw(&self, service: &dyn ElectionService, candidate: &Candidate) {
        if let Err(e) = service.resign(candidate).await {
            tracing::warn!("Failed to withdraw candidate {}: {}", candidate.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::{Coordinator, MemoryEnsemble};
    use crate::election::SequentialElection;
    use std::sync::Arc;

    fn config(timeout_secs: u64, work_unit_ms: u64) -> ElectionConfig {
        ElectionConfig {
            leader_wait_timeout_secs: timeout_secs,
            work_unit_ms,
            ..Default::default()
        }
    }

    async fn election(ensemble: &MemoryEnsemble) -> (Arc<SequentialElection>, u64) {
        let (session, _events) = ensemble
            .connect(&["127.0.0.1:2181".to_string()], Duration::from_secs(5))
            .await
            .unwrap();
        let session_id = session.session_id();
        let election = SequentialElection::new(Arc::new(session), "/election")
            .await
            .unwrap();
        (Arc::new(election), session_id)
    }

    #[test]
    fn test_work_duration_staggers_by_ordinal() {
        let config = config(100, 1000);
        let secs: Vec<u64> = (0..3)
            .map(|i| CandidateProcess::new(i, &config).work_duration().as_secs())
            .collect();
        assert_eq!(secs, vec![1, 2, 5]);

        let huge = CandidateProcess::new(u32::MAX, &config);
        assert!(huge.work_duration() > Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_leader_reports_and_resigns() {
        let ensemble = MemoryEnsemble::new();
        let (election, _) = election(&ensemble).await;
        let (tx, mut rx) = mpsc::channel(1);

        let outcome = CandidateProcess::new(0, &config(100, 1000))
            .run(election.as_ref(), &tx)
            .await;

        assert_eq!(outcome, CandidateOutcome::Resigned);
        let response = rx.recv().await.unwrap();
        assert!(response.is_leader);
        assert_eq!(response.candidate_id.as_str(), "n_0000000000");
        assert_eq!(election.leader().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_candidate_is_promoted_after_resignation() {
        let ensemble = MemoryEnsemble::new();
        let (election, _) = election(&ensemble).await;
        let blocker = election.register("n_", "incumbent").await.unwrap();
        let (tx, mut rx) = mpsc::channel(1);

        let task = {
            let election = Arc::clone(&election);
            tokio::spawn(async move {
                CandidateProcess::new(1, &config(100, 10))
                    .run(election.as_ref(), &tx)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());

        election.resign(&blocker.candidate).await.unwrap();

        let response = rx.recv().await.unwrap();
        assert_eq!(response.candidate_id.as_str(), "n_0000000001");
        assert_eq!(task.await.unwrap(), CandidateOutcome::Resigned);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_emits_nothing_and_withdraws() {
        let ensemble = MemoryEnsemble::new();
        let (election, _) = election(&ensemble).await;
        let blocker = election.register("n_", "incumbent").await.unwrap();
        let (tx, mut rx) = mpsc::channel(1);

        let outcome = CandidateProcess::new(1, &config(5, 10))
            .run(election.as_ref(), &tx)
            .await;
        drop(tx);

        assert_eq!(outcome, CandidateOutcome::TimedOut);
        assert!(rx.recv().await.is_none());
        assert_eq!(
            election.candidates().await.unwrap(),
            vec![blocker.candidate.id]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_registration_ends_wait() {
        let ensemble = MemoryEnsemble::new();
        let (election, session_id) = election(&ensemble).await;
        let _blocker = election.register("n_", "incumbent").await.unwrap();
        let (tx, mut rx) = mpsc::channel(1);

        let task = {
            let election = Arc::clone(&election);
            tokio::spawn(async move {
                CandidateProcess::new(1, &config(100, 10))
                    .run(election.as_ref(), &tx)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        ensemble.expire(session_id).await.unwrap();

        assert_eq!(task.await.unwrap(), CandidateOutcome::Lost);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_registration_failure_is_reported() {
        let ensemble = MemoryEnsemble::new();
        let (election, session_id) = election(&ensemble).await;
        ensemble.disconnect(session_id).await.unwrap();
        let (tx, mut rx) = mpsc::channel(1);

        let outcome = CandidateProcess::new(0, &config(1, 1))
            .run(election.as_ref(), &tx)
            .await;
        drop(tx);

        assert!(matches!(outcome, CandidateOutcome::RegistrationFailed(_)));
        assert!(!outcome.was_leader());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_resignation_is_absorbed() {
        let ensemble = MemoryEnsemble::new();
        let (session, _events) = ensemble
            .connect(&["127.0.0.1:2181".to_string()], Duration::from_secs(5))
            .await
            .unwrap();
        let session = Arc::new(session);
        let election = Arc::new(
            SequentialElection::new(Arc::clone(&session) as Arc<dyn Coordinator>, "/election")
                .await
                .unwrap(),
        );
        let (tx, mut rx) = mpsc::channel(1);

        let task = {
            let election = Arc::clone(&election);
            tokio::spawn(async move {
                CandidateProcess::new(2, &config(100, 1000))
                    .run(election.as_ref(), &tx)
                    .await
            })
        };

        // pull the node out from under the leader while it works
        let response = rx.recv().await.unwrap();
        session
            .delete(&format!("/election/{}", response.candidate_id))
            .await
            .unwrap();

        let outcome = task.await.unwrap();
        assert!(matches!(outcome, CandidateOutcome::ResignFailed(_)));
        assert!(outcome.was_leader());
    }
}
