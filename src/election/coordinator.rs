//! Election Coordinator
//!
//! Starts a batch of candidates against one election path and funnels
//! their responses into a single stream that closes only after every
//! candidate has finished.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use super::candidate::{CandidateOutcome, CandidateProcess, ElectionResponse};
use super::service::ElectionService;
use crate::config::ElectionConfig;
use crate::error::{Error, Result};

/// How one candidate of a run finished
#[derive(Debug, Clone, Serialize)]
pub struct CandidateReport {
    /// `None` when the task panicked before reporting
    pub ordinal: Option<u32>,
    pub outcome: CandidateOutcome,
}

/// Completion accounting for a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Candidates started
    pub started: u32,
    /// One report per finished candidate
    pub reports: Vec<CandidateReport>,
}

impl RunSummary {
    /// Number of candidates that signalled completion
    pub fn completed(&self) -> usize {
        self.reports.len()
    }

    /// Number of candidates that held leadership
    pub fn leaders(&self) -> usize {
        self.reports.iter().filter(|r| r.outcome.was_leader()).count()
    }

    /// Number of candidates that gave up waiting
    pub fn timed_out(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.outcome == CandidateOutcome::TimedOut)
            .count()
    }
}

/// A started run. Dropping it aborts every candidate still running.
pub struct ElectionRun {
    /// Responses from candidates that became leader; closed after all finish
    pub responses: mpsc::Receiver<ElectionResponse>,
    /// Resolves once every candidate has finished
    pub completion: JoinHandle<RunSummary>,
}

impl ElectionRun {
    /// Drain the response stream until it closes, then collect the summary
    pub async fn collect(mut self) -> Result<(Vec<ElectionResponse>, RunSummary)> {
        let mut responses = Vec::new();
        while let Some(response) = self.responses.recv().await {
            tracing::info!(
                "Election result {}: {} (leader: {})",
                responses.len(),
                response.candidate_id,
                response.is_leader
            );
            responses.push(response);
        }

        let summary = (&mut self.completion)
            .await
            .map_err(|e| Error::Internal(format!("run supervisor failed: {}", e)))?;
        Ok((responses, summary))
    }

    /// Stop the supervisor; its `JoinSet` aborts the candidates when dropped
    pub fn abort(&self) {
        if !self.completion.is_finished() {
            tracing::warn!("Aborting unfinished election run");
            self.completion.abort();
        }
    }
}

impl Drop for ElectionRun {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Runs candidates against a shared election service
pub struct ElectionCoordinator {
    service: Arc<dyn ElectionService>,
    config: ElectionConfig,
}

impl ElectionCoordinator {
    pub fn new(service: Arc<dyn ElectionService>, config: ElectionConfig) -> Self {
        Self { service, config }
    }

    /// Start `candidates` concurrent candidate processes
    pub fn start(&self, candidates: u32) -> ElectionRun {
        // every candidate sends at most once, so sends never block
        let (tx, rx) = mpsc::channel(candidates.max(1) as usize);

        tracing::info!(
            "Starting {} candidates on {}",
            candidates,
            self.service.election_path()
        );

        let mut tasks = JoinSet::new();
        for ordinal in 0..candidates {
            let process = CandidateProcess::new(ordinal, &self.config);
            let service = Arc::clone(&self.service);
            let tx = tx.clone();
            tasks.spawn(async move {
                let outcome = process.run(service.as_ref(), &tx).await;
                tracing::debug!("Candidate #{} finished: {}", ordinal, outcome);
                CandidateReport {
                    ordinal: Some(ordinal),
                    outcome,
                }
            });
        }

        let completion = tokio::spawn(async move {
            let mut reports = Vec::with_capacity(candidates as usize);
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(report) => reports.push(report),
                    Err(e) => {
                        tracing::error!("Candidate task failed: {}", e);
                        reports.push(CandidateReport {
                            ordinal: None,
                            outcome: CandidateOutcome::Panicked(e.to_string()),
                        });
                    }
                }
            }

            // last sender: the stream closes only after every candidate is done
            drop(tx);
            tracing::info!("All {} candidates finished", reports.len());

            RunSummary {
                started: candidates,
                reports,
            }
        });

        ElectionRun {
            responses: rx,
            completion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::MemoryEnsemble;
    use crate::election::service::{Candidate, CandidateId, Registration};
    use crate::election::SequentialElection;
    use async_trait::async_trait;
    use std::time::Duration;

    fn config(timeout_secs: u64) -> ElectionConfig {
        ElectionConfig {
            leader_wait_timeout_secs: timeout_secs,
            work_unit_ms: 1000,
            ..Default::default()
        }
    }

    async fn election(ensemble: &MemoryEnsemble) -> Arc<SequentialElection> {
        let (session, _events) = ensemble
            .connect(&["127.0.0.1:2181".to_string()], Duration::from_secs(5))
            .await
            .unwrap();
        Arc::new(
            SequentialElection::new(Arc::new(session), "/election")
                .await
                .unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_candidate_leads_in_turn() {
        let ensemble = MemoryEnsemble::new();
        let coordinator = ElectionCoordinator::new(election(&ensemble).await, config(100));

        let (responses, summary) = coordinator.start(3).collect().await.unwrap();

        assert_eq!(responses.len(), 3);
        assert!(responses.iter().all(|r| r.is_leader));
        assert_eq!(summary.started, 3);
        assert_eq!(summary.completed(), 3);
        assert_eq!(summary.leaders(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_still_count_toward_completion() {
        let ensemble = MemoryEnsemble::new();
        let election = election(&ensemble).await;
        // an incumbent that never resigns keeps everyone else waiting
        let incumbent = election.register("n_", "incumbent").await.unwrap();
        assert!(incumbent.is_leader);

        let coordinator = ElectionCoordinator::new(election, config(10));
        let (responses, summary) = coordinator.start(3).collect().await.unwrap();

        assert!(responses.is_empty());
        assert_eq!(summary.completed(), 3);
        assert_eq!(summary.timed_out(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_stays_open_until_last_candidate_finishes() {
        let ensemble = MemoryEnsemble::new();
        let coordinator = ElectionCoordinator::new(election(&ensemble).await, config(100));

        let mut run = coordinator.start(2);
        assert!(run.responses.recv().await.is_some());
        assert!(run.responses.recv().await.is_some());

        // the second leader is still working after its response
        let started = tokio::time::Instant::now();
        assert!(run.responses.recv().await.is_none());
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!((&mut run.completion).await.unwrap().completed(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_run_stops_candidates() {
        let ensemble = MemoryEnsemble::new();
        let election = election(&ensemble).await;
        let service: Arc<dyn ElectionService> = Arc::clone(&election) as _;
        let coordinator = ElectionCoordinator::new(service, config(100));

        let mut run = coordinator.start(3);
        let first = run.responses.recv().await.unwrap();
        drop(run);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let registered = election.candidates().await.unwrap();
        assert!(!registered.is_empty());
        assert_eq!(election.leader().await.unwrap(), Some(first.candidate_id.clone()));

        // nobody is left to work, resign or take over
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(election.candidates().await.unwrap(), registered);
        assert_eq!(election.leader().await.unwrap(), Some(first.candidate_id));
    }

    /// Records when each candidate resigned
    struct RecordingService {
        inner: Arc<SequentialElection>,
        resigned: tokio::sync::Mutex<Vec<(CandidateId, tokio::time::Instant)>>,
    }

    #[async_trait]
    impl ElectionService for RecordingService {
        fn election_path(&self) -> &str {
            self.inner.election_path()
        }

        async fn register(&self, id_prefix: &str, metadata: &str) -> Result<Registration> {
            self.inner.register(id_prefix, metadata).await
        }

        async fn resign(&self, candidate: &Candidate) -> Result<()> {
            self.resigned
                .lock()
                .await
                .push((candidate.id.clone(), tokio::time::Instant::now()));
            self.inner.resign(candidate).await
        }

        async fn leader(&self) -> Result<Option<CandidateId>> {
            self.inner.leader().await
        }

        async fn candidates(&self) -> Result<Vec<CandidateId>> {
            self.inner.candidates().await
        }
    }

    /// Run `candidates` and check that no two leadership beliefs overlap
    async fn assert_leadership_never_overlaps(candidates: u32) {
        let ensemble = MemoryEnsemble::new();
        let service = Arc::new(RecordingService {
            inner: election(&ensemble).await,
            resigned: tokio::sync::Mutex::new(Vec::new()),
        });
        let shared: Arc<dyn ElectionService> = Arc::clone(&service) as _;
        let coordinator = ElectionCoordinator::new(shared, config(100));

        let mut run = coordinator.start(candidates);
        let mut claimed = Vec::new();
        while let Some(response) = run.responses.recv().await {
            assert!(response.is_leader);
            claimed.push((response.candidate_id, tokio::time::Instant::now()));
        }
        assert_eq!(claimed.len(), candidates as usize);

        let resigned = service.resigned.lock().await.clone();
        let mut beliefs: Vec<(tokio::time::Instant, tokio::time::Instant)> = claimed
            .into_iter()
            .map(|(id, from)| {
                let until = resigned
                    .iter()
                    .find(|(resigned_id, _)| *resigned_id == id)
                    .map(|(_, at)| *at)
                    .unwrap_or_else(|| panic!("leader {} never resigned", id));
                assert!(until >= from);
                (from, until)
            })
            .collect();
        beliefs.sort();

        for pair in beliefs.windows(2) {
            assert!(
                pair[1].0 >= pair[0].1,
                "leadership overlapped: {:?} began before {:?} ended",
                pair[1],
                pair[0]
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_leader_with_three_candidates() {
        assert_leadership_never_overlaps(3).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_leader_with_six_candidates() {
        assert_leadership_never_overlaps(6).await;
    }

    struct PanickingService;

    #[async_trait]
    impl ElectionService for PanickingService {
        fn election_path(&self) -> &str {
            "/election"
        }

        async fn register(&self, _id_prefix: &str, _metadata: &str) -> Result<Registration> {
            panic!("registration exploded");
        }

        async fn resign(&self, _candidate: &Candidate) -> Result<()> {
            Ok(())
        }

        async fn leader(&self) -> Result<Option<CandidateId>> {
            Ok(None)
        }

        async fn candidates(&self) -> Result<Vec<CandidateId>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_panicked_candidates_do_not_block_completion() {
        let coordinator = ElectionCoordinator::new(Arc::new(PanickingService), config(1));

        let (responses, summary) = coordinator.start(2).collect().await.unwrap();

        assert!(responses.is_empty());
        assert_eq!(summary.completed(), 2);
        assert!(summary
            .reports
            .iter()
            .all(|r| r.ordinal.is_none() && matches!(r.outcome, CandidateOutcome::Panicked(_))));
    }
}
