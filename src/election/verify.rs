//! Result Verifier
//!
//! Checks the collected responses of a finished run against the run's
//! invariants: every response claims leadership, and every candidate led
//! exactly once.

use serde::Serialize;
use tokio::sync::mpsc;

use super::candidate::ElectionResponse;
use super::service::CandidateId;

/// An invariant a run violated
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerificationFailure {
    /// A response arrived that does not claim leadership
    NonLeaderResponse { candidate_id: CandidateId },
    /// Fewer (or more) candidates led than were started
    CountMismatch { expected: usize, received: usize },
}

impl std::fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerificationFailure::NonLeaderResponse { candidate_id } => {
                write!(f, "non-leader response from candidate {}", candidate_id)
            }
            VerificationFailure::CountMismatch { expected, received } => {
                write!(f, "expected {} responses but received {}", expected, received)
            }
        }
    }
}

/// Outcome of verifying a run
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    pub passed: bool,
    pub expected: usize,
    pub responses: Vec<ElectionResponse>,
    pub failures: Vec<VerificationFailure>,
}

impl Verification {
    /// Human-readable summary naming each violated invariant
    pub fn diagnosis(&self) -> String {
        if self.passed {
            format!(
                "TEST PASSED: {} of {} candidates became leader",
                self.responses.len(),
                self.expected
            )
        } else {
            let reasons: Vec<String> = self.failures.iter().map(ToString::to_string).collect();
            format!("TEST FAILED: {}", reasons.join("; "))
        }
    }

    pub fn has_count_mismatch(&self) -> bool {
        self.failures
            .iter()
            .any(|f| matches!(f, VerificationFailure::CountMismatch { .. }))
    }

    pub fn has_non_leader_response(&self) -> bool {
        self.failures
            .iter()
            .any(|f| matches!(f, VerificationFailure::NonLeaderResponse { .. }))
    }
}

/// Verifies the responses of a run of `expected` candidates
#[derive(Debug, Clone, Copy)]
pub struct ResultVerifier {
    expected: usize,
}

impl ResultVerifier {
    pub fn new(expected: usize) -> Self {
        Self { expected }
    }

    /// Check a complete set of responses
    pub fn verify(&self, responses: &[ElectionResponse]) -> Verification {
        let mut failures: Vec<VerificationFailure> = responses
            .iter()
            .filter(|r| !r.is_leader)
            .map(|r| VerificationFailure::NonLeaderResponse {
                candidate_id: r.candidate_id.clone(),
            })
            .collect();

        if responses.len() != self.expected {
            failures.push(VerificationFailure::CountMismatch {
                expected: self.expected,
                received: responses.len(),
            });
        }

        for failure in &failures {
            tracing::warn!("Verification failed: {}", failure);
        }

        Verification {
            passed: failures.is_empty(),
            expected: self.expected,
            responses: responses.to_vec(),
            failures,
        }
    }

    /// Consume a result stream until it closes, then verify it
    pub async fn verify_stream(&self, mut stream: mpsc::Receiver<ElectionResponse>) -> Verification {
        let mut responses = Vec::new();
        while let Some(response) = stream.recv().await {
            responses.push(response);
        }
        self.verify(&responses)
    }
}
