//! Election Orchestration Module
//!
//! Candidates register with an `ElectionService`, wait to be promoted,
//! do leader-only work and resign. The coordinator runs a batch of
//! candidates against one election path and the verifier checks the
//! collected outcomes.

pub mod service;
pub mod sequential;
mod candidate;
mod coordinator;
mod verify;

pub use service::{Candidate, CandidateId, ElectionService, LeadershipChanges, Registration};
pub use sequential::SequentialElection;
pub use candidate::{CandidateOutcome, CandidateProcess, ElectionResponse};
pub use coordinator::{CandidateReport, ElectionCoordinator, ElectionRun, RunSummary};
pub use verify::{ResultVerifier, Verification, VerificationFailure};
