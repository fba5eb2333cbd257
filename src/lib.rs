//! WolfElect - Leader Election Orchestrator
//!
//! Coordinates leader election among competing candidates on top of a
//! strongly-consistent, ZooKeeper-style coordination service.
//!
//! # Architecture
//!
//! Every candidate registers an ephemeral sequential node under a shared
//! election path; the lowest live sequence number leads. Candidates wait to
//! be promoted, do leader-only work and resign, which hands leadership to
//! the next registration in line. A watchdog follows the shared session and
//! aborts the whole run when connectivity is lost for good, since a
//! candidate can no longer trust its own view of who leads.
//!
//! # Features
//!
//! - Coordination client abstraction with an in-process ensemble
//! - Disconnect-retry-then-fatal session watchdog
//! - Candidate control loop with bounded leadership wait
//! - Join-before-close result collection and run verification

pub mod config;
pub mod error;
pub mod coord;
pub mod session;
pub mod election;
pub mod runner;

pub use config::WolfElectConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WolfElectConfig;
    pub use crate::error::{Error, Result};
    pub use crate::coord::{Connector, Coordinator, MemoryEnsemble};
    pub use crate::session::{SessionMonitor, Watchdog};
    pub use crate::election::{
        ElectionCoordinator, ElectionResponse, ElectionService, ResultVerifier,
        SequentialElection,
    };
    pub use crate::runner::{run, RunReport};
}
