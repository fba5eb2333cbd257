//! Election Run Harness
//!
//! Wires one run together: open the shared session, start the watchdog,
//! run the candidates and verify their responses. A fatal session
//! condition reported by the watchdog aborts the run; a partial result is
//! never verified.

use std::sync::Arc;

use serde::Serialize;

use crate::config::WolfElectConfig;
use crate::coord::Connector;
use crate::election::{
    ElectionCoordinator, ResultVerifier, RunSummary, SequentialElection, Verification,
};
use crate::error::{Error, Result};
use crate::session::{SessionMonitor, Watchdog};

/// Everything a completed run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub election_path: String,
    pub verification: Verification,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.verification.passed
    }
}

/// Execute one election run against the given ensemble.
///
/// Returns `Err` only for fatal conditions (session establishment failure,
/// session loss, expiry). A run that completed but violated an invariant
/// is `Ok` with a failed verification.
pub async fn run(config: &WolfElectConfig, connector: &dyn Connector) -> Result<RunReport> {
    config.validate()?;

    let (client, events) = SessionMonitor::connect(connector, &config.coordination).await?;
    let mut watchdog = Watchdog::new(config.session.max_disconnect_retries).spawn(events);

    let election_config = config.election.clone();
    let work = async move {
        // let the initial connection events land before candidates start
        tokio::time::sleep(election_config.settle_delay()).await;

        let service = Arc::new(SequentialElection::new(client, election_config.path.clone()).await?);
        let coordinator = ElectionCoordinator::new(service, election_config.clone());

        let (responses, summary) = coordinator.start(election_config.candidates).collect().await?;
        let verification = ResultVerifier::new(election_config.candidates as usize).verify(&responses);

        Ok::<_, Error>(RunReport {
            election_path: election_config.path,
            verification,
            summary,
        })
    };
    let mut work = Box::pin(work);

    let finished = tokio::select! {
        report = &mut work => report,
        watched = &mut watchdog => match watched {
            Ok(Err(e)) => {
                tracing::error!("Aborting election run: {}", e);
                // drops the election run, which aborts its candidates
                drop(work);
                return Err(e);
            }
            Ok(Ok(())) => {
                tracing::warn!("Connection event stream ended, finishing run without a watchdog");
                (&mut work).await
            }
            Err(e) => {
                drop(work);
                return Err(Error::Internal(format!("watchdog task failed: {}", e)));
            }
        },
    };

    watchdog.abort();
    let report = finished?;

    tracing::info!("{}", report.verification.diagnosis());
    Ok(report)
}
