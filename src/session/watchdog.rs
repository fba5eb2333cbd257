//! Connection watchdog
//!
//! Consumes a session's connection events and turns sustained loss of
//! connectivity into a fatal error. The session is never re-established
//! here: a resumed or replacement session may not hold the registrations
//! the candidates believe they have.

use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;

use crate::coord::{ConnectionEvent, ConnectionState};
use crate::error::{Error, Result};

/// Consecutive disconnects tolerated before the run is aborted
pub const DEFAULT_MAX_DISCONNECT_RETRIES: u32 = 5;

/// Applies the disconnect-retry-then-fatal policy
#[derive(Debug, Clone, Copy)]
pub struct Watchdog {
    max_disconnect_retries: u32,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DISCONNECT_RETRIES)
    }
}

impl Watchdog {
    pub fn new(max_disconnect_retries: u32) -> Self {
        Self {
            max_disconnect_retries,
        }
    }

    /// Watch events until the stream ends or the session is lost.
    ///
    /// Returns `Error::SessionLost` once the disconnect count exceeds the
    /// threshold without an intervening `Connected`, and
    /// `Error::SessionExpired` as soon as the session expires. Every
    /// `Connected` event resets the disconnect count, so only sustained
    /// disconnection is fatal.
    pub async fn watch<S>(self, mut events: S) -> Result<()>
    where
        S: Stream<Item = ConnectionEvent> + Unpin,
    {
        let mut disconnects: u32 = 0;

        while let Some(event) = events.next().await {
            match event.state {
                ConnectionState::Connected => {
                    if disconnects > 0 {
                        tracing::info!(
                            "Session {:#x} reconnected after {} disconnects",
                            event.session_id,
                            disconnects
                        );
                    } else {
                        tracing::info!("Session {:#x} connected", event.session_id);
                    }
                    disconnects = 0;
                }
                ConnectionState::Disconnected => {
                    disconnects += 1;
                    tracing::warn!(
                        "Session {:#x} disconnected ({}/{})",
                        event.session_id,
                        disconnects,
                        self.max_disconnect_retries
                    );
                    if disconnects > self.max_disconnect_retries {
                        tracing::error!(
                            "Lost connectivity to coordination service, giving up after {} disconnects",
                            disconnects
                        );
                        return Err(Error::SessionLost { disconnects });
                    }
                }
                ConnectionState::Expired => {
                    tracing::error!("Session {:#x} expired", event.session_id);
                    return Err(Error::SessionExpired(event.session_id));
                }
                ConnectionState::Connecting => {
                    tracing::debug!("Session {:#x} connecting", event.session_id);
                }
                ConnectionState::Closed => {
                    tracing::info!("Session {:#x} closed", event.session_id);
                }
            }
        }

        Ok(())
    }

    /// Run the watchdog on its own task
    pub fn spawn<S>(self, events: S) -> JoinHandle<Result<()>>
    where
        S: Stream<Item = ConnectionEvent> + Unpin + Send + 'static,
    {
        tokio::spawn(self.watch(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn events(states: &[ConnectionState]) -> impl Stream<Item = ConnectionEvent> + Unpin {
        stream::iter(
            states
                .iter()
                .map(|state| ConnectionEvent::new(*state, 7))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_disconnect_storm_is_fatal() {
        let storm = [ConnectionState::Connected]
            .into_iter()
            .chain(std::iter::repeat(ConnectionState::Disconnected).take(6))
            .collect::<Vec<_>>();

        let result = Watchdog::default().watch(events(&storm)).await;
        assert!(matches!(result, Err(Error::SessionLost { disconnects: 6 })));
    }

    #[tokio::test]
    async fn test_disconnects_within_budget_are_tolerated() {
        let states = std::iter::repeat(ConnectionState::Disconnected)
            .take(5)
            .collect::<Vec<_>>();

        assert!(Watchdog::default().watch(events(&states)).await.is_ok());
    }

    #[tokio::test]
    async fn test_reconnect_resets_budget() {
        let mut states = vec![ConnectionState::Disconnected; 5];
        states.push(ConnectionState::Connected);
        states.extend(vec![ConnectionState::Disconnected; 5]);

        assert!(Watchdog::default().watch(events(&states)).await.is_ok());
    }

    #[tokio::test]
    async fn test_expiry_is_fatal_immediately() {
        let states = [ConnectionState::Connected, ConnectionState::Expired];

        let result = Watchdog::default().watch(events(&states)).await;
        assert!(matches!(result, Err(Error::SessionExpired(7))));
    }

    #[tokio::test]
    async fn test_custom_threshold() {
        let states = vec![ConnectionState::Disconnected; 2];

        let result = Watchdog::new(1).spawn(events(&states)).await.unwrap();
        assert!(matches!(result, Err(Error::SessionLost { disconnects: 2 })));
    }
}
