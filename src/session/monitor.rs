//! Session establishment and the connection event stream

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::config::CoordinationConfig;
use crate::coord::{ConnectionEvent, Connector, Coordinator};
use crate::error::{Error, Result};

/// Lazy, unbounded sequence of connection-state changes for one session.
///
/// Ends only once the session itself is gone.
pub struct ConnectionEvents {
    inner: UnboundedReceiverStream<ConnectionEvent>,
}

impl ConnectionEvents {
    pub fn new(rx: tokio::sync::mpsc::UnboundedReceiver<ConnectionEvent>) -> Self {
        Self {
            inner: UnboundedReceiverStream::new(rx),
        }
    }
}

impl Stream for ConnectionEvents {
    type Item = ConnectionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Opens the single session shared by every candidate in a run
pub struct SessionMonitor;

impl SessionMonitor {
    /// Connect to the configured ensemble.
    ///
    /// Returns the shared client handle and the session's event stream.
    /// Failure to establish the session is fatal to the run.
    pub async fn connect(
        connector: &dyn Connector,
        config: &CoordinationConfig,
    ) -> Result<(Arc<dyn Coordinator>, ConnectionEvents)> {
        config.validate()?;
        let servers = config.server_list();

        tracing::info!("Connecting to coordination service at {}", servers.join(","));

        match connector
            .open_session(&servers, config.session_timeout())
            .await
        {
            Ok((client, events)) => {
                tracing::info!("Session {:#x} established", client.session_id());
                Ok((client, ConnectionEvents::new(events)))
            }
            Err(e) => {
                tracing::error!("Failed to connect to coordination service: {}", e);
                Err(match e {
                    Error::ConnectionFailed { .. } => e,
                    other => Error::ConnectionFailed {
                        servers: config.servers.clone(),
                        reason: other.to_string(),
                    },
                })
            }
        }
    }
}
