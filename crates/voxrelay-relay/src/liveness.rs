//! Background removal of silent sessions.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::registry::SessionRegistry;

/// Periodically unregister sessions with no inbound frame within `window`.
///
/// Runs every half window so a silent session is gone at most 1.5 windows
/// after its last frame. Stops when `shutdown` changes.
pub fn spawn_liveness_sweeper(
    registry: SessionRegistry,
    window: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let period = (window / 2).max(Duration::from_millis(10));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // Skip first immediate tick
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let reaped = registry.reap_stale(window).await;
                    if !reaped.is_empty() {
                        info!(removed = reaped.len(), "Liveness sweep removed silent sessions");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("Liveness sweeper stopped");
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn silent_session_is_swept() {
        let registry = SessionRegistry::new(8);
        let mut reg = registry.register().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = spawn_liveness_sweeper(registry.clone(), Duration::from_millis(40), shutdown_rx);

        // Closed queue means the socket task would now close the connection.
        let closed = tokio::time::timeout(Duration::from_secs(2), reg.outbound_rx.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
        assert_eq!(registry.session_count().await, 0);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
