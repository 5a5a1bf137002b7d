//! Relay broker: fans validated envelopes out to sessions.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::{debug, error, warn};
use voxrelay_core::envelope::Envelope;

use crate::error::{RoutingError, TransportError};
use crate::registry::{ConnectionHandle, Frame, SessionId, SessionRegistry};
use crate::storage::JournalHandle;

/// Destination selector for one publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Every session except the one the envelope came from.
    BroadcastExcludingSender(SessionId),
    /// Exactly one session.
    Unicast(SessionId),
    /// Every session.
    BroadcastAll,
}

/// Why one destination was not delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    TargetNotFound,
    Closed,
    Backpressure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryFailure {
    pub session_id: String,
    pub kind: FailureKind,
    pub message: String,
}

impl From<RoutingError> for DeliveryFailure {
    fn from(e: RoutingError) -> Self {
        let RoutingError::TargetNotFound { session_id } = &e;
        Self {
            session_id: session_id.clone(),
            kind: FailureKind::TargetNotFound,
            message: e.to_string(),
        }
    }
}

impl From<TransportError> for DeliveryFailure {
    fn from(e: TransportError) -> Self {
        let (session_id, kind) = match &e {
            TransportError::Closed { session_id } => (session_id, FailureKind::Closed),
            TransportError::Backpressure { session_id } => {
                (session_id, FailureKind::Backpressure)
            }
        };
        Self {
            session_id: session_id.to_string(),
            kind,
            message: e.to_string(),
        }
    }
}

/// Outcome of one publish. Failures are isolated per destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub delivered: Vec<SessionId>,
    pub failures: Vec<DeliveryFailure>,
}

impl DeliveryReport {
    pub fn target_not_found(&self) -> bool {
        self.failures
            .iter()
            .any(|f| f.kind == FailureKind::TargetNotFound)
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Counter snapshot returned by [`Broker::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerStats {
    pub published: u64,
    pub delivered: u64,
    pub target_not_found: u64,
    pub transport_failures: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    target_not_found: AtomicU64,
    transport_failures: AtomicU64,
}

/// Routes envelopes through the session registry and offers them to the
/// journal after delivery.
pub struct Broker {
    registry: SessionRegistry,
    journal: Option<JournalHandle>,
    counters: Counters,
}

impl Broker {
    pub fn new(registry: SessionRegistry, journal: Option<JournalHandle>) -> Self {
        Self {
            registry,
            journal,
            counters: Counters::default(),
        }
    }

    pub const fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Deliver `envelope` to the sessions selected by `route`.
    ///
    /// The envelope is serialized once and queued on each destination's
    /// outbound queue without waiting. A session whose queue is closed or
    /// full is unregistered once the loop has finished; other destinations
    /// are unaffected.
    pub async fn publish(&self, envelope: &Envelope, route: Route) -> DeliveryReport {
        let frame: Frame = match envelope.to_frame() {
            Ok(text) => Frame::from(text),
            Err(e) => {
                error!(error = %e, kind = %envelope.kind(), "Failed to serialize envelope");
                return DeliveryReport::default();
            }
        };
        self.counters.published.fetch_add(1, Ordering::Relaxed);

        let mut report = DeliveryReport::default();
        let targets = self.resolve(route, &mut report).await;

        let mut broken = Vec::new();
        for handle in targets {
            match handle.try_send(Arc::clone(&frame)) {
                Ok(()) => report.delivered.push(handle.session_id),
                Err(e) => {
                    warn!(error = %e, kind = %envelope.kind(), "Delivery failed");
                    broken.push(handle.session_id);
                    report.failures.push(e.into());
                }
            }
        }
        for session_id in broken {
            self.registry.unregister(session_id).await;
        }

        self.count(&report);
        debug!(
            kind = %envelope.kind(),
            delivered = report.delivered.len(),
            failed = report.failures.len(),
            "Envelope published"
        );

        if let Some(journal) = &self.journal {
            journal.record(envelope);
        }
        report
    }

    async fn resolve(&self, route: Route, report: &mut DeliveryReport) -> Vec<ConnectionHandle> {
        match route {
            Route::BroadcastExcludingSender(sender) => self.registry.snapshot(Some(sender)).await,
            Route::BroadcastAll => self.registry.snapshot(None).await,
            Route::Unicast(target) => match self.registry.lookup(target).await {
                Ok(handle) => vec![handle],
                Err(e) => {
                    warn!(error = %e, "Unicast target not found, delivery dropped");
                    report.failures.push(e.into());
                    Vec::new()
                }
            },
        }
    }

    fn count(&self, report: &DeliveryReport) {
        self.counters
            .delivered
            .fetch_add(report.delivered.len() as u64, Ordering::Relaxed);
        for failure in &report.failures {
            let counter = match failure.kind {
                FailureKind::TargetNotFound => &self.counters.target_not_found,
                FailureKind::Closed | FailureKind::Backpressure => {
                    &self.counters.transport_failures
                }
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            target_not_found: self.counters.target_not_found.load(Ordering::Relaxed),
            transport_failures: self.counters.transport_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::registry::Registration;
    use voxrelay_core::envelope::validate_frame;

    fn broker() -> Broker {
        Broker::new(SessionRegistry::new(4), None)
    }

    fn next_envelope(reg: &mut Registration) -> Envelope {
        let frame = reg.outbound_rx.try_recv().unwrap();
        validate_frame(&frame).unwrap()
    }

    #[tokio::test]
    async fn broadcast_excluding_sender_skips_sender() {
        let broker = broker();
        let mut a = broker.registry().register().await;
        let mut b = broker.registry().register().await;
        let mut c = broker.registry().register().await;

        let report = broker
            .publish(
                &Envelope::submit("hi"),
                Route::BroadcastExcludingSender(a.session_id),
            )
            .await;

        assert_eq!(report.delivered, vec![b.session_id, c.session_id]);
        assert!(report.is_clean());
        assert!(a.outbound_rx.try_recv().is_err());
        assert_eq!(next_envelope(&mut b), Envelope::submit("hi"));
        assert_eq!(next_envelope(&mut c), Envelope::submit("hi"));
    }

    #[tokio::test]
    async fn broadcast_all_reaches_everyone() {
        let broker = broker();
        let mut a = broker.registry().register().await;
        let mut b = broker.registry().register().await;

        broker
            .publish(&Envelope::ConfirmPendingInput, Route::BroadcastAll)
            .await;

        assert_eq!(next_envelope(&mut a), Envelope::ConfirmPendingInput);
        assert_eq!(next_envelope(&mut b), Envelope::ConfirmPendingInput);
    }

    #[tokio::test]
    async fn unicast_to_departed_session_is_recorded_not_retried() {
        let broker = broker();
        let b = broker.registry().register().await;
        broker.registry().unregister(b.session_id).await;

        let report = broker
            .publish(&Envelope::submit("x"), Route::Unicast(b.session_id))
            .await;

        assert!(report.delivered.is_empty());
        assert!(report.target_not_found());
        assert_eq!(report.failures[0].session_id, b.session_id.to_string());
        assert_eq!(broker.stats().target_not_found, 1);
        assert_eq!(broker.stats().delivered, 0);
    }

    #[tokio::test]
    async fn closed_connection_is_unregistered_without_affecting_others() {
        let broker = broker();
        let gone = broker.registry().register().await;
        let mut live = broker.registry().register().await;
        let gone_id = gone.session_id;
        drop(gone);

        let report = broker
            .publish(&Envelope::submit("x"), Route::BroadcastAll)
            .await;

        assert_eq!(report.delivered, vec![live.session_id]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, FailureKind::Closed);
        assert!(!broker.registry().is_connected(gone_id).await);
        assert_eq!(next_envelope(&mut live), Envelope::submit("x"));
        assert_eq!(broker.stats().transport_failures, 1);
    }

    #[tokio::test]
    async fn stalled_session_is_dropped() {
        let broker = Broker::new(SessionRegistry::new(1), None);
        let stalled = broker.registry().register().await;

        broker.publish(&Envelope::submit("1"), Route::BroadcastAll).await;
        let report = broker.publish(&Envelope::submit("2"), Route::BroadcastAll).await;

        assert_eq!(report.failures[0].kind, FailureKind::Backpressure);
        assert!(!broker.registry().is_connected(stalled.session_id).await);
    }

    #[tokio::test]
    async fn per_session_order_follows_publish_order() {
        let broker = broker();
        let sender = broker.registry().register().await;
        let mut observer = broker.registry().register().await;

        for text in ["one", "two", "three"] {
            broker
                .publish(
                    &Envelope::submit(text),
                    Route::BroadcastExcludingSender(sender.session_id),
                )
                .await;
        }

        for text in ["one", "two", "three"] {
            assert_eq!(next_envelope(&mut observer), Envelope::submit(text));
        }
        assert_eq!(broker.stats().published, 3);
    }
}
