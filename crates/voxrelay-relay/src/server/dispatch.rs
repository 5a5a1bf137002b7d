//! Per-session inbound dispatch.
//!
//! Each connected session owns one [`SessionInbound`]: a reconciler for
//! document snapshots it reports and a segmenter for text it dictates.
//! Everything this session causes to be published excludes the session
//! itself.

use tracing::{debug, warn};
use voxrelay_core::config::EngineConfig;
use voxrelay_core::envelope::{Envelope, ValidationError, validate_frame};
use voxrelay_core::reconcile::{RawNotification, Reconciler, Segmenter};

use crate::registry::SessionId;
use crate::router::{Broker, DeliveryReport, Route};

pub struct SessionInbound {
    session_id: SessionId,
    reconciler: Reconciler,
    segmenter: Segmenter,
}

impl SessionInbound {
    pub fn new(session_id: SessionId, engine: &EngineConfig) -> voxrelay_core::Result<Self> {
        Ok(Self {
            session_id,
            reconciler: Reconciler::new(engine.finish_policy),
            segmenter: Segmenter::new(&engine.trigger_keyword)?,
        })
    }

    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    const fn route(&self) -> Route {
        Route::BroadcastExcludingSender(self.session_id)
    }

    /// Validate one raw text frame and dispatch it.
    ///
    /// An invalid frame is rejected as a whole; nothing is published.
    pub async fn handle_frame(
        &mut self,
        broker: &Broker,
        frame: &str,
    ) -> Result<Vec<DeliveryReport>, ValidationError> {
        let envelope = validate_frame(frame)?;
        Ok(self.handle_envelope(broker, envelope).await)
    }

    pub async fn handle_envelope(
        &mut self,
        broker: &Broker,
        envelope: Envelope,
    ) -> Vec<DeliveryReport> {
        match envelope {
            Envelope::StateChange(_)
            | Envelope::ContentDelta(_)
            | Envelope::SubmitCommand(_)
            | Envelope::SetPendingInput(_)
            | Envelope::ConfirmPendingInput => {
                vec![broker.publish(&envelope, self.route()).await]
            }
            Envelope::DocumentSnapshot(snapshot) => {
                let emitted = self.reconciler.apply(&RawNotification::new(
                    snapshot.context,
                    snapshot.content,
                    snapshot.producing,
                ));
                self.publish_all(broker, emitted).await
            }
            Envelope::Transcript(transcript) => {
                let segmentation = self.segmenter.push(&transcript.content);
                let mut outgoing: Vec<Envelope> = segmentation
                    .completed
                    .into_iter()
                    .map(Envelope::submit)
                    .collect();
                if transcript.is_final {
                    outgoing.extend(self.segmenter.flush().map(Envelope::submit));
                } else if segmentation.pending_changed && !segmentation.pending.is_empty() {
                    outgoing.push(Envelope::pending_input(segmentation.pending));
                }
                self.publish_all(broker, outgoing).await
            }
            Envelope::SessionWelcome(_) => {
                debug!(session_id = %self.session_id, "Ignoring inbound session-welcome");
                Vec::new()
            }
        }
    }

    /// The session is gone: submit any half-dictated segment and close an
    /// in-progress generation.
    pub async fn close(&mut self, broker: &Broker) -> Vec<DeliveryReport> {
        let mut outgoing: Vec<Envelope> = self
            .segmenter
            .flush()
            .map(Envelope::submit)
            .into_iter()
            .collect();
        outgoing.extend(self.reconciler.end());
        if !outgoing.is_empty() {
            debug!(
                session_id = %self.session_id,
                count = outgoing.len(),
                "Flushing session state on disconnect"
            );
        }
        self.publish_all(broker, outgoing).await
    }

    async fn publish_all(&self, broker: &Broker, envelopes: Vec<Envelope>) -> Vec<DeliveryReport> {
        let mut reports = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            let report = broker.publish(&envelope, self.route()).await;
            if !report.is_clean() {
                warn!(
                    session_id = %self.session_id,
                    kind = %envelope.kind(),
                    failed = report.failures.len(),
                    "Some deliveries failed"
                );
            }
            reports.push(report);
        }
        reports
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::registry::{Registration, SessionRegistry};
    use voxrelay_core::envelope::GenerationState;

    async fn setup() -> (Broker, SessionInbound, Registration) {
        let broker = Broker::new(SessionRegistry::new(64), None);
        let source = broker.registry().register().await;
        let observer = broker.registry().register().await;
        let inbound = SessionInbound::new(source.session_id, &EngineConfig::default()).unwrap();
        (broker, inbound, observer)
    }

    fn received(reg: &mut Registration) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(frame) = reg.outbound_rx.try_recv() {
            out.push(validate_frame(&frame).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn invalid_frame_publishes_nothing() {
        let (broker, mut inbound, mut observer) = setup().await;
        let err = inbound
            .handle_frame(&broker, r#"{"kind":"content-delta","content":"x"}"#)
            .await
            .unwrap_err();
        assert!(!err.violations.is_empty());
        assert!(received(&mut observer).is_empty());
        assert_eq!(broker.stats().published, 0);
    }

    #[tokio::test]
    async fn command_kinds_are_forwarded_to_others() {
        let (broker, mut inbound, mut observer) = setup().await;
        inbound
            .handle_frame(&broker, r#"{"kind":"confirm-pending-input"}"#)
            .await
            .unwrap();
        assert_eq!(received(&mut observer), vec![Envelope::ConfirmPendingInput]);
    }

    #[tokio::test]
    async fn snapshots_become_state_changes_and_deltas() {
        let (broker, mut inbound, mut observer) = setup().await;
        for (content, producing) in [("", true), ("Hel", true), ("Hello world", false)] {
            let frame = serde_json::json!({
                "kind": "document-snapshot",
                "content": content,
                "producing": producing,
                "context": "chat/1",
            });
            inbound
                .handle_frame(&broker, &frame.to_string())
                .await
                .unwrap();
        }

        let kinds: Vec<&'static str> = received(&mut observer)
            .iter()
            .map(|e| e.kind().as_str())
            .collect();
        assert_eq!(
            kinds,
            vec!["state-change", "content-delta", "content-delta", "state-change"]
        );
    }

    #[tokio::test]
    async fn transcripts_submit_at_trigger_keyword() {
        let (broker, mut inbound, mut observer) = setup().await;
        inbound
            .handle_frame(
                &broker,
                r#"{"kind":"transcript","content":"book a flight done tomorrow"}"#,
            )
            .await
            .unwrap();

        assert_eq!(
            received(&mut observer),
            vec![
                Envelope::submit("book a flight"),
                Envelope::pending_input("tomorrow"),
            ]
        );
    }

    #[tokio::test]
    async fn final_transcript_flushes_remainder() {
        let (broker, mut inbound, mut observer) = setup().await;
        inbound
            .handle_frame(
                &broker,
                r#"{"kind":"transcript","content":"call mom","final":true}"#,
            )
            .await
            .unwrap();
        assert_eq!(received(&mut observer), vec![Envelope::submit("call mom")]);
    }

    #[tokio::test]
    async fn close_flushes_segment_and_finishes_generation() {
        let (broker, mut inbound, mut observer) = setup().await;
        inbound
            .handle_frame(&broker, r#"{"kind":"transcript","content":"half a thought"}"#)
            .await
            .unwrap();
        inbound
            .handle_frame(
                &broker,
                r#"{"kind":"document-snapshot","content":"Hi","producing":true,"context":"c"}"#,
            )
            .await
            .unwrap();
        received(&mut observer);

        inbound.close(&broker).await;
        let flushed = received(&mut observer);
        assert_eq!(flushed[0], Envelope::submit("half a thought"));
        assert!(matches!(
            &flushed[1],
            Envelope::StateChange(s) if s.state == GenerationState::Finished
        ));
    }

    #[tokio::test]
    async fn close_sends_held_back_repeat_before_finishing() {
        let (broker, mut inbound, mut observer) = setup().await;
        for content in ["ab", "abab"] {
            let frame = serde_json::json!({
                "kind": "document-snapshot",
                "content": content,
                "producing": true,
                "context": "c",
            });
            inbound
                .handle_frame(&broker, &frame.to_string())
                .await
                .unwrap();
        }
        received(&mut observer);

        inbound.close(&broker).await;
        let flushed = received(&mut observer);
        assert_eq!(flushed.len(), 2);
        assert!(matches!(&flushed[0], Envelope::ContentDelta(d) if d.content == "ab"));
        assert!(matches!(
            &flushed[1],
            Envelope::StateChange(s) if s.state == GenerationState::Finished
        ));
    }

    #[tokio::test]
    async fn inbound_welcome_is_ignored() {
        let (broker, mut inbound, mut observer) = setup().await;
        let reports = inbound
            .handle_frame(&broker, r#"{"kind":"session-welcome","sessionId":"x"}"#)
            .await
            .unwrap();
        assert!(reports.is_empty());
        assert!(received(&mut observer).is_empty());
    }
}
