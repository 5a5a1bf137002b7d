//! Drives a document change source through a reconciler into the broker.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use voxrelay_core::reconcile::{
    DocumentChangeSource, FinishPolicy, RawNotification, Reconciler, SourceEnd,
};

use crate::router::{Broker, Route};

enum SourceEvent {
    Change(RawNotification),
    End(SourceEnd),
}

/// Attach `source` to a fresh reconciler and publish everything it emits to
/// all sessions.
///
/// Source callbacks only enqueue; reconciliation and publishing happen on
/// the pump task, one notification at a time. When the source ends, an
/// in-progress generation is closed.
pub fn spawn_source_pump(
    mut source: Box<dyn DocumentChangeSource>,
    broker: Arc<Broker>,
    policy: FinishPolicy,
) -> JoinHandle<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let change_tx = tx.clone();
    source.on_change(Box::new(move |notification| {
        let _ = change_tx.send(SourceEvent::Change(notification));
    }));
    source.on_end(Box::new(move |end| {
        let _ = tx.send(SourceEvent::End(end));
    }));
    let source_task = source.start();

    tokio::spawn(async move {
        let mut reconciler = Reconciler::new(policy);
        let mut end = SourceEnd::Finished;

        while let Some(event) = rx.recv().await {
            match event {
                SourceEvent::Change(notification) => {
                    for envelope in reconciler.apply(&notification) {
                        broker.publish(&envelope, Route::BroadcastAll).await;
                    }
                }
                SourceEvent::End(reason) => {
                    end = reason;
                    break;
                }
            }
        }

        for envelope in reconciler.end() {
            broker.publish(&envelope, Route::BroadcastAll).await;
        }
        match end {
            SourceEnd::Finished => info!("Document source finished"),
            SourceEnd::Failed(reason) => warn!(reason = %reason, "Document source failed"),
        }
        source_task.abort();
    })
}
