//! Journal recorder and writer task.
//!
//! The broker hands every published envelope to a [`JournalHandle`]. The
//! handle folds streaming deltas into whole-response text and queues the
//! resulting entries; a single writer task owns the [`Journal`] and performs
//! all file I/O. Delivery never waits on the journal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, SubsecRound, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use voxrelay_core::envelope::{Envelope, GenerationState};

use super::journal::{Journal, JournalEntry, is_header_safe_id};

/// Responses accumulated at once. Past this, the least recently opened one
/// is dropped; its id never finished.
pub const MAX_OPEN_RESPONSES: usize = 256;

/// Response text accumulated so far for one correlation id.
#[derive(Debug)]
struct Accumulated {
    started: DateTime<Utc>,
    /// Opening order, for eviction.
    seq: u64,
    context: String,
    text: String,
}

#[derive(Debug, Default)]
struct Accumulators {
    open: HashMap<String, Accumulated>,
    next_seq: u64,
}

impl Accumulators {
    fn entry(&mut self, correlation_id: &str, context: &str) -> &mut Accumulated {
        if !self.open.contains_key(correlation_id) && self.open.len() >= MAX_OPEN_RESPONSES {
            self.evict_oldest();
        }
        let next_seq = &mut self.next_seq;
        self.open
            .entry(correlation_id.to_string())
            .or_insert_with(|| {
                *next_seq += 1;
                Accumulated {
                    started: journal_now(),
                    seq: *next_seq,
                    context: context.to_string(),
                    text: String::new(),
                }
            })
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .open
            .iter()
            .min_by_key(|(_, acc)| acc.seq)
            .map(|(id, _)| id.clone());
        if let Some(id) = oldest {
            self.open.remove(&id);
            warn!(correlation_id = %id, "Too many open responses, dropping the oldest");
        }
    }
}

/// Cheap, cloneable front end of the journal writer.
#[derive(Clone)]
pub struct JournalHandle {
    tx: mpsc::Sender<JournalEntry>,
    accumulators: Arc<Mutex<Accumulators>>,
}

impl JournalHandle {
    /// Offer a delivered envelope to the journal. Never blocks.
    pub fn record(&self, envelope: &Envelope) {
        let entry = match envelope {
            Envelope::ContentDelta(delta) => {
                if !is_header_safe_id(&delta.correlation_id) {
                    warn!(
                        correlation_id = %delta.correlation_id,
                        "Correlation id cannot be journaled, delta skipped"
                    );
                    return;
                }
                let mut accumulators = self
                    .accumulators
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                let acc = accumulators.entry(&delta.correlation_id, &delta.context);
                acc.text.push_str(&delta.content);
                JournalEntry {
                    timestamp: acc.started,
                    kind: envelope.kind().as_str().to_string(),
                    correlation_id: Some(delta.correlation_id.clone()),
                    context: Some(acc.context.clone()),
                    content: acc.text.clone(),
                }
            }
            Envelope::StateChange(change) => {
                if change.state == GenerationState::Finished {
                    self.accumulators
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .open
                        .remove(&change.correlation_id);
                }
                return;
            }
            Envelope::SubmitCommand(command) => JournalEntry {
                timestamp: journal_now(),
                kind: envelope.kind().as_str().to_string(),
                correlation_id: None,
                context: None,
                content: command.content.clone(),
            },
            Envelope::SetPendingInput(_)
            | Envelope::ConfirmPendingInput
            | Envelope::DocumentSnapshot(_)
            | Envelope::Transcript(_)
            | Envelope::SessionWelcome(_) => return,
        };

        match self.tx.try_send(entry) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(entry)) => {
                warn!(
                    kind = %entry.kind,
                    correlation_id = entry.correlation_id.as_deref().unwrap_or("-"),
                    "Journal queue full, entry dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Journal writer stopped, entry dropped");
            }
        }
    }

    /// Number of responses currently being accumulated.
    pub fn open_responses(&self) -> usize {
        self.accumulators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .open
            .len()
    }
}

/// Spawn the writer task that owns `journal`.
///
/// The task runs until every handle is dropped or `shutdown` fires; on
/// shutdown it drains the queue first. It returns the journal so callers
/// can inspect the final state.
pub fn spawn_journal_writer(
    mut journal: Journal,
    capacity: usize,
    mut shutdown: watch::Receiver<bool>,
) -> (JournalHandle, JoinHandle<Journal>) {
    let (tx, mut rx) = mpsc::channel::<JournalEntry>(capacity.max(1));
    let handle = JournalHandle {
        tx,
        accumulators: Arc::new(Mutex::new(Accumulators::default())),
    };

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                maybe = rx.recv() => match maybe {
                    Some(entry) => write_entry(&mut journal, entry).await,
                    None => break,
                },
                _ = shutdown.changed() => {
                    rx.close();
                    while let Some(entry) = rx.recv().await {
                        write_entry(&mut journal, entry).await;
                    }
                    break;
                }
            }
        }
        info!(entries = journal.len(), "Journal writer stopped");
        journal
    });

    (handle, task)
}

/// Journal timestamps are stored with millisecond precision.
fn journal_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

async fn write_entry(journal: &mut Journal, entry: JournalEntry) {
    let correlation_id = entry.correlation_id.clone();
    if let Err(e) = journal.upsert(entry).await {
        warn!(
            error = %e,
            correlation_id = correlation_id.as_deref().unwrap_or("-"),
            "Journal write failed"
        );
    }
}
