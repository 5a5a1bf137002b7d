//! Document reconciler: cumulative snapshots in, minimal envelopes out.
//!
//! The observed document re-delivers its *whole* active response on every
//! notification. The reconciler remembers how much of it has already been
//! emitted and produces:
//!
//! ```text
//! producing=true (first)  -> state-change(generating)
//! content grew            -> content-delta(new suffix)
//! producing=false         -> state-change(finished)
//! ```
//!
//! All envelopes of one generation share a freshly minted correlation id.

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::envelope::{ContentDelta, Envelope, GenerationState, StateChange, now_millis};

/// What a `finished` transition does to content tracking for a context
/// that stays open.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum FinishPolicy {
    /// Keep the consumed prefix until the context changes, so trailing
    /// content of a still-open context is never re-sent.
    #[default]
    Retain,
    /// Forget the consumed prefix on finish; the next generation is treated
    /// as starting from empty content.
    Reset,
}

/// One raw change notification from a document change source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawNotification {
    /// Identity of the observed document (conversation, page).
    pub context: String,
    /// Entire current content of the active response.
    pub content: String,
    /// Whether the remote agent is still producing.
    pub producing: bool,
}

impl RawNotification {
    pub fn new(context: impl Into<String>, content: impl Into<String>, producing: bool) -> Self {
        Self {
            context: context.into(),
            content: content.into(),
            producing,
        }
    }
}

/// Per-context reconciliation state.
#[derive(Debug)]
struct ContextState {
    context: String,
    /// Cumulative content at the last emission (or adopted baseline).
    last_emitted_content: String,
    /// Payload of the last emitted `content-delta`.
    last_delta: String,
    /// Content of the most recent notification, emitted or not.
    latest_content: String,
    active_correlation_id: Option<String>,
    consumed_prefix_len: usize,
    generations: u64,
}

impl ContextState {
    const fn new(context: String) -> Self {
        Self {
            context,
            last_emitted_content: String::new(),
            last_delta: String::new(),
            latest_content: String::new(),
            active_correlation_id: None,
            consumed_prefix_len: 0,
            generations: 0,
        }
    }

    fn adopt(&mut self, content: &str) {
        self.last_emitted_content.clear();
        self.last_emitted_content.push_str(content);
        self.consumed_prefix_len = content.len();
    }

    fn forget(&mut self) {
        self.last_emitted_content.clear();
        self.last_delta.clear();
        self.consumed_prefix_len = 0;
    }
}

/// Diff/reconciliation engine for one document change source.
#[derive(Debug)]
pub struct Reconciler {
    policy: FinishPolicy,
    state: Option<ContextState>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(FinishPolicy::default())
    }
}

impl Reconciler {
    pub const fn new(policy: FinishPolicy) -> Self {
        Self {
            policy,
            state: None,
        }
    }

    /// Context currently being tracked.
    pub fn context(&self) -> Option<&str> {
        self.state.as_ref().map(|s| s.context.as_str())
    }

    /// Correlation id of the in-progress generation, if any.
    pub fn active_correlation_id(&self) -> Option<&str> {
        self.state
            .as_ref()
            .and_then(|s| s.active_correlation_id.as_deref())
    }

    /// Feed one raw notification. Returns the envelopes to publish, in order.
    pub fn apply(&mut self, n: &RawNotification) -> Vec<Envelope> {
        let mut out = Vec::new();

        if self.state.as_ref().is_none_or(|s| s.context != n.context) {
            self.switch_context(&n.context, &mut out);
            if !n.producing
                && let Some(state) = self.state.as_mut()
            {
                // Content already on the page when monitoring began is not news.
                state.adopt(&n.content);
            }
        }

        let policy = self.policy;
        let Some(state) = self.state.as_mut() else {
            return out;
        };

        if n.producing && state.active_correlation_id.is_none() {
            let correlation_id = Uuid::new_v4().to_string();
            state.consumed_prefix_len = state.last_emitted_content.len();
            state.last_delta.clear();
            state.generations += 1;
            debug!(
                context = %state.context,
                correlation_id = %correlation_id,
                "Generation started"
            );
            out.push(state_change(
                GenerationState::Generating,
                &correlation_id,
                &state.context,
            ));
            state.active_correlation_id = Some(correlation_id);
        }

        rebase_if_rewritten(state, &n.content);
        state.latest_content.clone_from(&n.content);

        let delta = &n.content[state.consumed_prefix_len..];
        if let Some(correlation_id) = state.active_correlation_id.clone() {
            if delta.is_empty() {
                // Identical re-delivery; nothing new to say.
            } else if delta != state.last_delta || !n.producing {
                out.push(Envelope::ContentDelta(ContentDelta {
                    content: delta.to_string(),
                    correlation_id,
                    timestamp: now_millis(),
                    context: state.context.clone(),
                }));
                state.last_delta = delta.to_string();
                state.adopt(&n.content);
            } else {
                // Same payload as the previous delta: hold it back so it
                // coalesces with the next growth instead of looking like a
                // duplicate.
                debug!(context = %state.context, "Deferring repeated delta");
            }
        } else if !delta.is_empty() && (policy == FinishPolicy::Retain || state.generations == 0)
        {
            // Content moved outside any generation; treat it as baseline.
            state.adopt(&n.content);
        }

        if !n.producing
            && let Some(correlation_id) = state.active_correlation_id.take()
        {
            debug!(
                context = %state.context,
                correlation_id = %correlation_id,
                "Generation finished"
            );
            out.push(state_change(
                GenerationState::Finished,
                &correlation_id,
                &state.context,
            ));
            if policy == FinishPolicy::Reset {
                state.forget();
            }
        }

        out
    }

    /// The source stopped delivering. Sends any held-back content, then
    /// closes the in-progress generation.
    pub fn end(&mut self) -> Vec<Envelope> {
        let Some(state) = self.state.as_mut() else {
            return Vec::new();
        };
        let mut out: Vec<Envelope> = flush_pending(state).into_iter().collect();
        if let Some(cid) = state.active_correlation_id.take() {
            out.push(state_change(GenerationState::Finished, &cid, &state.context));
        }
        out
    }

    fn switch_context(&mut self, context: &str, out: &mut Vec<Envelope>) {
        if let Some(mut previous) = self.state.take() {
            out.extend(flush_pending(&mut previous));
            if let Some(cid) = previous.active_correlation_id {
                out.push(state_change(
                    GenerationState::Finished,
                    &cid,
                    &previous.context,
                ));
            }
            debug!(from = %previous.context, to = %context, "Context changed, state reset");
        }
        self.state = Some(ContextState::new(context.to_string()));
    }
}

/// Emit whatever the active generation has seen but not yet sent, such as
/// a deferred repeat.
fn flush_pending(state: &mut ContextState) -> Option<Envelope> {
    let correlation_id = state.active_correlation_id.clone()?;
    if state.latest_content.len() <= state.consumed_prefix_len
        || !state.latest_content.starts_with(state.last_emitted_content.as_str())
    {
        return None;
    }
    let content = state.latest_content[state.consumed_prefix_len..].to_string();
    let latest = state.latest_content.clone();
    state.adopt(&latest);
    state.last_delta.clone_from(&content);
    Some(Envelope::ContentDelta(ContentDelta {
        content,
        correlation_id,
        timestamp: now_millis(),
        context: state.context.clone(),
    }))
}

/// The source replaced text we had already consumed (a new response, an
/// edit). Resume from the longest common prefix instead of slicing into
/// unrelated content.
fn rebase_if_rewritten(state: &mut ContextState, content: &str) {
    // consumed_prefix_len always equals last_emitted_content.len() here.
    if content.starts_with(state.last_emitted_content.as_str()) {
        return;
    }
    let common = common_prefix_len(&state.last_emitted_content, content);
    debug!(
        context = %state.context,
        consumed = state.consumed_prefix_len,
        common,
        "Document rewritten, rebasing"
    );
    state.last_emitted_content.truncate(common);
    state.consumed_prefix_len = common;
    state.last_delta.clear();
}

/// Byte length of the longest common prefix, on a char boundary of both.
fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .find(|((_, ca), cb)| ca != cb)
        .map_or_else(|| a.len().min(b.len()), |((i, _), _)| i)
}

fn state_change(state: GenerationState, correlation_id: &str, context: &str) -> Envelope {
    Envelope::StateChange(StateChange {
        state,
        correlation_id: correlation_id.to_string(),
        timestamp: now_millis(),
        context: context.to_string(),
    })
}
