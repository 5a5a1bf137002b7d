//! Diff/reconciliation engine.
//!
//! Turns noisy inputs into clean envelope streams:
//! - [`Reconciler`]: cumulative document snapshots -> state changes and deltas
//! - [`Segmenter`]: dictated free text -> discrete command submissions
//! - [`DocumentChangeSource`]: the push-style producer of raw snapshots

mod engine;
mod segmenter;
mod source;

pub use engine::{FinishPolicy, RawNotification, Reconciler};
pub use segmenter::{Segmentation, Segmenter};
pub use source::{ChangeHandler, DocumentChangeSource, EndHandler, LinesSource, SourceEnd};
