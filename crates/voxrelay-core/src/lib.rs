//! voxrelay Core Library
//!
//! Shared functionality for voxrelay components:
//! - Typed envelope schema and validation of untrusted frames
//! - Reconciliation of cumulative document snapshots into envelope streams
//! - Dictation segmentation by trigger keyword
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod config;
pub mod envelope;
pub mod error;
pub mod reconcile;
pub mod tracing_init;

pub use config::Config;
pub use envelope::{Envelope, EnvelopeKind, ValidationError};
pub use error::{Error, Result};
