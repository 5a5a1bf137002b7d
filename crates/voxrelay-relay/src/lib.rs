//! voxrelay Relay Server Library
//!
//! Core functionality for the voxrelay relay:
//! - Session registry with liveness tracking
//! - Envelope broker with broadcast and unicast routing
//! - Per-session dispatch into the reconciler and dictation segmenter
//! - Upsert journal of delivered content
//! - HTTP and WebSocket front door

pub mod error;
pub mod liveness;
pub mod pump;
pub mod registry;
pub mod router;
pub mod server;
pub mod storage;
