//! Journal storage for the relay.
//!
//! A text-file append/upsert log of delivered content, written by a single
//! background task so that persistence never delays delivery.

mod journal;
mod recorder;

pub use journal::{
    Journal, JournalEntry, Upserted, format_entry, is_header_safe_id, parse_journal,
};
pub use recorder::{JournalHandle, MAX_OPEN_RESPONSES, spawn_journal_writer};
