//! Typed envelope schema.
//!
//! The closed set of event and command shapes exchanged with sessions, and
//! the validator that turns untrusted JSON into an [`Envelope`].

mod types;
mod validate;

pub use types::*;
pub use validate::{Problem, ValidationError, Violation, validate, validate_frame};
