//! Validation of untrusted envelope frames.
//!
//! Tolerant reader: unknown fields are ignored, but every required field of
//! the selected kind must be present with the right primitive type. All
//! field-level problems are collected, not just the first one.

use serde_json::{Map, Value};
use std::fmt;

use super::types::{
    CommandText, ContentDelta, DocumentSnapshot, Envelope, EnvelopeKind, GenerationState,
    SessionWelcome, StateChange, Transcript,
};

/// A single field-level problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: String,
    pub problem: Problem,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    Missing,
    WrongType { expected: &'static str },
    Empty,
    UnknownValue(String),
    UnknownKind(String),
    NotAnObject,
    MalformedJson(String),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.problem {
            Problem::Missing => write!(f, "{}: missing", self.field),
            Problem::WrongType { expected } => write!(f, "{}: expected {expected}", self.field),
            Problem::Empty => write!(f, "{}: must not be empty", self.field),
            Problem::UnknownValue(v) => write!(f, "{}: unknown value {v:?}", self.field),
            Problem::UnknownKind(k) => write!(f, "{}: unknown kind {k:?}", self.field),
            Problem::NotAnObject => write!(f, "{}: frame is not a JSON object", self.field),
            Problem::MalformedJson(e) => write!(f, "{}: malformed JSON ({e})", self.field),
        }
    }
}

/// Rejected input. Carries every violation found.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid envelope: {}", summarize(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    fn single(field: &str, problem: Problem) -> Self {
        Self {
            violations: vec![Violation {
                field: field.to_string(),
                problem,
            }],
        }
    }
}

/// Parse and validate one text frame.
pub fn validate_frame(text: &str) -> Result<Envelope, ValidationError> {
    let raw: Value = serde_json::from_str(text)
        .map_err(|e| ValidationError::single("$", Problem::MalformedJson(e.to_string())))?;
    validate(&raw)
}

/// Validate an arbitrary JSON value against the closed kind set.
pub fn validate(raw: &Value) -> Result<Envelope, ValidationError> {
    let Some(obj) = raw.as_object() else {
        return Err(ValidationError::single("$", Problem::NotAnObject));
    };

    let kind = match obj.get("kind") {
        None => return Err(ValidationError::single("kind", Problem::Missing)),
        Some(Value::String(s)) => EnvelopeKind::parse(s)
            .ok_or_else(|| ValidationError::single("kind", Problem::UnknownKind(s.clone())))?,
        Some(_) => {
            return Err(ValidationError::single(
                "kind",
                Problem::WrongType { expected: "string" },
            ));
        }
    };

    let mut f = Fields::new(obj);
    match kind {
        EnvelopeKind::StateChange => {
            let state = f.state("state");
            let correlation_id = f.identifier("correlationId");
            let timestamp = f.timestamp("timestamp");
            let context = f.string("context");
            match (state, correlation_id, timestamp, context) {
                (Some(state), Some(correlation_id), Some(timestamp), Some(context))
                    if f.is_clean() =>
                {
                    Ok(Envelope::StateChange(StateChange {
                        state,
                        correlation_id,
                        timestamp,
                        context,
                    }))
                }
                _ => Err(f.into_error()),
            }
        }
        EnvelopeKind::ContentDelta => {
            let content = f.string("content");
            let correlation_id = f.identifier("correlationId");
            let timestamp = f.timestamp("timestamp");
            let context = f.string("context");
            match (content, correlation_id, timestamp, context) {
                (Some(content), Some(correlation_id), Some(timestamp), Some(context))
                    if f.is_clean() =>
                {
                    Ok(Envelope::ContentDelta(ContentDelta {
                        content,
                        correlation_id,
                        timestamp,
                        context,
                    }))
                }
                _ => Err(f.into_error()),
            }
        }
        EnvelopeKind::SubmitCommand => f
            .string("content")
            .map(|content| Envelope::SubmitCommand(CommandText { content }))
            .ok_or_else(|| f.into_error()),
        EnvelopeKind::SetPendingInput => f
            .string("content")
            .map(|content| Envelope::SetPendingInput(CommandText { content }))
            .ok_or_else(|| f.into_error()),
        EnvelopeKind::ConfirmPendingInput => Ok(Envelope::ConfirmPendingInput),
        EnvelopeKind::DocumentSnapshot => {
            let content = f.string("content");
            let producing = f.boolean("producing");
            let context = f.string("context");
            match (content, producing, context) {
                (Some(content), Some(producing), Some(context)) if f.is_clean() => {
                    Ok(Envelope::DocumentSnapshot(DocumentSnapshot {
                        content,
                        producing,
                        context,
                    }))
                }
                _ => Err(f.into_error()),
            }
        }
        EnvelopeKind::Transcript => {
            let content = f.string("content");
            let is_final = f.optional_boolean("final");
            match content {
                Some(content) if f.is_clean() => Ok(Envelope::Transcript(Transcript {
                    content,
                    is_final: is_final.unwrap_or(false),
                })),
                _ => Err(f.into_error()),
            }
        }
        EnvelopeKind::SessionWelcome => f
            .identifier("sessionId")
            .map(|session_id| Envelope::SessionWelcome(SessionWelcome { session_id }))
            .ok_or_else(|| f.into_error()),
    }
}

/// Field extractor that records a violation for every failed lookup.
struct Fields<'a> {
    obj: &'a Map<String, Value>,
    violations: Vec<Violation>,
}

impl<'a> Fields<'a> {
    const fn new(obj: &'a Map<String, Value>) -> Self {
        Self {
            obj,
            violations: Vec::new(),
        }
    }

    fn push(&mut self, field: &str, problem: Problem) {
        self.violations.push(Violation {
            field: field.to_string(),
            problem,
        });
    }

    fn required(&mut self, field: &str) -> Option<&'a Value> {
        let value = self.obj.get(field);
        if value.is_none() {
            self.push(field, Problem::Missing);
        }
        value
    }

    fn string(&mut self, field: &str) -> Option<String> {
        match self.required(field)? {
            Value::String(s) => Some(s.clone()),
            _ => {
                self.push(field, Problem::WrongType { expected: "string" });
                None
            }
        }
    }

    /// A string that must also be non-empty.
    fn identifier(&mut self, field: &str) -> Option<String> {
        let s = self.string(field)?;
        if s.is_empty() {
            self.push(field, Problem::Empty);
            return None;
        }
        Some(s)
    }

    fn boolean(&mut self, field: &str) -> Option<bool> {
        match self.required(field)? {
            Value::Bool(b) => Some(*b),
            _ => {
                self.push(field, Problem::WrongType { expected: "boolean" });
                None
            }
        }
    }

    fn optional_boolean(&mut self, field: &str) -> Option<bool> {
        match self.obj.get(field)? {
            Value::Bool(b) => Some(*b),
            Value::Null => None,
            _ => {
                self.push(field, Problem::WrongType { expected: "boolean" });
                None
            }
        }
    }

    fn timestamp(&mut self, field: &str) -> Option<i64> {
        match self.required(field)?.as_i64() {
            Some(ms) if ms >= 0 => Some(ms),
            _ => {
                self.push(
                    field,
                    Problem::WrongType {
                        expected: "non-negative integer (epoch milliseconds)",
                    },
                );
                None
            }
        }
    }

    fn state(&mut self, field: &str) -> Option<GenerationState> {
        let s = self.string(field)?;
        let state = GenerationState::parse(&s);
        if state.is_none() {
            self.push(field, Problem::UnknownValue(s));
        }
        state
    }

    fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    fn into_error(self) -> ValidationError {
        ValidationError {
            violations: self.violations,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_state_change() {
        let env = validate(&json!({
            "kind": "state-change",
            "state": "finished",
            "correlationId": "c-9",
            "timestamp": 1_700_000_000_000_i64,
            "context": "chat/1"
        }))
        .unwrap();
        assert!(matches!(
            env,
            Envelope::StateChange(StateChange {
                state: GenerationState::Finished,
                ..
            })
        ));
        assert_eq!(env.correlation_id(), Some("c-9"));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let env = validate(&json!({
            "kind": "submit-command",
            "content": "hello",
            "clientVersion": "2.1",
            "extra": {"nested": true}
        }))
        .unwrap();
        assert_eq!(env, Envelope::submit("hello"));
    }

    #[test]
    fn confirm_pending_input_needs_no_fields() {
        let env = validate(&json!({"kind": "confirm-pending-input"})).unwrap();
        assert_eq!(env, Envelope::ConfirmPendingInput);
    }

    #[test]
    fn collects_every_violation() {
        let err = validate(&json!({
            "kind": "content-delta",
            "content": 12,
            "timestamp": "yesterday",
            "context": "chat/1"
        }))
        .unwrap_err();

        let fields: Vec<&str> = err.violations.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(fields, vec!["content", "correlationId", "timestamp"]);
        assert_eq!(
            err.violations[1].problem,
            Problem::Missing,
            "correlationId should be reported missing"
        );
    }

    #[test]
    fn unknown_state_value_rejected() {
        let err = validate(&json!({
            "kind": "state-change",
            "state": "paused",
            "correlationId": "c",
            "timestamp": 1,
            "context": "x"
        }))
        .unwrap_err();
        assert_eq!(
            err.violations[0].problem,
            Problem::UnknownValue("paused".into())
        );
    }

    #[test]
    fn unknown_kind_rejected() {
        let err = validate(&json!({"kind": "send_message", "content": "x"})).unwrap_err();
        assert_eq!(
            err.violations[0].problem,
            Problem::UnknownKind("send_message".into())
        );
    }

    #[test]
    fn missing_kind_and_non_object_rejected() {
        let err = validate(&json!({"content": "x"})).unwrap_err();
        assert_eq!(err.violations[0].field, "kind");

        let err = validate(&json!(["kind", "submit-command"])).unwrap_err();
        assert_eq!(err.violations[0].problem, Problem::NotAnObject);
    }

    #[test]
    fn malformed_frame_rejected_without_panic() {
        let err = validate_frame("{\"kind\": \"submit-command\", ").unwrap_err();
        assert!(matches!(err.violations[0].problem, Problem::MalformedJson(_)));
        assert!(err.to_string().starts_with("invalid envelope"));
    }

    #[test]
    fn empty_correlation_id_rejected() {
        let err = validate(&json!({
            "kind": "content-delta",
            "content": "x",
            "correlationId": "",
            "timestamp": 1,
            "context": "c"
        }))
        .unwrap_err();
        assert_eq!(err.violations[0].problem, Problem::Empty);
    }

    #[test]
    fn transcript_final_flag_is_optional_boolean() {
        let env = validate(&json!({"kind": "transcript", "content": "hi"})).unwrap();
        assert_eq!(
            env,
            Envelope::Transcript(Transcript {
                content: "hi".into(),
                is_final: false
            })
        );

        let err = validate(&json!({"kind": "transcript", "content": "hi", "final": "yes"}))
            .unwrap_err();
        assert_eq!(err.violations[0].field, "final");
    }

    #[test]
    fn snapshot_requires_boolean_producing() {
        let err = validate(&json!({
            "kind": "document-snapshot",
            "content": "Hello",
            "producing": 1,
            "context": "x"
        }))
        .unwrap_err();
        assert_eq!(
            err.violations[0].problem,
            Problem::WrongType { expected: "boolean" }
        );
    }

    #[test]
    fn serialized_envelopes_validate_back() {
        let env = Envelope::ContentDelta(ContentDelta {
            content: " world".into(),
            correlation_id: "c-1".into(),
            timestamp: 5,
            context: "x".into(),
        });
        let back = validate_frame(&env.to_frame().unwrap()).unwrap();
        assert_eq!(back, env);
    }
}
