//! Envelope types for the voxrelay wire protocol.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// One validated unit of communication. Serialized as a single JSON text
/// frame with a `kind` discriminant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Envelope {
    StateChange(StateChange),
    ContentDelta(ContentDelta),
    SubmitCommand(CommandText),
    SetPendingInput(CommandText),
    ConfirmPendingInput,
    DocumentSnapshot(DocumentSnapshot),
    Transcript(Transcript),
    SessionWelcome(SessionWelcome),
}

/// Generation lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub state: GenerationState,
    pub correlation_id: String,
    /// Milliseconds since the Unix epoch at the producing source.
    pub timestamp: i64,
    pub context: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationState {
    Generating,
    Finished,
}

impl GenerationState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Generating => "generating",
            Self::Finished => "finished",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "generating" => Some(Self::Generating),
            "finished" => Some(Self::Finished),
            _ => None,
        }
    }
}

/// Newly appeared suffix of a generation's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentDelta {
    pub content: String,
    pub correlation_id: String,
    pub timestamp: i64,
    pub context: String,
}

/// Payload of the text-carrying commands (`submit-command`, `set-pending-input`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandText {
    pub content: String,
}

/// Raw cumulative snapshot of the observed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub content: String,
    pub producing: bool,
    pub context: String,
}

/// Dictated free text awaiting segmentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub content: String,
    /// Marks the end of an utterance stream; pending text is submitted.
    #[serde(rename = "final", default)]
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionWelcome {
    pub session_id: String,
}

/// Discriminant of [`Envelope`], without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    StateChange,
    ContentDelta,
    SubmitCommand,
    SetPendingInput,
    ConfirmPendingInput,
    DocumentSnapshot,
    Transcript,
    SessionWelcome,
}

impl EnvelopeKind {
    pub const ALL: [Self; 8] = [
        Self::StateChange,
        Self::ContentDelta,
        Self::SubmitCommand,
        Self::SetPendingInput,
        Self::ConfirmPendingInput,
        Self::DocumentSnapshot,
        Self::Transcript,
        Self::SessionWelcome,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StateChange => "state-change",
            Self::ContentDelta => "content-delta",
            Self::SubmitCommand => "submit-command",
            Self::SetPendingInput => "set-pending-input",
            Self::ConfirmPendingInput => "confirm-pending-input",
            Self::DocumentSnapshot => "document-snapshot",
            Self::Transcript => "transcript",
            Self::SessionWelcome => "session-welcome",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Envelope {
    pub const fn kind(&self) -> EnvelopeKind {
        match self {
            Self::StateChange(_) => EnvelopeKind::StateChange,
            Self::ContentDelta(_) => EnvelopeKind::ContentDelta,
            Self::SubmitCommand(_) => EnvelopeKind::SubmitCommand,
            Self::SetPendingInput(_) => EnvelopeKind::SetPendingInput,
            Self::ConfirmPendingInput => EnvelopeKind::ConfirmPendingInput,
            Self::DocumentSnapshot(_) => EnvelopeKind::DocumentSnapshot,
            Self::Transcript(_) => EnvelopeKind::Transcript,
            Self::SessionWelcome(_) => EnvelopeKind::SessionWelcome,
        }
    }

    /// Correlation id of stateful kinds; `None` for one-shot commands.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::StateChange(s) => Some(&s.correlation_id),
            Self::ContentDelta(d) => Some(&d.correlation_id),
            Self::SubmitCommand(_)
            | Self::SetPendingInput(_)
            | Self::ConfirmPendingInput
            | Self::DocumentSnapshot(_)
            | Self::Transcript(_)
            | Self::SessionWelcome(_) => None,
        }
    }

    /// Originating document context, when the kind carries one.
    pub fn context(&self) -> Option<&str> {
        match self {
            Self::StateChange(s) => Some(&s.context),
            Self::ContentDelta(d) => Some(&d.context),
            Self::DocumentSnapshot(s) => Some(&s.context),
            Self::SubmitCommand(_)
            | Self::SetPendingInput(_)
            | Self::ConfirmPendingInput
            | Self::Transcript(_)
            | Self::SessionWelcome(_) => None,
        }
    }

    pub fn submit(content: impl Into<String>) -> Self {
        Self::SubmitCommand(CommandText {
            content: content.into(),
        })
    }

    pub fn pending_input(content: impl Into<String>) -> Self {
        Self::SetPendingInput(CommandText {
            content: content.into(),
        })
    }

    pub fn welcome(session_id: impl Into<String>) -> Self {
        Self::SessionWelcome(SessionWelcome {
            session_id: session_id.into(),
        })
    }

    /// Serialize to a single wire frame.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
#[allow(clippy::cast_possible_truncation)]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn state_change_serializes_with_kebab_kind_and_camel_fields() {
        let env = Envelope::StateChange(StateChange {
            state: GenerationState::Generating,
            correlation_id: "c-1".into(),
            timestamp: 42,
            context: "chat/abc".into(),
        });
        let json: serde_json::Value = serde_json::from_str(&env.to_frame().unwrap()).unwrap();
        assert_eq!(json["kind"], "state-change");
        assert_eq!(json["state"], "generating");
        assert_eq!(json["correlationId"], "c-1");
        assert_eq!(json["context"], "chat/abc");
    }

    #[test]
    fn confirm_pending_input_is_kind_only() {
        let frame = Envelope::ConfirmPendingInput.to_frame().unwrap();
        assert_eq!(frame, r#"{"kind":"confirm-pending-input"}"#);
    }

    #[test]
    fn kind_names_are_unique_and_parse_back() {
        for kind in EnvelopeKind::ALL {
            assert_eq!(EnvelopeKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EnvelopeKind::parse("send_message"), None);
    }

    #[test]
    fn commands_have_no_correlation_id() {
        assert_eq!(Envelope::submit("hi").correlation_id(), None);
        assert_eq!(Envelope::ConfirmPendingInput.correlation_id(), None);
    }
}
