//! Inbound provider events.
//!
//! Events arrive at least once, in any order, possibly duplicated. Each known
//! `type` maps to its own strongly typed payload; anything else lands in
//! [`WebhookEvent::Unknown`] and is acknowledged without side effects.

pub mod signature;

pub use signature::{SignatureCheck, SignatureVerifier};

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum WebhookEvent {
    #[serde(rename = "call.session_started")]
    SessionStarted(CallEvent),
    #[serde(rename = "call.session_participant_left")]
    ParticipantLeft(CallEvent),
    #[serde(rename = "call.session_ended")]
    SessionEnded(CallEvent),
    #[serde(rename = "call.ended")]
    CallEnded(CallEvent),
    #[serde(rename = "call.transcription_ready")]
    TranscriptionReady(TranscriptionReadyEvent),
    #[serde(rename = "call.recording_ready")]
    RecordingReady(RecordingReadyEvent),
    #[serde(rename = "message.new")]
    MessageNew(MessageNewEvent),
    #[serde(other)]
    Unknown,
}

impl WebhookEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionStarted(_) => "call.session_started",
            Self::ParticipantLeft(_) => "call.session_participant_left",
            Self::SessionEnded(_) => "call.session_ended",
            Self::CallEnded(_) => "call.ended",
            Self::TranscriptionReady(_) => "call.transcription_ready",
            Self::RecordingReady(_) => "call.recording_ready",
            Self::MessageNew(_) => "message.new",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallEvent {
    #[serde(default)]
    pub call_cid: Option<String>,
    #[serde(default)]
    pub call: Option<CallInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallInfo {
    #[serde(default)]
    pub cid: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub custom: Option<CallCustom>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallCustom {
    #[serde(default, alias = "meetingID", alias = "meetingId")]
    pub meeting_id: Option<String>,
}

impl CallEvent {
    /// Meeting id from the call's custom data, falling back to the
    /// `<type>:<meetingId>` call identifier.
    pub fn meeting_id(&self) -> Option<String> {
        let custom = self
            .call
            .as_ref()
            .and_then(|call| call.custom.as_ref())
            .and_then(|custom| custom.meeting_id.as_deref());
        if let Some(id) = non_empty(custom) {
            return Some(id);
        }

        let cid = self
            .call_cid
            .as_deref()
            .or_else(|| self.call.as_ref().and_then(|call| call.cid.as_deref()));
        meeting_id_from_cid(cid)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionReadyEvent {
    #[serde(default)]
    pub call_cid: Option<String>,
    #[serde(default)]
    pub call_transcription: Option<MediaFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingReadyEvent {
    #[serde(default)]
    pub call_cid: Option<String>,
    #[serde(default)]
    pub call_recording: Option<MediaFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaFile {
    #[serde(default)]
    pub url: Option<String>,
}

impl TranscriptionReadyEvent {
    pub fn meeting_id(&self) -> Option<String> {
        meeting_id_from_cid(self.call_cid.as_deref())
    }

    pub fn url(&self) -> Option<String> {
        non_empty(self.call_transcription.as_ref().and_then(|f| f.url.as_deref()))
    }
}

impl RecordingReadyEvent {
    pub fn meeting_id(&self) -> Option<String> {
        meeting_id_from_cid(self.call_cid.as_deref())
    }

    pub fn url(&self) -> Option<String> {
        non_empty(self.call_recording.as_ref().and_then(|f| f.url.as_deref()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageNewEvent {
    #[serde(default)]
    pub cid: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub message: Option<ChatMessagePayload>,
    #[serde(default)]
    pub user: Option<ChatUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessagePayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub user: Option<ChatUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatUser {
    pub id: String,
}

impl MessageNewEvent {
    pub fn channel_id(&self) -> Option<String> {
        non_empty(self.channel_id.as_deref()).or_else(|| meeting_id_from_cid(self.cid.as_deref()))
    }

    pub fn message_id(&self) -> Option<String> {
        non_empty(self.message.as_ref().and_then(|m| m.id.as_deref()))
    }

    pub fn author_id(&self) -> Option<String> {
        self.message
            .as_ref()
            .and_then(|m| m.user.as_ref())
            .or(self.user.as_ref())
            .and_then(|user| non_empty(Some(user.id.as_str())))
    }

    pub fn text(&self) -> Option<String> {
        self.message
            .as_ref()
            .and_then(|m| m.text.as_deref())
            .map(str::trim)
            .and_then(|text| non_empty(Some(text)))
    }
}

/// Split `<type>:<id>` and return the id part.
pub fn meeting_id_from_cid(cid: Option<&str>) -> Option<String> {
    let (_, id) = cid?.split_once(':')?;
    non_empty(Some(id))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> WebhookEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_session_started_prefers_custom_meeting_id() {
        let event = parse(json!({
            "type": "call.session_started",
            "call_cid": "default:from-cid",
            "call": { "custom": { "meetingID": "from-custom" } }
        }));
        let WebhookEvent::SessionStarted(call) = event else {
            panic!("wrong variant");
        };
        assert_eq!(call.meeting_id().as_deref(), Some("from-custom"));
    }

    #[test]
    fn test_session_started_falls_back_to_cid() {
        let event = parse(json!({
            "type": "call.session_started",
            "call": { "cid": "default:m-42", "custom": {} }
        }));
        let WebhookEvent::SessionStarted(call) = event else {
            panic!("wrong variant");
        };
        assert_eq!(call.meeting_id().as_deref(), Some("m-42"));
    }

    #[test]
    fn test_end_events_keep_their_own_kind() {
        let event = parse(json!({ "type": "call.session_ended", "call_cid": "default:m-1" }));
        assert!(matches!(event, WebhookEvent::SessionEnded(_)));
        assert_eq!(event.kind(), "call.session_ended");

        let event = parse(json!({ "type": "call.ended", "call_cid": "default:m-1" }));
        assert!(matches!(event, WebhookEvent::CallEnded(_)));
        assert_eq!(event.kind(), "call.ended");
    }

    #[test]
    fn test_unknown_type_is_tolerated() {
        let event = parse(json!({ "type": "foo.bar", "whatever": [1, 2, 3] }));
        assert!(matches!(event, WebhookEvent::Unknown));
    }

    #[test]
    fn test_missing_meeting_id() {
        let WebhookEvent::ParticipantLeft(call) = parse(json!({
            "type": "call.session_participant_left",
            "call_cid": "default:"
        })) else {
            panic!("wrong variant");
        };
        assert!(call.meeting_id().is_none());

        assert!(meeting_id_from_cid(Some("no-colon")).is_none());
        assert!(meeting_id_from_cid(None).is_none());
    }

    #[test]
    fn test_transcription_ready_fields() {
        let WebhookEvent::TranscriptionReady(event) = parse(json!({
            "type": "call.transcription_ready",
            "call_cid": "default:m-9",
            "call_transcription": { "url": "https://cdn/t.jsonl" }
        })) else {
            panic!("wrong variant");
        };
        assert_eq!(event.meeting_id().as_deref(), Some("m-9"));
        assert_eq!(event.url().as_deref(), Some("https://cdn/t.jsonl"));
    }

    #[test]
    fn test_message_new_fields() {
        let WebhookEvent::MessageNew(event) = parse(json!({
            "type": "message.new",
            "cid": "messaging:m-3",
            "message": { "id": "msg-1", "text": "  What was decided?  ", "user": { "id": "u-1" } }
        })) else {
            panic!("wrong variant");
        };
        assert_eq!(event.channel_id().as_deref(), Some("m-3"));
        assert_eq!(event.message_id().as_deref(), Some("msg-1"));
        assert_eq!(event.author_id().as_deref(), Some("u-1"));
        assert_eq!(event.text().as_deref(), Some("What was decided?"));
    }

    #[test]
    fn test_missing_type_is_an_error() {
        let result: Result<WebhookEvent, _> = serde_json::from_value(json!({ "call_cid": "a:b" }));
        assert!(result.is_err());
    }
}
