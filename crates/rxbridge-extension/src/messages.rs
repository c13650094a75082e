//! JSON messages exchanged with a WhisperLive-style transcription backend.

use rxbridge_core::{ClientSessionId, ParseError, SessionConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// First message on every new connection.
#[derive(Debug, Serialize)]
pub struct Handshake<'a> {
    pub uid: String,
    pub language: Option<&'a str>,
    pub task: &'a str,
    pub model: &'a str,
    pub use_vad: bool,
    pub send_last_n_segments: u32,
    pub no_speech_thresh: f32,
}

impl<'a> Handshake<'a> {
    pub fn new(session_id: &ClientSessionId, config: &'a SessionConfig) -> Self {
        Self {
            uid: session_id.to_string(),
            language: config.language.as_deref(),
            task: config.task.as_str(),
            model: &config.model,
            use_vad: config.use_vad,
            send_last_n_segments: config.send_last_n_segments,
            no_speech_thresh: config.no_speech_thresh,
        }
    }
}

/// Loose view of anything the backend sends as text. Unknown fields are
/// dropped by serde and every known field is kept as raw JSON, so a field of
/// an unexpected type never rejects the whole message.
#[derive(Debug, Default, Deserialize)]
struct RawMessage {
    uid: Option<Value>,
    status: Option<Value>,
    message: Option<Value>,
    backend: Option<Value>,
    language: Option<Value>,
    language_prob: Option<Value>,
    segments: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    ForeignSession(String),
    /// Backend is at capacity; `minutes` is its estimated wait.
    Wait { minutes: Option<f64> },
    BackendError(String),
    ServerReady { backend: Option<String> },
    Disconnect,
    LanguageDetected {
        language: String,
        probability: Option<f64>,
    },
    Segments(Vec<Value>),
    Ignored,
}

/// Classify one text message for `session_id`. Rules are checked in order
/// and the first match wins.
pub fn classify(text: &str, session_id: &ClientSessionId) -> Result<Inbound, ParseError> {
    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Ok(Inbound::Ignored);
    }
    let msg: RawMessage = serde_json::from_value(value)?;

    match msg.uid {
        Some(Value::String(uid)) if !session_id.matches(&uid) => {
            return Ok(Inbound::ForeignSession(uid));
        }
        Some(Value::String(_)) | Some(Value::Null) | None => {}
        Some(other) => return Ok(Inbound::ForeignSession(other.to_string())),
    }

    match msg.status.as_ref().and_then(Value::as_str) {
        Some("WAIT") => {
            return Ok(Inbound::Wait {
                minutes: msg.message.as_ref().and_then(Value::as_f64),
            })
        }
        Some("ERROR") => {
            let detail = match msg.message {
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => "unspecified".to_string(),
            };
            return Ok(Inbound::BackendError(detail));
        }
        _ => {}
    }

    match msg.message.as_ref().and_then(Value::as_str) {
        Some("SERVER_READY") => {
            return Ok(Inbound::ServerReady {
                backend: msg.backend.as_ref().and_then(Value::as_str).map(str::to_string),
            })
        }
        Some("DISCONNECT") => return Ok(Inbound::Disconnect),
        _ => {}
    }

    if let Some(Value::String(language)) = msg.language {
        return Ok(Inbound::LanguageDetected {
            language,
            probability: msg.language_prob.as_ref().and_then(Value::as_f64),
        });
    }

    match msg.segments {
        Some(Value::Array(segments)) if !segments.is_empty() => Ok(Inbound::Segments(segments)),
        _ => Ok(Inbound::Ignored),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxbridge_core::TaskKind;
    use serde_json::json;
    use std::time::Duration;

    fn session_config() -> SessionConfig {
        SessionConfig {
            backend_url: "ws://127.0.0.1:9090".to_string(),
            model: "small".to_string(),
            language: Some("en".to_string()),
            task: TaskKind::Transcribe,
            batch_interval: Duration::from_millis(100),
            use_vad: true,
            send_last_n_segments: 10,
            no_speech_thresh: 0.45,
            handshake_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(2),
        }
    }

    fn classify_json(value: Value, id: &ClientSessionId) -> Inbound {
        classify(&value.to_string(), id).unwrap()
    }

    #[test]
    fn test_handshake_fields() {
        let id = ClientSessionId::new();
        let config = session_config();
        let json = serde_json::to_value(Handshake::new(&id, &config)).unwrap();
        assert_eq!(json["uid"], id.to_string());
        assert_eq!(json["language"], "en");
        assert_eq!(json["task"], "transcribe");
        assert_eq!(json["model"], "small");
        assert_eq!(json["use_vad"], true);
        assert_eq!(json["send_last_n_segments"], 10);
    }

    #[test]
    fn test_handshake_autodetect_language_is_null() {
        let id = ClientSessionId::new();
        let mut config = session_config();
        config.language = None;
        let json = serde_json::to_value(Handshake::new(&id, &config)).unwrap();
        assert!(json["language"].is_null());
    }

    #[test]
    fn test_foreign_session_wins_over_everything() {
        let id = ClientSessionId::new();
        let other = ClientSessionId::new().to_string();
        let inbound = classify_json(
            json!({"uid": other, "message": "DISCONNECT", "segments": [{"text": "x"}]}),
            &id,
        );
        assert_eq!(inbound, Inbound::ForeignSession(other));
    }

    #[test]
    fn test_wait_status() {
        let id = ClientSessionId::new();
        let inbound = classify_json(json!({"uid": id.to_string(), "status": "WAIT", "message": 3.5}), &id);
        assert_eq!(inbound, Inbound::Wait { minutes: Some(3.5) });
    }

    #[test]
    fn test_error_status_keeps_detail() {
        let id = ClientSessionId::new();
        let inbound = classify_json(
            json!({"uid": id.to_string(), "status": "ERROR", "message": "model not found"}),
            &id,
        );
        assert_eq!(inbound, Inbound::BackendError("model not found".to_string()));
    }

    #[test]
    fn test_lifecycle_messages() {
        let id = ClientSessionId::new();
        let ready = classify_json(
            json!({"uid": id.to_string(), "message": "SERVER_READY", "backend": "faster_whisper"}),
            &id,
        );
        assert_eq!(
            ready,
            Inbound::ServerReady {
                backend: Some("faster_whisper".to_string())
            }
        );
        let bye = classify_json(json!({"uid": id.to_string(), "message": "DISCONNECT"}), &id);
        assert_eq!(bye, Inbound::Disconnect);
    }

    #[test]
    fn test_language_detection() {
        let id = ClientSessionId::new();
        let inbound = classify_json(
            json!({"uid": id.to_string(), "language": "nl", "language_prob": 0.91}),
            &id,
        );
        assert_eq!(
            inbound,
            Inbound::LanguageDetected {
                language: "nl".to_string(),
                probability: Some(0.91)
            }
        );
    }

    #[test]
    fn test_segments_keep_unknown_fields() {
        let id = ClientSessionId::new();
        let inbound = classify_json(
            json!({
                "uid": id.to_string(),
                "segments": [{"start": "0.000", "end": "1.500", "text": "CQ CQ", "completed": true, "avg_logprob": -0.2}],
                "extra": 1
            }),
            &id,
        );
        match inbound {
            Inbound::Segments(segments) => {
                assert_eq!(segments.len(), 1);
                assert_eq!(segments[0]["text"], "CQ CQ");
                assert_eq!(segments[0]["avg_logprob"], -0.2);
            }
            other => panic!("expected segments, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_segments_are_ignored() {
        let id = ClientSessionId::new();
        let inbound = classify_json(json!({"uid": id.to_string(), "segments": []}), &id);
        assert_eq!(inbound, Inbound::Ignored);
    }

    #[test]
    fn test_unknown_shapes_are_ignored() {
        let id = ClientSessionId::new();
        assert_eq!(classify_json(json!({"hello": "world"}), &id), Inbound::Ignored);
        assert_eq!(classify_json(json!([1, 2, 3]), &id), Inbound::Ignored);
        assert_eq!(
            classify_json(json!({"uid": id.to_string(), "segments": "nope"}), &id),
            Inbound::Ignored
        );
    }

    #[test]
    fn test_mistyped_auxiliary_fields_do_not_reject_message() {
        let id = ClientSessionId::new();
        let ready = classify_json(
            json!({"uid": id.to_string(), "message": "SERVER_READY", "backend": {"name": "tensorrt"}}),
            &id,
        );
        assert_eq!(ready, Inbound::ServerReady { backend: None });

        let segments = classify_json(
            json!({
                "uid": id.to_string(),
                "status": 7,
                "language": ["en"],
                "language_prob": "high",
                "segments": [{"text": "still delivered"}]
            }),
            &id,
        );
        assert!(matches!(segments, Inbound::Segments(ref s) if s[0]["text"] == "still delivered"));

        let detected = classify_json(
            json!({"uid": id.to_string(), "language": "de", "language_prob": "0.9"}),
            &id,
        );
        assert_eq!(
            detected,
            Inbound::LanguageDetected {
                language: "de".to_string(),
                probability: None
            }
        );
    }

    #[test]
    fn test_non_string_uid_is_foreign() {
        let id = ClientSessionId::new();
        let inbound = classify_json(json!({"uid": 42, "segments": [{"text": "x"}]}), &id);
        assert_eq!(inbound, Inbound::ForeignSession("42".to_string()));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let id = ClientSessionId::new();
        assert!(matches!(classify("{not json", &id), Err(ParseError::Json(_))));
    }
}
