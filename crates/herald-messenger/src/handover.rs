//! Thread-handover normalization.
//!
//! The three-way handover control protocol (pass/take/request-thread-control)
//! arrives as free-form control events. This module turns them into normalized
//! engine events: a pure transform applying the per-deployment
//! [`HandoverPolicy`](crate::config::HandoverPolicy), the metadata grammar
//! below, and hop-count bookkeeping. The only cross-event state lives in the
//! sender's recipient binding; normalization itself is stateless per event.

use serde_json::{Map, Number, Value, json};

use crate::config::{METADATA_KEYS, MessengerOptions};

// =============================================================================
// Metadata Grammar
// =============================================================================

/// Parsed metadata of a pass-thread-control event.
///
/// The metadata string is usable only when it decodes as a JSON object whose
/// keys are drawn from [`METADATA_KEYS`], with `action` a string or null,
/// `data`/`setState` objects, `text` a string, and at least one of
/// `action`/`text` carrying a value. Anything else is treated as absent
/// metadata and the event falls back to the raw-control policy.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HandoverMetadata {
    /// Engine action to emit.
    pub action: Option<String>,
    /// Action data; hop counts travel here under `$hopCount`.
    pub data: Map<String, Value>,
    /// Text to emit.
    pub text: Option<String>,
    /// Conversation state patch.
    pub set_state: Option<Map<String, Value>>,
}

impl HandoverMetadata {
    /// Parses a metadata string. Returns `None` on any grammar violation.
    pub fn parse(raw: &str) -> Option<Self> {
        // cheap shape filter before decoding: `{"..."}` object literal
        if !raw.starts_with("{\"") || !raw.ends_with('}') || raw.len() < 4 {
            return None;
        }

        let value: Value = serde_json::from_str(raw).ok()?;
        let object = value.as_object()?;

        if !object.keys().all(|k| METADATA_KEYS.contains(&k.as_str())) {
            return None;
        }

        let action = match object.get("action") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return None,
        };
        let data = match object.get("data") {
            None => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => return None,
        };
        let text = match object.get("text") {
            None => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return None,
        };
        let set_state = match object.get("setState") {
            None => None,
            Some(Value::Object(map)) => Some(map.clone()),
            Some(_) => return None,
        };

        if action.is_none() && text.is_none() {
            return None;
        }

        Some(Self {
            action,
            data,
            text,
            set_state,
        })
    }

    /// Returns the numeric `$hopCount` carried in `data`, if any.
    pub fn hop_count(&self) -> Option<Number> {
        match self.data.get("$hopCount") {
            Some(Value::Number(n)) => Some(n.clone()),
            _ => None,
        }
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Outcome of normalizing one inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// Pass the raw event through unchanged.
    Forward,

    /// Replace the control event with a synthetic engine event.
    Synthetic {
        /// The normalized event.
        event: Value,
        /// Hop count captured from handover metadata, for downstream
        /// propagation in the engine context.
        hop_count: Option<Number>,
    },

    /// Drop the event; the engine is never invoked and the pipeline reports
    /// an accepted-but-ignored status without a platform call.
    Suppress,
}

/// Normalizes one inbound event against the deployment's handover policy.
pub fn normalize(event: &Value, sender_key: &str, options: &MessengerOptions) -> Normalized {
    let policy = &options.handover;

    if let Some(pass) = event.get("pass_thread_control") {
        if let Some(meta) = pass
            .get("metadata")
            .and_then(Value::as_str)
            .and_then(HandoverMetadata::parse)
        {
            let hop_count = meta.hop_count();
            if let Some(event) = metadata_event(&meta, sender_key) {
                return Normalized::Synthetic { event, hop_count };
            }
        }
        return control_action(sender_key, policy.pass_thread_action.as_deref(), pass);
    }

    if let Some(take) = event.get("take_thread_control") {
        let Some(action) = policy.take_thread_action.as_deref() else {
            return Normalized::Suppress;
        };

        // Trust guard: only a take from ourselves is translated, and a take
        // whose metadata carries our own app id is one we already know about.
        let taken_from_self = match options.app_id.as_deref() {
            None => true,
            Some(app_id) => value_matches_id(take.get("previous_owner_app_id"), app_id),
        };
        let already_known = match options.app_id.as_deref() {
            None => false,
            Some(app_id) => value_matches_id(take.get("metadata"), app_id),
        };

        if !taken_from_self || already_known {
            return Normalized::Suppress;
        }

        return Normalized::Synthetic {
            event: action_event(sender_key, action, take.clone(), None),
            hop_count: None,
        };
    }

    if let Some(request) = event.get("request_thread_control") {
        return control_action(
            sender_key,
            policy.request_thread_action.as_deref(),
            request,
        );
    }

    Normalized::Forward
}

/// Builds the synthetic event for valid pass-thread metadata.
fn metadata_event(meta: &HandoverMetadata, sender_key: &str) -> Option<Value> {
    let event = match (&meta.action, &meta.text) {
        (Some(action), Some(text)) => {
            // quick-reply text: the action rides along as an encoded payload
            let payload = json!({"action": action, "data": meta.data}).to_string();
            let mut event = json!({
                "sender": {"id": sender_key},
                "message": {
                    "text": text,
                    "quick_reply": {"payload": payload}
                }
            });
            apply_set_state(&mut event, &meta.set_state);
            event
        }
        (Some(action), None) => action_event(
            sender_key,
            action,
            Value::Object(meta.data.clone()),
            meta.set_state.clone(),
        ),
        (None, Some(text)) => {
            let mut event = json!({
                "sender": {"id": sender_key},
                "message": {"text": text}
            });
            apply_set_state(&mut event, &meta.set_state);
            event
        }
        (None, None) => return None,
    };
    Some(event)
}

/// Builds a normalized action event.
fn action_event(
    sender_key: &str,
    action: &str,
    data: Value,
    set_state: Option<Map<String, Value>>,
) -> Value {
    let mut event = json!({
        "sender": {"id": sender_key},
        "action": action,
        "data": data
    });
    apply_set_state(&mut event, &set_state);
    event
}

fn apply_set_state(event: &mut Value, set_state: &Option<Map<String, Value>>) {
    if let Some(patch) = set_state {
        event["setState"] = Value::Object(patch.clone());
    }
}

/// Translates a control event without usable metadata into the configured
/// action, or suppresses it.
fn control_action(sender_key: &str, action: Option<&str>, payload: &Value) -> Normalized {
    match action {
        Some(action) => Normalized::Synthetic {
            event: action_event(sender_key, action, payload.clone(), None),
            hop_count: None,
        },
        None => Normalized::Suppress,
    }
}

/// Compares a JSON value against an application id, tolerating numeric ids.
fn value_matches_id(value: Option<&Value>, id: &str) -> bool {
    match value {
        Some(Value::String(s)) => s == id,
        Some(Value::Number(n)) => n.to_string() == id,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HandoverPolicy;

    fn options() -> MessengerOptions {
        MessengerOptions {
            app_id: Some("365".to_string()),
            handover: HandoverPolicy {
                pass_thread_action: Some("passed-thread".to_string()),
                take_thread_action: Some("taken-thread".to_string()),
                request_thread_action: Some("requested-thread".to_string()),
            },
            ..MessengerOptions::new("pt")
        }
    }

    fn pass_event(metadata: &str) -> Value {
        json!({
            "sender": {"id": "abc"},
            "pass_thread_control": {
                "new_owner_app_id": "365",
                "metadata": metadata
            }
        })
    }

    #[test]
    fn test_metadata_action_only() {
        let meta = HandoverMetadata::parse(r#"{"action":"abc","data":{"$hopCount":1}}"#).unwrap();
        assert_eq!(meta.action.as_deref(), Some("abc"));
        assert_eq!(meta.hop_count(), Some(Number::from(1)));
        assert_eq!(meta.text, None);
    }

    #[test]
    fn test_metadata_rejects_unknown_keys() {
        assert_eq!(HandoverMetadata::parse(r#"{"action":"a","extra":1}"#), None);
    }

    #[test]
    fn test_metadata_rejects_wrong_types() {
        assert_eq!(HandoverMetadata::parse(r#"{"action":1}"#), None);
        assert_eq!(HandoverMetadata::parse(r#"{"text":{}}"#), None);
        assert_eq!(HandoverMetadata::parse(r#"{"action":"a","data":[]}"#), None);
        assert_eq!(
            HandoverMetadata::parse(r#"{"text":"t","setState":"x"}"#),
            None
        );
    }

    #[test]
    fn test_metadata_requires_action_or_text() {
        assert_eq!(HandoverMetadata::parse(r#"{"data":{}}"#), None);
        assert_eq!(HandoverMetadata::parse(r#"{"action":null}"#), None);
    }

    #[test]
    fn test_metadata_rejects_non_object_shapes() {
        assert_eq!(HandoverMetadata::parse("plain text"), None);
        assert_eq!(HandoverMetadata::parse(r#"["action"]"#), None);
        assert_eq!(HandoverMetadata::parse(r#"{"action":"a""#), None);
    }

    #[test]
    fn test_pass_with_action_metadata() {
        let event = pass_event(r#"{"action":"abc","data":{"$hopCount":1}}"#);
        let normalized = normalize(&event, "abc", &options());

        match normalized {
            Normalized::Synthetic { event, hop_count } => {
                assert_eq!(event["action"], "abc");
                assert_eq!(event["data"], json!({"$hopCount": 1}));
                assert_eq!(event["sender"]["id"], "abc");
                assert_eq!(hop_count, Some(Number::from(1)));
            }
            other => panic!("expected synthetic event, got {other:?}"),
        }
    }

    #[test]
    fn test_pass_with_text_and_set_state() {
        let event = pass_event(r#"{"text":"hello","setState":{"step":2}}"#);
        let normalized = normalize(&event, "abc", &options());

        match normalized {
            Normalized::Synthetic { event, hop_count } => {
                assert_eq!(event["message"]["text"], "hello");
                assert_eq!(event["setState"], json!({"step": 2}));
                assert_eq!(hop_count, None);
            }
            other => panic!("expected synthetic event, got {other:?}"),
        }
    }

    #[test]
    fn test_pass_with_action_and_text_becomes_quick_reply() {
        let event = pass_event(r#"{"action":"abc","text":"hello","data":{"k":1}}"#);
        let normalized = normalize(&event, "abc", &options());

        match normalized {
            Normalized::Synthetic { event, .. } => {
                assert_eq!(event["message"]["text"], "hello");
                let payload = event["message"]["quick_reply"]["payload"].as_str().unwrap();
                let decoded: Value = serde_json::from_str(payload).unwrap();
                assert_eq!(decoded, json!({"action": "abc", "data": {"k": 1}}));
            }
            other => panic!("expected synthetic event, got {other:?}"),
        }
    }

    #[test]
    fn test_pass_with_broken_metadata_falls_back_to_policy() {
        let event = pass_event(r#"{"action":"abc""#);
        let normalized = normalize(&event, "abc", &options());

        match normalized {
            Normalized::Synthetic { event, .. } => {
                assert_eq!(event["action"], "passed-thread");
                assert_eq!(event["data"]["metadata"], r#"{"action":"abc""#);
            }
            other => panic!("expected fallback action, got {other:?}"),
        }
    }

    #[test]
    fn test_pass_without_configured_action_is_suppressed() {
        let mut opts = options();
        opts.handover.pass_thread_action = None;
        let event = pass_event("not metadata");
        assert_eq!(normalize(&event, "abc", &opts), Normalized::Suppress);
    }

    #[test]
    fn test_take_from_ourselves_is_translated() {
        let event = json!({
            "sender": {"id": "abc"},
            "take_thread_control": {"previous_owner_app_id": "365"}
        });
        let normalized = normalize(&event, "abc", &options());

        match normalized {
            Normalized::Synthetic { event, .. } => {
                assert_eq!(event["action"], "taken-thread");
                assert_eq!(event["data"]["previous_owner_app_id"], "365");
            }
            other => panic!("expected synthetic event, got {other:?}"),
        }
    }

    #[test]
    fn test_take_from_another_app_is_suppressed() {
        let event = json!({
            "sender": {"id": "abc"},
            "take_thread_control": {"previous_owner_app_id": "999"}
        });
        assert_eq!(normalize(&event, "abc", &options()), Normalized::Suppress);
    }

    #[test]
    fn test_take_with_own_app_id_metadata_is_suppressed() {
        let event = json!({
            "sender": {"id": "abc"},
            "take_thread_control": {
                "previous_owner_app_id": "365",
                "metadata": "365"
            }
        });
        assert_eq!(normalize(&event, "abc", &options()), Normalized::Suppress);
    }

    #[test]
    fn test_take_without_configured_app_id_is_translated() {
        let mut opts = options();
        opts.app_id = None;
        let event = json!({
            "sender": {"id": "abc"},
            "take_thread_control": {"previous_owner_app_id": "999"}
        });
        assert!(matches!(
            normalize(&event, "abc", &opts),
            Normalized::Synthetic { .. }
        ));
    }

    #[test]
    fn test_take_without_configured_action_is_suppressed() {
        let mut opts = options();
        opts.handover.take_thread_action = None;
        let event = json!({
            "sender": {"id": "abc"},
            "take_thread_control": {"previous_owner_app_id": "365"}
        });
        assert_eq!(normalize(&event, "abc", &opts), Normalized::Suppress);
    }

    #[test]
    fn test_request_thread_control_uses_configured_action() {
        let event = json!({
            "sender": {"id": "abc"},
            "request_thread_control": {"requested_owner_app_id": "999"}
        });
        let normalized = normalize(&event, "abc", &options());

        match normalized {
            Normalized::Synthetic { event, .. } => {
                assert_eq!(event["action"], "requested-thread");
            }
            other => panic!("expected synthetic event, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_message_is_forwarded() {
        let event = json!({
            "sender": {"id": "abc"},
            "message": {"text": "hello"}
        });
        assert_eq!(normalize(&event, "abc", &options()), Normalized::Forward);
    }
}
