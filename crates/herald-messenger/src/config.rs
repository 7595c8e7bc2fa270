//! Configuration types for the Messenger adapter.
//!
//! # Example Configuration
//!
//! ```yaml
//! page_token: EAAG...
//! bot_token: webhook-verify-secret
//! app_secret: signature-secret
//! app_id: "365"
//! handover:
//!   pass_thread_action: another-app-passed-thread
//!   take_thread_control: taken
//! ```

use serde::{Deserialize, Serialize};

/// Event-type keys that route a webhook item into a conversation queue.
///
/// Items carrying none of these keys bypass the pipeline and are returned to
/// the caller as unprocessed events.
pub const PROCESS_EVENTS: &[&str] = &[
    "message",
    "postback",
    "referral",
    "optin",
    "pass_thread_control",
    "take_thread_control",
    "request_thread_control",
    "read",
    "delivery",
];

/// Keys permitted in the metadata object of a pass-thread-control event.
pub const METADATA_KEYS: &[&str] = &["action", "data", "text", "setState"];

/// Messenger adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MessengerOptions {
    /// Page access token used for all outbound platform calls.
    pub page_token: String,

    /// Token the platform must present during webhook verification.
    pub bot_token: Option<String>,

    /// App secret for request signature verification. When absent,
    /// signatures are not checked.
    pub app_secret: Option<String>,

    /// Own application id, used by the take-thread-control loop guard.
    pub app_id: Option<String>,

    /// Page id override. Defaults to the incoming event's recipient id.
    pub page_id: Option<String>,

    /// Fixed API base URL override. When set, endpoint routing is disabled
    /// and every payload is posted to this URL unchanged.
    pub api_url: Option<String>,

    /// Escalates an engine-internal error status to a returned error instead
    /// of a silent status code.
    pub escalate_engine_errors: bool,

    /// Which thread-handover control events translate into engine actions.
    pub handover: HandoverPolicy,
}

impl MessengerOptions {
    /// Creates options with the required page token.
    pub fn new(page_token: impl Into<String>) -> Self {
        Self {
            page_token: page_token.into(),
            ..Self::default()
        }
    }
}

/// Per-deployment handover translation policy.
///
/// Each field names the engine action a control event translates into;
/// an absent field disables translation for that control type, and the
/// event is suppressed instead.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HandoverPolicy {
    /// Action emitted for a pass-thread-control event without usable metadata.
    pub pass_thread_action: Option<String>,

    /// Action emitted for a take-thread-control event.
    pub take_thread_action: Option<String>,

    /// Action emitted for a request-thread-control event.
    pub request_thread_action: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_options() {
        let yaml = r#"
page_token: pt
bot_token: bt
app_secret: as
app_id: "365"
escalate_engine_errors: true
handover:
  pass_thread_action: passed-thread
  take_thread_action: taken-thread
"#;

        let options: MessengerOptions = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(options.page_token, "pt");
        assert_eq!(options.bot_token.as_deref(), Some("bt"));
        assert_eq!(options.app_secret.as_deref(), Some("as"));
        assert_eq!(options.app_id.as_deref(), Some("365"));
        assert!(options.escalate_engine_errors);
        assert_eq!(
            options.handover.pass_thread_action.as_deref(),
            Some("passed-thread")
        );
        assert_eq!(
            options.handover.take_thread_action.as_deref(),
            Some("taken-thread")
        );
        assert_eq!(options.handover.request_thread_action, None);
        assert_eq!(options.api_url, None);
    }

    #[test]
    fn test_defaults() {
        let options = MessengerOptions::new("pt");
        assert_eq!(options.page_token, "pt");
        assert!(!options.escalate_engine_errors);
        assert_eq!(options.handover.pass_thread_action, None);
    }
}
