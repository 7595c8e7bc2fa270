//! Outbound delivery pipeline for one conversation.
//!
//! `MessengerSender` implements [`ChannelSender`] for the Messenger platform:
//! endpoint routing, attachment-reuse caching, deferred recipient-identity
//! resolution for reference-based conversations, and platform-error
//! classification.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, warn};

use herald_core::{
    BoxedAttachmentCache, BoxedStateStorage, ChannelSender, HeraldError, HeraldResult,
};

use crate::api::{BoxedGraphTransport, DEFAULT_API_URL, GraphTransport};
use crate::config::MessengerOptions;

/// Platform error codes meaning the end user blocked or disconnected the bot.
const BLOCKED_ERROR_CODES: [i64; 2] = [200, 10];

/// Delay before a failed `mark_seen` indicator is reported as a soft result.
const SEEN_ERROR_DELAY: Duration = Duration::from_millis(500);

/// State key under which the recipient binding is persisted.
const RECIPIENT_STATE_KEY: &str = "_recipient";

// =============================================================================
// Recipient Binding
// =============================================================================

/// How a conversation is addressed.
///
/// A conversation starts as `Ref` when the inbound event carried an optin
/// reference and upgrades permanently to `Id` the first time the platform
/// confirms a durable id. The upgrade is monotonic, never reversed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientBinding {
    /// Short-lived opaque reference from an optin flow.
    Ref(String),
    /// Durable user id.
    Id(String),
}

struct BindingState {
    binding: RecipientBinding,
    /// The conversation is (or was) reference-based, so the binding is
    /// contributed to persisted state.
    persist: bool,
}

// =============================================================================
// Resolution Handle
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum ResolutionState {
    /// No send has been attempted yet.
    Unresolved,
    /// A send completed without the platform confirming a durable id.
    Settled,
    /// The platform confirmed a durable id.
    Resolved(String),
}

/// Completion handle for deferred recipient resolution.
///
/// Single-resolution contract: resolving twice is an error, and reading the
/// result before any send was attempted is an error ("no confirmable message
/// was ever sent for this optin"). Failed sends settle the handle without an
/// id so waiters never hang.
struct ResolutionHandle {
    attempted: AtomicBool,
    tx: watch::Sender<ResolutionState>,
}

impl ResolutionHandle {
    fn new() -> Self {
        Self {
            attempted: AtomicBool::new(false),
            tx: watch::Sender::new(ResolutionState::Unresolved),
        }
    }

    fn mark_attempted(&self) {
        self.attempted.store(true, Ordering::SeqCst);
    }

    fn resolve(&self, id: &str) -> HeraldResult<()> {
        let mut already_resolved = false;
        self.tx.send_modify(|state| {
            if matches!(state, ResolutionState::Resolved(_)) {
                already_resolved = true;
            } else {
                *state = ResolutionState::Resolved(id.to_string());
            }
        });
        if already_resolved {
            Err(HeraldError::AlreadyResolved)
        } else {
            Ok(())
        }
    }

    fn settle(&self) {
        self.tx.send_if_modified(|state| {
            if matches!(state, ResolutionState::Unresolved) {
                *state = ResolutionState::Settled;
                true
            } else {
                false
            }
        });
    }

    async fn wait(&self) -> HeraldResult<Option<String>> {
        if !self.attempted.load(Ordering::SeqCst) {
            return Err(HeraldError::UnresolvedRecipient);
        }
        let mut rx = self.tx.subscribe();
        let state = rx
            .wait_for(|state| !matches!(state, ResolutionState::Unresolved))
            .await
            .map_err(|_| HeraldError::UnresolvedRecipient)?;
        match &*state {
            ResolutionState::Resolved(id) => Ok(Some(id.clone())),
            _ => Ok(None),
        }
    }
}

// =============================================================================
// MessengerSender
// =============================================================================

/// Per-conversation delivery pipeline.
pub struct MessengerSender {
    token: String,
    url: String,
    static_url: bool,
    page_id: Option<String>,
    incoming: Value,
    transport: BoxedGraphTransport,
    attachment_cache: Option<BoxedAttachmentCache>,
    binding: Mutex<BindingState>,
    resolution: ResolutionHandle,
}

impl MessengerSender {
    /// Creates a sender for one conversation.
    pub fn new(
        options: &MessengerOptions,
        sender_key: &str,
        incoming: Value,
        transport: BoxedGraphTransport,
        attachment_cache: Option<BoxedAttachmentCache>,
    ) -> Self {
        let user_ref = incoming
            .get("optin")
            .and_then(|o| o.get("user_ref"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let binding = match &user_ref {
            Some(user_ref) => RecipientBinding::Ref(user_ref.clone()),
            None => RecipientBinding::Id(sender_key.to_string()),
        };

        let page_id = options.page_id.clone().or_else(|| {
            incoming
                .get("recipient")
                .and_then(|r| r.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });

        Self {
            token: options.page_token.clone(),
            url: options
                .api_url
                .clone()
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            static_url: options.api_url.is_some(),
            page_id,
            incoming,
            transport,
            attachment_cache,
            binding: Mutex::new(BindingState {
                persist: user_ref.is_some(),
                binding,
            }),
            resolution: ResolutionHandle::new(),
        }
    }

    /// Returns the current recipient binding.
    pub fn binding(&self) -> RecipientBinding {
        self.binding.lock().binding.clone()
    }

    /// Resolves the destination endpoint and request body for a payload.
    ///
    /// With a fixed API URL configured, routing is disabled and the payload
    /// goes to that URL unchanged.
    fn route(&self, data: &Value) -> (String, Value) {
        if self.static_url {
            return (self.url.clone(), data.clone());
        }
        if data.get("target_app_id").is_some() {
            return (format!("{}/pass_thread_control", self.url), data.clone());
        }
        if let Some(control) = data.get("take_thread_control") {
            return (
                format!("{}/take_thread_control", self.url),
                reshape_control(data, control),
            );
        }
        if let Some(control) = data.get("request_thread_control") {
            return (
                format!("{}/request_thread_control", self.url),
                reshape_control(data, control),
            );
        }
        (format!("{}/messages", self.url), data.clone())
    }

    async fn request(&self, data: &Value) -> HeraldResult<Value> {
        let (url, body) = self.route(data);
        debug!(url = %url, "sending platform request");
        Ok(self.transport.post(&url, &self.token, &body).await?)
    }

    /// Replaces a reusable attachment payload with a cached attachment id.
    ///
    /// Returns the possibly rewritten payload and the tracked source URL.
    async fn substitute_attachment_from_cache(
        &self,
        data: Value,
    ) -> HeraldResult<(Value, Option<String>)> {
        let Some(cache) = &self.attachment_cache else {
            return Ok((data, None));
        };

        let attachment_url = data
            .get("message")
            .and_then(|m| m.get("attachment"))
            .and_then(|a| a.get("payload"))
            .filter(|p| p.get("is_reusable").and_then(Value::as_bool) == Some(true))
            .and_then(|p| p.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let Some(url) = attachment_url else {
            return Ok((data, None));
        };

        if let Some(attachment_id) = cache.find_attachment_by_url(&url).await? {
            let mut data = data;
            data["message"]["attachment"]["payload"] = json!({"attachment_id": attachment_id});
            return Ok((data, Some(url)));
        }

        Ok((data, Some(url)))
    }

    /// Saves a newly issued attachment id for the tracked URL. Best-effort,
    /// happens-after the network call; last write wins.
    async fn store_attachment_id_to_cache(&self, attachment_url: Option<String>, response: &Value) {
        let (Some(cache), Some(url)) = (&self.attachment_cache, attachment_url) else {
            return;
        };
        let Some(attachment_id) = response.get("attachment_id") else {
            return;
        };
        if attachment_id.is_null() {
            return;
        }
        if let Err(e) = cache.save_attachment_id(&url, attachment_id.clone()).await {
            warn!(url = %url, error = %e, "failed to cache attachment id");
        }
    }

    /// Applies the platform-confirmed recipient id to the binding and the
    /// resolution handle.
    fn confirm_recipient(&self, response: &Value) -> HeraldResult<()> {
        let recipient_id = response.get("recipient_id").and_then(value_to_id);

        let upgraded = {
            let mut state = self.binding.lock();
            match (&state.binding, recipient_id) {
                (RecipientBinding::Ref(_), Some(id)) => {
                    state.binding = RecipientBinding::Id(id.clone());
                    Some(id)
                }
                _ => None,
            }
        };

        match upgraded {
            Some(id) => {
                debug!(recipient_id = %id, "recipient reference resolved");
                self.resolution.resolve(&id)
            }
            None => {
                self.resolution.settle();
                Ok(())
            }
        }
    }

    /// Reclassifies a platform error reporting a blocked/disconnected user.
    fn classify(&self, error: HeraldError) -> HeraldError {
        if let HeraldError::Transport(transport) = &error
            && let Some(code) = transport.platform_error_code()
            && BLOCKED_ERROR_CODES.contains(&code)
        {
            return HeraldError::RecipientUnreachable {
                message: transport
                    .platform_error_message()
                    .unwrap_or("recipient is not available")
                    .to_string(),
            };
        }
        error
    }

    /// Seeds the binding from a persisted recipient descriptor. A durable id
    /// is never downgraded back to a reference.
    fn seed_binding(&self, recipient: &Value) {
        let mut state = self.binding.lock();
        if let Some(id) = recipient.get("id").and_then(Value::as_str) {
            if matches!(state.binding, RecipientBinding::Ref(_)) {
                state.binding = RecipientBinding::Id(id.to_string());
            }
            state.persist = true;
        } else if let Some(user_ref) = recipient.get("user_ref").and_then(Value::as_str)
            && matches!(state.binding, RecipientBinding::Ref(_))
        {
            state.binding = RecipientBinding::Ref(user_ref.to_string());
            state.persist = true;
        }
    }
}

#[async_trait]
impl ChannelSender for MessengerSender {
    async fn send(&self, mut payload: Value) -> HeraldResult<Value> {
        // While the binding is reference-based, the recipient descriptor is
        // always overwritten with the reference form.
        {
            let state = self.binding.lock();
            if let RecipientBinding::Ref(user_ref) = &state.binding {
                payload["recipient"] = json!({"user_ref": user_ref});
            }
        }

        self.resolution.mark_attempted();

        let is_mark_seen =
            payload.get("sender_action").and_then(Value::as_str) == Some("mark_seen");

        let result: HeraldResult<Value> = async {
            let (data, attachment_url) = self.substitute_attachment_from_cache(payload).await?;
            let response = self.request(&data).await?;
            self.store_attachment_id_to_cache(attachment_url, &response)
                .await;
            Ok(response)
        }
        .await;

        match result {
            Ok(response) => {
                self.confirm_recipient(&response)?;
                Ok(response)
            }
            Err(e) => {
                self.resolution.settle();
                if is_mark_seen {
                    // a failed seen indicator never fails the conversation
                    sleep(SEEN_ERROR_DELAY).await;
                    return Ok(json!({"seen_error": true}));
                }
                Err(self.classify(e))
            }
        }
    }

    async fn on_state_load(
        &self,
        state: &Value,
        storage: &BoxedStateStorage,
    ) -> HeraldResult<Option<Value>> {
        if let Some(identifier) = self
            .incoming
            .get("prior_message")
            .and_then(|p| p.get("identifier"))
            .and_then(Value::as_str)
        {
            let page_id = state
                .get("pageId")
                .and_then(Value::as_str)
                .or(self.page_id.as_deref())
                .unwrap_or_default();

            if let Some(mut prior) = storage.get_state(identifier, page_id).await?
                && let Some(merged) = prior.as_object_mut()
            {
                merged.insert("_mergedFromSenderId".to_string(), json!(identifier));
                return Ok(Some(prior));
            }
        }

        if let Some(recipient) = state.get(RECIPIENT_STATE_KEY) {
            self.seed_binding(recipient);
        }

        Ok(None)
    }

    async fn on_state_save(&self) -> HeraldResult<Option<Value>> {
        let (binding, persist) = {
            let state = self.binding.lock();
            (state.binding.clone(), state.persist)
        };

        if !persist {
            return Ok(None);
        }

        match binding {
            RecipientBinding::Id(id) => Ok(Some(json!({RECIPIENT_STATE_KEY: {"id": id}}))),
            RecipientBinding::Ref(user_ref) => match self.resolution.wait().await? {
                Some(id) => {
                    let mut state = self.binding.lock();
                    if matches!(state.binding, RecipientBinding::Ref(_)) {
                        state.binding = RecipientBinding::Id(id.clone());
                    }
                    drop(state);
                    Ok(Some(json!({RECIPIENT_STATE_KEY: {"id": id}})))
                }
                None => Ok(Some(json!({RECIPIENT_STATE_KEY: {"user_ref": user_ref}}))),
            },
        }
    }
}

/// Reshapes a thread-control payload to `{recipient, ...control}`.
fn reshape_control(data: &Value, control: &Value) -> Value {
    let mut body = Map::new();
    if let Some(recipient) = data.get("recipient") {
        body.insert("recipient".to_string(), recipient.clone());
    }
    if let Some(fields) = control.as_object() {
        for (key, value) in fields {
            body.insert(key.clone(), value.clone());
        }
    }
    Value::Object(body)
}

/// Extracts a recipient id from a response field, tolerating numeric ids.
fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
