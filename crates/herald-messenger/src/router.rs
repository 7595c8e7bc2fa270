//! Top-level event router.
//!
//! `Messenger` is the adapter's entry point. It fans a webhook batch out into
//! per-conversation queues, drains each queue strictly in arrival order
//! through the handover normalizer, the processing engine and the delivery
//! pipeline, and runs independent conversations concurrently. Events with no
//! recognized type key are returned to the caller, tagged with their page id.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::{Map, Value, json};
use tracing::{debug, error};

use herald_core::{
    BoxedAttachmentCache, BoxedProcessor, HOP_COUNT_KEY, HeraldResult, ProcessingOutcome,
    Processor,
};

use crate::api::{BoxedGraphTransport, HttpTransport};
use crate::config::{MessengerOptions, PROCESS_EVENTS};
use crate::handover::{Normalized, normalize};
use crate::sender::MessengerSender;
use crate::webhook::{self, PAGE_OBJECT, WebhookPayload};

/// An event the router could not classify, returned for external handling.
#[derive(Debug, Clone, PartialEq)]
pub struct UnprocessedEvent {
    /// Page the event arrived on.
    pub page_id: String,
    /// The raw event, verbatim.
    pub event: Value,
}

/// One conversation's ordered events within a batch: `(sender key, [(event, page id)])`.
type ConversationQueue = (String, Vec<(Value, String)>);

/// The Messenger platform adapter.
pub struct Messenger {
    processor: BoxedProcessor,
    options: MessengerOptions,
    transport: BoxedGraphTransport,
    attachment_cache: Option<BoxedAttachmentCache>,
}

impl Messenger {
    /// Creates an adapter backed by the default HTTP transport.
    pub fn new(processor: BoxedProcessor, options: MessengerOptions) -> Self {
        Self::with_transport(processor, options, Arc::new(HttpTransport::new()))
    }

    /// Creates an adapter with a custom transport.
    pub fn with_transport(
        processor: BoxedProcessor,
        options: MessengerOptions,
        transport: BoxedGraphTransport,
    ) -> Self {
        Self {
            processor,
            options,
            transport,
            attachment_cache: None,
        }
    }

    /// Attaches an attachment cache for reusable-attachment substitution.
    pub fn with_attachment_cache(mut self, cache: BoxedAttachmentCache) -> Self {
        self.attachment_cache = Some(cache);
        self
    }

    /// Returns the adapter configuration.
    pub fn options(&self) -> &MessengerOptions {
        &self.options
    }

    /// Verifies the webhook subscription handshake. See [`webhook::verify_webhook`].
    pub fn verify_webhook(&self, query: &HashMap<String, String>) -> HeraldResult<String> {
        webhook::verify_webhook(self.options.bot_token.as_deref(), query)
    }

    /// Verifies a request signature. See [`webhook::verify_request`].
    pub fn verify_request(
        &self,
        body: &[u8],
        headers: &HashMap<String, String>,
    ) -> HeraldResult<()> {
        webhook::verify_request(self.options.app_secret.as_deref(), body, headers)
    }

    /// Processes one webhook batch.
    ///
    /// Conversations found in the batch run concurrently; events within one
    /// conversation are processed strictly sequentially, each chain completing
    /// (including its network call) before the next event starts. A failure in
    /// one conversation is logged and never fails the batch.
    pub async fn process_event(
        &self,
        body: &Value,
        context: &Map<String, Value>,
    ) -> Vec<UnprocessedEvent> {
        let mut unprocessed = Vec::new();

        let Some(payload) = WebhookPayload::from_value(body) else {
            return unprocessed;
        };
        if payload.object != PAGE_OBJECT {
            return unprocessed;
        }

        let mut queues: Vec<ConversationQueue> = Vec::new();
        let mut queue_index: HashMap<String, usize> = HashMap::new();

        for entry in &payload.entry {
            for event in &entry.messaging {
                route_item(
                    event,
                    &entry.id,
                    false,
                    &mut queues,
                    &mut queue_index,
                    &mut unprocessed,
                );
            }
            for event in &entry.standby {
                route_item(
                    event,
                    &entry.id,
                    true,
                    &mut queues,
                    &mut queue_index,
                    &mut unprocessed,
                );
            }
        }

        join_all(queues.into_iter().map(|(sender_key, events)| async move {
            for (event, page_id) in events {
                if let Err(e) = self
                    .process_message(&event, &sender_key, &page_id, context)
                    .await
                {
                    error!(
                        sender_id = %sender_key,
                        page_id = %page_id,
                        error = %e,
                        "event processing failed"
                    );
                }
            }
        }))
        .await;

        unprocessed
    }

    /// Processes one conversation event: normalize, then engine + delivery.
    ///
    /// A suppressed handover event short-circuits the whole chain: the engine
    /// is never invoked and a fixed accepted-but-ignored status is reported
    /// without a platform call.
    pub async fn process_message(
        &self,
        event: &Value,
        sender_key: &str,
        page_id: &str,
        context: &Map<String, Value>,
    ) -> HeraldResult<ProcessingOutcome> {
        match normalize(event, sender_key, &self.options) {
            Normalized::Suppress => {
                debug!(sender_id = %sender_key, "handover control event suppressed");
                Ok(ProcessingOutcome::no_action())
            }
            Normalized::Forward => {
                self.invoke_engine(event, sender_key, page_id, context, None)
                    .await
            }
            Normalized::Synthetic { event, hop_count } => {
                self.invoke_engine(&event, sender_key, page_id, context, hop_count)
                    .await
            }
        }
    }

    async fn invoke_engine(
        &self,
        event: &Value,
        sender_key: &str,
        page_id: &str,
        context: &Map<String, Value>,
        hop_count: Option<serde_json::Number>,
    ) -> HeraldResult<ProcessingOutcome> {
        let sender = Arc::new(MessengerSender::new(
            &self.options,
            sender_key,
            event.clone(),
            Arc::clone(&self.transport),
            self.attachment_cache.clone(),
        ));

        let mut context = context.clone();
        if let Some(hop_count) = hop_count {
            context.insert(HOP_COUNT_KEY.to_string(), Value::Number(hop_count));
        }

        let outcome = self
            .processor
            .process_message(event, page_id, sender, &context)
            .await?;

        if self.options.escalate_engine_errors && outcome.is_error() {
            return Err(herald_core::HeraldError::EngineStatus {
                status: outcome.status,
            });
        }

        Ok(outcome)
    }
}

/// Routes one webhook item into a conversation queue or the unprocessed list.
fn route_item(
    event: &Value,
    page_id: &str,
    standby: bool,
    queues: &mut Vec<ConversationQueue>,
    queue_index: &mut HashMap<String, usize>,
    unprocessed: &mut Vec<UnprocessedEvent>,
) {
    // plain text on the standby channel is dropped, never forwarded: the
    // thread is owned by another party and echoing it would double-deliver
    if standby
        && event
            .get("message")
            .and_then(|m| m.get("text"))
            .and_then(Value::as_str)
            .is_some()
    {
        return;
    }

    if !PROCESS_EVENTS.iter().any(|key| event.get(key).is_some()) {
        unprocessed.push(UnprocessedEvent {
            page_id: page_id.to_string(),
            event: event.clone(),
        });
        return;
    }

    let sender_id = event
        .get("sender")
        .and_then(|s| s.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let (sender_key, event) = match sender_id {
        Some(id) => (id, event.clone()),
        None => {
            let user_ref = event
                .get("optin")
                .and_then(|o| o.get("user_ref"))
                .and_then(Value::as_str)
                .map(str::to_string);

            match user_ref {
                // synthesize a sender identity from the optin reference so
                // later stages never special-case a missing sender
                Some(user_ref) => {
                    let mut event = event.clone();
                    event["sender"] = json!({"id": user_ref});
                    (user_ref, event)
                }
                None => {
                    unprocessed.push(UnprocessedEvent {
                        page_id: page_id.to_string(),
                        event: event.clone(),
                    });
                    return;
                }
            }
        }
    };

    let index = *queue_index.entry(sender_key.clone()).or_insert_with(|| {
        queues.push((sender_key.clone(), Vec::new()));
        queues.len() - 1
    });
    queues[index].1.push((event, page_id.to_string()));
}
