//! Processing engine contract.
//!
//! The engine that decides how to answer a conversation event is an external
//! collaborator. Herald hands it one normalized event at a time together with
//! a [`ChannelSender`](crate::sender::ChannelSender) for the conversation and
//! a map of contextual data.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::outcome::ProcessingOutcome;
use crate::sender::BoxedChannelSender;

/// Context key under which the handover hop count travels to the engine.
pub const HOP_COUNT_KEY: &str = "$hopCount";

/// The conversational-bot processing engine.
///
/// Implementations receive one normalized event at a time. Events of the same
/// conversation arrive strictly in order; independent conversations may be
/// processed concurrently.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Processes one normalized event.
    ///
    /// # Arguments
    ///
    /// * `event` - the normalized chat event
    /// * `page_id` - channel/page identifier the event arrived on
    /// * `sender` - delivery handle for the conversation
    /// * `context` - contextual data, including [`HOP_COUNT_KEY`] when the
    ///   event originated from handover metadata carrying a hop count
    async fn process_message(
        &self,
        event: &Value,
        page_id: &str,
        sender: BoxedChannelSender,
        context: &Map<String, Value>,
    ) -> anyhow::Result<ProcessingOutcome>;
}

/// A shared processor trait object.
pub type BoxedProcessor = Arc<dyn Processor>;
