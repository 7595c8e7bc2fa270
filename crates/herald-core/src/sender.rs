//! Outbound delivery contract.
//!
//! A `ChannelSender` is the narrow capability interface a platform adapter
//! implements for one conversation: deliver payloads, and contribute patches
//! when the external persistence layer loads or stores conversation state.
//! No class hierarchy is required, only interface conformance.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::HeraldResult;
use crate::storage::BoxedStateStorage;

/// Per-conversation outbound delivery capability.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// Sends one outbound payload to the platform and returns its response.
    async fn send(&self, payload: Value) -> HeraldResult<Value>;

    /// Called after conversation state is loaded, before processing.
    ///
    /// Returns an optional patch to merge into the loaded state. The storage
    /// handle allows cross-conversation reads (reference-to-id migration).
    async fn on_state_load(
        &self,
        state: &Value,
        storage: &BoxedStateStorage,
    ) -> HeraldResult<Option<Value>>;

    /// Called before conversation state is stored.
    ///
    /// Returns an optional patch to merge into the stored state, typically the
    /// conversation's recipient binding.
    async fn on_state_save(&self) -> HeraldResult<Option<Value>>;
}

/// A shared channel sender trait object.
pub type BoxedChannelSender = Arc<dyn ChannelSender>;
