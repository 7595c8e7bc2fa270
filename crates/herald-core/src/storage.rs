//! External collaborator contracts: conversation state and attachment cache.
//!
//! Both stores are shared across all conversations and must tolerate
//! concurrent access from independent conversation chains. They are used as
//! idempotent last-write-wins stores; eviction, if any, is the store's
//! responsibility, never the adapter's.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::HeraldResult;

// =============================================================================
// Contracts
// =============================================================================

/// Persisted conversation state, scoped per conversation + page.
#[async_trait]
pub trait StateStorage: Send + Sync {
    /// Loads the state of a conversation, if any.
    async fn get_state(&self, sender_id: &str, page_id: &str) -> HeraldResult<Option<Value>>;

    /// Stores the state of a conversation, replacing any previous value.
    async fn set_state(&self, sender_id: &str, page_id: &str, state: Value) -> HeraldResult<()>;
}

/// Cache of previously uploaded reusable attachments, keyed by source URL.
#[async_trait]
pub trait AttachmentCache: Send + Sync {
    /// Looks up the attachment id previously issued for a source URL.
    async fn find_attachment_by_url(&self, url: &str) -> HeraldResult<Option<Value>>;

    /// Saves the attachment id issued for a source URL. Last write wins.
    async fn save_attachment_id(&self, url: &str, attachment_id: Value) -> HeraldResult<()>;
}

/// A shared state storage trait object.
pub type BoxedStateStorage = Arc<dyn StateStorage>;

/// A shared attachment cache trait object.
pub type BoxedAttachmentCache = Arc<dyn AttachmentCache>;

// =============================================================================
// In-Memory Implementations
// =============================================================================

/// In-memory [`StateStorage`].
#[derive(Default)]
pub struct MemoryStateStorage {
    states: Mutex<HashMap<(String, String), Value>>,
}

impl MemoryStateStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored conversations.
    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    /// Returns true when no conversation state is stored.
    pub fn is_empty(&self) -> bool {
        self.states.lock().is_empty()
    }
}

#[async_trait]
impl StateStorage for MemoryStateStorage {
    async fn get_state(&self, sender_id: &str, page_id: &str) -> HeraldResult<Option<Value>> {
        let key = (sender_id.to_string(), page_id.to_string());
        Ok(self.states.lock().get(&key).cloned())
    }

    async fn set_state(&self, sender_id: &str, page_id: &str, state: Value) -> HeraldResult<()> {
        let key = (sender_id.to_string(), page_id.to_string());
        self.states.lock().insert(key, state);
        Ok(())
    }
}

/// In-memory [`AttachmentCache`].
#[derive(Default)]
pub struct MemoryAttachmentCache {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryAttachmentCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttachmentCache for MemoryAttachmentCache {
    async fn find_attachment_by_url(&self, url: &str) -> HeraldResult<Option<Value>> {
        Ok(self.entries.lock().get(url).cloned())
    }

    async fn save_attachment_id(&self, url: &str, attachment_id: Value) -> HeraldResult<()> {
        self.entries.lock().insert(url.to_string(), attachment_id);
        Ok(())
    }
}
