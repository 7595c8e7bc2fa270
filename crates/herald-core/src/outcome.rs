//! Processing outcome reported per conversation event.

use serde::{Deserialize, Serialize};

/// The event was processed and delivered.
pub const STATUS_OK: u16 = 200;

/// The event was accepted but intentionally produced no work (for example a
/// suppressed handover control event). The engine is never invoked for these.
pub const STATUS_NO_ACTION: u16 = 204;

/// The processing engine finished with an internal error.
pub const STATUS_ERROR: u16 = 500;

/// Result of processing a single conversation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingOutcome {
    /// Status code of the processing run.
    pub status: u16,
}

impl ProcessingOutcome {
    /// Outcome of a successfully processed event.
    pub fn ok() -> Self {
        Self { status: STATUS_OK }
    }

    /// Outcome of an accepted-but-ignored event.
    pub fn no_action() -> Self {
        Self {
            status: STATUS_NO_ACTION,
        }
    }

    /// Returns true when the engine reported an internal error status.
    pub fn is_error(&self) -> bool {
        self.status >= STATUS_ERROR
    }
}
