//! Unified error types for the Herald adapter.
//!
//! This module provides the error taxonomy shared by the core contracts and
//! the platform adapters. Transport-level failures are kept separate so that
//! senders can classify structured platform error bodies.

use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors that can occur while talking to the platform API.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Request could not be performed (connection, timeout, TLS, ...).
    #[error("request failed: {0}")]
    Network(String),

    /// The platform answered with a non-success status and a structured body.
    #[error("platform error {status}: {body}")]
    Platform {
        /// HTTP status code of the response.
        status: u16,
        /// Parsed response body, usually `{"error": {"code": ..., "message": ...}}`.
        body: serde_json::Value,
    },

    /// Response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Returns the platform error code from a structured error body, if any.
    pub fn platform_error_code(&self) -> Option<i64> {
        match self {
            TransportError::Platform { body, .. } => body
                .get("error")
                .and_then(|e| e.get("code"))
                .and_then(serde_json::Value::as_i64),
            _ => None,
        }
    }

    /// Returns the platform error message from a structured error body, if any.
    pub fn platform_error_message(&self) -> Option<&str> {
        match self {
            TransportError::Platform { body, .. } => body
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(serde_json::Value::as_str),
            _ => None,
        }
    }
}

// =============================================================================
// Adapter Errors
// =============================================================================

/// Errors surfaced by the Herald adapter pipeline.
#[derive(Debug, Error)]
pub enum HeraldError {
    /// Webhook verification or request signature failed.
    #[error("unauthorized: {reason}")]
    Unauthorized {
        /// Reason for the rejection.
        reason: String,
    },

    /// The platform reported that the end user blocked or disconnected the bot.
    #[error("{message}")]
    RecipientUnreachable {
        /// Message taken from the platform error body.
        message: String,
    },

    /// A reference-based conversation was persisted before any send could
    /// confirm a durable recipient id.
    #[error("no confirmable message was ever sent for this optin")]
    UnresolvedRecipient,

    /// The recipient resolution handle was resolved a second time.
    #[error("recipient id was already resolved for this conversation")]
    AlreadyResolved,

    /// Conversation state could not be read or written.
    #[error("state storage failed: {0}")]
    Storage(String),

    /// Transport failure that was not reclassified.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The downstream processing engine failed.
    #[error(transparent)]
    Engine(#[from] anyhow::Error),

    /// The processing engine finished with an internal error status and the
    /// deployment opted into escalating it.
    #[error("processing finished with error status {status}")]
    EngineStatus {
        /// The engine-reported status code.
        status: u16,
    },
}

impl HeraldError {
    /// Creates an authorization error.
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Returns the fixed status code associated with this error class.
    pub fn status(&self) -> u16 {
        match self {
            HeraldError::Unauthorized { .. } => 401,
            HeraldError::RecipientUnreachable { .. } => 403,
            HeraldError::EngineStatus { status } => *status,
            _ => 500,
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for adapter operations.
pub type HeraldResult<T> = Result<T, HeraldError>;
