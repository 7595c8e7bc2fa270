//! # Herald Core
//!
//! Engine-facing contracts for the Herald messaging adapter.
//!
//! Herald sits between a social-messaging platform's webhook/Send API and a
//! generic conversational-bot processing engine. This crate carries the seams
//! both sides agree on:
//!
//! - [`Processor`] — the external bot-processing engine
//! - [`ChannelSender`] — the per-conversation outbound delivery capability
//! - [`StateStorage`] / [`AttachmentCache`] — narrow collaborator contracts
//! - [`ProcessingOutcome`] and the shared error taxonomy
//!
//! The platform specifics (webhook model, event routing, handover
//! normalization, the delivery pipeline) live in the adapter crates, such as
//! `herald-messenger`.

pub mod error;
pub mod outcome;
pub mod processor;
pub mod sender;
pub mod storage;

pub use error::{HeraldError, HeraldResult, TransportError, TransportResult};
pub use outcome::{ProcessingOutcome, STATUS_ERROR, STATUS_NO_ACTION, STATUS_OK};
pub use processor::{BoxedProcessor, HOP_COUNT_KEY, Processor};
pub use sender::{BoxedChannelSender, ChannelSender};
pub use storage::{
    AttachmentCache, BoxedAttachmentCache, BoxedStateStorage, MemoryAttachmentCache,
    MemoryStateStorage, StateStorage,
};
