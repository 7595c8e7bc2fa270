//! # Herald Messenger
//!
//! Messenger platform adapter for the Herald bot pipeline.
//!
//! This crate is a protocol adapter between the platform's webhook/Send API
//! and a generic conversational-bot processing engine
//! ([`Processor`](herald_core::Processor)):
//!
//! - **Webhook model and verification** ([`webhook`]): the page-subscription
//!   payload, the `hub.verify_token` handshake and the `X-Hub-Signature`
//!   HMAC-SHA1 request check.
//! - **Event router** ([`router`]): fans a webhook batch into per-conversation
//!   queues, drains each queue strictly in order and runs independent
//!   conversations concurrently.
//! - **Handover normalizer** ([`handover`]): turns the three-way
//!   pass/take/request-thread-control protocol into normalized engine events,
//!   with hop-count propagation.
//! - **Delivery pipeline** ([`sender`]): endpoint routing, attachment-reuse
//!   caching, deferred recipient resolution and platform-error
//!   classification.
//! - **Profile loader** ([`profile`]): cache-checked user-profile enrichment.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use herald_messenger::{Messenger, MessengerOptions};
//!
//! let options = MessengerOptions {
//!     bot_token: Some("verify-secret".into()),
//!     app_secret: Some("app-secret".into()),
//!     ..MessengerOptions::new("page-token")
//! };
//! let messenger = Messenger::new(Arc::new(MyProcessor), options);
//!
//! // webhook handler:
//! messenger.verify_request(&raw_body, &headers)?;
//! let unprocessed = messenger.process_event(&body, &context).await;
//! ```

pub mod api;
pub mod config;
pub mod handover;
pub mod profile;
pub mod router;
pub mod sender;
pub mod webhook;

pub use api::{BoxedGraphTransport, DEFAULT_API_URL, GraphTransport, HttpTransport};
pub use config::{HandoverPolicy, MessengerOptions, METADATA_KEYS, PROCESS_EVENTS};
pub use handover::{HandoverMetadata, Normalized, normalize};
pub use profile::{ProfileLoader, UserProfile};
pub use router::{Messenger, UnprocessedEvent};
pub use sender::{MessengerSender, RecipientBinding};
pub use webhook::{WebhookEntry, WebhookPayload, verify_request, verify_webhook};
