//! Webhook delivery for rule actions.
//!
//! A `webhook` rule action POSTs the change event to the rule's target URL.
//!
//! - **Config** (`config.rs`): retry policy and signing secret
//! - **Payload** (`payload.rs`): JSON payload building and HMAC signing
//! - **Delivery** (`delivery.rs`): [`HttpWebhookSink`] with backoff
//!
//! # Headers
//!
//! | Header | Value |
//! |--------|-------|
//! | `X-Docwatch-Event` | `document.<change_type>` |
//! | `X-Docwatch-Delivery-Id` | change event ID |
//! | `X-Docwatch-Signature` | `sha256=<hex>` when a signing secret is set |

mod config;
mod delivery;
mod payload;

pub use config::{RetryConfig, WebhookConfig};
pub(crate) use config::optional_secret;
pub use delivery::{DeliveryResult, HttpWebhookSink};
pub use payload::{WebhookPayload, compute_hmac_signature, verify_hmac_signature};
