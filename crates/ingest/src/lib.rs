//! Webhook ingestion: authenticity checks, durable staging, and
//! asynchronous normalization into the store.
//!
//! The staging gateway ([`Ingestor`]) must answer inside the provider's
//! response-time budget; everything slow (normalization, media downloads)
//! runs on the [`Normalizer`] worker or in detached tasks.

pub mod media;
pub mod payload;
pub mod pipeline;
pub mod signature;

mod error;

pub use {
    error::{IngestError, Result},
    media::{InMemoryMediaSink, MediaSink},
    payload::WebhookPayload,
    pipeline::{Ingestor, MAX_ATTEMPTS, Normalizer, download_media, queue},
    signature::{verify_signature, verify_subscription},
};
