//! The Provider Client: a trait wrapping the remote messaging REST API
//! (sends, template catalog, media), with a reqwest implementation.
//!
//! Failures carry the provider's own error code so upstream can record it
//! on the affected message.

mod client;
mod error;
pub mod http;
mod types;

pub use {
    client::ProviderClient,
    error::{ProviderError, Result},
    http::HttpProviderClient,
    types::*,
};
