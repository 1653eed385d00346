//! SQLite-backed system of record: accounts, contacts, conversations,
//! messages, webhook staging logs, and expiring credentials.
//!
//! Mutation invariants live here, not in callers:
//! - message inserts are idempotent on the provider's external message id;
//! - the delivery-status lattice only moves forward (failed is absorbing);
//! - the 24h messaging window is advanced by inbound messages only;
//! - contact/conversation upserts converge under concurrent execution.

mod accounts;
mod contacts;
mod conversations;
mod credentials;
mod error;
mod messages;
mod store;
mod types;
mod webhook_logs;

pub use {
    accounts::NewAccount,
    error::{Result, StoreError},
    messages::{InsertOutcome, NewInboundMessage, NewOutboundMessage, StatusApplied},
    store::Store,
    types::*,
};
