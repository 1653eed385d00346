//! The agent-facing tool gateway.
//!
//! One entry point (`invoke`) for API-key-authenticated operations:
//! capability scopes are enforced before dispatch, omitted parameters
//! resolve through progressive disclosure instead of failing, template
//! sends are validated against the live provider catalog, and every
//! failure comes back as a structured value; the gateway never raises.

pub mod api_keys;
pub mod disclosure;
pub mod dispatch;
pub mod rate_limit;
pub mod routes;
pub mod templates;
pub mod tools;

pub use {
    api_keys::{ApiKey, ApiKeyStore, Scope},
    disclosure::{Disclosure, DisclosureOption},
    dispatch::Gateway,
    rate_limit::{RateLimitConfig, RateLimiter},
    routes::{AppState, build_app},
    tools::ToolCall,
};
