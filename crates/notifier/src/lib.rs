//! Escalating-tier expiry notifier.
//!
//! A fixed ladder of urgency tiers (14d down to 5m); each credential walks
//! the ladder monotonically as its expiry approaches, and every tier fires
//! at most one alert. Advancement is a conditional write, so overlapping
//! scans cannot double-fire or move a credential backward.

pub mod service;
pub mod tiers;

pub use {
    service::{AlertSink, LogAlertSink, Notifier},
    tiers::{TIERS, Tier, match_tier},
};
