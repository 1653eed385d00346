//! Shared helpers used across all courant crates: the epoch-millis clock,
//! phone-number normalization, and preview truncation.

pub mod phone;
pub mod time;

pub use {
    phone::{display_phone, normalize_external_id},
    time::{DAY_MS, now_ms},
};

/// Truncate `text` to at most `max` characters for a conversation preview,
/// respecting char boundaries and collapsing newlines to spaces.
pub fn truncate_preview(text: &str, max: usize) -> String {
    let flat = text.replace(['\n', '\r'], " ");
    let trimmed = flat.trim();
    if trimmed.chars().count() <= max {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
