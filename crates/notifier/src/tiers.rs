//! The urgency ladder.
//!
//! Tiers are ordered least urgent first, so a tier's index IS its urgency:
//! advancement compares indexes and may only increase. Matching iterates
//! most-urgent-first and takes the first tier wide enough to cover the time
//! remaining: a credential with 2h left matches `4h`, not `14d`.

use courant_common::DAY_MS;

const HOUR_MS: i64 = 3_600_000;
const MINUTE_MS: i64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tier {
    pub name: &'static str,
    /// Maximum time remaining this tier covers.
    pub threshold_ms: i64,
}

/// Least urgent first; index = urgency.
pub const TIERS: &[Tier] = &[
    Tier { name: "14d", threshold_ms: 14 * DAY_MS },
    Tier { name: "7d", threshold_ms: 7 * DAY_MS },
    Tier { name: "3d", threshold_ms: 3 * DAY_MS },
    Tier { name: "1d", threshold_ms: DAY_MS },
    Tier { name: "4h", threshold_ms: 4 * HOUR_MS },
    Tier { name: "1h", threshold_ms: HOUR_MS },
    Tier { name: "5m", threshold_ms: 5 * MINUTE_MS },
];

/// The most urgent tier whose threshold covers `remaining_ms`, as an index
/// into [`TIERS`]. `None` when the expiry is further out than the widest
/// tier (or already past).
pub fn match_tier(remaining_ms: i64) -> Option<usize> {
    if remaining_ms <= 0 {
        return None;
    }
    TIERS
        .iter()
        .enumerate()
        .rev()
        .find(|(_, tier)| tier.threshold_ms >= remaining_ms)
        .map(|(index, _)| index)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_hours_matches_4h_not_14d() {
        let index = match_tier(2 * HOUR_MS).unwrap();
        assert_eq!(TIERS[index].name, "4h");
    }

    #[test]
    fn beyond_widest_tier_matches_nothing() {
        assert_eq!(match_tier(15 * DAY_MS), None);
    }

    #[test]
    fn already_expired_matches_nothing() {
        assert_eq!(match_tier(0), None);
        assert_eq!(match_tier(-1), None);
    }

    #[test]
    fn boundaries_land_on_the_tighter_tier() {
        // Exactly 1h remaining is covered by the 1h tier itself.
        let index = match_tier(HOUR_MS).unwrap();
        assert_eq!(TIERS[index].name, "1h");
        // One millisecond over falls through to 4h.
        let index = match_tier(HOUR_MS + 1).unwrap();
        assert_eq!(TIERS[index].name, "4h");
    }

    #[test]
    fn tiers_are_strictly_widening() {
        for pair in TIERS.windows(2) {
            assert!(pair[0].threshold_ms > pair[1].threshold_ms);
        }
    }
}
