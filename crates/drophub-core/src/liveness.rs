//! # Liveness Classification
//!
//! Whether a device is "alive" is an inference, not a fact: the hub never
//! opens a connection to a device, so all it has is the timestamp of the
//! last authenticated contact. This module turns that timestamp into a
//! classification with a pure function.
//!
//! ## Why No Stored Flag
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Stored "is_online" boolean          Derived classification (this)     │
//! │  ──────────────────────────          ─────────────────────────────     │
//! │  • Needs a background updater        • Recomputed at read time         │
//! │  • Goes stale on updater crash       • Cannot go stale                 │
//! │  • Races with live requests          • No writes, no races             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `last_seen` is updated by **any** successfully authenticated
//! device-originated call - poll, completion report, message, heartbeat,
//! package listing - so a chatty device never needs a dedicated heartbeat
//! to stay classified online.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Liveness
// =============================================================================

/// Derived device liveness. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    /// Contacted within the online window.
    Online,
    /// Past the online window but not yet written off.
    Degraded,
    /// Past the offline threshold, or never seen at all.
    Offline,
}

impl std::fmt::Display for Liveness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Liveness::Online => write!(f, "online"),
            Liveness::Degraded => write!(f, "degraded"),
            Liveness::Offline => write!(f, "offline"),
        }
    }
}

// =============================================================================
// Thresholds
// =============================================================================

/// Classification thresholds. Invariant: `online_within < offline_after`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessThresholds {
    /// Contact within this many seconds classifies as online.
    pub online_within_secs: i64,

    /// Contact older than this many seconds classifies as offline.
    pub offline_after_secs: i64,
}

impl LivenessThresholds {
    /// Creates thresholds, enforcing `online_within < offline_after`.
    pub fn new(online_within_secs: i64, offline_after_secs: i64) -> Option<Self> {
        if online_within_secs <= 0 || offline_after_secs <= online_within_secs {
            return None;
        }
        Some(LivenessThresholds {
            online_within_secs,
            offline_after_secs,
        })
    }
}

impl Default for LivenessThresholds {
    /// 5 minutes online, 30 minutes to offline - tuned for devices that
    /// poll every 10-60 seconds but sleep between bursts.
    fn default() -> Self {
        LivenessThresholds {
            online_within_secs: 300,
            offline_after_secs: 1800,
        }
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Classifies a device from its last authenticated contact.
///
/// Pure: same inputs, same answer. A device that has never contacted the
/// hub is `Offline` regardless of thresholds.
pub fn classify(
    last_seen: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    thresholds: &LivenessThresholds,
) -> Liveness {
    let Some(seen) = last_seen else {
        return Liveness::Offline;
    };

    // A last_seen in the future (clock skew between writers) counts as
    // "just now" rather than producing a negative age.
    let age = (now - seen).max(Duration::zero());

    if age <= Duration::seconds(thresholds.online_within_secs) {
        Liveness::Online
    } else if age <= Duration::seconds(thresholds.offline_after_secs) {
        Liveness::Degraded
    } else {
        Liveness::Offline
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn test_never_seen_is_offline() {
        let th = LivenessThresholds::default();
        assert_eq!(classify(None, t(0), &th), Liveness::Offline);
    }

    #[test]
    fn test_classification_bands() {
        let th = LivenessThresholds::new(300, 1800).unwrap();

        assert_eq!(classify(Some(t(0)), t(0), &th), Liveness::Online);
        assert_eq!(classify(Some(t(0)), t(300), &th), Liveness::Online);
        assert_eq!(classify(Some(t(0)), t(301), &th), Liveness::Degraded);
        assert_eq!(classify(Some(t(0)), t(1800), &th), Liveness::Degraded);
        assert_eq!(classify(Some(t(0)), t(1801), &th), Liveness::Offline);
    }

    #[test]
    fn test_future_last_seen_counts_as_now() {
        let th = LivenessThresholds::default();
        assert_eq!(classify(Some(t(60)), t(0), &th), Liveness::Online);
    }

    #[test]
    fn test_threshold_ordering_enforced() {
        assert!(LivenessThresholds::new(300, 300).is_none());
        assert!(LivenessThresholds::new(300, 200).is_none());
        assert!(LivenessThresholds::new(0, 100).is_none());
        assert!(LivenessThresholds::new(1, 2).is_some());
    }
}
