//! Node health classification.
//!
//! A node's liveness is never stored. It is a pure function of the last
//! heartbeat timestamp and the current clock, so a node that stops phoning
//! home ages into `Stale` and then `Offline` without any write.

use serde::{Deserialize, Serialize};

/// Derived liveness of an onsite node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeHealth {
    /// Heartbeat seen within the online window.
    Online,
    /// Heartbeat seen, but not recently. The node is probably still
    /// running behind a degraded network.
    Stale,
    /// No heartbeat within the stale window, or none ever recorded.
    Offline,
}

impl NodeHealth {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "ONLINE",
            Self::Stale => "STALE",
            Self::Offline => "OFFLINE",
        }
    }
}

/// Heartbeat-gap thresholds, in seconds. Operational tuning parameters,
/// supplied by configuration rather than hard-coded at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthThresholds {
    /// Gap at or below which a node is `Online`. Roughly twice the
    /// agent's configured heartbeat period.
    pub online_within_secs: i64,
    /// Gap at or below which a node is `Stale` rather than `Offline`.
    pub stale_within_secs: i64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            online_within_secs: 120,
            stale_within_secs: 1800,
        }
    }
}

/// Classify a node from its last heartbeat timestamp.
///
/// `last_heartbeat_at` of `None` means the node has never reported.
pub fn classify(
    last_heartbeat_at: Option<i64>,
    now: i64,
    thresholds: &HealthThresholds,
) -> NodeHealth {
    let Some(last) = last_heartbeat_at else {
        return NodeHealth::Offline;
    };

    let gap = now.saturating_sub(last);
    if gap <= thresholds.online_within_secs {
        NodeHealth::Online
    } else if gap <= thresholds.stale_within_secs {
        NodeHealth::Stale
    } else {
        NodeHealth::Offline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: HealthThresholds = HealthThresholds {
        online_within_secs: 120,
        stale_within_secs: 1800,
    };

    #[test]
    fn heartbeat_now_is_online() {
        assert_eq!(classify(Some(10_000), 10_000, &T), NodeHealth::Online);
    }

    #[test]
    fn heartbeat_an_hour_ago_is_offline() {
        assert_eq!(classify(Some(10_000), 10_000 + 3600, &T), NodeHealth::Offline);
    }

    #[test]
    fn no_heartbeat_ever_is_offline() {
        assert_eq!(classify(None, 10_000, &T), NodeHealth::Offline);
    }

    #[test]
    fn gap_between_thresholds_is_stale() {
        assert_eq!(classify(Some(10_000), 10_000 + 600, &T), NodeHealth::Stale);
    }

    #[test]
    fn boundary_gaps_round_toward_healthier() {
        assert_eq!(classify(Some(0), 120, &T), NodeHealth::Online);
        assert_eq!(classify(Some(0), 121, &T), NodeHealth::Stale);
        assert_eq!(classify(Some(0), 1800, &T), NodeHealth::Stale);
        assert_eq!(classify(Some(0), 1801, &T), NodeHealth::Offline);
    }

    #[test]
    fn clock_skew_in_the_past_is_online() {
        // Heartbeat recorded "in the future" relative to now.
        assert_eq!(classify(Some(10_100), 10_000, &T), NodeHealth::Online);
    }
}
