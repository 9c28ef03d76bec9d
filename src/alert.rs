//! Alert policy
//!
//! An alert fires when a subject drops into Low attention from any other level,
//! and only while alerts are enabled. Repeated Low readings do not re-fire.

use crate::types::{AttentionLevel, SubjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Level assumed before a subject's first reading
pub const INITIAL_PREVIOUS_LEVEL: AttentionLevel = AttentionLevel::Mid;

/// Decide whether a transition from `previous` to `current` raises an alert
pub fn evaluate(previous: AttentionLevel, current: AttentionLevel, enabled: bool) -> bool {
    enabled && current == AttentionLevel::Low && previous != AttentionLevel::Low
}

/// [`evaluate`] for a reading that may be the subject's first
pub fn evaluate_first(
    previous: Option<AttentionLevel>,
    current: AttentionLevel,
    enabled: bool,
) -> bool {
    evaluate(previous.unwrap_or(INITIAL_PREVIOUS_LEVEL), current, enabled)
}

/// Emitted when the host should play an alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub subject_id: SubjectId,
    pub previous: AttentionLevel,
    pub level: AttentionLevel,
    /// Window of the triggering profile sample, if it came from a stream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<u32>,
    pub fired_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEVELS: [AttentionLevel; 3] = [AttentionLevel::Low, AttentionLevel::Mid, AttentionLevel::High];

    #[test]
    fn test_evaluate_exhaustive() {
        for previous in LEVELS {
            for current in LEVELS {
                for enabled in [false, true] {
                    let expected = enabled
                        && current == AttentionLevel::Low
                        && previous != AttentionLevel::Low;
                    assert_eq!(
                        evaluate(previous, current, enabled),
                        expected,
                        "previous={:?} current={:?} enabled={}",
                        previous,
                        current,
                        enabled
                    );
                }
            }
        }
    }

    #[test]
    fn test_only_entering_low_fires() {
        assert!(evaluate(AttentionLevel::Mid, AttentionLevel::Low, true));
        assert!(evaluate(AttentionLevel::High, AttentionLevel::Low, true));
        assert!(!evaluate(AttentionLevel::Low, AttentionLevel::Low, true));
        assert!(!evaluate(AttentionLevel::High, AttentionLevel::Low, false));
    }

    #[test]
    fn test_first_reading_compares_against_mid() {
        assert!(evaluate_first(None, AttentionLevel::Low, true));
        assert!(!evaluate_first(None, AttentionLevel::Mid, true));
        assert!(!evaluate_first(Some(AttentionLevel::Low), AttentionLevel::Low, true));
    }
}
