//! Attention state reducer
//!
//! Folds inbound server messages into per-subject state:
//! - `dashboard_update` sets the subject's current level only
//! - `profile_data` appends a sample to the streaming subject's timeline and
//!   sets its current level
//!
//! Timelines are bounded; once a timeline holds `capacity` samples, each new
//! sample evicts the oldest one.

use crate::config::DEFAULT_TIMELINE_CAPACITY;
use crate::protocol::ServerMessage;
use crate::types::{AttentionLevel, AttentionSample, SubjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

/// Result of folding one message that carried a level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelChange {
    pub subject_id: SubjectId,
    /// Level before this message; `None` for the first reading of a subject
    pub previous: Option<AttentionLevel>,
    pub current: AttentionLevel,
    /// Sample appended to the timeline, for profile frames
    pub sample: Option<AttentionSample>,
}

impl LevelChange {
    pub fn level_changed(&self) -> bool {
        self.previous != Some(self.current)
    }
}

/// One chart point: x-axis label and y value (Low=0, Mid=1, High=2)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub label: String,
    pub value: u8,
    pub window: u32,
}

/// Owner of every subject's timeline and current level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionReducer {
    capacity: usize,
    timelines: BTreeMap<SubjectId, VecDeque<AttentionSample>>,
    current_levels: BTreeMap<SubjectId, AttentionLevel>,
}

impl Default for AttentionReducer {
    fn default() -> Self {
        Self::new(DEFAULT_TIMELINE_CAPACITY)
    }
}

impl AttentionReducer {
    /// Create a reducer keeping at most `capacity` samples per subject
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            timelines: BTreeMap::new(),
            current_levels: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fold one message, stamping samples with the current time.
    ///
    /// `active` is the subject whose stream is open, if any.
    pub fn apply(
        &mut self,
        message: &ServerMessage,
        active: Option<SubjectId>,
    ) -> Option<LevelChange> {
        self.apply_at(message, active, Utc::now())
    }

    /// Fold one message with an explicit receive time
    pub fn apply_at(
        &mut self,
        message: &ServerMessage,
        active: Option<SubjectId>,
        received_at: DateTime<Utc>,
    ) -> Option<LevelChange> {
        match message {
            ServerMessage::DashboardUpdate {
                child_id,
                attention_level,
            } => {
                let previous = self.current_levels.insert(*child_id, *attention_level);
                Some(LevelChange {
                    subject_id: *child_id,
                    previous,
                    current: *attention_level,
                    sample: None,
                })
            }
            ServerMessage::ProfileData {
                child_id,
                window,
                attention_level,
                time,
            } => {
                let subject_id = match (active, *child_id) {
                    (Some(active), Some(tagged)) if active != tagged => {
                        debug!(active, tagged, window, "dropping profile frame for inactive stream");
                        return None;
                    }
                    (Some(active), _) => active,
                    (None, _) => {
                        debug!(window, "dropping profile frame with no active stream");
                        return None;
                    }
                };

                let sample = AttentionSample::new(
                    subject_id,
                    *window,
                    *attention_level,
                    time.clone(),
                    received_at,
                );
                self.push_sample(sample.clone());

                let previous = self.current_levels.insert(subject_id, *attention_level);
                Some(LevelChange {
                    subject_id,
                    previous,
                    current: *attention_level,
                    sample: Some(sample),
                })
            }
            ServerMessage::Unknown => None,
        }
    }

    fn push_sample(&mut self, sample: AttentionSample) {
        let capacity = self.capacity;
        let timeline = self
            .timelines
            .entry(sample.subject_id)
            .or_insert_with(|| VecDeque::with_capacity(capacity));
        timeline.push_back(sample);
        while timeline.len() > capacity {
            timeline.pop_front();
        }
    }

    /// Samples for `subject_id`, oldest first
    pub fn timeline(&self, subject_id: SubjectId) -> Vec<AttentionSample> {
        self.timelines
            .get(&subject_id)
            .map(|timeline| timeline.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn timeline_len(&self, subject_id: SubjectId) -> usize {
        self.timelines.get(&subject_id).map_or(0, VecDeque::len)
    }

    /// Most recent level for `subject_id`, if any reading has arrived
    pub fn current_level(&self, subject_id: SubjectId) -> Option<AttentionLevel> {
        self.current_levels.get(&subject_id).copied()
    }

    /// Subjects whose most recent level is Low
    pub fn aggregate_low_set(&self) -> BTreeSet<SubjectId> {
        self.current_levels
            .iter()
            .filter(|(_, level)| **level == AttentionLevel::Low)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Current level of every subject heard from so far
    pub fn current_levels(&self) -> &BTreeMap<SubjectId, AttentionLevel> {
        &self.current_levels
    }

    /// Timeline encoded for charting
    pub fn chart_points(&self, subject_id: SubjectId) -> Vec<ChartPoint> {
        self.timelines
            .get(&subject_id)
            .map(|timeline| {
                timeline
                    .iter()
                    .map(|sample| ChartPoint {
                        label: sample.axis_label(),
                        value: sample.level.chart_value(),
                        window: sample.window,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop the timeline of one subject, keeping its current level
    pub fn clear_timeline(&mut self, subject_id: SubjectId) {
        self.timelines.remove(&subject_id);
    }

    /// Load reducer state from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut reducer: Self = serde_json::from_str(json)?;
        reducer.capacity = reducer.capacity.max(1);
        let capacity = reducer.capacity;
        for timeline in reducer.timelines.values_mut() {
            while timeline.len() > capacity {
                timeline.pop_front();
            }
        }
        Ok(reducer)
    }

    /// Serialize reducer state to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dashboard(child_id: SubjectId, level: AttentionLevel) -> ServerMessage {
        ServerMessage::DashboardUpdate {
            child_id,
            attention_level: level,
        }
    }

    fn profile(window: u32, level: AttentionLevel) -> ServerMessage {
        ServerMessage::ProfileData {
            child_id: None,
            window,
            attention_level: level,
            time: None,
        }
    }

    #[test]
    fn test_dashboard_update_sets_level_only() {
        let mut reducer = AttentionReducer::default();
        let change = reducer
            .apply(&dashboard(3, AttentionLevel::Low), None)
            .unwrap();

        assert_eq!(change.previous, None);
        assert_eq!(change.current, AttentionLevel::Low);
        assert!(change.sample.is_none());
        assert_eq!(reducer.current_level(3), Some(AttentionLevel::Low));
        assert!(reducer.timeline(3).is_empty());
    }

    #[test]
    fn test_repeated_low_keeps_subject_in_low_set() {
        let mut reducer = AttentionReducer::default();
        reducer.apply(&dashboard(3, AttentionLevel::Low), None);
        let second = reducer
            .apply(&dashboard(3, AttentionLevel::Low), None)
            .unwrap();

        assert_eq!(second.previous, Some(AttentionLevel::Low));
        assert!(!second.level_changed());
        assert_eq!(reducer.aggregate_low_set(), BTreeSet::from([3]));
    }

    #[test]
    fn test_low_set_tracks_latest_level() {
        let mut reducer = AttentionReducer::default();
        reducer.apply(&dashboard(1, AttentionLevel::Low), None);
        reducer.apply(&dashboard(2, AttentionLevel::Low), None);
        reducer.apply(&dashboard(3, AttentionLevel::High), None);
        reducer.apply(&dashboard(1, AttentionLevel::Mid), None);

        assert_eq!(reducer.aggregate_low_set(), BTreeSet::from([2]));
    }

    #[test]
    fn test_profile_data_appends_to_active_timeline() {
        let mut reducer = AttentionReducer::default();
        let change = reducer
            .apply(&profile(1, AttentionLevel::High), Some(5))
            .unwrap();

        assert_eq!(change.subject_id, 5);
        let sample = change.sample.unwrap();
        assert_eq!(sample.time, "0-5s");
        assert_eq!(reducer.timeline_len(5), 1);
        assert_eq!(reducer.current_level(5), Some(AttentionLevel::High));
    }

    #[test]
    fn test_profile_data_without_stream_is_dropped() {
        let mut reducer = AttentionReducer::default();
        assert!(reducer.apply(&profile(1, AttentionLevel::Low), None).is_none());
        assert_eq!(reducer.current_level(5), None);
    }

    #[test]
    fn test_profile_data_from_previous_stream_is_dropped() {
        let mut reducer = AttentionReducer::default();
        let stale = ServerMessage::ProfileData {
            child_id: Some(5),
            window: 9,
            attention_level: AttentionLevel::Low,
            time: Some("40-45s".to_string()),
        };
        assert!(reducer.apply(&stale, Some(7)).is_none());
        assert_eq!(reducer.timeline_len(5), 0);
        assert_eq!(reducer.timeline_len(7), 0);
    }

    #[test]
    fn test_timeline_evicts_oldest_beyond_capacity() {
        let mut reducer = AttentionReducer::new(3);
        for window in 1..=5 {
            reducer.apply(&profile(window, AttentionLevel::Mid), Some(2));
            assert!(reducer.timeline_len(2) <= 3);
        }

        let windows: Vec<u32> = reducer.timeline(2).iter().map(|s| s.window).collect();
        assert_eq!(windows, vec![3, 4, 5]);
    }

    #[test]
    fn test_largest_window_is_labelled() {
        let mut reducer = AttentionReducer::default();
        let change = reducer
            .apply(&profile(u32::MAX, AttentionLevel::Low), Some(4))
            .unwrap();

        assert_eq!(change.sample.unwrap().time, "21474836470-21474836475s");
        assert_eq!(reducer.chart_points(4)[0].label, "21474836470s");
    }

    #[test]
    fn test_unknown_messages_are_ignored() {
        let mut reducer = AttentionReducer::default();
        assert!(reducer.apply(&ServerMessage::Unknown, Some(1)).is_none());
        assert!(reducer.current_levels().is_empty());
    }

    #[test]
    fn test_chart_points() {
        let mut reducer = AttentionReducer::default();
        reducer.apply(&profile(1, AttentionLevel::Low), Some(4));
        reducer.apply(&profile(2, AttentionLevel::High), Some(4));

        assert_eq!(
            reducer.chart_points(4),
            vec![
                ChartPoint {
                    label: "0s".to_string(),
                    value: 0,
                    window: 1,
                },
                ChartPoint {
                    label: "5s".to_string(),
                    value: 2,
                    window: 2,
                },
            ]
        );
    }

    #[test]
    fn test_clear_timeline_keeps_level() {
        let mut reducer = AttentionReducer::default();
        reducer.apply(&profile(1, AttentionLevel::Low), Some(4));
        reducer.clear_timeline(4);
        assert_eq!(reducer.timeline_len(4), 0);
        assert_eq!(reducer.current_level(4), Some(AttentionLevel::Low));
    }

    #[test]
    fn test_serialization() {
        let mut reducer = AttentionReducer::new(60);
        reducer.apply(&dashboard(1, AttentionLevel::Low), None);
        reducer.apply(&profile(1, AttentionLevel::Mid), Some(2));

        let json = reducer.to_json().unwrap();
        let loaded = AttentionReducer::from_json(&json).unwrap();

        assert_eq!(loaded.capacity(), 60);
        assert_eq!(loaded.timeline(2), reducer.timeline(2));
        assert_eq!(loaded.aggregate_low_set(), reducer.aggregate_low_set());
    }
}
