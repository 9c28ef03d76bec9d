//! Core types for attention-link
//!
//! This module defines the data that flows between the connection, the reducer
//! and the consumers: subjects, attention levels, samples and connection state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identifier of a monitored subject (`child_id` on the wire)
pub type SubjectId = u32;

/// Length of one analysis window in seconds
pub const WINDOW_SECONDS: u32 = 5;

/// A monitored subject. Identity only, no mutable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Identifier used on the wire
    #[serde(alias = "child_id")]
    pub subject_id: SubjectId,
    /// Display name
    pub name: String,
}

/// Attention level classification, ordered `Low < Mid < High`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttentionLevel {
    Low,
    Mid,
    High,
}

impl AttentionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttentionLevel::Low => "Low",
            AttentionLevel::Mid => "Mid",
            AttentionLevel::High => "High",
        }
    }

    /// Numeric encoding used by charts: Low=0, Mid=1, High=2
    pub fn chart_value(&self) -> u8 {
        match self {
            AttentionLevel::Low => 0,
            AttentionLevel::Mid => 1,
            AttentionLevel::High => 2,
        }
    }

    /// Inverse of [`AttentionLevel::chart_value`]
    pub fn from_chart_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(AttentionLevel::Low),
            1 => Some(AttentionLevel::Mid),
            2 => Some(AttentionLevel::High),
            _ => None,
        }
    }
}

impl fmt::Display for AttentionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttentionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Low" => Ok(AttentionLevel::Low),
            "Mid" => Ok(AttentionLevel::Mid),
            "High" => Ok(AttentionLevel::High),
            other => Err(format!("unknown attention level '{}'", other)),
        }
    }
}

/// Time label for a 1-based window index, e.g. window 4 -> "15-20s".
///
/// Window 0 is not a valid wire value; it is clamped to "0-0s".
pub fn window_label(window: u32) -> String {
    let window = u64::from(window);
    let seconds = u64::from(WINDOW_SECONDS);
    format!("{}-{}s", window.saturating_sub(1) * seconds, window * seconds)
}

/// One attention reading for a subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttentionSample {
    pub subject_id: SubjectId,
    /// 1-based window index reported by the backend
    pub window: u32,
    pub level: AttentionLevel,
    /// Server-provided time label, or the label derived from `window`
    pub time: String,
    /// When the client received the reading
    pub received_at: DateTime<Utc>,
}

impl AttentionSample {
    pub fn new(
        subject_id: SubjectId,
        window: u32,
        level: AttentionLevel,
        time: Option<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            subject_id,
            window,
            level,
            time: time.unwrap_or_else(|| window_label(window)),
            received_at,
        }
    }

    /// X-axis label used by the profile chart: the window start in seconds
    pub fn axis_label(&self) -> String {
        let start = u64::from(self.window.saturating_sub(1)) * u64::from(WINDOW_SECONDS);
        format!("{}s", start)
    }
}

/// Lifecycle state of the single connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        }
    }
}
