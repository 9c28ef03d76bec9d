//! Wire protocol between the dashboard client and the analysis backend
//!
//! Frames are JSON text messages tagged by a `type` field:
//! - client to server: `dashboard`, `start_stream`, `stop_stream`
//! - server to client: `dashboard_update`, `profile_data`
//!
//! Server frames with an unrecognized `type` decode to [`ServerMessage::Unknown`]
//! so newer backends can add message kinds without breaking older clients.

use crate::error::MonitorError;
use crate::types::{window_label, AttentionLevel, SubjectId};
use serde::{Deserialize, Serialize};

/// Control messages sent by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Identify as a dashboard client and request current levels for everyone
    Dashboard,
    /// Start the per-window stream for one subject
    StartStream { child_id: SubjectId },
    /// Stop the per-window stream and resume dashboard updates
    StopStream,
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Dashboard => "dashboard",
            ClientMessage::StartStream { .. } => "start_stream",
            ClientMessage::StopStream => "stop_stream",
        }
    }

    /// Serialize to a JSON text frame
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Messages pushed by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Level-only update broadcast for every subject
    DashboardUpdate {
        child_id: SubjectId,
        attention_level: AttentionLevel,
    },
    /// One window of the active subject's stream
    ProfileData {
        /// Sent by current backends; older ones rely on the active stream
        #[serde(default, skip_serializing_if = "Option::is_none")]
        child_id: Option<SubjectId>,
        window: u32,
        attention_level: AttentionLevel,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Decode one inbound text frame. Windows are 1-based; window 0 is rejected.
    pub fn decode(text: &str) -> Result<Self, MonitorError> {
        let message: Self =
            serde_json::from_str(text).map_err(|e| MonitorError::InvalidFrame(e.to_string()))?;
        if let ServerMessage::ProfileData { window: 0, .. } = message {
            return Err(MonitorError::InvalidFrame(
                "profile_data window must be at least 1".to_string(),
            ));
        }
        Ok(message)
    }

    /// Serialize to a JSON text frame (used by recorders and tests)
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::DashboardUpdate { .. } => "dashboard_update",
            ServerMessage::ProfileData { .. } => "profile_data",
            ServerMessage::Unknown => "unknown",
        }
    }

    pub fn attention_level(&self) -> Option<AttentionLevel> {
        match self {
            ServerMessage::DashboardUpdate {
                attention_level, ..
            }
            | ServerMessage::ProfileData {
                attention_level, ..
            } => Some(*attention_level),
            ServerMessage::Unknown => None,
        }
    }

    /// Time label of a profile frame, derived from the window when absent
    pub fn time_label(&self) -> Option<String> {
        match self {
            ServerMessage::ProfileData { window, time, .. } => {
                Some(time.clone().unwrap_or_else(|| window_label(*window)))
            }
            _ => None,
        }
    }
}
