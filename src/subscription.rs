//! Stream subscription controller
//!
//! Tracks which subject, if any, is streaming per-window samples. Each
//! transition returns the control messages the caller must send, in order.
//! Switching subjects always stops the previous stream before starting the
//! next one; the backend is never trusted to replace a stream implicitly.

use crate::protocol::ClientMessage;
use crate::types::SubjectId;
use serde::{Deserialize, Serialize};

/// Stream state of the profile view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "subject_id", rename_all = "snake_case")]
pub enum SubscriptionState {
    /// Dashboard only; no per-subject stream
    #[default]
    Idle,
    /// One subject is streaming
    Active(SubjectId),
}

impl SubscriptionState {
    pub fn active_subject(&self) -> Option<SubjectId> {
        match self {
            SubscriptionState::Idle => None,
            SubscriptionState::Active(id) => Some(*id),
        }
    }
}

/// State machine for `start_stream` / `stop_stream` control messages
#[derive(Debug, Default)]
pub struct SubscriptionController {
    state: SubscriptionState,
    starts_sent: u64,
    stops_sent: u64,
}

impl SubscriptionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn active_subject(&self) -> Option<SubjectId> {
        self.state.active_subject()
    }

    /// Enter the profile of `subject_id`
    pub fn open_profile(&mut self, subject_id: SubjectId) -> Vec<ClientMessage> {
        match self.state {
            SubscriptionState::Active(current) if current == subject_id => Vec::new(),
            SubscriptionState::Active(_) => {
                let mut messages = self.stop();
                messages.extend(self.start(subject_id));
                messages
            }
            SubscriptionState::Idle => self.start(subject_id),
        }
    }

    /// Leave the profile view and return to the dashboard
    pub fn close_profile(&mut self) -> Vec<ClientMessage> {
        match self.state {
            SubscriptionState::Active(_) => self.stop(),
            SubscriptionState::Idle => Vec::new(),
        }
    }

    /// Messages to send before the connection is torn down
    pub fn shutdown(&mut self) -> Vec<ClientMessage> {
        self.close_profile()
    }

    /// Streams started without a matching stop (0 or 1)
    pub fn outstanding_starts(&self) -> u64 {
        self.starts_sent - self.stops_sent
    }

    fn start(&mut self, subject_id: SubjectId) -> Vec<ClientMessage> {
        self.state = SubscriptionState::Active(subject_id);
        self.starts_sent += 1;
        vec![ClientMessage::StartStream {
            child_id: subject_id,
        }]
    }

    fn stop(&mut self) -> Vec<ClientMessage> {
        self.state = SubscriptionState::Idle;
        self.stops_sent += 1;
        vec![ClientMessage::StopStream]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_open_from_idle_starts_stream() {
        let mut controller = SubscriptionController::new();
        assert_eq!(
            controller.open_profile(5),
            vec![ClientMessage::StartStream { child_id: 5 }]
        );
        assert_eq!(controller.state(), SubscriptionState::Active(5));
        assert_eq!(controller.outstanding_starts(), 1);
    }

    #[test]
    fn test_reopening_same_profile_is_idempotent() {
        let mut controller = SubscriptionController::new();
        controller.open_profile(5);
        assert!(controller.open_profile(5).is_empty());
        assert_eq!(controller.outstanding_starts(), 1);
    }

    #[test]
    fn test_switching_subjects_stops_then_starts() {
        let mut controller = SubscriptionController::new();
        controller.open_profile(5);

        assert_eq!(
            controller.open_profile(7),
            vec![
                ClientMessage::StopStream,
                ClientMessage::StartStream { child_id: 7 },
            ]
        );
        assert_eq!(controller.active_subject(), Some(7));
        assert_eq!(controller.outstanding_starts(), 1);
    }

    #[test]
    fn test_close_profile() {
        let mut controller = SubscriptionController::new();
        assert!(controller.close_profile().is_empty());

        controller.open_profile(2);
        assert_eq!(controller.close_profile(), vec![ClientMessage::StopStream]);
        assert_eq!(controller.state(), SubscriptionState::Idle);
        assert!(controller.close_profile().is_empty());
        assert_eq!(controller.outstanding_starts(), 0);
    }

    #[test]
    fn test_never_two_outstanding_starts() {
        let mut controller = SubscriptionController::new();
        let mut outstanding: i64 = 0;
        let intents: [Option<SubjectId>; 9] = [
            Some(1),
            Some(1),
            Some(2),
            None,
            None,
            Some(3),
            Some(4),
            Some(4),
            None,
        ];

        for intent in intents {
            let messages = match intent {
                Some(id) => controller.open_profile(id),
                None => controller.close_profile(),
            };
            for message in messages {
                match message {
                    ClientMessage::StartStream { .. } => outstanding += 1,
                    ClientMessage::StopStream => outstanding -= 1,
                    ClientMessage::Dashboard => {}
                }
                assert!((0..=1).contains(&outstanding));
            }
        }
        assert_eq!(outstanding, 0);
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&SubscriptionState::Active(3)).unwrap();
        assert_eq!(json, r#"{"state":"active","subject_id":3}"#);
        let json = serde_json::to_string(&SubscriptionState::Idle).unwrap();
        assert_eq!(json, r#"{"state":"idle"}"#);
    }
}
