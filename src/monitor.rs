//! Attention monitor
//!
//! The consumer-facing entry point. A monitor listens to one shared
//! [`ConnectionManager`], folds every inbound message through the reducer,
//! applies the alert policy and republishes the results as derived events.
//! Screens call [`AttentionMonitor::send_intent`] and subscribe to the
//! `on_*` events; they never touch the connection directly.
//!
//! Locks are released before any derived event is dispatched, so handlers may
//! call back into the monitor.

use crate::alert::{self, AlertEvent};
use crate::config::MonitorConfig;
use crate::connection::ConnectionManager;
use crate::dispatcher::{lock, Dispatcher, ListenerHandle};
use crate::error::MonitorError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::reducer::{AttentionReducer, ChartPoint};
use crate::subscription::{SubscriptionController, SubscriptionState};
use crate::types::{AttentionLevel, AttentionSample, ConnectionState, SubjectId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info};
use uuid::Uuid;

/// What the presentation layer asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", content = "value", rename_all = "snake_case")]
pub enum Intent {
    /// Ask the backend for everyone's current level
    EnterDashboard,
    /// Show one subject's profile and stream its samples
    OpenProfile(SubjectId),
    /// Leave the profile view
    CloseProfile,
    /// Enable or disable alerts
    ToggleAlerts(bool),
}

/// A sample was appended to a subject's timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineChanged {
    pub subject_id: SubjectId,
    pub sample: AttentionSample,
    /// Timeline length after the append
    pub len: usize,
}

/// A subject's current level differs from its previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChanged {
    pub subject_id: SubjectId,
    pub previous: Option<AttentionLevel>,
    pub current: AttentionLevel,
}

/// Point-in-time view of the monitor, for status output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub instance_id: String,
    pub connection: ConnectionState,
    pub subscription: SubscriptionState,
    pub alerts_enabled: bool,
    pub levels: BTreeMap<SubjectId, AttentionLevel>,
    pub low_set: BTreeSet<SubjectId>,
}

struct State {
    reducer: AttentionReducer,
    subscription: SubscriptionController,
    alerts_enabled: bool,
}

struct Inner {
    instance_id: String,
    connection: Arc<ConnectionManager>,
    state: Mutex<State>,
    timeline_events: Dispatcher<TimelineChanged>,
    level_events: Dispatcher<LevelChanged>,
    alert_events: Dispatcher<AlertEvent>,
}

impl Inner {
    fn handle_message(&self, message: &ServerMessage) {
        let (change, timeline, alert) = {
            let mut state = lock(&self.state);
            let active = state.subscription.active_subject();
            let change = match state.reducer.apply(message, active) {
                Some(change) => change,
                None => return,
            };

            let alert = alert::evaluate_first(change.previous, change.current, state.alerts_enabled)
                .then(|| AlertEvent {
                    subject_id: change.subject_id,
                    previous: change.previous.unwrap_or(alert::INITIAL_PREVIOUS_LEVEL),
                    level: change.current,
                    window: change.sample.as_ref().map(|s| s.window),
                    fired_at: Utc::now(),
                });

            let timeline = change.sample.clone().map(|sample| TimelineChanged {
                subject_id: change.subject_id,
                len: state.reducer.timeline_len(change.subject_id),
                sample,
            });

            (change, timeline, alert)
        };

        if let Some(event) = timeline {
            self.timeline_events.dispatch(&event);
        }

        if change.level_changed() {
            self.level_events.dispatch(&LevelChanged {
                subject_id: change.subject_id,
                previous: change.previous,
                current: change.current,
            });
        }

        if let Some(event) = alert {
            info!(
                subject_id = event.subject_id,
                previous = event.previous.as_str(),
                "attention dropped to Low, alert fired"
            );
            self.alert_events.dispatch(&event);
        }
    }

    fn handle_state(&self, state: ConnectionState) {
        if state != ConnectionState::Open {
            return;
        }

        // A fresh transport has no server-side stream yet
        let mut messages = vec![ClientMessage::Dashboard];
        let active = lock(&self.state).subscription.active_subject();
        if let Some(subject_id) = active {
            debug!(subject_id, "restoring profile stream on new connection");
            messages.push(ClientMessage::StartStream {
                child_id: subject_id,
            });
        }
        self.send_all(&messages);
    }

    /// Send control messages best-effort; failures are logged and absorbed
    fn send_all(&self, messages: &[ClientMessage]) {
        for message in messages {
            if let Err(e) = self.connection.send(message) {
                debug!(kind = message.kind(), error = %e, "control message not sent");
            }
        }
    }
}

/// Consumer-facing real-time attention state
pub struct AttentionMonitor {
    inner: Arc<Inner>,
    connection_listeners: Vec<ListenerHandle>,
}

impl AttentionMonitor {
    /// Attach a monitor to a shared connection
    pub fn new(connection: Arc<ConnectionManager>, config: &MonitorConfig) -> Self {
        let inner = Arc::new(Inner {
            instance_id: Uuid::new_v4().to_string(),
            connection: Arc::clone(&connection),
            state: Mutex::new(State {
                reducer: AttentionReducer::new(config.timeline_capacity),
                subscription: SubscriptionController::new(),
                alerts_enabled: config.alerts_enabled,
            }),
            timeline_events: Dispatcher::new(),
            level_events: Dispatcher::new(),
            alert_events: Dispatcher::new(),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let on_message = connection.on_message(move |message| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_message(message);
            }
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let on_state = connection.on_state_change(move |state| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_state(*state);
            }
        });

        info!(
            instance_id = %inner.instance_id,
            capacity = config.timeline_capacity,
            alerts_enabled = config.alerts_enabled,
            "monitor attached"
        );

        // An already-open link reported Open before the listener existed
        if connection.is_open() {
            inner.handle_state(ConnectionState::Open);
        }

        Self {
            inner,
            connection_listeners: vec![on_message, on_state],
        }
    }

    /// Apply one presentation-layer intent
    pub fn send_intent(&self, intent: Intent) {
        debug!(?intent, "intent");
        let messages = {
            let mut state = lock(&self.inner.state);
            match intent {
                Intent::EnterDashboard => vec![ClientMessage::Dashboard],
                Intent::OpenProfile(subject_id) => {
                    let messages = state.subscription.open_profile(subject_id);
                    if !messages.is_empty() {
                        // Each profile visit starts with an empty chart
                        state.reducer.clear_timeline(subject_id);
                    }
                    messages
                }
                Intent::CloseProfile => state.subscription.close_profile(),
                Intent::ToggleAlerts(enabled) => {
                    if state.alerts_enabled != enabled {
                        info!(enabled, "alerts toggled");
                    }
                    state.alerts_enabled = enabled;
                    Vec::new()
                }
            }
        };
        self.inner.send_all(&messages);
    }

    /// Stop any active stream (best-effort) and close the connection
    pub fn shutdown(&self) {
        let messages = lock(&self.inner.state).subscription.shutdown();
        self.inner.send_all(&messages);
        self.inner.connection.close();
    }

    pub fn on_timeline_changed<F>(&self, handler: F) -> ListenerHandle
    where
        F: Fn(&TimelineChanged) + Send + Sync + 'static,
    {
        self.inner.timeline_events.add_listener(handler)
    }

    pub fn on_current_level_changed<F>(&self, handler: F) -> ListenerHandle
    where
        F: Fn(&LevelChanged) + Send + Sync + 'static,
    {
        self.inner.level_events.add_listener(handler)
    }

    pub fn on_alert_fired<F>(&self, handler: F) -> ListenerHandle
    where
        F: Fn(&AlertEvent) + Send + Sync + 'static,
    {
        self.inner.alert_events.add_listener(handler)
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.inner.connection
    }

    pub fn timeline(&self, subject_id: SubjectId) -> Vec<AttentionSample> {
        lock(&self.inner.state).reducer.timeline(subject_id)
    }

    pub fn chart_points(&self, subject_id: SubjectId) -> Vec<ChartPoint> {
        lock(&self.inner.state).reducer.chart_points(subject_id)
    }

    pub fn current_level(&self, subject_id: SubjectId) -> Option<AttentionLevel> {
        lock(&self.inner.state).reducer.current_level(subject_id)
    }

    pub fn aggregate_low_set(&self) -> BTreeSet<SubjectId> {
        lock(&self.inner.state).reducer.aggregate_low_set()
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        lock(&self.inner.state).subscription.state()
    }

    pub fn alerts_enabled(&self) -> bool {
        lock(&self.inner.state).alerts_enabled
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let connection = self.inner.connection.state();
        let state = lock(&self.inner.state);
        MonitorSnapshot {
            instance_id: self.inner.instance_id.clone(),
            connection,
            subscription: state.subscription.state(),
            alerts_enabled: state.alerts_enabled,
            levels: state.reducer.current_levels().clone(),
            low_set: state.reducer.aggregate_low_set(),
        }
    }

    /// Save timelines and levels to JSON
    pub fn save_state(&self) -> Result<String, MonitorError> {
        Ok(lock(&self.inner.state).reducer.to_json()?)
    }

    /// Restore timelines and levels saved by [`AttentionMonitor::save_state`]
    pub fn load_state(&self, json: &str) -> Result<(), MonitorError> {
        let reducer = AttentionReducer::from_json(json)?;
        lock(&self.inner.state).reducer = reducer;
        Ok(())
    }
}

impl Drop for AttentionMonitor {
    fn drop(&mut self) {
        for handle in &self.connection_listeners {
            handle.unsubscribe();
        }
    }
}
