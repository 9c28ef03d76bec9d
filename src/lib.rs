//! attention-link - Real-time attention dashboard client core
//!
//! attention-link keeps one WebSocket connection to an attention-analysis
//! backend and turns its frames into dashboard state: connection manager →
//! message dispatcher → attention reducer → alert policy → monitor events.
//!
//! ## Modules
//!
//! - **Transport**: [`connection`] owns the socket, [`reconnect`] adds optional backoff
//! - **State**: [`subscription`] tracks the streamed subject, [`reducer`] keeps
//!   timelines and current levels, [`alert`] decides when to raise alerts
//! - **Facade**: [`monitor`] wires it all together for a presentation layer

pub mod alert;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod monitor;
pub mod protocol;
pub mod reconnect;
pub mod reducer;
pub mod roster;
pub mod subscription;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use alert::AlertEvent;
pub use config::{Endpoint, MonitorConfig};
pub use connection::ConnectionManager;
pub use dispatcher::{Dispatcher, ListenerGuard, ListenerHandle};
pub use error::{MonitorError, SendError};
pub use monitor::{AttentionMonitor, Intent, LevelChanged, MonitorSnapshot, TimelineChanged};
pub use protocol::{ClientMessage, ServerMessage};
pub use reconnect::{connect_with_backoff, ReconnectPolicy};
pub use reducer::AttentionReducer;
pub use roster::Roster;
pub use subscription::{SubscriptionController, SubscriptionState};
pub use types::{AttentionLevel, AttentionSample, ConnectionState, SubjectId};

/// Library version
pub const ATTN_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Client name reported by diagnostics
pub const CLIENT_NAME: &str = "attention-link";
