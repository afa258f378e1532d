pub mod distributor;

use serde::Serialize;

use crate::session::SessionStatus;
use crate::transcript::Message;

pub use distributor::{Distributor, Subscription};

/// An update pushed to the live viewers of one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherEvent {
    pub session_id: String,
    #[serde(flatten)]
    pub kind: WatcherEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum WatcherEventKind {
    /// A message appended since the last dispatch.
    Message(Message),
    Status(SessionStatus),
    Error(String),
}

impl WatcherEventKind {
    /// Event name used on the wire.
    pub fn label(&self) -> &'static str {
        match self {
            WatcherEventKind::Message(_) => "message",
            WatcherEventKind::Status(_) => "status",
            WatcherEventKind::Error(_) => "error",
        }
    }
}

impl WatcherEvent {
    pub fn new(session_id: impl Into<String>, kind: WatcherEventKind) -> Self {
        Self {
            session_id: session_id.into(),
            kind,
        }
    }
}
