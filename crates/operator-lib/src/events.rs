//! Kubernetes events recorded against the VerticaDB

use crate::vdb::VerticaDB;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventReason {
    NodeRestartStarted,
    NodeRestartSucceeded,
    ClusterRestartStarted,
    ClusterRestartSucceeded,
    ReviveDBStart,
    ReviveDBSucceeded,
    ReviveDBFailed,
    ReviveOrderBad,
    HTTPServerNotSetup,
}

impl EventReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventReason::NodeRestartStarted => "NodeRestartStarted",
            EventReason::NodeRestartSucceeded => "NodeRestartSucceeded",
            EventReason::ClusterRestartStarted => "ClusterRestartStarted",
            EventReason::ClusterRestartSucceeded => "ClusterRestartSucceeded",
            EventReason::ReviveDBStart => "ReviveDBStart",
            EventReason::ReviveDBSucceeded => "ReviveDBSucceeded",
            EventReason::ReviveDBFailed => "ReviveDBFailed",
            EventReason::ReviveOrderBad => "ReviveOrderBad",
            EventReason::HTTPServerNotSetup => "HTTPServerNotSetup",
        }
    }
}

impl fmt::Display for EventReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fire-and-forget event emission. Implementations must not block the pass.
pub trait EventRecorder: Send + Sync {
    fn event(&self, vdb: &VerticaDB, event_type: EventType, reason: EventReason, message: &str);
}
