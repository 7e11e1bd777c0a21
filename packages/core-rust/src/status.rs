//! Operator-facing status snapshot types.
//!
//! The engine publishes immutable snapshots of this struct; the UI renders
//! them however it likes. States are plain tagged values; colouring and
//! formatting are presentation concerns that never reach this crate.

use serde::Serialize;

/// Overall service state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServerStatus {
    Stopped,
    Running,
    Error,
}

impl ServerStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Running => "Running",
            Self::Error => "Error",
        }
    }
}

/// Reachability of one endpoint (relational source or document store).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EndpointStatus {
    NotInitialized,
    Disconnected,
    Connected,
    Error,
}

impl EndpointStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotInitialized => "NotInitialized",
            Self::Disconnected => "Disconnected",
            Self::Connected => "Connected",
            Self::Error => "Error",
        }
    }
}

/// Point-in-time view of the service, published after every state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub server_status: ServerStatus,
    /// Relational source reachability.
    pub connection_status: EndpointStatus,
    /// Document store reachability.
    pub target_status: EndpointStatus,
    pub is_syncing: bool,
    pub is_bulk_syncing: bool,
    pub auto_sync_enabled: bool,
    /// Free-form progress line maintained by the bulk backfill.
    pub bulk_sync_progress: String,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            server_status: ServerStatus::Stopped,
            connection_status: EndpointStatus::NotInitialized,
            target_status: EndpointStatus::NotInitialized,
            is_syncing: false,
            is_bulk_syncing: false,
            auto_sync_enabled: false,
            bulk_sync_progress: String::new(),
        }
    }
}
