//! Typed events the worker emits to whoever is listening.
//!
//! The engine never calls into consumer code: every log line, status
//! transition and notification request goes out over an `mpsc` channel as one
//! of these variants, and any consumer (CLI, GUI, test harness) drains it.

use serde::{Deserialize, Serialize};

use crate::history::Severity;

/// Worker lifecycle state, as reported over the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerStatus {
    Running,
    Stopped,
}

/// What kind of notification a `Notification` event carries.
/// Gating against the configured [`NotificationLevel`] happens in the worker,
/// before the event is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationCategory {
    Error,
    Summary,
    Info,
}

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// Plain log line for display.
    Log { severity: Severity, message: String },
    /// Worker entered a new lifecycle state.
    Status(WorkerStatus),
    /// Request to show a desktop notification.
    Notification {
        title: String,
        message: String,
        category: NotificationCategory,
    },
}

/// How much the user wants to hear about. Ordered: each level includes
/// everything the previous one shows.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    None,
    Error,
    Summary,
    #[default]
    All,
}

impl NotificationLevel {
    /// Whether a notification of the given category should be shown.
    pub fn permits(self, category: NotificationCategory) -> bool {
        match category {
            NotificationCategory::Error => self >= NotificationLevel::Error,
            NotificationCategory::Summary => self >= NotificationLevel::Summary,
            NotificationCategory::Info => self >= NotificationLevel::All,
        }
    }
}
