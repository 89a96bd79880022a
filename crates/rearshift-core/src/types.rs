//! Core value types shared across the workspace.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Logical id of the primary (front) display.
pub const PRIMARY_DISPLAY: i32 = 0;
/// Logical id of the rear display.
pub const REAR_DISPLAY: i32 = 1;

/// A running application session: package name plus the OS-assigned task id.
///
/// The wire form is `package:task_id` (e.g. `com.example.app:4217`), the
/// same shape the activity-stack dump yields after extraction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskRef {
    pub package: String,
    pub task_id: i32,
}

impl TaskRef {
    pub fn new(package: impl Into<String>, task_id: i32) -> Self {
        Self {
            package: package.into(),
            task_id,
        }
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.package, self.task_id)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskRefParseError {
    #[error("task ref missing ':' separator: {0:?}")]
    MissingSeparator(String),
    #[error("task ref has empty package: {0:?}")]
    EmptyPackage(String),
    #[error("task ref has invalid task id: {0:?}")]
    InvalidTaskId(String),
}

impl FromStr for TaskRef {
    type Err = TaskRefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Split at the LAST colon: package names never contain ':' but we
        // stay tolerant of any future prefix scheme.
        let (package, id) = s
            .rsplit_once(':')
            .ok_or_else(|| TaskRefParseError::MissingSeparator(s.to_string()))?;
        if package.is_empty() {
            return Err(TaskRefParseError::EmptyPackage(s.to_string()));
        }
        let task_id = id
            .trim()
            .parse::<i32>()
            .map_err(|_| TaskRefParseError::InvalidTaskId(s.to_string()))?;
        Ok(TaskRef {
            package: package.to_string(),
            task_id,
        })
    }
}

/// Which overlay surface kind currently owns the rear display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimationKind {
    Charging,
    Notification,
}

impl fmt::Display for AnimationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnimationKind::Charging => write!(f, "charging"),
            AnimationKind::Notification => write!(f, "notification"),
        }
    }
}

/// Result of a migration attempt. Outcomes are data, not errors: a
/// conflict or a timeout is a normal answer the caller acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// The session now sits on the target display.
    Moved { task: TaskRef },
    /// A foreign session already occupies the rear display; nothing moved.
    Conflict { occupant: TaskRef },
    /// No resolvable foreground session on the source display.
    NoForegroundSession,
    /// The launched placeholder never showed up in the stack dump.
    Timeout,
    /// No privileged channel is currently bound.
    ChannelUnavailable,
}

/// Lifecycle of the privileged command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Never bound since process start.
    #[default]
    Unbound,
    /// A bind attempt is in flight.
    Binding,
    /// Channel is live; commands may be issued.
    Bound,
    /// A previously live channel was lost; a rebind is required.
    Dead,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Unbound => "unbound",
            ConnectionState::Binding => "binding",
            ConnectionState::Bound => "bound",
            ConnectionState::Dead => "dead",
        };
        write!(f, "{s}")
    }
}
