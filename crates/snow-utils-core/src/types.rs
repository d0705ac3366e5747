use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SnowUtilsError;

// ---------------------------------------------------------------------------
// InstanceStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    InProgress,
    Complete,
    Removed,
}

impl InstanceStatus {
    pub fn all() -> &'static [InstanceStatus] {
        &[
            InstanceStatus::InProgress,
            InstanceStatus::Complete,
            InstanceStatus::Removed,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstanceStatus::InProgress => "IN_PROGRESS",
            InstanceStatus::Complete => "COMPLETE",
            InstanceStatus::Removed => "REMOVED",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InstanceStatus {
    type Err = SnowUtilsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "IN_PROGRESS" => Ok(InstanceStatus::InProgress),
            "COMPLETE" => Ok(InstanceStatus::Complete),
            "REMOVED" => Ok(InstanceStatus::Removed),
            other => Err(SnowUtilsError::InvalidStatus(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// StepStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Done,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "PENDING",
            StepStatus::Done => "DONE",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepStatus {
    type Err = SnowUtilsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "PENDING" => Ok(StepStatus::Pending),
            "DONE" => Ok(StepStatus::Done),
            other => Err(SnowUtilsError::InvalidStatus(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// StepAction
// ---------------------------------------------------------------------------

/// What a provider call is asked to do for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Create,
    Rotate,
    Compensate,
}

impl StepAction {
    pub fn as_str(self) -> &'static str {
        match self {
            StepAction::Create => "create",
            StepAction::Rotate => "rotate",
            StepAction::Compensate => "compensate",
        }
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// CollisionDisposition
// ---------------------------------------------------------------------------

/// Operator's answer when a replay targets an instance that is already COMPLETE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum CollisionDisposition {
    UseExisting,
    Replace,
    Rename { new_key: String },
    Cancel,
}

impl CollisionDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollisionDisposition::UseExisting => "use-existing",
            CollisionDisposition::Replace => "replace",
            CollisionDisposition::Rename { .. } => "rename",
            CollisionDisposition::Cancel => "cancel",
        }
    }
}

impl fmt::Display for CollisionDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollisionDisposition::Rename { new_key } => write!(f, "rename to {new_key}"),
            other => f.write_str(other.as_str()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
