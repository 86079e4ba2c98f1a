//! Conditions and per-step execution states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The condition type that carries a run's overall success/failure.
pub const CONDITION_SUCCEEDED: &str = "Succeeded";

/// Tri-state status of a condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    /// Still in progress, or not yet known.
    #[default]
    Unknown,
}

impl ConditionStatus {
    /// Returns true once the condition has settled on True or False.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::True | Self::False)
    }
}

/// A high-level state indicator attached to a run's status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,

    pub status: ConditionStatus,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// When `status` last changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// Build a `Succeeded` condition.
    pub fn succeeded(
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: CONDITION_SUCCEEDED.to_string(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: None,
        }
    }

    /// Compare everything except the transition timestamp.
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Low-level container state of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Waiting {
        #[serde(default)]
        reason: String,
        #[serde(default)]
        message: String,
    },
    Running {
        #[serde(default)]
        started_at: Option<DateTime<Utc>>,
    },
    Terminated {
        exit_code: i32,
        #[serde(default)]
        reason: String,
        #[serde(default)]
        message: String,
        #[serde(default)]
        started_at: Option<DateTime<Utc>>,
        #[serde(default)]
        finished_at: Option<DateTime<Utc>>,
    },
}

impl ContainerState {
    /// Waiting state with a reason and message.
    pub fn waiting(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Waiting {
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Terminated state with an exit code and reason.
    pub fn terminated(exit_code: i32, reason: impl Into<String>) -> Self {
        Self::Terminated {
            exit_code,
            reason: reason.into(),
            message: String::new(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// Execution state of a single user step, as reported on the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepState {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    pub state: ContainerState,
}

impl StepState {
    pub fn new(name: impl Into<String>, state: ContainerState) -> Self {
        Self {
            name: name.into(),
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_status_terminal() {
        assert!(ConditionStatus::True.is_terminal());
        assert!(ConditionStatus::False.is_terminal());
        assert!(!ConditionStatus::Unknown.is_terminal());
    }

    #[test]
    fn test_condition_serializes_type_field() {
        let cond = Condition::succeeded(ConditionStatus::False, "TaskRunTimeout", "too slow");
        let json = serde_json::to_value(&cond).unwrap();
        assert_eq!(json["type"], "Succeeded");
        assert_eq!(json["status"], "False");
        assert!(json.get("last_transition_time").is_none());
    }
}
