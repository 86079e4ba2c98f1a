//! TaskRun: a single requested execution of a task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::build::OwnerReference;
use crate::status::{Condition, ConditionStatus, StepState, CONDITION_SUCCEEDED};
use crate::{ObjectKey, PipelineResourceSpec, TaskRef, TaskSpec};

/// Service account used when a run does not name one.
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

/// Owner kind that groups runs sharing a persistent claim.
pub const PIPELINE_RUN_KIND: &str = "PipelineRun";

/// A parameter value supplied by the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: String,
}

impl Param {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Binds a declared resource slot to a concrete resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResourceBinding {
    /// Name of the declared resource slot on the task.
    pub name: String,

    /// Stored resource to use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_ref: Option<String>,

    /// Inline resource, named after the binding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_spec: Option<PipelineResourceSpec>,

    /// Locations on the shared claim to copy from (inputs) or to (outputs).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
}

impl TaskResourceBinding {
    /// Bind a slot to a stored resource.
    pub fn by_ref(name: impl Into<String>, resource_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_ref: Some(resource_ref.into()),
            resource_spec: None,
            paths: Vec::new(),
        }
    }

    /// Bind a slot to an inline resource.
    pub fn inline(name: impl Into<String>, spec: PipelineResourceSpec) -> Self {
        Self {
            name: name.into(),
            resource_ref: None,
            resource_spec: Some(spec),
            paths: Vec::new(),
        }
    }

    /// Builder method to add a claim path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }

    /// Name of the stored resource this binding points at.
    pub fn resource_name(&self) -> &str {
        self.resource_ref.as_deref().unwrap_or(&self.name)
    }
}

/// What the run asks for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRunSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_ref: Option<TaskRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_spec: Option<TaskSpec>,

    #[serde(default)]
    pub params: Vec<Param>,

    #[serde(default)]
    pub input_resources: Vec<TaskResourceBinding>,

    #[serde(default)]
    pub output_resources: Vec<TaskResourceBinding>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account: String,

    #[serde(
        default,
        with = "crate::duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,

    #[serde(default)]
    pub cancelled: bool,
}

impl TaskRunSpec {
    /// Spec referencing a stored task.
    pub fn for_task(task_ref: TaskRef) -> Self {
        Self {
            task_ref: Some(task_ref),
            ..Default::default()
        }
    }

    /// Spec embedding a task definition.
    pub fn inline(task_spec: TaskSpec) -> Self {
        Self {
            task_spec: Some(task_spec),
            ..Default::default()
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push(Param::new(name, value));
        self
    }

    pub fn with_input(mut self, binding: TaskResourceBinding) -> Self {
        self.input_resources.push(binding);
        self
    }

    pub fn with_output(mut self, binding: TaskResourceBinding) -> Self {
        self.output_resources.push(binding);
        self
    }

    pub fn with_service_account(mut self, name: impl Into<String>) -> Self {
        self.service_account = name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancelled(mut self) -> Self {
        self.cancelled = true;
        self
    }

    /// Value supplied by the run for a parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// Effective service account.
    pub fn service_account_name(&self) -> &str {
        if self.service_account.is_empty() {
            DEFAULT_SERVICE_ACCOUNT
        } else {
            &self.service_account
        }
    }
}

/// What the controller has observed and decided about the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRunStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Name of the workload created for this run; immutable once set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub steps: Vec<StepState>,
}

impl TaskRunStatus {
    /// The `Succeeded` condition, if any.
    pub fn succeeded(&self) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.type_ == CONDITION_SUCCEEDED)
    }

    /// Returns true once the run has succeeded or failed.
    pub fn is_done(&self) -> bool {
        self.succeeded()
            .map(|c| c.status.is_terminal())
            .unwrap_or(false)
    }

    /// Ensure a `Succeeded` condition exists, starting at Unknown.
    pub fn initialize_conditions(&mut self, now: DateTime<Utc>) {
        if self.succeeded().is_none() {
            let mut cond = Condition::succeeded(ConditionStatus::Unknown, "", "");
            cond.last_transition_time = Some(now);
            self.conditions.push(cond);
        }
    }

    /// Set a condition, replacing any condition of the same type.
    ///
    /// The transition time only moves when the status changes. A terminal
    /// condition is never moved back to Unknown; returns false in that case.
    pub fn set_condition(&mut self, mut condition: Condition, now: DateTime<Utc>) -> bool {
        match self.conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                if existing.status.is_terminal() && condition.status == ConditionStatus::Unknown {
                    return false;
                }
                condition.last_transition_time = if existing.status == condition.status {
                    existing.last_transition_time.or(Some(now))
                } else {
                    Some(now)
                };
                *existing = condition;
            }
            None => {
                condition.last_transition_time = Some(now);
                self.conditions.push(condition);
            }
        }
        true
    }

    /// Compare two statuses ignoring condition transition times.
    pub fn same_state(&self, other: &TaskRunStatus) -> bool {
        self.pod_name == other.pod_name
            && self.start_time == other.start_time
            && self.completion_time == other.completion_time
            && self.steps == other.steps
            && self.conditions.len() == other.conditions.len()
            && self
                .conditions
                .iter()
                .zip(&other.conditions)
                .all(|(a, b)| a.same_state(b))
    }
}

/// A run of a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRun {
    pub name: String,

    pub namespace: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,

    pub spec: TaskRunSpec,

    #[serde(default)]
    pub status: TaskRunStatus,
}

impl TaskRun {
    /// Create a new run.
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, spec: TaskRunSpec) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
            owner_references: Vec::new(),
            spec,
            status: TaskRunStatus::default(),
        }
    }

    /// Builder method to add a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Builder method to add an owner.
    pub fn with_owner(mut self, kind: impl Into<String>, name: impl Into<String>) -> Self {
        self.owner_references.push(OwnerReference::new(kind, name));
        self
    }

    /// Builder method to preset the status (useful for testing).
    pub fn with_status(mut self, status: TaskRunStatus) -> Self {
        self.status = status;
        self
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    pub fn is_cancelled(&self) -> bool {
        self.spec.cancelled
    }

    /// Persistent claim shared by the owning PipelineRun, or this run alone.
    pub fn pvc_name(&self) -> String {
        let owner = self
            .owner_references
            .iter()
            .find(|o| o.kind == PIPELINE_RUN_KIND)
            .map(|o| o.name.as_str())
            .unwrap_or(&self.name);
        format!("{owner}-pvc")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_service_account_defaults() {
        let spec = TaskRunSpec::default();
        assert_eq!(spec.service_account_name(), "default");
        let spec = spec.with_service_account("test-sa");
        assert_eq!(spec.service_account_name(), "test-sa");
    }

    #[test]
    fn test_pvc_name_prefers_pipeline_run_owner() {
        let tr = TaskRun::new("tr", "foo", TaskRunSpec::default());
        assert_eq!(tr.pvc_name(), "tr-pvc");
        let tr = tr.with_owner("PipelineRun", "test");
        assert_eq!(tr.pvc_name(), "test-pvc");
    }

    #[test]
    fn test_set_condition_keeps_transition_time_when_status_unchanged() {
        let mut status = TaskRunStatus::default();
        let t0 = now();
        status.initialize_conditions(t0);
        let later = t0 + chrono::Duration::seconds(5);
        status.set_condition(
            Condition::succeeded(ConditionStatus::Unknown, "Running", "Running"),
            later,
        );
        let cond = status.succeeded().unwrap();
        assert_eq!(cond.reason, "Running");
        assert_eq!(cond.last_transition_time, Some(t0));
        assert_eq!(status.conditions.len(), 1);
    }

    #[test]
    fn test_set_condition_never_leaves_terminal_state() {
        let mut status = TaskRunStatus::default();
        status.set_condition(
            Condition::succeeded(ConditionStatus::False, "TaskRunCancelled", "cancelled"),
            now(),
        );
        let applied = status.set_condition(
            Condition::succeeded(ConditionStatus::Unknown, "Running", "Running"),
            now(),
        );
        assert!(!applied);
        assert!(status.is_done());
        assert_eq!(status.succeeded().unwrap().reason, "TaskRunCancelled");
    }

    #[test]
    fn test_timeout_round_trips_as_duration_string() {
        let spec = TaskRunSpec::default().with_timeout(Duration::from_secs(90));
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["timeout"], "1m30s");
        let back: TaskRunSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back.timeout, Some(Duration::from_secs(90)));
    }
}
