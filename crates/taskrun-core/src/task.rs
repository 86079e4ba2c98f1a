//! Task definitions: declared params, declared resources and ordered steps.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::build::Container;
use crate::ResourceType;

/// A step is a container template; the controller rewrites it before it runs.
pub type Step = Container;

/// Whether a reference points at a namespaced Task or a cluster-scoped ClusterTask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    #[default]
    Task,
    ClusterTask,
}

/// Reference from a run to a stored task definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub name: String,

    #[serde(default)]
    pub kind: TaskKind,
}

impl TaskRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TaskKind::Task,
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TaskKind::ClusterTask,
        }
    }
}

/// Declaration of an input parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// Declaration of an input or output resource slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResource {
    pub name: String,

    #[serde(rename = "type")]
    pub type_: ResourceType,
}

impl TaskResource {
    pub fn new(name: impl Into<String>, type_: ResourceType) -> Self {
        Self {
            name: name.into(),
            type_,
        }
    }
}

/// The body of a Task or ClusterTask, also usable inline on a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default)]
    pub params: Vec<ParamSpec>,

    #[serde(default)]
    pub input_resources: Vec<TaskResource>,

    #[serde(default)]
    pub output_resources: Vec<TaskResource>,

    #[serde(default)]
    pub steps: Vec<Step>,
}

impl TaskSpec {
    /// Create a spec from its steps.
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Default::default()
        }
    }

    /// Builder method to declare a parameter.
    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// Builder method to declare an input resource.
    pub fn with_input(mut self, name: impl Into<String>, type_: ResourceType) -> Self {
        self.input_resources.push(TaskResource::new(name, type_));
        self
    }

    /// Builder method to declare an output resource.
    pub fn with_output(mut self, name: impl Into<String>, type_: ResourceType) -> Self {
        self.output_resources.push(TaskResource::new(name, type_));
        self
    }

    /// Look up a declared parameter.
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Check whether an input resource with this name is declared.
    pub fn declares_input(&self, name: &str) -> bool {
        self.input_resources.iter().any(|r| r.name == name)
    }
}

/// A stored task definition. ClusterTasks share the shape with an empty namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    pub spec: TaskSpec,
}

impl Task {
    /// Create a namespaced Task.
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, spec: TaskSpec) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
            spec,
        }
    }

    /// Create a cluster-scoped ClusterTask.
    pub fn cluster(name: impl Into<String>, spec: TaskSpec) -> Self {
        Self::new(name, "", spec)
    }
}
