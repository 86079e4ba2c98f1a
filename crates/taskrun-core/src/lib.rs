//! TaskRun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - A cluster API or client
//! - Async runtimes
//! - Logging
//!
//! All types here describe what a run asks for (`TaskRun`, `Task`,
//! `PipelineResource`), what the controller produces (`BuildSpec`), and what
//! the execution layer reports back (`WorkloadStatus`).

pub mod build;
pub mod duration;
pub mod error;
pub mod ids;
pub mod resource;
pub mod run;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use build::{
    BuildSpec, Container, EnvVar, OwnerReference, Volume, VolumeMount, VolumeSource,
    WorkloadStatus,
};
pub use error::CoreError;
pub use ids::ObjectKey;
pub use resource::{
    PipelineResource, PipelineResourceSpec, ResourceParam, ResourceType, TypedResource,
};
pub use run::{Param, TaskResourceBinding, TaskRun, TaskRunSpec, TaskRunStatus};
pub use status::{Condition, ConditionStatus, ContainerState, StepState, CONDITION_SUCCEEDED};
pub use task::{ParamSpec, Step, Task, TaskKind, TaskRef, TaskResource, TaskSpec};
