//! Collaborator APIs the reconciler reads from and writes to.
//!
//! Every call is a single request against the object store; nothing here
//! retries. Retrying is the driver's job, triggered by a reconcile error.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use taskrun_core::{BuildSpec, ObjectKey, PipelineResource, Task, TaskRun, WorkloadStatus};

/// Errors returned by collaborator calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The requested object does not exist.
    #[error("{kind} {name:?} not found")]
    NotFound { kind: &'static str, name: String },

    /// Any other API failure; may succeed on retry.
    #[error("API error: {0}")]
    Api(String),
}

impl ClientError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Access to TaskRun objects and their status subresource.
#[async_trait]
pub trait TaskRunClient: Send + Sync {
    async fn get_task_run(&self, key: &ObjectKey) -> Result<TaskRun, ClientError>;

    async fn list_task_runs(&self) -> Result<Vec<ObjectKey>, ClientError>;

    /// Write back `run.status`; the spec and metadata are left untouched.
    async fn update_status(&self, run: &TaskRun) -> Result<(), ClientError>;
}

/// Read access to Task and ClusterTask definitions.
#[async_trait]
pub trait TaskClient: Send + Sync {
    async fn get_task(&self, namespace: &str, name: &str) -> Result<Task, ClientError>;

    async fn get_cluster_task(&self, name: &str) -> Result<Task, ClientError>;
}

/// Read access to PipelineResources.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn get_resource(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PipelineResource, ClientError>;
}

/// The execution layer: turns a build spec into a running workload.
#[async_trait]
pub trait WorkloadClient: Send + Sync {
    /// Create a workload from `build`, returning the workload's name.
    async fn create_workload(&self, build: &BuildSpec) -> Result<String, ClientError>;

    /// Name of a workload already created for the run `task_run`, if any.
    async fn find_workload(
        &self,
        namespace: &str,
        task_run: &str,
    ) -> Result<Option<String>, ClientError>;

    async fn get_workload_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<WorkloadStatus, ClientError>;

    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<(), ClientError>;
}

/// The set of collaborators a reconciler talks to.
#[derive(Clone)]
pub struct Clients {
    pub task_runs: Arc<dyn TaskRunClient>,
    pub tasks: Arc<dyn TaskClient>,
    pub resources: Arc<dyn ResourceClient>,
    pub workloads: Arc<dyn WorkloadClient>,
}

impl Clients {
    /// Use one backend for every collaborator.
    pub fn from_shared<C>(backend: Arc<C>) -> Self
    where
        C: TaskRunClient + TaskClient + ResourceClient + WorkloadClient + 'static,
    {
        Self {
            task_runs: backend.clone(),
            tasks: backend.clone(),
            resources: backend.clone(),
            workloads: backend,
        }
    }
}
