//! Resolves a run into the task definition and resources it executes with.

use thiserror::Error;
use tracing::debug;

use taskrun_core::{
    PipelineResource, ResourceType, TaskKind, TaskResource, TaskResourceBinding, TaskRun,
    TaskSpec,
};

use crate::client::{ClientError, Clients};

/// A run that can never execute as written. Retrying will not help.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("TaskRun {run:?} specifies neither a task reference nor a task spec")]
    NoTask { run: String },

    #[error("TaskRun {run:?} specifies both a task reference and a task spec")]
    AmbiguousTask { run: String },

    #[error("{kind:?} {name:?} referenced by TaskRun {run:?} doesn't exist")]
    TaskNotFound {
        run: String,
        kind: TaskKind,
        name: String,
    },

    #[error("resource {name:?} declared by the task is not bound by the TaskRun")]
    UnboundResource { name: String },

    #[error("PipelineResource {resource:?} bound to {binding:?} doesn't exist")]
    ResourceNotFound { binding: String, resource: String },

    #[error("PipelineResource {name:?} has an unsupported type")]
    UnsupportedResourceType { name: String },
}

/// Resolution outcome that is not a successful lookup.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The run is invalid; record it and stop.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// The store could not be reached; retry later.
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// A bound resource slot, with the resource it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBinding {
    /// The slot as declared by the task.
    pub declared: TaskResource,

    /// The binding supplied by the run.
    pub binding: TaskResourceBinding,

    /// The resource the binding resolved to.
    pub resource: PipelineResource,
}

impl ResolvedBinding {
    /// Name of the declared slot; also the workspace directory name.
    pub fn name(&self) -> &str {
        &self.declared.name
    }

    pub fn has_paths(&self) -> bool {
        !self.binding.paths.is_empty()
    }
}

/// Everything a run needs in order to be assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTaskRun {
    /// Name of the referenced task; `None` for an inline task spec.
    pub task_name: Option<String>,

    pub task_spec: TaskSpec,

    /// Inputs in task-declared order.
    pub inputs: Vec<ResolvedBinding>,

    /// Outputs in task-declared order.
    pub outputs: Vec<ResolvedBinding>,

    pub service_account: String,
}

/// Looks up tasks and resources for runs.
pub struct Resolver<'a> {
    clients: &'a Clients,
}

impl<'a> Resolver<'a> {
    pub fn new(clients: &'a Clients) -> Self {
        Self { clients }
    }

    /// Resolve the task, every declared resource, and the service account.
    pub async fn resolve(&self, run: &TaskRun) -> Result<ResolvedTaskRun, ResolveError> {
        let (task_name, task_spec) = self.resolve_task(run).await?;

        let mut inputs = Vec::with_capacity(task_spec.input_resources.len());
        for declared in &task_spec.input_resources {
            let resolved = self
                .resolve_binding(run, declared, &run.spec.input_resources)
                .await?;
            inputs.push(resolved);
        }

        let mut outputs = Vec::with_capacity(task_spec.output_resources.len());
        for declared in &task_spec.output_resources {
            let resolved = self
                .resolve_binding(run, declared, &run.spec.output_resources)
                .await?;
            outputs.push(resolved);
        }

        debug!(
            namespace = %run.namespace,
            name = %run.name,
            task = ?task_name,
            inputs = inputs.len(),
            outputs = outputs.len(),
            "Resolved TaskRun"
        );

        Ok(ResolvedTaskRun {
            task_name,
            task_spec,
            inputs,
            outputs,
            service_account: run.spec.service_account_name().to_string(),
        })
    }

    async fn resolve_task(
        &self,
        run: &TaskRun,
    ) -> Result<(Option<String>, TaskSpec), ResolveError> {
        match (&run.spec.task_ref, &run.spec.task_spec) {
            (Some(_), Some(_)) => Err(ResolutionError::AmbiguousTask {
                run: run.name.clone(),
            }
            .into()),
            (None, None) => Err(ResolutionError::NoTask {
                run: run.name.clone(),
            }
            .into()),
            (None, Some(spec)) => Ok((None, spec.clone())),
            (Some(task_ref), None) => {
                let fetched = match task_ref.kind {
                    TaskKind::Task => {
                        self.clients
                            .tasks
                            .get_task(&run.namespace, &task_ref.name)
                            .await
                    }
                    TaskKind::ClusterTask => {
                        self.clients.tasks.get_cluster_task(&task_ref.name).await
                    }
                };
                match fetched {
                    Ok(task) => Ok((Some(task.name), task.spec)),
                    Err(e) if e.is_not_found() => Err(ResolutionError::TaskNotFound {
                        run: run.name.clone(),
                        kind: task_ref.kind,
                        name: task_ref.name.clone(),
                    }
                    .into()),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    async fn resolve_binding(
        &self,
        run: &TaskRun,
        declared: &TaskResource,
        bindings: &[TaskResourceBinding],
    ) -> Result<ResolvedBinding, ResolveError> {
        let binding = bindings
            .iter()
            .find(|b| b.name == declared.name)
            .ok_or_else(|| ResolutionError::UnboundResource {
                name: declared.name.clone(),
            })?;

        let resource = match &binding.resource_spec {
            Some(spec) => PipelineResource::new(&binding.name, &run.namespace, spec.clone()),
            None => {
                let resource_name = binding.resource_name();
                match self
                    .clients
                    .resources
                    .get_resource(&run.namespace, resource_name)
                    .await
                {
                    Ok(resource) => resource,
                    Err(e) if e.is_not_found() => {
                        return Err(ResolutionError::ResourceNotFound {
                            binding: binding.name.clone(),
                            resource: resource_name.to_string(),
                        }
                        .into())
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        if resource.spec.type_ == ResourceType::Unsupported {
            return Err(ResolutionError::UnsupportedResourceType {
                name: resource.name,
            }
            .into());
        }

        Ok(ResolvedBinding {
            declared: declared.clone(),
            binding: binding.clone(),
            resource,
        })
    }
}
