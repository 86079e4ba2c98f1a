//! In-memory object store implementing every collaborator API.
//!
//! Backs the binary and the tests. Records each call as an [`Action`] and
//! can be told to fail specific calls, so tests can assert on exactly which
//! API requests a reconcile made.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use taskrun_core::{BuildSpec, ObjectKey, PipelineResource, Task, TaskRun, WorkloadStatus};

use crate::assembler::TASK_RUN_LABEL;
use crate::client::{ClientError, ResourceClient, TaskClient, TaskRunClient, WorkloadClient};

pub const KIND_TASK_RUN: &str = "TaskRun";
pub const KIND_TASK: &str = "Task";
pub const KIND_CLUSTER_TASK: &str = "ClusterTask";
pub const KIND_RESOURCE: &str = "PipelineResource";
pub const KIND_SERVICE_ACCOUNT: &str = "ServiceAccount";
pub const KIND_WORKLOAD: &str = "Workload";

/// API verb of a recorded action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Get => "get",
            Self::List => "list",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// One API call made against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub verb: Verb,
    pub kind: &'static str,
    pub key: String,
}

/// A workload created from a build spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub name: String,
    pub namespace: String,
    pub build: BuildSpec,
    pub status: WorkloadStatus,
}

/// Objects to seed a cluster with, as read from a JSON manifest.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub tasks: Vec<Task>,
    pub cluster_tasks: Vec<Task>,
    pub resources: Vec<PipelineResource>,
    pub task_runs: Vec<TaskRun>,
    pub service_accounts: Vec<ObjectKey>,
}

struct InjectedFailure {
    verb: Verb,
    kind: &'static str,
    message: String,
}

/// Shared in-memory cluster state.
#[derive(Default)]
pub struct InMemoryCluster {
    /// TaskRuns indexed by namespace/name.
    pub task_runs: RwLock<BTreeMap<ObjectKey, TaskRun>>,

    /// Namespaced Tasks.
    pub tasks: RwLock<HashMap<ObjectKey, Task>>,

    /// ClusterTasks indexed by name.
    pub cluster_tasks: RwLock<HashMap<String, Task>>,

    /// PipelineResources.
    pub resources: RwLock<HashMap<ObjectKey, PipelineResource>>,

    /// Existing service accounts.
    pub service_accounts: RwLock<BTreeSet<ObjectKey>>,

    /// Workloads indexed by namespace/name.
    pub workloads: RwLock<HashMap<ObjectKey, Workload>>,

    actions: Mutex<Vec<Action>>,
    failures: Mutex<Vec<InjectedFailure>>,
}

impl InMemoryCluster {
    /// Create an empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a cluster from a manifest. Every namespace holding a run gets a
    /// `default` service account.
    pub fn from_manifest(manifest: Manifest) -> Self {
        let mut cluster = Self::new();
        for task in manifest.tasks {
            cluster = cluster.with_task(task);
        }
        for task in manifest.cluster_tasks {
            cluster = cluster.with_cluster_task(task);
        }
        for resource in manifest.resources {
            cluster = cluster.with_resource(resource);
        }
        for key in manifest.service_accounts {
            cluster = cluster.with_service_account(key.namespace, key.name);
        }
        for run in manifest.task_runs {
            let namespace = run.namespace.clone();
            cluster = cluster
                .with_task_run(run)
                .with_service_account(namespace, "default");
        }
        cluster
    }

    /// Builder method to add a Task.
    pub fn with_task(mut self, task: Task) -> Self {
        let key = ObjectKey::new(&task.namespace, &task.name);
        self.tasks.get_mut().insert(key, task);
        self
    }

    /// Builder method to add a ClusterTask.
    pub fn with_cluster_task(mut self, task: Task) -> Self {
        self.cluster_tasks.get_mut().insert(task.name.clone(), task);
        self
    }

    /// Builder method to add a PipelineResource.
    pub fn with_resource(mut self, resource: PipelineResource) -> Self {
        let key = ObjectKey::new(&resource.namespace, &resource.name);
        self.resources.get_mut().insert(key, resource);
        self
    }

    /// Builder method to add a TaskRun.
    pub fn with_task_run(mut self, run: TaskRun) -> Self {
        self.task_runs.get_mut().insert(run.key(), run);
        self
    }

    /// Builder method to add a service account.
    pub fn with_service_account(
        mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        self.service_accounts
            .get_mut()
            .insert(ObjectKey::new(namespace, name));
        self
    }

    /// Builder method to add an existing workload.
    pub fn with_workload(mut self, workload: Workload) -> Self {
        let key = ObjectKey::new(&workload.namespace, &workload.name);
        self.workloads.get_mut().insert(key, workload);
        self
    }

    /// Make every future `verb` call on `kind` fail with an API error.
    pub fn fail_on(&self, verb: Verb, kind: &'static str, message: impl Into<String>) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(InjectedFailure {
                verb,
                kind,
                message: message.into(),
            });
    }

    /// Drop every injected failure.
    pub fn clear_failures(&self) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// All actions recorded so far, oldest first.
    pub fn actions(&self) -> Vec<Action> {
        self.actions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Recorded actions on one kind of object.
    pub fn actions_on(&self, kind: &str) -> Vec<Action> {
        self.actions()
            .into_iter()
            .filter(|a| a.kind == kind)
            .collect()
    }

    /// Overwrite a workload's low-level status, as the execution layer would.
    pub async fn set_workload_status(
        &self,
        namespace: &str,
        name: &str,
        status: WorkloadStatus,
    ) -> Result<(), ClientError> {
        let mut workloads = self.workloads.write().await;
        let workload = workloads
            .get_mut(&ObjectKey::new(namespace, name))
            .ok_or_else(|| ClientError::not_found(KIND_WORKLOAD, name))?;
        workload.status = status;
        Ok(())
    }

    /// Get a copy of a stored run.
    pub async fn task_run(&self, key: &ObjectKey) -> Option<TaskRun> {
        self.task_runs.read().await.get(key).cloned()
    }

    /// Get a copy of a stored workload.
    pub async fn workload(&self, namespace: &str, name: &str) -> Option<Workload> {
        self.workloads
            .read()
            .await
            .get(&ObjectKey::new(namespace, name))
            .cloned()
    }

    /// Record the call, then fail it if a matching failure was injected.
    fn record(&self, verb: Verb, kind: &'static str, key: String) -> Result<(), ClientError> {
        self.actions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Action { verb, kind, key });
        let failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        match failures.iter().find(|f| f.verb == verb && f.kind == kind) {
            Some(f) => Err(ClientError::Api(f.message.clone())),
            None => Ok(()),
        }
    }
}

/// Random 6-hex-character suffix for generated workload names.
fn random_suffix() -> String {
    hex::encode(rand::random::<[u8; 3]>())
}

#[async_trait]
impl TaskRunClient for InMemoryCluster {
    async fn get_task_run(&self, key: &ObjectKey) -> Result<TaskRun, ClientError> {
        self.record(Verb::Get, KIND_TASK_RUN, key.to_string())?;
        self.task_run(key)
            .await
            .ok_or_else(|| ClientError::not_found(KIND_TASK_RUN, key.to_string()))
    }

    async fn list_task_runs(&self) -> Result<Vec<ObjectKey>, ClientError> {
        self.record(Verb::List, KIND_TASK_RUN, String::new())?;
        Ok(self.task_runs.read().await.keys().cloned().collect())
    }

    async fn update_status(&self, run: &TaskRun) -> Result<(), ClientError> {
        let key = run.key();
        self.record(Verb::Update, KIND_TASK_RUN, key.to_string())?;
        let mut runs = self.task_runs.write().await;
        let stored = runs
            .get_mut(&key)
            .ok_or_else(|| ClientError::not_found(KIND_TASK_RUN, key.to_string()))?;
        stored.status = run.status.clone();
        Ok(())
    }
}

#[async_trait]
impl TaskClient for InMemoryCluster {
    async fn get_task(&self, namespace: &str, name: &str) -> Result<Task, ClientError> {
        let key = ObjectKey::new(namespace, name);
        self.record(Verb::Get, KIND_TASK, key.to_string())?;
        self.tasks
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| ClientError::not_found(KIND_TASK, key.to_string()))
    }

    async fn get_cluster_task(&self, name: &str) -> Result<Task, ClientError> {
        self.record(Verb::Get, KIND_CLUSTER_TASK, name.to_string())?;
        self.cluster_tasks
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::not_found(KIND_CLUSTER_TASK, name))
    }
}

#[async_trait]
impl ResourceClient for InMemoryCluster {
    async fn get_resource(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PipelineResource, ClientError> {
        let key = ObjectKey::new(namespace, name);
        self.record(Verb::Get, KIND_RESOURCE, key.to_string())?;
        self.resources
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| ClientError::not_found(KIND_RESOURCE, key.to_string()))
    }
}

#[async_trait]
impl WorkloadClient for InMemoryCluster {
    async fn create_workload(&self, build: &BuildSpec) -> Result<String, ClientError> {
        self.record(
            Verb::Create,
            KIND_WORKLOAD,
            ObjectKey::new(&build.namespace, &build.name).to_string(),
        )?;

        let sa = ObjectKey::new(&build.namespace, &build.service_account_name);
        if !self.service_accounts.read().await.contains(&sa) {
            return Err(ClientError::not_found(KIND_SERVICE_ACCOUNT, sa.to_string()));
        }

        let name = format!("{}-pod-{}", build.name, random_suffix());
        let workload = Workload {
            name: name.clone(),
            namespace: build.namespace.clone(),
            build: build.clone(),
            status: WorkloadStatus::default(),
        };
        self.workloads
            .write()
            .await
            .insert(ObjectKey::new(&build.namespace, &name), workload);
        Ok(name)
    }

    async fn find_workload(
        &self,
        namespace: &str,
        task_run: &str,
    ) -> Result<Option<String>, ClientError> {
        self.record(
            Verb::List,
            KIND_WORKLOAD,
            ObjectKey::new(namespace, task_run).to_string(),
        )?;
        let workloads = self.workloads.read().await;
        let mut owned: Vec<&Workload> = workloads
            .values()
            .filter(|w| w.namespace == namespace)
            .filter(|w| w.build.labels.get(TASK_RUN_LABEL).map(String::as_str) == Some(task_run))
            .collect();
        owned.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(owned.first().map(|w| w.name.clone()))
    }

    async fn get_workload_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<WorkloadStatus, ClientError> {
        let key = ObjectKey::new(namespace, name);
        self.record(Verb::Get, KIND_WORKLOAD, key.to_string())?;
        self.workloads
            .read()
            .await
            .get(&key)
            .map(|w| w.status.clone())
            .ok_or_else(|| ClientError::not_found(KIND_WORKLOAD, key.to_string()))
    }

    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<(), ClientError> {
        let key = ObjectKey::new(namespace, name);
        self.record(Verb::Delete, KIND_WORKLOAD, key.to_string())?;
        self.workloads
            .write()
            .await
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| ClientError::not_found(KIND_WORKLOAD, key.to_string()))
    }
}
