//! The reconcile state machine for a single TaskRun.
//!
//! Each call to [`Reconciler::reconcile`] drives one run a step closer to a
//! terminal condition: it resolves what the run needs, creates its workload
//! once, and folds the workload's reported status back into the run.
//!
//! Outcomes that retrying cannot change (cancellation, timeout, a missing
//! task, an invalid binding) are written to the run's `Succeeded` condition
//! and reported as `Ok`. Only transient collaborator failures surface as
//! [`ReconcileError`], which the driver answers with a backoff requeue.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use taskrun_core::{duration, Condition, ConditionStatus, ObjectKey, TaskRun};

use crate::assembler::Assembler;
use crate::client::{ClientError, Clients};
use crate::config::Config;
use crate::reducer::{reduce, REASON_RUNNING};
use crate::resolver::{ResolveError, ResolvedTaskRun, Resolver};
use crate::templating::apply_replacements;
use crate::validation::validate;


pub const REASON_CANCELLED: &str = "TaskRunCancelled";
pub const REASON_TIMEOUT: &str = "TaskRunTimeout";
pub const REASON_FAILED_RESOLUTION: &str = "TaskRunFailedResolution";
pub const REASON_VALIDATION_FAILED: &str = "TaskRunValidationFailed";
pub const REASON_COULDNT_GET_TASK: &str = "CouldntGetTask";
pub const REASON_WORKLOAD_LOST: &str = "TaskRunWorkloadLost";

/// A transient failure; the key should be retried later.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to get TaskRun {key}: {source}")]
    GetTaskRun { key: String, source: ClientError },

    #[error("failed to resolve TaskRun {key}: {source}")]
    Resolve { key: String, source: ClientError },

    #[error("failed to create workload for TaskRun {key}: {source}")]
    CreateWorkload { key: String, source: ClientError },

    #[error("failed to get workload {workload:?} of TaskRun {key}: {source}")]
    GetWorkload {
        key: String,
        workload: String,
        source: ClientError,
    },

    #[error("failed to update status of TaskRun {key}: {source}")]
    UpdateStatus { key: String, source: ClientError },
}

/// Reconciles TaskRuns against their workloads.
pub struct Reconciler {
    clients: Clients,
    config: Config,
}

impl Reconciler {
    pub fn new(clients: Clients, config: Config) -> Self {
        Self { clients, config }
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Reconcile the run named by `key` (`namespace/name`).
    ///
    /// The run's status is written back only when it changed, even when a
    /// transient error is returned.
    pub async fn reconcile(&self, key: &str) -> Result<(), ReconcileError> {
        let key = match ObjectKey::parse(key) {
            Ok(key) => key,
            Err(e) => {
                warn!(key, error = %e, "Invalid resource key");
                return Ok(());
            }
        };

        let mut run = match self.clients.task_runs.get_task_run(&key).await {
            Ok(run) => run,
            Err(e) if e.is_not_found() => {
                debug!(key = %key, "TaskRun no longer exists");
                return Ok(());
            }
            Err(e) => {
                error!(key = %key, error = %e, "Failed to get TaskRun");
                return Err(ReconcileError::GetTaskRun {
                    key: key.to_string(),
                    source: e,
                });
            }
        };

        if run.status.is_done() {
            debug!(key = %key, "TaskRun already finished");
            return Ok(());
        }

        let original = run.status.clone();
        let now = Utc::now();
        run.status.initialize_conditions(now);

        let outcome = self.reconcile_run(&mut run, now).await;

        let persisted = if run.status.same_state(&original) {
            Ok(())
        } else {
            self.clients
                .task_runs
                .update_status(&run)
                .await
                .map_err(|e| {
                    error!(key = %key, error = %e, "Failed to update TaskRun status");
                    ReconcileError::UpdateStatus {
                        key: key.to_string(),
                        source: e,
                    }
                })
        };

        outcome.and(persisted)
    }

    async fn reconcile_run(
        &self,
        run: &mut TaskRun,
        now: DateTime<Utc>,
    ) -> Result<(), ReconcileError> {
        if run.is_cancelled() {
            let message = format!("TaskRun {:?} was cancelled", run.name);
            self.stop(run, REASON_CANCELLED, message, now).await;
            return Ok(());
        }

        if let (Some(timeout), Some(started)) = (run.spec.timeout, run.status.start_time) {
            let timed_out = now
                .signed_duration_since(started)
                .to_std()
                .map(|elapsed| elapsed > timeout)
                .unwrap_or(false);
            if timed_out {
                let message = format!(
                    "TaskRun {:?} failed to finish within {:?}",
                    run.name,
                    duration::format(timeout)
                );
                self.stop(run, REASON_TIMEOUT, message, now).await;
                return Ok(());
            }
        }

        let resolved = match Resolver::new(&self.clients).resolve(run).await {
            Ok(resolved) => resolved,
            Err(ResolveError::Resolution(e)) => {
                warn!(
                    namespace = %run.namespace,
                    name = %run.name,
                    reason = REASON_FAILED_RESOLUTION,
                    error = %e,
                    "Failed to resolve TaskRun"
                );
                fail(run, REASON_FAILED_RESOLUTION, e.to_string(), now);
                return Ok(());
            }
            Err(ResolveError::Client(e)) => {
                error!(namespace = %run.namespace, name = %run.name, error = %e, "Lookup failed while resolving TaskRun");
                return Err(ReconcileError::Resolve {
                    key: run.key().to_string(),
                    source: e,
                });
            }
        };

        if let Err(e) = validate(&run.spec, &resolved) {
            warn!(
                namespace = %run.namespace,
                name = %run.name,
                reason = REASON_VALIDATION_FAILED,
                error = %e,
                "TaskRun failed validation"
            );
            fail(run, REASON_VALIDATION_FAILED, e.to_string(), now);
            return Ok(());
        }

        match run.status.pod_name.clone() {
            None => self.create_workload(run, &resolved, now).await,
            Some(workload) => self.observe_workload(run, &workload, now).await,
        }
    }

    async fn create_workload(
        &self,
        run: &mut TaskRun,
        resolved: &ResolvedTaskRun,
        now: DateTime<Utc>,
    ) -> Result<(), ReconcileError> {
        let steps = apply_replacements(&run.spec, resolved);
        let build = match Assembler::new(&self.config).assemble(run, resolved, steps) {
            Ok(build) => build,
            Err(e) => {
                warn!(
                    namespace = %run.namespace,
                    name = %run.name,
                    reason = REASON_FAILED_RESOLUTION,
                    error = %e,
                    "Failed to assemble workload"
                );
                fail(run, REASON_FAILED_RESOLUTION, e.to_string(), now);
                return Ok(());
            }
        };

        // A workload from an attempt whose status write was lost is adopted.
        match self
            .clients
            .workloads
            .find_workload(&run.namespace, &run.name)
            .await
        {
            Ok(Some(workload)) => {
                info!(
                    namespace = %run.namespace,
                    name = %run.name,
                    workload = %workload,
                    "Adopted existing workload for TaskRun"
                );
                mark_started(run, workload, now);
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => {
                error!(namespace = %run.namespace, name = %run.name, error = %e, "Failed to look up workload");
                return Err(ReconcileError::CreateWorkload {
                    key: run.key().to_string(),
                    source: e,
                });
            }
        }

        match self.clients.workloads.create_workload(&build).await {
            Ok(workload) => {
                info!(
                    namespace = %run.namespace,
                    name = %run.name,
                    workload = %workload,
                    steps = build.steps.len(),
                    "Created workload for TaskRun"
                );
                mark_started(run, workload, now);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                warn!(
                    namespace = %run.namespace,
                    name = %run.name,
                    reason = REASON_COULDNT_GET_TASK,
                    error = %e,
                    "Workload creation refused"
                );
                fail(
                    run,
                    REASON_COULDNT_GET_TASK,
                    format!("failed to create workload: {e}"),
                    now,
                );
                Ok(())
            }
            Err(e) => {
                error!(namespace = %run.namespace, name = %run.name, error = %e, "Failed to create workload");
                Err(ReconcileError::CreateWorkload {
                    key: run.key().to_string(),
                    source: e,
                })
            }
        }
    }

    async fn observe_workload(
        &self,
        run: &mut TaskRun,
        workload: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ReconcileError> {
        let reported = match self
            .clients
            .workloads
            .get_workload_status(&run.namespace, workload)
            .await
        {
            Ok(reported) => reported,
            Err(e) if e.is_not_found() => {
                warn!(
                    namespace = %run.namespace,
                    name = %run.name,
                    workload,
                    reason = REASON_WORKLOAD_LOST,
                    "Workload disappeared"
                );
                fail(
                    run,
                    REASON_WORKLOAD_LOST,
                    format!("workload {workload:?} no longer exists"),
                    now,
                );
                return Ok(());
            }
            Err(e) => {
                error!(
                    namespace = %run.namespace,
                    name = %run.name,
                    workload,
                    error = %e,
                    "Failed to get workload status"
                );
                return Err(ReconcileError::GetWorkload {
                    key: run.key().to_string(),
                    workload: workload.to_string(),
                    source: e,
                });
            }
        };

        run.status = reduce(&run.status, &reported);
        if let Some(cond) = run.status.succeeded().filter(|c| c.status.is_terminal()) {
            info!(
                namespace = %run.namespace,
                name = %run.name,
                status = ?cond.status,
                reason = %cond.reason,
                "TaskRun finished"
            );
        }
        Ok(())
    }

    /// Mark the run failed for `reason` and tear down its workload, if any.
    async fn stop(&self, run: &mut TaskRun, reason: &str, message: String, now: DateTime<Utc>) {
        info!(namespace = %run.namespace, name = %run.name, reason, "Stopping TaskRun");
        fail(run, reason, message, now);

        let Some(workload) = run.status.pod_name.as_deref() else {
            return;
        };
        match self
            .clients
            .workloads
            .delete_workload(&run.namespace, workload)
            .await
        {
            Ok(()) => debug!(namespace = %run.namespace, workload, "Deleted workload"),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(
                namespace = %run.namespace,
                workload,
                error = %e,
                "Failed to delete workload"
            ),
        }
    }
}

/// Set a terminal False condition and stamp the completion time.
fn fail(run: &mut TaskRun, reason: &str, message: String, now: DateTime<Utc>) {
    run.status
        .set_condition(Condition::succeeded(ConditionStatus::False, reason, message), now);
    run.status.completion_time = Some(now);
}

/// Record `workload` as the run's workload and mark the run Running.
fn mark_started(run: &mut TaskRun, workload: String, now: DateTime<Utc>) {
    run.status.pod_name = Some(workload);
    run.status.start_time = Some(now);
    run.status.set_condition(
        Condition::succeeded(ConditionStatus::Unknown, REASON_RUNNING, REASON_RUNNING),
        now,
    );
}
