//! Work-queue driver that invokes the reconciler.
//!
//! Keys arrive from the [`WorkQueue`] handle and from the periodic resync.
//! Distinct keys reconcile concurrently; a key that is queued again while its
//! reconcile is in flight is run once more after it finishes. Failed
//! reconciles are requeued with capped exponential backoff.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::{self, JoinSet};
use tracing::{debug, error, info, warn};

use crate::client::ClientError;
use crate::config::Config;
use crate::reconciler::{ReconcileError, Reconciler};

/// Handle for enqueueing run keys (`namespace/name`).
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<String>,
}

impl WorkQueue {
    /// Queue `key` for reconciliation. Returns false once the controller
    /// has stopped.
    pub fn enqueue(&self, key: impl Into<String>) -> bool {
        self.tx.send(key.into()).is_ok()
    }
}

pub struct Controller {
    reconciler: Arc<Reconciler>,
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl Controller {
    pub fn new(reconciler: Reconciler) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            reconciler: Arc::new(reconciler),
            tx,
            rx,
        }
    }

    pub fn queue(&self) -> WorkQueue {
        WorkQueue {
            tx: self.tx.clone(),
        }
    }

    /// Reconcile every known run once, in key order.
    ///
    /// Returns the number of runs whose reconcile failed.
    pub async fn sync_once(&self) -> Result<usize, ClientError> {
        let keys = self.reconciler.clients().task_runs.list_task_runs().await?;
        let mut failed = 0;
        for key in keys {
            if let Err(e) = self.reconciler.reconcile(&key.to_string()).await {
                warn!(key = %key, error = %e, "Reconcile failed");
                failed += 1;
            }
        }
        Ok(failed)
    }

    /// Process keys until `shutdown` flips to true (or its sender is
    /// dropped). In-flight reconciles are awaited before returning.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let config = self.reconciler.config().clone();
        let mut resync = tokio::time::interval(Duration::from_secs(
            config.resync_interval_secs.max(1),
        ));

        let mut in_flight: JoinSet<(String, Result<(), ReconcileError>)> = JoinSet::new();
        let mut active: HashSet<String> = HashSet::new();
        let mut dirty: HashSet<String> = HashSet::new();
        let mut attempts: HashMap<String, u32> = HashMap::new();
        let mut keys_by_task: HashMap<task::Id, String> = HashMap::new();

        info!(
            resync_interval_secs = config.resync_interval_secs,
            "Starting TaskRun controller"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested, stopping controller");
                        break;
                    }
                }

                _ = resync.tick() => {
                    match self.reconciler.clients().task_runs.list_task_runs().await {
                        Ok(keys) => {
                            debug!(count = keys.len(), "Resync");
                            for key in keys {
                                let _ = self.tx.send(key.to_string());
                            }
                        }
                        Err(e) => warn!(error = %e, "Failed to list TaskRuns for resync"),
                    }
                }

                Some(key) = self.rx.recv() => {
                    if active.contains(&key) {
                        dirty.insert(key);
                        continue;
                    }
                    active.insert(key.clone());
                    let task_key = key.clone();
                    let reconciler = self.reconciler.clone();
                    let handle = in_flight.spawn(async move {
                        let result = reconciler.reconcile(&key).await;
                        (key, result)
                    });
                    keys_by_task.insert(handle.id(), task_key);
                }

                Some(joined) = in_flight.join_next_with_id() => {
                    let (key, result) = match joined {
                        Ok((id, done)) => {
                            keys_by_task.remove(&id);
                            done
                        }
                        Err(e) => {
                            let Some(key) = keys_by_task.remove(&e.id()) else {
                                error!(error = %e, "Reconcile task panicked");
                                continue;
                            };
                            active.remove(&key);
                            dirty.remove(&key);
                            let (attempt, delay) = self.requeue(key.clone(), &mut attempts, &config);
                            error!(
                                key = %key,
                                error = %e,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "Reconcile task panicked, requeueing"
                            );
                            continue;
                        }
                    };
                    active.remove(&key);

                    match result {
                        Ok(()) => {
                            attempts.remove(&key);
                            if dirty.remove(&key) {
                                let _ = self.tx.send(key);
                            }
                        }
                        Err(e) => {
                            dirty.remove(&key);
                            let (attempt, delay) = self.requeue(key.clone(), &mut attempts, &config);
                            warn!(
                                key = %key,
                                error = %e,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "Reconcile failed, requeueing"
                            );
                        }
                    }
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Ok((key, Err(e))) = joined {
                warn!(key = %key, error = %e, "Reconcile failed during shutdown");
            }
        }
        info!("TaskRun controller stopped");
    }

    /// Send `key` again once the backoff for its next attempt has elapsed.
    /// Returns the attempt number and the delay.
    fn requeue(
        &self,
        key: String,
        attempts: &mut HashMap<String, u32>,
        config: &Config,
    ) -> (u32, Duration) {
        let attempt = attempts.entry(key.clone()).or_insert(0);
        let delay = config.requeue_delay(*attempt);
        *attempt += 1;
        let attempt = *attempt;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(key);
        });
        (attempt, delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use crate::client::{Clients, TaskRunClient};
    use crate::state::{InMemoryCluster, Verb, KIND_WORKLOAD};
    use taskrun_core::{ObjectKey, Step, Task, TaskRef, TaskRun, TaskRunSpec, TaskSpec};

    /// Panics on the first `get_task_run`, then delegates to the cluster.
    struct PanicsOnce {
        cluster: Arc<InMemoryCluster>,
        panicked: AtomicBool,
    }

    #[async_trait]
    impl TaskRunClient for PanicsOnce {
        async fn get_task_run(&self, key: &ObjectKey) -> Result<TaskRun, ClientError> {
            if !self.panicked.swap(true, Ordering::SeqCst) {
                panic!("get_task_run blew up");
            }
            self.cluster.get_task_run(key).await
        }

        async fn list_task_runs(&self) -> Result<Vec<ObjectKey>, ClientError> {
            self.cluster.list_task_runs().await
        }

        async fn update_status(&self, run: &TaskRun) -> Result<(), ClientError> {
            self.cluster.update_status(run).await
        }
    }

    fn cluster_with_run() -> (Arc<InMemoryCluster>, ObjectKey) {
        let task = Task::new(
            "test-task",
            "foo",
            TaskSpec::new(vec![Step::new("simple-step", "foo").with_command(["/mycmd"])]),
        );
        let run = TaskRun::new("tr", "foo", TaskRunSpec::for_task(TaskRef::new("test-task")));
        let key = run.key();
        let cluster = InMemoryCluster::new()
            .with_task(task)
            .with_task_run(run)
            .with_service_account("foo", "default");
        (Arc::new(cluster), key)
    }

    fn controller(cluster: &Arc<InMemoryCluster>, config: Config) -> Controller {
        Controller::new(Reconciler::new(Clients::from_shared(cluster.clone()), config))
    }

    async fn wait_for_workload(cluster: &InMemoryCluster, key: &ObjectKey) -> String {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(name) = cluster
                    .task_run(key)
                    .await
                    .and_then(|run| run.status.pod_name)
                {
                    return name;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("run never got a workload")
    }

    #[tokio::test]
    async fn test_sync_once_reconciles_every_run() {
        let (cluster, key) = cluster_with_run();
        let failed = controller(&cluster, Config::default())
            .sync_once()
            .await
            .unwrap();
        assert_eq!(failed, 0);
        assert!(cluster.task_run(&key).await.unwrap().status.pod_name.is_some());
    }

    #[tokio::test]
    async fn test_sync_once_counts_failures() {
        let (cluster, _) = cluster_with_run();
        cluster.fail_on(Verb::Create, KIND_WORKLOAD, "quota exceeded");
        let failed = controller(&cluster, Config::default())
            .sync_once()
            .await
            .unwrap();
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn test_enqueued_key_is_reconciled() {
        let (cluster, key) = cluster_with_run();
        let config = Config {
            resync_interval_secs: 3600,
            ..Config::default()
        };
        let controller = controller(&cluster, config);
        let queue = controller.queue();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(controller.run(shutdown_rx));

        assert!(queue.enqueue(key.to_string()));
        wait_for_workload(&cluster, &key).await;

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(!queue.enqueue(key.to_string()));
    }

    #[tokio::test]
    async fn test_failed_reconcile_is_retried() {
        let (cluster, key) = cluster_with_run();
        cluster.fail_on(Verb::Create, KIND_WORKLOAD, "quota exceeded");
        let config = Config {
            requeue_base_delay_ms: 1,
            requeue_max_delay_secs: 1,
            ..Config::default()
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(controller(&cluster, config).run(shutdown_rx));

        tokio::time::timeout(Duration::from_secs(5), async {
            while cluster
                .actions_on(KIND_WORKLOAD)
                .iter()
                .filter(|a| a.verb == Verb::Create)
                .count()
                < 2
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("reconcile was not retried");

        cluster.clear_failures();
        wait_for_workload(&cluster, &key).await;

        drop(shutdown_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_panicked_reconcile_is_retried() {
        let (cluster, key) = cluster_with_run();
        let mut clients = Clients::from_shared(cluster.clone());
        let flaky = Arc::new(PanicsOnce {
            cluster: cluster.clone(),
            panicked: AtomicBool::new(false),
        });
        clients.task_runs = flaky.clone();
        let config = Config {
            resync_interval_secs: 3600,
            requeue_base_delay_ms: 1,
            requeue_max_delay_secs: 1,
            ..Config::default()
        };
        let controller = Controller::new(Reconciler::new(clients, config));
        let queue = controller.queue();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(controller.run(shutdown_rx));

        assert!(queue.enqueue(key.to_string()));
        wait_for_workload(&cluster, &key).await;
        assert!(flaky.panicked.load(Ordering::SeqCst));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
