//! Prometheus metrics collection and formatting.
//!
//! This module provides metrics in Prometheus text exposition format.

use std::collections::BTreeMap;
use std::fmt::Write;

use taskrun_core::{ConditionStatus, TaskRun};

use crate::client::{ClientError, TaskRunClient};

/// Fetch every run and format its metrics as Prometheus text.
pub async fn collect_metrics(client: &dyn TaskRunClient) -> Result<String, ClientError> {
    let mut runs = Vec::new();
    for key in client.list_task_runs().await? {
        match client.get_task_run(&key).await {
            Ok(run) => runs.push(run),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(render_metrics(&runs))
}

/// Format metrics for `runs`.
pub fn render_metrics(runs: &[TaskRun]) -> String {
    let mut output = String::new();

    collect_status_metrics(runs, &mut output);
    collect_reason_metrics(runs, &mut output);

    output
}

/// Runs by the status of their `Succeeded` condition.
fn collect_status_metrics(runs: &[TaskRun], output: &mut String) {
    let mut unknown = 0u64;
    let mut succeeded = 0u64;
    let mut failed = 0u64;

    for run in runs {
        match run.status.succeeded().map(|c| c.status) {
            Some(ConditionStatus::True) => succeeded += 1,
            Some(ConditionStatus::False) => failed += 1,
            Some(ConditionStatus::Unknown) | None => unknown += 1,
        }
    }

    writeln!(
        output,
        "# HELP taskrun_task_runs Number of TaskRuns by Succeeded condition status"
    )
    .ok();
    writeln!(output, "# TYPE taskrun_task_runs gauge").ok();
    writeln!(output, "taskrun_task_runs{{status=\"unknown\"}} {unknown}").ok();
    writeln!(output, "taskrun_task_runs{{status=\"true\"}} {succeeded}").ok();
    writeln!(output, "taskrun_task_runs{{status=\"false\"}} {failed}").ok();
}

/// Finished runs by condition reason.
fn collect_reason_metrics(runs: &[TaskRun], output: &mut String) {
    let mut by_reason: BTreeMap<&str, u64> = BTreeMap::new();
    for run in runs {
        if let Some(cond) = run.status.succeeded().filter(|c| c.status.is_terminal()) {
            *by_reason.entry(cond.reason.as_str()).or_default() += 1;
        }
    }

    writeln!(
        output,
        "# HELP taskrun_task_runs_finished Number of finished TaskRuns by reason"
    )
    .ok();
    writeln!(output, "# TYPE taskrun_task_runs_finished gauge").ok();
    for (reason, count) in by_reason {
        writeln!(
            output,
            "taskrun_task_runs_finished{{reason=\"{}\"}} {count}",
            escape_label(reason)
        )
        .ok();
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
