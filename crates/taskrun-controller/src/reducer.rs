//! Reduces a workload's low-level status into the run's status.

use taskrun_core::{Condition, ConditionStatus, TaskRunStatus, WorkloadStatus, CONDITION_SUCCEEDED};

/// Reason (and message) while the workload has not reported a condition.
pub const REASON_RUNNING: &str = "Running";

/// Compute the run status implied by `workload`.
///
/// Pure: the result depends only on the two arguments. The workload's
/// `Succeeded` condition is copied verbatim; without one the run is
/// Unknown/Running with no step states. Workload name and timestamps are
/// copied when the workload reports them and kept otherwise. A run that has
/// already settled on True or False keeps that condition.
pub fn reduce(current: &TaskRunStatus, workload: &WorkloadStatus) -> TaskRunStatus {
    let mut next = current.clone();
    let previous = current.succeeded();

    let (mut condition, steps) = match workload.succeeded() {
        Some(reported) => (reported.clone(), workload.step_states.clone()),
        None => (
            Condition::succeeded(ConditionStatus::Unknown, REASON_RUNNING, REASON_RUNNING),
            Vec::new(),
        ),
    };

    let keep_terminal = previous
        .map(|p| p.status.is_terminal() && condition.status == ConditionStatus::Unknown)
        .unwrap_or(false);

    if !keep_terminal {
        if condition.last_transition_time.is_none() {
            condition.last_transition_time = previous
                .filter(|p| p.status == condition.status)
                .and_then(|p| p.last_transition_time)
                .or(if condition.status.is_terminal() {
                    workload.completion_time
                } else {
                    None
                })
                .or(workload.start_time);
        }
        match next.conditions.iter_mut().find(|c| c.type_ == CONDITION_SUCCEEDED) {
            Some(existing) => *existing = condition,
            None => next.conditions.push(condition),
        }
        next.steps = steps;
    }

    if let Some(name) = &workload.pod_name {
        next.pod_name = Some(name.clone());
    }
    if workload.start_time.is_some() {
        next.start_time = workload.start_time;
    }
    if workload.completion_time.is_some() {
        next.completion_time = workload.completion_time;
    }

    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use taskrun_core::{ContainerState, StepState};

    fn cond(status: ConditionStatus, reason: &str) -> Condition {
        Condition::succeeded(status, reason, reason)
    }

    fn strip_times(mut status: TaskRunStatus) -> TaskRunStatus {
        for c in &mut status.conditions {
            c.last_transition_time = None;
        }
        status
    }

    #[test]
    fn test_empty_workload_status_is_running() {
        let out = reduce(&TaskRunStatus::default(), &WorkloadStatus::default());
        assert_eq!(
            strip_times(out),
            TaskRunStatus {
                conditions: vec![cond(ConditionStatus::Unknown, "Running")],
                steps: vec![],
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_validation_failure_is_copied_verbatim() {
        let failed = Condition::succeeded(
            ConditionStatus::False,
            "BuildValidationFailed",
            r#"serviceaccounts "missing-sa" not-found"#,
        );
        let workload = WorkloadStatus {
            conditions: vec![failed.clone()],
            ..Default::default()
        };
        let out = reduce(&TaskRunStatus::default(), &workload);
        assert_eq!(strip_times(out.clone()).conditions, vec![failed]);
        assert!(out.steps.is_empty());
    }

    #[test]
    fn test_running_and_completed_workloads() {
        let start = Utc.with_ymd_and_hms(2018, 11, 10, 23, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2018, 11, 10, 23, 8, 0).unwrap();
        let completed = StepState::new("step-a", ContainerState::terminated(0, "success"));
        let failed = StepState::new("step-b", ContainerState::terminated(127, "oh-my-lord"));

        let running = WorkloadStatus {
            conditions: vec![cond(ConditionStatus::Unknown, "Running build")],
            step_states: vec![StepState::new("step-a", ContainerState::waiting("bar", "foo"))],
            pod_name: Some("im-am-the-pod".into()),
            start_time: Some(start),
            completion_time: None,
        };
        let out = reduce(&TaskRunStatus::default(), &running);
        assert_eq!(out.succeeded().unwrap().reason, "Running build");
        assert_eq!(out.steps, running.step_states);
        assert_eq!(out.pod_name.as_deref(), Some("im-am-the-pod"));
        assert_eq!(out.start_time, Some(start));
        assert_eq!(out.completion_time, None);

        let done = WorkloadStatus {
            conditions: vec![cond(ConditionStatus::False, "Build failed")],
            step_states: vec![completed.clone(), failed.clone()],
            completion_time: Some(end),
            ..running
        };
        let out = reduce(&out, &done);
        let c = out.succeeded().unwrap();
        assert_eq!(c.status, ConditionStatus::False);
        assert_eq!(c.last_transition_time, Some(end));
        assert_eq!(out.steps, vec![completed, failed]);
        assert_eq!(out.completion_time, Some(end));
        assert_eq!(out.conditions.len(), 1);
    }

    #[test]
    fn test_reduce_is_pure() {
        let workload = WorkloadStatus {
            conditions: vec![cond(ConditionStatus::True, "Build succeeded")],
            ..Default::default()
        };
        let current = TaskRunStatus::default();
        assert_eq!(reduce(&current, &workload), reduce(&current, &workload));
        assert_eq!(
            reduce(&current, &WorkloadStatus::default()),
            reduce(&current, &WorkloadStatus::default())
        );
    }

    #[test]
    fn test_terminal_condition_is_never_reopened() {
        let current = TaskRunStatus {
            conditions: vec![cond(ConditionStatus::True, "Build succeeded")],
            ..Default::default()
        };
        let out = reduce(&current, &WorkloadStatus::default());
        assert_eq!(out.succeeded().unwrap().status, ConditionStatus::True);
    }

    #[test]
    fn test_recorded_workload_name_survives_missing_report() {
        let current = TaskRunStatus {
            pod_name: Some("tr-pod-abc123".into()),
            ..Default::default()
        };
        let out = reduce(&current, &WorkloadStatus::default());
        assert_eq!(out.pod_name.as_deref(), Some("tr-pod-abc123"));
    }
}
