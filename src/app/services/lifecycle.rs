// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use time::OffsetDateTime;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::types::{TaskRecord, TaskState, Transition};

const UNSPECIFIED_FAILURE: &str = "unspecified failure";

pub fn allowed_next(state: TaskState) -> &'static [TaskState] {
    match state {
        TaskState::Queued => &[TaskState::Staging, TaskState::Running, TaskState::Failed],
        TaskState::Staging => &[TaskState::Ready, TaskState::Failed],
        TaskState::Ready => &[TaskState::Running, TaskState::Failed],
        TaskState::Running => &[TaskState::Done, TaskState::Failed],
        TaskState::Done | TaskState::Failed => &[],
    }
}

pub fn can_transition(from: TaskState, to: TaskState) -> bool {
    allowed_next(from).contains(&to)
}

fn invalid_transition(from: TaskState, to: TaskState) -> AppError {
    AppError::with_message(
        AppErrorKind::FailedPrecondition,
        codes::INVALID_TRANSITION,
        format!("cannot move task from {from} to {to}"),
    )
}

/// Validates `transition` against the table and returns the updated copy.
/// `record` itself is never touched, so a rejected transition leaves no trace.
pub fn apply_transition(
    record: &TaskRecord,
    transition: Transition,
    now: OffsetDateTime,
) -> AppResult<TaskRecord> {
    let Transition {
        to,
        message,
        progress,
        error,
        scheduler_id,
    } = transition;

    if !can_transition(record.state, to) {
        return Err(invalid_transition(record.state, to).with_context(record.task_id.to_string()));
    }
    if error.is_some() && to != TaskState::Failed {
        return Err(AppError::invalid_argument(format!(
            "error text is only recorded on failed, not {to}"
        )));
    }

    let mut next = record.clone();
    next.state = to;
    if let Some(message) = message {
        next.message = message;
    }
    if let Some(progress) = progress {
        next.progress = progress.min(100);
    }
    if let Some(scheduler_id) = scheduler_id {
        next.scheduler_id = Some(scheduler_id);
    }
    if to == TaskState::Failed {
        next.error = Some(
            error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| UNSPECIFIED_FAILURE.to_string()),
        );
    }
    next.updated_at = now;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::types::TaskId;
    use time::Duration;

    const ALL: [TaskState; 6] = [
        TaskState::Queued,
        TaskState::Staging,
        TaskState::Ready,
        TaskState::Running,
        TaskState::Done,
        TaskState::Failed,
    ];

    fn record_in(state: TaskState) -> TaskRecord {
        let mut record = TaskRecord::queued(TaskId::new("t1").unwrap(), OffsetDateTime::UNIX_EPOCH);
        record.state = state;
        record.progress = 20;
        record.message = "before".to_string();
        record
    }

    #[test]
    fn table_matches_lifecycle() {
        let expected: [(TaskState, &[TaskState]); 6] = [
            (
                TaskState::Queued,
                &[TaskState::Staging, TaskState::Running, TaskState::Failed],
            ),
            (TaskState::Staging, &[TaskState::Ready, TaskState::Failed]),
            (TaskState::Ready, &[TaskState::Running, TaskState::Failed]),
            (TaskState::Running, &[TaskState::Done, TaskState::Failed]),
            (TaskState::Done, &[]),
            (TaskState::Failed, &[]),
        ];
        for (from, allowed) in expected {
            for to in ALL {
                assert_eq!(
                    can_transition(from, to),
                    allowed.contains(&to),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn rejected_transition_leaves_record_untouched() {
        let now = OffsetDateTime::UNIX_EPOCH + Duration::hours(1);
        for from in ALL {
            for to in ALL {
                if can_transition(from, to) {
                    continue;
                }
                let record = record_in(from);
                let before = record.clone();
                let err = apply_transition(
                    &record,
                    Transition::to(to).message("after").progress(90),
                    now,
                )
                .unwrap_err();
                assert_eq!(err.code(), codes::INVALID_TRANSITION);
                assert_eq!(record, before);
            }
        }
    }

    #[test]
    fn accepted_transition_stamps_fields() {
        let now = OffsetDateTime::UNIX_EPOCH + Duration::minutes(5);
        let record = record_in(TaskState::Queued);
        let next = apply_transition(
            &record,
            Transition::to(TaskState::Staging)
                .message("uploading")
                .progress(20),
            now,
        )
        .unwrap();
        assert_eq!(next.state, TaskState::Staging);
        assert_eq!(next.message, "uploading");
        assert_eq!(next.progress, 20);
        assert_eq!(next.updated_at, now);
        assert_eq!(next.created_at, record.created_at);
        assert!(next.error.is_none());
    }

    #[test]
    fn absent_fields_are_kept() {
        let record = record_in(TaskState::Staging);
        let next =
            apply_transition(&record, Transition::to(TaskState::Ready), OffsetDateTime::UNIX_EPOCH)
                .unwrap();
        assert_eq!(next.message, "before");
        assert_eq!(next.progress, 20);
    }

    #[test]
    fn failed_always_carries_error_text() {
        let record = record_in(TaskState::Staging);
        let next = apply_transition(
            &record,
            Transition::to(TaskState::Failed).error("  "),
            OffsetDateTime::UNIX_EPOCH,
        )
        .unwrap();
        assert_eq!(next.error.as_deref(), Some(UNSPECIFIED_FAILURE));

        let next = apply_transition(
            &record,
            Transition::to(TaskState::Failed).error("disk full"),
            OffsetDateTime::UNIX_EPOCH,
        )
        .unwrap();
        assert_eq!(next.error.as_deref(), Some("disk full"));
    }

    #[test]
    fn error_text_outside_failed_is_rejected() {
        let record = record_in(TaskState::Staging);
        let err = apply_transition(
            &record,
            Transition::to(TaskState::Ready).error("nope"),
            OffsetDateTime::UNIX_EPOCH,
        )
        .unwrap_err();
        assert_eq!(err.code(), codes::INVALID_ARGUMENT);
    }

    #[test]
    fn progress_is_clamped() {
        let record = record_in(TaskState::Staging);
        let next = apply_transition(
            &record,
            Transition::to(TaskState::Ready).progress(250),
            OffsetDateTime::UNIX_EPOCH,
        )
        .unwrap();
        assert_eq!(next.progress, 100);
    }

    #[test]
    fn failed_is_final() {
        let record = record_in(TaskState::Failed);
        for to in ALL {
            assert!(apply_transition(&record, Transition::to(to), OffsetDateTime::UNIX_EPOCH).is_err());
        }
    }
}
