// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::errors::{AppError, AppResult};
use crate::app::services::lifecycle;

/// Caller-visible correlation key of a staging task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Accepts any non-empty id that is safe to use as a single remote path segment.
    pub fn new(raw: impl Into<String>) -> AppResult<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::invalid_argument("task id cannot be empty"));
        }
        if trimmed == "." || trimmed == ".." || trimmed.contains('/') {
            return Err(AppError::invalid_argument(format!(
                "task id '{trimmed}' is not a valid path segment"
            )));
        }
        if trimmed.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(AppError::invalid_argument(format!(
                "task id '{trimmed}' contains whitespace or control characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Staging,
    Ready,
    Running,
    Done,
    Failed,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Staging => "staging",
            TaskState::Ready => "ready",
            TaskState::Running => "running",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed)
    }

    pub fn allowed_next(self) -> &'static [TaskState] {
        lifecycle::allowed_next(self)
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        lifecycle::can_transition(self, next)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub state: TaskState,
    pub progress: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_id: Option<i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl TaskRecord {
    pub fn queued(task_id: TaskId, now: OffsetDateTime) -> Self {
        Self {
            task_id,
            state: TaskState::Queued,
            progress: 0,
            message: "queued".to_string(),
            error: None,
            scheduler_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A requested state change. Absent fields leave the record untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub to: TaskState,
    pub message: Option<String>,
    pub progress: Option<u8>,
    pub error: Option<String>,
    pub scheduler_id: Option<i64>,
}

impl Transition {
    pub fn to(state: TaskState) -> Self {
        Self {
            to: state,
            message: None,
            progress: None,
            error: None,
            scheduler_id: None,
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn scheduler_id(mut self, scheduler_id: i64) -> Self {
        self.scheduler_id = Some(scheduler_id);
        self
    }
}

/// Remote host coordinates. Holds the identity file location, never the key itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub identity_path: PathBuf,
    pub known_hosts_path: Option<PathBuf>,
    pub remote_base: String,
}

/// What happens to the locally staged input once a staging run ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    #[default]
    Never,
    OnSuccess,
    Always,
}

impl CleanupPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            CleanupPolicy::Never => "never",
            CleanupPolicy::OnSuccess => "on_success",
            CleanupPolicy::Always => "always",
        }
    }

    pub fn removes_after(self, state: TaskState) -> bool {
        match self {
            CleanupPolicy::Never => false,
            CleanupPolicy::OnSuccess => state == TaskState::Ready,
            CleanupPolicy::Always => true,
        }
    }
}

/// One unit of staging work handed from ingress to the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingRequest {
    pub task_id: TaskId,
    pub local_path: PathBuf,
    pub extension: String,
}
