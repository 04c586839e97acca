// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error as ThisError;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{
    RemoteTransportPort, TaskStorePort, TelemetryEvent, TelemetryPort, TransportError,
};
use crate::app::services::job_script::JobScriptBuilder;
use crate::app::services::remote_path::StagingPaths;
use crate::app::services::slurm::{
    parse_job_id, sacct_command, sacct_terminal_state, sbatch_command,
};
use crate::app::types::{
    CleanupPolicy, ConnectionProfile, StagingRequest, TaskId, TaskRecord, TaskState, Transition,
};

const STAGING_PROGRESS: u8 = 20;
const DONE_PROGRESS: u8 = 100;

#[derive(Debug, Clone, Copy)]
pub struct StagingSettings {
    /// Deadline for one whole staging run.
    pub pipeline_timeout: Duration,
    pub cleanup: CleanupPolicy,
}

/// Why a staging run ended in `failed`.
#[derive(Debug, ThisError)]
enum StagingFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Invalid(AppError),
    #[error("{}: staging did not finish within {}s", codes::TIMEOUT, .0.as_secs())]
    Deadline(Duration),
}

#[derive(Clone)]
pub struct UseCases {
    tasks: Arc<dyn TaskStorePort>,
    transport: Arc<dyn RemoteTransportPort>,
    telemetry: Arc<dyn TelemetryPort>,
    profile: Arc<ConnectionProfile>,
    job_script: Arc<JobScriptBuilder>,
    settings: StagingSettings,
}

impl UseCases {
    pub fn new(
        tasks: Arc<dyn TaskStorePort>,
        transport: Arc<dyn RemoteTransportPort>,
        telemetry: Arc<dyn TelemetryPort>,
        profile: ConnectionProfile,
        job_script: JobScriptBuilder,
        settings: StagingSettings,
    ) -> Self {
        Self {
            tasks,
            transport,
            telemetry,
            profile: Arc::new(profile),
            job_script: Arc::new(job_script),
            settings,
        }
    }

    pub async fn create_task(&self, id: Option<TaskId>) -> AppResult<TaskRecord> {
        let id = id.unwrap_or_else(TaskId::generate);
        let record = self.tasks.create(&id).await?;
        self.emit("task.created", &record, None);
        Ok(record)
    }

    pub async fn get_task(&self, id: &TaskId) -> AppResult<TaskRecord> {
        self.tasks.require(id).await
    }

    pub async fn list_tasks(&self) -> AppResult<Vec<TaskRecord>> {
        self.tasks.list().await
    }

    /// Drives one task from `queued` to `ready` or `failed`.
    ///
    /// Transport failures, invalid remote layout and the run deadline all end in
    /// `failed` with the cause in `error`; they are never returned. Only store errors
    /// surface here: an unknown task or a task that cannot enter `staging`.
    /// Callers must not run two stagings of the same task concurrently.
    #[tracing::instrument(
        name = "staging",
        level = "info",
        skip(self, request),
        fields(task_id = %request.task_id, local = %request.local_path.display())
    )]
    pub async fn stage(&self, request: StagingRequest) -> AppResult<TaskRecord> {
        let StagingRequest {
            task_id,
            local_path,
            extension,
        } = request;

        self.tasks.require(&task_id).await?;
        let record = self
            .tasks
            .apply(
                &task_id,
                Transition::to(TaskState::Staging)
                    .message("uploading")
                    .progress(STAGING_PROGRESS),
            )
            .await?;
        self.emit("staging.started", &record, None);

        let deadline = self.settings.pipeline_timeout;
        let outcome = match tokio::time::timeout(
            deadline,
            self.run_staging_steps(&task_id, &local_path, &extension),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(StagingFailure::Deadline(deadline)),
        };

        let record = match outcome {
            Ok(paths) => {
                let record = self
                    .tasks
                    .apply(
                        &task_id,
                        Transition::to(TaskState::Ready)
                            .message("uploaded")
                            .progress(DONE_PROGRESS),
                    )
                    .await?;
                self.emit("staging.ready", &record, Some(paths.remote_dir));
                record
            }
            Err(failure) => {
                tracing::warn!("staging failed: {failure}");
                let record = self
                    .tasks
                    .apply(
                        &task_id,
                        Transition::to(TaskState::Failed)
                            .message("upload failed")
                            .error(failure.to_string()),
                    )
                    .await?;
                self.emit("staging.failed", &record, None);
                record
            }
        };

        self.cleanup_local(&local_path, record.state).await;
        Ok(record)
    }

    // Strictly ordered: each step relies on the side effect of the previous one.
    async fn run_staging_steps(
        &self,
        task_id: &TaskId,
        local_path: &Path,
        extension: &str,
    ) -> Result<StagingPaths, StagingFailure> {
        let paths = StagingPaths::new(&self.profile.remote_base, task_id, extension)
            .map_err(StagingFailure::Invalid)?;
        // nothing touches the remote until the script renders
        let script = self
            .job_script
            .build(&paths.remote_dir, &paths.remote_input_path)
            .map_err(StagingFailure::Invalid)?;
        self.transport
            .make_directory(&self.profile, &paths.remote_dir)
            .await?;
        self.transport
            .upload_file(&self.profile, local_path, &paths.remote_input_path)
            .await?;
        self.transport
            .upload_text(&self.profile, &script, &paths.job_script_path)
            .await?;
        Ok(paths)
    }

    async fn cleanup_local(&self, local_path: &Path, state: TaskState) {
        if !self.settings.cleanup.removes_after(state) {
            return;
        }
        match tokio::fs::remove_file(local_path).await {
            Ok(()) => tracing::debug!("removed staged input {}", local_path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(
                "failed to remove staged input {}: {err}",
                local_path.display()
            ),
        }
    }

    /// Submits the staged job script; `ready` becomes `running` or `failed`.
    pub async fn submit_job(&self, id: &TaskId) -> AppResult<TaskRecord> {
        let record = self.tasks.require(id).await?;
        if record.state != TaskState::Ready {
            return Err(AppError::with_message(
                AppErrorKind::FailedPrecondition,
                codes::INVALID_TRANSITION,
                format!("task {id} must be ready to submit, it is {}", record.state),
            ));
        }
        let paths = StagingPaths::new(&self.profile.remote_base, id, "")?;
        let command = sbatch_command(&paths.job_script_path, Some(&paths.remote_dir));

        let submitted = self
            .transport
            .run_command(&self.profile, &command)
            .await
            .map_err(|err| err.to_string())
            .and_then(|stdout| {
                parse_job_id(&stdout).ok_or_else(|| {
                    format!(
                        "could not find a job id in sbatch output: {}",
                        stdout.trim()
                    )
                })
            });

        match submitted {
            Ok(job_id) => {
                let record = self
                    .tasks
                    .apply(
                        id,
                        Transition::to(TaskState::Running)
                            .message("submitted")
                            .scheduler_id(job_id),
                    )
                    .await?;
                self.emit("job.submitted", &record, Some(paths.job_script_path));
                Ok(record)
            }
            Err(reason) => {
                let record = self
                    .tasks
                    .apply(
                        id,
                        Transition::to(TaskState::Failed)
                            .message("submit failed")
                            .error(reason),
                    )
                    .await?;
                self.emit("job.finished", &record, None);
                Ok(record)
            }
        }
    }

    /// Polls the scheduler once. A task whose job is still live comes back unchanged.
    pub async fn refresh_job(&self, id: &TaskId) -> AppResult<TaskRecord> {
        let record = self.tasks.require(id).await?;
        if record.state != TaskState::Running {
            return Err(AppError::with_message(
                AppErrorKind::FailedPrecondition,
                codes::INVALID_TRANSITION,
                format!("task {id} is {}, not running", record.state),
            ));
        }
        let Some(job_id) = record.scheduler_id else {
            return Err(AppError::with_message(
                AppErrorKind::FailedPrecondition,
                codes::INVALID_ARGUMENT,
                format!("task {id} is running without a scheduler id"),
            ));
        };

        let output = self
            .transport
            .run_command(&self.profile, &sacct_command(job_id))
            .await?;
        let Some(state) = sacct_terminal_state(&output) else {
            tracing::debug!(task_id = %id, job_id, "job still active");
            return Ok(record);
        };

        let transition = if state == "COMPLETED" {
            Transition::to(TaskState::Done)
                .message("completed")
                .progress(DONE_PROGRESS)
        } else {
            Transition::to(TaskState::Failed)
                .message("job failed")
                .error(format!("job {job_id} ended in state {state}"))
        };
        let record = self.tasks.apply(id, transition).await?;
        self.emit("job.finished", &record, None);
        Ok(record)
    }

    /// Polls until staging settles in `ready` or a terminal state.
    /// A task that never leaves `queued` or `staging` within `deadline` is a timeout.
    pub async fn wait_for_staging(
        &self,
        id: &TaskId,
        poll: Duration,
        deadline: Duration,
    ) -> AppResult<TaskRecord> {
        let settled = async {
            let mut ticker = tokio::time::interval(poll);
            loop {
                ticker.tick().await;
                let record = self.tasks.require(id).await?;
                if record.state == TaskState::Ready || record.state.is_terminal() {
                    return Ok::<TaskRecord, AppError>(record);
                }
            }
        };
        match tokio::time::timeout(deadline, settled).await {
            Ok(result) => result,
            Err(_) => {
                let state = self.tasks.require(id).await?.state;
                Err(AppError::with_message(
                    AppErrorKind::FailedPrecondition,
                    codes::TIMEOUT,
                    format!(
                        "task {id} still {state} after {}s",
                        deadline.as_secs()
                    ),
                ))
            }
        }
    }

    /// Refreshes a running job every `interval` until it finishes.
    /// Gives up with the last error after `max_check_errors` failed checks in a row.
    pub async fn follow_job(
        &self,
        id: &TaskId,
        interval: Duration,
        max_check_errors: u32,
    ) -> AppResult<TaskRecord> {
        let mut record = self.tasks.require(id).await?;
        let mut errors = 0;
        while record.state == TaskState::Running {
            tokio::time::sleep(interval).await;
            match self.refresh_job(id).await {
                Ok(next) => {
                    errors = 0;
                    record = next;
                }
                Err(err) if err.kind() == AppErrorKind::Remote => {
                    errors += 1;
                    tracing::warn!(task_id = %id, errors, "job check failed: {err}");
                    if errors >= max_check_errors {
                        return Err(err.with_context(format!("{errors} job checks failed in a row")));
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Ok(record)
    }

    /// Marks a task `failed` from outside the pipeline, e.g. when it could not be queued.
    pub async fn fail_task(
        &self,
        id: &TaskId,
        message: &str,
        error: impl Into<String>,
    ) -> AppResult<TaskRecord> {
        let record = self
            .tasks
            .apply(
                id,
                Transition::to(TaskState::Failed)
                    .message(message)
                    .error(error),
            )
            .await?;
        self.emit("staging.failed", &record, None);
        Ok(record)
    }

    pub async fn run_command(&self, command: &str) -> AppResult<String> {
        if command.trim().is_empty() {
            return Err(AppError::invalid_argument("command cannot be empty"));
        }
        Ok(self.transport.run_command(&self.profile, command).await?)
    }

    pub async fn fetch(&self, remote_path: &str, local_path: &Path) -> AppResult<()> {
        if remote_path.trim().is_empty() {
            return Err(AppError::invalid_argument("remote path cannot be empty"));
        }
        Ok(self
            .transport
            .download_file(&self.profile, remote_path, local_path)
            .await?)
    }

    fn emit(&self, name: &'static str, record: &TaskRecord, remote_path: Option<String>) {
        self.telemetry.event(
            name,
            TelemetryEvent {
                task_id: Some(record.task_id.to_string()),
                state: Some(record.state.as_str()),
                host: Some(self.profile.host.clone()),
                remote_path,
                scheduler_id: record.scheduler_id,
                error: record.error.clone(),
            },
        );
    }
}
