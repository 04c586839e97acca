// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs as tokiofs;
use tokio::io::{AsyncWriteExt, BufReader};

use crate::app::dispatch::StagingDispatcher;
use crate::app::errors::{AppError, AppResult};
use crate::app::services::remote_path::extension_of;
use crate::app::types::{StagingRequest, TaskId, TaskRecord};
use crate::app::usecases::UseCases;

const COPY_BUFFER_BYTES: usize = 256 * 1024;

/// Hands local files to the staging pipeline.
///
/// Stands in for an upload endpoint: the file is materialized under `staging_dir`,
/// a task is created and the staging run is queued. `accept` never waits for the
/// remote side.
#[derive(Clone)]
pub struct LocalIngress {
    staging_dir: PathBuf,
    usecases: UseCases,
    dispatcher: Arc<StagingDispatcher>,
}

impl LocalIngress {
    pub fn new(
        staging_dir: impl Into<PathBuf>,
        usecases: UseCases,
        dispatcher: Arc<StagingDispatcher>,
    ) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            usecases,
            dispatcher,
        }
    }

    #[tracing::instrument(name = "ingress", level = "debug", skip(self, source), fields(source = %source.display()))]
    pub async fn accept(&self, source: &Path) -> AppResult<TaskRecord> {
        let meta = tokiofs::metadata(source).await.map_err(|err| {
            AppError::invalid_argument(format!("cannot read {}: {err}", source.display()))
        })?;
        if !meta.is_file() {
            return Err(AppError::invalid_argument(format!(
                "{} is not a regular file",
                source.display()
            )));
        }

        let task_id = TaskId::generate();
        let extension = extension_of(source);
        let local_path = self
            .staging_dir
            .join(format!("{}{}", task_id.as_str(), extension));
        copy_into_staging(source, &local_path).await?;

        let record = match self.usecases.create_task(Some(task_id.clone())).await {
            Ok(record) => record,
            Err(err) => {
                let _ = tokiofs::remove_file(&local_path).await;
                return Err(err);
            }
        };

        let request = StagingRequest {
            task_id: task_id.clone(),
            local_path,
            extension,
        };
        if let Err(err) = self.dispatcher.schedule_staging(request).await {
            tracing::warn!(task_id = %task_id, "could not schedule staging: {err}");
            self.usecases
                .fail_task(&task_id, "upload failed", err.to_string())
                .await?;
            return Err(err);
        }
        Ok(record)
    }
}

async fn copy_into_staging(source: &Path, target: &Path) -> AppResult<()> {
    if let Some(parent) = target.parent() {
        tokiofs::create_dir_all(parent).await.map_err(|err| {
            AppError::local(format!(
                "failed to create staging dir {}: {err}",
                parent.display()
            ))
        })?;
    }
    let result = async {
        let input = tokiofs::File::open(source).await?;
        let mut reader = BufReader::with_capacity(COPY_BUFFER_BYTES, input);
        let mut output = tokiofs::File::create(target).await?;
        let copied = tokio::io::copy_buf(&mut reader, &mut output).await?;
        output.flush().await?;
        Ok::<u64, std::io::Error>(copied)
    }
    .await;

    match result {
        Ok(bytes) => {
            tracing::debug!(bytes, "materialized {}", target.display());
            Ok(())
        }
        Err(err) => {
            let _ = tokiofs::remove_file(target).await;
            Err(AppError::local(format!(
                "failed to copy {} into {}: {err}",
                source.display(),
                target.display()
            )))
        }
    }
}
