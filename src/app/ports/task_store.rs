// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::{AppError, AppResult};
use crate::app::types::{TaskId, TaskRecord, Transition};

#[async_trait]
/// Authoritative repository of task records.
/// Every mutation goes through `apply`, which validates and writes under one lock.
pub trait TaskStorePort: Send + Sync {
    async fn create(&self, id: &TaskId) -> AppResult<TaskRecord>;

    async fn get(&self, id: &TaskId) -> AppResult<Option<TaskRecord>>;

    async fn apply(&self, id: &TaskId, transition: Transition) -> AppResult<TaskRecord>;

    async fn list(&self) -> AppResult<Vec<TaskRecord>>;

    async fn require(&self, id: &TaskId) -> AppResult<TaskRecord> {
        self.get(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("task {id} not found")))
    }
}
