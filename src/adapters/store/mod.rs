// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ClockPort, TaskStorePort};
use crate::app::services::lifecycle::apply_transition;
use crate::app::types::{TaskId, TaskRecord, Transition};

/// Process-lifetime task repository. Nothing survives a restart.
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, TaskRecord>>,
    clock: Arc<dyn ClockPort>,
}

impl InMemoryTaskStore {
    pub fn new(clock: Arc<dyn ClockPort>) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            clock,
        }
    }
}

#[async_trait]
impl TaskStorePort for InMemoryTaskStore {
    async fn create(&self, id: &TaskId) -> AppResult<TaskRecord> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(id) {
            return Err(AppError::with_message(
                AppErrorKind::AlreadyExists,
                codes::DUPLICATE_KEY,
                format!("task {id} already exists"),
            ));
        }
        let record = TaskRecord::queued(id.clone(), self.clock.now_utc());
        tasks.insert(id.clone(), record.clone());
        Ok(record)
    }

    async fn get(&self, id: &TaskId) -> AppResult<Option<TaskRecord>> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn apply(&self, id: &TaskId, transition: Transition) -> AppResult<TaskRecord> {
        let mut tasks = self.tasks.write().await;
        let current = tasks
            .get(id)
            .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;
        let next = apply_transition(current, transition, self.clock.now_utc())?;
        tasks.insert(id.clone(), next.clone());
        Ok(next)
    }

    async fn list(&self) -> AppResult<Vec<TaskRecord>> {
        let mut records: Vec<TaskRecord> = self.tasks.read().await.values().cloned().collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::types::TaskState;
    use std::sync::Mutex;
    use time::{Duration, OffsetDateTime};

    struct StepClock {
        now: Mutex<OffsetDateTime>,
    }

    impl StepClock {
        fn new() -> Self {
            Self {
                now: Mutex::new(OffsetDateTime::UNIX_EPOCH),
            }
        }
    }

    impl ClockPort for StepClock {
        fn now_utc(&self) -> OffsetDateTime {
            let mut now = self.now.lock().unwrap();
            *now += Duration::seconds(1);
            *now
        }
    }

    fn store() -> InMemoryTaskStore {
        InMemoryTaskStore::new(Arc::new(StepClock::new()))
    }

    fn id(raw: &str) -> TaskId {
        TaskId::new(raw).unwrap()
    }

    #[tokio::test]
    async fn create_then_get_returns_queued_record() {
        let store = store();
        store.create(&id("t1")).await.unwrap();
        let record = store.get(&id("t1")).await.unwrap().unwrap();
        assert_eq!(record.state, TaskState::Queued);
        assert_eq!(record.progress, 0);
        assert!(record.error.is_none());
        assert_eq!(record.created_at, record.updated_at);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected_and_keeps_original() {
        let store = store();
        store.create(&id("t1")).await.unwrap();
        store
            .apply(
                &id("t1"),
                Transition::to(TaskState::Staging).progress(20),
            )
            .await
            .unwrap();
        let err = store.create(&id("t1")).await.unwrap_err();
        assert_eq!(err.code(), codes::DUPLICATE_KEY);
        let record = store.require(&id("t1")).await.unwrap();
        assert_eq!(record.state, TaskState::Staging);
        assert_eq!(record.progress, 20);
    }

    #[tokio::test]
    async fn missing_task_is_not_found() {
        let store = store();
        assert!(store.get(&id("unknown-id")).await.unwrap().is_none());
        let err = store.require(&id("unknown-id")).await.unwrap_err();
        assert_eq!(err.code(), codes::NOT_FOUND);
        let err = store
            .apply(&id("unknown-id"), Transition::to(TaskState::Failed))
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::NOT_FOUND);
    }

    #[tokio::test]
    async fn apply_stamps_updated_at() {
        let store = store();
        let created = store.create(&id("t1")).await.unwrap();
        let next = store
            .apply(&id("t1"), Transition::to(TaskState::Staging))
            .await
            .unwrap();
        assert!(next.updated_at > created.updated_at);
        assert_eq!(next.created_at, created.created_at);
    }

    #[tokio::test]
    async fn rejected_apply_does_not_write() {
        let store = store();
        store.create(&id("t1")).await.unwrap();
        let before = store.require(&id("t1")).await.unwrap();
        let err = store
            .apply(
                &id("t1"),
                Transition::to(TaskState::Done).message("done").progress(100),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::INVALID_TRANSITION);
        assert_eq!(store.require(&id("t1")).await.unwrap(), before);
    }

    #[tokio::test]
    async fn concurrent_creates_of_same_id_admit_exactly_one() {
        let store = Arc::new(store());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.create(&id("same")).await }));
        }
        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn list_orders_by_creation() {
        let store = store();
        store.create(&id("b")).await.unwrap();
        store.create(&id("a")).await.unwrap();
        let ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.task_id.to_string())
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }
}
