// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use crate::app::errors::{AppError, AppResult};
use crate::app::types::StagingRequest;
use crate::app::usecases::UseCases;

/// Fixed pool of staging workers fed through a bounded queue.
///
/// Ingress never waits for remote I/O: it enqueues and returns. Each worker takes one
/// request at a time, so at most `workers` stagings run concurrently.
pub struct StagingDispatcher {
    tx: mpsc::Sender<StagingRequest>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl StagingDispatcher {
    pub fn spawn(usecases: UseCases, workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = (0..workers.max(1))
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    usecases.clone(),
                    rx.clone(),
                    shutdown_rx.clone(),
                ))
            })
            .collect();
        tracing::debug!(workers, capacity, "staging dispatcher started");
        Self {
            tx,
            shutdown_tx,
            workers: Mutex::new(handles),
        }
    }

    /// Queues a staging run. Waits while the queue is full.
    pub async fn schedule_staging(&self, request: StagingRequest) -> AppResult<()> {
        let task_id = request.task_id.clone();
        self.tx.send(request).await.map_err(|_| {
            AppError::internal("staging dispatcher is shut down").with_context(task_id.to_string())
        })?;
        tracing::debug!(task_id = %task_id, "staging scheduled");
        Ok(())
    }

    /// Closes the queue and joins the workers. Requests already queued are still staged.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let workers = std::mem::take(&mut *self.workers.lock().await);
        for handle in workers {
            if let Err(err) = handle.await {
                tracing::warn!("staging worker ended abnormally: {err}");
            }
        }
    }
}

async fn worker_loop(
    worker: usize,
    usecases: UseCases,
    rx: Arc<Mutex<mpsc::Receiver<StagingRequest>>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let next = {
            let mut rx = rx.lock().await;
            if *shutdown_rx.borrow() {
                drain_one(&mut rx).await
            } else {
                tokio::select! {
                    req = rx.recv() => req,
                    _ = shutdown_rx.changed() => drain_one(&mut rx).await,
                }
            }
        };
        let Some(request) = next else {
            break;
        };
        let task_id = request.task_id.clone();
        tracing::debug!(worker, task_id = %task_id, "staging picked up");

        // a panicking staging run must not take the worker down with it
        let usecases = usecases.clone();
        let run = tokio::spawn(async move { usecases.stage(request).await });
        match run.await {
            Ok(Ok(record)) => {
                tracing::debug!(worker, task_id = %task_id, state = %record.state, "staging finished");
            }
            Ok(Err(err)) => {
                tracing::warn!(worker, task_id = %task_id, "staging rejected: {err}");
            }
            Err(err) => {
                tracing::error!(worker, task_id = %task_id, "staging task aborted: {err}");
            }
        }
    }
    tracing::debug!(worker, "staging worker stopped");
}

// Once closed, senders are refused and recv yields buffered requests, then None.
async fn drain_one(rx: &mut mpsc::Receiver<StagingRequest>) -> Option<StagingRequest> {
    rx.close();
    rx.recv().await
}
