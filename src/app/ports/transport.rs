// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error as ThisError;

use crate::app::types::ConnectionProfile;

/// Closed set of failures the remote transport can report.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum TransportError {
    #[error("remote execution failed: {0}")]
    RemoteExecutionFailed(String),
    #[error("transfer failed: {0}")]
    TransferFailed(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

#[async_trait]
/// Remote shell and file-transfer boundary.
/// Each call opens its own session and releases it before returning.
pub trait RemoteTransportPort: Send + Sync {
    async fn run_command(
        &self,
        profile: &ConnectionProfile,
        command: &str,
    ) -> TransportResult<String>;

    /// Creates `remote_dir` and any missing parents; existing directories are fine.
    async fn make_directory(
        &self,
        profile: &ConnectionProfile,
        remote_dir: &str,
    ) -> TransportResult<()>;

    async fn upload_file(
        &self,
        profile: &ConnectionProfile,
        local_path: &Path,
        remote_path: &str,
    ) -> TransportResult<()>;

    async fn upload_text(
        &self,
        profile: &ConnectionProfile,
        text: &str,
        remote_path: &str,
    ) -> TransportResult<()>;

    async fn download_file(
        &self,
        profile: &ConnectionProfile,
        remote_path: &str,
        local_path: &Path,
    ) -> TransportResult<()>;
}
