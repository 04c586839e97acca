// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::Config;

use crate::app::errors::codes;
use crate::app::ports::{RemoteTransportPort, TransportError, TransportResult};
use crate::app::types::ConnectionProfile;

mod error;
mod session;

pub use error::AuthenticationFailure;
pub use session::{CapturedOutput, SshSession};

#[derive(Debug, Clone, Copy)]
pub struct SshOptions {
    /// Upper bound for one operation, connect and teardown included.
    pub operation_timeout: Duration,
}

/// Transport over russh: every call opens its own session and closes it afterwards.
#[derive(Clone)]
pub struct SshTransport {
    config: Arc<Config>,
    options: SshOptions,
}

impl SshTransport {
    pub fn new(options: SshOptions) -> Self {
        Self {
            config: session::client_config(options.operation_timeout),
            options,
        }
    }

    async fn open(&self, profile: &ConnectionProfile) -> anyhow::Result<SshSession> {
        SshSession::open(profile, self.config.clone()).await
    }
}

fn describe(err: &anyhow::Error) -> String {
    if err
        .chain()
        .any(|cause| cause.is::<AuthenticationFailure>())
    {
        format!("{}: {err:#}", codes::AUTHENTICATION_FAILURE)
    } else {
        format!("{err:#}")
    }
}

fn map_exec_error(err: anyhow::Error) -> TransportError {
    TransportError::RemoteExecutionFailed(describe(&err))
}

fn map_transfer_error(err: anyhow::Error) -> TransportError {
    if is_sftp_missing_path(&err) {
        return TransportError::TransferFailed(format!("no such remote path: {err:#}"));
    }
    TransportError::TransferFailed(describe(&err))
}

fn is_sftp_missing_path(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        let Some(sftp_error) = cause.downcast_ref::<russh_sftp::client::error::Error>() else {
            return false;
        };
        matches!(
            sftp_error,
            russh_sftp::client::error::Error::Status(status)
                if status.status_code == russh_sftp::protocol::StatusCode::NoSuchFile
        )
    })
}

fn command_outcome(command: &str, captured: CapturedOutput) -> TransportResult<String> {
    let stdout = String::from_utf8_lossy(&captured.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&captured.stderr);
    let stderr = stderr.trim();
    match captured.exit_code {
        Some(0) => Ok(stdout),
        Some(code) => Err(TransportError::RemoteExecutionFailed(format!(
            "`{command}` exited with status {code}: {stderr}"
        ))),
        None => Err(TransportError::RemoteExecutionFailed(format!(
            "`{command}` ended without exit status (signal: {}): {stderr}",
            captured.exit_signal.as_deref().unwrap_or("none")
        ))),
    }
}

async fn bounded<T>(
    limit: Duration,
    op: &'static str,
    work: impl Future<Output = TransportResult<T>>,
    on_timeout: fn(String) -> TransportError,
) -> TransportResult<T> {
    match tokio::time::timeout(limit, work).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(op, "ssh operation timed out after {:?}", limit);
            Err(on_timeout(format!(
                "{}: {op} did not finish within {}s",
                codes::TIMEOUT,
                limit.as_secs()
            )))
        }
    }
}

#[async_trait]
impl RemoteTransportPort for SshTransport {
    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, profile, command),
        fields(op = "run_command", host = %profile.host, user = %profile.user, port = profile.port)
    )]
    async fn run_command(
        &self,
        profile: &ConnectionProfile,
        command: &str,
    ) -> TransportResult<String> {
        let work = async {
            let session = self.open(profile).await.map_err(map_exec_error)?;
            let result = session.exec_capture(command).await;
            session.close().await;
            result.map_err(map_exec_error)
        };
        let captured = bounded(
            self.options.operation_timeout,
            "run_command",
            work,
            TransportError::RemoteExecutionFailed,
        )
        .await?;
        command_outcome(command, captured)
    }

    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, profile),
        fields(op = "make_directory", host = %profile.host, user = %profile.user, port = profile.port)
    )]
    async fn make_directory(
        &self,
        profile: &ConnectionProfile,
        remote_dir: &str,
    ) -> TransportResult<()> {
        let work = async {
            let session = self.open(profile).await.map_err(map_exec_error)?;
            let result = session.ensure_remote_dir(remote_dir).await;
            session.close().await;
            result.map_err(map_exec_error)
        };
        bounded(
            self.options.operation_timeout,
            "make_directory",
            work,
            TransportError::RemoteExecutionFailed,
        )
        .await
    }

    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, profile, local_path),
        fields(op = "upload_file", host = %profile.host, user = %profile.user, port = profile.port, local = %local_path.display())
    )]
    async fn upload_file(
        &self,
        profile: &ConnectionProfile,
        local_path: &Path,
        remote_path: &str,
    ) -> TransportResult<()> {
        let work = async {
            let session = self.open(profile).await.map_err(map_transfer_error)?;
            let result = session.upload_file(local_path, remote_path).await;
            session.close().await;
            result.map_err(map_transfer_error)
        };
        bounded(
            self.options.operation_timeout,
            "upload_file",
            work,
            TransportError::TransferFailed,
        )
        .await
    }

    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, profile, text),
        fields(op = "upload_text", host = %profile.host, user = %profile.user, port = profile.port, bytes = text.len())
    )]
    async fn upload_text(
        &self,
        profile: &ConnectionProfile,
        text: &str,
        remote_path: &str,
    ) -> TransportResult<()> {
        let work = async {
            let session = self.open(profile).await.map_err(map_transfer_error)?;
            let result = session.upload_bytes(text.as_bytes(), remote_path).await;
            session.close().await;
            result.map_err(map_transfer_error)
        };
        bounded(
            self.options.operation_timeout,
            "upload_text",
            work,
            TransportError::TransferFailed,
        )
        .await
    }

    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, profile, local_path),
        fields(op = "download_file", host = %profile.host, user = %profile.user, port = profile.port, local = %local_path.display())
    )]
    async fn download_file(
        &self,
        profile: &ConnectionProfile,
        remote_path: &str,
        local_path: &Path,
    ) -> TransportResult<()> {
        let work = async {
            let session = self.open(profile).await.map_err(map_transfer_error)?;
            let result = session.download_file(remote_path, local_path).await;
            session.close().await;
            result.map_err(map_transfer_error)
        };
        bounded(
            self.options.operation_timeout,
            "download_file",
            work,
            TransportError::TransferFailed,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captured(stdout: &str, stderr: &str, exit_code: Option<i32>) -> CapturedOutput {
        CapturedOutput {
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
            exit_code,
            exit_signal: None,
        }
    }

    #[test]
    fn zero_exit_returns_stdout() {
        let out = command_outcome("ls", captured("a\nb\n", "", Some(0))).unwrap();
        assert_eq!(out, "a\nb\n");
    }

    #[test]
    fn non_zero_exit_is_remote_execution_failure() {
        let err = command_outcome("ls /nope", captured("", "no such dir\n", Some(2))).unwrap_err();
        let TransportError::RemoteExecutionFailed(message) = err else {
            panic!("expected remote execution failure");
        };
        assert!(message.contains("status 2"));
        assert!(message.ends_with("no such dir"));
    }

    #[test]
    fn missing_exit_status_is_a_failure() {
        let mut output = captured("", "", None);
        output.exit_signal = Some("KILL".to_string());
        let err = command_outcome("sleep 100", output).unwrap_err();
        assert!(err.to_string().contains("signal: KILL"));
    }

    #[test]
    fn authentication_failures_are_labelled() {
        let err = anyhow::Error::new(AuthenticationFailure).context("server rejected key");
        assert!(describe(&err).starts_with(codes::AUTHENTICATION_FAILURE));
        let TransportError::TransferFailed(message) = map_transfer_error(err) else {
            panic!("expected transfer failure");
        };
        assert!(message.contains("server rejected key"));
    }

    #[test]
    fn sftp_missing_path_is_detected() {
        let status = russh_sftp::protocol::Status {
            id: 1,
            status_code: russh_sftp::protocol::StatusCode::NoSuchFile,
            error_message: "no such file".to_string(),
            language_tag: "en".to_string(),
        };
        let err = anyhow::Error::new(russh_sftp::client::error::Error::Status(status))
            .context("opening remote file /s/t1/out.txt");
        assert!(is_sftp_missing_path(&err));
        assert!(!is_sftp_missing_path(&anyhow::anyhow!("boom")));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_operations_time_out_with_the_given_kind() {
        let err = bounded(
            Duration::from_secs(5),
            "upload_file",
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<(), TransportError>(())
            },
            TransportError::TransferFailed,
        )
        .await
        .unwrap_err();
        let TransportError::TransferFailed(message) = err else {
            panic!("expected transfer failure");
        };
        assert!(message.contains("within 5s"));
    }
}
