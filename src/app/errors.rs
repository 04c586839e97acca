// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;

use crate::app::ports::TransportError;

pub mod codes {
    pub const AUTHENTICATION_FAILURE: &str = "authentication_failure";
    pub const INVALID_ARGUMENT: &str = "invalid_argument";
    pub const NOT_FOUND: &str = "not_found";
    pub const DUPLICATE_KEY: &str = "duplicate_key";
    pub const INVALID_TRANSITION: &str = "invalid_transition";
    pub const REMOTE_EXECUTION_FAILED: &str = "remote_execution_failed";
    pub const TRANSFER_FAILED: &str = "transfer_failed";
    pub const TIMEOUT: &str = "timeout";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const LOCAL_ERROR: &str = "local_error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    Remote,
    Internal,
}

#[derive(Debug, Clone)]
pub struct AppError {
    kind: AppErrorKind,
    code: &'static str,
    message: String,
    context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind, code: &'static str) -> Self {
        Self {
            kind,
            code,
            message: code.to_string(),
            context: None,
        }
    }

    pub fn with_message(
        kind: AppErrorKind,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::with_message(
            AppErrorKind::InvalidArgument,
            codes::INVALID_ARGUMENT,
            message,
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::NotFound, codes::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Internal, codes::INTERNAL_ERROR, message)
    }

    pub fn local(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Internal, codes::LOCAL_ERROR, message)
    }

    pub fn kind(&self) -> AppErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ctx) = &self.context {
            write!(f, "{} ({})", self.message, ctx)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for AppError {}

impl From<TransportError> for AppError {
    fn from(err: TransportError) -> Self {
        let code = match &err {
            TransportError::RemoteExecutionFailed(_) => codes::REMOTE_EXECUTION_FAILED,
            TransportError::TransferFailed(_) => codes::TRANSFER_FAILED,
        };
        AppError::with_message(AppErrorKind::Remote, code, err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_appends_context() {
        let err = AppError::not_found("task t1 not found").with_context("get_task");
        assert_eq!(err.to_string(), "task t1 not found (get_task)");
        assert_eq!(err.code(), codes::NOT_FOUND);
        assert_eq!(err.kind(), AppErrorKind::NotFound);
    }

    #[test]
    fn transport_errors_keep_their_code() {
        let err: AppError = TransportError::TransferFailed("connection reset".into()).into();
        assert_eq!(err.code(), codes::TRANSFER_FAILED);
        assert_eq!(err.kind(), AppErrorKind::Remote);
        assert!(err.message().contains("connection reset"));

        let err: AppError = TransportError::RemoteExecutionFailed("exit 2".into()).into();
        assert_eq!(err.code(), codes::REMOTE_EXECUTION_FAILED);
    }
}
