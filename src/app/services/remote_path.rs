// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::errors::{AppError, AppResult};
use crate::app::types::TaskId;

const INPUT_STEM: &str = "input";
const JOB_SCRIPT_NAME: &str = "job.sbatch";

/// Remote locations used by one staging run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingPaths {
    pub remote_dir: String,
    pub remote_input_path: String,
    pub job_script_path: String,
}

impl StagingPaths {
    pub fn new(remote_base: &str, task_id: &TaskId, extension: &str) -> AppResult<Self> {
        let base = normalize_base(remote_base)?;
        validate_extension(extension)?;
        let remote_dir = join_remote(&base, task_id.as_str());
        let remote_input_path = join_remote(&remote_dir, &format!("{INPUT_STEM}{extension}"));
        let job_script_path = join_remote(&remote_dir, JOB_SCRIPT_NAME);
        Ok(Self {
            remote_dir,
            remote_input_path,
            job_script_path,
        })
    }
}

fn normalize_base(remote_base: &str) -> AppResult<String> {
    let trimmed = remote_base.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid_argument("remote base directory is empty"));
    }
    let without_slash = trimmed.trim_end_matches('/');
    if without_slash.is_empty() {
        // "/" itself
        return Ok("/".to_string());
    }
    Ok(without_slash.to_string())
}

fn validate_extension(extension: &str) -> AppResult<()> {
    if extension.is_empty() {
        return Ok(());
    }
    if !extension.starts_with('.') || extension.len() == 1 {
        return Err(AppError::invalid_argument(format!(
            "extension '{extension}' must be empty or start with '.'"
        )));
    }
    if extension.contains('/') || extension.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(AppError::invalid_argument(format!(
            "extension '{extension}' contains invalid characters"
        )));
    }
    Ok(())
}

pub fn join_remote(base: &str, child: &str) -> String {
    if base.ends_with('/') {
        format!("{base}{child}")
    } else {
        format!("{base}/{child}")
    }
}

/// Trailing segment of a remote path, ignoring trailing slashes.
pub fn remote_basename(path: &str) -> Option<&str> {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
}

/// Splits a local file name into the extension used for the remote input file.
pub fn extension_of(path: &std::path::Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::errors::codes;
    use std::path::Path;

    fn id(raw: &str) -> TaskId {
        TaskId::new(raw).unwrap()
    }

    #[test]
    fn builds_layout_under_base() {
        let paths = StagingPaths::new("/scratch/user/audio/", &id("t1"), ".wav").unwrap();
        assert_eq!(paths.remote_dir, "/scratch/user/audio/t1");
        assert_eq!(paths.remote_input_path, "/scratch/user/audio/t1/input.wav");
        assert_eq!(paths.job_script_path, "/scratch/user/audio/t1/job.sbatch");
    }

    #[test]
    fn allows_empty_extension() {
        let paths = StagingPaths::new("work", &id("t2"), "").unwrap();
        assert_eq!(paths.remote_input_path, "work/t2/input");
    }

    #[test]
    fn root_base_is_kept() {
        let paths = StagingPaths::new("/", &id("t3"), ".mp3").unwrap();
        assert_eq!(paths.remote_dir, "/t3");
    }

    #[test]
    fn rejects_bad_inputs() {
        let err = StagingPaths::new("  ", &id("t1"), ".wav").unwrap_err();
        assert_eq!(err.code(), codes::INVALID_ARGUMENT);
        assert!(StagingPaths::new("/base", &id("t1"), "wav").is_err());
        assert!(StagingPaths::new("/base", &id("t1"), ".").is_err());
        assert!(StagingPaths::new("/base", &id("t1"), "./x").is_err());
    }

    #[test]
    fn basename_ignores_trailing_slash() {
        assert_eq!(remote_basename("/scratch/t1/"), Some("t1"));
        assert_eq!(remote_basename("t1"), Some("t1"));
        assert_eq!(remote_basename("/"), None);
    }

    #[test]
    fn extension_includes_dot() {
        assert_eq!(extension_of(Path::new("/tmp/clip.flac")), ".flac");
        assert_eq!(extension_of(Path::new("/tmp/clip")), "");
    }
}
