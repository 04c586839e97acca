// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod job_script;
pub mod lifecycle;
pub mod remote_path;
pub mod shell;
pub mod slurm;
