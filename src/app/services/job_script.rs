// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use serde::Serialize;
use tera::Context;

use crate::app::errors::{AppError, AppResult};
use crate::app::services::remote_path::remote_basename;
use crate::app::services::shell::sh_escape;

pub const DEFAULT_TEMPLATE: &str = r#"#!/bin/bash
#SBATCH --job-name={{ job_name }}
#SBATCH --output={{ remote_dir }}/clap-%j.out
#SBATCH --error={{ remote_dir }}/clap-%j.err
#SBATCH --time={{ time_limit }}
#SBATCH --ntasks={{ ntasks }}
#SBATCH --nodes={{ nodes }}
#SBATCH --partition={{ partition }}
#SBATCH --cpus-per-task={{ cpus_per_task }}
#SBATCH --mem={{ mem }}

set -euo pipefail

REMOTE_DIR={{ remote_dir_quoted }}
INPUT={{ remote_input_quoted }}
export REMOTE_DIR INPUT

echo {{ input_banner }}
{% for line in commands -%}
{{ line }}
{% endfor -%}
"#;

/// Scheduler directives and body used to render job scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobScriptSettings {
    pub job_name_prefix: String,
    pub time_limit: String,
    pub ntasks: u32,
    pub nodes: u32,
    pub partition: String,
    pub cpus_per_task: u32,
    pub mem: String,
    /// Shell lines appended verbatim; they see `$REMOTE_DIR` and `$INPUT`.
    pub commands: Vec<String>,
    /// Tera source replacing the built-in template.
    #[serde(skip)]
    pub template: Option<String>,
}

impl Default for JobScriptSettings {
    fn default() -> Self {
        Self {
            job_name_prefix: "audio".to_string(),
            time_limit: "04:00:00".to_string(),
            ntasks: 1,
            nodes: 1,
            partition: "dgx1".to_string(),
            cpus_per_task: 8,
            mem: "32G".to_string(),
            commands: Vec::new(),
            template: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobScriptBuilder {
    settings: JobScriptSettings,
}

impl JobScriptBuilder {
    pub fn new(settings: JobScriptSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &JobScriptSettings {
        &self.settings
    }

    /// Renders the submission script for one staged input. Pure: same inputs, same bytes.
    pub fn build(&self, remote_dir: &str, remote_input_path: &str) -> AppResult<String> {
        let remote_dir = remote_dir.trim();
        if remote_dir.is_empty() {
            return Err(AppError::invalid_argument(
                "job script needs a non-empty remote directory",
            ));
        }
        let remote_input_path = remote_input_path.trim();
        if remote_input_path.is_empty() {
            return Err(AppError::invalid_argument(
                "job script needs a non-empty remote input path",
            ));
        }
        let dir_name = remote_basename(remote_dir).ok_or_else(|| {
            AppError::invalid_argument(format!(
                "remote directory '{remote_dir}' has no trailing segment to name the job"
            ))
        })?;
        let job_name = if self.settings.job_name_prefix.is_empty() {
            dir_name.to_string()
        } else {
            format!("{}_{}", self.settings.job_name_prefix, dir_name)
        };

        let mut context = Context::new();
        context.insert("job_name", &job_name);
        context.insert("remote_dir", remote_dir.trim_end_matches('/'));
        context.insert("remote_dir_quoted", &sh_escape(remote_dir));
        context.insert("remote_input_path", remote_input_path);
        context.insert("remote_input_quoted", &sh_escape(remote_input_path));
        context.insert(
            "input_banner",
            &sh_escape(&format!("Input: {remote_input_path}")),
        );
        context.insert("time_limit", &self.settings.time_limit);
        context.insert("ntasks", &self.settings.ntasks);
        context.insert("nodes", &self.settings.nodes);
        context.insert("partition", &self.settings.partition);
        context.insert("cpus_per_task", &self.settings.cpus_per_task);
        context.insert("mem", &self.settings.mem);

        context.insert("commands", &self.settings.commands);

        let source = self.settings.template.as_deref().unwrap_or(DEFAULT_TEMPLATE);
        render(source, &context)
    }
}

fn render(source: &str, context: &Context) -> AppResult<String> {
    tera::Tera::one_off(source, context, false)
        .map_err(|err| AppError::invalid_argument(format!("job script render failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::errors::codes;

    fn builder() -> JobScriptBuilder {
        JobScriptBuilder::new(JobScriptSettings::default())
    }

    #[test]
    fn names_job_after_directory() {
        let script = builder()
            .build("/scratch/audio/t1", "/scratch/audio/t1/input.wav")
            .unwrap();
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("#SBATCH --job-name=audio_t1\n"));
        assert!(script.contains("#SBATCH --output=/scratch/audio/t1/clap-%j.out\n"));
        assert!(script.contains("#SBATCH --error=/scratch/audio/t1/clap-%j.err\n"));
        assert!(script.contains("#SBATCH --partition=dgx1\n"));
        assert!(script.contains("#SBATCH --mem=32G\n"));
        assert!(script.contains("set -euo pipefail\n"));
        assert!(script.contains("echo 'Input: /scratch/audio/t1/input.wav'\n"));
    }

    #[test]
    fn output_is_deterministic() {
        let builder = builder();
        let a = builder.build("/scratch/t9", "/scratch/t9/input.mp3").unwrap();
        let b = builder.build("/scratch/t9", "/scratch/t9/input.mp3").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_directory_is_invalid() {
        let err = builder().build("", "/scratch/t1/input.wav").unwrap_err();
        assert_eq!(err.code(), codes::INVALID_ARGUMENT);
        let err = builder().build("   ", "/scratch/t1/input.wav").unwrap_err();
        assert_eq!(err.code(), codes::INVALID_ARGUMENT);
        let err = builder().build("/", "/input.wav").unwrap_err();
        assert_eq!(err.code(), codes::INVALID_ARGUMENT);
    }

    #[test]
    fn empty_input_is_invalid() {
        let err = builder().build("/scratch/t1", "").unwrap_err();
        assert_eq!(err.code(), codes::INVALID_ARGUMENT);
    }

    #[test]
    fn commands_see_exported_paths() {
        let settings = JobScriptSettings {
            commands: vec![
                "module load ffmpeg".to_string(),
                "python run.py --input \"$INPUT\"".to_string(),
            ],
            ..JobScriptSettings::default()
        };
        let script = JobScriptBuilder::new(settings)
            .build("/s/t1", "/s/t1/input.wav")
            .unwrap();
        assert!(script.contains("REMOTE_DIR='/s/t1'\nINPUT='/s/t1/input.wav'\n"));
        assert!(script.contains("module load ffmpeg\npython run.py --input \"$INPUT\"\n"));
    }

    #[test]
    fn command_lines_are_not_templates() {
        let settings = JobScriptSettings {
            commands: vec![
                "files=(\"$REMOTE_DIR\"/*)".to_string(),
                "echo \"count: ${#files[@]}\"".to_string(),
                "echo '{{ job_name }}' {% raw %}".to_string(),
            ],
            ..JobScriptSettings::default()
        };
        let script = JobScriptBuilder::new(settings)
            .build("/s/t1", "/s/t1/input.wav")
            .unwrap();
        assert!(script.contains("echo \"count: ${#files[@]}\"\n"));
        assert!(script.contains("echo '{{ job_name }}' {% raw %}\n"));
    }

    #[test]
    fn custom_template_replaces_default() {
        let settings = JobScriptSettings {
            job_name_prefix: String::new(),
            template: Some("{{ job_name }}:{{ remote_input_path }}".to_string()),
            ..JobScriptSettings::default()
        };
        let script = JobScriptBuilder::new(settings)
            .build("/s/t7/", "/s/t7/input")
            .unwrap();
        assert_eq!(script, "t7:/s/t7/input");
    }

    #[test]
    fn broken_template_is_invalid_argument() {
        let settings = JobScriptSettings {
            template: Some("{% if %}".to_string()),
            ..JobScriptSettings::default()
        };
        let err = JobScriptBuilder::new(settings)
            .build("/s/t1", "/s/t1/input")
            .unwrap_err();
        assert_eq!(err.code(), codes::INVALID_ARGUMENT);
    }
}
