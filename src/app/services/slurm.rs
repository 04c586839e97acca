// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::services::shell::sh_escape;

/// Parses the scheduler id out of sbatch output such as "Submitted batch job 11".
pub fn parse_job_id(output: &str) -> Option<i64> {
    output.lines().find_map(|line| {
        let marker = "job ";
        let idx = line.find(marker)?;
        line[idx + marker.len()..].trim().parse::<i64>().ok()
    })
}

pub fn sbatch_command(job_script_path: &str, chdir: Option<&str>) -> String {
    match chdir {
        Some(dir) => format!(
            "sbatch --chdir {} {}",
            sh_escape(dir),
            sh_escape(job_script_path)
        ),
        None => format!("sbatch {}", sh_escape(job_script_path)),
    }
}

pub fn sacct_command(job_id: i64) -> String {
    format!("sacct -j {job_id} -n -P -o State")
}

pub fn parse_sacct_states(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let state = line.split('|').next().unwrap_or(line).trim();
            if state.is_empty() {
                None
            } else {
                Some(state.to_string())
            }
        })
        .collect()
}

/// Final scheduler state of a job and all its steps, or `None` while anything is still live.
/// A failing step wins over `COMPLETED`.
pub fn sacct_terminal_state(output: &str) -> Option<String> {
    let states = parse_sacct_states(output);
    if states.is_empty() {
        return None;
    }
    let mut normalized = Vec::with_capacity(states.len());
    for state in states {
        let token = normalize_slurm_state(&state);
        if is_slurm_state_active(&token) || !is_slurm_state_terminal(&token) {
            return None;
        }
        normalized.push(token);
    }
    if normalized.iter().all(|state| state == "COMPLETED") {
        return Some("COMPLETED".to_string());
    }
    normalized.into_iter().find(|state| state != "COMPLETED")
}

fn normalize_slurm_state(state: &str) -> String {
    // "CANCELLED by 1000", "COMPLETED+", "FAILED:1"
    let token = state
        .trim()
        .split(|c: char| c == '+' || c == ':' || c == '(' || c.is_whitespace())
        .next()
        .unwrap_or(state);
    token.to_ascii_uppercase()
}

fn is_slurm_state_active(state: &str) -> bool {
    matches!(
        state,
        "PENDING"
            | "RUNNING"
            | "CONFIGURING"
            | "COMPLETING"
            | "SUSPENDED"
            | "RESIZING"
            | "REQUEUED"
            | "STAGE_OUT"
            | "STAGE_IN"
            | "SIGNALING"
    )
}

fn is_slurm_state_terminal(state: &str) -> bool {
    matches!(
        state,
        "COMPLETED"
            | "CANCELLED"
            | "FAILED"
            | "TIMEOUT"
            | "NODE_FAIL"
            | "PREEMPTED"
            | "BOOT_FAIL"
            | "OUT_OF_MEMORY"
            | "DEADLINE"
            | "SPECIAL_EXIT"
            | "REVOKED"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_from_sbatch_output() {
        assert_eq!(parse_job_id("Submitted batch job 11"), Some(11));
        assert_eq!(parse_job_id("Submitted batch job 4242\n"), Some(4242));
        assert_eq!(
            parse_job_id("sbatch: warning: no account\nSubmitted batch job 7"),
            Some(7)
        );
        assert_eq!(parse_job_id("sbatch: error: invalid partition"), None);
        assert_eq!(parse_job_id(""), None);
    }

    #[test]
    fn sbatch_command_quotes_paths() {
        assert_eq!(
            sbatch_command("/s/t1/job.sbatch", Some("/s/t1")),
            "sbatch --chdir '/s/t1' '/s/t1/job.sbatch'"
        );
        assert_eq!(sbatch_command("job.sbatch", None), "sbatch 'job.sbatch'");
    }

    #[test]
    fn sacct_terminal_state_prefers_failure() {
        let output = "COMPLETED|\nFAILED|\n";
        assert_eq!(sacct_terminal_state(output).as_deref(), Some("FAILED"));
    }

    #[test]
    fn sacct_terminal_state_completed_only() {
        assert_eq!(
            sacct_terminal_state("COMPLETED|\n").as_deref(),
            Some("COMPLETED")
        );
    }

    #[test]
    fn sacct_terminal_state_running_is_none() {
        assert_eq!(sacct_terminal_state("RUNNING|\nCOMPLETED|\n"), None);
        assert_eq!(sacct_terminal_state(""), None);
    }

    #[test]
    fn sacct_states_are_normalized() {
        assert_eq!(
            sacct_terminal_state("CANCELLED by 1000\n").as_deref(),
            Some("CANCELLED")
        );
        assert_eq!(
            sacct_terminal_state("cancelled+\n").as_deref(),
            Some("CANCELLED")
        );
        assert_eq!(
            sacct_terminal_state("OUT_OF_MEMORY(x)\n").as_deref(),
            Some("OUT_OF_MEMORY")
        );
    }
}
