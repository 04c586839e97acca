// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use clap::{Args, CommandFactory, FromArgMatches, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "hpcstage",
    version,
    about = "Stage media files onto an HPC host and track their batch jobs",
    long_about = None,
    after_help = "Configuration precedence: defaults < config file < HPC_* environment < command-line flags.\n\
Config path precedence: default location < HPCSTAGE_CONFIG_PATH < --config.\n\
Paths in the config file are resolved relative to the config file directory."
)]
pub struct Opts {
    #[arg(
        short,
        long,
        global = true,
        value_name = "PATH",
        help = "Path to a TOML config file. When omitted, HPCSTAGE_CONFIG_PATH or the default location is used."
    )]
    pub config: Option<PathBuf>,
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::SetTrue,
        help = "Enable debug logging. Overrides `verbose` from the config file."
    )]
    pub verbose: bool,
    #[arg(
        long,
        global = true,
        value_name = "N",
        value_parser = clap::value_parser!(u16).range(1..),
        help = "Number of concurrent staging workers. Overrides `workers`."
    )]
    pub workers: Option<u16>,
    #[arg(
        long,
        global = true,
        value_name = "DIR",
        help = "Local directory that receives ingested files. Overrides `staging_dir`."
    )]
    pub staging_dir: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Remote directory under which task directories are created. Overrides HPC_REMOTE_BASE."
    )]
    pub remote_base: Option<String>,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Stage a local file and wait until it is ready on the remote host.
    Stage(StageArgs),
    /// Run a command on the remote host and print its output.
    Exec(ExecArgs),
    /// Download a remote file.
    Fetch(FetchArgs),
    /// Print the job script that staging would write. Does not connect.
    Script(ScriptArgs),
}

#[derive(Args, Debug)]
pub struct StageArgs {
    /// File to stage.
    pub file: PathBuf,
    /// Submit the job script once staging is done.
    #[arg(long)]
    pub submit: bool,
    /// After submitting, poll the scheduler until the job finishes.
    #[arg(long, requires = "submit")]
    pub follow: bool,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Shell command, passed to the remote shell as is.
    #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl ExecArgs {
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    pub remote: String,
    pub local: PathBuf,
}

#[derive(Args, Debug)]
pub struct ScriptArgs {
    pub remote_dir: String,
    pub remote_input: String,
}

pub struct ParsedOpts {
    pub opts: Opts,
    pub verbose_override: Option<bool>,
}

pub fn cli_command() -> clap::Command {
    Opts::command()
}

pub fn parse_opts() -> ParsedOpts {
    let matches = cli_command().get_matches();
    let opts = Opts::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    into_parsed(opts)
}

fn into_parsed(opts: Opts) -> ParsedOpts {
    // an absent flag must not override `verbose = true` from the file
    let verbose_override = opts.verbose.then_some(true);
    ParsedOpts {
        opts,
        verbose_override,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Opts, clap::Error> {
        Opts::try_parse_from(args)
    }

    #[test]
    fn command_definition_is_consistent() {
        cli_command().debug_assert();
    }

    #[test]
    fn stage_parses_file_and_flags() {
        let opts = parse(&["hpcstage", "stage", "song.wav", "--submit", "--follow"]).unwrap();
        let Cmd::Stage(args) = opts.cmd else {
            panic!("expected stage");
        };
        assert_eq!(args.file, PathBuf::from("song.wav"));
        assert!(args.submit);
        assert!(args.follow);
    }

    #[test]
    fn follow_requires_submit() {
        assert!(parse(&["hpcstage", "stage", "song.wav", "--follow"]).is_err());
    }

    #[test]
    fn global_flags_work_after_subcommand() {
        let opts = parse(&[
            "hpcstage",
            "stage",
            "a.wav",
            "--workers",
            "2",
            "--remote-base",
            "/scratch/x",
            "-v",
        ])
        .unwrap();
        assert_eq!(opts.workers, Some(2));
        assert_eq!(opts.remote_base.as_deref(), Some("/scratch/x"));
        let parsed = into_parsed(opts);
        assert_eq!(parsed.verbose_override, Some(true));
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert!(parse(&["hpcstage", "--workers", "0", "stage", "a.wav"]).is_err());
    }

    #[test]
    fn verbose_absent_leaves_override_unset() {
        let opts = parse(&["hpcstage", "script", "/r/t1", "/r/t1/input.wav"]).unwrap();
        assert!(into_parsed(opts).verbose_override.is_none());
    }

    #[test]
    fn exec_joins_trailing_words() {
        let opts = parse(&["hpcstage", "exec", "ls", "-la", "/scratch"]).unwrap();
        let Cmd::Exec(args) = opts.cmd else {
            panic!("expected exec");
        };
        assert_eq!(args.command_line(), "ls -la /scratch");
        assert!(parse(&["hpcstage", "exec"]).is_err());
    }

    #[test]
    fn fetch_and_script_take_two_positionals() {
        let opts = parse(&["hpcstage", "fetch", "/r/t1/clap-1.out", "out.txt"]).unwrap();
        let Cmd::Fetch(args) = opts.cmd else {
            panic!("expected fetch");
        };
        assert_eq!(args.remote, "/r/t1/clap-1.out");
        assert_eq!(args.local, PathBuf::from("out.txt"));
        assert!(parse(&["hpcstage", "script", "/r/t1"]).is_err());
    }
}
