// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use crate::app::services::job_script::JobScriptSettings;
use crate::app::types::{CleanupPolicy, ConnectionProfile};

const APP_DIR_NAME: &str = "hpcstage";
const CONFIG_FILE_NAME: &str = "hpcstage.toml";
pub const CONFIG_ENV_VAR: &str = "HPCSTAGE_CONFIG_PATH";

pub const HOST_ENV: &str = "HPC_HOST";
pub const USER_ENV: &str = "HPC_USER";
pub const SSH_KEY_ENV: &str = "HPC_SSH_KEY";
pub const KNOWN_HOSTS_ENV: &str = "HPC_KNOWN_HOSTS";
pub const REMOTE_BASE_ENV: &str = "HPC_REMOTE_BASE";
pub const PORT_ENV: &str = "HPC_PORT";

const DEFAULT_PORT: u16 = 22;
const DEFAULT_STAGING_DIR: &str = "/tmp/uploads";
const DEFAULT_WORKERS: usize = 4;
const DEFAULT_QUEUE_CAPACITY: usize = 64;
const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 120;
const DEFAULT_PIPELINE_TIMEOUT_SECS: u64 = 1800;
const DEFAULT_JOB_CHECK_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    hpc: FileHpc,
    staging_dir: Option<String>,
    workers: Option<usize>,
    queue_capacity: Option<usize>,
    operation_timeout_secs: Option<u64>,
    pipeline_timeout_secs: Option<u64>,
    job_check_interval_secs: Option<u64>,
    cleanup: Option<CleanupPolicy>,
    verbose: Option<bool>,
    #[serde(default)]
    job: FileJob,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileHpc {
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    identity_path: Option<String>,
    known_hosts_path: Option<String>,
    remote_base: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileJob {
    job_name_prefix: Option<String>,
    time_limit: Option<String>,
    ntasks: Option<u32>,
    nodes: Option<u32>,
    partition: Option<String>,
    cpus_per_task: Option<u32>,
    mem: Option<String>,
    commands: Option<Vec<String>>,
    template_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub profile: ConnectionProfile,
    pub staging_dir: PathBuf,
    pub workers: usize,
    pub queue_capacity: usize,
    pub operation_timeout: Duration,
    pub pipeline_timeout: Duration,
    pub job_check_interval: Duration,
    pub cleanup: CleanupPolicy,
    pub verbose: bool,
    pub job: JobScriptSettings,
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Override,
    Env,
    ConfigFile,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Env => "env",
            ConfigSource::ConfigFile => "config",
            ConfigSource::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub field: &'static str,
    pub value: String,
    pub source: ConfigSource,
}

/// Where every effective setting came from.
#[derive(Debug, Default)]
pub struct ConfigReport {
    pub config_path: Option<PathBuf>,
    pub config_path_source: Option<ConfigSource>,
    pub config_file_present: bool,
    pub entries: Vec<ReportEntry>,
}

impl ConfigReport {
    pub fn source_of(&self, field: &str) -> Option<ConfigSource> {
        self.entries
            .iter()
            .find(|entry| entry.field == field)
            .map(|entry| entry.source)
    }

    fn record(&mut self, field: &'static str, value: impl fmt::Display, source: ConfigSource) {
        self.entries.push(ReportEntry {
            field,
            value: value.to_string(),
            source,
        });
    }
}

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub report: ConfigReport,
}

/// Values given on the command line. They win over every other source.
#[derive(Debug, Default)]
pub struct Overrides {
    pub staging_dir: Option<PathBuf>,
    pub remote_base: Option<String>,
    pub workers: Option<usize>,
    pub verbose: Option<bool>,
}

pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    Ok(load_with_report(config_path_override, overrides)?.config)
}

pub fn load_with_report(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
) -> Result<LoadResult> {
    load_from(config_path_override, overrides, &|key: &str| std::env::var(key).ok())
}

/// Settings for rendering job scripts offline.
#[derive(Debug)]
pub struct ScriptConfig {
    pub job: JobScriptSettings,
    pub verbose: bool,
}

/// Like [`load`], but skips the `[hpc]` table so no connection details are required.
pub fn load_script_config(
    config_path_override: Option<PathBuf>,
    verbose_override: Option<bool>,
) -> Result<ScriptConfig> {
    script_config_from(config_path_override, verbose_override, &|key: &str| {
        std::env::var(key).ok()
    })
}

type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn script_config_from(
    config_path_override: Option<PathBuf>,
    verbose_override: Option<bool>,
    env: EnvLookup<'_>,
) -> Result<ScriptConfig> {
    let (config_path, config_path_source, required) = locate_config(config_path_override, env)?;
    let file = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };
    let base_dir = config_path.as_deref().and_then(|path| path.parent());
    // the report is discarded; job_settings only needs somewhere to record into
    let mut report = ConfigReport {
        config_path: config_path.clone(),
        config_path_source,
        config_file_present: false,
        entries: Vec::new(),
    };
    let job = job_settings(file.job, base_dir, &mut report)?;
    let verbose = verbose_override.or(file.verbose).unwrap_or(false);
    Ok(ScriptConfig { job, verbose })
}

fn locate_config(
    config_path_override: Option<PathBuf>,
    env: EnvLookup<'_>,
) -> Result<(Option<PathBuf>, Option<ConfigSource>, bool)> {
    Ok(match config_path_override {
        Some(path) => (Some(expand_path(path)), Some(ConfigSource::Override), true),
        None => match config_path_from_env(env)? {
            Some(path) => (Some(expand_path(path)), Some(ConfigSource::Env), true),
            None => match default_config_path().ok() {
                Some(path) => (Some(path), Some(ConfigSource::Default), false),
                None => (None, None, false),
            },
        },
    })
}

fn load_from(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
    env: EnvLookup<'_>,
) -> Result<LoadResult> {
    let (config_path, config_path_source, required) = locate_config(config_path_override, env)?;
    let config_file_present = config_path
        .as_deref()
        .map(|path| path.exists())
        .unwrap_or(false);

    let file = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };
    let base_dir = config_path.as_deref().and_then(|path| path.parent());

    let mut report = ConfigReport {
        config_path: config_path.clone(),
        config_path_source,
        config_file_present,
        entries: Vec::new(),
    };

    let (host, source) = pick(None, env_value(env, HOST_ENV), non_empty(file.hpc.host))
        .ok_or_else(|| missing("hpc.host", HOST_ENV, "host"))?;
    report.record("hpc.host", &host, source);

    let (port, source) = pick(None, env_parse::<u16>(env, PORT_ENV)?, file.hpc.port)
        .unwrap_or((DEFAULT_PORT, ConfigSource::Default));
    if port == 0 {
        anyhow::bail!("hpc.port must be between 1 and 65535");
    }
    report.record("hpc.port", port, source);

    let (user, source) = pick(None, env_value(env, USER_ENV), non_empty(file.hpc.user))
        .ok_or_else(|| missing("hpc.user", USER_ENV, "user"))?;
    report.record("hpc.user", &user, source);

    let (identity_path, source) = pick(
        None,
        env_value(env, SSH_KEY_ENV).map(|raw| expand_path(PathBuf::from(raw))),
        non_empty(file.hpc.identity_path).map(|raw| resolve_path(&raw, base_dir)),
    )
    .ok_or_else(|| missing("hpc.identity_path", SSH_KEY_ENV, "identity_path"))?;
    report.record("hpc.identity_path", identity_path.display(), source);

    let known_hosts = pick(
        None,
        env_value(env, KNOWN_HOSTS_ENV).map(|raw| expand_path(PathBuf::from(raw))),
        non_empty(file.hpc.known_hosts_path).map(|raw| resolve_path(&raw, base_dir)),
    );
    let known_hosts_path = match known_hosts {
        Some((path, source)) => {
            report.record("hpc.known_hosts_path", path.display(), source);
            Some(path)
        }
        None => {
            report.record("hpc.known_hosts_path", "~/.ssh/known_hosts", ConfigSource::Default);
            None
        }
    };

    let (remote_base, source) = pick(
        non_empty(overrides.remote_base),
        env_value(env, REMOTE_BASE_ENV),
        non_empty(file.hpc.remote_base),
    )
    .ok_or_else(|| missing("hpc.remote_base", REMOTE_BASE_ENV, "remote_base"))?;
    report.record("hpc.remote_base", &remote_base, source);

    let (staging_dir, source) = pick(
        overrides.staging_dir.map(expand_path),
        None,
        non_empty(file.staging_dir).map(|raw| resolve_path(&raw, base_dir)),
    )
    .unwrap_or((PathBuf::from(DEFAULT_STAGING_DIR), ConfigSource::Default));
    report.record("staging_dir", staging_dir.display(), source);

    let (workers, source) =
        pick(overrides.workers, None, file.workers).unwrap_or((DEFAULT_WORKERS, ConfigSource::Default));
    if workers == 0 {
        anyhow::bail!("workers must be at least 1; set --workers or workers in the config file");
    }
    report.record("workers", workers, source);

    let (queue_capacity, source) = pick(None, None, file.queue_capacity)
        .unwrap_or((DEFAULT_QUEUE_CAPACITY, ConfigSource::Default));
    if queue_capacity == 0 {
        anyhow::bail!("queue_capacity must be at least 1");
    }
    report.record("queue_capacity", queue_capacity, source);

    let operation_timeout = seconds(
        &mut report,
        "operation_timeout_secs",
        file.operation_timeout_secs,
        DEFAULT_OPERATION_TIMEOUT_SECS,
    )?;
    let pipeline_timeout = seconds(
        &mut report,
        "pipeline_timeout_secs",
        file.pipeline_timeout_secs,
        DEFAULT_PIPELINE_TIMEOUT_SECS,
    )?;
    let job_check_interval = seconds(
        &mut report,
        "job_check_interval_secs",
        file.job_check_interval_secs,
        DEFAULT_JOB_CHECK_INTERVAL_SECS,
    )?;

    let (cleanup, source) = pick(None, None, file.cleanup)
        .unwrap_or((CleanupPolicy::default(), ConfigSource::Default));
    report.record("cleanup", cleanup.as_str(), source);

    let (verbose, source) =
        pick(overrides.verbose, None, file.verbose).unwrap_or((false, ConfigSource::Default));
    report.record("verbose", verbose, source);

    let job = job_settings(file.job, base_dir, &mut report)?;

    let config = Config {
        profile: ConnectionProfile {
            host,
            port,
            user,
            identity_path,
            known_hosts_path,
            remote_base,
        },
        staging_dir,
        workers,
        queue_capacity,
        operation_timeout,
        pipeline_timeout,
        job_check_interval,
        cleanup,
        verbose,
        job,
        config_path,
    };
    Ok(LoadResult { config, report })
}

fn job_settings(
    file: FileJob,
    base_dir: Option<&Path>,
    report: &mut ConfigReport,
) -> Result<JobScriptSettings> {
    let defaults = JobScriptSettings::default();
    let source = |present: bool| {
        if present {
            ConfigSource::ConfigFile
        } else {
            ConfigSource::Default
        }
    };

    report.record(
        "job.partition",
        file.partition.as_deref().unwrap_or(&defaults.partition),
        source(file.partition.is_some()),
    );
    report.record(
        "job.time_limit",
        file.time_limit.as_deref().unwrap_or(&defaults.time_limit),
        source(file.time_limit.is_some()),
    );

    let template = match non_empty(file.template_path) {
        Some(raw) => {
            let path = resolve_path(&raw, base_dir);
            let text = fs::read_to_string(&path)
                .with_context(|| format!("failed to read job.template_path {}", path.display()))?;
            report.record("job.template_path", path.display(), ConfigSource::ConfigFile);
            Some(text)
        }
        None => None,
    };

    for (field, value) in [
        ("job.ntasks", file.ntasks),
        ("job.nodes", file.nodes),
        ("job.cpus_per_task", file.cpus_per_task),
    ] {
        if value == Some(0) {
            anyhow::bail!("{field} must be at least 1");
        }
    }

    Ok(JobScriptSettings {
        job_name_prefix: file.job_name_prefix.unwrap_or(defaults.job_name_prefix),
        time_limit: file.time_limit.unwrap_or(defaults.time_limit),
        ntasks: file.ntasks.unwrap_or(defaults.ntasks),
        nodes: file.nodes.unwrap_or(defaults.nodes),
        partition: file.partition.unwrap_or(defaults.partition),
        cpus_per_task: file.cpus_per_task.unwrap_or(defaults.cpus_per_task),
        mem: file.mem.unwrap_or(defaults.mem),
        commands: file.commands.unwrap_or(defaults.commands),
        template,
    })
}

fn seconds(
    report: &mut ConfigReport,
    field: &'static str,
    file_value: Option<u64>,
    default: u64,
) -> Result<Duration> {
    let (secs, source) =
        pick(None, None, file_value).unwrap_or((default, ConfigSource::Default));
    if secs == 0 {
        anyhow::bail!("{field} must be greater than zero");
    }
    report.record(field, secs, source);
    Ok(Duration::from_secs(secs))
}

/// First present value in precedence order: override, environment, config file.
fn pick<T>(
    override_value: Option<T>,
    env_value: Option<T>,
    file_value: Option<T>,
) -> Option<(T, ConfigSource)> {
    override_value
        .map(|value| (value, ConfigSource::Override))
        .or_else(|| env_value.map(|value| (value, ConfigSource::Env)))
        .or_else(|| file_value.map(|value| (value, ConfigSource::ConfigFile)))
}

fn missing(field: &str, env_var: &str, key: &str) -> anyhow::Error {
    anyhow!("{field} is required; set {env_var} or `{key}` under [hpc] in the config file")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_value(env: EnvLookup<'_>, key: &str) -> Option<String> {
    non_empty(env(key))
}

fn env_parse<T>(env: EnvLookup<'_>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_value(env, key)
        .map(|raw| {
            raw.parse::<T>()
                .with_context(|| format!("{key} has an invalid value '{raw}'"))
        })
        .transpose()
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env(env: EnvLookup<'_>) -> Result<Option<PathBuf>> {
    match env(CONFIG_ENV_VAR) {
        Some(value) if value.trim().is_empty() => {
            anyhow::bail!("{CONFIG_ENV_VAR} is set but empty")
        }
        Some(value) => Ok(Some(PathBuf::from(value))),
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}
