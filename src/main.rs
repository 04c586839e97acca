// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use hpcstage::adapters::cli::{self, Cmd, ParsedOpts, ScriptArgs, StageArgs};
use hpcstage::adapters::ingress::LocalIngress;
use hpcstage::adapters::ssh::{SshOptions, SshTransport};
use hpcstage::adapters::store::InMemoryTaskStore;
use hpcstage::adapters::telemetry::TracingTelemetry;
use hpcstage::adapters::time::SystemClock;
use hpcstage::app::dispatch::StagingDispatcher;
use hpcstage::app::services::job_script::{JobScriptBuilder, JobScriptSettings};
use hpcstage::app::types::TaskState;
use hpcstage::app::usecases::{StagingSettings, UseCases};
use hpcstage::config::{self, Config, ConfigReport, LoadResult, Overrides, ScriptConfig};
use hpcstage::logging;

const STAGING_POLL_INTERVAL: Duration = Duration::from_millis(200);
// time a request may sit in the queue on top of the staging deadline
const STAGING_QUEUE_GRACE: Duration = Duration::from_secs(60);
const MAX_JOB_CHECK_ERRORS: u32 = 5;

fn log_config_report(report: &ConfigReport) {
    match (&report.config_path, report.config_path_source) {
        (Some(path), Some(source)) => tracing::info!(
            "config path: {} (source={}, present={})",
            path.display(),
            source.as_str(),
            report.config_file_present
        ),
        (Some(path), None) => tracing::info!(
            "config path: {} (present={})",
            path.display(),
            report.config_file_present
        ),
        (None, _) => tracing::info!("config path: (none)"),
    }
    for entry in &report.entries {
        tracing::info!(
            "config {}: {} (source={})",
            entry.field,
            entry.value,
            entry.source.as_str()
        );
    }
}

fn build_usecases(config: &Config) -> UseCases {
    let clock = Arc::new(SystemClock::new());
    let store = Arc::new(InMemoryTaskStore::new(clock));
    let transport = Arc::new(SshTransport::new(SshOptions {
        operation_timeout: config.operation_timeout,
    }));
    UseCases::new(
        store,
        transport,
        Arc::new(TracingTelemetry::new()),
        config.profile.clone(),
        JobScriptBuilder::new(config.job.clone()),
        StagingSettings {
            pipeline_timeout: config.pipeline_timeout,
            cleanup: config.cleanup,
        },
    )
}

async fn run_stage(config: &Config, args: StageArgs) -> anyhow::Result<ExitCode> {
    let usecases = build_usecases(config);
    let dispatcher = Arc::new(StagingDispatcher::spawn(
        usecases.clone(),
        config.workers,
        config.queue_capacity,
    ));
    let ingress = LocalIngress::new(config.staging_dir.clone(), usecases.clone(), dispatcher.clone());

    let queued = ingress.accept(&args.file).await?;
    tracing::info!(task_id = %queued.task_id, "staging {}", args.file.display());
    let waited = usecases
        .wait_for_staging(
            &queued.task_id,
            STAGING_POLL_INTERVAL,
            config.pipeline_timeout + STAGING_QUEUE_GRACE,
        )
        .await;
    dispatcher.shutdown().await;
    let mut record = waited?;

    if args.submit && record.state == TaskState::Ready {
        record = usecases.submit_job(&record.task_id).await?;
        if args.follow {
            record = usecases
                .follow_job(
                    &record.task_id,
                    config.job_check_interval,
                    MAX_JOB_CHECK_ERRORS,
                )
                .await?;
        }
    }

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(if record.state == TaskState::Failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn print_script(job: JobScriptSettings, args: &ScriptArgs) -> anyhow::Result<ExitCode> {
    let script = JobScriptBuilder::new(job).build(&args.remote_dir, &args.remote_input)?;
    print!("{script}");
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let ParsedOpts {
        opts,
        verbose_override,
    } = cli::parse_opts();
    // printing a job script needs no connection details
    let cmd = match opts.cmd {
        Cmd::Script(args) => {
            let ScriptConfig { job, verbose } =
                config::load_script_config(opts.config, verbose_override)?;
            logging::init(verbose);
            return print_script(job, &args);
        }
        cmd => cmd,
    };
    let LoadResult { config, report } = config::load_with_report(
        opts.config,
        Overrides {
            staging_dir: opts.staging_dir,
            remote_base: opts.remote_base,
            workers: opts.workers.map(usize::from),
            verbose: verbose_override,
        },
    )?;
    logging::init(config.verbose);
    log_config_report(&report);

    match cmd {
        Cmd::Stage(args) => run_stage(&config, args).await,
        Cmd::Exec(args) => {
            let stdout = build_usecases(&config)
                .run_command(&args.command_line())
                .await?;
            print!("{stdout}");
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Fetch(args) => {
            build_usecases(&config)
                .fetch(&args.remote, &args.local)
                .await?;
            tracing::info!("fetched {} to {}", args.remote, args.local.display());
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Script(args) => print_script(config.job.clone(), &args),
    }
}
