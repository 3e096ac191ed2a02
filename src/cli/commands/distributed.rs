use anyhow::{Context, Result, anyhow};
use clap::{Args, ValueEnum};
use std::ffi::OsString;
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use super::{ProcessingArgs, load_config, print_report, print_settings};
use crate::cli::{GlobalOptions, Output};
use crate::codec::FsCodec;
use crate::config::SharpenConfig;
use crate::distributed::{
    JobSource, ProcessGroup, RankPlan, TcpTransport, run_coordinator, run_in_process,
};
use crate::error::ConfigError;
use crate::jobs::JobListBuilder;
use crate::report::{RunReport, RunSettings, Variant};
use crate::runner::RunOutcome;

#[derive(Args, Debug)]
pub struct DistributedArgs {
    /// Directory holding the source images
    pub input_dir: PathBuf,

    /// Directory for sharpened images (emptied first)
    pub output_dir: PathBuf,

    /// Number of ranks, the coordinator included
    pub processes: usize,

    /// Maximum number of images to process
    pub max_images: usize,

    /// Let every rank write its own results instead of gathering them at rank 0
    #[arg(long)]
    pub write_through: bool,

    /// Run the ranks as threads of this process instead of child processes
    #[arg(long)]
    pub in_process: bool,

    /// Extension of gathered `processed_<n>` files
    #[arg(long, value_name = "EXT")]
    pub output_extension: Option<String>,

    #[command(flatten)]
    pub processing: ProcessingArgs,
}

pub fn execute(args: DistributedArgs, globals: &GlobalOptions) -> Result<()> {
    let mut config = load_config(globals, &args.processing)?;
    if args.write_through {
        config.distributed.gather = false;
    }
    if let Some(extension) = &args.output_extension {
        config.distributed.output_extension = extension.clone();
    }
    if args.processes == 0 {
        return Err(ConfigError::InvalidWorkerCount { count: 0 }.into());
    }

    let output = Output::new(globals.quiet);
    let settings = RunSettings {
        variant: Variant::Distributed,
        input_dir: args.input_dir.clone(),
        output_dir: args.output_dir.clone(),
        workers: args.processes,
        max_images: args.max_images,
    };
    print_settings(&output, &settings, globals.json);

    let builder = JobListBuilder::new(&config.jobs.patterns, args.max_images)?;
    let source = JobSource {
        input_dir: &args.input_dir,
        builder: &builder,
        output_extension: &config.distributed.output_extension,
    };
    let plan = RankPlan {
        codec: &FsCodec,
        kernel: config.processing.kernel,
        failure_policy: config.processing.failure_policy,
        gather: config.distributed.gather,
        output_dir: &args.output_dir,
    };

    let outcome = if args.in_process {
        run_in_process(args.processes, &plan, &source)
            .context("In-process distributed run failed")?
    } else {
        launch(args.processes, &plan, &source, &config, globals)
            .context("Distributed run failed")?
    };

    print_report(
        &output,
        &RunReport::new(settings, outcome.wall_time, outcome.aggregate),
        globals.json,
    )
}

/// Run as rank 0 with ranks `1..world_size` as child processes of this binary
fn launch(
    world_size: usize,
    plan: &RankPlan<'_>,
    source: &JobSource<'_>,
    config: &SharpenConfig,
    globals: &GlobalOptions,
) -> Result<RunOutcome> {
    source.prepare(plan.output_dir)?;

    let listener = TcpListener::bind(&config.distributed.bind)
        .with_context(|| format!("Failed to listen on {}", config.distributed.bind))?;
    let addr = listener.local_addr()?;
    let timeout = Duration::from_secs(config.distributed.connect_timeout_secs);

    let program = std::env::current_exe().context("Failed to locate the sharpen executable")?;
    let child_args = (1..world_size)
        .map(|rank| rank_worker_args(rank, world_size, addr, plan, globals, timeout))
        .collect::<Result<Vec<_>>>()?;

    let mut group = ProcessGroup::spawn(&program, world_size, |rank| {
        child_args.get(rank - 1).cloned().unwrap_or_default()
    })
    .context("Failed to start rank processes")?;
    info!("Coordinator listening on {addr} for {} rank(s)", group.len());

    let mut transport = TcpTransport::accept(&listener, world_size, timeout, &mut group)?;
    let outcome = run_coordinator(&mut transport, plan, source)?;

    drop(transport);
    group.wait()?;
    Ok(outcome)
}

/// Command line for one child rank
fn rank_worker_args(
    rank: usize,
    world_size: usize,
    coordinator: SocketAddr,
    plan: &RankPlan<'_>,
    globals: &GlobalOptions,
    timeout: Duration,
) -> Result<Vec<OsString>> {
    let mut args: Vec<OsString> = Vec::new();

    if globals.quiet {
        args.push("--quiet".into());
    }
    for _ in 0..globals.verbose {
        args.push("--verbose".into());
    }

    args.push("rank-worker".into());
    args.extend(
        [
            "--rank".to_string(),
            rank.to_string(),
            "--world-size".to_string(),
            world_size.to_string(),
            "--coordinator".to_string(),
            coordinator.to_string(),
            "--kernel".to_string(),
            value_name(&plan.kernel)?,
            "--failure-policy".to_string(),
            value_name(&plan.failure_policy)?,
            "--connect-timeout-secs".to_string(),
            timeout.as_secs().to_string(),
        ]
        .into_iter()
        .map(OsString::from),
    );
    args.push("--output-dir".into());
    args.push(plan.output_dir.as_os_str().to_os_string());
    if !plan.gather {
        args.push("--write-through".into());
    }

    Ok(args)
}

fn value_name<T: ValueEnum>(value: &T) -> Result<String> {
    value
        .to_possible_value()
        .map(|possible| possible.get_name().to_string())
        .ok_or_else(|| anyhow!("Value has no command-line name"))
}
