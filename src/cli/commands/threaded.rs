use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tracing::info;

use super::{ProcessingArgs, load_config, print_report, print_settings};
use crate::cli::{GlobalOptions, Output};
use crate::codec::FsCodec;
use crate::jobs::JobListBuilder;
use crate::parallel::{ExecutionStrategy, Schedule};
use crate::report::{RunReport, RunSettings, Variant};
use crate::runner::{LocalPlan, run_local};

#[derive(Args, Debug)]
pub struct ThreadedArgs {
    /// Directory holding the source images
    pub input_dir: PathBuf,

    /// Directory for sharpened images (emptied first)
    pub output_dir: PathBuf,

    /// Number of worker threads (0 = derive from CPU count)
    pub threads: usize,

    /// Maximum number of images to process
    pub max_images: usize,

    /// How jobs are assigned to threads
    #[arg(long, value_enum)]
    pub schedule: Option<Schedule>,

    #[command(flatten)]
    pub processing: ProcessingArgs,
}

pub fn execute(args: ThreadedArgs, globals: &GlobalOptions) -> Result<()> {
    let config = load_config(globals, &args.processing)?;
    let output = Output::new(globals.quiet);

    let workers = if args.threads == 0 {
        let workers = ExecutionStrategy::calculate_optimal_workers(config.threaded.thread_percentage);
        info!("Using {workers} threads from CPU count");
        workers
    } else {
        args.threads
    };
    let schedule = args.schedule.unwrap_or(config.threaded.schedule);

    let settings = RunSettings {
        variant: Variant::Threaded,
        input_dir: args.input_dir.clone(),
        output_dir: args.output_dir.clone(),
        workers,
        max_images: args.max_images,
    };
    print_settings(&output, &settings, globals.json);

    let builder = JobListBuilder::new(&config.jobs.patterns, args.max_images)?;
    let plan = LocalPlan {
        input_dir: &args.input_dir,
        output_dir: &args.output_dir,
        builder: &builder,
        codec: &FsCodec,
        kernel: config.processing.kernel,
        failure_policy: config.processing.failure_policy,
    };

    let strategy = ExecutionStrategy::Parallel { workers, schedule };
    let outcome = run_local(strategy, &plan)
        .with_context(|| format!("Threaded run with {workers} threads failed"))?;

    print_report(
        &output,
        &RunReport::new(settings, outcome.wall_time, outcome.aggregate),
        globals.json,
    )
}
