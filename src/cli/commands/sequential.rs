use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use super::{ProcessingArgs, load_config, print_report, print_settings};
use crate::cli::{GlobalOptions, Output};
use crate::codec::FsCodec;
use crate::jobs::JobListBuilder;
use crate::parallel::ExecutionStrategy;
use crate::report::{RunReport, RunSettings, Variant};
use crate::runner::{LocalPlan, run_local};

#[derive(Args, Debug)]
pub struct SequentialArgs {
    /// Directory holding the source images
    pub input_dir: PathBuf,

    /// Directory for sharpened images (emptied first)
    pub output_dir: PathBuf,

    /// Maximum number of images to process
    pub max_images: usize,

    #[command(flatten)]
    pub processing: ProcessingArgs,
}

pub fn execute(args: SequentialArgs, globals: &GlobalOptions) -> Result<()> {
    let config = load_config(globals, &args.processing)?;
    let output = Output::new(globals.quiet);

    let settings = RunSettings {
        variant: Variant::Sequential,
        input_dir: args.input_dir.clone(),
        output_dir: args.output_dir.clone(),
        workers: 1,
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

    let outcome =
        run_local(ExecutionStrategy::Sequential, &plan).context("Sequential run failed")?;

    print_report(
        &output,
        &RunReport::new(settings, outcome.wall_time, outcome.aggregate),
        globals.json,
    )
}
