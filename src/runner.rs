//! Drives a sequential or shared-memory run from directory to aggregate.

use crate::aggregate::AggregateResult;
use crate::codec::ImageCodec;
use crate::error::Result;
use crate::jobs::{self, JobListBuilder};
use crate::kernel::KernelMode;
use crate::parallel::ExecutionStrategy;
use crate::worker::{FailurePolicy, OutputSink, WorkerUnit};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::info;

/// Inputs of one local run
pub struct LocalPlan<'a> {
    pub input_dir: &'a Path,
    pub output_dir: &'a Path,
    pub builder: &'a JobListBuilder,
    pub codec: &'a dyn ImageCodec,
    pub kernel: KernelMode,
    pub failure_policy: FailurePolicy,
}

/// Aggregate plus the wall-clock time around the whole run
#[derive(Debug)]
pub struct RunOutcome {
    pub aggregate: AggregateResult,
    pub wall_time: Duration,
}

/// Build the job list, process it under `strategy` and reduce the results.
///
/// The input directory is checked before the output directory is touched.
pub fn run_local(strategy: ExecutionStrategy, plan: &LocalPlan<'_>) -> Result<RunOutcome> {
    jobs::validate_input_dir(plan.input_dir)?;
    jobs::prepare_output_dir(plan.output_dir)?;

    let start = Instant::now();
    let jobs = plan.builder.build(plan.input_dir)?;

    let unit = WorkerUnit {
        jobs: &jobs,
        codec: plan.codec,
        kernel: plan.kernel,
        sink: OutputSink::WriteThrough {
            output_dir: plan.output_dir,
        },
        failure_policy: plan.failure_policy,
    };

    info!(
        "Processing {} jobs with {} worker(s)",
        jobs.len(),
        strategy.workers()
    );
    let partials = strategy.execute(jobs.len(), |ctx| unit.run(ctx))?;
    let aggregate = AggregateResult::from_partials(partials);
    let wall_time = start.elapsed();

    info!(
        "Processed {} jobs in {:?} ({:?} kernel time)",
        aggregate.jobs_completed(),
        wall_time,
        aggregate.kernel_time()
    );

    Ok(RunOutcome {
        aggregate,
        wall_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FsCodec;
    use crate::error::{ConfigError, SharpenError};
    use crate::parallel::Schedule;
    use image::{Rgb, RgbImage};
    use std::fs;
    use tempfile::TempDir;

    fn write_inputs(dir: &Path, count: usize) {
        for i in 0..count {
            RgbImage::from_fn(6, 5, |x, y| Rgb([(x * 30) as u8, (y * 40) as u8, i as u8]))
                .save(dir.join(format!("img_{i}.png")))
                .unwrap();
        }
    }

    #[test]
    fn test_threaded_run_writes_every_job() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        fs::create_dir(&input).unwrap();
        write_inputs(&input, 7);

        let builder = JobListBuilder::new(&["*.png"], 100).unwrap();
        let plan = LocalPlan {
            input_dir: &input,
            output_dir: &output,
            builder: &builder,
            codec: &FsCodec,
            kernel: KernelMode::Serial,
            failure_policy: FailurePolicy::Abort,
        };
        let strategy = ExecutionStrategy::Parallel {
            workers: 3,
            schedule: Schedule::Dynamic,
        };

        let outcome = run_local(strategy, &plan).unwrap();

        assert_eq!(outcome.aggregate.jobs_completed(), 7);
        assert_eq!(outcome.aggregate.workers().len(), 3);
        assert_eq!(fs::read_dir(&output).unwrap().count(), 7);
        assert!(output.join("img_6.png").is_file());
    }

    #[test]
    fn test_missing_input_leaves_output_untouched() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out");

        let builder = JobListBuilder::new(&["*.png"], 5).unwrap();
        let plan = LocalPlan {
            input_dir: &dir.path().join("absent"),
            output_dir: &output,
            builder: &builder,
            codec: &FsCodec,
            kernel: KernelMode::Serial,
            failure_policy: FailurePolicy::Abort,
        };

        let err = run_local(ExecutionStrategy::Sequential, &plan).unwrap_err();
        assert!(matches!(err, SharpenError::Config(ConfigError::InvalidInputDir { .. })));
        assert!(!output.exists());
    }
}
