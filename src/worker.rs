//! The per-worker loop: load, sharpen, then write or buffer each assigned job.

use crate::aggregate::PartialResult;
use crate::codec::ImageCodec;
use crate::error::{Result, SharpenError};
use crate::jobs::JobList;
use crate::kernel::KernelMode;
use crate::parallel::WorkerContext;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, warn};

/// What happens when one job cannot be decoded or encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop the whole batch
    #[default]
    Abort,
    /// Log the failure and continue with the next job
    Skip,
}

/// Where a sharpened image goes
#[derive(Debug, Clone, Copy)]
pub enum OutputSink<'a> {
    /// Persist immediately under the job's own file name
    WriteThrough { output_dir: &'a Path },
    /// Keep in the worker's ordered buffer list for a later gather
    Buffer,
}

/// Borrowed view of everything a worker needs to process its jobs
#[derive(Clone, Copy)]
pub struct WorkerUnit<'a> {
    pub jobs: &'a JobList,
    pub codec: &'a dyn ImageCodec,
    pub kernel: KernelMode,
    pub sink: OutputSink<'a>,
    pub failure_policy: FailurePolicy,
}

impl WorkerUnit<'_> {
    /// Process every job the context hands out, in assignment order
    pub fn run(&self, mut ctx: WorkerContext<'_>) -> Result<PartialResult> {
        let mut partial = PartialResult::new(ctx.worker_id());

        while let Some(index) = ctx.next_job() {
            match self.process(index, &mut partial) {
                Ok(()) => {}
                Err(e) if e.is_job_failure() && self.failure_policy == FailurePolicy::Skip => {
                    warn!("Worker {} skipping job {index}: {e}", ctx.worker_id());
                    partial.record_skip();
                }
                Err(e) => {
                    error!("Worker {} aborting on job {index}: {e}", ctx.worker_id());
                    return Err(e);
                }
            }
        }

        debug!(
            "Worker {} finished {} jobs in {:?} kernel time",
            ctx.worker_id(),
            partial.jobs_completed(),
            partial.kernel_time()
        );
        Ok(partial)
    }

    fn process(&self, index: usize, partial: &mut PartialResult) -> Result<()> {
        let job = self.jobs.get(index).ok_or(SharpenError::JobIndex {
            index,
            len: self.jobs.len(),
        })?;

        let source = self.codec.load(job.path())?;

        let start = Instant::now();
        let sharpened = self.kernel.apply(&source);
        let kernel_time = start.elapsed();

        match self.sink {
            OutputSink::WriteThrough { output_dir } => {
                let name = job.file_name().ok_or_else(|| SharpenError::Encode {
                    path: job.path().to_path_buf(),
                    reason: "job has no file name".to_string(),
                })?;
                self.codec.save(&sharpened, &output_dir.join(name))?;
            }
            OutputSink::Buffer => partial.push_buffer(sharpened),
        }

        partial.record(index, kernel_time);
        debug!("Sharpened {} in {kernel_time:?}", job.path().display());
        Ok(())
    }
}
