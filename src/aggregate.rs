//! Per-worker partial results and their reduction into one outcome.
//!
//! Reductions are order independent: kernel times are `Duration`s, summed
//! as integer nanoseconds, so the total never depends on how many workers
//! produced it or in which order their summaries arrived. Buffers are the
//! exception: their order is rank-major, local-order-minor and decides the
//! names of gathered output files.

use crate::buffer::ImageBuffer;
use crate::codec::ImageCodec;
use crate::error::Result;
use serde::{Serialize, Serializer};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Kernel time of one job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTiming {
    pub job_index: usize,
    pub kernel_time: Duration,
}

/// Everything one worker produced. Owned by that worker until handed to
/// the aggregator.
#[derive(Debug, Clone, Default)]
pub struct PartialResult {
    worker: usize,
    timings: Vec<JobTiming>,
    kernel_time: Duration,
    skipped: usize,
    buffers: Vec<ImageBuffer>,
}

impl PartialResult {
    pub fn new(worker: usize) -> Self {
        Self {
            worker,
            ..Self::default()
        }
    }

    /// Count one completed job
    pub fn record(&mut self, job_index: usize, kernel_time: Duration) {
        self.kernel_time += kernel_time;
        self.timings.push(JobTiming {
            job_index,
            kernel_time,
        });
    }

    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    pub fn push_buffer(&mut self, buffer: ImageBuffer) {
        self.buffers.push(buffer);
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn jobs_completed(&self) -> usize {
        self.timings.len()
    }

    pub fn kernel_time(&self) -> Duration {
        self.kernel_time
    }

    pub fn timings(&self) -> &[JobTiming] {
        &self.timings
    }

    pub fn buffers(&self) -> &[ImageBuffer] {
        &self.buffers
    }

    pub fn summary(&self) -> WorkerSummary {
        WorkerSummary {
            worker: self.worker,
            jobs_completed: self.jobs_completed(),
            jobs_skipped: self.skipped,
            kernel_time: self.kernel_time,
        }
    }

    /// Hand the buffers over, keeping only the scalar summary
    pub fn into_parts(self) -> (WorkerSummary, Vec<ImageBuffer>) {
        let summary = self.summary();
        (summary, self.buffers)
    }
}

/// Scalar part of a [`PartialResult`]; what ranks send for the time reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub worker: usize,
    pub jobs_completed: usize,
    pub jobs_skipped: usize,
    #[serde(rename = "kernel_time_secs", serialize_with = "serialize_secs")]
    pub kernel_time: Duration,
}

/// Run-wide outcome, built once by the coordinating worker
#[derive(Debug, Clone, Serialize)]
pub struct AggregateResult {
    workers: Vec<WorkerSummary>,
    jobs_completed: usize,
    jobs_skipped: usize,
    #[serde(rename = "kernel_time_secs", serialize_with = "serialize_secs")]
    kernel_time: Duration,
    #[serde(skip)]
    images: Vec<ImageBuffer>,
}

impl AggregateResult {
    /// Sum the summaries; `images` must already be in reassembled order
    pub fn from_summaries(mut summaries: Vec<WorkerSummary>, images: Vec<ImageBuffer>) -> Self {
        summaries.sort_by_key(|summary| summary.worker);

        let jobs_completed = summaries.iter().map(|s| s.jobs_completed).sum();
        let jobs_skipped = summaries.iter().map(|s| s.jobs_skipped).sum();
        let kernel_time = summaries.iter().map(|s| s.kernel_time).sum();

        Self {
            workers: summaries,
            jobs_completed,
            jobs_skipped,
            kernel_time,
            images,
        }
    }

    /// Reduce the partial results of workers sharing one address space
    pub fn from_partials(mut partials: Vec<PartialResult>) -> Self {
        partials.sort_by_key(PartialResult::worker);

        let mut summaries = Vec::with_capacity(partials.len());
        let mut images = Vec::new();
        for partial in partials {
            let (summary, buffers) = partial.into_parts();
            summaries.push(summary);
            images.extend(buffers);
        }

        Self::from_summaries(summaries, images)
    }

    pub fn workers(&self) -> &[WorkerSummary] {
        &self.workers
    }

    pub fn jobs_completed(&self) -> usize {
        self.jobs_completed
    }

    pub fn jobs_skipped(&self) -> usize {
        self.jobs_skipped
    }

    pub fn kernel_time(&self) -> Duration {
        self.kernel_time
    }

    /// Mean kernel time per completed job
    pub fn average_kernel_time(&self) -> Duration {
        match u32::try_from(self.jobs_completed) {
            Ok(0) => Duration::ZERO,
            Ok(count) => self.kernel_time / count,
            Err(_) => Duration::from_secs_f64(
                self.kernel_time.as_secs_f64() / self.jobs_completed as f64,
            ),
        }
    }

    pub fn images(&self) -> &[ImageBuffer] {
        &self.images
    }
}

/// Coordinator buffers first, then each remote rank's buffers in ascending
/// rank order, each in local production order
pub fn reassemble(
    local: Vec<ImageBuffer>,
    mut remote: Vec<(usize, Vec<ImageBuffer>)>,
) -> Vec<ImageBuffer> {
    remote.sort_by_key(|(rank, _)| *rank);

    let mut images = local;
    for (_, buffers) in remote {
        images.extend(buffers);
    }
    images
}

/// Name of the gathered image at `index` in the reassembled sequence
pub fn gathered_file_name(index: usize, extension: &str) -> String {
    format!("processed_{index}.{extension}")
}

/// Write reassembled images as `processed_<index>.<extension>`
pub fn write_gathered(
    codec: &dyn ImageCodec,
    output_dir: &Path,
    images: &[ImageBuffer],
    extension: &str,
) -> Result<()> {
    for (index, image) in images.iter().enumerate() {
        let path = output_dir.join(gathered_file_name(index, extension));
        codec.save(image, &path)?;
        debug!("Wrote {}", path.display());
    }
    Ok(())
}

/// Serialize a duration as fractional seconds
pub(crate) fn serialize_secs<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}
