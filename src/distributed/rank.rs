//! What the coordinator and the other ranks do over one run.

use super::collective::{
    barrier, broadcast_job_list, collect_summaries, gather_buffers, receive_job_list,
    send_buffers, send_summary, watch_for_abort,
};
use super::local::LocalTransport;
use super::{COORDINATOR, Transport};
use super::wire::Message;
use crate::aggregate::{AggregateResult, PartialResult, write_gathered};
use crate::codec::ImageCodec;
use crate::error::{ConfigError, Result, SharpenError, TransportError};
use crate::jobs::{self, JobList, JobListBuilder};
use crate::kernel::KernelMode;
use crate::parallel::{Assignment, WorkerContext};
use crate::runner::RunOutcome;
use crate::worker::{FailurePolicy, OutputSink, WorkerUnit};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Per-rank processing settings, identical on every rank
#[derive(Clone, Copy)]
pub struct RankPlan<'a> {
    pub codec: &'a dyn ImageCodec,
    pub kernel: KernelMode,
    pub failure_policy: FailurePolicy,
    /// Buffer results for a gather at the coordinator instead of writing them
    pub gather: bool,
    pub output_dir: &'a Path,
}

/// Where the coordinator finds its jobs
pub struct JobSource<'a> {
    pub input_dir: &'a Path,
    pub builder: &'a JobListBuilder,
    /// Extension of gathered `processed_<n>` files
    pub output_extension: &'a str,
}

impl JobSource<'_> {
    /// Check the input directory, then empty or create the output directory.
    ///
    /// Runs before any rank is started.
    pub fn prepare(&self, output_dir: &Path) -> Result<()> {
        jobs::validate_input_dir(self.input_dir)?;
        jobs::prepare_output_dir(output_dir)
    }
}

/// Rank 0: build and broadcast the job list, process its own share, then
/// reduce timings and buffers from every other rank.
///
/// On failure every other rank is told to abort.
pub fn run_coordinator<T: Transport + ?Sized>(
    transport: &mut T,
    plan: &RankPlan<'_>,
    source: &JobSource<'_>,
) -> Result<RunOutcome> {
    let result = coordinate(transport, plan, source);

    if let Err(e) = &result {
        error!("Coordinator failed: {e}");
        for rank in 1..transport.world_size() {
            if let Err(send_error) = transport.send(rank, &Message::Abort(e.to_string())) {
                debug!("Could not notify rank {rank}: {send_error}");
            }
        }
    }
    result
}

fn coordinate<T: Transport + ?Sized>(
    transport: &mut T,
    plan: &RankPlan<'_>,
    source: &JobSource<'_>,
) -> Result<RunOutcome> {
    let start = Instant::now();

    let jobs = source.builder.build(source.input_dir)?;
    broadcast_job_list(transport, &jobs)?;

    let partial = process_share(transport, &jobs, plan)?;
    barrier(transport)?;

    let (summary, local_buffers) = partial.into_parts();
    let summaries = collect_summaries(transport, summary)?;

    let images = if plan.gather {
        let images = gather_buffers(transport, local_buffers)?;
        write_gathered(plan.codec, plan.output_dir, &images, source.output_extension)?;
        images
    } else {
        Vec::new()
    };

    let aggregate = AggregateResult::from_summaries(summaries, images);
    let wall_time = start.elapsed();
    info!(
        "Processed {} jobs across {} rank(s) in {:?}",
        aggregate.jobs_completed(),
        transport.world_size(),
        wall_time
    );

    Ok(RunOutcome {
        aggregate,
        wall_time,
    })
}

/// Any rank but 0: receive the job list, process this rank's share and
/// report back.
///
/// On a local failure the coordinator is sent an `Abort` carrying the reason.
pub fn run_peer<T: Transport + ?Sized>(transport: &mut T, plan: &RankPlan<'_>) -> Result<()> {
    let result = participate(transport, plan);

    if let Err(e) = &result {
        let caused_by_coordinator = matches!(
            e,
            SharpenError::PeerAborted { .. }
                | SharpenError::Transport(TransportError::Disconnected { .. })
        );
        if !caused_by_coordinator {
            error!("Rank {} failed: {e}", transport.rank());
            if let Err(send_error) = transport.send(COORDINATOR, &Message::Abort(e.to_string())) {
                warn!("Could not notify the coordinator: {send_error}");
            }
        }
    }
    result
}

fn participate<T: Transport + ?Sized>(transport: &mut T, plan: &RankPlan<'_>) -> Result<()> {
    let jobs = receive_job_list(transport)?;
    debug!("Rank {} received {} jobs", transport.rank(), jobs.len());

    let partial = process_share(transport, &jobs, plan)?;
    barrier(transport)?;

    let (summary, buffers) = partial.into_parts();
    send_summary(transport, summary)?;
    if plan.gather {
        send_buffers(transport, buffers)?;
    }
    Ok(())
}

/// Sets the flag when dropped, so a panicking share still ends the watch
struct Finished<'a>(&'a AtomicBool);

impl Drop for Finished<'_> {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Run this rank's interleaved share of `jobs`.
///
/// The share runs on a scoped thread while this thread watches the links;
/// an `Abort` from another rank stops the share before its next job.
fn process_share<T: Transport + ?Sized>(
    transport: &mut T,
    jobs: &JobList,
    plan: &RankPlan<'_>,
) -> Result<PartialResult> {
    let rank = transport.rank();
    let sink = if plan.gather {
        OutputSink::Buffer
    } else {
        OutputSink::WriteThrough {
            output_dir: plan.output_dir,
        }
    };
    let unit = WorkerUnit {
        jobs,
        codec: plan.codec,
        kernel: plan.kernel,
        sink,
        failure_policy: plan.failure_policy,
    };

    let assignment = Assignment::interleaved(rank, transport.world_size(), jobs.len());
    let abort = AtomicBool::new(false);
    let finished = AtomicBool::new(false);

    crossbeam::thread::scope(|s| -> Result<PartialResult> {
        let (abort, finished) = (&abort, &finished);
        let share = s.spawn(move |_| {
            let _finished = Finished(finished);
            unit.run(WorkerContext::new(rank, assignment, abort))
        });

        let watched = watch_for_abort(transport, finished, abort);
        let partial = share.join().map_err(|_| SharpenError::WorkerPanicked)??;
        watched?;
        Ok(partial)
    })
    .map_err(|_| SharpenError::WorkerPanicked)?
}

/// Run every rank as a thread of this process, connected by channels.
///
/// Uses the same protocol and wire frames as separate processes.
pub fn run_in_process(
    world_size: usize,
    plan: &RankPlan<'_>,
    source: &JobSource<'_>,
) -> Result<RunOutcome> {
    if world_size == 0 {
        return Err(ConfigError::InvalidWorkerCount { count: world_size }.into());
    }
    source.prepare(plan.output_dir)?;

    let mut transports = LocalTransport::mesh(world_size).into_iter();
    let coordinator = transports
        .next()
        .ok_or(ConfigError::InvalidWorkerCount { count: world_size })?;

    crossbeam::thread::scope(|s| -> Result<RunOutcome> {
        let peers: Vec<_> = transports
            .map(|mut transport| s.spawn(move |_| run_peer(&mut transport, plan)))
            .collect();

        // The coordinator's channels close when it returns, which unblocks
        // any rank still waiting on it
        let outcome = {
            let mut coordinator = coordinator;
            run_coordinator(&mut coordinator, plan, source)
        };

        let mut peer_failure = None;
        for peer in peers {
            match peer.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    peer_failure.get_or_insert(e);
                }
                Err(_) => {
                    peer_failure.get_or_insert(SharpenError::WorkerPanicked);
                }
            }
        }

        let outcome = outcome?;
        match peer_failure {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    })
    .map_err(|_| SharpenError::WorkerPanicked)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ImageBuffer;
    use crate::codec::FsCodec;
    use crate::codec::testing::MemoryCodec;
    use image::{Rgb, RgbImage};
    use std::fs;
    use tempfile::TempDir;

    fn write_inputs(dir: &Path, count: usize) {
        for i in 0..count {
            RgbImage::from_pixel(5, 4, Rgb([(i as u8).wrapping_mul(10), 100, 200]))
                .save(dir.join(format!("img_{i:02}.png")))
                .unwrap();
        }
    }

    struct Fixture {
        _dir: TempDir,
        input: std::path::PathBuf,
        output: std::path::PathBuf,
        builder: JobListBuilder,
    }

    fn fixture(images: usize) -> Fixture {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        fs::create_dir(&input).unwrap();
        write_inputs(&input, images);
        Fixture {
            _dir: dir,
            input,
            output,
            builder: JobListBuilder::new(&["*.png"], 100).unwrap(),
        }
    }

    fn plan<'a>(codec: &'a dyn ImageCodec, output: &'a Path, gather: bool) -> RankPlan<'a> {
        RankPlan {
            codec,
            kernel: KernelMode::Serial,
            failure_policy: FailurePolicy::Abort,
            gather,
            output_dir: output,
        }
    }

    #[test]
    fn test_gather_names_follow_rank_order() {
        for world_size in 1..=4 {
            let fx = fixture(7);
            let source = JobSource {
                input_dir: &fx.input,
                builder: &fx.builder,
                output_extension: "png",
            };

            let outcome =
                run_in_process(world_size, &plan(&FsCodec, &fx.output, true), &source).unwrap();

            assert_eq!(outcome.aggregate.jobs_completed(), 7);
            assert_eq!(outcome.aggregate.workers().len(), world_size);

            // Rank-major order: rank r owns jobs r, r+N, ... and its images
            // follow those of every lower rank
            let expected: Vec<usize> = (0..world_size)
                .flat_map(|rank| (rank..7).step_by(world_size))
                .collect();
            let red: Vec<usize> = outcome
                .aggregate
                .images()
                .iter()
                .map(|image| image.get(0, 0, 0) as usize / 10)
                .collect();
            assert_eq!(red, expected, "world size {world_size}");

            for index in 0..7 {
                let written = fx.output.join(format!("processed_{index}.png"));
                let image = FsCodec.load(&written).unwrap();
                assert_eq!(image.get(0, 0, 0) as usize / 10, expected[index]);
            }
        }
    }

    #[test]
    fn test_write_through_keeps_file_names() {
        let fx = fixture(5);
        let source = JobSource {
            input_dir: &fx.input,
            builder: &fx.builder,
            output_extension: "jpg",
        };

        let outcome = run_in_process(3, &plan(&FsCodec, &fx.output, false), &source).unwrap();

        assert_eq!(outcome.aggregate.jobs_completed(), 5);
        assert!(outcome.aggregate.images().is_empty());
        for i in 0..5 {
            assert!(fx.output.join(format!("img_{i:02}.png")).is_file());
        }
    }

    #[test]
    fn test_total_time_is_sum_of_rank_times() {
        let fx = fixture(6);
        let source = JobSource {
            input_dir: &fx.input,
            builder: &fx.builder,
            output_extension: "png",
        };

        let outcome = run_in_process(3, &plan(&FsCodec, &fx.output, true), &source).unwrap();
        let sum: std::time::Duration = outcome
            .aggregate
            .workers()
            .iter()
            .map(|summary| summary.kernel_time)
            .sum();
        assert_eq!(outcome.aggregate.kernel_time(), sum);
        let per_rank: Vec<_> = outcome
            .aggregate
            .workers()
            .iter()
            .map(|summary| summary.jobs_completed)
            .collect();
        assert_eq!(per_rank, vec![2, 2, 2]);
    }

    #[test]
    fn test_failing_rank_aborts_the_run() {
        let fx = fixture(4);
        // Job 1 belongs to rank 1 and cannot be decoded
        fs::write(fx.input.join("img_01.png"), b"not a png").unwrap();
        let source = JobSource {
            input_dir: &fx.input,
            builder: &fx.builder,
            output_extension: "png",
        };

        let err = run_in_process(2, &plan(&FsCodec, &fx.output, true), &source).unwrap_err();
        match err {
            SharpenError::PeerAborted { rank, reason } => {
                assert_eq!(rank, 1);
                assert!(reason.contains("img_01.png"), "{reason}");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    /// Codec that fails on one path and is slow on every other load
    struct SlowCodec {
        failing: std::path::PathBuf,
        delay: std::time::Duration,
        loads: std::sync::atomic::AtomicUsize,
        saves: std::sync::atomic::AtomicUsize,
    }

    impl ImageCodec for SlowCodec {
        fn load(&self, path: &Path) -> Result<ImageBuffer> {
            if path == self.failing {
                return Err(SharpenError::Decode {
                    path: path.to_path_buf(),
                    reason: "corrupt".to_string(),
                });
            }
            std::thread::sleep(self.delay);
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(ImageBuffer::filled(4, 4, crate::buffer::ElementType::Rgb8, 50))
        }

        fn save(&self, _image: &ImageBuffer, _path: &Path) -> Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_coordinator_stops_its_share_when_a_rank_aborts() {
        let fx = fixture(40);
        let source = JobSource {
            input_dir: &fx.input,
            builder: &fx.builder,
            output_extension: "png",
        };
        // Rank 1 fails on its first job; the coordinator owns the 20 even jobs
        let codec = SlowCodec {
            failing: fx.input.join("img_01.png"),
            delay: std::time::Duration::from_millis(50),
            loads: Default::default(),
            saves: Default::default(),
        };

        let err = run_in_process(2, &plan(&codec, &fx.output, false), &source).unwrap_err();

        assert!(matches!(err, SharpenError::PeerAborted { rank: 1, .. }), "{err}");
        let loads = codec.loads.load(Ordering::SeqCst);
        let saves = codec.saves.load(Ordering::SeqCst);
        assert!(loads < 10, "coordinator loaded {loads} of its 20 jobs");
        assert!(saves < 10, "coordinator wrote {saves} of its 20 jobs");
    }

    #[test]
    fn test_failing_coordinator_stops_ranks() {
        let fx = fixture(40);
        let source = JobSource {
            input_dir: &fx.input,
            builder: &fx.builder,
            output_extension: "png",
        };
        // Job 0 belongs to the coordinator; ranks 1 and 2 own 26 slow jobs
        let codec = SlowCodec {
            failing: fx.input.join("img_00.png"),
            delay: std::time::Duration::from_millis(50),
            loads: Default::default(),
            saves: Default::default(),
        };

        let err = run_in_process(3, &plan(&codec, &fx.output, false), &source).unwrap_err();

        assert!(matches!(err, SharpenError::Decode { .. }), "{err}");
        let loads = codec.loads.load(Ordering::SeqCst);
        assert!(loads < 10, "ranks loaded {loads} of their 26 jobs");
    }

    #[test]
    fn test_failing_coordinator_releases_ranks() {
        let fx = fixture(4);
        // Job 0 belongs to the coordinator
        fs::write(fx.input.join("img_00.png"), b"not a png").unwrap();
        let source = JobSource {
            input_dir: &fx.input,
            builder: &fx.builder,
            output_extension: "png",
        };

        let err = run_in_process(3, &plan(&FsCodec, &fx.output, true), &source).unwrap_err();
        assert!(matches!(err, SharpenError::Decode { .. }));
    }

    #[test]
    fn test_missing_input_dir_fails_before_output_exists() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out");
        let builder = JobListBuilder::new(&["*.png"], 5).unwrap();
        let source = JobSource {
            input_dir: &dir.path().join("absent"),
            builder: &builder,
            output_extension: "jpg",
        };
        let codec = MemoryCodec::new();

        let err = run_in_process(2, &plan(&codec, &output, true), &source).unwrap_err();
        assert!(matches!(err, SharpenError::Config(ConfigError::InvalidInputDir { .. })));
        assert!(!output.exists());
        assert!(codec.saved().is_empty());
    }

    #[test]
    fn test_memory_codec_sees_every_gathered_image() {
        let jobs: Vec<_> = (0..5).map(|i| format!("/in/{i}.png")).collect();
        let codec = jobs
            .iter()
            .enumerate()
            .fold(MemoryCodec::new(), |codec, (i, path)| codec.with_image(path, i as u8));
        let list = JobList::new(jobs.iter().map(crate::jobs::JobDescriptor::new).collect());
        let plan = plan(&codec, Path::new("/out"), true);

        let mut ranks = LocalTransport::mesh(2).into_iter();
        let mut zero = ranks.next().unwrap();
        let mut one = ranks.next().unwrap();

        let remote = std::thread::scope(|s| {
            let handle = s.spawn(|| {
                let jobs = receive_job_list(&mut one).unwrap();
                let partial = process_share(&mut one, &jobs, &plan).unwrap();
                let (summary, buffers) = partial.into_parts();
                send_summary(&mut one, summary).unwrap();
                send_buffers(&mut one, buffers).unwrap();
            });

            broadcast_job_list(&mut zero, &list).unwrap();
            let (summary, local) = process_share(&mut zero, &list, &plan).unwrap().into_parts();
            let summaries = collect_summaries(&mut zero, summary).unwrap();
            let images: Vec<ImageBuffer> = gather_buffers(&mut zero, local).unwrap();
            handle.join().unwrap();
            (summaries, images)
        });

        let (summaries, images) = remote;
        assert_eq!(summaries.len(), 2);
        let markers: Vec<u8> = images.iter().map(|image| image.get(0, 0, 0)).collect();
        assert_eq!(markers, vec![0, 2, 4, 1, 3]);
    }
}
