use super::partition::{Assignment, ClaimCounter, Schedule};
use crate::error::{ConfigError, Result, SharpenError};
use std::sync::atomic::{AtomicBool, Ordering};

/// What one worker gets handed by the executor
pub struct WorkerContext<'a> {
    worker_id: usize,
    assignment: Assignment<'a>,
    abort: &'a AtomicBool,
}

impl<'a> WorkerContext<'a> {
    pub fn new(worker_id: usize, assignment: Assignment<'a>, abort: &'a AtomicBool) -> Self {
        Self {
            worker_id,
            assignment,
            abort,
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// True once any worker of the run has failed
    pub fn should_stop(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Next job index to process, `None` when the assignment is exhausted or
    /// the run is being aborted
    pub fn next_job(&mut self) -> Option<usize> {
        if self.should_stop() {
            return None;
        }
        self.assignment.next()
    }
}

/// Execution strategy enum for choosing between parallel and sequential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    Sequential,
    Parallel { workers: usize, schedule: Schedule },
}

impl ExecutionStrategy {
    /// Number of workers this strategy runs
    pub fn workers(&self) -> usize {
        match self {
            ExecutionStrategy::Sequential => 1,
            ExecutionStrategy::Parallel { workers, .. } => *workers,
        }
    }

    /// Run `work` once per worker over `job_count` jobs and return one result
    /// per worker, in worker order.
    ///
    /// A worker returning `Err` raises the shared abort flag so the others
    /// stop before their next job; the first error in worker order is
    /// returned once every worker has joined.
    pub fn execute<R, F>(&self, job_count: usize, work: F) -> Result<Vec<R>>
    where
        R: Send,
        F: Fn(WorkerContext<'_>) -> Result<R> + Sync,
    {
        let abort = AtomicBool::new(false);

        match *self {
            ExecutionStrategy::Sequential => {
                let ctx = WorkerContext::new(0, Assignment::all(job_count), &abort);
                Ok(vec![work(ctx)?])
            }
            ExecutionStrategy::Parallel { workers, schedule } => {
                if workers == 0 {
                    return Err(ConfigError::InvalidWorkerCount { count: workers }.into());
                }
                execute_parallel(workers, schedule, job_count, &abort, &work)
            }
        }
    }

    /// Worker count derived from the CPU count: `cores * thread_percentage / 100`,
    /// never less than one
    pub fn calculate_optimal_workers(thread_percentage: u8) -> usize {
        let available_cores = num_cpus::get();
        std::cmp::max(1, (available_cores * thread_percentage as usize) / 100)
    }
}

fn execute_parallel<R, F>(
    workers: usize,
    schedule: Schedule,
    job_count: usize,
    abort: &AtomicBool,
    work: &F,
) -> Result<Vec<R>>
where
    R: Send,
    F: Fn(WorkerContext<'_>) -> Result<R> + Sync,
{
    let counter = ClaimCounter::new(job_count);

    // Use crossbeam::thread::scope for safe borrowing
    let outcomes = crossbeam::thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|worker_id| {
                let assignment = match schedule {
                    Schedule::Interleave => Assignment::interleaved(worker_id, workers, job_count),
                    Schedule::Block => Assignment::block(worker_id, workers, job_count),
                    Schedule::Dynamic => Assignment::claim(&counter),
                };

                s.spawn(move |_| {
                    let result = work(WorkerContext::new(worker_id, assignment, abort));
                    if result.is_err() {
                        abort.store(true, Ordering::SeqCst);
                    }
                    result
                })
            })
            .collect();

        handles.into_iter().map(|h| h.join()).collect::<Vec<_>>()
    })
    .map_err(|_| SharpenError::WorkerPanicked)?;

    let mut results = Vec::with_capacity(workers);
    for outcome in outcomes {
        results.push(outcome.map_err(|_| SharpenError::WorkerPanicked)??);
    }
    Ok(results)
}
