//! Generic fork/join execution over a job list
//!
//! This module owns **who processes which job** and **how workers run**. It
//! knows nothing about images: callers hand [`ExecutionStrategy::execute`] a
//! job count and a per-worker closure, and get one result back per worker.
//!
//! ## What This Module Does:
//! - **Partitioning**: static interleave, static block and dynamic claim (see [`partition`])
//! - **Execution Strategy**: a single sequential worker, or a pool of scoped threads
//! - **Abort propagation**: a failing worker stops the rest before their next job
//! - **Resource Calculation**: derives a default thread count from `num_cpus::get()`
//!
//! The distributed variant reuses [`partition`] directly: each rank computes
//! its interleaved share locally.
//!
//! # Example Usage
//!
//! ```rust
//! use sharpen::parallel::{ExecutionStrategy, Schedule};
//!
//! let strategy = ExecutionStrategy::Parallel { workers: 3, schedule: Schedule::Dynamic };
//! let per_worker = strategy
//!     .execute(10, |mut ctx| {
//!         let mut count = 0;
//!         while ctx.next_job().is_some() {
//!             count += 1;
//!         }
//!         Ok(count)
//!     })
//!     .unwrap();
//!
//! assert_eq!(per_worker.iter().sum::<usize>(), 10);
//! ```

pub mod core;
pub mod partition;

// Re-export main types for easier access
pub use self::core::{ExecutionStrategy, WorkerContext};
pub use self::partition::{Assignment, ClaimCounter, Schedule};
