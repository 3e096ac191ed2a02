//! # sharpen - batch 3x3 image sharpening
//!
//! Applies a fixed sharpening stencil to every image in a directory under
//! one of three interchangeable execution strategies:
//!
//! - **Sequential**: one control flow, jobs in list order
//! - **Threaded**: a pool of scoped threads with interleaved, block or
//!   dynamic job assignment
//! - **Distributed**: separate ranks exchanging explicit messages, with
//!   results gathered at rank 0 or written by each rank
//!
//! The job list, partitioning, per-worker timing and result reassembly are
//! shared by all three, so their timings can be compared directly.
//!
//! ## Quick Start
//!
//! ```bash
//! sharpen sequential images/ out/ 100
//! sharpen threaded images/ out/ 8 100 --schedule dynamic
//! sharpen distributed images/ out/ 4 100
//! ```

pub mod aggregate;
pub mod buffer;
pub mod cli;
pub mod codec;
pub mod config;
pub mod distributed;
pub mod error;
pub mod jobs;
pub mod kernel;
pub mod parallel;
pub mod report;
pub mod runner;
pub mod worker;

pub use buffer::{ElementType, ImageBuffer};
pub use cli::{Cli, Output};
pub use config::SharpenConfig;
pub use error::{Result, SharpenError};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
