//! Command-line interface for sharpen
//!
//! One subcommand per execution strategy, plus a hidden `rank-worker`
//! subcommand the distributed coordinator uses to start its child ranks.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;
mod output;

pub use output::Output;

use commands::{distributed, rank_worker, sequential, threaded};

/// Sharpen a directory of images with a fixed 3x3 kernel
#[derive(Parser)]
#[command(
    name = "sharpen",
    version,
    about = "Batch 3x3 image sharpening, sequential, threaded or distributed",
    long_about = "Applies a fixed 3x3 sharpening kernel to every .png/.jpg image in a directory \
                  and writes the results to an output directory. The same batch can run on one \
                  thread, on a pool of threads, or across several processes that exchange \
                  messages, so the strategies can be compared."
)]
pub struct Cli {
    /// Increase verbosity (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Use custom settings file (TOML, JSON or YAML)
    #[arg(long, value_name = "FILE", env = "SHARPEN_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Print the final report as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process every image on the calling thread
    Sequential(sequential::SequentialArgs),
    /// Process images on a pool of threads sharing memory
    Threaded(threaded::ThreadedArgs),
    /// Process images across separate processes exchanging messages
    Distributed(distributed::DistributedArgs),
    /// Run one non-coordinator rank of a distributed run
    #[command(hide = true)]
    RankWorker(rank_worker::RankWorkerArgs),
}

/// Flags shared by every subcommand
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    pub verbose: u8,
    pub quiet: bool,
    pub config: Option<PathBuf>,
    pub json: bool,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        // Set up logging based on verbosity
        setup_logging(self.verbose, self.quiet);

        let globals = GlobalOptions {
            verbose: self.verbose,
            quiet: self.quiet,
            config: self.config,
            json: self.json,
        };

        match self.command {
            Commands::Sequential(args) => sequential::execute(args, &globals),
            Commands::Threaded(args) => threaded::execute(args, &globals),
            Commands::Distributed(args) => distributed::execute(args, &globals),
            Commands::RankWorker(args) => rank_worker::execute(args),
        }
    }
}

fn setup_logging(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        match verbose {
            0 => tracing_subscriber::EnvFilter::new("warn"),
            1 => tracing_subscriber::EnvFilter::new("info,ignore=warn,globset=warn"),
            2 => tracing_subscriber::EnvFilter::new("debug,ignore=warn,globset=warn"),
            _ => tracing_subscriber::EnvFilter::new("trace"),
        }
    });

    // stdout carries the report, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
