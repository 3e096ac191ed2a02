use anyhow::{Context, Result};
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::codec::FsCodec;
use crate::distributed::{RankPlan, TcpTransport, run_peer};
use crate::kernel::KernelMode;
use crate::worker::FailurePolicy;

/// Started by the distributed coordinator, one process per rank
#[derive(Args, Debug)]
pub struct RankWorkerArgs {
    #[arg(long)]
    pub rank: usize,

    #[arg(long)]
    pub world_size: usize,

    /// Address the coordinator listens on
    #[arg(long)]
    pub coordinator: SocketAddr,

    #[arg(long)]
    pub output_dir: PathBuf,

    #[arg(long, value_enum)]
    pub kernel: KernelMode,

    #[arg(long, value_enum)]
    pub failure_policy: FailurePolicy,

    #[arg(long)]
    pub connect_timeout_secs: u64,

    #[arg(long)]
    pub write_through: bool,
}

pub fn execute(args: RankWorkerArgs) -> Result<()> {
    let mut transport = TcpTransport::connect(
        args.coordinator,
        args.rank,
        args.world_size,
        Duration::from_secs(args.connect_timeout_secs),
    )
    .with_context(|| format!("Rank {} could not reach {}", args.rank, args.coordinator))?;

    let plan = RankPlan {
        codec: &FsCodec,
        kernel: args.kernel,
        failure_policy: args.failure_policy,
        gather: !args.write_through,
        output_dir: &args.output_dir,
    };

    run_peer(&mut transport, &plan).with_context(|| format!("Rank {} failed", args.rank))
}
