//! Message-passing execution across ranks.
//!
//! Rank 0 is the coordinator: it builds the job list, broadcasts it, and
//! reduces timings and (in the gather variant) image buffers. Every other
//! rank talks only to rank 0. Two transports carry the same frames:
//! [`TcpTransport`] between separate processes and [`LocalTransport`]
//! between threads of one process.

pub mod collective;
pub mod launcher;
pub mod local;
pub mod rank;
pub mod tcp;
pub mod wire;

use crate::error::Result;

pub use launcher::ProcessGroup;
pub use local::LocalTransport;
pub use rank::{JobSource, RankPlan, run_coordinator, run_in_process, run_peer};
pub use tcp::TcpTransport;
pub use wire::Message;

/// Rank of the coordinating worker
pub const COORDINATOR: usize = 0;

/// Point-to-point messaging between the ranks of one run
pub trait Transport {
    fn rank(&self) -> usize;

    fn world_size(&self) -> usize;

    /// Blocking send to rank `to`
    fn send(&mut self, to: usize, message: &Message) -> Result<()>;

    /// Blocking receive of the next message from rank `from`
    fn recv(&mut self, from: usize) -> Result<Message>;

    /// Non-blocking look at the next message from rank `from`.
    ///
    /// `None` when nothing has arrived yet. A peeked message stays queued
    /// and is returned by the next [`Transport::recv`] from that rank.
    fn peek(&mut self, from: usize) -> Result<Option<&Message>>;

    fn is_coordinator(&self) -> bool {
        self.rank() == COORDINATOR
    }
}
