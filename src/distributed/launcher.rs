//! Child rank processes owned by the coordinator.

use crate::error::{Result, TransportError};
use std::ffi::OsString;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use tracing::{debug, warn};

/// Ranks `1..world_size` running as child processes.
///
/// Dropping the group kills every child that is still running.
#[derive(Debug, Default)]
pub struct ProcessGroup {
    children: Vec<(usize, Child)>,
}

impl ProcessGroup {
    /// Start `program` once per non-coordinator rank with the arguments
    /// `args_for(rank)`
    pub fn spawn<F>(program: &Path, world_size: usize, args_for: F) -> Result<Self>
    where
        F: Fn(usize) -> Vec<OsString>,
    {
        let mut group = Self::default();
        for rank in 1..world_size {
            let child = Command::new(program)
                .args(args_for(rank))
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::inherit())
                .spawn()?;
            debug!("Started rank {rank} as pid {}", child.id());
            group.children.push((rank, child));
        }
        Ok(group)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Fail if any child has already exited
    pub fn check_running(&mut self) -> Result<()> {
        for (rank, child) in &mut self.children {
            if let Some(status) = child.try_wait()? {
                return Err(TransportError::ChildExited {
                    rank: *rank,
                    status: status.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Wait for every child; any unsuccessful exit is an error
    pub fn wait(mut self) -> Result<()> {
        let mut children = std::mem::take(&mut self.children).into_iter();
        while let Some((rank, mut child)) = children.next() {
            let status = child.wait()?;
            if !status.success() {
                // Put the rest back so drop kills them
                self.children.extend(children);
                return Err(TransportError::ChildExited {
                    rank,
                    status: status.to_string(),
                }
                .into());
            }
            debug!("Rank {rank} exited cleanly");
        }
        Ok(())
    }

    pub fn kill_all(&mut self) {
        for (rank, child) in &mut self.children {
            if let Ok(None) = child.try_wait()
                && let Err(e) = child.kill()
            {
                warn!("Failed to stop rank {rank}: {e}");
            }
            // Reap so no zombie outlives the coordinator
            if let Err(e) = child.wait() {
                debug!("Failed to reap rank {rank}: {e}");
            }
        }
        self.children.clear();
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill_all();
    }
}
