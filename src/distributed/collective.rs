//! Collective steps of a distributed run, built from point-to-point messages.
//!
//! The coordinator always services ranks in ascending order, so the result
//! of every collective is a function of rank alone, never of arrival time.

use super::wire::Message;
use super::{COORDINATOR, Transport};
use crate::aggregate::{WorkerSummary, reassemble};
use crate::buffer::ImageBuffer;
use crate::error::{Result, SharpenError, TransportError};
use crate::jobs::JobList;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// How often a waiting rank looks for frames from the other ranks
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Error for a message that does not fit the current protocol step.
///
/// An `Abort` from the peer becomes [`SharpenError::PeerAborted`].
fn unexpected(from: usize, expected: &'static str, got: Message) -> SharpenError {
    match got {
        Message::Abort(reason) => SharpenError::PeerAborted { rank: from, reason },
        other => TransportError::Unexpected {
            rank: from,
            expected,
            got: other.kind(),
        }
        .into(),
    }
}

fn peers<T: Transport + ?Sized>(transport: &T) -> std::ops::Range<usize> {
    1..transport.world_size()
}

/// Ranks this rank has a link to: every other rank for the coordinator,
/// only the coordinator otherwise
fn linked<T: Transport + ?Sized>(transport: &T) -> std::ops::Range<usize> {
    if transport.is_coordinator() {
        peers(transport)
    } else {
        COORDINATOR..COORDINATOR + 1
    }
}

/// Non-blocking: the `Abort` already waiting on any link, as
/// [`SharpenError::PeerAborted`]. Other frames stay queued.
pub fn pending_abort<T: Transport + ?Sized>(transport: &mut T) -> Result<Option<SharpenError>> {
    for rank in linked(transport) {
        if matches!(transport.peek(rank)?, Some(Message::Abort(_))) {
            let message = transport.recv(rank)?;
            return Ok(Some(unexpected(rank, "nothing", message)));
        }
    }
    Ok(None)
}

/// Poll the links until `done` is set, raising `abort` as soon as another
/// rank aborts or hangs up
pub fn watch_for_abort<T: Transport + ?Sized>(
    transport: &mut T,
    done: &AtomicBool,
    abort: &AtomicBool,
) -> Result<()> {
    while !done.load(Ordering::SeqCst) {
        let failure = match pending_abort(transport) {
            Ok(None) => None,
            Ok(Some(e)) | Err(e) => Some(e),
        };
        if let Some(e) = failure {
            warn!("Rank {} stopping early: {e}", transport.rank());
            abort.store(true, Ordering::SeqCst);
            return Err(e);
        }
        thread::sleep(POLL_INTERVAL);
    }
    Ok(())
}

/// Coordinator: send the encoded job list to every other rank
pub fn broadcast_job_list<T: Transport + ?Sized>(transport: &mut T, jobs: &JobList) -> Result<()> {
    let message = Message::JobList(jobs.encode()?);
    for rank in peers(transport) {
        transport.send(rank, &message)?;
    }
    debug!("Broadcast {} jobs to {} rank(s)", jobs.len(), transport.world_size() - 1);
    Ok(())
}

/// Rank: receive the job list broadcast by the coordinator
pub fn receive_job_list<T: Transport + ?Sized>(transport: &mut T) -> Result<JobList> {
    match transport.recv(COORDINATOR)? {
        Message::JobList(blob) => JobList::decode(&blob),
        other => Err(unexpected(COORDINATOR, "job list", other)),
    }
}

/// Every rank blocks until all ranks have arrived
pub fn barrier<T: Transport + ?Sized>(transport: &mut T) -> Result<()> {
    if transport.is_coordinator() {
        // Poll every rank instead of blocking on the lowest one, so an abort
        // from any rank ends the wait
        let mut waiting: Vec<usize> = peers(transport).collect();
        while !waiting.is_empty() {
            let mut arrived = Vec::new();
            for &rank in &waiting {
                if transport.peek(rank)?.is_none() {
                    continue;
                }
                match transport.recv(rank)? {
                    Message::Barrier => {
                        trace!("Rank {rank} reached the barrier");
                        arrived.push(rank);
                    }
                    other => return Err(unexpected(rank, "barrier", other)),
                }
            }
            waiting.retain(|rank| !arrived.contains(rank));
            if !waiting.is_empty() {
                thread::sleep(POLL_INTERVAL);
            }
        }
        for rank in peers(transport) {
            transport.send(rank, &Message::Release)?;
        }
        Ok(())
    } else {
        transport.send(COORDINATOR, &Message::Barrier)?;
        match transport.recv(COORDINATOR)? {
            Message::Release => Ok(()),
            other => Err(unexpected(COORDINATOR, "release", other)),
        }
    }
}

/// Coordinator: the local summary followed by one summary per rank, in rank order
pub fn collect_summaries<T: Transport + ?Sized>(
    transport: &mut T,
    local: WorkerSummary,
) -> Result<Vec<WorkerSummary>> {
    let mut summaries = vec![local];
    for rank in peers(transport) {
        match transport.recv(rank)? {
            Message::Summary(summary) if summary.worker == rank => summaries.push(summary),
            Message::Summary(summary) => {
                return Err(TransportError::Malformed {
                    what: "summary",
                    reason: format!("rank {rank} reported itself as worker {}", summary.worker),
                }
                .into());
            }
            other => return Err(unexpected(rank, "summary", other)),
        }
    }
    Ok(summaries)
}

pub fn send_summary<T: Transport + ?Sized>(transport: &mut T, summary: WorkerSummary) -> Result<()> {
    transport.send(COORDINATOR, &Message::Summary(summary))
}

/// Coordinator: drain rank 1, then rank 2, ... and reassemble behind the
/// coordinator's own buffers
pub fn gather_buffers<T: Transport + ?Sized>(
    transport: &mut T,
    local: Vec<ImageBuffer>,
) -> Result<Vec<ImageBuffer>> {
    let mut remote = Vec::with_capacity(transport.world_size().saturating_sub(1));

    for rank in peers(transport) {
        let count = match transport.recv(rank)? {
            Message::BufferCount(count) => count,
            other => return Err(unexpected(rank, "buffer count", other)),
        };

        let mut buffers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match transport.recv(rank)? {
                Message::Image(image) => buffers.push(image),
                other => return Err(unexpected(rank, "image", other)),
            }
        }
        debug!("Gathered {count} image(s) from rank {rank}");
        remote.push((rank, buffers));
    }

    Ok(reassemble(local, remote))
}

/// Rank: send the buffer count, then every buffer in local order
pub fn send_buffers<T: Transport + ?Sized>(transport: &mut T, buffers: Vec<ImageBuffer>) -> Result<()> {
    let count = u32::try_from(buffers.len()).map_err(|_| TransportError::Malformed {
        what: "buffer count",
        reason: format!("{} buffers do not fit in u32", buffers.len()),
    })?;

    transport.send(COORDINATOR, &Message::BufferCount(count))?;
    for image in buffers {
        transport.send(COORDINATOR, &Message::Image(image))?;
    }
    Ok(())
}
