//! Loopback TCP transport for ranks running as separate processes.
//!
//! Star topology: the coordinator accepts one connection per rank, each
//! rank opens exactly one connection to the coordinator and introduces
//! itself with a `Hello` frame.

use super::launcher::ProcessGroup;
use super::wire::{Message, link_error};
use super::{COORDINATOR, Transport};
use crate::error::{Result, TransportError};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

struct Link {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Link {
    fn new(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
        })
    }
}

pub struct TcpTransport {
    rank: usize,
    world_size: usize,
    links: Vec<Option<Link>>,
    peeked: Vec<Option<Message>>,
}

impl TcpTransport {
    /// Coordinator side: wait until ranks `1..world_size` have all connected.
    ///
    /// Fails early if a child in `group` exits before connecting.
    pub fn accept(
        listener: &TcpListener,
        world_size: usize,
        timeout: Duration,
        group: &mut ProcessGroup,
    ) -> Result<Self> {
        let mut links: Vec<Option<Link>> = (0..world_size).map(|_| None).collect();
        let mut missing = world_size.saturating_sub(1);
        let deadline = Instant::now() + timeout;

        listener.set_nonblocking(true)?;
        while missing > 0 {
            match listener.accept() {
                Ok((stream, addr)) => {
                    stream.set_nonblocking(false)?;
                    let (rank, link) = handshake(stream, world_size)?;
                    if links[rank].is_some() {
                        return Err(TransportError::Malformed {
                            what: "hello",
                            reason: format!("rank {rank} connected twice"),
                        }
                        .into());
                    }
                    debug!("Rank {rank} connected from {addr}");
                    links[rank] = Some(link);
                    missing -= 1;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    group.check_running()?;
                    if Instant::now() >= deadline {
                        return Err(TransportError::RendezvousTimeout { missing }.into());
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
        listener.set_nonblocking(false)?;

        Ok(Self {
            rank: COORDINATOR,
            world_size,
            links,
            peeked: (0..world_size).map(|_| None).collect(),
        })
    }

    /// Rank side: connect to the coordinator at `addr`, retrying until
    /// `timeout` elapses
    pub fn connect(
        addr: SocketAddr,
        rank: usize,
        world_size: usize,
        timeout: Duration,
    ) -> Result<Self> {
        if rank == COORDINATOR || rank >= world_size {
            return Err(TransportError::InvalidRank {
                rank,
                from: rank,
                world_size,
            }
            .into());
        }

        let deadline = Instant::now() + timeout;
        let stream = loop {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => break stream,
                Err(e) if Instant::now() < deadline => {
                    trace!("Rank {rank} waiting for coordinator at {addr}: {e}");
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        };

        let mut links: Vec<Option<Link>> = (0..world_size).map(|_| None).collect();
        links[COORDINATOR] = Some(Link::new(stream)?);

        let mut transport = Self {
            rank,
            world_size,
            links,
            peeked: (0..world_size).map(|_| None).collect(),
        };
        let hello = Message::Hello {
            rank: u32::try_from(rank).map_err(|_| transport.invalid(rank))?,
        };
        transport.send(COORDINATOR, &hello)?;
        debug!("Rank {rank} connected to coordinator at {addr}");

        Ok(transport)
    }

    fn invalid(&self, rank: usize) -> TransportError {
        TransportError::InvalidRank {
            rank,
            from: self.rank,
            world_size: self.world_size,
        }
    }

    fn link(&mut self, rank: usize) -> Result<&mut Link> {
        let invalid = self.invalid(rank);
        self.links
            .get_mut(rank)
            .and_then(Option::as_mut)
            .ok_or_else(|| invalid.into())
    }
}

/// True when at least one byte from the peer is readable without blocking.
///
/// The first byte of a frame is only sent together with the rest of it, so
/// a readable link always holds a frame that can be read to the end.
fn frame_ready(link: &mut Link, peer: usize) -> Result<bool> {
    if !link.reader.buffer().is_empty() {
        return Ok(true);
    }

    link.reader.get_ref().set_nonblocking(true)?;
    let filled = link.reader.fill_buf().map(|buf| buf.len());
    link.reader.get_ref().set_nonblocking(false)?;

    match filled {
        Ok(0) => Err(TransportError::Disconnected { rank: peer }.into()),
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(link_error(e, peer)),
    }
}

/// Read the `Hello` frame of a freshly accepted connection
fn handshake(stream: TcpStream, world_size: usize) -> Result<(usize, Link)> {
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    let mut link = Link::new(stream)?;

    let hello = Message::read_from(&mut link.reader, COORDINATOR).map_err(|e| {
        TransportError::Malformed {
            what: "hello",
            reason: e.to_string(),
        }
    })?;
    let rank = match hello {
        Message::Hello { rank } => rank as usize,
        other => {
            return Err(TransportError::Malformed {
                what: "hello",
                reason: format!("expected hello, got {}", other.kind()),
            }
            .into());
        }
    };

    if rank == COORDINATOR || rank >= world_size {
        return Err(TransportError::InvalidRank {
            rank,
            from: COORDINATOR,
            world_size,
        }
        .into());
    }

    link.reader.get_ref().set_read_timeout(None)?;
    Ok((rank, link))
}

impl Transport for TcpTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn send(&mut self, to: usize, message: &Message) -> Result<()> {
        let frame = message.encode()?;
        let link = self.link(to)?;
        link.writer
            .write_all(&frame)
            .and_then(|()| link.writer.flush())
            .map_err(|e| link_error(e, to))
    }

    fn recv(&mut self, from: usize) -> Result<Message> {
        if let Some(message) = self.peeked.get_mut(from).and_then(Option::take) {
            return Ok(message);
        }
        let link = self.link(from)?;
        Message::read_from(&mut link.reader, from)
    }

    fn peek(&mut self, from: usize) -> Result<Option<&Message>> {
        let invalid = self.invalid(from);
        let link = self
            .links
            .get_mut(from)
            .and_then(Option::as_mut)
            .ok_or(invalid)?;
        let slot = &mut self.peeked[from];

        if slot.is_none() && frame_ready(link, from)? {
            *slot = Some(Message::read_from(&mut link.reader, from)?);
        }
        Ok(slot.as_ref())
    }
}
