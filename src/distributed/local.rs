//! In-process transport: ranks are threads, links are crossbeam channels
//! carrying encoded frames.

use super::Transport;
use super::wire::Message;
use crate::error::{Result, TransportError};
use bytes::Bytes;
use crossbeam::channel::{Receiver, Sender, TryRecvError, unbounded};

pub struct LocalTransport {
    rank: usize,
    world_size: usize,
    outgoing: Vec<Option<Sender<Bytes>>>,
    incoming: Vec<Option<Receiver<Bytes>>>,
    peeked: Vec<Option<Message>>,
}

impl LocalTransport {
    /// One connected transport per rank, index = rank
    pub fn mesh(world_size: usize) -> Vec<LocalTransport> {
        let mut transports: Vec<LocalTransport> = (0..world_size)
            .map(|rank| LocalTransport {
                rank,
                world_size,
                outgoing: (0..world_size).map(|_| None).collect(),
                incoming: (0..world_size).map(|_| None).collect(),
                peeked: (0..world_size).map(|_| None).collect(),
            })
            .collect();

        for from in 0..world_size {
            for to in 0..world_size {
                if from == to {
                    continue;
                }
                let (tx, rx) = unbounded();
                transports[from].outgoing[to] = Some(tx);
                transports[to].incoming[from] = Some(rx);
            }
        }

        transports
    }

    fn invalid(&self, rank: usize) -> TransportError {
        TransportError::InvalidRank {
            rank,
            from: self.rank,
            world_size: self.world_size,
        }
    }
}

impl Transport for LocalTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn send(&mut self, to: usize, message: &Message) -> Result<()> {
        let sender = self
            .outgoing
            .get(to)
            .and_then(Option::as_ref)
            .ok_or_else(|| self.invalid(to))?;
        sender
            .send(message.encode()?)
            .map_err(|_| TransportError::Disconnected { rank: to })?;
        Ok(())
    }

    fn recv(&mut self, from: usize) -> Result<Message> {
        if let Some(message) = self.peeked.get_mut(from).and_then(Option::take) {
            return Ok(message);
        }

        let receiver = self
            .incoming
            .get(from)
            .and_then(Option::as_ref)
            .ok_or_else(|| self.invalid(from))?;
        let frame = receiver
            .recv()
            .map_err(|_| TransportError::Disconnected { rank: from })?;
        Message::decode(&frame)
    }

    fn peek(&mut self, from: usize) -> Result<Option<&Message>> {
        let receiver = self
            .incoming
            .get(from)
            .and_then(Option::as_ref)
            .ok_or_else(|| self.invalid(from))?;

        if self.peeked[from].is_none() {
            match receiver.try_recv() {
                Ok(frame) => self.peeked[from] = Some(Message::decode(&frame)?),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    return Err(TransportError::Disconnected { rank: from }.into());
                }
            }
        }
        Ok(self.peeked[from].as_ref())
    }
}
