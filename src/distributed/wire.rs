//! Frames exchanged between ranks.
//!
//! Every frame is `tag: u8`, `len: u32 (LE)`, then `len` payload bytes. All
//! integers are little-endian. Payloads:
//!
//! | tag | message       | payload                                                   |
//! |-----|---------------|-----------------------------------------------------------|
//! | 1   | `Hello`       | rank `u32`                                                |
//! | 2   | `JobList`     | encoded [`JobList`](crate::jobs::JobList) blob            |
//! | 3   | `Barrier`     | empty                                                     |
//! | 4   | `Release`     | empty                                                     |
//! | 5   | `Summary`     | worker `u32`, completed `u64`, skipped `u64`, secs `u64`, nanos `u32` |
//! | 6   | `BufferCount` | count `u32`                                               |
//! | 7   | `Image`       | rows `u32`, cols `u32`, element tag `u8`, `rows*cols*size` bytes |
//! | 8   | `Abort`       | UTF-8 reason                                              |
//!
//! One image is always one frame, so a reader never sees two buffers
//! interleaved.

use crate::aggregate::WorkerSummary;
use crate::buffer::{ElementType, ImageBuffer};
use crate::error::{Result, SharpenError, TransportError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{self, Read, Write};
use std::time::Duration;

const HEADER_LEN: usize = 5;
const SUMMARY_LEN: usize = 4 + 8 + 8 + 8 + 4;
const IMAGE_HEADER_LEN: usize = 4 + 4 + 1;

const TAG_HELLO: u8 = 1;
const TAG_JOB_LIST: u8 = 2;
const TAG_BARRIER: u8 = 3;
const TAG_RELEASE: u8 = 4;
const TAG_SUMMARY: u8 = 5;
const TAG_BUFFER_COUNT: u8 = 6;
const TAG_IMAGE: u8 = 7;
const TAG_ABORT: u8 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// First frame a rank sends after connecting
    Hello { rank: u32 },
    JobList(Vec<u8>),
    Barrier,
    Release,
    Summary(WorkerSummary),
    BufferCount(u32),
    Image(ImageBuffer),
    /// Sender failed and is about to exit
    Abort(String),
}

impl Message {
    /// Short name for protocol errors
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "hello",
            Message::JobList(_) => "job list",
            Message::Barrier => "barrier",
            Message::Release => "release",
            Message::Summary(_) => "summary",
            Message::BufferCount(_) => "buffer count",
            Message::Image(_) => "image",
            Message::Abort(_) => "abort",
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Message::Hello { .. } => TAG_HELLO,
            Message::JobList(_) => TAG_JOB_LIST,
            Message::Barrier => TAG_BARRIER,
            Message::Release => TAG_RELEASE,
            Message::Summary(_) => TAG_SUMMARY,
            Message::BufferCount(_) => TAG_BUFFER_COUNT,
            Message::Image(_) => TAG_IMAGE,
            Message::Abort(_) => TAG_ABORT,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Message::Hello { .. } | Message::BufferCount(_) => 4,
            Message::JobList(blob) => blob.len(),
            Message::Barrier | Message::Release => 0,
            Message::Summary(_) => SUMMARY_LEN,
            Message::Image(image) => IMAGE_HEADER_LEN + image.as_bytes().len(),
            Message::Abort(reason) => reason.len(),
        }
    }

    /// Complete frame, header included
    pub fn encode(&self) -> Result<Bytes> {
        let payload_len = self.payload_len();
        let mut frame = BytesMut::with_capacity(HEADER_LEN + payload_len);
        frame.put_u8(self.tag());
        frame.put_u32_le(to_u32(payload_len, "frame length")?);

        match self {
            Message::Hello { rank } => frame.put_u32_le(*rank),
            Message::JobList(blob) => frame.put_slice(blob),
            Message::Barrier | Message::Release => {}
            Message::Summary(summary) => {
                frame.put_u32_le(to_u32(summary.worker, "worker id")?);
                frame.put_u64_le(summary.jobs_completed as u64);
                frame.put_u64_le(summary.jobs_skipped as u64);
                frame.put_u64_le(summary.kernel_time.as_secs());
                frame.put_u32_le(summary.kernel_time.subsec_nanos());
            }
            Message::BufferCount(count) => frame.put_u32_le(*count),
            Message::Image(image) => {
                frame.put_u32_le(to_u32(image.rows(), "image rows")?);
                frame.put_u32_le(to_u32(image.cols(), "image cols")?);
                frame.put_u8(image.element_type().tag());
                frame.put_slice(image.as_bytes());
            }
            Message::Abort(reason) => frame.put_slice(reason.as_bytes()),
        }

        Ok(frame.freeze())
    }

    /// Inverse of [`Message::encode`] for one complete frame
    pub fn decode(frame: &[u8]) -> Result<Self> {
        if frame.len() < HEADER_LEN {
            return Err(malformed("frame", "header is truncated"));
        }
        let (mut header, payload) = frame.split_at(HEADER_LEN);
        let tag = header.get_u8();
        let len = header.get_u32_le() as usize;
        if payload.len() != len {
            return Err(malformed(
                "frame",
                format!("header announces {len} bytes, frame carries {}", payload.len()),
            ));
        }
        Self::from_parts(tag, Bytes::copy_from_slice(payload))
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.encode()?)?;
        Ok(())
    }

    /// Read exactly one frame; a closed stream maps to
    /// [`TransportError::Disconnected`] for `peer`
    pub fn read_from<R: Read>(reader: &mut R, peer: usize) -> Result<Self> {
        let mut header = [0u8; HEADER_LEN];
        read_exact(reader, &mut header, peer)?;

        let mut fields = &header[..];
        let tag = fields.get_u8();
        let len = fields.get_u32_le() as usize;

        let mut payload = vec![0u8; len];
        read_exact(reader, &mut payload, peer)?;

        Self::from_parts(tag, Bytes::from(payload))
    }

    fn from_parts(tag: u8, mut payload: Bytes) -> Result<Self> {
        let message = match tag {
            TAG_HELLO => {
                ensure_remaining(&payload, 4, "hello")?;
                Message::Hello {
                    rank: payload.get_u32_le(),
                }
            }
            TAG_JOB_LIST => return Ok(Message::JobList(payload.into())),
            TAG_BARRIER => Message::Barrier,
            TAG_RELEASE => Message::Release,
            TAG_SUMMARY => {
                ensure_remaining(&payload, SUMMARY_LEN, "summary")?;
                let worker = payload.get_u32_le() as usize;
                let jobs_completed = payload.get_u64_le() as usize;
                let jobs_skipped = payload.get_u64_le() as usize;
                let secs = payload.get_u64_le();
                let nanos = payload.get_u32_le();
                if nanos >= 1_000_000_000 {
                    return Err(malformed(
                        "summary",
                        format!("{nanos} is not a sub-second nanosecond count"),
                    ));
                }
                Message::Summary(WorkerSummary {
                    worker,
                    jobs_completed,
                    jobs_skipped,
                    kernel_time: Duration::new(secs, nanos),
                })
            }
            TAG_BUFFER_COUNT => {
                ensure_remaining(&payload, 4, "buffer count")?;
                Message::BufferCount(payload.get_u32_le())
            }
            TAG_IMAGE => {
                ensure_remaining(&payload, IMAGE_HEADER_LEN, "image")?;
                let rows = payload.get_u32_le() as usize;
                let cols = payload.get_u32_le() as usize;
                let element_tag = payload.get_u8();
                let element_type = ElementType::from_tag(element_tag).ok_or_else(|| {
                    malformed("image", format!("unknown element type tag {element_tag}"))
                })?;
                let image = ImageBuffer::from_raw(rows, cols, element_type, payload.into())
                    .map_err(|e| malformed("image", e.to_string()))?;
                return Ok(Message::Image(image));
            }
            TAG_ABORT => {
                let reason = String::from_utf8(payload.into())
                    .map_err(|e| malformed("abort", e.to_string()))?;
                return Ok(Message::Abort(reason));
            }
            other => return Err(malformed("frame", format!("unknown tag {other}"))),
        };

        if payload.has_remaining() {
            return Err(malformed(
                message.kind(),
                format!("{} trailing bytes", payload.remaining()),
            ));
        }
        Ok(message)
    }
}

fn ensure_remaining(payload: &impl Buf, needed: usize, what: &'static str) -> Result<()> {
    if payload.remaining() < needed {
        return Err(malformed(
            what,
            format!("payload is truncated: {} of {needed} bytes", payload.remaining()),
        ));
    }
    Ok(())
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], peer: usize) -> Result<()> {
    reader
        .read_exact(buf)
        .map_err(|e| link_error(e, peer))
}

/// I/O error on the link to `peer`; a hung-up peer becomes
/// [`TransportError::Disconnected`]
pub(crate) fn link_error(e: io::Error, peer: usize) -> SharpenError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => TransportError::Disconnected { rank: peer }.into(),
        _ => SharpenError::Io(e),
    }
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| malformed("frame", format!("{what} {value} does not fit in u32")))
}

fn malformed(what: &'static str, reason: impl Into<String>) -> SharpenError {
    TransportError::Malformed {
        what,
        reason: reason.into(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_frame_layout() {
        let mut image = ImageBuffer::filled(2, 3, ElementType::Rgb8, 9);
        image.set(1, 2, 2, 200);

        let frame = Message::Image(image.clone()).encode().unwrap();

        assert_eq!(frame[0], TAG_IMAGE);
        assert_eq!(&frame[1..5], &(9u32 + 18).to_le_bytes());
        assert_eq!(&frame[5..9], &2u32.to_le_bytes());
        assert_eq!(&frame[9..13], &3u32.to_le_bytes());
        assert_eq!(frame[13], 3);
        assert_eq!(frame.len(), HEADER_LEN + 9 + 18);
        assert_eq!(Message::decode(&frame).unwrap(), Message::Image(image));
    }

    #[test]
    fn test_image_payload_length_must_match_shape() {
        let frame = Message::Image(ImageBuffer::filled(2, 2, ElementType::Gray8, 1))
            .encode()
            .unwrap()
            .to_vec();

        // Drop one pixel byte and patch the header so only the shape disagrees
        let mut short = frame[..frame.len() - 1].to_vec();
        let len = (short.len() - HEADER_LEN) as u32;
        short[1..5].copy_from_slice(&len.to_le_bytes());

        let err = Message::decode(&short).unwrap_err();
        assert!(matches!(
            err,
            SharpenError::Transport(TransportError::Malformed { what: "image", .. })
        ));
    }

    #[test]
    fn test_unknown_element_tag_is_rejected() {
        let mut frame = Message::Image(ImageBuffer::filled(1, 1, ElementType::Gray8, 1))
            .encode()
            .unwrap()
            .to_vec();
        frame[13] = 2;
        assert!(Message::decode(&frame).is_err());
    }

    #[test]
    fn test_summary_keeps_exact_duration() {
        let summary = WorkerSummary {
            worker: 3,
            jobs_completed: 12,
            jobs_skipped: 1,
            kernel_time: Duration::new(4, 123_456_789),
        };
        let frame = Message::Summary(summary).encode().unwrap();
        assert_eq!(Message::decode(&frame).unwrap(), Message::Summary(summary));
    }

    #[test]
    fn test_stream_reads_frames_in_order() {
        let mut stream = Vec::new();
        Message::Hello { rank: 2 }.write_to(&mut stream).unwrap();
        Message::Barrier.write_to(&mut stream).unwrap();
        Message::Abort("disk full".into()).write_to(&mut stream).unwrap();

        let mut reader = stream.as_slice();
        assert_eq!(Message::read_from(&mut reader, 2).unwrap(), Message::Hello { rank: 2 });
        assert_eq!(Message::read_from(&mut reader, 2).unwrap(), Message::Barrier);
        assert_eq!(
            Message::read_from(&mut reader, 2).unwrap(),
            Message::Abort("disk full".into())
        );

        let err = Message::read_from(&mut reader, 2).unwrap_err();
        assert!(matches!(
            err,
            SharpenError::Transport(TransportError::Disconnected { rank: 2 })
        ));
    }

    #[test]
    fn test_trailing_bytes_and_unknown_tags_are_rejected() {
        let mut frame = Message::BufferCount(4).encode().unwrap().to_vec();
        frame.push(0);
        frame[1..5].copy_from_slice(&5u32.to_le_bytes());
        assert!(Message::decode(&frame).is_err());

        assert!(Message::decode(&[42, 0, 0, 0, 0]).is_err());
        assert!(Message::decode(&[TAG_BARRIER, 1, 0]).is_err());
    }
}
