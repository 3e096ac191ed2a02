//! Owned 2-D pixel grids passed between the codec, the kernel and the
//! aggregator.

use crate::error::{Result, SharpenError};

/// Pixel layout of an [`ImageBuffer`]. Every channel is one unsigned byte.
///
/// The discriminant doubles as the wire tag sent between ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ElementType {
    Gray8 = 1,
    Rgb8 = 3,
    Rgba8 = 4,
}

impl ElementType {
    pub fn channels(self) -> usize {
        self as usize
    }

    /// Bytes per pixel
    pub fn element_size(self) -> usize {
        self.channels()
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(ElementType::Gray8),
            3 => Some(ElementType::Rgb8),
            4 => Some(ElementType::Rgba8),
            _ => None,
        }
    }

    pub fn from_channels(channels: usize) -> Option<Self> {
        u8::try_from(channels).ok().and_then(Self::from_tag)
    }
}

/// Row-major, channel-interleaved image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    rows: usize,
    cols: usize,
    element_type: ElementType,
    data: Vec<u8>,
}

impl ImageBuffer {
    /// Wrap raw bytes, checking that their length matches the declared shape
    pub fn from_raw(
        rows: usize,
        cols: usize,
        element_type: ElementType,
        data: Vec<u8>,
    ) -> Result<Self> {
        let expected = rows
            .checked_mul(cols)
            .and_then(|pixels| pixels.checked_mul(element_type.element_size()))
            .ok_or_else(|| {
                SharpenError::InvalidBuffer(format!("{rows}x{cols} image is too large"))
            })?;

        if data.len() != expected {
            return Err(SharpenError::InvalidBuffer(format!(
                "{rows}x{cols} {element_type:?} needs {expected} bytes, got {}",
                data.len()
            )));
        }

        Ok(Self {
            rows,
            cols,
            element_type,
            data,
        })
    }

    /// Image with every channel of every pixel set to `value`
    pub fn filled(rows: usize, cols: usize, element_type: ElementType, value: u8) -> Self {
        Self {
            rows,
            cols,
            element_type,
            data: vec![value; rows * cols * element_type.element_size()],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn channels(&self) -> usize {
        self.element_type.channels()
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn element_size(&self) -> usize {
        self.element_type.element_size()
    }

    /// Bytes in one row
    pub fn row_stride(&self) -> usize {
        self.cols * self.element_size()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Channel `channel` of the pixel at (`row`, `col`)
    pub fn get(&self, row: usize, col: usize, channel: usize) -> u8 {
        self.data[self.offset(row, col, channel)]
    }

    pub fn set(&mut self, row: usize, col: usize, channel: usize, value: u8) {
        let offset = self.offset(row, col, channel);
        self.data[offset] = value;
    }

    fn offset(&self, row: usize, col: usize, channel: usize) -> usize {
        (row * self.cols + col) * self.element_size() + channel
    }
}
