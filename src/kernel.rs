//! Fixed 3×3 sharpening stencil.
//!
//! ```text
//!  0 -1  0
//! -1  5 -1
//!  0 -1  0
//! ```
//!
//! Interior pixels get the clamped weighted sum of their neighbourhood,
//! border pixels are copied unchanged. Images narrower or shorter than three
//! pixels have no interior and come back as an exact copy.

use crate::buffer::ImageBuffer;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub const SHARPEN_KERNEL: [[i32; 3]; 3] = [[0, -1, 0], [-1, 5, -1], [0, -1, 0]];

/// How the rows of a single image are processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum KernelMode {
    /// One row after another on the calling thread
    #[default]
    Serial,
    /// Interior rows split across the rayon pool
    RowParallel,
}

impl KernelMode {
    pub fn apply(self, input: &ImageBuffer) -> ImageBuffer {
        match self {
            KernelMode::Serial => sharpen(input),
            KernelMode::RowParallel => sharpen_rows_parallel(input),
        }
    }
}

/// Sharpen `input` on the calling thread
pub fn sharpen(input: &ImageBuffer) -> ImageBuffer {
    let mut output = input.clone();
    if !has_interior(input) {
        return output;
    }

    let stride = input.row_stride();
    let rows = input.rows();
    let bytes = output.bytes_mut();
    for (offset, row) in bytes[stride..(rows - 1) * stride]
        .chunks_mut(stride)
        .enumerate()
    {
        sharpen_row(input, offset + 1, row);
    }

    output
}

/// Sharpen `input` with its interior rows spread across rayon workers.
///
/// Produces exactly the same bytes as [`sharpen`].
pub fn sharpen_rows_parallel(input: &ImageBuffer) -> ImageBuffer {
    let mut output = input.clone();
    if !has_interior(input) {
        return output;
    }

    let stride = input.row_stride();
    let rows = input.rows();
    let bytes = output.bytes_mut();
    bytes[stride..(rows - 1) * stride]
        .par_chunks_mut(stride)
        .enumerate()
        .for_each(|(offset, row)| sharpen_row(input, offset + 1, row));

    output
}

fn has_interior(image: &ImageBuffer) -> bool {
    image.rows() >= 3 && image.cols() >= 3
}

/// Compute the interior pixels of row `row`, writing into `out` (one full row).
fn sharpen_row(input: &ImageBuffer, row: usize, out: &mut [u8]) {
    let channels = input.channels();
    let stride = input.row_stride();
    let src = input.as_bytes();

    let above = &src[(row - 1) * stride..row * stride];
    let here = &src[row * stride..(row + 1) * stride];
    let below = &src[(row + 1) * stride..(row + 2) * stride];

    for col in 1..input.cols() - 1 {
        for channel in 0..channels {
            let at = |line: &[u8], c: usize| line[c * channels + channel] as i32;

            let mut sum = 0;
            for (k, line) in [above, here, below].into_iter().enumerate() {
                sum += at(line, col - 1) * SHARPEN_KERNEL[k][0]
                    + at(line, col) * SHARPEN_KERNEL[k][1]
                    + at(line, col + 1) * SHARPEN_KERNEL[k][2];
            }

            out[col * channels + channel] = sum.clamp(0, 255) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ElementType;

    /// Deterministic pseudo-random image
    fn noisy(rows: usize, cols: usize, element_type: ElementType) -> ImageBuffer {
        let mut state: u32 = 0x2545_f491;
        let data = (0..rows * cols * element_type.element_size())
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state >> 24) as u8
            })
            .collect();
        ImageBuffer::from_raw(rows, cols, element_type, data).unwrap()
    }

    fn reference(input: &ImageBuffer, row: usize, col: usize, channel: usize) -> u8 {
        let mut sum = 0i32;
        for ki in 0..3 {
            for kj in 0..3 {
                let value = input.get(row + ki - 1, col + kj - 1, channel) as i32;
                sum += value * SHARPEN_KERNEL[ki][kj];
            }
        }
        sum.clamp(0, 255) as u8
    }

    #[test]
    fn test_flat_region_is_unchanged() {
        let input = ImageBuffer::filled(3, 3, ElementType::Rgb8, 100);
        let output = sharpen(&input);

        assert_eq!(output, input);
        for channel in 0..3 {
            assert_eq!(output.get(1, 1, channel), 100);
        }
    }

    #[test]
    fn test_interior_matches_weighted_sum() {
        let input = noisy(9, 13, ElementType::Rgb8);
        let output = sharpen(&input);

        assert_eq!(output.rows(), input.rows());
        assert_eq!(output.cols(), input.cols());
        assert_eq!(output.channels(), input.channels());

        for row in 1..input.rows() - 1 {
            for col in 1..input.cols() - 1 {
                for channel in 0..3 {
                    assert_eq!(
                        output.get(row, col, channel),
                        reference(&input, row, col, channel),
                        "pixel ({row}, {col}) channel {channel}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_border_is_copied() {
        let input = noisy(7, 5, ElementType::Rgba8);
        let output = sharpen(&input);

        for row in 0..input.rows() {
            for col in 0..input.cols() {
                let border = row == 0 || col == 0 || row == input.rows() - 1 || col == input.cols() - 1;
                if border {
                    for channel in 0..4 {
                        assert_eq!(output.get(row, col, channel), input.get(row, col, channel));
                    }
                }
            }
        }
    }

    #[test]
    fn test_clamps_both_ways() {
        // Bright centre on black: 5 * 255 saturates high
        let mut bright = ImageBuffer::filled(3, 3, ElementType::Gray8, 0);
        bright.set(1, 1, 0, 255);
        assert_eq!(sharpen(&bright).get(1, 1, 0), 255);

        // Dark centre on white: 0 - 4 * 255 saturates low
        let mut dark = ImageBuffer::filled(3, 3, ElementType::Gray8, 255);
        dark.set(1, 1, 0, 0);
        assert_eq!(sharpen(&dark).get(1, 1, 0), 0);
    }

    #[test]
    fn test_degenerate_images_are_unchanged() {
        for (rows, cols) in [(1, 9), (9, 1), (2, 2), (2, 10), (10, 2), (0, 0)] {
            let input = noisy(rows, cols, ElementType::Rgb8);
            assert_eq!(sharpen(&input), input, "{rows}x{cols}");
            assert_eq!(sharpen_rows_parallel(&input), input, "{rows}x{cols}");
        }
    }

    #[test]
    fn test_row_parallel_matches_serial() {
        let input = noisy(64, 37, ElementType::Rgb8);
        assert_eq!(sharpen_rows_parallel(&input), sharpen(&input));
        assert_eq!(KernelMode::RowParallel.apply(&input), KernelMode::Serial.apply(&input));
    }
}
