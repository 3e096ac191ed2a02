//! Image decode/encode boundary.
//!
//! Workers only see [`ImageCodec`]; the binary plugs in [`FsCodec`], which
//! decodes through the `image` crate into 8-bit RGB (the default loaded
//! representation) and picks the output format from the file extension.

use crate::buffer::{ElementType, ImageBuffer};
use crate::error::{Result, SharpenError};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use std::path::Path;

/// Loads source images and persists processed ones
pub trait ImageCodec: Send + Sync {
    fn load(&self, path: &Path) -> Result<ImageBuffer>;

    fn save(&self, image: &ImageBuffer, path: &Path) -> Result<()>;
}

/// Codec backed by image files on disk
#[derive(Debug, Clone, Copy, Default)]
pub struct FsCodec;

impl ImageCodec for FsCodec {
    fn load(&self, path: &Path) -> Result<ImageBuffer> {
        let decoded = image::open(path).map_err(|e| SharpenError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let rgb = decoded.into_rgb8();
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(SharpenError::Decode {
                path: path.to_path_buf(),
                reason: "image is empty".to_string(),
            });
        }

        let (cols, rows) = rgb.dimensions();
        ImageBuffer::from_raw(rows as usize, cols as usize, ElementType::Rgb8, rgb.into_raw())
    }

    fn save(&self, image: &ImageBuffer, path: &Path) -> Result<()> {
        let encode_error = |reason: String| SharpenError::Encode {
            path: path.to_path_buf(),
            reason,
        };

        let dynamic = to_dynamic(image).map_err(encode_error)?;
        dynamic.save(path).map_err(|e| encode_error(e.to_string()))
    }
}

fn to_dynamic(image: &ImageBuffer) -> std::result::Result<DynamicImage, String> {
    let cols = u32::try_from(image.cols()).map_err(|_| "image too wide".to_string())?;
    let rows = u32::try_from(image.rows()).map_err(|_| "image too tall".to_string())?;
    let data = image.as_bytes().to_vec();
    let mismatch = || format!("{}x{} buffer does not match its byte length", rows, cols);

    let dynamic = match image.element_type() {
        ElementType::Gray8 => {
            DynamicImage::ImageLuma8(GrayImage::from_raw(cols, rows, data).ok_or_else(mismatch)?)
        }
        ElementType::Rgb8 => {
            DynamicImage::ImageRgb8(RgbImage::from_raw(cols, rows, data).ok_or_else(mismatch)?)
        }
        ElementType::Rgba8 => {
            DynamicImage::ImageRgba8(RgbaImage::from_raw(cols, rows, data).ok_or_else(mismatch)?)
        }
    };

    Ok(dynamic)
}

/// In-memory codec for exercising workers without touching image files
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryCodec {
        sources: HashMap<PathBuf, ImageBuffer>,
        saved: Mutex<Vec<(PathBuf, ImageBuffer)>>,
    }

    impl MemoryCodec {
        pub fn new() -> Self {
            Self::default()
        }

        /// Register a source image; its first pixel is set to `marker` so
        /// outputs can be traced back to inputs
        pub fn with_image(mut self, path: impl Into<PathBuf>, marker: u8) -> Self {
            let mut image = ImageBuffer::filled(4, 4, ElementType::Rgb8, 50);
            image.set(0, 0, 0, marker);
            self.sources.insert(path.into(), image);
            self
        }

        pub fn saved(&self) -> Vec<(PathBuf, ImageBuffer)> {
            self.saved.lock().unwrap().clone()
        }
    }

    impl ImageCodec for MemoryCodec {
        fn load(&self, path: &Path) -> Result<ImageBuffer> {
            self.sources
                .get(path)
                .cloned()
                .ok_or_else(|| SharpenError::Decode {
                    path: path.to_path_buf(),
                    reason: "no such image".to_string(),
                })
        }

        fn save(&self, image: &ImageBuffer, path: &Path) -> Result<()> {
            self.saved
                .lock()
                .unwrap()
                .push((path.to_path_buf(), image.clone()));
            Ok(())
        }
    }
}
