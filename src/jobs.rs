//! Job discovery: turning an input directory into an ordered, capped
//! [`JobList`], and the byte form it travels in between ranks.
//!
//! # Wire format
//!
//! ```text
//! count: u32 (LE)
//! repeated `count` times:
//!     len:  u32 (LE)
//!     path: `len` bytes of UTF-8
//! ```

use crate::error::{ConfigError, Result, SharpenError, TransportError};
use bytes::{Buf, BufMut, BytesMut};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One source image to sharpen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    path: PathBuf,
}

impl JobDescriptor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name used for write-as-you-go output
    pub fn file_name(&self) -> Option<&std::ffi::OsStr> {
        self.path.file_name()
    }
}

/// Ordered jobs of one run, identical on every worker
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobList {
    jobs: Vec<JobDescriptor>,
}

impl JobList {
    pub fn new(jobs: Vec<JobDescriptor>) -> Self {
        Self { jobs }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&JobDescriptor> {
        self.jobs.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &JobDescriptor> {
        self.jobs.iter()
    }

    /// Serialize for broadcast
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = BytesMut::new();
        out.put_u32_le(to_u32(self.jobs.len())?);

        for job in &self.jobs {
            let path = job.path.to_str().ok_or_else(|| ConfigError::NonUtf8Path {
                path: job.path.clone(),
            })?;
            out.put_u32_le(to_u32(path.len())?);
            out.put_slice(path.as_bytes());
        }

        Ok(out.to_vec())
    }

    /// Inverse of [`JobList::encode`]; rejects truncated or trailing bytes
    pub fn decode(mut bytes: &[u8]) -> Result<Self> {
        let count = read_len(&mut bytes)?;

        // Every entry needs at least its 4-byte length prefix
        if count > bytes.remaining() / 4 {
            return Err(malformed(format!(
                "{count} jobs cannot fit in {} bytes",
                bytes.remaining()
            )));
        }

        let mut jobs = Vec::with_capacity(count);
        for _ in 0..count {
            let len = read_len(&mut bytes)?;
            if bytes.remaining() < len {
                return Err(malformed(format!("path of {len} bytes is truncated")));
            }
            let path = std::str::from_utf8(&bytes[..len])
                .map_err(|e| malformed(format!("path is not UTF-8: {e}")))?;
            jobs.push(JobDescriptor::new(path));
            bytes.advance(len);
        }

        if bytes.has_remaining() {
            return Err(malformed(format!("{} trailing bytes", bytes.remaining())));
        }

        Ok(Self { jobs })
    }
}

fn to_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| malformed(format!("length {len} does not fit in u32")))
}

fn read_len(bytes: &mut &[u8]) -> Result<usize> {
    if bytes.remaining() < 4 {
        return Err(malformed("length prefix is truncated".to_string()));
    }
    Ok(bytes.get_u32_le() as usize)
}

fn malformed(reason: String) -> SharpenError {
    TransportError::Malformed {
        what: "job list",
        reason,
    }
    .into()
}

/// Builds the job list from a directory listing
#[derive(Debug, Clone)]
pub struct JobListBuilder {
    patterns: GlobSet,
    max_images: usize,
}

impl JobListBuilder {
    pub fn new<S: AsRef<str>>(patterns: &[S], max_images: usize) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = Glob::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
            builder.add(glob);
        }

        let patterns = builder.build().map_err(|e| ConfigError::InvalidPattern {
            pattern: "<set>".to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            patterns,
            max_images,
        })
    }

    /// List eligible files directly inside `input_dir`, sorted by path and
    /// capped at `max_images`
    pub fn build(&self, input_dir: &Path) -> Result<JobList> {
        validate_input_dir(input_dir)?;

        let walker = WalkBuilder::new(input_dir)
            .max_depth(Some(1))
            .standard_filters(false)
            .build();

        let mut paths = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Failed to read entry in {}: {e}", input_dir.display());
                    continue;
                }
            };

            if entry.depth() == 0 || !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }

            let matches = entry
                .path()
                .file_name()
                .is_some_and(|name| self.patterns.is_match(name));
            if matches {
                paths.push(entry.into_path());
            } else {
                debug!("Skipping {}", entry.path().display());
            }
        }

        paths.sort();
        let found = paths.len();
        paths.truncate(self.max_images);

        info!(
            "Found {found} eligible images in {}, keeping {}",
            input_dir.display(),
            paths.len()
        );

        Ok(JobList::new(paths.into_iter().map(JobDescriptor::new).collect()))
    }
}

/// Fail with a configuration error unless `path` is an existing directory
pub fn validate_input_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(ConfigError::InvalidInputDir {
            path: path.to_path_buf(),
        }
        .into())
    }
}

/// Empty `path` if it exists, create it otherwise
pub fn prepare_output_dir(path: &Path) -> Result<()> {
    let invalid = |reason: String| ConfigError::InvalidOutputDir {
        path: path.to_path_buf(),
        reason,
    };

    if path.exists() {
        if !path.is_dir() {
            return Err(invalid("exists and is not a directory".to_string()).into());
        }

        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
        }
        debug!("Cleared output directory {}", path.display());
    } else {
        fs::create_dir_all(path).map_err(|e| invalid(e.to_string()))?;
        debug!("Created output directory {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DEFAULT_PATTERNS: [&str; 2] = ["*.png", "*.jpg"];

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn test_filters_by_extension_and_sorts() {
        let dir = TempDir::new().unwrap();
        for name in ["c.jpg", "a.png", "notes.txt", "b.jpeg", "d.JPG", "e.jpg"] {
            touch(dir.path(), name);
        }
        fs::create_dir(dir.path().join("nested.png")).unwrap();
        touch(&dir.path().join("nested.png"), "inner.png");

        let builder = JobListBuilder::new(&DEFAULT_PATTERNS, 100).unwrap();
        let jobs = builder.build(dir.path()).unwrap();

        let names: Vec<_> = jobs
            .iter()
            .map(|job| job.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.png", "c.jpg", "e.jpg"]);
    }

    #[test]
    fn test_caps_at_max_images() {
        let dir = TempDir::new().unwrap();
        for i in 0..10 {
            touch(dir.path(), &format!("img_{i}.jpg"));
        }

        let jobs = JobListBuilder::new(&DEFAULT_PATTERNS, 5)
            .unwrap()
            .build(dir.path())
            .unwrap();
        assert_eq!(jobs.len(), 5);
        assert!(jobs.get(0).unwrap().path().ends_with("img_0.jpg"));
        assert!(jobs.get(4).unwrap().path().ends_with("img_4.jpg"));
    }

    #[test]
    fn test_missing_input_dir_is_config_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");

        let err = JobListBuilder::new(&DEFAULT_PATTERNS, 5)
            .unwrap()
            .build(&missing)
            .unwrap_err();
        assert!(matches!(err, SharpenError::Config(ConfigError::InvalidInputDir { .. })));

        touch(dir.path(), "file.png");
        assert!(validate_input_dir(&dir.path().join("file.png")).is_err());
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let err = JobListBuilder::new(&["a[".to_string()], 1).unwrap_err();
        assert!(matches!(err, SharpenError::Config(ConfigError::InvalidPattern { .. })));
    }

    #[test]
    fn test_job_list_blob_decodes_identically() {
        let jobs = JobList::new(vec![
            JobDescriptor::new("/data/in/a.png"),
            JobDescriptor::new("/data/in/ünïcode.jpg"),
            JobDescriptor::new(""),
        ]);

        let blob = jobs.encode().unwrap();
        assert_eq!(&blob[..4], &3u32.to_le_bytes());
        assert_eq!(JobList::decode(&blob).unwrap(), jobs);
    }

    #[test]
    fn test_truncated_blob_is_rejected() {
        let jobs = JobList::new(vec![JobDescriptor::new("/data/in/a.png")]);
        let blob = jobs.encode().unwrap();

        for cut in 0..blob.len() {
            assert!(JobList::decode(&blob[..cut]).is_err(), "cut at {cut}");
        }

        let mut trailing = blob.clone();
        trailing.push(0);
        assert!(JobList::decode(&trailing).is_err());
    }

    #[test]
    fn test_prepare_output_dir_wipes_and_creates() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");

        prepare_output_dir(&out).unwrap();
        assert!(out.is_dir());

        touch(&out, "stale.jpg");
        fs::create_dir(out.join("sub")).unwrap();
        touch(&out.join("sub"), "deep.jpg");

        prepare_output_dir(&out).unwrap();
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }
}
