//! Error types for sharpen
//!
//! Every failure in a sharpening batch is fatal to the batch unless the
//! skip policy is configured, so the hierarchy is flat: one enum carrying
//! enough context (path, rank, reason) to tell the operator what broke.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the sharpen library
#[derive(Error, Debug)]
pub enum SharpenError {
    /// Configuration errors, reported before any work begins
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An input image could not be decoded
    #[error("Could not load image at '{path}': {reason}")]
    Decode { path: PathBuf, reason: String },

    /// A processed image could not be written
    #[error("Could not write image to '{path}': {reason}")]
    Encode { path: PathBuf, reason: String },

    /// Raw buffer and its declared shape disagree
    #[error("Invalid image buffer: {0}")]
    InvalidBuffer(String),

    /// I/O errors (directory preparation, sockets, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Message passing errors between ranks
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Another rank failed and told the coordinator why
    #[error("Rank {rank} aborted: {reason}")]
    PeerAborted { rank: usize, reason: String },

    /// Partitioner handed out an index past the end of the job list
    #[error("Job index {index} is outside a list of {len} jobs")]
    JobIndex { index: usize, len: usize },

    /// A worker thread panicked
    #[error("Worker panicked during parallel execution")]
    WorkerPanicked,
}

impl SharpenError {
    /// Whether the failure belongs to a single job (decode or encode).
    ///
    /// Only these errors may be skipped under the skip failure policy.
    pub fn is_job_failure(&self) -> bool {
        matches!(self, SharpenError::Decode { .. } | SharpenError::Encode { .. })
    }
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Input directory missing or not a directory
    #[error("Input directory '{path}' does not exist or is not a directory")]
    InvalidInputDir { path: PathBuf },

    /// Output directory could not be prepared
    #[error("Invalid output directory '{path}': {reason}")]
    InvalidOutputDir { path: PathBuf, reason: String },

    /// Invalid worker count
    #[error("Invalid worker count {count}: must be at least 1")]
    InvalidWorkerCount { count: usize },

    /// Invalid file pattern
    #[error("Invalid file pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Job path cannot be distributed as UTF-8
    #[error("Path '{path}' is not valid UTF-8")]
    NonUtf8Path { path: PathBuf },

    /// Settings file given on the command line does not exist
    #[error("Settings file '{path}' not found")]
    MissingSettingsFile { path: PathBuf },

    /// Settings could not be loaded or extracted
    #[error("Invalid settings: {0}")]
    Settings(#[from] Box<figment::Error>),
}

/// Message passing errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Peer hung up or the channel is gone
    #[error("Connection to rank {rank} closed")]
    Disconnected { rank: usize },

    /// Frame could not be decoded
    #[error("Malformed {what} frame: {reason}")]
    Malformed { what: &'static str, reason: String },

    /// A different message arrived than the protocol step expects
    #[error("Expected {expected} from rank {rank}, got {got}")]
    Unexpected {
        rank: usize,
        expected: &'static str,
        got: &'static str,
    },

    /// Rank outside the communicator
    #[error("Rank {rank} is not reachable from rank {from} in a world of {world_size}")]
    InvalidRank {
        rank: usize,
        from: usize,
        world_size: usize,
    },

    /// Child ranks did not all connect in time
    #[error("Timed out waiting for {missing} rank(s) to connect")]
    RendezvousTimeout { missing: usize },

    /// A child process exited before the run finished
    #[error("Rank {rank} exited with {status}")]
    ChildExited { rank: usize, status: String },
}

/// Result type alias for SharpenError
pub type Result<T> = std::result::Result<T, SharpenError>;
