//! Settings for sharpen
//!
//! Layered with figment, lowest priority first:
//! 1. `default-config.toml` embedded at compile time
//! 2. the settings file given with `--config` (TOML, JSON or YAML), or
//!    `sharpen.toml` in the working directory
//! 3. `SHARPEN_`-prefixed environment variables, nested keys split on `__`
//!
//! Command-line arguments are applied on top by the individual commands.

mod smart_load;

use crate::error::{ConfigError, Result};
use crate::kernel::KernelMode;
use crate::parallel::Schedule;
use crate::worker::FailurePolicy;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

// Embed the default config at compile time
const DEFAULT_CONFIG: &str = include_str!("../../default-config.toml");

/// Settings file picked up from the working directory when `--config` is absent
pub const LOCAL_CONFIG_FILE: &str = "sharpen.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SHARPEN_";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharpenConfig {
    pub jobs: JobsConfig,
    pub processing: ProcessingConfig,
    pub threaded: ThreadedConfig,
    pub distributed: DistributedConfig,
}

/// Which files count as jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// File-name globs matched against entries of the input directory
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    pub failure_policy: FailurePolicy,
    pub kernel: KernelMode,
}

/// Shared-memory variant settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadedConfig {
    pub schedule: Schedule,
    /// Percentage of CPU cores used when the thread count is 0
    pub thread_percentage: u8,
}

/// Multi-process variant settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedConfig {
    /// Gather processed images at rank 0 instead of writing them per rank
    pub gather: bool,
    /// Extension of the `processed_<n>` files written after a gather
    pub output_extension: String,
    /// Address rank 0 listens on for the other ranks
    pub bind: String,
    pub connect_timeout_secs: u64,
}

impl SharpenConfig {
    /// Load defaults, the settings file and the environment
    pub fn load(custom_config: Option<&Path>) -> Result<Self> {
        Self::figment(custom_config)?
            .extract()
            .map_err(|e| ConfigError::Settings(Box::new(e)).into())
    }

    fn figment(custom_config: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::new().merge(Toml::string(DEFAULT_CONFIG));

        if let Some(custom_path) = custom_config {
            if !custom_path.is_file() {
                return Err(ConfigError::MissingSettingsFile {
                    path: custom_path.to_path_buf(),
                }
                .into());
            }
            tracing::trace!("CONFIG LOAD: Using settings file {}", custom_path.display());
            figment = figment.merge(smart_load::auto(custom_path));
        } else {
            figment = figment.merge(Toml::file(LOCAL_CONFIG_FILE));
        }

        // Environment variables always have highest priority
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }
}
