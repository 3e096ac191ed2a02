//! Command implementations for the sharpen CLI
//!
//! Each strategy lives in its own module; settings loading, overrides and
//! report printing are shared here.

pub mod distributed;
pub mod rank_worker;
pub mod sequential;
pub mod threaded;

use anyhow::{Context, Result};
use clap::Args;

use crate::cli::{GlobalOptions, Output};
use crate::config::SharpenConfig;
use crate::kernel::KernelMode;
use crate::report::{RunReport, RunSettings};
use crate::worker::FailurePolicy;

/// Processing overrides accepted by every strategy
#[derive(Args, Debug, Default)]
pub struct ProcessingArgs {
    /// How rows of one image are processed
    #[arg(long, value_enum)]
    pub kernel: Option<KernelMode>,

    /// What to do when an image cannot be read or written
    #[arg(long, value_enum)]
    pub failure_policy: Option<FailurePolicy>,

    /// File-name glob selecting input images (repeatable, replaces the configured list)
    #[arg(long = "pattern", value_name = "GLOB")]
    pub patterns: Vec<String>,
}

impl ProcessingArgs {
    fn apply(&self, config: &mut SharpenConfig) {
        if let Some(kernel) = self.kernel {
            config.processing.kernel = kernel;
        }
        if let Some(policy) = self.failure_policy {
            config.processing.failure_policy = policy;
        }
        if !self.patterns.is_empty() {
            config.jobs.patterns = self.patterns.clone();
        }
    }
}

/// Merged settings with this invocation's overrides applied
fn load_config(globals: &GlobalOptions, processing: &ProcessingArgs) -> Result<SharpenConfig> {
    let mut config = SharpenConfig::load(globals.config.as_deref())
        .context("Failed to load sharpen settings")?;
    processing.apply(&mut config);
    tracing::debug!("Effective settings: {config:?}");
    Ok(config)
}

/// Echo the run configuration before any work starts
fn print_settings(output: &Output, settings: &RunSettings, json: bool) {
    if json {
        return;
    }
    output.header("Process running with:");
    for (key, value) in settings.lines() {
        output.key_value(&key, &value);
    }
    output.blank_line();
}

fn print_report(output: &Output, report: &RunReport, json: bool) -> Result<()> {
    if json {
        output.raw(&report.to_json().context("Failed to serialize report")?);
        return Ok(());
    }

    output.header(&report.headline());
    for (key, value) in report.totals() {
        output.key_value(&key, &value);
    }
    for (key, value) in report.breakdown() {
        output.detail(&key, &value);
    }
    output.blank_line();
    output.success(&format!(
        "Sharpened images written to {}",
        report.settings.output_dir.display()
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_overrides() {
        let mut config = SharpenConfig::load(None).unwrap();
        let args = ProcessingArgs {
            kernel: Some(KernelMode::RowParallel),
            failure_policy: None,
            patterns: vec!["*.bmp".to_string()],
        };

        args.apply(&mut config);

        assert_eq!(config.processing.kernel, KernelMode::RowParallel);
        assert_eq!(config.processing.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.jobs.patterns, vec!["*.bmp"]);
    }
}
