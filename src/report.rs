//! Run settings echo and final statistics, as text lines or one JSON object.

use crate::aggregate::{AggregateResult, serialize_secs};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Which execution strategy produced a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    Sequential,
    Threaded,
    Distributed,
}

impl Variant {
    /// What one worker is called in the per-worker breakdown
    pub fn worker_label(self) -> &'static str {
        match self {
            Variant::Sequential => "worker",
            Variant::Threaded => "thread",
            Variant::Distributed => "rank",
        }
    }

    fn worker_count_key(self) -> Option<&'static str> {
        match self {
            Variant::Sequential => None,
            Variant::Threaded => Some("num_of_threads"),
            Variant::Distributed => Some("num_of_processes"),
        }
    }
}

/// Configuration echoed before processing starts
#[derive(Debug, Clone, Serialize)]
pub struct RunSettings {
    pub variant: Variant,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub workers: usize,
    pub max_images: usize,
}

impl RunSettings {
    pub fn lines(&self) -> Vec<(String, String)> {
        let mut lines = vec![
            ("input_dir".to_string(), self.input_dir.display().to_string()),
            ("output_dir".to_string(), self.output_dir.display().to_string()),
        ];
        if let Some(key) = self.variant.worker_count_key() {
            lines.push((key.to_string(), self.workers.to_string()));
        }
        lines.push(("max_images".to_string(), self.max_images.to_string()));
        lines
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    #[serde(flatten)]
    pub settings: RunSettings,
    #[serde(rename = "wall_time_secs", serialize_with = "serialize_secs")]
    pub wall_time: Duration,
    #[serde(rename = "average_kernel_time_secs", serialize_with = "serialize_secs")]
    pub average_kernel_time: Duration,
    pub result: AggregateResult,
}

impl RunReport {
    pub fn new(settings: RunSettings, wall_time: Duration, result: AggregateResult) -> Self {
        Self {
            settings,
            wall_time,
            average_kernel_time: result.average_kernel_time(),
            result,
        }
    }

    pub fn headline(&self) -> String {
        format!("Processed {} files:", self.result.jobs_completed())
    }

    /// Totals, in display order
    pub fn totals(&self) -> Vec<(String, String)> {
        let mut totals = vec![
            ("total wall clock runtime".to_string(), secs(self.wall_time)),
            ("total sharpen time".to_string(), secs(self.result.kernel_time())),
            ("average time per image".to_string(), secs(self.average_kernel_time)),
        ];
        if self.result.jobs_skipped() > 0 {
            totals.push(("skipped files".to_string(), self.result.jobs_skipped().to_string()));
        }
        totals
    }

    /// Per-worker kernel time, in worker order
    pub fn breakdown(&self) -> Vec<(String, String)> {
        let label = self.settings.variant.worker_label();
        self.result
            .workers()
            .iter()
            .map(|summary| {
                (
                    format!("{label} {} sharpen time", summary.worker),
                    secs(summary.kernel_time),
                )
            })
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn secs(duration: Duration) -> String {
    format!("{:.6} sec", duration.as_secs_f64())
}
