use figment::providers::{Format, Json, Toml, Yaml};
use std::path::Path;

/// Settings file loader that chooses the format from the file extension
/// Returns a provider that can be directly used with figment.merge()
pub fn auto<P: AsRef<Path>>(path: P) -> impl figment::Provider {
    let path = path.as_ref();
    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

    match extension.to_lowercase().as_str() {
        "toml" => SmartProvider::Toml(Toml::file(path)),
        "json" => SmartProvider::Json(Json::file(path)),
        "yaml" | "yml" => SmartProvider::Yaml(Yaml::file(path)),
        _ => {
            // Unknown extension: sniff the content, default to TOML
            let detected = std::fs::read_to_string(path)
                .ok()
                .and_then(|content| detect_format_from_content(&content));
            tracing::debug!(
                "Settings file {} has no known extension, detected {:?}",
                path.display(),
                detected
            );

            match detected {
                Some(SettingsFormat::Json) => SmartProvider::Json(Json::file(path)),
                Some(SettingsFormat::Yaml) => SmartProvider::Yaml(Yaml::file(path)),
                _ => SmartProvider::Toml(Toml::file(path)),
            }
        }
    }
}

/// Wrapper enum to handle different provider types
enum SmartProvider {
    Toml(figment::providers::Data<Toml>),
    Json(figment::providers::Data<Json>),
    Yaml(figment::providers::Data<Yaml>),
}

impl figment::Provider for SmartProvider {
    fn metadata(&self) -> figment::Metadata {
        match self {
            SmartProvider::Toml(p) => p.metadata(),
            SmartProvider::Json(p) => p.metadata(),
            SmartProvider::Yaml(p) => p.metadata(),
        }
    }

    fn data(
        &self,
    ) -> Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error> {
        match self {
            SmartProvider::Toml(p) => p.data(),
            SmartProvider::Json(p) => p.data(),
            SmartProvider::Yaml(p) => p.data(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettingsFormat {
    Toml,
    Json,
    Yaml,
}

/// Attempt to detect the settings format from file content
fn detect_format_from_content(content: &str) -> Option<SettingsFormat> {
    let trimmed = content.trim();

    // JSON detection - starts with { and ends with }
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(SettingsFormat::Json);
    }

    // TOML detection - [section] headers or key = value
    if trimmed.lines().any(|line| {
        let line = line.trim();
        (line.starts_with('[') && line.ends_with(']')) || (line.contains('=') && !line.contains(':'))
    }) {
        return Some(SettingsFormat::Toml);
    }

    // YAML detection - document separator or key: value
    if trimmed.starts_with("---") || trimmed.lines().any(|line| line.trim().contains(':')) {
        return Some(SettingsFormat::Yaml);
    }

    None
}
