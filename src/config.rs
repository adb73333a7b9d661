//! Tunables for folder scanning, log parsing and barcode detection.
//!
//! Everything has a default that matches the scanner deployment the tool was
//! written for; a TOML file can override any subset of the fields.

use std::path::Path;

use serde::Deserialize;

use crate::error::{AnalyticsError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// File extensions (lowercase, without dot) treated as scanner images.
    pub image_extensions: Vec<String>,
    /// Filename trigger-ID segments shorter than this are not cross-referenced
    /// against the log.
    pub min_trigger_id_len: usize,
    /// Case-insensitive regex fragments marking a log line as a timeout.
    pub timeout_patterns: Vec<String>,
    pub detector: DetectorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Horizontal bands the image is cut into before profiling.
    pub bands: u32,
    /// A band needs more light/dark transitions than this to look like a code.
    pub min_transitions: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            image_extensions: ["png", "jpg", "jpeg", "bmp", "gif"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            min_trigger_id_len: 10,
            timeout_patterns: vec![
                "timeout".to_string(),
                "timed.out".to_string(),
                "no.response".to_string(),
            ],
            detector: DetectorConfig::default(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            bands: 24,
            min_transitions: 6,
        }
    }
}

impl AnalyticsConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = std::fs::read_to_string(path).map_err(|source| AnalyticsError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| AnalyticsError::Config {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn is_image_file(&self, file_name: &str) -> bool {
        let lower = file_name.to_lowercase();
        self.image_extensions
            .iter()
            .any(|ext| lower.ends_with(&format!(".{ext}")))
    }
}
