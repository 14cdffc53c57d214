/// Processing configuration
///
/// Loaded from a JSON file; every field has a default so partial files work.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::analysis::peaks::PeakPickingOptions;
use crate::analysis::ranges::RangeDetectionOptions;
use crate::analysis::zones::ZoneDetectionOptions;
use crate::assignment::ActivationMode;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessingConfig {
    pub peak_picking: PeakPickingOptions,
    pub ranges: RangeDetectionOptions,
    pub zones: ZoneDetectionOptions,
    pub activation_mode: ActivationMode,
}

impl ProcessingConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        log::info!("Configuration loaded from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = ProcessingConfig::from_json(
            r#"{ "ranges": { "maxJHz": 15.0 }, "activationMode": "toggleAny" }"#,
        )
        .unwrap();
        assert_eq!(config.ranges.max_j_hz, 15.0);
        assert_eq!(config.ranges.join_distance_hz, RangeDetectionOptions::default().join_distance_hz);
        assert_eq!(config.activation_mode, ActivationMode::ToggleAny);
        assert_eq!(config.zones, ZoneDetectionOptions::default());
    }

    #[test]
    fn test_peak_picking_options_are_flat() {
        let config = ProcessingConfig::from_json(r#"{ "peakPicking": { "noiseFactor": 5.0, "optimize": true } }"#).unwrap();
        assert_eq!(config.peak_picking.gsd.noise_factor, 5.0);
        assert!(config.peak_picking.optimize);
    }

    #[test]
    fn test_unknown_activation_mode_rejected() {
        assert!(matches!(
            ProcessingConfig::from_json(r#"{ "activationMode": "sometimes" }"#),
            Err(ConfigError::Parse(_))
        ));
    }
}
