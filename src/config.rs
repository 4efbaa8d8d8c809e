use crate::error::PipelineError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables for detection, segmentation, compositing and scheduling.
///
/// Every field has a default, so a config file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Side of the square detector input
    pub detector_input_size: u32,
    /// Side of the square segmentation input
    pub segmentation_input_size: u32,
    /// Minimum detector score for a person record to be kept
    pub score_threshold: f32,
    /// NMS rejects a box whose IoU with an accepted box reaches this value
    pub iou_threshold: f32,
    /// Class id the detector uses for "person"
    pub person_class_id: i32,
    /// Masks below this score are not drawn
    pub mask_min_score: f32,
    pub overlay_color: [u8; 3],
    pub overlay_opacity: f32,
    /// Refresh ticks per second for live sources (0 = unthrottled)
    pub refresh_rate_hz: u32,
    pub detector_input_name: String,
    pub segmentation_input_name: String,
    /// ONNX Runtime intra-op threads per model
    pub intra_threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detector_input_size: 640,
            segmentation_input_size: 320,
            score_threshold: 0.5,
            iou_threshold: 0.5,
            person_class_id: 0,
            mask_min_score: 0.5,
            overlay_color: [0, 255, 0],
            overlay_opacity: 0.35,
            refresh_rate_hz: 60,
            detector_input_name: "images".to_string(),
            segmentation_input_name: "input".to_string(),
            intra_threads: 4,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.detector_input_size == 0 || self.segmentation_input_size == 0 {
            return Err(PipelineError::Config(
                "model input sizes must be non-zero".to_string(),
            ));
        }
        let unit = 0.0..=1.0;
        for (name, value) in [
            ("score_threshold", self.score_threshold),
            ("iou_threshold", self.iou_threshold),
            ("mask_min_score", self.mask_min_score),
            ("overlay_opacity", self.overlay_opacity),
        ] {
            if !unit.contains(&value) {
                return Err(PipelineError::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}
