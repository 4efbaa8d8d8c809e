mod detector;
mod preprocess;
mod segmenter;
pub mod types;

pub use detector::PersonDetector;
pub use segmenter::PersonSegmenter;
pub use types::{DetectionModel, Mask, SegmentationModel};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::runtime::OnnxModel;
use image::RgbImage;
use std::path::Path;

/// Detection followed by per-box segmentation
pub struct Pipeline {
    detector: Box<dyn DetectionModel>,
    segmenter: Box<dyn SegmentationModel>,
}

impl Pipeline {
    pub fn new(detector: Box<dyn DetectionModel>, segmenter: Box<dyn SegmentationModel>) -> Self {
        let (width, height) = segmenter.input_size();
        tracing::debug!("Segmenting person crops at {}x{}", width, height);
        Self { detector, segmenter }
    }

    /// Produce the masks for one frame
    ///
    /// Never fails: a detector error means no people this frame.
    pub fn process(&mut self, frame: &RgbImage) -> Vec<Mask> {
        let boxes = match self.detector.detect(frame) {
            Ok(boxes) => boxes,
            Err(e) => {
                tracing::warn!("Detection failed, treating frame as empty: {}", e);
                return Vec::new();
            }
        };
        if boxes.is_empty() {
            return Vec::new();
        }

        let _span = tracing::debug_span!("segment", boxes = boxes.len()).entered();
        self.segmenter.segment(frame, &boxes)
    }
}

/// Build the ONNX-backed pipeline from a detector and a segmentation model file
pub fn create_default_pipeline(
    detector_path: &Path,
    segmentation_path: &Path,
    config: &PipelineConfig,
) -> Result<Pipeline, PipelineError> {
    let detector = OnnxModel::from_file(detector_path, config.intra_threads)?;
    let segmenter = OnnxModel::from_file(segmentation_path, config.intra_threads)?;

    Ok(Pipeline::new(
        Box::new(PersonDetector::new(Box::new(detector), config)),
        Box::new(PersonSegmenter::new(Box::new(segmenter), config)),
    ))
}
