use super::preprocess::Preprocessor;
use super::types::{BoundingBox, Mask, SegmentationModel};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::runtime::ModelRuntime;
use image::{imageops, RgbImage};

/// Per-box person segmentation (U^2-Net human-seg style)
///
/// Each box is cropped from the frame, stretched to the model square and
/// turned into a single-channel heat-map, which is resampled back onto the
/// box as an alpha buffer.
pub struct PersonSegmenter {
    runtime: Box<dyn ModelRuntime>,
    preprocessor: Preprocessor,
    input_name: String,
}

impl PersonSegmenter {
    pub fn new(runtime: Box<dyn ModelRuntime>, config: &PipelineConfig) -> Self {
        Self {
            runtime,
            preprocessor: Preprocessor::new(config.segmentation_input_size),
            input_name: config.segmentation_input_name.clone(),
        }
    }

    fn segment_box(&mut self, frame: &RgbImage, bbox: &BoundingBox) -> Result<Mask, PipelineError> {
        let _span = tracing::debug_span!("segment_box", x = bbox.x, y = bbox.y, w = bbox.w, h = bbox.h).entered();

        let crop = crop_box(frame, bbox);
        let input = self.preprocessor.stretch(&crop)?;
        let output = self
            .runtime
            .run(&[(self.input_name.as_str(), &input)])?
            .into_first()?;

        let size = self.preprocessor.target_size();
        let heatmap: Vec<f32> = output.iter().copied().collect();
        let alpha = Preprocessor::resample_heatmap(&heatmap, size, size, bbox.w, bbox.h)?;

        Ok(Mask {
            x: bbox.x,
            y: bbox.y,
            w: bbox.w,
            h: bbox.h,
            score: bbox.score,
            alpha,
        })
    }
}

impl SegmentationModel for PersonSegmenter {
    fn segment(&mut self, frame: &RgbImage, boxes: &[BoundingBox]) -> Vec<Mask> {
        let mut masks = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            match self.segment_box(frame, bbox) {
                Ok(mask) => masks.push(mask),
                Err(e) => tracing::warn!("Skipping box at ({}, {}): {}", bbox.x, bbox.y, e),
            }
        }
        masks
    }

    fn input_size(&self) -> (u32, u32) {
        let size = self.preprocessor.target_size();
        (size, size)
    }
}

/// Copy the box region out of the frame; parts outside the frame stay black
fn crop_box(frame: &RgbImage, bbox: &BoundingBox) -> RgbImage {
    let mut crop = RgbImage::new(bbox.w, bbox.h);
    imageops::replace(&mut crop, frame, -(bbox.x as i64), -(bbox.y as i64));
    crop
}
