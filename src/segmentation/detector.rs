use super::preprocess::{LetterboxContext, Preprocessor};
use super::types::{BoundingBox, DetectionModel, ObjectClass};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::runtime::ModelRuntime;
use image::RgbImage;

/// Values per detector record: cx, cy, w, h, score, class id
pub const RECORD_LEN: usize = 6;

/// Person detector over an end-to-end detection model (RT-DETR style)
///
/// The model emits already-decoded `[N, 6]` records in unit coordinates of
/// the letterboxed square, so decoding is a filter plus a coordinate remap.
pub struct PersonDetector {
    runtime: Box<dyn ModelRuntime>,
    preprocessor: Preprocessor,
    input_name: String,
    person_class_id: i32,
    score_threshold: f32,
    iou_threshold: f32,
}

impl PersonDetector {
    pub fn new(runtime: Box<dyn ModelRuntime>, config: &PipelineConfig) -> Self {
        Self {
            runtime,
            preprocessor: Preprocessor::new(config.detector_input_size),
            input_name: config.detector_input_name.clone(),
            person_class_id: config.person_class_id,
            score_threshold: config.score_threshold,
            iou_threshold: config.iou_threshold,
        }
    }

    /// Turn raw records into person boxes in source space, before NMS
    pub fn decode(&self, raw: &[f32], ctx: &LetterboxContext) -> Result<Vec<BoundingBox>, PipelineError> {
        if raw.len() % RECORD_LEN != 0 {
            return Err(PipelineError::Decode(format!(
                "detector output has {} values, not a multiple of {}",
                raw.len(),
                RECORD_LEN
            )));
        }

        let boxes = raw
            .chunks_exact(RECORD_LEN)
            .filter_map(|record| {
                let score = record[4];
                let class_id = record[5] as i32;
                // NaN scores fail the comparison and are dropped too
                if class_id != self.person_class_id || !(score >= self.score_threshold) {
                    return None;
                }

                // Boxes may reach past the frame edge; cropping pads with black
                // and the compositor clips, so IoU is taken on the full box.
                let [x, y, w, h] = ctx.unletterbox([record[0], record[1], record[2], record[3]]);
                (w > 0 && h > 0).then_some(BoundingBox {
                    x,
                    y,
                    w,
                    h,
                    score,
                    class: ObjectClass::Person,
                })
            })
            .collect();

        Ok(boxes)
    }
}

impl DetectionModel for PersonDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, PipelineError> {
        let _span = tracing::debug_span!("detect").entered();

        let (input, ctx) = self.preprocessor.letterbox(frame)?;
        let output = self
            .runtime
            .run(&[(self.input_name.as_str(), &input)])?
            .into_first()?;

        let raw: Vec<f32> = output.iter().copied().collect();
        let candidates = self.decode(&raw, &ctx)?;
        let kept = non_max_suppression(candidates, self.iou_threshold);

        tracing::debug!("{} person boxes after NMS", kept.len());
        Ok(kept)
    }
}

/// Greedy non-max suppression
///
/// Boxes are visited by descending score; a box is kept only if its IoU with
/// every box kept so far is below `iou_threshold`. Output is score-ordered.
pub fn non_max_suppression(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if kept.iter().all(|k| k.iou(&candidate) < iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::{detector_output, Reply, ScriptedRuntime};

    fn bbox(x: u32, y: u32, w: u32, h: u32, score: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            w,
            h,
            score,
            class: ObjectClass::Person,
        }
    }

    fn identity_ctx() -> LetterboxContext {
        LetterboxContext {
            orig_width: 640,
            orig_height: 640,
            scale: 1.0,
            offset_x: 0,
            offset_y: 0,
            target_size: 640,
        }
    }

    fn detector(runtime: ScriptedRuntime) -> PersonDetector {
        PersonDetector::new(Box::new(runtime), &PipelineConfig::default())
    }

    fn sample_boxes() -> Vec<BoundingBox> {
        vec![
            bbox(0, 0, 100, 100, 0.6),
            bbox(5, 5, 100, 100, 0.9),
            bbox(200, 200, 50, 50, 0.7),
            bbox(210, 190, 50, 60, 0.75),
            bbox(400, 0, 30, 90, 0.55),
            bbox(60, 60, 100, 100, 0.8),
        ]
    }

    #[test]
    fn test_nms_output_is_pairwise_below_threshold() {
        let kept = non_max_suppression(sample_boxes(), 0.5);
        for (i, a) in kept.iter().enumerate() {
            for b in &kept[i + 1..] {
                assert!(a.iou(b) < 0.5, "{:?} vs {:?}", a, b);
            }
        }
    }

    #[test]
    fn test_nms_orders_by_score() {
        let kept = non_max_suppression(sample_boxes(), 0.5);
        assert!(kept.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(kept[0].score, 0.9);
        // the 0.6 box is swallowed by the 0.9 one
        assert!(kept.iter().all(|b| b.score != 0.6));
    }

    #[test]
    fn test_nms_is_idempotent() {
        let once = non_max_suppression(sample_boxes(), 0.5);
        let twice = non_max_suppression(once.clone(), 0.5);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_nms_empty_input() {
        assert!(non_max_suppression(Vec::new(), 0.5).is_empty());
    }

    #[test]
    fn test_decode_keeps_only_confident_people() {
        let raw: Vec<f32> = [
            [0.5, 0.5, 0.2, 0.4, 0.9, 0.0],  // person
            [0.2, 0.2, 0.1, 0.1, 0.49, 0.0], // too weak
            [0.8, 0.8, 0.1, 0.1, 0.95, 2.0], // not a person
            [0.1, 0.8, 0.1, 0.2, 0.5, 0.0],  // exactly at threshold
            [0.9, 0.1, 0.1, 0.1, f32::NAN, 0.0],
        ]
        .iter()
        .flatten()
        .copied()
        .collect();

        let det = detector(ScriptedRuntime::new(vec![]));
        let boxes = det.decode(&raw, &identity_ctx()).unwrap();
        assert_eq!(boxes.len(), 2);
        assert!(boxes.iter().all(|b| b.class == ObjectClass::Person && b.score >= 0.5));
        assert_eq!((boxes[0].x, boxes[0].y, boxes[0].w, boxes[0].h), (256, 192, 128, 256));
    }

    #[test]
    fn test_decode_rejects_ragged_output() {
        let det = detector(ScriptedRuntime::new(vec![]));
        let result = det.decode(&[0.5; 7], &identity_ctx());
        assert!(matches!(result, Err(PipelineError::Decode(_))));
    }

    #[test]
    fn test_decode_keeps_boxes_past_frame_edge() {
        let det = detector(ScriptedRuntime::new(vec![]));
        let raw = [0.95, 0.5, 0.2, 0.2, 0.8, 0.0];
        let boxes = det.decode(&raw, &identity_ctx()).unwrap();
        assert_eq!(boxes.len(), 1);
        assert_eq!((boxes[0].x, boxes[0].w), (544, 128));
    }

    #[test]
    fn test_edge_boxes_suppressed_on_full_extent() {
        // (600, 0, 300, 100) and (600, 0, 140, 100): IoU 0.467 unclipped,
        // but identical once both are cut at x = 640
        let output = detector_output(&[
            [750.0 / 640.0, 50.0 / 640.0, 300.0 / 640.0, 100.0 / 640.0, 0.9, 0.0],
            [670.0 / 640.0, 50.0 / 640.0, 140.0 / 640.0, 100.0 / 640.0, 0.8, 0.0],
        ]);
        let mut det = detector(ScriptedRuntime::repeating(output));
        let boxes = det.detect(&RgbImage::new(640, 640)).unwrap();

        assert_eq!(boxes.len(), 2);
        assert_eq!((boxes[0].x, boxes[0].y, boxes[0].w, boxes[0].h), (600, 0, 300, 100));
        assert_eq!((boxes[1].x, boxes[1].y, boxes[1].w, boxes[1].h), (600, 0, 140, 100));
    }

    #[test]
    fn test_detect_filters_then_suppresses() {
        let output = detector_output(&[
            [0.25, 0.5, 0.2, 0.4, 0.9, 0.0],
            [0.26, 0.5, 0.2, 0.4, 0.7, 0.0],
            [0.75, 0.5, 0.2, 0.4, 0.6, 0.0],
            [0.75, 0.5, 0.2, 0.4, 0.99, 1.0],
            [0.5, 0.1, 0.1, 0.1, 0.3, 0.0],
        ]);
        let mut det = detector(ScriptedRuntime::repeating(output));
        let frame = RgbImage::new(640, 640);

        let boxes = det.detect(&frame).unwrap();
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].score, 0.9);
        assert_eq!(boxes[1].score, 0.6);
    }

    #[test]
    fn test_near_identical_people_collapse_to_one() {
        let output = detector_output(&[
            [0.5, 0.5, 0.2, 0.4, 0.9, 0.0],
            [0.5, 0.5, 0.2, 0.4, 0.8, 0.0],
        ]);
        let mut det = detector(ScriptedRuntime::repeating(output));
        let boxes = det.detect(&RgbImage::new(640, 640)).unwrap();

        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].score, 0.9);
        assert_eq!((boxes[0].x, boxes[0].y, boxes[0].w, boxes[0].h), (256, 192, 128, 256));
    }

    #[test]
    fn test_detect_maps_letterboxed_frame_back_to_source() {
        // 1280x640 source: scale 0.5, 160px bands above and below
        let output = detector_output(&[[0.5, 0.5, 0.25, 0.25, 0.9, 0.0]]);
        let mut det = detector(ScriptedRuntime::repeating(output));
        let boxes = det.detect(&RgbImage::new(1280, 640)).unwrap();

        assert_eq!(boxes.len(), 1);
        let b = boxes[0];
        assert_eq!((b.x, b.y, b.w, b.h), (480, 160, 320, 320));
    }

    #[test]
    fn test_detect_propagates_inference_error() {
        let runtime = ScriptedRuntime::new(vec![Reply::Fail("out of memory".to_string())]);
        let mut det = detector(runtime);
        let result = det.detect(&RgbImage::new(64, 64));
        assert!(matches!(result, Err(PipelineError::Inference(_))));
    }
}
