use crate::error::PipelineError;
use image::RgbImage;

/// Object classes the detector reports; only people are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    Person,
}

/// Axis-aligned box in source pixel space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub score: f32,
    pub class: ObjectClass,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.w as f32 * self.h as f32
    }

    /// Intersection over union; 0 when the union is empty
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x) as f32;
        let y1 = self.y.max(other.y) as f32;
        let x2 = self.x.saturating_add(self.w).min(other.x.saturating_add(other.w)) as f32;
        let y2 = self.y.saturating_add(self.h).min(other.y.saturating_add(other.h)) as f32;
        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Per-box opacity buffer aligned to the box rectangle in source space
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub score: f32,
    /// Row-major, `w * h` entries
    pub alpha: Vec<u8>,
}

impl Mask {
    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    /// Nearest-neighbour copy of the mask scaled by `(sx, sy)`
    pub fn scaled(&self, sx: f32, sy: f32) -> Mask {
        let w = (self.w as f32 * sx).round() as u32;
        let h = (self.h as f32 * sy).round() as u32;
        let alpha = resample_nearest_u8(&self.alpha, self.w, self.h, w, h);
        Mask {
            x: (self.x as f32 * sx).round() as u32,
            y: (self.y as f32 * sy).round() as u32,
            w,
            h,
            score: self.score,
            alpha,
        }
    }
}

fn resample_nearest_u8(src: &[u8], sw: u32, sh: u32, dw: u32, dh: u32) -> Vec<u8> {
    if sw == 0 || sh == 0 {
        return vec![0; (dw * dh) as usize];
    }
    let mut out = Vec::with_capacity((dw * dh) as usize);
    for y in 0..dh {
        let sy = (y as u64 * sh as u64 / dh as u64) as usize;
        for x in 0..dw {
            let sx = (x as u64 * sw as u64 / dw as u64) as usize;
            out.push(src[sy * sw as usize + sx]);
        }
    }
    out
}

/// Person detection capability
/// Backends are chosen when the pipeline is built, never by name at runtime
pub trait DetectionModel: Send {
    /// Detect people in a frame
    ///
    /// # Returns
    /// * Boxes in source pixels, sorted by descending score, pairwise IoU below threshold
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, PipelineError>;
}

/// Trait for segmentation models
pub trait SegmentationModel: Send {
    /// Produce one alpha mask per box, in box order
    ///
    /// Boxes whose inference fails are left out; the rest still get masks.
    fn segment(&mut self, frame: &RgbImage, boxes: &[BoundingBox]) -> Vec<Mask>;

    /// Get the model's input dimensions
    ///
    /// Returns (width, height)
    fn input_size(&self) -> (u32, u32);
}
