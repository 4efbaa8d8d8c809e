//! Mask compositing onto per-source overlay surfaces

use crate::config::PipelineConfig;
use crate::segmentation::Mask;
use image::{imageops, Rgb, RgbImage, Rgba, RgbaImage};

/// Transparent RGBA layer shown over one source
pub struct OverlaySurface {
    image: RgbaImage,
}

impl OverlaySurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Track the source's displayed size; returns true if the surface changed
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if self.image.dimensions() == (width, height) {
            return false;
        }
        self.image = RgbaImage::new(width, height);
        true
    }

    pub fn clear(&mut self) {
        self.image.pixels_mut().for_each(|p| *p = Rgba([0, 0, 0, 0]));
    }

    #[cfg(test)]
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Blend the overlay over a frame scaled to the surface size
    pub fn composite_over(&self, frame: &RgbImage) -> RgbImage {
        let (width, height) = self.dimensions();
        let mut out = if frame.dimensions() != (width, height) {
            imageops::resize(frame, width, height, imageops::FilterType::Triangle)
        } else {
            frame.clone()
        };

        for (dst, src) in out.pixels_mut().zip(self.image.pixels()) {
            let a = src[3] as f32 / 255.0;
            if a == 0.0 {
                continue;
            }
            *dst = Rgb([0usize, 1, 2].map(|c| {
                (src[c] as f32 * a + dst[c] as f32 * (1.0 - a)).round() as u8
            }));
        }
        out
    }

    /// Source-over blend of one straight-alpha color into pixel `(x, y)`
    fn blend(&mut self, x: u32, y: u32, color: [u8; 3], alpha: f32) {
        let dst = self.image.get_pixel_mut(x, y);
        let da = dst[3] as f32 / 255.0;
        let out_a = alpha + da * (1.0 - alpha);
        if out_a <= 0.0 {
            return;
        }
        for c in 0..3 {
            let v = (color[c] as f32 * alpha + dst[c] as f32 * da * (1.0 - alpha)) / out_a;
            dst[c] = v.round().clamp(0.0, 255.0) as u8;
        }
        dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    }
}

/// Draws masks as a translucent single-color layer
pub struct Compositor {
    color: [u8; 3],
    opacity: f32,
    min_score: f32,
}

impl Compositor {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            color: config.overlay_color,
            opacity: config.overlay_opacity,
            min_score: config.mask_min_score,
        }
    }

    /// Replace the surface content with the given masks, drawn in order
    pub fn draw(&self, surface: &mut OverlaySurface, masks: &[Mask]) {
        let _span = tracing::debug_span!("draw", masks = masks.len()).entered();

        surface.clear();
        let (width, height) = surface.dimensions();

        for mask in masks {
            if mask.score < self.min_score || mask.is_empty() {
                continue;
            }
            let x_end = mask.x.saturating_add(mask.w).min(width);
            let y_end = mask.y.saturating_add(mask.h).min(height);

            for y in mask.y..y_end {
                let row = ((y - mask.y) * mask.w) as usize;
                for x in mask.x..x_end {
                    let a = mask.alpha[row + (x - mask.x) as usize];
                    if a == 0 {
                        continue;
                    }
                    surface.blend(x, y, self.color, self.opacity * a as f32 / 255.0);
                }
            }
        }
    }
}
