use crate::error::PipelineError;
use crate::runtime::Tensor;
use image::{imageops, RgbImage};
use ndarray::Array4;

/// Affine mapping from the letterboxed model square back to source pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxContext {
    pub orig_width: u32,
    pub orig_height: u32,
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub target_size: u32,
}

impl LetterboxContext {
    /// Map a model-space box `[cx, cy, w, h]` (unit square) to source pixels
    ///
    /// Returns `[x, y, w, h]`, rounded, with x and y clamped at 0.
    pub fn unletterbox(&self, model_box: [f32; 4]) -> [u32; 4] {
        let size = self.target_size as f32;
        let [cx, cy, bw, bh] = model_box.map(|v| v * size);

        let x = (cx - bw / 2.0 - self.offset_x as f32) / self.scale;
        let y = (cy - bh / 2.0 - self.offset_y as f32) / self.scale;
        let w = bw / self.scale;
        let h = bh / self.scale;

        [x, y, w, h].map(|v| v.round().max(0.0) as u32)
    }
}

/// Preprocessor for converting RGB images to model input tensors
pub struct Preprocessor {
    target_size: u32,
}

impl Preprocessor {
    pub fn new(target_size: u32) -> Self {
        Self { target_size }
    }

    pub fn target_size(&self) -> u32 {
        self.target_size
    }

    /// Letterbox an RGB image into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Scale by `min(size / width, size / height)`, keeping aspect ratio
    /// 2. Center inside a black `size x size` square
    /// 3. Write R, G and B planes normalized to [0, 1]
    ///
    /// Returns: tensor with shape [1, 3, size, size] and the mapping back to the source
    pub fn letterbox(&self, image: &RgbImage) -> Result<(Tensor, LetterboxContext), PipelineError> {
        let _span = tracing::debug_span!("letterbox").entered();

        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(PipelineError::EmptyFrame { width, height });
        }

        let size = self.target_size;
        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
        let new_width = ((width as f32 * scale).round() as u32).clamp(1, size);
        let new_height = ((height as f32 * scale).round() as u32).clamp(1, size);
        let offset_x = (size - new_width) / 2;
        let offset_y = (size - new_height) / 2;

        let resized = if (new_width, new_height) != (width, height) {
            imageops::resize(image, new_width, new_height, imageops::FilterType::Triangle)
        } else {
            image.clone()
        };

        let mut square = RgbImage::new(size, size);
        imageops::replace(&mut square, &resized, offset_x as i64, offset_y as i64);

        let ctx = LetterboxContext {
            orig_width: width,
            orig_height: height,
            scale,
            offset_x,
            offset_y,
            target_size: size,
        };

        Ok((to_planar(&square), ctx))
    }

    /// Stretch an RGB image to the full square, ignoring aspect ratio
    ///
    /// Used for person crops, which are already tight around the subject.
    pub fn stretch(&self, image: &RgbImage) -> Result<Tensor, PipelineError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(PipelineError::EmptyFrame { width, height });
        }

        let size = self.target_size;
        let resized = if image.dimensions() != (size, size) {
            imageops::resize(image, size, size, imageops::FilterType::Triangle)
        } else {
            image.clone()
        };

        Ok(to_planar(&resized))
    }

    /// Resample a single-channel heat-map to `target_width x target_height` alpha
    ///
    /// Nearest neighbour: target `(x, y)` reads source
    /// `(floor(x * hw / tw), floor(y * hh / th))`, scaled by 255 and clamped.
    ///
    /// Returns: row-major alpha, `target_width * target_height` bytes
    pub fn resample_heatmap(
        heatmap: &[f32],
        heatmap_width: u32,
        heatmap_height: u32,
        target_width: u32,
        target_height: u32,
    ) -> Result<Vec<u8>, PipelineError> {
        let _span = tracing::debug_span!("resample").entered();

        let expected = heatmap_width as usize * heatmap_height as usize;
        if heatmap.len() != expected || expected == 0 {
            return Err(PipelineError::Decode(format!(
                "heat-map has {} values, expected {}x{}",
                heatmap.len(),
                heatmap_width,
                heatmap_height
            )));
        }

        let mut alpha = Vec::with_capacity(target_width as usize * target_height as usize);
        for y in 0..target_height {
            let sy = (y as u64 * heatmap_height as u64 / target_height as u64) as usize;
            let row = &heatmap[sy * heatmap_width as usize..][..heatmap_width as usize];
            for x in 0..target_width {
                let sx = (x as u64 * heatmap_width as u64 / target_width as u64) as usize;
                alpha.push((row[sx] * 255.0).round().clamp(0.0, 255.0) as u8);
            }
        }

        Ok(alpha)
    }
}

fn to_planar(image: &RgbImage) -> Tensor {
    let (width, height) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
        tensor[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
        tensor[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
    }

    tensor.into_dyn()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// Inverse of `unletterbox` for a source-space box
    fn to_model_space(ctx: &LetterboxContext, [x, y, w, h]: [u32; 4]) -> [f32; 4] {
        let size = ctx.target_size as f32;
        let cx = (x as f32 + w as f32 / 2.0) * ctx.scale + ctx.offset_x as f32;
        let cy = (y as f32 + h as f32 / 2.0) * ctx.scale + ctx.offset_y as f32;
        [
            cx / size,
            cy / size,
            w as f32 * ctx.scale / size,
            h as f32 * ctx.scale / size,
        ]
    }

    #[test]
    fn test_letterbox_wide_frame_pads_top_and_bottom() {
        let image = RgbImage::from_pixel(200, 100, Rgb([255, 0, 0]));
        let (tensor, ctx) = Preprocessor::new(64).letterbox(&image).unwrap();

        assert_eq!(tensor.shape(), &[1, 3, 64, 64]);
        assert_eq!(tensor.len(), 3 * 64 * 64);
        assert!((ctx.scale - 0.32).abs() < 1e-6);
        assert_eq!((ctx.offset_x, ctx.offset_y), (0, 16));
        assert_eq!((ctx.orig_width, ctx.orig_height), (200, 100));

        // padding rows are black, content rows carry the red plane only
        assert_eq!(tensor[[0, 0, 0, 10]], 0.0);
        assert_eq!(tensor[[0, 0, 32, 10]], 1.0);
        assert_eq!(tensor[[0, 1, 32, 10]], 0.0);
        assert_eq!(tensor[[0, 2, 32, 10]], 0.0);
        assert_eq!(tensor[[0, 0, 63, 10]], 0.0);
    }

    #[test]
    fn test_letterbox_tall_frame_pads_left_and_right() {
        let image = RgbImage::from_pixel(50, 100, Rgb([0, 0, 255]));
        let (tensor, ctx) = Preprocessor::new(100).letterbox(&image).unwrap();

        assert_eq!((ctx.offset_x, ctx.offset_y), (25, 0));
        assert_eq!(tensor[[0, 2, 50, 24]], 0.0);
        assert_eq!(tensor[[0, 2, 50, 25]], 1.0);
        assert_eq!(tensor[[0, 2, 50, 74]], 1.0);
        assert_eq!(tensor[[0, 2, 50, 75]], 0.0);
    }

    #[test]
    fn test_letterbox_planes_are_normalized() {
        let image = RgbImage::from_pixel(8, 8, Rgb([51, 102, 255]));
        let (tensor, ctx) = Preprocessor::new(8).letterbox(&image).unwrap();

        assert_eq!(ctx.scale, 1.0);
        assert!((tensor[[0, 0, 3, 3]] - 0.2).abs() < 1e-6);
        assert!((tensor[[0, 1, 3, 3]] - 0.4).abs() < 1e-6);
        assert!((tensor[[0, 2, 3, 3]] - 1.0).abs() < 1e-6);
        assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_letterbox_rejects_empty_frame() {
        let image = RgbImage::new(0, 10);
        let result = Preprocessor::new(640).letterbox(&image);
        assert!(matches!(result, Err(PipelineError::EmptyFrame { width: 0, height: 10 })));
    }

    #[test]
    fn test_unletterbox_round_trip() {
        let sources = [(1920, 1080), (480, 640), (640, 640), (333, 777), (64, 48)];
        for (width, height) in sources {
            let image = RgbImage::new(width, height);
            let (_, ctx) = Preprocessor::new(640).letterbox(&image).unwrap();

            let boxes = [
                [0, 0, width / 2, height / 2],
                [width / 4, height / 3, width / 3, height / 2],
                [width / 10, height / 10, width / 5, height / 7],
            ];
            for original in boxes {
                let recovered = ctx.unletterbox(to_model_space(&ctx, original));
                for (a, b) in original.iter().zip(recovered.iter()) {
                    assert!(
                        (*a as i64 - *b as i64).abs() <= 1,
                        "{}x{}: {:?} -> {:?}",
                        width,
                        height,
                        original,
                        recovered
                    );
                }
            }
        }
    }

    #[test]
    fn test_unletterbox_identity_mapping() {
        let ctx = LetterboxContext {
            orig_width: 640,
            orig_height: 640,
            scale: 1.0,
            offset_x: 0,
            offset_y: 0,
            target_size: 640,
        };
        assert_eq!(ctx.unletterbox([0.5, 0.5, 0.2, 0.4]), [256, 192, 128, 256]);
    }

    #[test]
    fn test_unletterbox_clamps_negative_origin() {
        let ctx = LetterboxContext {
            orig_width: 640,
            orig_height: 360,
            scale: 1.0,
            offset_x: 0,
            offset_y: 140,
            target_size: 640,
        };
        // box straddles the top padding band
        let [x, y, w, h] = ctx.unletterbox([0.05, 0.25, 0.2, 0.2]);
        assert_eq!((x, y), (0, 0));
        assert_eq!((w, h), (128, 128));
    }

    #[test]
    fn test_stretch_fills_square() {
        let image = RgbImage::from_pixel(30, 90, Rgb([255, 255, 255]));
        let tensor = Preprocessor::new(32).stretch(&image).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 32, 32]);
        assert!(tensor.iter().all(|v| (*v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_resample_uniform_heatmap() {
        let heatmap = vec![0.6; 320 * 320];
        for (w, h) in [(1, 1), (17, 43), (320, 320), (641, 97)] {
            let alpha = Preprocessor::resample_heatmap(&heatmap, 320, 320, w, h).unwrap();
            assert_eq!(alpha.len(), (w * h) as usize);
            assert!(alpha.iter().all(|&a| a == 153));
        }
    }

    #[test]
    fn test_resample_nearest_picks_floor_index() {
        // 4x1 ramp sampled onto 2x1 reads source columns 0 and 2
        let heatmap = [0.0, 0.25, 0.5, 1.0];
        let alpha = Preprocessor::resample_heatmap(&heatmap, 4, 1, 2, 1).unwrap();
        assert_eq!(alpha, vec![0, 128]);
    }

    #[test]
    fn test_resample_clamps_out_of_range_values() {
        let heatmap = [-0.5, 1.7];
        let alpha = Preprocessor::resample_heatmap(&heatmap, 2, 1, 2, 1).unwrap();
        assert_eq!(alpha, vec![0, 255]);
    }

    #[test]
    fn test_resample_rejects_wrong_length() {
        let result = Preprocessor::resample_heatmap(&[0.0; 10], 320, 320, 4, 4);
        assert!(matches!(result, Err(PipelineError::Decode(_))));
    }
}
