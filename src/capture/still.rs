use super::{SourceKind, VisualSource};
use anyhow::{Context, Result};
use image::RgbImage;
use std::path::Path;

/// A decoded image, optionally shown at a different size than it was stored
pub struct StillImage {
    image: RgbImage,
    display: (u32, u32),
}

impl StillImage {
    pub fn new(image: RgbImage) -> Self {
        let display = image.dimensions();
        Self { image, display }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("Failed to decode image {}", path.display()))?
            .to_rgb8();

        tracing::info!(
            "Loaded {} ({}x{})",
            path.display(),
            image.width(),
            image.height()
        );

        Ok(Self::new(image))
    }

    /// Simulate layout: the image is displayed at `width x height`
    pub fn set_display_size(&mut self, width: u32, height: u32) {
        self.display = (width, height);
    }
}

impl VisualSource for StillImage {
    fn capture_frame(&mut self) -> Result<RgbImage> {
        Ok(self.image.clone())
    }

    fn resolution(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn display_size(&self) -> (u32, u32) {
        self.display
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Still
    }
}
