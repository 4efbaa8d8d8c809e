use super::OutputSink;
use anyhow::{Context, Result};
use image::RgbImage;
use std::path::PathBuf;

/// Writes each presented frame to an image file, replacing the previous one
pub struct ImageFileOutput {
    path: PathBuf,
}

impl ImageFileOutput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl OutputSink for ImageFileOutput {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        frame
            .save(&self.path)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        tracing::info!("Wrote {}", self.path.display());
        Ok(())
    }
}
