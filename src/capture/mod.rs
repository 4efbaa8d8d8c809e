mod still;
mod v4l_capture;

pub use still::StillImage;
pub use v4l_capture::WebcamCapture;

use anyhow::Result;
use image::RgbImage;

/// How a source produces pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Content is fixed once loaded (images)
    Still,
    /// Content changes continuously (video, cameras)
    Live,
}

/// Trait for visual sources the pipeline can sample
pub trait VisualSource {
    /// Sample the current frame at intrinsic resolution
    fn capture_frame(&mut self) -> Result<RgbImage>;

    /// Intrinsic resolution of sampled frames
    fn resolution(&self) -> (u32, u32);

    /// Size the source is displayed at; the overlay surface follows it
    fn display_size(&self) -> (u32, u32) {
        self.resolution()
    }

    fn kind(&self) -> SourceKind;
}
