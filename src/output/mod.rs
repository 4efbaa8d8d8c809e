mod file;
mod loopback;

pub use file::ImageFileOutput;
pub use loopback::V4L2Output;

use anyhow::Result;
use image::RgbImage;

/// Trait for display destinations of highlighted frames
pub trait OutputSink {
    /// Present one composited frame
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;
}
