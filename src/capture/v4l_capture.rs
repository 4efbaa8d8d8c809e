use super::{SourceKind, VisualSource};
use anyhow::{bail, Context, Result};
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;

/// Live webcam source
///
/// The intrinsic size follows whatever the driver actually delivers, so a
/// mid-stream renegotiation shows up as a resize on the next pass.
pub struct WebcamCapture {
    camera: Camera,
    intrinsic: (u32, u32),
    display: Option<(u32, u32)>,
}

impl WebcamCapture {
    pub fn new(device_index: u32) -> Result<Self> {
        tracing::info!("Opening webcam {} for highlighting", device_index);

        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);
        let mut camera = Camera::new(CameraIndex::Index(device_index), requested)
            .with_context(|| format!("Failed to open webcam {}", device_index))?;
        camera
            .open_stream()
            .context("Failed to start webcam stream")?;

        let negotiated = camera.resolution();
        let intrinsic = (negotiated.width(), negotiated.height());
        tracing::info!("Webcam negotiated {}x{}", intrinsic.0, intrinsic.1);

        Ok(Self {
            camera,
            intrinsic,
            display: None,
        })
    }

    /// Present the stream at a size other than the negotiated one
    pub fn set_display_size(&mut self, width: u32, height: u32) {
        self.display = Some((width, height));
    }
}

impl VisualSource for WebcamCapture {
    fn capture_frame(&mut self) -> Result<RgbImage> {
        let buffer = self.camera.frame().context("Webcam produced no frame")?;
        let frame = buffer
            .decode_image::<RgbFormat>()
            .context("Failed to decode webcam frame")?;

        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            bail!("Webcam delivered an empty {}x{} frame", width, height);
        }
        if (width, height) != self.intrinsic {
            tracing::debug!(
                "Webcam size changed {}x{} -> {}x{}",
                self.intrinsic.0,
                self.intrinsic.1,
                width,
                height
            );
            self.intrinsic = (width, height);
        }

        Ok(frame)
    }

    fn resolution(&self) -> (u32, u32) {
        self.intrinsic
    }

    fn display_size(&self) -> (u32, u32) {
        self.display.unwrap_or(self.intrinsic)
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Live
    }
}
