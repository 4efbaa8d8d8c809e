mod capture;
mod config;
mod error;
mod output;
mod overlay;
mod runtime;
mod scheduler;
mod segmentation;

use anyhow::{Context, Result};
use capture::{StillImage, WebcamCapture};
use clap::{Parser, Subcommand};
use config::PipelineConfig;
use output::{ImageFileOutput, V4L2Output};
use overlay::Compositor;
use scheduler::{EnableFlag, FrameScheduler, IntervalClock, SourceId};
use segmentation::Pipeline;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Highlights people in images and live video", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Person detector model (ONNX, [N, 6] cx/cy/w/h/score/class output)
    #[arg(long, global = true)]
    detector_model: Option<PathBuf>,

    /// Person segmentation model (ONNX, single-channel heat-map output)
    /// Without both models frames pass through unhighlighted
    #[arg(long, global = true)]
    segmentation_model: Option<PathBuf>,

    /// JSON file with pipeline settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Refresh rate for live sources (overrides the config file)
    #[arg(long, global = true)]
    fps: Option<u32>,

    /// Start with highlighting switched off
    #[arg(long, global = true)]
    disabled: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Highlight people in a single image
    Image {
        /// Image file to process
        input: PathBuf,

        /// Where to write the highlighted image
        #[arg(short, long, default_value = "highlighted.png")]
        output: PathBuf,

        /// Display size as WIDTHxHEIGHT, if different from the image size
        #[arg(long, value_parser = parse_size)]
        display: Option<(u32, u32)>,
    },
    /// Highlight people in a webcam stream, written to a v4l2loopback device
    Camera {
        /// Input webcam device index
        #[arg(short, long, default_value_t = 0)]
        input_device: u32,

        /// Output v4l2loopback device path
        #[arg(short, long, default_value = "/dev/video10")]
        output_device: String,

        /// Output resolution width
        #[arg(long, default_value_t = 1280)]
        output_width: u32,

        /// Output resolution height
        #[arg(long, default_value_t = 720)]
        output_height: u32,

        /// Display size as WIDTHxHEIGHT, if different from the negotiated size
        #[arg(long, value_parser = parse_size)]
        display: Option<(u32, u32)>,
    },
    /// Write the effective settings as JSON
    WriteConfig {
        path: PathBuf,
    },
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {value}"))?;
    let w = w.parse().map_err(|e| format!("bad width: {e}"))?;
    let h = h.parse().map_err(|e| format!("bad height: {e}"))?;
    Ok((w, h))
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(fps) = args.fps {
        config.refresh_rate_hz = fps;
    }
    config.validate()?;

    if let Command::WriteConfig { path } = &args.command {
        config.save(path)?;
        tracing::info!("Wrote settings to {}", path.display());
        return Ok(());
    }

    tracing::info!("People highlighter starting");

    let pipeline = load_pipeline(&args, &config);
    let enabled = EnableFlag::new(!args.disabled);
    let scheduler = FrameScheduler::new(pipeline, Compositor::new(&config), enabled.clone());

    let toggle = enabled.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Stop requested, finishing current frame");
        toggle.set(false);
    })
    .context("Failed to install Ctrl-C handler")?;

    match args.command {
        Command::Image {
            input,
            output,
            display,
        } => {
            let id: SourceId = 0;
            let mut image = StillImage::open(&input)?;
            let mut sink = ImageFileOutput::new(output);

            let outcome = scheduler.process_still(id, &mut image, &mut sink)?;
            tracing::info!("Source {}: {:?}", id, outcome);

            // Laid out at a different size once loaded
            if let Some((width, height)) = display {
                image.set_display_size(width, height);
                let outcome = scheduler.reflow(id, &mut image, &mut sink)?;
                tracing::info!("Source {} reflowed to {}x{}: {:?}", id, width, height, outcome);
            }
            scheduler.registry().detach(id);
        }
        Command::Camera {
            input_device,
            output_device,
            output_width,
            output_height,
            display,
        } => {
            tracing::info!("Output: {}x{}", output_width, output_height);
            tracing::info!("Target FPS: {}", config.refresh_rate_hz);

            let open = move || -> Result<(WebcamCapture, V4L2Output)> {
                let mut camera = WebcamCapture::new(input_device)
                    .context("Failed to initialize webcam capture")?;
                if let Some((width, height)) = display {
                    camera.set_display_size(width, height);
                }
                let sink = V4L2Output::new(&output_device, output_width, output_height)
                    .context("Failed to initialize v4l2loopback output")?;
                tracing::info!("Press Ctrl+C to stop");
                Ok((camera, sink))
            };

            let handle = scheduler.spawn_live(
                input_device as SourceId,
                open,
                IntervalClock::new(config.refresh_rate_hz),
            )?;
            let stats = handle.join()?;
            tracing::info!(
                "Source {}: {} frames, {} dropped, {} failed",
                input_device,
                stats.frames,
                stats.skipped,
                stats.errors
            );
        }
        // Handled before the models are loaded
        Command::WriteConfig { .. } => {}
    }

    Ok(())
}

/// Load both models; on failure run without highlighting instead of exiting
fn load_pipeline(args: &Args, config: &PipelineConfig) -> Option<Pipeline> {
    let (Some(detector), Some(segmentation)) = (&args.detector_model, &args.segmentation_model) else {
        tracing::info!("Running in passthrough mode (no models given)");
        return None;
    };

    match segmentation::create_default_pipeline(detector, segmentation, config) {
        Ok(pipeline) => {
            tracing::info!("Person highlighting enabled");
            Some(pipeline)
        }
        Err(e) => {
            tracing::error!("{}; continuing without highlighting", e);
            None
        }
    }
}
