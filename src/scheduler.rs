//! Frame scheduling: one-shot passes for still sources, a refresh-paced loop
//! per live source, all gated by a shared enable flag.

use crate::capture::{SourceKind, VisualSource};
use crate::overlay::{Compositor, OverlaySurface};
use crate::output::OutputSink;
use crate::segmentation::{Mask, Pipeline};
use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Stable identifier of a source element
pub type SourceId = u64;

/// Process-wide highlighting switch
///
/// Loops read it once per iteration; an inference already running when it
/// is cleared still completes and presents its frame.
#[derive(Debug, Clone)]
pub struct EnableFlag(Arc<AtomicBool>);

impl EnableFlag {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Display refresh signal
pub trait RefreshClock {
    /// Block until the next refresh tick
    fn wait_for_tick(&mut self);
}

/// Fixed-rate refresh ticks; 0 Hz never waits
pub struct IntervalClock {
    period: Option<Duration>,
    last_tick: Option<Instant>,
}

impl IntervalClock {
    pub fn new(rate_hz: u32) -> Self {
        let period = (rate_hz > 0).then(|| Duration::from_secs_f64(1.0 / rate_hz as f64));
        Self {
            period,
            last_tick: None,
        }
    }
}

impl RefreshClock for IntervalClock {
    fn wait_for_tick(&mut self) {
        if let (Some(period), Some(last)) = (self.period, self.last_tick) {
            let elapsed = last.elapsed();
            if elapsed < period {
                std::thread::sleep(period - elapsed);
            }
        }
        self.last_tick = Some(Instant::now());
    }
}

/// Per-source overlay state
pub struct PipelineState {
    pub surface: OverlaySurface,
    /// Display size the surface was last laid out for
    pub last_size: Option<(u32, u32)>,
    pub frames_drawn: u64,
}

/// Registry slot for one source
pub struct SourceEntry {
    /// Cleared on detach; the source's loop exits at its next check
    enabled: AtomicBool,
    state: Mutex<PipelineState>,
}

impl SourceEntry {
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

/// Side table of per-source state, keyed by source id
#[derive(Default)]
pub struct PipelineRegistry {
    entries: Mutex<HashMap<SourceId, Arc<SourceEntry>>>,
}

impl PipelineRegistry {
    /// Get the entry for `id`, creating it on first sight
    pub fn attach(&self, id: SourceId) -> Arc<SourceEntry> {
        self.entries
            .lock()
            .entry(id)
            .or_insert_with(|| {
                tracing::debug!("Attaching source {}", id);
                Arc::new(SourceEntry {
                    enabled: AtomicBool::new(true),
                    state: Mutex::new(PipelineState {
                        surface: OverlaySurface::new(0, 0),
                        last_size: None,
                        frames_drawn: 0,
                    }),
                })
            })
            .clone()
    }

    pub fn get(&self, id: SourceId) -> Option<Arc<SourceEntry>> {
        self.entries.lock().get(&id).cloned()
    }

    /// Drop the state for a removed source; returns false if it was unknown
    pub fn detach(&self, id: SourceId) -> bool {
        match self.entries.lock().remove(&id) {
            Some(entry) => {
                entry.enabled.store(false, Ordering::Release);
                tracing::debug!("Detached source {}", id);
                true
            }
            None => false,
        }
    }

}

/// Result of one scheduling request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A frame was processed and presented
    Drawn { masks: usize },
    /// Another pass for the same source was still running; this one was dropped
    Skipped,
    /// Reflow without a size change
    Unchanged,
    /// Highlighting is switched off
    Disabled,
}

/// Counters for one live loop run
#[derive(Debug, Clone, Default)]
pub struct LoopStats {
    pub frames: u64,
    pub skipped: u64,
    pub errors: u64,
    pub busy: Duration,
}

/// Handle to a live loop running on its own thread
pub struct LiveHandle {
    handle: JoinHandle<Result<LoopStats>>,
}

impl LiveHandle {
    /// Wait for the loop to exit; fails if the source could not be opened
    pub fn join(self) -> Result<LoopStats> {
        self.handle
            .join()
            .map_err(|_| anyhow!("live highlight loop panicked"))?
    }
}

/// Drives the pipeline for every attached source
///
/// Surfaces, state and loops are per source, but the models are shared:
/// inference for different sources runs one at a time behind the pipeline
/// lock, so a slow frame on one source delays the others.
#[derive(Clone)]
pub struct FrameScheduler {
    /// `None` runs in passthrough mode: frames are presented without highlights
    pipeline: Option<Arc<Mutex<Pipeline>>>,
    compositor: Arc<Compositor>,
    enabled: EnableFlag,
    registry: Arc<PipelineRegistry>,
}

impl FrameScheduler {
    pub fn new(pipeline: Option<Pipeline>, compositor: Compositor, enabled: EnableFlag) -> Self {
        Self {
            pipeline: pipeline.map(|p| Arc::new(Mutex::new(p))),
            compositor: Arc::new(compositor),
            enabled,
            registry: Arc::new(PipelineRegistry::default()),
        }
    }

    pub fn registry(&self) -> Arc<PipelineRegistry> {
        self.registry.clone()
    }

    /// Single pass for a still source whose content became ready
    pub fn process_still(
        &self,
        id: SourceId,
        source: &mut dyn VisualSource,
        sink: &mut dyn OutputSink,
    ) -> Result<FrameOutcome> {
        if !self.enabled.is_enabled() {
            return Ok(FrameOutcome::Disabled);
        }
        let entry = self.registry.attach(id);
        self.run_pass(&entry, source, sink)
    }

    /// Re-run a still source after layout changed its displayed size
    pub fn reflow(
        &self,
        id: SourceId,
        source: &mut dyn VisualSource,
        sink: &mut dyn OutputSink,
    ) -> Result<FrameOutcome> {
        if let Some(entry) = self.registry.get(id) {
            if let Some(state) = entry.state.try_lock() {
                if state.last_size == Some(source.display_size()) {
                    return Ok(FrameOutcome::Unchanged);
                }
            }
        }
        self.process_still(id, source, sink)
    }

    /// Run the refresh-paced loop for a live source on the current thread
    ///
    /// The flag and the source's attachment are checked after every refresh
    /// tick, so a toggle between frames stops the loop before the next
    /// sample. Returns once highlighting is disabled or the source is
    /// detached. Still sources get a single pass.
    pub fn run_live(
        &self,
        id: SourceId,
        source: &mut dyn VisualSource,
        sink: &mut dyn OutputSink,
        clock: &mut dyn RefreshClock,
    ) -> LoopStats {
        let mut stats = LoopStats::default();

        if source.kind() == SourceKind::Still {
            tracing::debug!("Source {} is still, processing once", id);
            match self.process_still(id, source, sink) {
                Ok(FrameOutcome::Drawn { .. }) => stats.frames += 1,
                Ok(_) => stats.skipped += 1,
                Err(e) => {
                    stats.errors += 1;
                    tracing::warn!("Source {}: frame dropped: {:#}", id, e);
                }
            }
            return stats;
        }

        let entry = self.registry.attach(id);
        tracing::info!("Starting live loop for source {}", id);

        loop {
            clock.wait_for_tick();
            if !(self.enabled.is_enabled() && entry.is_enabled()) {
                break;
            }

            let start = Instant::now();
            match self.run_pass(&entry, source, sink) {
                Ok(FrameOutcome::Drawn { .. }) => stats.frames += 1,
                Ok(_) => stats.skipped += 1,
                Err(e) => {
                    stats.errors += 1;
                    tracing::warn!("Source {}: frame dropped: {:#}", id, e);
                    continue;
                }
            }
            stats.busy += start.elapsed();

            if stats.frames > 0 && stats.frames % 30 == 0 {
                let avg_ms = stats.busy.as_secs_f64() * 1000.0 / stats.frames as f64;
                tracing::info!(
                    "Source {}: frame {}, pipeline={:.1}ms, fps={:.1}",
                    id,
                    stats.frames,
                    avg_ms,
                    1000.0 / avg_ms
                );
            }
        }

        tracing::info!(
            "Live loop for source {} stopped after {} frames ({} dropped, {} errors)",
            id,
            stats.frames,
            stats.skipped,
            stats.errors
        );
        stats
    }

    /// Run the live loop on a dedicated thread
    ///
    /// `open` runs on that thread, so devices that must stay on the thread
    /// that opened them (webcams) can be used. The source is detached when
    /// the loop ends.
    pub fn spawn_live<F, S, O, C>(&self, id: SourceId, open: F, mut clock: C) -> Result<LiveHandle>
    where
        F: FnOnce() -> Result<(S, O)> + Send + 'static,
        S: VisualSource + 'static,
        O: OutputSink + 'static,
        C: RefreshClock + Send + 'static,
    {
        let scheduler = self.clone();
        let handle = std::thread::Builder::new()
            .name(format!("highlight-{}", id))
            .spawn(move || -> Result<LoopStats> {
                let (mut source, mut sink) = open()?;
                let stats = scheduler.run_live(id, &mut source, &mut sink, &mut clock);
                scheduler.registry.detach(id);
                Ok(stats)
            })
            .context("Failed to spawn live highlight thread")?;
        Ok(LiveHandle { handle })
    }

    /// Sample, detect, segment, draw and present one frame
    fn run_pass(
        &self,
        entry: &SourceEntry,
        source: &mut dyn VisualSource,
        sink: &mut dyn OutputSink,
    ) -> Result<FrameOutcome> {
        let Some(mut state) = entry.state.try_lock() else {
            tracing::debug!("Previous frame still in flight, dropping this one");
            return Ok(FrameOutcome::Skipped);
        };

        let frame = source.capture_frame()?;
        let (width, height) = source.display_size();
        if state.surface.resize(width, height) {
            tracing::debug!("Overlay surface resized to {}x{}", width, height);
        }
        state.last_size = Some((width, height));

        let masks = match &self.pipeline {
            Some(pipeline) => pipeline.lock().process(&frame),
            None => Vec::new(),
        };
        let masks = to_display_space(masks, frame.dimensions(), (width, height));

        self.compositor.draw(&mut state.surface, &masks);
        let presented = state.surface.composite_over(&frame);
        sink.write_frame(&presented)?;
        state.frames_drawn += 1;
        tracing::trace!("Presented frame {} with {} masks", state.frames_drawn, masks.len());

        Ok(FrameOutcome::Drawn { masks: masks.len() })
    }
}

/// Masks live in source pixels; the surface follows the displayed size
fn to_display_space(masks: Vec<Mask>, source: (u32, u32), display: (u32, u32)) -> Vec<Mask> {
    if source == display || source.0 == 0 || source.1 == 0 {
        return masks;
    }
    let sx = display.0 as f32 / source.0 as f32;
    let sy = display.1 as f32 / source.1 as f32;
    masks.iter().map(|m| m.scaled(sx, sy)).collect()
}
