//! Per-frame driving of a game over the frame core, and the headless run.

use std::sync::Arc;

use anyhow::{Context, Result};
use cadence_core::{EngineConfig, FrameTimer};
use cadence_frame::{FrameConfig, FrameError, FrameOrchestrator, FrameRecorder, FrameResult};
use cadence_rhi::headless::HeadlessGpu;
use cadence_rhi::{ClearColor, GpuDevice};
use cadence_scene::GameApp;
use tracing::{debug, info, warn};

/// What happened to one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// The surface has no pixels; nothing was recorded.
    Skipped,
    /// The frame was abandoned; the next one proceeds normally.
    Dropped,
}

/// Runs one update and one frame of `game`.
///
/// Only fatal errors are returned; the caller shuts down on them.
pub fn step_frame<D, G>(
    frames: &mut FrameOrchestrator<D>,
    game: &mut G,
    dt: f32,
) -> FrameResult<FrameOutcome>
where
    D: GpuDevice,
    G: GameApp<FrameRecorder<D>> + ?Sized,
{
    game.on_update(dt);
    if let Some(color) = game.clear_color() {
        frames.set_clear_color(ClearColor::from(color));
    }

    let result = match frames.begin_frame() {
        Ok(recorder) => {
            game.on_render(recorder);
            frames.end_frame()
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => Ok(FrameOutcome::Presented),
        Err(FrameError::Suspended) => Ok(FrameOutcome::Skipped),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!("Frame dropped: {}", e);
            Ok(FrameOutcome::Dropped)
        }
    }
}

/// Counts of a finished headless run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub presented: u64,
    pub skipped: u64,
    pub dropped: u64,
    pub blocking_waits: u64,
}

/// Runs `frame_count` frames of `game` on the headless backend.
pub fn run_headless<G>(
    config: &EngineConfig,
    gpu_latency: u64,
    frame_count: u64,
    game: &mut G,
) -> Result<RunSummary>
where
    G: GameApp<FrameRecorder<HeadlessGpu>> + ?Sized,
{
    info!(
        "Headless run: {} frames, GPU lagging {} signals",
        frame_count, gpu_latency
    );

    let gpu = Arc::new(HeadlessGpu::with_gpu_latency(gpu_latency));
    let mut frames = FrameOrchestrator::new(gpu, &(), &FrameConfig::from(config))
        .context("Failed to create frame orchestrator")?;

    game.on_init().context("Failed to initialize game")?;

    let mut summary = RunSummary::default();
    let mut timer = FrameTimer::new();
    for _ in 0..frame_count {
        let dt = timer.tick_secs();
        match step_frame(&mut frames, game, dt)? {
            FrameOutcome::Presented => summary.presented += 1,
            FrameOutcome::Skipped => summary.skipped += 1,
            FrameOutcome::Dropped => summary.dropped += 1,
        }
    }

    game.on_finalize();
    frames.shutdown().context("Failed to drain GPU work")?;

    summary.blocking_waits = frames.submission().stats().blocking_waits;
    let device = frames.device().stats();
    debug!(
        "Headless device: {} submissions, {} presents, {} allocator resets",
        device.submissions, device.presents, device.allocator_resets
    );
    info!(
        "Headless run finished: {} presented, {} dropped, {} blocking waits, {:.1} fps",
        summary.presented,
        summary.dropped,
        summary.blocking_waits,
        timer.average_fps()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::DemoGame;

    #[test]
    fn test_headless_run_presents_every_frame() {
        let config = EngineConfig {
            width: 320,
            height: 240,
            ..EngineConfig::default()
        };
        let mut game = DemoGame::<FrameRecorder<HeadlessGpu>>::new(config.width, config.height);
        let summary = run_headless(&config, 1, 20, &mut game).unwrap();

        assert_eq!(summary.presented, 20);
        assert_eq!(summary.dropped, 0);
        assert_eq!(summary.blocking_waits, 0);
        assert_eq!(game.active_scene(), None);
    }

    #[test]
    fn test_transient_failure_drops_one_frame() {
        let gpu = Arc::new(HeadlessGpu::new());
        let mut frames =
            FrameOrchestrator::new(gpu.clone(), &(), &FrameConfig::default()).unwrap();
        let mut game = DemoGame::<FrameRecorder<HeadlessGpu>>::new(64, 64);
        game.on_init().unwrap();

        gpu.invalidate_surfaces();
        assert_eq!(
            step_frame(&mut frames, &mut game, 0.016).unwrap(),
            FrameOutcome::Dropped
        );
        assert_eq!(
            step_frame(&mut frames, &mut game, 0.016).unwrap(),
            FrameOutcome::Presented
        );
    }

    #[test]
    fn test_minimized_frames_are_skipped() {
        let mut frames =
            FrameOrchestrator::new(Arc::new(HeadlessGpu::new()), &(), &FrameConfig::default())
                .unwrap();
        let mut game = DemoGame::<FrameRecorder<HeadlessGpu>>::new(64, 64);
        game.on_init().unwrap();

        frames.resize(0, 0).unwrap();
        assert_eq!(
            step_frame(&mut frames, &mut game, 0.016).unwrap(),
            FrameOutcome::Skipped
        );
        assert_eq!(frames.device().stats().submissions, 0);
    }
}
