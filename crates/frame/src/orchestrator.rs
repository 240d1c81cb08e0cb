//! Frame Orchestrator: the per-frame control loop.
//!
//! ```text
//! IDLE -> FRAME_BEGIN -> RECORDING -> SUBMITTED -> PRESENTED -> IDLE
//!          advance        caller      barrier       present
//!          barrier        records     submit+signal
//!          bind, clear
//! ```
//!
//! Any failure returns the orchestrator to `Idle` with the tracked image
//! states as they were before the frame, so the next frame starts from a
//! consistent picture. A surface that went out of date marks the chain
//! stale; the next `begin_frame` rebuilds it at the last known size.

use std::sync::Arc;

use cadence_core::EngineConfig;
use cadence_rhi::{
    ClearColor, GpuDevice, PresentFlags, ResourceState, ScissorRect, SwapchainDesc, Viewport,
};
use tracing::{debug, error, info, trace, warn};

use crate::error::{FrameError, FrameResult};
use crate::recorder::FrameRecorder;
use crate::submission::SubmissionContext;
use crate::surface::PresentationSurface;
use crate::targets::FrameTargets;

/// Where the orchestrator is within a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameState {
    #[default]
    Idle,
    FrameBegin,
    Recording,
    Submitted,
    Presented,
}

/// Startup parameters of the frame core.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameConfig {
    pub frame_slots: usize,
    pub width: u32,
    pub height: u32,
    pub image_count: u32,
    pub vsync: bool,
    pub clear_color: ClearColor,
}

impl FrameConfig {
    pub fn swapchain_desc(&self) -> SwapchainDesc {
        SwapchainDesc {
            width: self.width,
            height: self.height,
            image_count: self.image_count,
            vsync: self.vsync,
        }
    }

    /// Vertical blanks to wait per present.
    pub fn sync_interval(&self) -> u32 {
        u32::from(self.vsync)
    }
}

impl From<&EngineConfig> for FrameConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            frame_slots: config.frame_slots,
            width: config.width,
            height: config.height,
            image_count: config.image_count,
            vsync: config.vsync,
            clear_color: ClearColor::from(config.clear_color),
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

/// Sequences one frame at a time over the submission context, the
/// presentation surface and the frame targets.
pub struct FrameOrchestrator<D: GpuDevice> {
    // Drop order: views, then the chain, then the slots, then the device.
    targets: FrameTargets<D>,
    surface: PresentationSurface<D>,
    submission: SubmissionContext<D>,
    device: Arc<D>,
    state: FrameState,
    clear_color: ClearColor,
    sync_interval: u32,
    present_flags: PresentFlags,
    /// Last known client size.
    extent: (u32, u32),
    /// Tracked states captured at `begin_frame`.
    snapshot: Vec<ResourceState>,
    pending_resize: bool,
    stale: bool,
    suspended: bool,
    shut_down: bool,
    frames_presented: u64,
}

impl<D: GpuDevice> FrameOrchestrator<D> {
    /// Builds the submission context, the presentation surface for
    /// `target` and the frame targets, in that order.
    pub fn new(
        device: Arc<D>,
        target: &D::SurfaceTarget,
        config: &FrameConfig,
    ) -> FrameResult<Self> {
        let submission = SubmissionContext::create(device.clone(), config.frame_slots)?;
        let surface = PresentationSurface::create(
            device.clone(),
            submission.queue(),
            target,
            config.swapchain_desc(),
        )?;

        let mut targets = FrameTargets::new(device.clone());
        targets.init(&surface).map_err(|e| match e {
            FrameError::Transient(source) | FrameError::Device(source) => FrameError::Setup {
                stage: "frame targets",
                source,
            },
            other => other,
        })?;

        info!(
            "Frame orchestrator ready ({} backend, {} slots, {} images)",
            device.name(),
            config.frame_slots,
            surface.image_count()
        );

        Ok(Self {
            targets,
            surface,
            submission,
            device,
            state: FrameState::Idle,
            clear_color: config.clear_color,
            sync_interval: config.sync_interval(),
            present_flags: PresentFlags::default(),
            extent: (config.width, config.height),
            snapshot: Vec::new(),
            pending_resize: false,
            stale: false,
            suspended: false,
            shut_down: false,
            frames_presented: 0,
        })
    }

    /// Opens a frame: advances to the next slot, moves the current image to
    /// render-target state, binds and clears its views and applies a
    /// full-surface viewport and scissor.
    ///
    /// Returns the recorder of the open frame for the rendering layer. Its
    /// viewport and scissor calls share the frame's state cache.
    ///
    /// # Errors
    ///
    /// - [`FrameError::FrameInProgress`] if the previous frame was not ended
    /// - [`FrameError::Suspended`] while the surface has zero size
    /// - anything the rebuild, advance or recording raises; the frame is
    ///   abandoned and the orchestrator stays idle
    pub fn begin_frame(&mut self) -> FrameResult<&mut FrameRecorder<D>> {
        if self.shut_down {
            return Err(FrameError::MissingDependency("frame core has been shut down"));
        }
        if self.state != FrameState::Idle {
            return Err(FrameError::FrameInProgress);
        }
        if self.suspended {
            return Err(FrameError::Suspended);
        }
        if self.stale || self.pending_resize {
            self.rebuild()?;
        }

        self.snapshot.clear();
        self.snapshot.extend_from_slice(self.targets.states());
        self.state = FrameState::FrameBegin;

        match self.start_recording() {
            Ok(()) => {
                self.state = FrameState::Recording;
                Ok(self.submission.recorder_mut())
            }
            Err(e) => {
                warn!("Frame abandoned during begin: {}", e);
                self.abandon_frame();
                Err(e)
            }
        }
    }

    fn start_recording(&mut self) -> FrameResult<()> {
        self.submission.advance_frame()?;

        let index = self.surface.current_image_index();
        let image = self
            .surface
            .image(index)
            .cloned()
            .ok_or(FrameError::ImageIndex(index))?;

        let cmd = self.submission.recorder_mut();
        self.targets
            .transition(cmd, &image, index, ResourceState::RenderTarget)?;
        self.targets.bind(cmd, index)?;
        self.targets.clear_target(cmd, index, self.clear_color);
        self.targets.clear_depth(cmd, index, 1.0, 0);

        let (width, height) = self.surface.extent();
        self.submission.set_viewport(&Viewport::full(width, height))?;
        self.submission.set_scissor(&ScissorRect::full(width, height))?;

        trace!(
            "Frame begun: slot {}, image {}",
            self.submission.current_slot(),
            index
        );
        Ok(())
    }

    /// Closes the frame: moves the image to present state, submits and
    /// signals, then presents.
    ///
    /// # Errors
    ///
    /// - [`FrameError::MissingDependency`] without a successful
    ///   `begin_frame`; nothing is submitted and the fence is untouched
    /// - [`FrameError::Transient`] when submission or presentation failed;
    ///   the frame is abandoned and the next one proceeds normally
    /// - [`FrameError::Device`] when the device was lost
    pub fn end_frame(&mut self) -> FrameResult<()> {
        if self.state != FrameState::Recording {
            return Err(FrameError::MissingDependency(
                "end_frame requires a frame opened by begin_frame",
            ));
        }

        let index = self.surface.current_image_index();
        let image = match self.surface.image(index).cloned() {
            Some(image) => image,
            None => {
                self.abandon_frame();
                return Err(FrameError::ImageIndex(index));
            }
        };

        let cmd = self.submission.recorder_mut();
        if let Err(e) = self
            .targets
            .transition(cmd, &image, index, ResourceState::Present)
        {
            self.abandon_frame();
            return Err(e);
        }

        self.state = FrameState::Submitted;
        if let Err(e) = self.submission.submit_and_signal() {
            warn!("Frame abandoned at submit: {}", e);
            self.abandon_frame();
            return Err(e);
        }

        let result = self.surface.present(
            self.submission.queue(),
            self.sync_interval,
            self.present_flags,
        );
        self.state = FrameState::Presented;

        let result = match result {
            Ok(()) => {
                self.frames_presented += 1;
                Ok(())
            }
            Err(FrameError::Transient(e)) => {
                // The submitted barrier did run; tracked states stay as is.
                if e.is_transient() {
                    warn!("Present failed, rebuilding the chain next frame: {}", e);
                    self.stale = true;
                } else {
                    warn!("Present failed: {}", e);
                }
                Err(FrameError::Transient(e))
            }
            Err(e) => {
                error!("Present failed: {}", e);
                Err(e)
            }
        };

        self.state = FrameState::Idle;
        result
    }

    fn abandon_frame(&mut self) {
        self.targets.restore_states(&self.snapshot);
        self.state = FrameState::Idle;
    }

    /// Sets the viewport on the open frame, skipping repeats.
    pub fn set_viewport(&mut self, viewport: &Viewport) -> FrameResult<()> {
        self.require_recording()?;
        self.submission.set_viewport(viewport)
    }

    /// Sets the scissor rectangle on the open frame, skipping repeats.
    pub fn set_scissor(&mut self, scissor: &ScissorRect) -> FrameResult<()> {
        self.require_recording()?;
        self.submission.set_scissor(scissor)
    }

    fn require_recording(&self) -> FrameResult<()> {
        if self.state == FrameState::Recording {
            Ok(())
        } else {
            Err(FrameError::MissingDependency("no frame is being recorded"))
        }
    }

    /// Handles a client-area resize.
    ///
    /// A zero dimension suspends frames until a non-zero size arrives. When
    /// idle the chain and views are rebuilt now, otherwise at the next
    /// `begin_frame`. A rebuild that fails leaves the chain stale, so the
    /// next `begin_frame` tries again.
    pub fn resize(&mut self, width: u32, height: u32) -> FrameResult<()> {
        if width == 0 || height == 0 {
            if !self.suspended {
                debug!("Surface minimized, suspending frames");
            }
            self.suspended = true;
            return Ok(());
        }
        self.suspended = false;

        if (width, height) == self.extent && !self.stale {
            return Ok(());
        }

        debug!(
            "Resize requested: {}x{} -> {}x{}",
            self.extent.0, self.extent.1, width, height
        );
        self.extent = (width, height);

        if self.state == FrameState::Idle && !self.shut_down {
            self.rebuild()
        } else {
            self.pending_resize = true;
            Ok(())
        }
    }

    fn rebuild(&mut self) -> FrameResult<()> {
        let (width, height) = self.extent;
        info!("Rebuilding presentation surface at {}x{}", width, height);

        // Cleared only once the chain and views match the new extent.
        self.stale = true;
        self.submission.wait_for_idle()?;
        self.targets.release();
        self.surface
            .resize(self.submission.queue(), width, height)?;
        self.targets.resize(&self.surface)?;

        self.stale = false;
        self.pending_resize = false;
        Ok(())
    }

    /// Blocks until the GPU has finished all submitted work.
    pub fn wait_idle(&mut self) -> FrameResult<()> {
        self.submission.wait_for_idle()
    }

    /// Drains the GPU once; later calls do nothing. Called from `Drop` if
    /// the owner did not.
    pub fn shutdown(&mut self) -> FrameResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        if self.state != FrameState::Idle {
            warn!("Shutting down with a frame in {:?}, discarding it", self.state);
            self.abandon_frame();
        }
        info!(
            "Frame orchestrator shutting down after {} frames",
            self.frames_presented
        );
        self.submission.wait_for_idle()
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Last known client size.
    #[inline]
    pub fn extent(&self) -> (u32, u32) {
        self.extent
    }

    #[inline]
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Whether the chain will be rebuilt before the next frame.
    #[inline]
    pub fn needs_rebuild(&self) -> bool {
        self.stale || self.pending_resize
    }

    #[inline]
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    #[inline]
    pub fn set_clear_color(&mut self, color: ClearColor) {
        self.clear_color = color;
    }

    #[inline]
    pub fn clear_color(&self) -> ClearColor {
        self.clear_color
    }

    #[inline]
    pub fn set_present_flags(&mut self, flags: PresentFlags) {
        self.present_flags = flags;
    }

    #[inline]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    #[inline]
    pub fn submission(&self) -> &SubmissionContext<D> {
        &self.submission
    }

    #[inline]
    pub fn surface(&self) -> &PresentationSurface<D> {
        &self.surface
    }

    #[inline]
    pub fn targets(&self) -> &FrameTargets<D> {
        &self.targets
    }
}

impl<D: GpuDevice> Drop for FrameOrchestrator<D> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Frame orchestrator shutdown failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_rhi::headless::HeadlessGpu;

    fn orchestrator() -> FrameOrchestrator<HeadlessGpu> {
        let config = FrameConfig {
            width: 64,
            height: 48,
            ..FrameConfig::default()
        };
        FrameOrchestrator::new(Arc::new(HeadlessGpu::new()), &(), &config).unwrap()
    }

    #[test]
    fn frame_config_from_engine_config() {
        let engine = EngineConfig {
            vsync: false,
            clear_color: [1.0, 0.0, 0.0, 1.0],
            ..EngineConfig::default()
        };
        let config = FrameConfig::from(&engine);
        assert_eq!(config.sync_interval(), 0);
        assert_eq!(config.clear_color, ClearColor::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(config.swapchain_desc().image_count, engine.image_count);
    }

    #[test]
    fn states_walk_the_frame_cycle() {
        let mut frames = orchestrator();
        assert_eq!(frames.state(), FrameState::Idle);
        frames.begin_frame().unwrap();
        assert_eq!(frames.state(), FrameState::Recording);
        frames.end_frame().unwrap();
        assert_eq!(frames.state(), FrameState::Idle);
        assert_eq!(frames.frames_presented(), 1);
    }

    #[test]
    fn begin_twice_is_rejected() {
        let mut frames = orchestrator();
        frames.begin_frame().unwrap();
        assert!(matches!(frames.begin_frame(), Err(FrameError::FrameInProgress)));
    }

    #[test]
    fn viewport_outside_frame_is_missing_dependency() {
        let mut frames = orchestrator();
        assert!(matches!(
            frames.set_viewport(&Viewport::full(1, 1)),
            Err(FrameError::MissingDependency(_))
        ));
    }

    #[test]
    fn failed_rebuild_is_retried_next_frame() {
        let mut frames = orchestrator();
        frames.device().fail_next_resize();

        let err = frames.resize(96, 72).unwrap_err();
        assert!(matches!(err, FrameError::Transient(_)));
        assert!(frames.needs_rebuild());

        frames.begin_frame().unwrap();
        frames.end_frame().unwrap();
        assert!(!frames.needs_rebuild());
        assert_eq!(frames.surface().extent(), (96, 72));
        assert_eq!(
            frames.targets().render_target_count(),
            frames.surface().image_count() as usize
        );
    }

    #[test]
    fn failed_signal_ends_the_frame_fatally() {
        let mut frames = orchestrator();
        frames.begin_frame().unwrap();
        frames.device().fail_next_signal();

        let err = frames.end_frame().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(frames.state(), FrameState::Idle);
        assert_eq!(frames.frames_presented(), 0);
    }

    #[test]
    fn begin_after_shutdown_is_rejected() {
        let mut frames = orchestrator();
        frames.shutdown().unwrap();
        assert!(matches!(
            frames.begin_frame(),
            Err(FrameError::MissingDependency(_))
        ));
    }
}
