//! Frame Target Manager.
//!
//! Owns one render-target view and one depth/stencil view per presentable
//! image, the shared depth buffer behind the depth views, and the tracked
//! [`ResourceState`] of every presentable image. The images themselves
//! belong to the [`PresentationSurface`].
//!
//! Tracked states change only through [`FrameTargets::transition`], which
//! records a barrier exactly when the tracked state differs from the
//! requested one.

use std::sync::Arc;

use cadence_rhi::{ClearColor, CommandRecorder, GpuDevice, ResourceState};
use tracing::{debug, trace};

use crate::error::{FrameError, FrameResult};
use crate::recorder::FrameRecorder;
use crate::surface::PresentationSurface;

/// State a presentable image is tracked in right after the chain is built.
pub const INITIAL_STATE: ResourceState = ResourceState::Present;

pub struct FrameTargets<D: GpuDevice> {
    render_targets: Vec<D::RenderTargetView>,
    // Views go before the buffer they view.
    depth_views: Vec<D::DepthStencilView>,
    depth_buffer: Option<D::DepthBuffer>,
    states: Vec<ResourceState>,
    device: Arc<D>,
}

impl<D: GpuDevice> FrameTargets<D> {
    /// An empty manager; call [`init`](Self::init) once the surface exists.
    pub fn new(device: Arc<D>) -> Self {
        Self {
            render_targets: Vec::new(),
            depth_views: Vec::new(),
            depth_buffer: None,
            states: Vec::new(),
            device,
        }
    }

    /// Creates the views for every image of `surface` and a depth buffer
    /// sized to it. Tracked states start as [`INITIAL_STATE`].
    pub fn init(&mut self, surface: &PresentationSurface<D>) -> FrameResult<()> {
        self.release();

        let (width, height) = surface.extent();
        let depth_buffer = self.device.create_depth_buffer(width, height)?;

        let mut render_targets = Vec::with_capacity(surface.images().len());
        let mut depth_views = Vec::with_capacity(surface.images().len());
        for image in surface.images() {
            render_targets.push(self.device.create_render_target_view(image)?);
            depth_views.push(self.device.create_depth_stencil_view(&depth_buffer)?);
        }

        self.render_targets = render_targets;
        self.depth_views = depth_views;
        self.depth_buffer = Some(depth_buffer);
        self.states = vec![INITIAL_STATE; surface.images().len()];

        debug!(
            "Frame targets created: {} render-target views, depth {}x{}",
            self.render_targets.len(),
            width,
            height
        );
        Ok(())
    }

    /// Destroys every view and recreates them for the rebuilt chain.
    pub fn resize(&mut self, surface: &PresentationSurface<D>) -> FrameResult<()> {
        debug!(
            "Recreating frame targets ({} views released)",
            self.render_targets.len()
        );
        self.init(surface)
    }

    /// Drops all views, then the depth buffer.
    pub fn release(&mut self) {
        self.render_targets.clear();
        self.depth_views.clear();
        self.depth_buffer = None;
        self.states.clear();
    }

    /// Records a transition of image `index` to `after`.
    ///
    /// Returns whether a barrier was recorded; none is when the tracked
    /// state already equals `after`.
    pub fn transition(
        &mut self,
        cmd: &mut FrameRecorder<D>,
        image: &D::Image,
        index: u32,
        after: ResourceState,
    ) -> FrameResult<bool> {
        let state = self
            .states
            .get_mut(index as usize)
            .ok_or(FrameError::ImageIndex(index))?;
        if *state == after {
            trace!("Image {} already in {:?}, no barrier", index, after);
            return Ok(false);
        }
        cmd.transition(image, *state, after);
        *state = after;
        Ok(true)
    }

    /// Binds the color and depth views of image `index`.
    pub fn bind(&self, cmd: &mut FrameRecorder<D>, index: u32) -> FrameResult<()> {
        let rtv = self
            .render_targets
            .get(index as usize)
            .ok_or(FrameError::ImageIndex(index))?;
        cmd.bind_render_targets(rtv, self.depth_views.get(index as usize));
        Ok(())
    }

    /// Clears the color view of image `index`; no-op when it is absent.
    pub fn clear_target(&self, cmd: &mut FrameRecorder<D>, index: u32, color: ClearColor) {
        if let Some(rtv) = self.render_targets.get(index as usize) {
            cmd.clear_render_target(rtv, color);
        }
    }

    /// Clears the depth view of image `index`; no-op when it is absent.
    pub fn clear_depth(&self, cmd: &mut FrameRecorder<D>, index: u32, depth: f32, stencil: u8) {
        if let Some(dsv) = self.depth_views.get(index as usize) {
            cmd.clear_depth_stencil(dsv, depth, stencil);
        }
    }

    /// Tracked state of image `index`.
    pub fn back_buffer_state(&self, index: u32) -> Option<ResourceState> {
        self.states.get(index as usize).copied()
    }

    /// Overwrites the tracked state of image `index` without recording
    /// anything.
    pub fn set_back_buffer_state(&mut self, index: u32, state: ResourceState) -> FrameResult<()> {
        let slot = self
            .states
            .get_mut(index as usize)
            .ok_or(FrameError::ImageIndex(index))?;
        *slot = state;
        Ok(())
    }

    /// Tracked states of all images, in index order.
    #[inline]
    pub fn states(&self) -> &[ResourceState] {
        &self.states
    }

    /// Puts back states captured with [`states`](Self::states).
    pub(crate) fn restore_states(&mut self, states: &[ResourceState]) {
        if states.len() == self.states.len() {
            self.states.copy_from_slice(states);
        }
    }

    #[inline]
    pub fn render_target_count(&self) -> usize {
        self.render_targets.len()
    }

    #[inline]
    pub fn depth_view_count(&self) -> usize {
        self.depth_views.len()
    }

    #[inline]
    pub fn has_depth_buffer(&self) -> bool {
        self.depth_buffer.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_rhi::SwapchainDesc;
    use cadence_rhi::headless::{HeadlessGpu, RecordedCommand};

    fn open_recorder(gpu: &HeadlessGpu) -> FrameRecorder<HeadlessGpu> {
        let allocator = gpu.create_command_allocator().unwrap();
        let mut buffer = gpu.create_command_buffer(&allocator).unwrap();
        gpu.reopen_command_buffer(&mut buffer, &allocator).unwrap();
        FrameRecorder::new(buffer)
    }

    fn setup() -> (Arc<HeadlessGpu>, PresentationSurface<HeadlessGpu>, FrameTargets<HeadlessGpu>) {
        let gpu = Arc::new(HeadlessGpu::new());
        let queue = gpu.create_queue().unwrap();
        let desc = SwapchainDesc {
            width: 128,
            height: 64,
            image_count: 3,
            vsync: true,
        };
        let surface = PresentationSurface::create(gpu.clone(), &queue, &(), desc).unwrap();
        let mut targets = FrameTargets::new(gpu.clone());
        targets.init(&surface).unwrap();
        (gpu, surface, targets)
    }

    #[test]
    fn init_creates_views_per_image() {
        let (gpu, _surface, targets) = setup();
        assert_eq!(targets.render_target_count(), 3);
        assert_eq!(targets.depth_view_count(), 3);
        assert!(targets.has_depth_buffer());
        assert_eq!(gpu.stats().live_render_target_views(), 3);
        assert!(targets.states().iter().all(|s| *s == ResourceState::Present));
    }

    #[test]
    fn state_round_trip() {
        let (_gpu, _surface, mut targets) = setup();
        let all = [
            ResourceState::Undefined,
            ResourceState::RenderTarget,
            ResourceState::Present,
        ];
        for index in 0..3 {
            for state in all {
                targets.set_back_buffer_state(index, state).unwrap();
                assert_eq!(
                    targets.back_buffer_state(index),
                    Some(state),
                    "image {index}"
                );
            }
        }
        assert!(matches!(
            targets.set_back_buffer_state(3, ResourceState::Present),
            Err(FrameError::ImageIndex(3))
        ));
        assert_eq!(targets.back_buffer_state(3), None);
    }

    #[test]
    fn repeated_transition_records_one_barrier() {
        let (gpu, surface, mut targets) = setup();
        let mut cmd = open_recorder(&gpu);

        let image = surface.image(0).unwrap().clone();
        assert!(targets
            .transition(&mut cmd, &image, 0, ResourceState::RenderTarget)
            .unwrap());
        assert!(!targets
            .transition(&mut cmd, &image, 0, ResourceState::RenderTarget)
            .unwrap());

        let barriers = cmd
            .raw()
            .commands()
            .iter()
            .filter(|c| matches!(c, RecordedCommand::Transition { .. }))
            .count();
        assert_eq!(barriers, 1);
    }

    #[test]
    fn clears_are_noops_without_views() {
        let (gpu, _surface, mut targets) = setup();
        targets.release();
        let mut cmd = open_recorder(&gpu);

        targets.clear_target(&mut cmd, 0, ClearColor::BLACK);
        targets.clear_depth(&mut cmd, 0, 1.0, 0);
        assert!(cmd.raw().commands().is_empty());
        assert_eq!(gpu.stats().live_render_target_views(), 0);
        assert_eq!(gpu.stats().live_depth_views(), 0);
    }
}
