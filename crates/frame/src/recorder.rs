//! The command recorder of an open frame.
//!
//! [`FrameRecorder`] wraps the shared command buffer together with the last
//! viewport and scissor applied to it. Every `set_viewport`/`set_scissor`
//! goes through that cache, whether it comes from the frame core or from the
//! rendering layer, so identical rectangles are recorded once and the cache
//! always matches the state bound on the buffer.

use cadence_rhi::{ClearColor, CommandRecorder, GpuDevice, ResourceState, ScissorRect, Viewport};
use tracing::trace;

pub struct FrameRecorder<D: GpuDevice> {
    buffer: D::CommandBuffer,
    viewport: Option<Viewport>,
    scissor: Option<ScissorRect>,
}

impl<D: GpuDevice> FrameRecorder<D> {
    pub(crate) fn new(buffer: D::CommandBuffer) -> Self {
        Self {
            buffer,
            viewport: None,
            scissor: None,
        }
    }

    /// The buffer for open/close/submit calls; recorded state is untouched.
    pub(crate) fn buffer_mut(&mut self) -> &mut D::CommandBuffer {
        &mut self.buffer
    }

    /// Forgets the cached viewport and scissor. A reset buffer carries no
    /// rasterizer state.
    pub(crate) fn reset_state_cache(&mut self) {
        self.viewport = None;
        self.scissor = None;
    }

    #[inline]
    pub fn raw(&self) -> &D::CommandBuffer {
        &self.buffer
    }

    /// Backend command buffer for recording beyond [`CommandRecorder`].
    ///
    /// Anything recorded here may change the bound viewport or scissor, so
    /// the cache is cleared and the next cached call records again.
    pub fn raw_mut(&mut self) -> &mut D::CommandBuffer {
        self.reset_state_cache();
        &mut self.buffer
    }

    /// Viewport last recorded in this recording.
    #[inline]
    pub fn viewport(&self) -> Option<&Viewport> {
        self.viewport.as_ref()
    }

    /// Scissor rectangle last recorded in this recording.
    #[inline]
    pub fn scissor(&self) -> Option<&ScissorRect> {
        self.scissor.as_ref()
    }
}

impl<D: GpuDevice> CommandRecorder for FrameRecorder<D> {
    type Image = D::Image;
    type RenderTargetView = D::RenderTargetView;
    type DepthStencilView = D::DepthStencilView;

    fn is_recording(&self) -> bool {
        self.buffer.is_recording()
    }

    fn transition(&mut self, image: &D::Image, before: ResourceState, after: ResourceState) {
        self.buffer.transition(image, before, after);
    }

    fn bind_render_targets(
        &mut self,
        rtv: &D::RenderTargetView,
        dsv: Option<&D::DepthStencilView>,
    ) {
        self.buffer.bind_render_targets(rtv, dsv);
    }

    fn clear_render_target(&mut self, rtv: &D::RenderTargetView, color: ClearColor) {
        self.buffer.clear_render_target(rtv, color);
    }

    fn clear_depth_stencil(&mut self, dsv: &D::DepthStencilView, depth: f32, stencil: u8) {
        self.buffer.clear_depth_stencil(dsv, depth, stencil);
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        if !self.buffer.is_recording() {
            return;
        }
        if self.viewport.as_ref() == Some(viewport) {
            trace!("Viewport unchanged, skipped");
            return;
        }
        self.buffer.set_viewport(viewport);
        self.viewport = Some(*viewport);
    }

    fn set_scissor(&mut self, scissor: &ScissorRect) {
        if !self.buffer.is_recording() {
            return;
        }
        if self.scissor.as_ref() == Some(scissor) {
            trace!("Scissor unchanged, skipped");
            return;
        }
        self.buffer.set_scissor(scissor);
        self.scissor = Some(*scissor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_rhi::headless::{HeadlessGpu, RecordedCommand};

    fn open_recorder(gpu: &HeadlessGpu) -> FrameRecorder<HeadlessGpu> {
        let allocator = gpu.create_command_allocator().unwrap();
        let mut buffer = gpu.create_command_buffer(&allocator).unwrap();
        gpu.reopen_command_buffer(&mut buffer, &allocator).unwrap();
        FrameRecorder::new(buffer)
    }

    fn scissors(recorder: &FrameRecorder<HeadlessGpu>) -> usize {
        recorder
            .raw()
            .commands()
            .iter()
            .filter(|c| matches!(c, RecordedCommand::SetScissor(_)))
            .count()
    }

    #[test]
    fn identical_scissor_is_recorded_once() {
        let gpu = HeadlessGpu::new();
        let mut recorder = open_recorder(&gpu);
        let rect = ScissorRect::full(32, 32);

        recorder.set_scissor(&rect);
        recorder.set_scissor(&rect);
        assert_eq!(scissors(&recorder), 1);
        assert_eq!(recorder.scissor(), Some(&rect));
    }

    #[test]
    fn raw_access_forgets_cached_state() {
        let gpu = HeadlessGpu::new();
        let mut recorder = open_recorder(&gpu);
        let rect = ScissorRect::full(32, 32);

        recorder.set_scissor(&rect);
        recorder.raw_mut().set_scissor(&ScissorRect::full(8, 8));
        assert_eq!(recorder.scissor(), None);

        recorder.set_scissor(&rect);
        assert_eq!(scissors(&recorder), 3);
    }

    #[test]
    fn closed_buffer_caches_nothing() {
        let gpu = HeadlessGpu::new();
        let allocator = gpu.create_command_allocator().unwrap();
        let buffer = gpu.create_command_buffer(&allocator).unwrap();
        let mut recorder = FrameRecorder::<HeadlessGpu>::new(buffer);

        recorder.set_viewport(&Viewport::full(4, 4));
        assert_eq!(recorder.viewport(), None);
        assert!(recorder.raw().commands().is_empty());
    }
}
