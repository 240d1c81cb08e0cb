//! The backend seam between the frame-submission core and a GPU API.
//!
//! [`GpuDevice`] is the object factory plus the queue, fence and swapchain
//! operations the core needs. [`CommandRecorder`] is the small set of
//! commands the core records itself (barriers, target binding, clears,
//! viewport and scissor). Every GPU object is an associated type owned by
//! whoever created it and released on `Drop`.
//!
//! Two backends implement the seam: the Vulkan backend
//! ([`crate::device::VulkanGpu`]) and the headless backend
//! ([`crate::headless::HeadlessGpu`]) used for tests and windowless runs.

use crate::error::RhiResult;

/// CPU-side tag for the state a presentable image is in on the GPU timeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Contents undefined; the image has never been used.
    #[default]
    Undefined,
    /// Writable as a color render target.
    RenderTarget,
    /// Ready to be handed to the presentation engine.
    Present,
}

/// Rasterizer viewport in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Viewport covering a whole `width` x `height` target with depth 0..1.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Scissor rectangle in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScissorRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl ScissorRect {
    /// Scissor covering a whole `width` x `height` target.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// Linear RGBA clear color.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ClearColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl ClearColor {
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl From<[f32; 4]> for ClearColor {
    fn from([r, g, b, a]: [f32; 4]) -> Self {
        Self { r, g, b, a }
    }
}

/// Parameters for building a chain of presentable images.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub width: u32,
    pub height: u32,
    /// Requested image count; backends clamp to what the surface allows but
    /// never go below 2.
    pub image_count: u32,
    /// Prefer a present mode that waits for vertical blank.
    pub vsync: bool,
}

/// Per-present options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PresentFlags {
    /// Allow tearing when `sync_interval` is 0 and the surface supports it.
    pub allow_tearing: bool,
}

/// Commands the frame-submission core records into a command buffer.
///
/// Recording methods are infallible; errors surface when the buffer is
/// closed or submitted.
pub trait CommandRecorder {
    /// A presentable image.
    type Image;
    /// A color render-target view.
    type RenderTargetView;
    /// A depth/stencil view.
    type DepthStencilView;

    /// Whether the buffer is open for recording.
    fn is_recording(&self) -> bool;

    /// Record a state-transition barrier on a presentable image.
    fn transition(&mut self, image: &Self::Image, before: ResourceState, after: ResourceState);

    /// Bind the color target and optional depth/stencil target for
    /// subsequent rendering commands.
    fn bind_render_targets(
        &mut self,
        rtv: &Self::RenderTargetView,
        dsv: Option<&Self::DepthStencilView>,
    );

    /// Clear a color target.
    fn clear_render_target(&mut self, rtv: &Self::RenderTargetView, color: ClearColor);

    /// Clear a depth/stencil target.
    fn clear_depth_stencil(&mut self, dsv: &Self::DepthStencilView, depth: f32, stencil: u8);

    /// Set the rasterizer viewport.
    fn set_viewport(&mut self, viewport: &Viewport);

    /// Set the scissor rectangle.
    fn set_scissor(&mut self, scissor: &ScissorRect);
}

/// A GPU backend: object factory plus queue, fence and swapchain operations.
///
/// Fences are monotonically increasing 64-bit counters. A queue signal
/// sets the fence to a value once all previously submitted work on that
/// queue has completed.
pub trait GpuDevice: Sized + 'static {
    type Queue;
    type Fence;
    type CommandAllocator;
    type CommandBuffer: CommandRecorder<
            Image = Self::Image,
            RenderTargetView = Self::RenderTargetView,
            DepthStencilView = Self::DepthStencilView,
        >;
    type Swapchain;
    /// What a swapchain presents to (a window surface, or nothing).
    type SurfaceTarget;
    type Image: Clone;
    type RenderTargetView;
    type DepthBuffer;
    type DepthStencilView;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    // ---------------------------------------------------------------------
    // Queue and fence
    // ---------------------------------------------------------------------

    /// Create the direct (graphics) command queue.
    fn create_queue(&self) -> RhiResult<Self::Queue>;

    /// Create a fence whose counter starts at `initial_value`.
    fn create_fence(&self, initial_value: u64) -> RhiResult<Self::Fence>;

    /// Highest value the GPU has completed.
    fn completed_value(&self, fence: &Self::Fence) -> RhiResult<u64>;

    /// Block the calling thread until the fence reaches `value`.
    fn wait_for_value(&self, fence: &Self::Fence, value: u64) -> RhiResult<()>;

    /// Enqueue a signal of `value` after all work already on `queue`.
    fn signal(&self, queue: &Self::Queue, fence: &Self::Fence, value: u64) -> RhiResult<()>;

    // ---------------------------------------------------------------------
    // Command recording
    // ---------------------------------------------------------------------

    /// Create a command allocator, the backing memory for one frame slot.
    fn create_command_allocator(&self) -> RhiResult<Self::CommandAllocator>;

    /// Reclaim all memory of an allocator. The GPU must be done with it.
    fn reset_command_allocator(&self, allocator: &mut Self::CommandAllocator) -> RhiResult<()>;

    /// Create a command buffer bound to `allocator`, initially closed.
    fn create_command_buffer(
        &self,
        allocator: &Self::CommandAllocator,
    ) -> RhiResult<Self::CommandBuffer>;

    /// Reset `cmd` and open it for recording against `allocator`.
    fn reopen_command_buffer(
        &self,
        cmd: &mut Self::CommandBuffer,
        allocator: &Self::CommandAllocator,
    ) -> RhiResult<()>;

    /// Finish recording.
    fn close_command_buffer(&self, cmd: &mut Self::CommandBuffer) -> RhiResult<()>;

    /// Submit a closed command buffer to `queue`.
    fn submit(&self, queue: &Self::Queue, cmd: &Self::CommandBuffer) -> RhiResult<()>;

    // ---------------------------------------------------------------------
    // Presentation
    // ---------------------------------------------------------------------

    /// Build a chain of presentable images for `target`, presented on `queue`.
    fn create_swapchain(
        &self,
        queue: &Self::Queue,
        target: &Self::SurfaceTarget,
        desc: &SwapchainDesc,
    ) -> RhiResult<Self::Swapchain>;

    /// The chain's images, in index order.
    fn swapchain_images(&self, swapchain: &Self::Swapchain) -> Vec<Self::Image>;

    /// Actual size of the chain's images.
    fn swapchain_extent(&self, swapchain: &Self::Swapchain) -> (u32, u32);

    /// Index of the image the next frame renders into, chosen by the
    /// presentation engine.
    fn current_image_index(&self, swapchain: &Self::Swapchain) -> u32;

    /// Present the current image after all work on `queue`, then move to
    /// the next image.
    ///
    /// Returns [`crate::RhiError::SurfaceOutOfDate`] when the surface
    /// changed under the chain.
    fn present(
        &self,
        queue: &Self::Queue,
        swapchain: &mut Self::Swapchain,
        sync_interval: u32,
        flags: PresentFlags,
    ) -> RhiResult<()>;

    /// Rebuild the chain at a new size. No image may be in use by the GPU.
    fn resize_swapchain(
        &self,
        queue: &Self::Queue,
        swapchain: &mut Self::Swapchain,
        width: u32,
        height: u32,
    ) -> RhiResult<()>;

    // ---------------------------------------------------------------------
    // Frame targets
    // ---------------------------------------------------------------------

    /// Create a render-target view of a presentable image.
    fn create_render_target_view(&self, image: &Self::Image) -> RhiResult<Self::RenderTargetView>;

    /// Create a depth/stencil buffer.
    fn create_depth_buffer(&self, width: u32, height: u32) -> RhiResult<Self::DepthBuffer>;

    /// Create a depth/stencil view of `depth`. The view must be dropped
    /// before the buffer.
    fn create_depth_stencil_view(
        &self,
        depth: &Self::DepthBuffer,
    ) -> RhiResult<Self::DepthStencilView>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_viewport_covers_target() {
        let vp = Viewport::full(800, 600);
        assert_eq!(vp.width, 800.0);
        assert_eq!(vp.height, 600.0);
        assert_eq!((vp.min_depth, vp.max_depth), (0.0, 1.0));
    }

    #[test]
    fn clear_color_from_array() {
        let color = ClearColor::from([0.25, 0.5, 0.75, 1.0]);
        assert_eq!(color.to_array(), [0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn resource_state_defaults_to_undefined() {
        assert_eq!(ResourceState::default(), ResourceState::Undefined);
    }
}
