//! Command pool and command buffer management.
//!
//! - [`CommandPool`] is a command allocator: one pool per frame slot, reset
//!   as a whole once the GPU has finished with the slot. Each pool owns the
//!   primary `VkCommandBuffer` recorded against it.
//! - [`CommandBuffer`] is the single recording object the frame core reuses
//!   across slots. Reopening it against a pool points it at that pool's
//!   buffer and begins recording.
//!
//! Rendering uses Vulkan 1.3 dynamic rendering. Binding targets begins a
//! rendering scope with `LOAD` operations, clears are issued inside the
//! scope, and the scope is closed automatically before a barrier or when the
//! buffer is closed.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, trace, warn};

use crate::backend::{ClearColor, CommandRecorder, ResourceState, ScissorRect, Viewport};
use crate::depth_buffer::DepthStencilView;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::swapchain::{RenderTargetView, SwapchainImage};

/// Vulkan command pool wrapper acting as a per-slot command allocator.
///
/// Command pools are not thread-safe. One pool belongs to one frame slot
/// and is only touched by the frame-producing thread.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
    queue_family_index: u32,
}

impl CommandPool {
    /// Creates a transient pool for `queue_family_index` and allocates its
    /// primary command buffer.
    ///
    /// Buffers are only ever reset together with the pool.
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffer = match unsafe { device.handle().allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers.into_iter().next(),
            Err(e) => {
                unsafe { device.handle().destroy_command_pool(pool, None) };
                return Err(e.into());
            }
        };
        let Some(buffer) = buffer else {
            unsafe { device.handle().destroy_command_pool(pool, None) };
            return Err(RhiError::InvalidArgument(
                "driver returned no command buffer".to_string(),
            ));
        };

        debug!(
            "Command allocator created for queue family {}",
            queue_family_index
        );

        Ok(Self {
            device,
            pool,
            buffer,
            queue_family_index,
        })
    }

    /// Returns the Vulkan command pool handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// The primary command buffer allocated from this pool.
    #[inline]
    pub fn buffer(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Returns the queue family index this pool belongs to.
    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Returns every buffer of the pool to the initial state and reclaims
    /// its memory. The GPU must have finished executing them.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())?;
        }
        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        debug!(
            "Command allocator destroyed for queue family {}",
            self.queue_family_index
        );
    }
}

/// Barrier parameters for one image layout transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutTransition {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub dst_access: vk::AccessFlags,
}

/// Maps a tracked state change of a presentable image to a barrier.
///
/// Leaving `Present` discards the contents (old layout `UNDEFINED`); the
/// frame clears the target right after. The source stage is color
/// attachment output so the barrier chains with the image-acquire wait.
/// Returns `None` for transitions into `Undefined`, which Vulkan has no
/// layout for.
pub fn layout_transition(before: ResourceState, after: ResourceState) -> Option<LayoutTransition> {
    let (old_layout, src_stage, src_access) = match before {
        ResourceState::Undefined | ResourceState::Present => (
            vk::ImageLayout::UNDEFINED,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::empty(),
        ),
        ResourceState::RenderTarget => (
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
    };

    let (new_layout, dst_stage, dst_access) = match after {
        ResourceState::RenderTarget => (
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        ResourceState::Present => (
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::AccessFlags::empty(),
        ),
        ResourceState::Undefined => return None,
    };

    Some(LayoutTransition {
        old_layout,
        new_layout,
        src_stage,
        src_access,
        dst_stage,
        dst_access,
    })
}

#[derive(Clone, Copy, Debug)]
struct RenderingScope {
    color: Option<vk::ImageView>,
    depth: Option<vk::ImageView>,
}

/// Vulkan command buffer wrapper implementing [`CommandRecorder`].
///
/// The wrapper does NOT own the `VkCommandBuffer`; it points at the buffer
/// of the pool it was last reopened against. The handle is freed with that
/// pool.
pub struct CommandBuffer {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
    recording: bool,
    rendering: Option<RenderingScope>,
    /// Depth image already moved into attachment layout in this recording.
    prepared_depth: Option<vk::Image>,
}

impl CommandBuffer {
    /// Creates a closed command buffer pointing at `pool`'s buffer.
    pub fn new(device: Arc<Device>, pool: &CommandPool) -> Self {
        Self {
            device,
            buffer: pool.buffer(),
            recording: false,
            rendering: None,
            prepared_depth: None,
        }
    }

    /// Returns the raw Vulkan command buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Points the wrapper at `pool`'s buffer and begins one-time recording.
    /// The pool must have been reset since its buffer was last submitted.
    pub fn begin(&mut self, pool: &CommandPool) -> RhiResult<()> {
        if self.recording {
            return Err(RhiError::MissingDependency(
                "command buffer must be closed before it is reset",
            ));
        }

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device
                .handle()
                .begin_command_buffer(pool.buffer(), &begin_info)?;
        }

        self.buffer = pool.buffer();
        self.recording = true;
        self.rendering = None;
        self.prepared_depth = None;
        Ok(())
    }

    /// Ends recording, closing any open rendering scope first.
    pub fn end(&mut self) -> RhiResult<()> {
        if !self.recording {
            return Err(RhiError::MissingDependency("command buffer is not recording"));
        }
        self.end_rendering();
        unsafe {
            self.device.handle().end_command_buffer(self.buffer)?;
        }
        self.recording = false;
        Ok(())
    }

    fn can_record(&self, what: &str) -> bool {
        if !self.recording {
            debug!("Dropping {}: command buffer is closed", what);
        }
        self.recording
    }

    fn end_rendering(&mut self) {
        if self.rendering.take().is_some() {
            unsafe { self.device.handle().cmd_end_rendering(self.buffer) };
        }
    }

    fn begin_rendering(
        &mut self,
        color: Option<&RenderTargetView>,
        depth: Option<&DepthStencilView>,
    ) {
        self.end_rendering();

        if let Some(dsv) = depth {
            self.prepare_depth(dsv);
        }

        let color_attachments: Vec<vk::RenderingAttachmentInfo> = color
            .map(|rtv| {
                vk::RenderingAttachmentInfo::default()
                    .image_view(rtv.handle())
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(vk::AttachmentLoadOp::LOAD)
                    .store_op(vk::AttachmentStoreOp::STORE)
            })
            .into_iter()
            .collect();

        let depth_attachment = depth.map(|dsv| {
            vk::RenderingAttachmentInfo::default()
                .image_view(dsv.handle())
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::LOAD)
                .store_op(vk::AttachmentStoreOp::STORE)
        });

        let extent = color
            .map(RenderTargetView::extent)
            .or_else(|| depth.map(DepthStencilView::extent))
            .unwrap_or_default();

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(attachment) = depth_attachment.as_ref() {
            rendering_info = rendering_info
                .depth_attachment(attachment)
                .stencil_attachment(attachment);
        }

        unsafe {
            self.device
                .handle()
                .cmd_begin_rendering(self.buffer, &rendering_info);
        }

        self.rendering = Some(RenderingScope {
            color: color.map(RenderTargetView::handle),
            depth: depth.map(DepthStencilView::handle),
        });
    }

    /// Moves the shared depth image into attachment layout once per
    /// recording. Its previous contents are discarded.
    fn prepare_depth(&mut self, dsv: &DepthStencilView) {
        if self.prepared_depth == Some(dsv.image()) {
            return;
        }

        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(dsv.image())
            .subresource_range(subresource_range(dsv.aspect_mask()))
            .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
            .dst_access_mask(
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            );

        let stages = vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;

        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                self.buffer,
                stages,
                stages,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }

        self.prepared_depth = Some(dsv.image());
    }
}

fn subresource_range(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect_mask)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

fn clear_rect(extent: vk::Extent2D) -> vk::ClearRect {
    vk::ClearRect {
        rect: vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        },
        base_array_layer: 0,
        layer_count: 1,
    }
}

impl CommandRecorder for CommandBuffer {
    type Image = SwapchainImage;
    type RenderTargetView = RenderTargetView;
    type DepthStencilView = DepthStencilView;

    fn is_recording(&self) -> bool {
        self.recording
    }

    fn transition(&mut self, image: &SwapchainImage, before: ResourceState, after: ResourceState) {
        if !self.can_record("transition") {
            return;
        }
        let Some(t) = layout_transition(before, after) else {
            warn!("Unhandled state transition: {:?} -> {:?}", before, after);
            return;
        };

        self.end_rendering();

        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(t.old_layout)
            .new_layout(t.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image.handle)
            .subresource_range(subresource_range(vk::ImageAspectFlags::COLOR))
            .src_access_mask(t.src_access)
            .dst_access_mask(t.dst_access);

        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                self.buffer,
                t.src_stage,
                t.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
        trace!("Image {} transition {:?} -> {:?}", image.index, before, after);
    }

    fn bind_render_targets(&mut self, rtv: &RenderTargetView, dsv: Option<&DepthStencilView>) {
        if !self.can_record("bind_render_targets") {
            return;
        }
        self.begin_rendering(Some(rtv), dsv);
    }

    fn clear_render_target(&mut self, rtv: &RenderTargetView, color: ClearColor) {
        if !self.can_record("clear_render_target") {
            return;
        }
        let bound = self.rendering.and_then(|scope| scope.color);
        if bound != Some(rtv.handle()) {
            self.begin_rendering(Some(rtv), None);
        }

        let attachment = vk::ClearAttachment {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            color_attachment: 0,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: color.to_array(),
                },
            },
        };

        unsafe {
            self.device.handle().cmd_clear_attachments(
                self.buffer,
                &[attachment],
                &[clear_rect(rtv.extent())],
            );
        }
    }

    fn clear_depth_stencil(&mut self, dsv: &DepthStencilView, depth: f32, stencil: u8) {
        if !self.can_record("clear_depth_stencil") {
            return;
        }
        let bound = self.rendering.and_then(|scope| scope.depth);
        if bound != Some(dsv.handle()) {
            self.begin_rendering(None, Some(dsv));
        }

        let attachment = vk::ClearAttachment {
            aspect_mask: dsv.aspect_mask(),
            color_attachment: 0,
            clear_value: vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth,
                    stencil: u32::from(stencil),
                },
            },
        };

        unsafe {
            self.device.handle().cmd_clear_attachments(
                self.buffer,
                &[attachment],
                &[clear_rect(dsv.extent())],
            );
        }
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        if !self.can_record("set_viewport") {
            return;
        }
        let viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.buffer, 0, std::slice::from_ref(&viewport));
        }
    }

    fn set_scissor(&mut self, scissor: &ScissorRect) {
        if !self.can_record("set_scissor") {
            return;
        }
        let rect = vk::Rect2D {
            offset: vk::Offset2D {
                x: scissor.x,
                y: scissor.y,
            },
            extent: vk::Extent2D {
                width: scissor.width,
                height: scissor.height,
            },
        };
        unsafe {
            self.device
                .handle()
                .cmd_set_scissor(self.buffer, 0, std::slice::from_ref(&rect));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_buffer_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandBuffer>();
    }

    #[test]
    fn test_command_pool_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandPool>();
    }

    #[test]
    fn test_present_to_render_target_discards() {
        let t = layout_transition(ResourceState::Present, ResourceState::RenderTarget).unwrap();
        assert_eq!(t.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(t.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(t.src_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
    }

    #[test]
    fn test_render_target_to_present() {
        let t = layout_transition(ResourceState::RenderTarget, ResourceState::Present).unwrap();
        assert_eq!(t.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(t.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(t.src_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(t.dst_access, vk::AccessFlags::empty());
    }

    #[test]
    fn test_transition_into_undefined_is_rejected() {
        assert!(layout_transition(ResourceState::Present, ResourceState::Undefined).is_none());
    }
}
