//! Headless backend: a [`GpuDevice`] with no GPU behind it.
//!
//! Command buffers record into plain vectors and every submission is kept
//! in a log. The simulated GPU timeline either completes each signal
//! immediately or lags a configurable number of signals behind the CPU, so
//! frame pacing can be observed without hardware. Counters track blocking
//! waits, allocator resets, submissions, presents and view lifetimes.
//! The submission and present logs keep only the most recent
//! [`LOG_CAPACITY`] entries. Single signal and resize failures can be
//! injected to exercise the error paths of the frame core.
//!
//! # Example
//!
//! ```
//! use cadence_rhi::backend::GpuDevice;
//! use cadence_rhi::headless::HeadlessGpu;
//!
//! let gpu = HeadlessGpu::with_gpu_latency(2);
//! let queue = gpu.create_queue().unwrap();
//! let fence = gpu.create_fence(0).unwrap();
//!
//! gpu.signal(&queue, &fence, 1).unwrap();
//! assert_eq!(gpu.completed_value(&fence).unwrap(), 0);
//!
//! gpu.wait_for_value(&fence, 1).unwrap();
//! assert_eq!(gpu.stats().blocking_waits, 1);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ash::vk;
use tracing::{debug, trace};

use crate::backend::{
    ClearColor, CommandRecorder, GpuDevice, PresentFlags, ResourceState, ScissorRect,
    SwapchainDesc, Viewport,
};
use crate::error::{RhiError, RhiResult};

/// One command recorded by a [`HeadlessCommandBuffer`].
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedCommand {
    Transition {
        image: u32,
        before: ResourceState,
        after: ResourceState,
    },
    BindRenderTargets {
        rtv: u64,
        dsv: Option<u64>,
    },
    ClearRenderTarget {
        rtv: u64,
        color: ClearColor,
    },
    ClearDepthStencil {
        dsv: u64,
        depth: f32,
        stencil: u8,
    },
    SetViewport(Viewport),
    SetScissor(ScissorRect),
}

/// A command buffer as it was submitted.
#[derive(Clone, Debug, PartialEq)]
pub struct SubmittedBatch {
    /// Allocator the buffer was recorded against.
    pub allocator: u64,
    pub commands: Vec<RecordedCommand>,
}

/// Snapshot of the headless device counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    /// Waits that found the fence behind the requested value.
    pub blocking_waits: u64,
    pub allocator_resets: u64,
    pub submissions: u64,
    pub signals: u64,
    pub presents: u64,
    pub render_target_views_created: u64,
    pub render_target_views_destroyed: u64,
    pub depth_views_created: u64,
    pub depth_views_destroyed: u64,
    /// Chains built, including rebuilds on resize.
    pub swapchains_built: u64,
}

impl HeadlessStats {
    /// Render-target views currently alive.
    pub fn live_render_target_views(&self) -> u64 {
        self.render_target_views_created - self.render_target_views_destroyed
    }

    /// Depth/stencil views currently alive.
    pub fn live_depth_views(&self) -> u64 {
        self.depth_views_created - self.depth_views_destroyed
    }
}

#[derive(Debug, Default)]
struct Counters {
    blocking_waits: AtomicU64,
    allocator_resets: AtomicU64,
    submissions: AtomicU64,
    signals: AtomicU64,
    presents: AtomicU64,
    rtv_created: AtomicU64,
    rtv_destroyed: AtomicU64,
    dsv_created: AtomicU64,
    dsv_destroyed: AtomicU64,
    swapchains_built: AtomicU64,
}

/// Entries kept in each of the submission and present logs.
pub const LOG_CAPACITY: usize = 1024;

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn push_bounded<T>(log: &mut VecDeque<T>, entry: T) {
    if log.len() == LOG_CAPACITY {
        log.pop_front();
    }
    log.push_back(entry);
}

/// The headless device.
#[derive(Debug, Default)]
pub struct HeadlessGpu {
    latency: u64,
    counters: Arc<Counters>,
    surface_invalid: AtomicBool,
    fail_signal: AtomicBool,
    fail_resize: AtomicBool,
    next_id: AtomicU64,
    submitted: Mutex<VecDeque<SubmittedBatch>>,
    presented: Mutex<VecDeque<u32>>,
}

impl HeadlessGpu {
    /// A device whose GPU completes every signal immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// A device whose GPU trails the CPU by `signals` fence signals.
    pub fn with_gpu_latency(signals: u64) -> Self {
        Self {
            latency: signals,
            ..Self::default()
        }
    }

    /// Configured GPU lag in signals.
    pub fn gpu_latency(&self) -> u64 {
        self.latency
    }

    /// Make the next present report an out-of-date surface.
    pub fn invalidate_surfaces(&self) {
        self.surface_invalid.store(true, Ordering::SeqCst);
    }

    /// Make the next fence signal fail after its batch was submitted.
    pub fn fail_next_signal(&self) {
        self.fail_signal.store(true, Ordering::SeqCst);
    }

    /// Make the next swapchain resize report an out-of-date surface.
    pub fn fail_next_resize(&self) {
        self.fail_resize.store(true, Ordering::SeqCst);
    }

    /// Current counter values.
    pub fn stats(&self) -> HeadlessStats {
        let c = &self.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        HeadlessStats {
            blocking_waits: load(&c.blocking_waits),
            allocator_resets: load(&c.allocator_resets),
            submissions: load(&c.submissions),
            signals: load(&c.signals),
            presents: load(&c.presents),
            render_target_views_created: load(&c.rtv_created),
            render_target_views_destroyed: load(&c.rtv_destroyed),
            depth_views_created: load(&c.dsv_created),
            depth_views_destroyed: load(&c.dsv_destroyed),
            swapchains_built: load(&c.swapchains_built),
        }
    }

    /// The most recent submitted batches, oldest first.
    pub fn submitted(&self) -> Vec<SubmittedBatch> {
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// The most recently presented image indices, oldest first.
    pub fn presented_images(&self) -> Vec<u32> {
        self.presented
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn new_view(&self, kind: ViewKind, image: Option<u32>) -> HeadlessView {
        match kind {
            ViewKind::RenderTarget => bump(&self.counters.rtv_created),
            ViewKind::DepthStencil => bump(&self.counters.dsv_created),
        }
        HeadlessView {
            id: self.next_id(),
            kind,
            image,
            counters: Arc::clone(&self.counters),
        }
    }
}

/// Headless command queue.
#[derive(Debug)]
pub struct HeadlessQueue {
    id: u64,
}

impl HeadlessQueue {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Headless fence: a signaled counter and a completed counter.
#[derive(Debug)]
pub struct HeadlessFence {
    signaled: AtomicU64,
    completed: AtomicU64,
}

impl HeadlessFence {
    /// Highest value signaled by the CPU side.
    pub fn signaled_value(&self) -> u64 {
        self.signaled.load(Ordering::SeqCst)
    }

    /// Highest value the simulated GPU has reached.
    pub fn completed_value(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }
}

/// Headless command allocator.
#[derive(Debug)]
pub struct HeadlessAllocator {
    id: u64,
    resets: u64,
}

impl HeadlessAllocator {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Times this allocator was reset.
    pub fn resets(&self) -> u64 {
        self.resets
    }
}

/// Headless command buffer.
#[derive(Debug, Default)]
pub struct HeadlessCommandBuffer {
    allocator: u64,
    recording: bool,
    commands: Vec<RecordedCommand>,
}

impl HeadlessCommandBuffer {
    /// Commands recorded since the last reopen.
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// Allocator the buffer is currently bound to.
    pub fn allocator(&self) -> u64 {
        self.allocator
    }

    fn push(&mut self, command: RecordedCommand) {
        if self.recording {
            self.commands.push(command);
        } else {
            debug!("Dropping {:?}: command buffer is closed", command);
        }
    }
}

impl CommandRecorder for HeadlessCommandBuffer {
    type Image = HeadlessImage;
    type RenderTargetView = HeadlessView;
    type DepthStencilView = HeadlessView;

    fn is_recording(&self) -> bool {
        self.recording
    }

    fn transition(&mut self, image: &HeadlessImage, before: ResourceState, after: ResourceState) {
        self.push(RecordedCommand::Transition {
            image: image.index,
            before,
            after,
        });
    }

    fn bind_render_targets(&mut self, rtv: &HeadlessView, dsv: Option<&HeadlessView>) {
        self.push(RecordedCommand::BindRenderTargets {
            rtv: rtv.id,
            dsv: dsv.map(|v| v.id),
        });
    }

    fn clear_render_target(&mut self, rtv: &HeadlessView, color: ClearColor) {
        self.push(RecordedCommand::ClearRenderTarget { rtv: rtv.id, color });
    }

    fn clear_depth_stencil(&mut self, dsv: &HeadlessView, depth: f32, stencil: u8) {
        self.push(RecordedCommand::ClearDepthStencil {
            dsv: dsv.id,
            depth,
            stencil,
        });
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        self.push(RecordedCommand::SetViewport(*viewport));
    }

    fn set_scissor(&mut self, scissor: &ScissorRect) {
        self.push(RecordedCommand::SetScissor(*scissor));
    }
}

/// Headless chain of presentable images.
#[derive(Debug)]
pub struct HeadlessSwapchain {
    width: u32,
    height: u32,
    image_count: u32,
    current: u32,
    generation: u64,
}

impl HeadlessSwapchain {
    /// Incremented each time the chain is rebuilt.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// A presentable image of a [`HeadlessSwapchain`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeadlessImage {
    pub index: u32,
    pub generation: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ViewKind {
    RenderTarget,
    DepthStencil,
}

/// Headless render-target or depth/stencil view.
#[derive(Debug)]
pub struct HeadlessView {
    id: u64,
    kind: ViewKind,
    image: Option<u32>,
    counters: Arc<Counters>,
}

impl HeadlessView {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Presentable image index for render-target views.
    pub fn image_index(&self) -> Option<u32> {
        self.image
    }
}

impl Drop for HeadlessView {
    fn drop(&mut self) {
        match self.kind {
            ViewKind::RenderTarget => bump(&self.counters.rtv_destroyed),
            ViewKind::DepthStencil => bump(&self.counters.dsv_destroyed),
        }
    }
}

/// Headless depth/stencil buffer.
#[derive(Debug)]
pub struct HeadlessDepthBuffer {
    pub width: u32,
    pub height: u32,
}

fn check_extent(width: u32, height: u32) -> RhiResult<()> {
    if width == 0 || height == 0 {
        return Err(RhiError::InvalidArgument(format!(
            "extent must be non-zero (got {width}x{height})"
        )));
    }
    Ok(())
}

impl GpuDevice for HeadlessGpu {
    type Queue = HeadlessQueue;
    type Fence = HeadlessFence;
    type CommandAllocator = HeadlessAllocator;
    type CommandBuffer = HeadlessCommandBuffer;
    type Swapchain = HeadlessSwapchain;
    type SurfaceTarget = ();
    type Image = HeadlessImage;
    type RenderTargetView = HeadlessView;
    type DepthBuffer = HeadlessDepthBuffer;
    type DepthStencilView = HeadlessView;

    fn name(&self) -> &'static str {
        "headless"
    }

    fn create_queue(&self) -> RhiResult<HeadlessQueue> {
        Ok(HeadlessQueue { id: self.next_id() })
    }

    fn create_fence(&self, initial_value: u64) -> RhiResult<HeadlessFence> {
        Ok(HeadlessFence {
            signaled: AtomicU64::new(initial_value),
            completed: AtomicU64::new(initial_value),
        })
    }

    fn completed_value(&self, fence: &HeadlessFence) -> RhiResult<u64> {
        Ok(fence.completed_value())
    }

    fn wait_for_value(&self, fence: &HeadlessFence, value: u64) -> RhiResult<()> {
        if value > fence.signaled_value() {
            return Err(RhiError::InvalidArgument(format!(
                "waiting for fence value {} which was never signaled (last {})",
                value,
                fence.signaled_value()
            )));
        }
        if fence.completed_value() < value {
            bump(&self.counters.blocking_waits);
            trace!(
                "Headless GPU catching up: {} -> {}",
                fence.completed_value(),
                value
            );
            fence.completed.fetch_max(value, Ordering::SeqCst);
        }
        Ok(())
    }

    fn signal(&self, _queue: &HeadlessQueue, fence: &HeadlessFence, value: u64) -> RhiResult<()> {
        if self.fail_signal.swap(false, Ordering::SeqCst) {
            return Err(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }
        fence.signaled.fetch_max(value, Ordering::SeqCst);
        fence
            .completed
            .fetch_max(value.saturating_sub(self.latency), Ordering::SeqCst);
        bump(&self.counters.signals);
        Ok(())
    }

    fn create_command_allocator(&self) -> RhiResult<HeadlessAllocator> {
        Ok(HeadlessAllocator {
            id: self.next_id(),
            resets: 0,
        })
    }

    fn reset_command_allocator(&self, allocator: &mut HeadlessAllocator) -> RhiResult<()> {
        allocator.resets += 1;
        bump(&self.counters.allocator_resets);
        Ok(())
    }

    fn create_command_buffer(
        &self,
        allocator: &HeadlessAllocator,
    ) -> RhiResult<HeadlessCommandBuffer> {
        Ok(HeadlessCommandBuffer {
            allocator: allocator.id,
            ..Default::default()
        })
    }

    fn reopen_command_buffer(
        &self,
        cmd: &mut HeadlessCommandBuffer,
        allocator: &HeadlessAllocator,
    ) -> RhiResult<()> {
        if cmd.recording {
            return Err(RhiError::MissingDependency(
                "command buffer must be closed before it is reset",
            ));
        }
        cmd.commands.clear();
        cmd.allocator = allocator.id;
        cmd.recording = true;
        Ok(())
    }

    fn close_command_buffer(&self, cmd: &mut HeadlessCommandBuffer) -> RhiResult<()> {
        if !cmd.recording {
            return Err(RhiError::MissingDependency("command buffer is not recording"));
        }
        cmd.recording = false;
        Ok(())
    }

    fn submit(&self, _queue: &HeadlessQueue, cmd: &HeadlessCommandBuffer) -> RhiResult<()> {
        if cmd.recording {
            return Err(RhiError::MissingDependency(
                "command buffer must be closed before submission",
            ));
        }
        bump(&self.counters.submissions);
        let mut log = self
            .submitted
            .lock()
            .map_err(|_| RhiError::LockPoisoned("headless submission log"))?;
        push_bounded(
            &mut log,
            SubmittedBatch {
                allocator: cmd.allocator,
                commands: cmd.commands.clone(),
            },
        );
        Ok(())
    }

    fn create_swapchain(
        &self,
        _queue: &HeadlessQueue,
        _target: &(),
        desc: &SwapchainDesc,
    ) -> RhiResult<HeadlessSwapchain> {
        check_extent(desc.width, desc.height)?;
        bump(&self.counters.swapchains_built);
        let image_count = desc.image_count.max(2);
        debug!(
            "Headless swapchain created: {}x{}, {} images",
            desc.width, desc.height, image_count
        );
        Ok(HeadlessSwapchain {
            width: desc.width,
            height: desc.height,
            image_count,
            current: 0,
            generation: 0,
        })
    }

    fn swapchain_images(&self, swapchain: &HeadlessSwapchain) -> Vec<HeadlessImage> {
        (0..swapchain.image_count)
            .map(|index| HeadlessImage {
                index,
                generation: swapchain.generation,
            })
            .collect()
    }

    fn swapchain_extent(&self, swapchain: &HeadlessSwapchain) -> (u32, u32) {
        (swapchain.width, swapchain.height)
    }

    fn current_image_index(&self, swapchain: &HeadlessSwapchain) -> u32 {
        swapchain.current
    }

    fn present(
        &self,
        _queue: &HeadlessQueue,
        swapchain: &mut HeadlessSwapchain,
        sync_interval: u32,
        _flags: PresentFlags,
    ) -> RhiResult<()> {
        if self.surface_invalid.swap(false, Ordering::SeqCst) {
            return Err(RhiError::SurfaceOutOfDate);
        }
        trace!(
            "Headless present: image {} (sync interval {})",
            swapchain.current, sync_interval
        );
        let mut log = self
            .presented
            .lock()
            .map_err(|_| RhiError::LockPoisoned("headless present log"))?;
        push_bounded(&mut log, swapchain.current);
        drop(log);
        bump(&self.counters.presents);
        swapchain.current = (swapchain.current + 1) % swapchain.image_count;
        Ok(())
    }

    fn resize_swapchain(
        &self,
        _queue: &HeadlessQueue,
        swapchain: &mut HeadlessSwapchain,
        width: u32,
        height: u32,
    ) -> RhiResult<()> {
        check_extent(width, height)?;
        if self.fail_resize.swap(false, Ordering::SeqCst) {
            return Err(RhiError::SurfaceOutOfDate);
        }
        bump(&self.counters.swapchains_built);
        swapchain.width = width;
        swapchain.height = height;
        swapchain.current = 0;
        swapchain.generation += 1;
        debug!("Headless swapchain resized: {}x{}", width, height);
        Ok(())
    }

    fn create_render_target_view(&self, image: &HeadlessImage) -> RhiResult<HeadlessView> {
        Ok(self.new_view(ViewKind::RenderTarget, Some(image.index)))
    }

    fn create_depth_buffer(&self, width: u32, height: u32) -> RhiResult<HeadlessDepthBuffer> {
        check_extent(width, height)?;
        Ok(HeadlessDepthBuffer { width, height })
    }

    fn create_depth_stencil_view(&self, _depth: &HeadlessDepthBuffer) -> RhiResult<HeadlessView> {
        Ok(self.new_view(ViewKind::DepthStencil, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_buffer(gpu: &HeadlessGpu) -> (HeadlessAllocator, HeadlessCommandBuffer) {
        let allocator = gpu.create_command_allocator().unwrap();
        let mut cmd = gpu.create_command_buffer(&allocator).unwrap();
        gpu.reopen_command_buffer(&mut cmd, &allocator).unwrap();
        (allocator, cmd)
    }

    #[test]
    fn instant_gpu_completes_on_signal() {
        let gpu = HeadlessGpu::new();
        let queue = gpu.create_queue().unwrap();
        let fence = gpu.create_fence(0).unwrap();

        gpu.signal(&queue, &fence, 1).unwrap();
        assert_eq!(gpu.completed_value(&fence).unwrap(), 1);

        gpu.wait_for_value(&fence, 1).unwrap();
        assert_eq!(gpu.stats().blocking_waits, 0);
    }

    #[test]
    fn lagging_gpu_trails_by_latency() {
        let gpu = HeadlessGpu::with_gpu_latency(2);
        let queue = gpu.create_queue().unwrap();
        let fence = gpu.create_fence(0).unwrap();

        for value in 1..=5 {
            gpu.signal(&queue, &fence, value).unwrap();
        }
        assert_eq!(fence.signaled_value(), 5);
        assert_eq!(fence.completed_value(), 3);

        gpu.wait_for_value(&fence, 5).unwrap();
        assert_eq!(fence.completed_value(), 5);
        assert_eq!(gpu.stats().blocking_waits, 1);
    }

    #[test]
    fn waiting_for_unsignaled_value_fails() {
        let gpu = HeadlessGpu::new();
        let fence = gpu.create_fence(0).unwrap();
        assert!(matches!(
            gpu.wait_for_value(&fence, 1),
            Err(RhiError::InvalidArgument(_))
        ));
    }

    #[test]
    fn submit_requires_closed_buffer() {
        let gpu = HeadlessGpu::new();
        let queue = gpu.create_queue().unwrap();
        let (_allocator, mut cmd) = open_buffer(&gpu);

        assert!(gpu.submit(&queue, &cmd).is_err());

        cmd.set_scissor(&ScissorRect::full(4, 4));
        gpu.close_command_buffer(&mut cmd).unwrap();
        gpu.submit(&queue, &cmd).unwrap();

        let submitted = gpu.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(
            submitted[0].commands,
            vec![RecordedCommand::SetScissor(ScissorRect::full(4, 4))]
        );
    }

    #[test]
    fn closed_buffer_ignores_commands() {
        let gpu = HeadlessGpu::new();
        let allocator = gpu.create_command_allocator().unwrap();
        let mut cmd = gpu.create_command_buffer(&allocator).unwrap();

        cmd.set_viewport(&Viewport::full(4, 4));
        assert!(cmd.commands().is_empty());
    }

    #[test]
    fn reopen_while_recording_fails() {
        let gpu = HeadlessGpu::new();
        let (allocator, mut cmd) = open_buffer(&gpu);
        assert!(gpu.reopen_command_buffer(&mut cmd, &allocator).is_err());
    }

    #[test]
    fn present_rotates_images_and_reports_invalid_surface() {
        let gpu = HeadlessGpu::new();
        let queue = gpu.create_queue().unwrap();
        let desc = SwapchainDesc {
            width: 64,
            height: 64,
            image_count: 3,
            vsync: true,
        };
        let mut chain = gpu.create_swapchain(&queue, &(), &desc).unwrap();

        for expected in [0, 1, 2, 0] {
            assert_eq!(gpu.current_image_index(&chain), expected);
            gpu.present(&queue, &mut chain, 1, PresentFlags::default())
                .unwrap();
        }

        gpu.invalidate_surfaces();
        let result = gpu.present(&queue, &mut chain, 1, PresentFlags::default());
        assert!(matches!(result, Err(RhiError::SurfaceOutOfDate)));
        assert_eq!(gpu.current_image_index(&chain), 1);

        // Only the next present fails.
        gpu.present(&queue, &mut chain, 1, PresentFlags::default())
            .unwrap();
        assert_eq!(gpu.presented_images(), vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn logs_keep_only_recent_entries() {
        let gpu = HeadlessGpu::new();
        let queue = gpu.create_queue().unwrap();
        let (allocator, mut cmd) = open_buffer(&gpu);
        gpu.close_command_buffer(&mut cmd).unwrap();

        for _ in 0..LOG_CAPACITY + 10 {
            gpu.submit(&queue, &cmd).unwrap();
        }
        gpu.reopen_command_buffer(&mut cmd, &allocator).unwrap();

        assert_eq!(gpu.submitted().len(), LOG_CAPACITY);
        assert_eq!(gpu.stats().submissions, (LOG_CAPACITY + 10) as u64);
    }

    #[test]
    fn injected_failures_fire_once() {
        let gpu = HeadlessGpu::new();
        let queue = gpu.create_queue().unwrap();
        let fence = gpu.create_fence(0).unwrap();

        gpu.fail_next_signal();
        assert!(gpu.signal(&queue, &fence, 1).is_err());
        assert_eq!(fence.signaled_value(), 0);
        gpu.signal(&queue, &fence, 1).unwrap();

        let desc = SwapchainDesc {
            width: 8,
            height: 8,
            image_count: 2,
            vsync: true,
        };
        let mut chain = gpu.create_swapchain(&queue, &(), &desc).unwrap();
        gpu.fail_next_resize();
        assert!(matches!(
            gpu.resize_swapchain(&queue, &mut chain, 16, 16),
            Err(RhiError::SurfaceOutOfDate)
        ));
        assert_eq!(gpu.swapchain_extent(&chain), (8, 8));
        gpu.resize_swapchain(&queue, &mut chain, 16, 16).unwrap();
    }

    #[test]
    fn image_count_never_below_two() {
        let gpu = HeadlessGpu::new();
        let queue = gpu.create_queue().unwrap();
        let desc = SwapchainDesc {
            width: 8,
            height: 8,
            image_count: 1,
            vsync: false,
        };
        let chain = gpu.create_swapchain(&queue, &(), &desc).unwrap();
        assert_eq!(gpu.swapchain_images(&chain).len(), 2);
    }

    #[test]
    fn views_count_their_destruction() {
        let gpu = HeadlessGpu::new();
        let image = HeadlessImage {
            index: 0,
            generation: 0,
        };
        let depth = gpu.create_depth_buffer(8, 8).unwrap();
        {
            let _rtv = gpu.create_render_target_view(&image).unwrap();
            let _dsv = gpu.create_depth_stencil_view(&depth).unwrap();
            let stats = gpu.stats();
            assert_eq!(stats.live_render_target_views(), 1);
            assert_eq!(stats.live_depth_views(), 1);
        }
        let stats = gpu.stats();
        assert_eq!(stats.render_target_views_destroyed, 1);
        assert_eq!(stats.depth_views_destroyed, 1);
    }

    #[test]
    fn resize_bumps_generation() {
        let gpu = HeadlessGpu::new();
        let queue = gpu.create_queue().unwrap();
        let desc = SwapchainDesc {
            width: 8,
            height: 8,
            image_count: 2,
            vsync: true,
        };
        let mut chain = gpu.create_swapchain(&queue, &(), &desc).unwrap();
        gpu.resize_swapchain(&queue, &mut chain, 16, 12).unwrap();

        assert_eq!(chain.generation(), 1);
        assert_eq!(gpu.swapchain_extent(&chain), (16, 12));
        assert!(gpu.resize_swapchain(&queue, &mut chain, 0, 12).is_err());
    }
}
