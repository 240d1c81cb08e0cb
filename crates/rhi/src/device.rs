//! Vulkan logical device, submission queue and the Vulkan [`GpuDevice`].
//!
//! # Overview
//!
//! - [`Device`] owns the `VkDevice`, the gpu-allocator instance and the one
//!   queue the frame core submits to.
//! - [`VulkanQueue`] wraps that queue and carries the semaphore plumbing
//!   between submissions and presentation.
//! - [`VulkanGpu`] implements [`GpuDevice`] on top of both.
//!
//! # Example
//!
//! ```no_run
//! use cadence_rhi::instance::Instance;
//! use cadence_rhi::physical_device::select_physical_device;
//! use cadence_rhi::device::Device;
//! use ash::vk;
//!
//! let instance = Instance::new("demo", false, &[]).expect("Failed to create instance");
//! let surface: vk::SurfaceKHR = vk::SurfaceKHR::null(); // placeholder
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//!
//! let physical_device_info = select_physical_device(instance.handle(), surface, &surface_loader)
//!     .expect("No suitable GPU found");
//!
//! let device = Device::new(&instance, &physical_device_info)
//!     .expect("Failed to create logical device");
//! let queue = device.queue();
//! ```

use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, info, trace};

use crate::backend::{GpuDevice, PresentFlags, SwapchainDesc};
use crate::command::{CommandBuffer, CommandPool};
use crate::depth_buffer::{DepthBuffer, DepthStencilView, select_depth_format};
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::PhysicalDeviceInfo;
use crate::swapchain::{RenderTargetView, Swapchain, SwapchainImage};
use crate::sync::TimelineSemaphore;

/// Required device extensions.
const DEVICE_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

/// Vulkan logical device wrapper.
///
/// # Thread Safety
///
/// Shared across threads through `Arc`. The allocator sits behind a
/// `Mutex`; queue access goes through [`VulkanQueue`], which serializes
/// submissions.
pub struct Device {
    /// Vulkan logical device handle.
    device: ash::Device,
    /// Physical device handle.
    physical_device: vk::PhysicalDevice,
    /// GPU memory allocator. Dropped explicitly before the device.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    /// The graphics + present queue.
    queue: vk::Queue,
    queue_family: u32,
}

impl Device {
    /// Creates the logical device with one queue on the submission family.
    ///
    /// Enables timeline semaphores (1.2) and dynamic rendering (1.3), and
    /// initializes gpu-allocator.
    ///
    /// # Errors
    ///
    /// Returns an error if the device has no unified graphics/present
    /// family, or device or allocator creation fails.
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
    ) -> Result<Arc<Self>, RhiError> {
        let queue_family = physical_device_info.submission_family()?;
        let queue_priorities = [1.0f32];

        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family)
            .queue_priorities(&queue_priorities)];

        let mut features_1_2 =
            vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);
        let mut features_1_3 =
            vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true);

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut features_1_2)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };

        info!(
            "Logical device created on {} ({} extension(s))",
            physical_device_info.device_name(),
            DEVICE_EXTENSIONS.len()
        );

        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        debug!("Submission queue retrieved from family {}", queue_family);

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device_info.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        info!("GPU memory allocator initialized");

        Ok(Arc::new(Self {
            device,
            physical_device: physical_device_info.device,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            queue,
            queue_family,
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Returns the submission queue handle.
    #[inline]
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    /// Returns the family index of the submission queue.
    #[inline]
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Locks the GPU memory allocator.
    pub fn allocator(&self) -> RhiResult<MutexGuard<'_, Allocator>> {
        self.allocator
            .lock()
            .map_err(|_| RhiError::LockPoisoned("gpu allocator"))
    }

    /// Blocks until all outstanding work on the device has completed.
    pub fn wait_idle(&self) -> Result<(), RhiError> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("Failed to wait for device idle during drop: {:?}", e);
            }

            // Every allocation must be freed by now; the allocator goes
            // before the device it allocates from.
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: ash::Device is Send+Sync, the remaining fields are plain handles
// and the allocator is behind a Mutex.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[derive(Debug, Default)]
struct QueueSync {
    /// Timeline point the next command submission waits on (image acquired).
    frame_wait: Option<(vk::Semaphore, u64)>,
    /// Most recent timeline point signaled on this queue.
    last_signal: Option<(vk::Semaphore, u64)>,
}

/// The submission queue.
///
/// Besides plain submission it threads two dependencies through the queue:
/// command submissions wait for the current swapchain image to be acquired,
/// and presentation waits for the last timeline signal.
pub struct VulkanQueue {
    device: Arc<Device>,
    sync: Mutex<QueueSync>,
}

impl VulkanQueue {
    pub fn new(device: Arc<Device>) -> Self {
        Self {
            device,
            sync: Mutex::new(QueueSync::default()),
        }
    }

    /// Returns the Vulkan queue handle.
    #[inline]
    pub fn handle(&self) -> vk::Queue {
        self.device.queue()
    }

    fn lock(&self) -> RhiResult<MutexGuard<'_, QueueSync>> {
        self.sync
            .lock()
            .map_err(|_| RhiError::LockPoisoned("queue sync"))
    }

    fn submit_batch(
        &self,
        command_buffers: &[vk::CommandBuffer],
        wait: Option<(vk::Semaphore, u64)>,
        signal: Option<(vk::Semaphore, u64)>,
    ) -> RhiResult<()> {
        let wait_semaphores: Vec<vk::Semaphore> = wait.iter().map(|(s, _)| *s).collect();
        let wait_values: Vec<u64> = wait.iter().map(|(_, v)| *v).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = wait
            .iter()
            .map(|_| vk::PipelineStageFlags::ALL_COMMANDS)
            .collect();
        let signal_semaphores: Vec<vk::Semaphore> = signal.iter().map(|(s, _)| *s).collect();
        let signal_values: Vec<u64> = signal.iter().map(|(_, v)| *v).collect();

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        unsafe {
            self.device
                .handle()
                .queue_submit(self.handle(), &[submit_info], vk::Fence::null())?;
        }
        Ok(())
    }

    /// Submits a recorded command buffer, waiting on the acquired image.
    pub fn submit_commands(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        let frame_wait = self.lock()?.frame_wait;
        self.submit_batch(&[command_buffer], frame_wait, None)
    }

    /// Signals `semaphore` to `value` after all previously submitted work.
    pub fn signal_timeline(&self, semaphore: vk::Semaphore, value: u64) -> RhiResult<()> {
        let mut sync = self.lock()?;
        self.submit_batch(&[], None, Some((semaphore, value)))?;
        sync.last_signal = Some((semaphore, value));
        Ok(())
    }

    /// Turns a binary acquire semaphore into timeline point `value` of
    /// `image_ready` and makes later submissions wait on it.
    pub(crate) fn bridge_acquire(
        &self,
        acquired: vk::Semaphore,
        image_ready: vk::Semaphore,
        value: u64,
    ) -> RhiResult<()> {
        let mut sync = self.lock()?;
        self.submit_batch(&[], Some((acquired, 0)), Some((image_ready, value)))?;
        sync.frame_wait = Some((image_ready, value));
        Ok(())
    }

    /// Signals the binary `present_ready` semaphore once the last timeline
    /// signal on this queue has been reached.
    pub(crate) fn bridge_to_present(&self, present_ready: vk::Semaphore) -> RhiResult<()> {
        let last_signal = self.lock()?.last_signal;
        self.submit_batch(&[], last_signal, Some((present_ready, 0)))
    }
}

/// The Vulkan backend.
///
/// Holds the device and the instance the surfaces were created from.
/// Objects it creates keep the device alive through their own `Arc`.
pub struct VulkanGpu {
    device: Arc<Device>,
    instance: Arc<Instance>,
    depth_format: vk::Format,
}

impl VulkanGpu {
    pub fn new(instance: Arc<Instance>, device: Arc<Device>) -> RhiResult<Self> {
        let depth_format = select_depth_format(instance.handle(), device.physical_device())?;
        debug!("Depth format: {:?}", depth_format);
        Ok(Self {
            device,
            instance,
            depth_format,
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    #[inline]
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }
}

impl GpuDevice for VulkanGpu {
    type Queue = VulkanQueue;
    type Fence = TimelineSemaphore;
    type CommandAllocator = CommandPool;
    type CommandBuffer = CommandBuffer;
    type Swapchain = Swapchain;
    type SurfaceTarget = vk::SurfaceKHR;
    type Image = SwapchainImage;
    type RenderTargetView = RenderTargetView;
    type DepthBuffer = DepthBuffer;
    type DepthStencilView = DepthStencilView;

    fn name(&self) -> &'static str {
        "vulkan"
    }

    fn create_queue(&self) -> RhiResult<VulkanQueue> {
        Ok(VulkanQueue::new(self.device.clone()))
    }

    fn create_fence(&self, initial_value: u64) -> RhiResult<TimelineSemaphore> {
        TimelineSemaphore::new(self.device.clone(), initial_value)
    }

    fn completed_value(&self, fence: &TimelineSemaphore) -> RhiResult<u64> {
        fence.completed_value()
    }

    fn wait_for_value(&self, fence: &TimelineSemaphore, value: u64) -> RhiResult<()> {
        fence.wait(value, u64::MAX)
    }

    fn signal(&self, queue: &VulkanQueue, fence: &TimelineSemaphore, value: u64) -> RhiResult<()> {
        queue.signal_timeline(fence.handle(), value)
    }

    fn create_command_allocator(&self) -> RhiResult<CommandPool> {
        CommandPool::new(self.device.clone(), self.device.queue_family())
    }

    fn reset_command_allocator(&self, allocator: &mut CommandPool) -> RhiResult<()> {
        allocator.reset()
    }

    fn create_command_buffer(&self, allocator: &CommandPool) -> RhiResult<CommandBuffer> {
        Ok(CommandBuffer::new(self.device.clone(), allocator))
    }

    fn reopen_command_buffer(
        &self,
        cmd: &mut CommandBuffer,
        allocator: &CommandPool,
    ) -> RhiResult<()> {
        cmd.begin(allocator)
    }

    fn close_command_buffer(&self, cmd: &mut CommandBuffer) -> RhiResult<()> {
        cmd.end()
    }

    fn submit(&self, queue: &VulkanQueue, cmd: &CommandBuffer) -> RhiResult<()> {
        use crate::backend::CommandRecorder;
        if cmd.is_recording() {
            return Err(RhiError::MissingDependency(
                "command buffer must be closed before submission",
            ));
        }
        queue.submit_commands(cmd.handle())
    }

    fn create_swapchain(
        &self,
        queue: &VulkanQueue,
        target: &vk::SurfaceKHR,
        desc: &SwapchainDesc,
    ) -> RhiResult<Swapchain> {
        Swapchain::new(&self.instance, self.device.clone(), queue, *target, desc)
    }

    fn swapchain_images(&self, swapchain: &Swapchain) -> Vec<SwapchainImage> {
        swapchain.images()
    }

    fn swapchain_extent(&self, swapchain: &Swapchain) -> (u32, u32) {
        let extent = swapchain.extent();
        (extent.width, extent.height)
    }

    fn current_image_index(&self, swapchain: &Swapchain) -> u32 {
        swapchain.current_index()
    }

    fn present(
        &self,
        queue: &VulkanQueue,
        swapchain: &mut Swapchain,
        sync_interval: u32,
        flags: PresentFlags,
    ) -> RhiResult<()> {
        // The present mode is fixed when the chain is built.
        trace!(
            "Present (sync interval {}, tearing {})",
            sync_interval, flags.allow_tearing
        );
        swapchain.present(queue)
    }

    fn resize_swapchain(
        &self,
        queue: &VulkanQueue,
        swapchain: &mut Swapchain,
        width: u32,
        height: u32,
    ) -> RhiResult<()> {
        swapchain.resize(queue, width, height)
    }

    fn create_render_target_view(&self, image: &SwapchainImage) -> RhiResult<RenderTargetView> {
        RenderTargetView::new(self.device.clone(), image)
    }

    fn create_depth_buffer(&self, width: u32, height: u32) -> RhiResult<DepthBuffer> {
        DepthBuffer::new(self.device.clone(), width, height, self.depth_format)
    }

    fn create_depth_stencil_view(&self, depth: &DepthBuffer) -> RhiResult<DepthStencilView> {
        DepthStencilView::new(self.device.clone(), depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_extensions_defined() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
        assert_send_sync::<VulkanQueue>();
    }

    #[test]
    fn test_queue_sync_starts_empty() {
        let sync = QueueSync::default();
        assert!(sync.frame_wait.is_none());
        assert!(sync.last_signal.is_none());
    }
}
