//! Swapchain management.
//!
//! Handles VkSwapchainKHR creation, image acquisition, presentation and
//! rebuilds, plus the color views the frame core renders into.
//!
//! # Synchronization
//!
//! The chain always holds one acquired image, the one the next frame
//! renders into. Acquisition signals a binary semaphore taken from a small
//! ring; an empty queue submission converts it into a point on the
//! `image_ready` timeline, which every later command submission waits on.
//! Presentation waits on a per-image binary semaphore signaled after the
//! queue's last timeline signal. The next image is acquired right after
//! presenting.
//!
//! # Example
//!
//! ```no_run
//! use cadence_rhi::backend::{GpuDevice, SwapchainDesc};
//! # fn demo(gpu: &cadence_rhi::device::VulkanGpu, surface: ash::vk::SurfaceKHR) -> cadence_rhi::RhiResult<()> {
//! let queue = gpu.create_queue()?;
//! let desc = SwapchainDesc { width: 800, height: 600, image_count: 3, vsync: true };
//! let mut swapchain = gpu.create_swapchain(&queue, &surface, &desc)?;
//! // ... record and submit work for gpu.current_image_index(&swapchain) ...
//! gpu.present(&queue, &mut swapchain, 1, Default::default())?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info, warn};

use crate::backend::SwapchainDesc;
use crate::device::{Device, VulkanQueue};
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::sync::{Semaphore, TimelineSemaphore};

/// Swapchain surface support details.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    /// Surface capabilities (min/max image count, extents, transforms, etc.)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats (format and color space combinations)
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes (FIFO, MAILBOX, IMMEDIATE, etc.)
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support details for a physical device and surface.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> Result<Self, RhiError> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Returns true if at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// A presentable image of the chain.
///
/// The image itself is owned by the swapchain; this is a copyable handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainImage {
    pub handle: vk::Image,
    pub index: u32,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// Color view of a swapchain image, destroyed on drop.
pub struct RenderTargetView {
    device: Arc<Device>,
    view: vk::ImageView,
    image: SwapchainImage,
}

impl RenderTargetView {
    pub fn new(device: Arc<Device>, image: &SwapchainImage) -> RhiResult<Self> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image.handle)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(image.format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        let view = unsafe {
            device
                .handle()
                .create_image_view(&create_info, None)
                .map_err(|e| {
                    RhiError::SwapchainError(format!(
                        "Failed to create view of image {}: {:?}",
                        image.index, e
                    ))
                })?
        };

        Ok(Self {
            device,
            view,
            image: *image,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn image(&self) -> &SwapchainImage {
        &self.image
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent
    }
}

impl Drop for RenderTargetView {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_image_view(self.view, None);
        }
    }
}

struct AcquireSlot {
    semaphore: Semaphore,
    /// `image_ready` value that proves the semaphore was consumed.
    consumed_at: u64,
}

struct ChainParts {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

/// Vulkan swapchain wrapper.
///
/// # Thread Safety
///
/// Not thread-safe. Only the frame-producing thread touches it.
pub struct Swapchain {
    device: Arc<Device>,
    swapchain_loader: ash::khr::swapchain::Device,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    requested_images: u32,
    vsync: bool,
    /// One per image, signaled for the presentation engine.
    present_ready: Vec<Semaphore>,
    acquire_ring: Vec<AcquireSlot>,
    next_acquire: usize,
    image_ready: TimelineSemaphore,
    image_ready_value: u64,
    current: Option<u32>,
}

impl Swapchain {
    /// Creates a swapchain for `surface` and acquires its first image.
    ///
    /// - Preferred format: B8G8R8A8_SRGB with SRGB_NONLINEAR color space
    /// - Present mode: FIFO with vsync, otherwise MAILBOX or IMMEDIATE
    /// - Image usage: COLOR_ATTACHMENT
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        queue: &VulkanQueue,
        surface: vk::SurfaceKHR,
        desc: &SwapchainDesc,
    ) -> RhiResult<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        let parts = create_chain(
            &device,
            &swapchain_loader,
            &surface_loader,
            surface,
            desc,
            vk::SwapchainKHR::null(),
        )?;

        let present_ready = create_semaphores(&device, parts.images.len())?;
        let acquire_ring = create_acquire_ring(&device, parts.images.len() + 1)?;
        let image_ready = TimelineSemaphore::new(device.clone(), 0)?;

        let mut swapchain = Self {
            device,
            swapchain_loader,
            surface_loader,
            surface,
            swapchain: parts.swapchain,
            images: parts.images,
            format: parts.format,
            extent: parts.extent,
            present_mode: parts.present_mode,
            requested_images: desc.image_count,
            vsync: desc.vsync,
            present_ready,
            acquire_ring,
            next_acquire: 0,
            image_ready,
            image_ready_value: 0,
            current: None,
        };
        swapchain.acquire(queue)?;
        Ok(swapchain)
    }

    /// Acquires the next image and chains its readiness into `queue`.
    fn acquire(&mut self, queue: &VulkanQueue) -> RhiResult<()> {
        self.current = None;
        let ring_len = self.acquire_ring.len();
        let slot = &mut self.acquire_ring[self.next_acquire];

        // The ring semaphore may still be waited on by an earlier bridge.
        if slot.consumed_at > 0 {
            self.image_ready.wait(slot.consumed_at, u64::MAX)?;
        }

        let (index, suboptimal) = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                slot.semaphore.handle(),
                vk::Fence::null(),
            )?
        };
        if suboptimal {
            debug!("Swapchain is suboptimal for the surface");
        }

        self.image_ready_value += 1;
        queue.bridge_acquire(
            slot.semaphore.handle(),
            self.image_ready.handle(),
            self.image_ready_value,
        )?;
        slot.consumed_at = self.image_ready_value;

        self.next_acquire = (self.next_acquire + 1) % ring_len;
        self.current = Some(index);
        Ok(())
    }

    /// Presents the current image once all work on `queue` is done, then
    /// acquires the next one.
    ///
    /// Returns [`RhiError::SurfaceOutOfDate`] when the chain no longer
    /// matches the surface.
    pub fn present(&mut self, queue: &VulkanQueue) -> RhiResult<()> {
        let index = self
            .current
            .take()
            .ok_or(RhiError::MissingDependency("no swapchain image acquired"))?;
        let present_ready = self
            .present_ready
            .get(index as usize)
            .ok_or_else(|| RhiError::SwapchainError(format!("image index {index} out of range")))?;

        queue.bridge_to_present(present_ready.handle())?;

        let swapchains = [self.swapchain];
        let image_indices = [index];
        let wait_semaphores = [present_ready.handle()];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let suboptimal = unsafe {
            self.swapchain_loader
                .queue_present(queue.handle(), &present_info)?
        };
        if suboptimal {
            debug!("Presented to a suboptimal swapchain");
        }

        self.acquire(queue)
    }

    /// Rebuilds the chain at a new size and acquires a fresh image.
    ///
    /// Waits for the device to go idle first, so no old image or semaphore
    /// is still in use.
    pub fn resize(&mut self, queue: &VulkanQueue, width: u32, height: u32) -> RhiResult<()> {
        self.device.wait_idle()?;

        info!("Recreating swapchain for new size: {}x{}", width, height);

        let desc = SwapchainDesc {
            width,
            height,
            image_count: self.requested_images,
            vsync: self.vsync,
        };
        let old_swapchain = self.swapchain;
        let parts = create_chain(
            &self.device,
            &self.swapchain_loader,
            &self.surface_loader,
            self.surface,
            &desc,
            old_swapchain,
        )?;

        unsafe {
            self.swapchain_loader.destroy_swapchain(old_swapchain, None);
        }

        self.swapchain = parts.swapchain;
        self.images = parts.images;
        self.format = parts.format;
        self.extent = parts.extent;
        self.present_mode = parts.present_mode;

        // A failed present can leave binary semaphores signaled; start over.
        self.present_ready = create_semaphores(&self.device, self.images.len())?;
        self.acquire_ring = create_acquire_ring(&self.device, self.images.len() + 1)?;
        self.next_acquire = 0;

        self.acquire(queue)
    }

    /// Returns the swapchain handle.
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Returns the swapchain image format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    /// Returns the swapchain extent (resolution).
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Returns the present mode.
    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Returns the number of swapchain images.
    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Index of the acquired image, 0 if acquisition last failed.
    #[inline]
    pub fn current_index(&self) -> u32 {
        self.current.unwrap_or(0)
    }

    /// Returns all swapchain images, in index order.
    pub fn images(&self) -> Vec<SwapchainImage> {
        self.images
            .iter()
            .enumerate()
            .map(|(index, &handle)| SwapchainImage {
                handle,
                index: index as u32,
                format: self.format.format,
                extent: self.extent,
            })
            .collect()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        // Semaphores owned by the chain may still be pending on the queue.
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle before destroying swapchain: {}", e);
        }

        unsafe {
            self.swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }

        info!(
            "Swapchain destroyed (was {}x{}, {} images)",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );
    }
}

fn create_chain(
    device: &Device,
    swapchain_loader: &ash::khr::swapchain::Device,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    desc: &SwapchainDesc,
    old_swapchain: vk::SwapchainKHR,
) -> RhiResult<ChainParts> {
    let support =
        SwapchainSupportDetails::query(device.physical_device(), surface, surface_loader)?;

    if !support.is_adequate() {
        return Err(RhiError::SwapchainError(
            "Inadequate swapchain support (no formats or present modes)".to_string(),
        ));
    }

    let surface_format = choose_surface_format(&support.formats)?;
    let present_mode = choose_present_mode(&support.present_modes, desc.vsync);
    let extent = choose_extent(&support.capabilities, desc.width, desc.height);
    let image_count = determine_image_count(&support.capabilities, desc.image_count);

    info!(
        "Creating swapchain: {}x{}, format {:?}, color space {:?}, present mode {:?}, {} images",
        extent.width,
        extent.height,
        surface_format.format,
        surface_format.color_space,
        present_mode,
        image_count
    );

    let create_info = vk::SwapchainCreateInfoKHR::default()
        .surface(surface)
        .min_image_count(image_count)
        .image_format(surface_format.format)
        .image_color_space(surface_format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        .pre_transform(support.capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(old_swapchain);

    let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None)? };

    let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
        Ok(images) => images,
        Err(e) => {
            unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
            return Err(e.into());
        }
    };
    info!("Swapchain created with {} images", images.len());

    Ok(ChainParts {
        swapchain,
        images,
        format: surface_format,
        extent,
        present_mode,
    })
}

fn create_semaphores(device: &Arc<Device>, count: usize) -> RhiResult<Vec<Semaphore>> {
    (0..count).map(|_| Semaphore::new(device.clone())).collect()
}

fn create_acquire_ring(device: &Arc<Device>, count: usize) -> RhiResult<Vec<AcquireSlot>> {
    (0..count)
        .map(|_| {
            Ok(AcquireSlot {
                semaphore: Semaphore::new(device.clone())?,
                consumed_at: 0,
            })
        })
        .collect()
}

/// Chooses the best surface format from the available formats.
///
/// Prefers B8G8R8A8_SRGB with SRGB_NONLINEAR, then B8G8R8A8_UNORM, then
/// whatever comes first.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> RhiResult<vk::SurfaceFormatKHR> {
    let preferred = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    if let Some(&format) = preferred {
        debug!("Selected preferred surface format: B8G8R8A8_SRGB with SRGB_NONLINEAR");
        return Ok(format);
    }

    let alternative = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    if let Some(&format) = alternative {
        warn!("Using fallback surface format: B8G8R8A8_UNORM with SRGB_NONLINEAR");
        return Ok(format);
    }

    let first = formats
        .first()
        .copied()
        .ok_or_else(|| RhiError::SwapchainError("surface reports no formats".to_string()))?;
    warn!("Using first available surface format: {:?}", first.format);
    Ok(first)
}

/// Chooses the present mode.
///
/// With vsync, FIFO (always available). Without, MAILBOX if available,
/// then IMMEDIATE, then FIFO.
fn choose_present_mode(present_modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if !vsync {
        for mode in [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE] {
            if present_modes.contains(&mode) {
                debug!("Selected {:?} present mode", mode);
                return mode;
            }
        }
    }

    debug!("Selected FIFO present mode (vsync)");
    vk::PresentModeKHR::FIFO
}

/// Chooses the swapchain extent (resolution).
///
/// If the current extent is not set (width/height are u32::MAX),
/// clamps the requested size to the surface's min/max extents.
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        debug!(
            "Using current surface extent: {}x{}",
            capabilities.current_extent.width, capabilities.current_extent.height
        );
        return capabilities.current_extent;
    }

    let extent = vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    };

    debug!(
        "Calculated extent: {}x{} (requested: {}x{})",
        extent.width, extent.height, width, height
    );

    extent
}

/// Determines the swapchain image count.
///
/// Honors the requested count, never below 2 or the surface minimum, and
/// respects the maximum when the surface sets one.
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, requested: u32) -> u32 {
    let preferred = requested.max(2).max(capabilities.min_image_count);

    let image_count = if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    };

    debug!(
        "Image count: {} (requested: {}, min: {}, max: {})",
        image_count,
        requested,
        capabilities.min_image_count,
        if capabilities.max_image_count == 0 {
            "unlimited".to_string()
        } else {
            capabilities.max_image_count.to_string()
        }
    );

    image_count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];

        let selected = choose_surface_format(&formats).unwrap();
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_choose_surface_format_fallback() {
        let formats = vec![vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];

        let selected = choose_surface_format(&formats).unwrap();
        assert_eq!(selected.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_choose_surface_format_empty_is_error() {
        assert!(choose_surface_format(&[]).is_err());
    }

    #[test]
    fn test_vsync_selects_fifo() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_no_vsync_prefers_mailbox_then_immediate() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::MAILBOX);

        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::IMMEDIATE);

        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!((extent.width, extent.height), (1920, 1080));
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 3000, 3000);
        assert_eq!((extent.width, extent.height), (2000, 2000));

        let extent = choose_extent(&capabilities, 50, 50);
        assert_eq!((extent.width, extent.height), (100, 100));

        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn test_determine_image_count() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities, 3), 3);
        assert_eq!(determine_image_count(&capabilities, 1), 2);
        assert_eq!(determine_image_count(&capabilities, 10), 8);

        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 4,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities, 3), 4);
        assert_eq!(determine_image_count(&capabilities, 6), 6);
    }

    #[test]
    fn test_swapchain_support_details_is_adequate() {
        let adequate = SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(adequate.is_adequate());

        let no_modes = SwapchainSupportDetails {
            present_modes: vec![],
            ..adequate
        };
        assert!(!no_modes.is_adequate());
    }
}
