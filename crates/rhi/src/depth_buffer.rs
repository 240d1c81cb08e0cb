//! Depth/stencil buffer management.
//!
//! - [`DepthBuffer`] is a GPU-only depth/stencil image sized to the surface
//! - [`DepthStencilView`] is the view the frame core binds and clears; it is
//!   created separately so the view can be released before the image
//!
//! Memory is managed by gpu-allocator.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cadence_rhi::device::Device;
//! use cadence_rhi::depth_buffer::{DepthBuffer, DepthStencilView, DEFAULT_DEPTH_FORMAT};
//!
//! # fn example(device: Arc<Device>) -> Result<(), cadence_rhi::RhiError> {
//! let depth_buffer = DepthBuffer::new(device.clone(), 1920, 1080, DEFAULT_DEPTH_FORMAT)?;
//! let dsv = DepthStencilView::new(device, &depth_buffer)?;
//! drop(dsv);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Default depth/stencil format (32-bit float depth, 8-bit stencil).
pub const DEFAULT_DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT_S8_UINT;

/// Formats tried in order when the default is not supported.
const DEPTH_FORMAT_CANDIDATES: &[vk::Format] = &[
    DEFAULT_DEPTH_FORMAT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
];

/// Picks the first candidate `supports` accepts.
fn pick_depth_format(
    candidates: &[vk::Format],
    supports: impl Fn(vk::Format) -> bool,
) -> Option<vk::Format> {
    candidates.iter().copied().find(|&format| supports(format))
}

/// Selects a depth/stencil format usable as an optimal-tiling attachment.
pub fn select_depth_format(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> RhiResult<vk::Format> {
    pick_depth_format(DEPTH_FORMAT_CANDIDATES, |format| {
        let properties =
            unsafe { instance.get_physical_device_format_properties(physical_device, format) };
        properties
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
    .ok_or_else(|| RhiError::InvalidArgument("no supported depth/stencil format".to_string()))
}

/// Aspect flags a view of `format` covers.
fn aspect_mask_for(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D16_UNORM_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::DEPTH,
    }
}

/// Depth/stencil image with GPU-only memory.
///
/// # Resource Destruction
///
/// Views must be dropped first. The image is destroyed, then its
/// allocation freed.
pub struct DepthBuffer {
    device: Arc<Device>,
    image: vk::Image,
    allocation: Option<Allocation>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl DepthBuffer {
    /// Creates a depth buffer with the given dimensions and format.
    ///
    /// # Errors
    ///
    /// Returns an error for zero dimensions, or if image creation, memory
    /// allocation or binding fails.
    pub fn new(
        device: Arc<Device>,
        width: u32,
        height: u32,
        format: vk::Format,
    ) -> RhiResult<Self> {
        if width == 0 || height == 0 {
            return Err(RhiError::InvalidArgument(
                "Depth buffer dimensions must be greater than 0".to_string(),
            ));
        }

        let extent = vk::Extent2D { width, height };

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };

        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = device.allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: "depth_buffer",
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RhiError::from)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e);
            }
        };

        // From here on Drop cleans up the image and allocation.
        let buffer = Self {
            device,
            image,
            allocation: Some(allocation),
            format,
            extent,
        };

        if let Some(allocation) = buffer.allocation.as_ref() {
            unsafe {
                buffer.device.handle().bind_image_memory(
                    image,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
        }

        info!("Created depth buffer: {}x{} ({:?})", width, height, format);

        Ok(buffer)
    }

    /// Returns the Vulkan image handle.
    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    /// Returns the depth format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the depth buffer extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for DepthBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_image(self.image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free depth buffer allocation: {:?}", e);
                    }
                }
                Err(e) => error!("Leaking depth buffer allocation: {}", e),
            }
        }

        debug!(
            "Destroyed depth buffer: {}x{}",
            self.extent.width, self.extent.height
        );
    }
}

/// Depth/stencil view of a [`DepthBuffer`], destroyed on drop.
///
/// Covers both aspects when the format has stencil.
pub struct DepthStencilView {
    device: Arc<Device>,
    view: vk::ImageView,
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    extent: vk::Extent2D,
}

impl DepthStencilView {
    pub fn new(device: Arc<Device>, depth: &DepthBuffer) -> RhiResult<Self> {
        let aspect_mask = aspect_mask_for(depth.format());
        let view_info = vk::ImageViewCreateInfo::default()
            .image(depth.image())
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(depth.format())
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect_mask)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        let view = unsafe { device.handle().create_image_view(&view_info, None)? };

        Ok(Self {
            device,
            view,
            image: depth.image(),
            aspect_mask,
            extent: depth.extent(),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn aspect_mask(&self) -> vk::ImageAspectFlags {
        self.aspect_mask
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for DepthStencilView {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_image_view(self.view, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_depth_format_has_stencil() {
        assert_eq!(DEFAULT_DEPTH_FORMAT, vk::Format::D32_SFLOAT_S8_UINT);
        assert_eq!(
            aspect_mask_for(DEFAULT_DEPTH_FORMAT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn test_depth_only_aspect() {
        assert_eq!(
            aspect_mask_for(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
    }

    #[test]
    fn test_pick_depth_format_prefers_first_supported() {
        let picked = pick_depth_format(DEPTH_FORMAT_CANDIDATES, |f| {
            f != vk::Format::D32_SFLOAT_S8_UINT
        });
        assert_eq!(picked, Some(vk::Format::D24_UNORM_S8_UINT));

        assert_eq!(pick_depth_format(DEPTH_FORMAT_CANDIDATES, |_| false), None);
    }
}
