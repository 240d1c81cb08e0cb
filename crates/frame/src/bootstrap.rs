//! Vulkan device/adapter bootstrap.
//!
//! Builds, in order: the instance (with the window's surface extensions),
//! the window surface, the adapter, the logical device and the
//! [`VulkanGpu`] object factory. Every failure is a fatal
//! [`FrameError::Setup`] naming the stage.
//!
//! The bootstrap must outlive every object created through its GPU, and
//! the surface is destroyed before the instance.

use std::sync::Arc;

use cadence_core::EngineConfig;
use cadence_platform::{Surface, Window};
use cadence_rhi::device::{Device, VulkanGpu};
use cadence_rhi::instance::Instance;
use cadence_rhi::physical_device::{PhysicalDeviceInfo, select_physical_device};
use cadence_rhi::vk;
use tracing::info;

use crate::error::{FrameError, FrameResult};

pub struct VulkanBootstrap {
    // The surface goes before the GPU, which holds the instance.
    surface: Surface,
    gpu: Arc<VulkanGpu>,
    adapter: PhysicalDeviceInfo,
}

impl VulkanBootstrap {
    pub fn new(window: &Window, config: &EngineConfig) -> FrameResult<Self> {
        let extensions = window.required_extensions()?;
        let instance = Arc::new(
            Instance::new(&config.title, config.enable_validation, &extensions)
                .map_err(FrameError::setup("instance"))?,
        );

        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let adapter = select_physical_device(instance.handle(), surface.handle(), surface.loader())
            .map_err(FrameError::setup("adapter"))?;
        let (major, minor, patch) = adapter.api_version();
        info!(
            "Adapter: {} ({}, Vulkan {}.{}.{}, {} MiB device-local)",
            adapter.device_name(),
            adapter.device_type_name(),
            major,
            minor,
            patch,
            adapter.device_local_memory() / (1024 * 1024)
        );

        let device = Device::new(&instance, &adapter).map_err(FrameError::setup("device"))?;
        let gpu = Arc::new(VulkanGpu::new(instance, device).map_err(FrameError::setup("device"))?);

        Ok(Self {
            surface,
            gpu,
            adapter,
        })
    }

    /// The object factory every frame-core component is built from.
    #[inline]
    pub fn gpu(&self) -> &Arc<VulkanGpu> {
        &self.gpu
    }

    /// The window surface swapchains present to.
    #[inline]
    pub fn surface_target(&self) -> vk::SurfaceKHR {
        self.surface.handle()
    }

    #[inline]
    pub fn adapter(&self) -> &PhysicalDeviceInfo {
        &self.adapter
    }
}
