//! RHI-specific error types.

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Surface creation or query error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// The presentation surface no longer matches the swapchain. Recoverable
    /// by rebuilding the chain.
    #[error("Surface is out of date")]
    SurfaceOutOfDate,

    /// The logical device was lost
    #[error("Device lost")]
    DeviceLost,

    /// An object was used before the state it requires was reached
    #[error("Missing dependency: {0}")]
    MissingDependency(&'static str),

    /// Invalid argument passed to an RHI call
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A lock protecting shared GPU state was poisoned
    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl RhiError {
    /// Whether the failure only invalidates the current frame.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SurfaceOutOfDate)
    }

    /// Whether the device can no longer be used.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost)
    }
}

impl From<vk::Result> for RhiError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::SurfaceOutOfDate,
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            other => Self::VulkanError(other),
        }
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_maps_to_transient() {
        let err = RhiError::from(vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert!(matches!(err, RhiError::SurfaceOutOfDate));
        assert!(err.is_transient());
    }

    #[test]
    fn device_lost_is_not_transient() {
        let err = RhiError::from(vk::Result::ERROR_DEVICE_LOST);
        assert!(err.is_device_lost());
        assert!(!err.is_transient());
    }

    #[test]
    fn other_codes_stay_vulkan_errors() {
        let err = RhiError::from(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert!(matches!(
            err,
            RhiError::VulkanError(vk::Result::ERROR_OUT_OF_HOST_MEMORY)
        ));
    }
}
