//! GPU abstraction layer (Render Hardware Interface).
//!
//! This crate defines the backend seam the frame-submission core is written
//! against and provides two implementations:
//! - Vulkan, through the `ash` crate: instance, device and queue creation,
//!   swapchain management, command recording, timeline-semaphore fences
//! - Headless: a CPU-side model of the same objects with a configurable
//!   GPU lag, used for tests and windowless runs

mod error;

pub mod backend;
pub mod command;
pub mod depth_buffer;
pub mod device;
pub mod headless;
pub mod instance;
pub mod physical_device;
pub mod swapchain;
pub mod sync;

pub use backend::{
    ClearColor, CommandRecorder, GpuDevice, PresentFlags, ResourceState, ScissorRect,
    SwapchainDesc, Viewport,
};
pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
