//! The cadence frame-submission core.
//!
//! Turns per-frame drawing work into ordered, synchronized GPU submissions
//! while the CPU runs up to N - 1 frames ahead of the GPU. Components,
//! leaf-first:
//!
//! - [`bootstrap`] - adapter selection, logical device and object factory
//! - [`submission`] - queue, per-frame slots, command buffer and fence
//! - [`recorder`] - the open frame's command buffer with its state cache
//! - [`surface`] - the chain of presentable images
//! - [`targets`] - per-image views and tracked image states
//! - [`orchestrator`] - the per-frame control loop
//!
//! Everything except the bootstrap is generic over
//! [`GpuDevice`](cadence_rhi::GpuDevice), so the core runs unchanged on the
//! Vulkan and headless backends.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use cadence_frame::{FrameConfig, FrameOrchestrator};
//! use cadence_rhi::headless::HeadlessGpu;
//!
//! let gpu = Arc::new(HeadlessGpu::new());
//! let mut frames = FrameOrchestrator::new(gpu, &(), &FrameConfig::default())?;
//! for _ in 0..3 {
//!     let _recorder = frames.begin_frame()?;
//!     // record scene commands into `_recorder`
//!     frames.end_frame()?;
//! }
//! frames.shutdown()?;
//! # Ok::<(), cadence_frame::FrameError>(())
//! ```

mod error;

pub mod bootstrap;
pub mod orchestrator;
pub mod recorder;
pub mod submission;
pub mod surface;
pub mod targets;

pub use bootstrap::VulkanBootstrap;
pub use error::{FrameError, FrameResult};
pub use orchestrator::{FrameConfig, FrameOrchestrator, FrameState};
pub use recorder::FrameRecorder;
pub use submission::{SubmissionContext, SubmissionStats};
pub use surface::PresentationSurface;
pub use targets::FrameTargets;
