//! Platform layer for the cadence engine.
//!
//! This crate provides:
//! - Window management via winit, including minimized (zero-size) tracking
//! - Raw window handles and Vulkan surface creation

mod window;

pub use window::{Surface, Window, required_extensions};

// Re-export winit types that users might need
pub use winit::event::{Event, WindowEvent};
pub use winit::event_loop::EventLoop;
