//! Core utilities shared by every cadence crate.
//!
//! This crate provides foundational types used across the engine:
//! - Error types and result aliases
//! - Logging initialization
//! - Engine configuration (defaults, validation, environment overlay)
//! - Frame timing

mod config;
mod error;
mod logging;
mod timer;

pub use config::{DEFAULT_FRAME_SLOTS, DEFAULT_IMAGE_COUNT, EngineConfig};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::FrameTimer;
