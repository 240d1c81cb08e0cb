//! Error types shared by the engine's outer layers.

use thiserror::Error;

/// Error type for configuration, windowing and other non-GPU failures.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or malformed engine configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// Vulkan surface creation errors raised outside the RHI
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using the core Error type.
pub type Result<T> = std::result::Result<T, Error>;
