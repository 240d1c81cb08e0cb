use thiserror::Error;

/// Errors raised by the scene layer.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SceneError {
    /// No scene is registered under the name
    #[error("Unknown scene: {0}")]
    UnknownScene(String),

    /// A scene is already registered under the name
    #[error("Scene already registered: {0}")]
    DuplicateScene(String),

    /// A scene failed to initialize
    #[error("Scene '{name}' failed to initialize: {reason}")]
    Init { name: String, reason: String },
}

pub type SceneResult<T> = std::result::Result<T, SceneError>;
