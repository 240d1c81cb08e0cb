//! Frame-level error classification.

use cadence_rhi::RhiError;
use thiserror::Error;

/// Errors surfaced by the frame-submission core.
///
/// Setup and device failures are fatal. Missing-dependency errors are
/// programmer errors that abandon the current frame. Transient errors
/// abandon the current frame only; the next frame is attempted normally.
#[derive(Error, Debug)]
pub enum FrameError {
    /// An object could not be created during startup
    #[error("Setup failed ({stage}): {source}")]
    Setup {
        stage: &'static str,
        #[source]
        source: RhiError,
    },

    /// Window or surface plumbing failed
    #[error(transparent)]
    Platform(#[from] cadence_core::Error),

    /// An operation ran before the state it requires was reached
    #[error("Missing dependency: {0}")]
    MissingDependency(&'static str),

    /// `begin_frame` was called while a frame is still open
    #[error("A frame is already in progress")]
    FrameInProgress,

    /// The surface has zero size; frames are skipped until it grows
    #[error("Surface is minimized, frame skipped")]
    Suspended,

    /// Submission or presentation failed mid-frame
    #[error("Frame abandoned: {0}")]
    Transient(#[source] RhiError),

    /// The device can no longer be used
    #[error("Device failure: {0}")]
    Device(#[source] RhiError),

    /// The presentation engine returned an image the chain does not have
    #[error("Presentable image {0} is out of range")]
    ImageIndex(u32),
}

impl FrameError {
    /// Whether the engine must shut down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Setup { .. } | Self::Platform(_) | Self::Device(_))
    }

    /// Wraps an RHI error raised while building `stage`.
    pub(crate) fn setup(stage: &'static str) -> impl FnOnce(RhiError) -> Self {
        move |source| Self::Setup { stage, source }
    }
}

impl From<RhiError> for FrameError {
    fn from(error: RhiError) -> Self {
        match error {
            RhiError::MissingDependency(what) => Self::MissingDependency(what),
            e if e.is_device_lost() => Self::Device(e),
            other => Self::Transient(other),
        }
    }
}

/// Result type alias for frame operations.
pub type FrameResult<T> = std::result::Result<T, FrameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rhi_errors_are_classified() {
        assert!(matches!(
            FrameError::from(RhiError::SurfaceOutOfDate),
            FrameError::Transient(RhiError::SurfaceOutOfDate)
        ));
        assert!(matches!(
            FrameError::from(RhiError::DeviceLost),
            FrameError::Device(RhiError::DeviceLost)
        ));
        assert!(matches!(
            FrameError::from(RhiError::MissingDependency("x")),
            FrameError::MissingDependency("x")
        ));
    }

    #[test]
    fn test_fatality() {
        assert!(FrameError::Device(RhiError::DeviceLost).is_fatal());
        assert!(FrameError::setup("device")(RhiError::NoSuitableGpu).is_fatal());
        assert!(!FrameError::Transient(RhiError::SurfaceOutOfDate).is_fatal());
        assert!(!FrameError::MissingDependency("cmd").is_fatal());
        assert!(!FrameError::Suspended.is_fatal());
    }

    #[test]
    fn test_setup_message_names_stage() {
        let err = FrameError::setup("adapter")(RhiError::NoSuitableGpu);
        assert_eq!(err.to_string(), "Setup failed (adapter): No suitable GPU found");
    }
}
