//! Command-line options.

use cadence_core::{EngineConfig, Result};
use clap::Parser;

/// Cadence frame-submission demo.
///
/// Every option falls back to its `CADENCE_*` environment variable, then to
/// the built-in default.
#[derive(Parser, Debug)]
#[command(name = "cadence", version, about)]
pub struct Cli {
    /// Window title
    #[arg(long)]
    pub title: Option<String>,

    /// Initial client width in pixels
    #[arg(long)]
    pub width: Option<u32>,

    /// Initial client height in pixels
    #[arg(long)]
    pub height: Option<u32>,

    /// Per-frame command slots (at least 2)
    #[arg(long)]
    pub frame_slots: Option<usize>,

    /// Presentable images to request (at least 2)
    #[arg(long)]
    pub image_count: Option<u32>,

    /// Wait for vertical blank on present
    #[arg(long)]
    pub vsync: Option<bool>,

    /// Request the Vulkan validation layer
    #[arg(long)]
    pub validation: Option<bool>,

    /// Run without a window on the headless backend
    #[arg(long)]
    pub headless: bool,

    /// Frames to run in headless mode
    #[arg(long, default_value_t = 300, requires = "headless")]
    pub frames: u64,

    /// Fence signals the headless GPU trails the CPU by
    #[arg(long, default_value_t = 1, requires = "headless")]
    pub gpu_latency: u64,
}

impl Cli {
    /// Overlays the command-line values onto `base` and validates the
    /// result.
    pub fn resolve(&self, base: EngineConfig) -> Result<EngineConfig> {
        let mut config = base;
        if let Some(title) = &self.title {
            config.title = title.clone();
        }
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(frame_slots) = self.frame_slots {
            config.frame_slots = frame_slots;
        }
        if let Some(image_count) = self.image_count {
            config.image_count = image_count;
        }
        if let Some(vsync) = self.vsync {
            config.vsync = vsync;
        }
        if let Some(validation) = self.validation {
            config.enable_validation = validation;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_wins_over_base() {
        let cli = Cli::try_parse_from(["cadence", "--width", "800", "--vsync", "false"]).unwrap();
        let base = EngineConfig {
            width: 1024,
            height: 600,
            ..EngineConfig::default()
        };
        let config = cli.resolve(base).unwrap();
        assert_eq!(config.width, 800);
        assert_eq!(config.height, 600);
        assert!(!config.vsync);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let cli = Cli::try_parse_from(["cadence", "--frame-slots", "1"]).unwrap();
        assert!(cli.resolve(EngineConfig::default()).is_err());
    }

    #[test]
    fn test_headless_options() {
        let cli = Cli::try_parse_from(["cadence", "--headless", "--frames", "12"]).unwrap();
        assert!(cli.headless);
        assert_eq!(cli.frames, 12);
        assert_eq!(cli.gpu_latency, 1);
    }

    #[test]
    fn test_frames_requires_headless() {
        assert!(Cli::try_parse_from(["cadence", "--frames", "12"]).is_err());
    }
}
