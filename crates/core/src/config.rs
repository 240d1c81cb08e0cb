//! Engine-lifetime configuration.
//!
//! Values are supplied once at startup and never serialized. The binary
//! starts from [`EngineConfig::default`], overlays the `CADENCE_*`
//! environment variables with [`EngineConfig::from_env`], then applies its
//! command-line flags and calls [`EngineConfig::validate`].

use std::str::FromStr;

use crate::error::{Error, Result};

/// Default number of per-frame command slots (triple buffering).
pub const DEFAULT_FRAME_SLOTS: usize = 3;

/// Default number of presentable images requested from the surface.
pub const DEFAULT_IMAGE_COUNT: u32 = 3;

const ENV_FRAME_SLOTS: &str = "CADENCE_FRAME_SLOTS";
const ENV_IMAGE_COUNT: &str = "CADENCE_IMAGE_COUNT";
const ENV_WIDTH: &str = "CADENCE_WIDTH";
const ENV_HEIGHT: &str = "CADENCE_HEIGHT";
const ENV_VSYNC: &str = "CADENCE_VSYNC";
const ENV_VALIDATION: &str = "CADENCE_VALIDATION";

/// Startup configuration for the frame-submission core and its window.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Window title.
    pub title: String,
    /// Initial client width in pixels.
    pub width: u32,
    /// Initial client height in pixels.
    pub height: u32,
    /// Per-frame command slots; the CPU runs at most `frame_slots - 1`
    /// frames ahead of the GPU.
    pub frame_slots: usize,
    /// Presentable images requested from the surface.
    pub image_count: u32,
    /// Wait for vertical blank on present.
    pub vsync: bool,
    /// Request the Vulkan validation layer.
    pub enable_validation: bool,
    /// RGBA clear color of the back buffer.
    pub clear_color: [f32; 4],
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Cadence".to_string(),
            width: 1280,
            height: 720,
            frame_slots: DEFAULT_FRAME_SLOTS,
            image_count: DEFAULT_IMAGE_COUNT,
            vsync: true,
            enable_validation: cfg!(debug_assertions),
            clear_color: [0.1, 0.1, 0.12, 1.0],
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with the `CADENCE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a variable is set but malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_FRAME_SLOTS) {
            config.frame_slots = parse_number(ENV_FRAME_SLOTS, &value)?;
        }
        if let Some(value) = lookup(ENV_IMAGE_COUNT) {
            config.image_count = parse_number(ENV_IMAGE_COUNT, &value)?;
        }
        if let Some(value) = lookup(ENV_WIDTH) {
            config.width = parse_number(ENV_WIDTH, &value)?;
        }
        if let Some(value) = lookup(ENV_HEIGHT) {
            config.height = parse_number(ENV_HEIGHT, &value)?;
        }
        if let Some(value) = lookup(ENV_VSYNC) {
            config.vsync = parse_flag(ENV_VSYNC, &value)?;
        }
        if let Some(value) = lookup(ENV_VALIDATION) {
            config.enable_validation = parse_flag(ENV_VALIDATION, &value)?;
        }

        Ok(config)
    }

    /// Reject values the frame-submission core cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.frame_slots < 2 {
            return Err(Error::Config(format!(
                "frame_slots must be at least 2 (got {})",
                self.frame_slots
            )));
        }
        if self.image_count < 2 {
            return Err(Error::Config(format!(
                "image_count must be at least 2 (got {})",
                self.image_count
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(Error::Config(format!(
                "surface size must be non-zero (got {}x{})",
                self.width, self.height
            )));
        }
        if self.clear_color.iter().any(|c| !c.is_finite()) {
            return Err(Error::Config("clear_color must be finite".to_string()));
        }
        Ok(())
    }

    /// Present interval derived from `vsync`: 1 waits for one vertical
    /// blank, 0 presents immediately.
    pub fn sync_interval(&self) -> u32 {
        u32::from(self.vsync)
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key}: expected a number, got '{value}'")))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "{key}: expected a boolean, got '{value}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.frame_slots, 3);
        assert_eq!(config.image_count, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn lookup_overrides_defaults() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            (ENV_FRAME_SLOTS, "2"),
            (ENV_WIDTH, "640"),
            (ENV_HEIGHT, " 480 "),
            (ENV_VSYNC, "off"),
            (ENV_VALIDATION, "TRUE"),
        ]))
        .unwrap();

        assert_eq!(config.frame_slots, 2);
        assert_eq!(config.width, 640);
        assert_eq!(config.height, 480);
        assert!(!config.vsync);
        assert!(config.enable_validation);
        assert_eq!(config.image_count, DEFAULT_IMAGE_COUNT);
    }

    #[test]
    fn malformed_values_are_config_errors() {
        let result = EngineConfig::from_lookup(lookup_from(&[(ENV_IMAGE_COUNT, "three")]));
        assert!(matches!(result, Err(Error::Config(_))));

        let result = EngineConfig::from_lookup(lookup_from(&[(ENV_VSYNC, "maybe")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn validate_rejects_single_slot() {
        let config = EngineConfig {
            frame_slots: 1,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn validate_rejects_single_image() {
        let config = EngineConfig {
            image_count: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_size() {
        let config = EngineConfig {
            height: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn sync_interval_follows_vsync() {
        let mut config = EngineConfig::default();
        assert_eq!(config.sync_interval(), 1);
        config.vsync = false;
        assert_eq!(config.sync_interval(), 0);
    }
}
