// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Defaults reproduce the fixed setup: a 500x500 window titled "test",
// B8G8R8A8_UNORM swapchain, 60 Hz loop. config.toml may override them.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "test".to_string(),
            width: 500,
            height: 500,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    /// Ticks per second of the frame loop
    pub frame_rate: u32,
    pub frames_in_flight: usize,
    /// Directory holding cube.vert.spv and cube.frag.spv
    pub shader_dir: PathBuf,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            clear_color: [0.2, 0.2, 0.2, 0.2],
            frame_rate: 60,
            frames_in_flight: 2,
            shader_dir: PathBuf::from("shaders"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: false,
            log_level: "info".to_string(),
        }
    }
}

/// What the graphics context negotiates the swapchain from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDimensions {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
}

impl Config {
    /// Load `config.toml`, falling back to defaults when it cannot be used.
    ///
    /// Runs before logging is set up, so the load error is handed back for
    /// the caller to report.
    pub fn load() -> (Self, Option<anyhow::Error>) {
        Self::load_or_default("config.toml")
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        match Self::load_from_path(path) {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            anyhow::bail!(
                "window size must be non-zero, got {}x{}",
                self.window.width,
                self.window.height
            );
        }
        if self.graphics.frame_rate == 0 {
            anyhow::bail!("graphics.frame_rate must be non-zero");
        }
        if self.graphics.frames_in_flight == 0 {
            anyhow::bail!("graphics.frames_in_flight must be non-zero");
        }
        Ok(())
    }

    /// Get present mode as Vulkan enum
    pub fn get_present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::FIFO
            }
        }
    }

    pub fn swapchain_dimensions(&self) -> SwapchainDimensions {
        SwapchainDimensions {
            width: self.window.width,
            height: self.window.height,
            format: vk::Format::B8G8R8A8_UNORM,
        }
    }

    /// Interval between frame loop ticks
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.graphics.frame_rate.max(1)
    }

    pub fn vertex_shader_path(&self) -> PathBuf {
        self.graphics.shader_dir.join("cube.vert.spv")
    }

    pub fn fragment_shader_path(&self) -> PathBuf {
        self.graphics.shader_dir.join("cube.frag.spv")
    }
}
