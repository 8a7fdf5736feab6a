// =============================================================================
// VKCUBE FRAME - a static Vulkan cube presented at a fixed 60 Hz
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Platform (winit window, pumped once per tick)                  │
// │    └── Renderer                                                 │
// │          ├── GraphicsContext (device, swapchain, frame sync)    │
// │          └── FrameResources (depth, pipeline, framebuffers)     │
// │                └── Command buffers (recorded once)              │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW (every tick):
// 1. Close requested? -> tear down and exit
// 2. Pump OS events
// 3. Acquire swapchain image (one retry if outdated)
// 4. Submit the pre-recorded command buffer and present
//
// =============================================================================

mod backend;
mod config;
mod error;
mod frame_loop;
mod renderer;
mod window;

use anyhow::{Context, Result};
use config::Config;
use frame_loop::FrameLoop;
use renderer::Renderer;
use window::Platform;

fn main() -> Result<()> {
    let (config, load_error) = Config::load();

    init_logging(&config);
    log::info!("Starting vkcube-frame");
    match load_error {
        Some(e) => log::warn!("Failed to load config.toml: {:#}. Using defaults.", e),
        None => log::debug!("Config: {:?}", config),
    }
    log::info!(
        "Window: {}x{} '{}', {} Hz",
        config.window.width,
        config.window.height,
        config.window.title,
        config.graphics.frame_rate
    );

    let result = run(config);
    match &result {
        Ok(()) => log::info!("Bye!"),
        Err(e) => log::error!("Fatal: {:#}", e),
    }
    result
}

fn run(config: Config) -> Result<()> {
    let period = config.frame_interval();

    let platform = Platform::new(&config.window).context("Failed to open window")?;
    // On failure the partially built renderer cleans up in Drop, then the
    // platform goes out of scope, keeping the teardown order
    let renderer = Renderer::new(config, &platform).context("Failed to initialize Vulkan")?;

    FrameLoop::new(platform, renderer, period).run()?;
    Ok(())
}

/// Initialize logging; RUST_LOG takes precedence over the configured level
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or(config.debug.log_level.as_str())).init();
}
