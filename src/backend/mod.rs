// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash. The context bootstraps device and
// swapchain; the other modules create the fixed cube-drawing objects.

pub mod commands;
pub mod context;
pub mod depth;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use context::{ContextSettings, GraphicsContext};
pub use device::VulkanDevice;
pub use swapchain::{AcquiredImage, Swapchain};
