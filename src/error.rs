// Typed errors for the fail-fast paths
//
// Everything propagates as anyhow::Error; these types ride inside it so the
// top-level handler (and tests) can still downcast to the failed operation.

use ash::vk;
use thiserror::Error;

/// A Vulkan call returned a non-success result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{op} failed: {code}")]
pub struct VulkanError {
    /// Name of the Vulkan operation, e.g. `vkCreateImage`
    pub op: &'static str,
    /// Native result code
    pub code: vk::Result,
}

/// Maps raw `VkResult`s into `VulkanError` carrying the operation name.
pub trait VkResultExt<T> {
    fn vk_op(self, op: &'static str) -> anyhow::Result<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn vk_op(self, op: &'static str) -> anyhow::Result<T> {
        self.map_err(|code| VulkanError { op, code }.into())
    }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum WindowError {
    /// The event loop never delivered `resumed`, so no window exists.
    #[error("window was not created after {0} event pumps")]
    NotCreated(u32),

    #[error("failed to create window")]
    Create(#[from] winit::error::OsError),

    #[error(transparent)]
    EventLoop(#[from] winit::error::EventLoopError),
}

#[derive(Debug, Error)]
pub enum FrameError {
    /// Acquisition reported an outdated swapchain again right after the retry.
    #[error("swapchain still outdated after one retry")]
    SwapchainOutdated,
}

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("failed to read shader {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("shader {path} is not valid SPIR-V")]
    InvalidSpirv {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vk_op_keeps_operation_and_code() {
        let raw: Result<(), vk::Result> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let err = raw.vk_op("vkAllocateMemory").unwrap_err();

        let vk_err = err.downcast_ref::<VulkanError>().unwrap();
        assert_eq!(vk_err.op, "vkAllocateMemory");
        assert_eq!(vk_err.code, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert!(err.to_string().starts_with("vkAllocateMemory failed"));
    }

    #[test]
    fn vk_op_passes_success_through() {
        let raw: Result<u32, vk::Result> = Ok(7);
        assert_eq!(raw.vk_op("vkWhatever").unwrap(), 7);
    }

    #[test]
    fn vulkan_error_survives_added_context() {
        use anyhow::Context;

        let raw: Result<(), vk::Result> = Err(vk::Result::ERROR_DEVICE_LOST);
        let err = raw
            .vk_op("vkQueueSubmit")
            .context("Failed to submit frame")
            .unwrap_err();

        let vk_err = err.downcast_ref::<VulkanError>().unwrap();
        assert_eq!(vk_err.code, vk::Result::ERROR_DEVICE_LOST);
    }
}
