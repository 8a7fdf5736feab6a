// Synchronization primitives
//
// FrameSync is per frame in flight and guards the acquire. ImageSync is per
// swapchain image: presentation waits on its semaphores, and only the next
// acquire of that same image proves the wait has finished. The ownership
// semaphore is only used when presentation runs on a different queue family.

use anyhow::Result;
use ash::vk;

use super::VulkanDevice;
use crate::error::VkResultExt;

#[derive(Debug, Default, Clone, Copy)]
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let mut sync = Self::default();
        let created = (|| -> Result<()> {
            sync.image_available = create_semaphore(device)?;
            // Start signaled so the first wait returns immediately
            let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
            sync.in_flight_fence = unsafe { device.device.create_fence(&fence_info, None) }
                .vk_op("vkCreateFence")?;
            Ok(())
        })();

        match created {
            Ok(()) => Ok(sync),
            Err(e) => {
                sync.destroy(&device.device);
                Err(e)
            }
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ImageSync {
    pub render_finished: vk::Semaphore,
    pub ownership_transferred: vk::Semaphore,
}

impl ImageSync {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let render_finished = create_semaphore(device)?;
        let ownership_transferred = match create_semaphore(device) {
            Ok(semaphore) => semaphore,
            Err(e) => {
                unsafe { device.device.destroy_semaphore(render_finished, None) };
                return Err(e);
            }
        };
        Ok(Self {
            render_finished,
            ownership_transferred,
        })
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_semaphore(self.ownership_transferred, None);
        }
    }
}

/// Semaphores used by one submit and present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitSemaphores {
    /// Waited on by the graphics submit
    pub acquired: vk::Semaphore,
    /// Signaled by the graphics submit
    pub rendered: vk::Semaphore,
    /// Waited on by the present
    pub present_wait: vk::Semaphore,
}

/// Pick the semaphores for presenting an image acquired in `frame`.
pub fn submit_semaphores(
    frame: &FrameSync,
    image: &ImageSync,
    separate_present: bool,
) -> SubmitSemaphores {
    SubmitSemaphores {
        acquired: frame.image_available,
        rendered: image.render_finished,
        present_wait: if separate_present {
            image.ownership_transferred
        } else {
            image.render_finished
        },
    }
}

fn create_semaphore(device: &VulkanDevice) -> Result<vk::Semaphore> {
    let semaphore_info = vk::SemaphoreCreateInfo::builder();
    unsafe { device.device.create_semaphore(&semaphore_info, None) }.vk_op("vkCreateSemaphore")
}
