// Graphics context - the bootstrap layer under the renderer
//
// Owns the device, swapchain, per-image command buffers and frame sync.
// The renderer supplies configuration (desired dimensions, present mode,
// debug flag) and records into the command buffers handed out here.

use anyhow::Result;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

use super::commands::{record_ownership_acquire, DeviceRecorder};
use super::device::QueueFamilies;
use super::swapchain::AcquiredImage;
use super::sync::{submit_semaphores, FrameSync, ImageSync};
use super::{Swapchain, VulkanDevice};
use crate::config::SwapchainDimensions;
use crate::error::VkResultExt;

/// Base resources the context keeps for every swapchain image
#[derive(Debug, Clone, Copy)]
pub struct SwapchainImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    /// Pre-recorded by the renderer, submitted on the graphics queue
    pub command_buffer: vk::CommandBuffer,
    /// Ownership acquire on the present queue; null when families match
    pub present_command_buffer: vk::CommandBuffer,
    pub sync: ImageSync,
}

/// What the context is configured with
#[derive(Debug, Clone)]
pub struct ContextSettings {
    pub app_name: String,
    pub validation: bool,
    pub dimensions: SwapchainDimensions,
    pub present_mode: vk::PresentModeKHR,
    pub frames_in_flight: usize,
}

pub struct GraphicsContext {
    settings: ContextSettings,
    swapchain: Swapchain,
    images: Vec<SwapchainImage>,

    graphics_pool: vk::CommandPool,
    present_pool: Option<vk::CommandPool>,

    frame_sync: Vec<FrameSync>,
    frame_index: usize,

    // Dropped last: everything above is a child of the device
    device: Arc<VulkanDevice>,
}

impl GraphicsContext {
    pub fn new(
        settings: ContextSettings,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        let device = VulkanDevice::new(
            &settings.app_name,
            settings.validation,
            display_handle,
            window_handle,
        )?;
        let families = device.queue_families;

        let swapchain = Swapchain::new(
            device.clone(),
            settings.dimensions,
            settings.present_mode,
            vk::SwapchainKHR::null(),
        )?;

        let frames_in_flight = settings.frames_in_flight.max(1);

        // Filled in step by step; an early return drops the context, which
        // destroys whatever exists so far
        let mut context = Self {
            settings,
            swapchain,
            images: Vec::new(),
            graphics_pool: vk::CommandPool::null(),
            present_pool: None,
            frame_sync: Vec::with_capacity(frames_in_flight),
            frame_index: 0,
            device,
        };

        context.graphics_pool = create_command_pool(&context.device, families.graphics)?;
        if families.separate_present() {
            context.present_pool = Some(create_command_pool(&context.device, families.present)?);
        }
        for _ in 0..frames_in_flight {
            let sync = FrameSync::new(&context.device)?;
            context.frame_sync.push(sync);
        }
        context.create_image_resources()?;

        log::info!("Vulkan initialized successfully!");
        Ok(context)
    }

    /// Allocate command buffers and semaphores for every swapchain image.
    ///
    /// Each image is pushed as soon as it is complete, so a failure leaves
    /// `images` holding only what `free_image_resources` has to release.
    fn create_image_resources(&mut self) -> Result<()> {
        let count = self.swapchain.images.len() as u32;
        let command_buffers = allocate_command_buffers(&self.device, self.graphics_pool, count)?;
        let present_buffers = match self.present_pool {
            Some(pool) => match allocate_command_buffers(&self.device, pool, count) {
                Ok(buffers) => buffers,
                Err(e) => {
                    unsafe {
                        self.device
                            .device
                            .free_command_buffers(self.graphics_pool, &command_buffers)
                    };
                    return Err(e);
                }
            },
            None => vec![vk::CommandBuffer::null(); count as usize],
        };

        let handles: Vec<(vk::Image, vk::ImageView)> = self
            .swapchain
            .images
            .iter()
            .copied()
            .zip(self.swapchain.image_views.iter().copied())
            .collect();

        // Buffers not yet owned by an image go back to their pools on failure
        let mut pending = command_buffers.into_iter().zip(present_buffers);
        for (image, view) in handles {
            let Some((command_buffer, present_command_buffer)) = pending.next() else {
                break;
            };
            let sync = match ImageSync::new(&self.device) {
                Ok(sync) => sync,
                Err(e) => {
                    let rest: Vec<_> = std::iter::once((command_buffer, present_command_buffer))
                        .chain(pending)
                        .collect();
                    self.free_command_buffers(&rest);
                    return Err(e);
                }
            };
            self.images.push(SwapchainImage {
                image,
                view,
                command_buffer,
                present_command_buffer,
                sync,
            });
        }

        if self.present_pool.is_some() {
            for image in &self.images {
                let mut recorder =
                    DeviceRecorder::new(&self.device.device, image.present_command_buffer);
                record_ownership_acquire(&mut recorder, image.image, self.queue_families())?;
            }
        }

        Ok(())
    }

    /// Return (graphics, present) command buffer pairs to their pools.
    fn free_command_buffers(&self, buffers: &[(vk::CommandBuffer, vk::CommandBuffer)]) {
        if buffers.is_empty() {
            return;
        }
        let graphics: Vec<_> = buffers.iter().map(|&(graphics, _)| graphics).collect();
        unsafe {
            self.device.device.free_command_buffers(self.graphics_pool, &graphics);
            if let Some(pool) = self.present_pool {
                let present: Vec<_> = buffers.iter().map(|&(_, present)| present).collect();
                self.device.device.free_command_buffers(pool, &present);
            }
        }
    }

    fn free_image_resources(&mut self) {
        let buffers: Vec<_> = self
            .images
            .iter()
            .map(|i| (i.command_buffer, i.present_command_buffer))
            .collect();
        self.free_command_buffers(&buffers);
        for image in &self.images {
            image.sync.destroy(&self.device.device);
        }
        self.images.clear();
    }

    /// Rebuild the swapchain after it was reported outdated.
    ///
    /// Invalidates every per-image resource; callers must rebuild anything
    /// derived from `images()` and re-record the command buffers.
    pub fn recreate_swapchain(&mut self) -> Result<()> {
        log::info!("Recreating outdated swapchain");
        self.device.wait_idle()?;
        self.free_image_resources();

        let swapchain = Swapchain::new(
            self.device.clone(),
            self.settings.dimensions,
            self.settings.present_mode,
            self.swapchain.swapchain,
        )?;
        // Old swapchain is retired by assignment
        self.swapchain = swapchain;
        self.create_image_resources()?;
        Ok(())
    }

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    pub fn images(&self) -> &[SwapchainImage] {
        &self.images
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn format(&self) -> vk::Format {
        self.swapchain.format
    }

    pub fn queue_families(&self) -> QueueFamilies {
        self.device.queue_families
    }

    /// Acquire the next presentable image for this frame slot.
    pub fn acquire_next_image(&mut self) -> Result<AcquiredImage> {
        let sync = &self.frame_sync[self.frame_index];

        // Wait until the last submission from this slot is done with its semaphores
        unsafe {
            self.device
                .device
                .wait_for_fences(&[sync.in_flight_fence], true, u64::MAX)
        }
        .vk_op("vkWaitForFences")?;

        let acquired = self.swapchain.acquire_next_image(sync.image_available)?;
        log::trace!("Acquired {:?} in frame slot {}", acquired, self.frame_index);
        Ok(acquired)
    }

    /// Submit the pre-recorded command buffer of `index` and present it.
    pub fn present_image(&mut self, index: u32) -> Result<()> {
        let frame = self.frame_sync[self.frame_index];
        let image = self.images[index as usize];
        let separate_present = self.present_pool.is_some();
        let semaphores = submit_semaphores(&frame, &image.sync, separate_present);
        let device = &self.device.device;

        unsafe { device.reset_fences(&[frame.in_flight_fence]) }.vk_op("vkResetFences")?;

        let wait_semaphores = [semaphores.acquired];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [image.command_buffer];
        let signal_semaphores = [semaphores.rendered];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                frame.in_flight_fence,
            )
        }
        .vk_op("vkQueueSubmit")?;

        if separate_present {
            // Complete the ownership transfer on the present queue
            let wait_semaphores = [semaphores.rendered];
            let command_buffers = [image.present_command_buffer];
            let signal_semaphores = [semaphores.present_wait];

            let submit_info = vk::SubmitInfo::builder()
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&wait_stages)
                .command_buffers(&command_buffers)
                .signal_semaphores(&signal_semaphores);

            unsafe {
                device.queue_submit(
                    self.device.present_queue,
                    &[submit_info.build()],
                    vk::Fence::null(),
                )
            }
            .vk_op("vkQueueSubmit")?;
        }

        let needs_rebuild = self.swapchain.present(
            self.device.present_queue,
            index,
            &[semaphores.present_wait],
        )?;
        if needs_rebuild {
            // The next acquire reports it outdated and triggers the rebuild
            log::debug!("Present reported suboptimal or outdated swapchain");
        }

        self.frame_index = (self.frame_index + 1) % self.frame_sync.len();
        Ok(())
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        log::info!("Destroying graphics context...");

        let _ = self.device.wait_idle();

        self.free_image_resources();
        let device = &self.device.device;
        for sync in &self.frame_sync {
            sync.destroy(device);
        }
        unsafe {
            // Null when creation failed early, which Vulkan ignores
            device.destroy_command_pool(self.graphics_pool, None);
            if let Some(pool) = self.present_pool {
                device.destroy_command_pool(pool, None);
            }
        }
        // Swapchain drops next, then the device once its last Arc goes
    }
}

fn create_command_pool(device: &VulkanDevice, family: u32) -> Result<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo::builder().queue_family_index(family);
    unsafe { device.device.create_command_pool(&pool_info, None) }.vk_op("vkCreateCommandPool")
}

fn allocate_command_buffers(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    count: u32,
) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count);

    unsafe { device.device.allocate_command_buffers(&alloc_info) }
        .vk_op("vkAllocateCommandBuffers")
}
