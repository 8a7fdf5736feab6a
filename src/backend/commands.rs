// Command recording
//
// Recording goes through the `CommandSink` trait so the exact command stream
// can be inspected in tests. `DeviceRecorder` is the real sink and forwards
// each call to the Vulkan device.

use anyhow::Result;
use ash::vk;

use super::device::QueueFamilies;
use crate::error::VkResultExt;

/// The cube has no vertex buffer: 12 triangles indexed in the vertex shader.
pub const CUBE_VERTEX_COUNT: u32 = 12 * 3;

pub trait CommandSink {
    fn begin(&mut self, flags: vk::CommandBufferUsageFlags) -> Result<()>;
    fn begin_render_pass(&mut self, info: &vk::RenderPassBeginInfo);
    fn bind_pipeline(&mut self, pipeline: vk::Pipeline);
    fn bind_descriptor_set(&mut self, layout: vk::PipelineLayout, set: vk::DescriptorSet);
    fn set_viewport(&mut self, viewport: vk::Viewport);
    fn set_scissor(&mut self, scissor: vk::Rect2D);
    fn draw(&mut self, vertex_count: u32, instance_count: u32);
    fn end_render_pass(&mut self);
    fn image_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier,
    );
    fn end(&mut self) -> Result<()>;
}

/// Records straight into a Vulkan command buffer
pub struct DeviceRecorder<'a> {
    device: &'a ash::Device,
    cmd: vk::CommandBuffer,
}

impl<'a> DeviceRecorder<'a> {
    pub fn new(device: &'a ash::Device, cmd: vk::CommandBuffer) -> Self {
        Self { device, cmd }
    }
}

impl CommandSink for DeviceRecorder<'_> {
    fn begin(&mut self, flags: vk::CommandBufferUsageFlags) -> Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);
        unsafe { self.device.begin_command_buffer(self.cmd, &begin_info) }
            .vk_op("vkBeginCommandBuffer")
    }

    fn begin_render_pass(&mut self, info: &vk::RenderPassBeginInfo) {
        unsafe {
            self.device
                .cmd_begin_render_pass(self.cmd, info, vk::SubpassContents::INLINE)
        }
    }

    fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(self.cmd, vk::PipelineBindPoint::GRAPHICS, pipeline)
        }
    }

    fn bind_descriptor_set(&mut self, layout: vk::PipelineLayout, set: vk::DescriptorSet) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.cmd,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[set],
                &[],
            )
        }
    }

    fn set_viewport(&mut self, viewport: vk::Viewport) {
        unsafe { self.device.cmd_set_viewport(self.cmd, 0, &[viewport]) }
    }

    fn set_scissor(&mut self, scissor: vk::Rect2D) {
        unsafe { self.device.cmd_set_scissor(self.cmd, 0, &[scissor]) }
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        unsafe { self.device.cmd_draw(self.cmd, vertex_count, instance_count, 0, 0) }
    }

    fn end_render_pass(&mut self) {
        unsafe { self.device.cmd_end_render_pass(self.cmd) }
    }

    fn image_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier,
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(barrier),
            )
        }
    }

    fn end(&mut self) -> Result<()> {
        unsafe { self.device.end_command_buffer(self.cmd) }.vk_op("vkEndCommandBuffer")
    }
}

/// Shared objects every cube command buffer uses
#[derive(Debug, Clone, Copy)]
pub struct DrawParams {
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub queue_families: QueueFamilies,
}

/// Per-image objects one command buffer draws into
#[derive(Debug, Clone, Copy)]
pub struct ImageTarget {
    pub image: vk::Image,
    pub framebuffer: vk::Framebuffer,
    pub descriptor_set: vk::DescriptorSet,
}

fn full_area(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

fn ownership_barrier(image: vk::Image, families: QueueFamilies) -> vk::ImageMemoryBarrier {
    vk::ImageMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .old_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .src_queue_family_index(families.graphics)
        .dst_queue_family_index(families.present)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .build()
}

/// Record the static cube frame for one swapchain image.
///
/// The buffer is resubmitted every frame without re-recording, hence
/// SIMULTANEOUS_USE.
pub fn record_cube(
    sink: &mut impl CommandSink,
    params: &DrawParams,
    target: &ImageTarget,
) -> Result<()> {
    sink.begin(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE)?;

    let clear_values = [
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: params.clear_color,
            },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ];

    let render_pass_info = vk::RenderPassBeginInfo::builder()
        .render_pass(params.render_pass)
        .framebuffer(target.framebuffer)
        .render_area(full_area(params.extent))
        .clear_values(&clear_values);

    sink.begin_render_pass(&render_pass_info);
    sink.bind_pipeline(params.pipeline);
    sink.bind_descriptor_set(params.pipeline_layout, target.descriptor_set);
    sink.set_viewport(vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: params.extent.width as f32,
        height: params.extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    });
    sink.set_scissor(full_area(params.extent));
    sink.draw(CUBE_VERTEX_COUNT, 1);
    // Ending the render pass moves the image to PRESENT_SRC
    sink.end_render_pass();

    if params.queue_families.separate_present() {
        // Release the image to the present family; its contents need not be
        // handed back at the start of the next frame
        sink.image_barrier(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            &ownership_barrier(target.image, params.queue_families),
        );
    }

    sink.end()
}

/// Record the present-family half of the ownership transfer for one image.
pub fn record_ownership_acquire(
    sink: &mut impl CommandSink,
    image: vk::Image,
    families: QueueFamilies,
) -> Result<()> {
    sink.begin(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE)?;
    sink.image_barrier(
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        &ownership_barrier(image, families),
    );
    sink.end()
}
