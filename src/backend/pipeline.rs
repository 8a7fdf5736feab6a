// Graphics pipeline creation and management
//
// Everything here is created once per swapchain generation and never
// changes afterwards. The layout/state builders are plain values so their
// shape can be checked without a GPU.

use anyhow::Result;
use ash::vk;
use std::ffi::CStr;
use std::path::Path;

use super::{shader, VulkanDevice};
use crate::error::VkResultExt;

/// Entry point of both shader stages
pub const SHADER_ENTRY: &CStr = c"main";

/// Attachment slots of the render pass
pub const COLOR_ATTACHMENT: u32 = 0;
pub const DEPTH_ATTACHMENT: u32 = 1;

/// Immutable objects every recorded command buffer refers to.
///
/// Handles not created yet are null, which `destroy` skips.
#[derive(Debug, Default)]
pub struct PipelineState {
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub pipeline_layout: vk::PipelineLayout,
    pub pipeline_cache: vk::PipelineCache,
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
}

impl PipelineState {
    /// Build every object in order. Whatever was created before a failure
    /// is destroyed again.
    pub fn new(
        device: &VulkanDevice,
        color_format: vk::Format,
        depth_format: vk::Format,
        vertex_shader: &Path,
        fragment_shader: &Path,
    ) -> Result<Self> {
        let mut state = Self::default();
        match state.build(device, color_format, depth_format, vertex_shader, fragment_shader) {
            Ok(()) => {
                debug_assert!(state.is_complete());
                Ok(state)
            }
            Err(e) => {
                state.destroy(&device.device);
                Err(e)
            }
        }
    }

    fn build(
        &mut self,
        device: &VulkanDevice,
        color_format: vk::Format,
        depth_format: vk::Format,
        vertex_shader: &Path,
        fragment_shader: &Path,
    ) -> Result<()> {
        self.descriptor_set_layout = create_descriptor_set_layout(device)?;
        self.pipeline_layout = create_pipeline_layout(device, self.descriptor_set_layout)?;
        self.render_pass = create_render_pass(device, color_format, depth_format)?;
        self.pipeline_cache = create_pipeline_cache(device)?;

        let vert = shader::load_shader_module(device, vertex_shader)?;
        let frag = match shader::load_shader_module(device, fragment_shader) {
            Ok(frag) => frag,
            Err(e) => {
                unsafe { device.device.destroy_shader_module(vert, None) };
                return Err(e);
            }
        };

        let pipeline = create_graphics_pipeline(
            device,
            self.pipeline_cache,
            self.pipeline_layout,
            self.render_pass,
            vert,
            frag,
        );

        // Modules are baked into the pipeline and no longer needed
        unsafe {
            device.device.destroy_shader_module(vert, None);
            device.device.destroy_shader_module(frag, None);
        }
        self.pipeline = pipeline?;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        use vk::Handle;

        [
            self.descriptor_set_layout.as_raw(),
            self.pipeline_layout.as_raw(),
            self.pipeline_cache.as_raw(),
            self.render_pass.as_raw(),
            self.pipeline.as_raw(),
        ]
        .iter()
        .all(|&raw| raw != 0)
    }

    pub fn destroy(&self, device: &ash::Device) {
        // Destroying a null handle is a no-op
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_cache(self.pipeline_cache, None);
            device.destroy_render_pass(self.render_pass, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
        }
    }
}

/// Descriptor set layout with no bindings
pub fn create_descriptor_set_layout(device: &VulkanDevice) -> Result<vk::DescriptorSetLayout> {
    let layout_info = vk::DescriptorSetLayoutCreateInfo::builder();
    unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }
        .vk_op("vkCreateDescriptorSetLayout")
}

pub fn create_pipeline_layout(
    device: &VulkanDevice,
    set_layout: vk::DescriptorSetLayout,
) -> Result<vk::PipelineLayout> {
    let set_layouts = [set_layout];
    let pipeline_layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
    unsafe { device.device.create_pipeline_layout(&pipeline_layout_info, None) }
        .vk_op("vkCreatePipelineLayout")
}

/// Attachments and the single subpass of the cube render pass.
///
/// Both attachments start UNDEFINED since their contents are cleared. The
/// color attachment ends in PRESENT_SRC, so no barrier is needed to present.
pub struct RenderPassLayout {
    attachments: [vk::AttachmentDescription; 2],
    color_refs: [vk::AttachmentReference; 1],
    depth_ref: vk::AttachmentReference,
}

impl RenderPassLayout {
    pub fn new(color_format: vk::Format, depth_format: vk::Format) -> Self {
        let color_attachment = vk::AttachmentDescription::builder()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();

        let depth_attachment = vk::AttachmentDescription::builder()
            .format(depth_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .build();

        Self {
            attachments: [color_attachment, depth_attachment],
            color_refs: [vk::AttachmentReference {
                attachment: COLOR_ATTACHMENT,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            }],
            depth_ref: vk::AttachmentReference {
                attachment: DEPTH_ATTACHMENT,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            },
        }
    }

    pub fn attachments(&self) -> &[vk::AttachmentDescription] {
        &self.attachments
    }

    /// The subpass borrows the references stored in `self`.
    pub fn subpass(&self) -> vk::SubpassDescription {
        vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&self.color_refs)
            .depth_stencil_attachment(&self.depth_ref)
            .build()
    }
}

pub fn create_render_pass(
    device: &VulkanDevice,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> Result<vk::RenderPass> {
    let layout = RenderPassLayout::new(color_format, depth_format);
    let subpasses = [layout.subpass()];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(layout.attachments())
        .subpasses(&subpasses);

    unsafe { device.device.create_render_pass(&render_pass_info, None) }
        .vk_op("vkCreateRenderPass")
}

pub fn create_pipeline_cache(device: &VulkanDevice) -> Result<vk::PipelineCache> {
    let cache_info = vk::PipelineCacheCreateInfo::builder();
    unsafe { device.device.create_pipeline_cache(&cache_info, None) }
        .vk_op("vkCreatePipelineCache")
}

/// Vertex and fragment stages, both entering at `main`
pub fn shader_stages(
    vert: vk::ShaderModule,
    frag: vk::ShaderModule,
) -> [vk::PipelineShaderStageCreateInfo; 2] {
    [
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert)
            .name(SHADER_ENTRY)
            .build(),
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag)
            .name(SHADER_ENTRY)
            .build(),
    ]
}

/// Fixed-function state of the cube pipeline.
///
/// No vertex input: positions come from gl_VertexIndex in the vertex shader.
pub struct FixedFunctionState {
    pub input_assembly: vk::PipelineInputAssemblyStateCreateInfo,
    pub rasterization: vk::PipelineRasterizationStateCreateInfo,
    pub multisample: vk::PipelineMultisampleStateCreateInfo,
    pub depth_stencil: vk::PipelineDepthStencilStateCreateInfo,
    pub blend_attachments: [vk::PipelineColorBlendAttachmentState; 1],
    pub dynamic_states: [vk::DynamicState; 2],
}

impl Default for FixedFunctionState {
    fn default() -> Self {
        let keep = vk::StencilOpState {
            fail_op: vk::StencilOp::KEEP,
            pass_op: vk::StencilOp::KEEP,
            compare_op: vk::CompareOp::ALWAYS,
            ..Default::default()
        };

        Self {
            input_assembly: vk::PipelineInputAssemblyStateCreateInfo::builder()
                .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
                .build(),
            rasterization: vk::PipelineRasterizationStateCreateInfo::builder()
                .polygon_mode(vk::PolygonMode::FILL)
                .cull_mode(vk::CullModeFlags::BACK)
                .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
                .line_width(1.0)
                .build(),
            multisample: vk::PipelineMultisampleStateCreateInfo::builder()
                .rasterization_samples(vk::SampleCountFlags::TYPE_1)
                .build(),
            depth_stencil: vk::PipelineDepthStencilStateCreateInfo::builder()
                .depth_test_enable(true)
                .depth_write_enable(true)
                .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
                .depth_bounds_test_enable(false)
                .stencil_test_enable(false)
                .front(keep)
                .back(keep)
                .build(),
            blend_attachments: [vk::PipelineColorBlendAttachmentState::builder()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(false)
                .build()],
            dynamic_states: [vk::DynamicState::SCISSOR, vk::DynamicState::VIEWPORT],
        }
    }
}

pub fn create_graphics_pipeline(
    device: &VulkanDevice,
    cache: vk::PipelineCache,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    vert: vk::ShaderModule,
    frag: vk::ShaderModule,
) -> Result<vk::Pipeline> {
    let stages = shader_stages(vert, frag);
    let state = FixedFunctionState::default();

    let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder();
    // Counts only; the actual viewport and scissor are set while recording
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);
    let color_blend =
        vk::PipelineColorBlendStateCreateInfo::builder().attachments(&state.blend_attachments);
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&state.dynamic_states);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&state.input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&state.rasterization)
        .multisample_state(&state.multisample)
        .depth_stencil_state(&state.depth_stencil)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0)
        .build();

    let pipelines = unsafe {
        device
            .device
            .create_graphics_pipelines(cache, &[pipeline_info], None)
    }
    .map_err(|(_, code)| code)
    .vk_op("vkCreateGraphicsPipelines")?;

    Ok(pipelines[0])
}

/// Pool able to hand out one empty descriptor set per swapchain image
pub fn create_descriptor_pool(device: &VulkanDevice, max_sets: u32) -> Result<vk::DescriptorPool> {
    let pool_info = vk::DescriptorPoolCreateInfo::builder().max_sets(max_sets);
    unsafe { device.device.create_descriptor_pool(&pool_info, None) }
        .vk_op("vkCreateDescriptorPool")
}

pub fn allocate_descriptor_sets(
    device: &VulkanDevice,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
    count: usize,
) -> Result<Vec<vk::DescriptorSet>> {
    let layouts = vec![layout; count];
    let alloc_info = vk::DescriptorSetAllocateInfo::builder()
        .descriptor_pool(pool)
        .set_layouts(&layouts);

    unsafe { device.device.allocate_descriptor_sets(&alloc_info) }
        .vk_op("vkAllocateDescriptorSets")
}

pub fn framebuffer_info<'a>(
    render_pass: vk::RenderPass,
    attachments: &'a [vk::ImageView; 2],
    extent: vk::Extent2D,
) -> vk::FramebufferCreateInfoBuilder<'a> {
    vk::FramebufferCreateInfo::builder()
        .render_pass(render_pass)
        .attachments(attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1)
}

/// Create framebuffers for each swapchain image (with depth attachment)
/// One framebuffer per swapchain view, all sharing the depth view. On
/// failure the framebuffers created so far are destroyed.
pub fn create_framebuffers(
    device: &VulkanDevice,
    image_views: &[vk::ImageView],
    depth_image_view: vk::ImageView,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(image_views.len());
    for &image_view in image_views {
        let attachments = [image_view, depth_image_view];
        let info = framebuffer_info(render_pass, &attachments, extent);
        match unsafe { device.device.create_framebuffer(&info, None) } {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(code) => {
                for framebuffer in framebuffers {
                    unsafe { device.device.destroy_framebuffer(framebuffer, None) };
                }
                return Err::<Vec<vk::Framebuffer>, _>(code).vk_op("vkCreateFramebuffer");
            }
        }
    }
    Ok(framebuffers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn render_pass_has_color_and_depth_in_one_subpass() {
        let layout = RenderPassLayout::new(vk::Format::B8G8R8A8_UNORM, vk::Format::D16_UNORM);

        let attachments = layout.attachments();
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(attachments[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(attachments[1].format, vk::Format::D16_UNORM);
        assert_eq!(attachments[1].store_op, vk::AttachmentStoreOp::DONT_CARE);

        let subpass = layout.subpass();
        assert_eq!(subpass.color_attachment_count, 1);
        let color = unsafe { &*subpass.p_color_attachments };
        let depth = unsafe { &*subpass.p_depth_stencil_attachment };
        assert_eq!(color.attachment, COLOR_ATTACHMENT);
        assert_eq!(depth.attachment, DEPTH_ATTACHMENT);
        assert_eq!(depth.layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn fresh_pipeline_state_holds_only_null_handles() {
        // `new` unwinds a failed build through `destroy`, which relies on
        // untouched handles staying null
        let state = PipelineState::default();
        assert_eq!(state.descriptor_set_layout, vk::DescriptorSetLayout::null());
        assert_eq!(state.pipeline_layout, vk::PipelineLayout::null());
        assert_eq!(state.pipeline_cache, vk::PipelineCache::null());
        assert_eq!(state.render_pass, vk::RenderPass::null());
        assert_eq!(state.pipeline, vk::Pipeline::null());
        assert!(!state.is_complete());
    }

    #[test]
    fn partially_built_state_is_not_complete() {
        let state = PipelineState {
            descriptor_set_layout: vk::DescriptorSetLayout::from_raw(1),
            pipeline_layout: vk::PipelineLayout::from_raw(2),
            render_pass: vk::RenderPass::from_raw(3),
            ..Default::default()
        };
        assert!(!state.is_complete());

        let state = PipelineState {
            pipeline_cache: vk::PipelineCache::from_raw(4),
            pipeline: vk::Pipeline::from_raw(5),
            ..state
        };
        assert!(state.is_complete());
    }

    #[test]
    fn two_stages_entering_main() {
        let stages = shader_stages(vk::ShaderModule::from_raw(1), vk::ShaderModule::from_raw(2));

        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].stage, vk::ShaderStageFlags::VERTEX);
        assert_eq!(stages[0].module, vk::ShaderModule::from_raw(1));
        assert_eq!(stages[1].stage, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(stages[1].module, vk::ShaderModule::from_raw(2));
        for stage in &stages {
            assert_eq!(unsafe { CStr::from_ptr(stage.p_name) }, c"main");
        }
    }

    #[test]
    fn fixed_function_state_draws_opaque_depth_tested_triangles() {
        let state = FixedFunctionState::default();

        assert_eq!(state.input_assembly.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(state.rasterization.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(state.rasterization.front_face, vk::FrontFace::COUNTER_CLOCKWISE);
        assert_eq!(state.rasterization.line_width, 1.0);
        assert_eq!(state.depth_stencil.depth_test_enable, vk::TRUE);
        assert_eq!(state.depth_stencil.depth_compare_op, vk::CompareOp::LESS_OR_EQUAL);
        assert_eq!(state.depth_stencil.stencil_test_enable, vk::FALSE);
        assert_eq!(state.blend_attachments[0].blend_enable, vk::FALSE);
        assert_eq!(state.blend_attachments[0].color_write_mask, vk::ColorComponentFlags::RGBA);
        assert!(state.dynamic_states.contains(&vk::DynamicState::VIEWPORT));
        assert!(state.dynamic_states.contains(&vk::DynamicState::SCISSOR));
    }

    #[test]
    fn framebuffer_matches_extent_with_one_layer() {
        let attachments = [vk::ImageView::from_raw(10), vk::ImageView::from_raw(11)];
        for (width, height) in [(500, 500), (64, 4096), (1, 1)] {
            let info = framebuffer_info(
                vk::RenderPass::from_raw(3),
                &attachments,
                vk::Extent2D { width, height },
            );
            assert_eq!((info.width, info.height, info.layers), (width, height, 1));
            assert_eq!(info.attachment_count, 2);
        }
    }
}
