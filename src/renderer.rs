// =============================================================================
// RENDERER - the cube scene on top of the graphics context
// =============================================================================
//
// FrameResources is the single value holding everything the application
// creates: depth buffer, pipeline state, descriptor pool and the per-image
// framebuffers/descriptor sets. It is built once per swapchain generation and
// passed by reference to recording and teardown.

use anyhow::{Context, Result};
use ash::vk;

use crate::backend::commands::{record_cube, DeviceRecorder, DrawParams, ImageTarget};
use crate::backend::depth::DepthBuffer;
use crate::backend::pipeline::{self, PipelineState};
use crate::backend::{AcquiredImage, ContextSettings, GraphicsContext};
use crate::config::Config;
use crate::frame_loop::FrameTarget;
use crate::window::Platform;

pub struct FrameResources {
    pub depth: DepthBuffer,
    pub pipeline: PipelineState,
    pub descriptor_pool: vk::DescriptorPool,
    /// Framebuffer and descriptor set of each swapchain image, in image order
    pub targets: Vec<ImageTarget>,
    pub extent: vk::Extent2D,
}

impl FrameResources {
    /// Create every fixed object for the context's current swapchain.
    ///
    /// Nothing is left behind when a step fails.
    pub fn new(context: &GraphicsContext, config: &Config) -> Result<Self> {
        let device = context.device();
        let extent = context.extent();

        let depth = DepthBuffer::new(device, extent).context("Failed to create depth buffer")?;

        let pipeline = match PipelineState::new(
            device,
            context.format(),
            depth.format,
            &config.vertex_shader_path(),
            &config.fragment_shader_path(),
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                depth.destroy(&device.device);
                return Err(e.context("Failed to create graphics pipeline"));
            }
        };

        let mut resources = Self {
            depth,
            pipeline,
            descriptor_pool: vk::DescriptorPool::null(),
            targets: Vec::new(),
            extent,
        };
        if let Err(e) = resources.create_targets(context) {
            resources.destroy(&device.device);
            return Err(e);
        }

        log::info!(
            "Prepared frame resources for {} images at {}x{}",
            resources.targets.len(),
            extent.width,
            extent.height
        );
        log::debug!(
            "Depth buffer: {} bytes in memory type {}",
            resources.depth.allocation.size,
            resources.depth.allocation.memory_type_index
        );
        Ok(resources)
    }

    fn create_targets(&mut self, context: &GraphicsContext) -> Result<()> {
        let device = context.device();
        let images = context.images();

        self.descriptor_pool = pipeline::create_descriptor_pool(device, images.len() as u32)?;
        let descriptor_sets = pipeline::allocate_descriptor_sets(
            device,
            self.descriptor_pool,
            self.pipeline.descriptor_set_layout,
            images.len(),
        )?;

        let views: Vec<vk::ImageView> = images.iter().map(|image| image.view).collect();
        let framebuffers = pipeline::create_framebuffers(
            device,
            &views,
            self.depth.view,
            self.pipeline.render_pass,
            self.extent,
        )?;

        self.targets = images
            .iter()
            .zip(framebuffers)
            .zip(descriptor_sets)
            .map(|((image, framebuffer), descriptor_set)| ImageTarget {
                image: image.image,
                framebuffer,
                descriptor_set,
            })
            .collect();
        Ok(())
    }

    /// Record the cube command buffer of every swapchain image.
    pub fn record(&self, context: &GraphicsContext, clear_color: [f32; 4]) -> Result<()> {
        let params = DrawParams {
            render_pass: self.pipeline.render_pass,
            pipeline: self.pipeline.pipeline,
            pipeline_layout: self.pipeline.pipeline_layout,
            extent: self.extent,
            clear_color,
            queue_families: context.queue_families(),
        };

        for (image, target) in context.images().iter().zip(&self.targets) {
            let mut recorder = DeviceRecorder::new(&context.device().device, image.command_buffer);
            record_cube(&mut recorder, &params, target)?;
        }

        log::info!("Recorded {} command buffers", self.targets.len());
        Ok(())
    }

    /// Destroy everything in reverse creation order. The device must be idle.
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            for target in &self.targets {
                device.destroy_framebuffer(target.framebuffer, None);
            }
            // Frees the descriptor sets as well; a null pool is ignored
            device.destroy_descriptor_pool(self.descriptor_pool, None);
        }
        self.pipeline.destroy(device);
        self.depth.destroy(device);
    }
}

pub struct Renderer {
    context: GraphicsContext,
    resources: Option<FrameResources>,
    config: Config,
}

impl Renderer {
    pub fn new(config: Config, platform: &Platform) -> Result<Self> {
        let settings = ContextSettings {
            app_name: config.window.title.clone(),
            validation: config.debug.validation_layers,
            dimensions: config.swapchain_dimensions(),
            present_mode: config.get_present_mode(),
            frames_in_flight: config.graphics.frames_in_flight,
        };

        let (display_handle, window_handle) = platform.raw_handles();
        let context = GraphicsContext::new(settings, display_handle, window_handle)?;

        let mut renderer = Self {
            context,
            resources: None,
            config,
        };
        renderer.prepare()?;
        Ok(renderer)
    }

    /// Build frame resources and record the command buffers once.
    fn prepare(&mut self) -> Result<()> {
        let resources = FrameResources::new(&self.context, &self.config)?;
        // Stored before recording so a recording failure still gets cleaned up
        let resources = self.resources.insert(resources);
        resources.record(&self.context, self.config.graphics.clear_color)
    }

    /// Wait for the GPU, then destroy the frame resources if any exist.
    fn destroy_resources(&mut self) -> Result<()> {
        let Some(resources) = self.resources.take() else {
            return Ok(());
        };
        let idle = self.context.wait_idle();
        resources.destroy(&self.context.device().device);
        idle
    }

    fn rebuild(&mut self) -> Result<()> {
        self.destroy_resources()?;
        self.context.recreate_swapchain()?;
        self.prepare()
    }
}

impl FrameTarget for Renderer {
    fn acquire_next_image(&mut self) -> Result<AcquiredImage> {
        let acquired = self.context.acquire_next_image()?;
        if acquired == AcquiredImage::Outdated {
            self.rebuild()
                .context("Failed to rebuild resources for the new swapchain")?;
        }
        Ok(acquired)
    }

    fn present_image(&mut self, index: u32) -> Result<()> {
        self.context.present_image(index)
    }

    fn shutdown(mut self) {
        if let Err(e) = self.destroy_resources() {
            log::error!("Device did not go idle before teardown: {:#}", e);
        }
        log::info!("Application resources destroyed");
        // Dropping self tears down the graphics context
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // Error paths skip `shutdown`; don't leak the frame resources there
        let _ = self.destroy_resources();
    }
}
