//! Vulkan renderer
//!
//! Owns every device object the demo scene needs and splits them into two
//! groups: objects created once at startup and the [`SurfaceObjects`] that
//! [`rebuild_swapchain`] replaces. A rebuild only gets mutable access to the
//! latter; startup resources are lent to it read-only. Per-frame work is
//! driven by [`FrameLoop`](super::FrameLoop) through a short-lived
//! [`FrameContext`].
//!
//! Field order is destruction order: surface-dependent objects first, then
//! frame slots and startup resources, then the device, surface and instance.

use std::mem::size_of;
use std::time::Instant;

use ash::vk;

use crate::assets::ImageData;
use crate::config::AppConfig;
use crate::render::scene::{UniformBufferObject, Vertex, INDICES, VERTICES};

use super::buffer::{Buffer, HOST_VISIBLE_COHERENT};
use super::commands::{CommandPool, CommandRecorder};
use super::context::{LogicalDevice, MessageStats, PhysicalDeviceInfo, VulkanInstance};
use super::descriptor_set::{DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorSetWriter};
use super::error::{ResultExt, VulkanError, VulkanResult};
use super::frame::FrameDevice;
use super::framebuffer::Framebuffer;
use super::handle::DeviceObject;
use super::image::{find_depth_format, DepthBuffer};
use super::rebuild::{rebuild_swapchain, RebuildTarget};
use super::render_pass::RenderPass;
use super::shader::{load_spirv, GraphicsPipeline, PipelineDesc, ShaderModule};
use super::surface::Surface;
use super::swapchain::{AcquireStatus, PresentStatus, Swapchain};
use super::sync::FrameSync;
use super::texture::Texture;
use super::window::Window;

/// Resources owned exclusively by one frame slot
struct FrameSlot {
    /// Freed with the descriptor pool
    descriptor_set: vk::DescriptorSet,
    uniform_buffer: Buffer,
    /// Freed with the command pool
    command_buffer: vk::CommandBuffer,
    sync: FrameSync,
}

/// Swapchain images are only ever rendered to
const SWAPCHAIN_IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::COLOR_ATTACHMENT;

/// Everything whose size or format follows the surface
///
/// Declared in destruction order.
#[derive(Default)]
struct SurfaceObjects {
    depth_buffer: Option<DepthBuffer>,
    framebuffers: Vec<Framebuffer>,
    pipeline: Option<GraphicsPipeline>,
    render_pass: Option<RenderPass>,
    swapchain: Option<Swapchain>,
}

/// Startup resources the surface objects are built from
struct SurfaceInputs<'a> {
    device: &'a LogicalDevice,
    surface: &'a Surface,
    command_pool: &'a CommandPool,
    descriptor_set_layout: &'a DescriptorSetLayout,
    vertex_spirv: &'a [u32],
    fragment_spirv: &'a [u32],
    depth_format: vk::Format,
}

impl SurfaceObjects {
    fn swapchain(&self) -> VulkanResult<&Swapchain> {
        self.swapchain
            .as_ref()
            .ok_or_else(|| VulkanError::usage("swapchain not created"))
    }

    fn render_pass(&self) -> VulkanResult<&RenderPass> {
        self.render_pass
            .as_ref()
            .ok_or_else(|| VulkanError::usage("render pass not created"))
    }

    fn pipeline(&self) -> VulkanResult<&GraphicsPipeline> {
        self.pipeline
            .as_ref()
            .ok_or_else(|| VulkanError::usage("pipeline not created"))
    }

    fn framebuffer(&self, image_index: u32) -> VulkanResult<&Framebuffer> {
        self.framebuffers
            .get(image_index as usize)
            .ok_or_else(|| VulkanError::usage(format!("no framebuffer for image {image_index}")))
    }

    fn create_all(&mut self, inputs: &SurfaceInputs<'_>, extent: vk::Extent2D) -> VulkanResult<()> {
        self.create_swapchain(inputs, extent)?;
        self.create_render_pass(inputs)?;
        self.create_pipeline(inputs)?;
        self.create_depth_buffer(inputs)?;
        self.create_framebuffers(inputs)
    }

    fn create_swapchain(&mut self, inputs: &SurfaceInputs<'_>, extent: vk::Extent2D) -> VulkanResult<()> {
        let swapchain = Swapchain::new(
            inputs.device,
            inputs.surface,
            extent,
            SWAPCHAIN_IMAGE_USAGE,
            vk::SwapchainKHR::null(),
        )?;
        log::info!(
            "Swapchain {}x{} presenting with {:?}",
            swapchain.extent().width,
            swapchain.extent().height,
            swapchain.present_mode()
        );
        self.swapchain = Some(swapchain);
        Ok(())
    }

    fn create_render_pass(&mut self, inputs: &SurfaceInputs<'_>) -> VulkanResult<()> {
        let color_format = self.swapchain()?.format().format;
        self.render_pass = Some(RenderPass::new_forward_pass(inputs.device, color_format, inputs.depth_format)?);
        Ok(())
    }

    fn create_pipeline(&mut self, inputs: &SurfaceInputs<'_>) -> VulkanResult<()> {
        let render_pass = self.render_pass()?.raw_handle();

        // Modules are only needed while the pipeline is built
        let vertex_shader = ShaderModule::from_spirv(inputs.device, inputs.vertex_spirv)?;
        let fragment_shader = ShaderModule::from_spirv(inputs.device, inputs.fragment_spirv)?;

        let bindings = [Vertex::binding_description()];
        let attributes = Vertex::attribute_descriptions();
        let set_layouts = [inputs.descriptor_set_layout.raw_handle()];
        let desc = PipelineDesc {
            vertex_bindings: &bindings,
            vertex_attributes: &attributes,
            set_layouts: &set_layouts,
        };

        self.pipeline = Some(GraphicsPipeline::new(
            inputs.device,
            render_pass,
            &vertex_shader,
            &fragment_shader,
            &desc,
        )?);
        Ok(())
    }

    fn create_depth_buffer(&mut self, inputs: &SurfaceInputs<'_>) -> VulkanResult<()> {
        let extent = self.swapchain()?.extent();
        self.depth_buffer = Some(DepthBuffer::new(
            inputs.device,
            inputs.command_pool,
            inputs.depth_format,
            extent,
        )?);
        Ok(())
    }

    fn create_framebuffers(&mut self, inputs: &SurfaceInputs<'_>) -> VulkanResult<()> {
        let swapchain = self.swapchain()?;
        let render_pass = self.render_pass()?.raw_handle();
        let depth_view = self
            .depth_buffer
            .as_ref()
            .ok_or_else(|| VulkanError::usage("depth buffer not created"))?
            .view()
            .raw_handle();
        let extent = swapchain.extent();

        let framebuffers = swapchain
            .image_views()
            .iter()
            .map(|view| Framebuffer::new(inputs.device, render_pass, &[view.raw_handle(), depth_view], extent))
            .collect::<VulkanResult<Vec<_>>>()?;

        self.framebuffers = framebuffers;
        Ok(())
    }

    fn destroy_swapchain(&mut self) {
        if let Some(mut swapchain) = self.swapchain.take() {
            swapchain.clear();
        }
    }

    fn destroy_all(&mut self) {
        self.depth_buffer = None;
        self.framebuffers.clear();
        self.pipeline = None;
        self.render_pass = None;
        self.destroy_swapchain();
    }
}

/// Renderer for the textured two-quad scene
pub struct VulkanRenderer {
    // Replaced by every rebuild
    surface_objects: SurfaceObjects,

    // Created once
    frames: Vec<FrameSlot>,
    descriptor_pool: DescriptorPool,
    descriptor_set_layout: DescriptorSetLayout,
    texture: Texture,
    index_buffer: Buffer,
    vertex_buffer: Buffer,
    command_pool: CommandPool,
    vertex_spirv: Vec<u32>,
    fragment_spirv: Vec<u32>,
    depth_format: vk::Format,
    clear_color: [f32; 4],
    start: Instant,

    device: LogicalDevice,
    surface: Surface,
    instance: VulkanInstance,
}

impl VulkanRenderer {
    /// Bring up the device, upload scene resources and build the initial swapchain
    pub fn new(window: &mut Window, config: &AppConfig) -> VulkanResult<Self> {
        log::debug!("Creating VulkanRenderer...");
        let renderer_config = &config.renderer;

        let extensions = window.required_instance_extensions()?;
        let instance = VulkanInstance::new(
            &renderer_config.application_name,
            &extensions,
            renderer_config.enable_validation,
        )?;
        let surface = Surface::new(&instance, window)?;

        let info = PhysicalDeviceInfo::select(instance.instance(), &surface)?;
        log::info!("Selected physical device: {}", info.name());
        let device = LogicalDevice::new(instance.instance(), &info)?;

        let command_pool = CommandPool::new(&device, device.graphics_family())?;
        let depth_format = find_depth_format(&device)?;
        log::debug!("Depth format: {:?}", depth_format);

        let vertex_spirv = load_spirv(config.assets.vertex_shader_path())?;
        let fragment_spirv = load_spirv(config.assets.fragment_shader_path())?;

        let vertex_buffer = Buffer::device_local_with_data(
            &device,
            &command_pool,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(&VERTICES),
        )?;
        let index_buffer = Buffer::device_local_with_data(
            &device,
            &command_pool,
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(&INDICES),
        )?;

        let image_data = load_texture_data(config)?;
        let texture = Texture::from_image_data(
            &device,
            &command_pool,
            &image_data,
            renderer_config.force_texture_staging,
        )?;

        let frame_count = renderer_config.max_frames_in_flight.max(1);
        let descriptor_set_layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .add_combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT)
            .build(&device)?;
        let descriptor_pool = DescriptorPool::for_layout(&device, &descriptor_set_layout, frame_count as u32)?;
        let frames = create_frame_slots(&device, &command_pool, &descriptor_pool, &descriptor_set_layout, &texture, frame_count)?;

        let mut renderer = Self {
            surface_objects: SurfaceObjects::default(),
            frames,
            descriptor_pool,
            descriptor_set_layout,
            texture,
            index_buffer,
            vertex_buffer,
            command_pool,
            vertex_spirv,
            fragment_spirv,
            depth_format,
            clear_color: renderer_config.clear_color,
            start: Instant::now(),
            device,
            surface,
            instance,
        };

        let (width, height) = window.framebuffer_size();
        let (objects, inputs) = renderer.split_surface();
        objects.create_all(&inputs, vk::Extent2D { width, height })?;

        log::debug!("VulkanRenderer initialization complete");
        Ok(renderer)
    }

    /// Borrow the renderer and window together for one frame or rebuild
    pub fn frame_context<'a>(&'a mut self, window: &'a mut Window) -> FrameContext<'a> {
        FrameContext { renderer: self, window }
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Current swapchain extent, if a swapchain exists
    pub fn swapchain_extent(&self) -> Option<vk::Extent2D> {
        self.surface_objects.swapchain.as_ref().map(Swapchain::extent)
    }

    /// The logical device
    pub fn device(&self) -> &LogicalDevice {
        &self.device
    }

    /// Validation message counters, when validation is enabled
    pub fn message_stats(&self) -> Option<&MessageStats> {
        self.instance.debug_messenger().map(|messenger| messenger.stats())
    }

    /// Wait for device to be idle
    pub fn wait_idle(&self) -> VulkanResult<()> {
        self.device.wait_idle()
    }

    /// Surface objects, mutable, next to the startup resources they are built from
    fn split_surface(&mut self) -> (&mut SurfaceObjects, SurfaceInputs<'_>) {
        let inputs = SurfaceInputs {
            device: &self.device,
            surface: &self.surface,
            command_pool: &self.command_pool,
            descriptor_set_layout: &self.descriptor_set_layout,
            vertex_spirv: &self.vertex_spirv,
            fragment_spirv: &self.fragment_spirv,
            depth_format: self.depth_format,
        };
        (&mut self.surface_objects, inputs)
    }

    fn frame(&self, slot: usize) -> VulkanResult<&FrameSlot> {
        self.frames
            .get(slot)
            .ok_or_else(|| VulkanError::usage(format!("frame slot {slot} out of range")))
    }

    fn record_commands(&self, slot: usize, image_index: u32) -> VulkanResult<()> {
        let frame = self.frame(slot)?;
        let objects = &self.surface_objects;
        let pipeline = objects.pipeline()?;
        let render_pass = objects.render_pass()?.raw_handle();
        let extent = objects.swapchain()?.extent();
        let framebuffer = objects.framebuffer(image_index)?;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        ];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        let mut recorder = CommandRecorder::new(self.device.raw(), frame.command_buffer);
        recorder.reset()?;
        recorder.begin(vk::CommandBufferUsageFlags::empty())?;
        {
            let mut pass = recorder.begin_render_pass(render_pass, framebuffer.raw_handle(), render_area, &clear_values)?;
            pass.bind_pipeline(pipeline.raw_handle());
            pass.set_viewport(vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            });
            pass.set_scissor(render_area);
            pass.bind_vertex_buffers(0, &[self.vertex_buffer.raw_handle()], &[0]);
            pass.bind_index_buffer(self.index_buffer.raw_handle(), 0, vk::IndexType::UINT16);
            pass.bind_descriptor_sets(pipeline.layout(), 0, &[frame.descriptor_set]);
            pass.draw_indexed(INDICES.len() as u32, 1, 0, 0, 0);
        }
        recorder.end()
    }

    fn update_uniforms(&mut self, slot: usize) -> VulkanResult<()> {
        let extent = self.surface_objects.swapchain()?.extent();
        let ubo = UniformBufferObject::at_time(self.start.elapsed().as_secs_f32(), extent);
        let frame = self
            .frames
            .get_mut(slot)
            .ok_or_else(|| VulkanError::usage(format!("frame slot {slot} out of range")))?;
        frame.uniform_buffer.upload_direct(bytemuck::bytes_of(&ubo))?;
        Ok(())
    }

    fn submit(&self, slot: usize) -> VulkanResult<()> {
        let frame = self.frame(slot)?;
        let wait_semaphores = [frame.sync.image_available.raw_handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.command_buffer];
        let signal_semaphores = [frame.sync.render_finished.raw_handle()];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.raw().queue_submit(
                self.device.graphics_queue(),
                &[submit_info.build()],
                frame.sync.in_flight.raw_handle(),
            )
        }
        .context("frame submit")
    }

    /// Wait on the slot's image-available semaphore without doing any work
    fn consume_image_available(&self, slot: usize) -> VulkanResult<()> {
        let frame = self.frame(slot)?;
        let wait_semaphores = [frame.sync.image_available.raw_handle()];
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages);

        unsafe {
            self.device
                .raw()
                .queue_submit(self.device.graphics_queue(), &[submit_info.build()], vk::Fence::null())
        }
        .context("acquired image release")
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        log::debug!("Cleaning up VulkanRenderer...");
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device wait before cleanup failed: {}", e);
        }

        if let Some(stats) = self.message_stats() {
            log::info!(
                "Validation reported {} errors and {} warnings",
                stats.errors(),
                stats.warnings()
            );
        }

        self.surface_objects.destroy_all();
        log::debug!("VulkanRenderer surface objects released");
    }
}

fn create_frame_slots(
    device: &LogicalDevice,
    command_pool: &CommandPool,
    descriptor_pool: &DescriptorPool,
    layout: &DescriptorSetLayout,
    texture: &Texture,
    count: usize,
) -> VulkanResult<Vec<FrameSlot>> {
    log::debug!("Creating {} frame slots...", count);

    let command_buffers = command_pool.allocate(count as u32)?;
    let descriptor_sets = descriptor_pool.allocate(&vec![layout.raw_handle(); count])?;
    let ubo_size = size_of::<UniformBufferObject>() as vk::DeviceSize;

    let frames = command_buffers
        .into_iter()
        .zip(descriptor_sets)
        .map(|(command_buffer, descriptor_set)| {
            Ok(FrameSlot {
                descriptor_set,
                uniform_buffer: Buffer::new(device, ubo_size, vk::BufferUsageFlags::UNIFORM_BUFFER, HOST_VISIBLE_COHERENT)?,
                command_buffer,
                sync: FrameSync::new(device)?,
            })
        })
        .collect::<VulkanResult<Vec<_>>>()?;

    frames
        .iter()
        .fold(DescriptorSetWriter::new(), |writer, frame| {
            writer
                .write_uniform_buffer(frame.descriptor_set, 0, frame.uniform_buffer.raw_handle(), ubo_size)
                .write_combined_image_sampler(
                    frame.descriptor_set,
                    1,
                    texture.view().raw_handle(),
                    texture.sampler().raw_handle(),
                )
        })
        .update(device);

    Ok(frames)
}

fn load_texture_data(config: &AppConfig) -> VulkanResult<ImageData> {
    let path = config.assets.texture_path();
    if !path.exists() {
        log::warn!("Texture {} not found, using a white placeholder", path.display());
        return Ok(ImageData::solid_color(1, 1, [255, 255, 255, 255]));
    }
    Ok(ImageData::from_file(&path)?)
}

/// Renderer and window borrowed together for the duration of one frame
pub struct FrameContext<'a> {
    renderer: &'a mut VulkanRenderer,
    window: &'a mut Window,
}

impl FrameDevice for FrameContext<'_> {
    fn wait_for_slot(&mut self, slot: usize, timeout_ns: u64) -> VulkanResult<bool> {
        self.renderer.frame(slot)?.sync.in_flight.wait(timeout_ns)
    }

    fn acquire_image(&mut self, slot: usize) -> VulkanResult<AcquireStatus> {
        let semaphore = self.renderer.frame(slot)?.sync.image_available.raw_handle();
        self.renderer
            .surface_objects
            .swapchain()?
            .acquire_next_image(u64::MAX, semaphore, vk::Fence::null())
    }

    fn release_acquired_image(&mut self, slot: usize) -> VulkanResult<()> {
        self.renderer.consume_image_available(slot)
    }

    fn rebuild_swapchain(&mut self) -> VulkanResult<()> {
        let (objects, inputs) = self.renderer.split_surface();
        let mut target = SurfaceRebuild {
            objects,
            inputs,
            window: &mut *self.window,
        };
        rebuild_swapchain(&mut target).map(|_| ())
    }

    fn reset_slot_fence(&mut self, slot: usize) -> VulkanResult<()> {
        self.renderer.frame(slot)?.sync.in_flight.reset()
    }

    fn record_commands(&mut self, slot: usize, image_index: u32) -> VulkanResult<()> {
        self.renderer.record_commands(slot, image_index)
    }

    fn update_uniforms(&mut self, slot: usize) -> VulkanResult<()> {
        self.renderer.update_uniforms(slot)
    }

    fn submit(&mut self, slot: usize) -> VulkanResult<()> {
        self.renderer.submit(slot)
    }

    fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<PresentStatus> {
        let semaphore = self.renderer.frame(slot)?.sync.render_finished.raw_handle();
        self.renderer
            .surface_objects
            .swapchain()?
            .present(self.renderer.device.present_queue(), &[semaphore], image_index)
    }
}

/// Mutable surface objects plus read-only startup resources, for one rebuild
struct SurfaceRebuild<'a> {
    objects: &'a mut SurfaceObjects,
    inputs: SurfaceInputs<'a>,
    window: &'a mut Window,
}

impl RebuildTarget for SurfaceRebuild<'_> {
    fn drawable_extent(&mut self) -> vk::Extent2D {
        let (width, height) = self.window.framebuffer_size();
        vk::Extent2D { width, height }
    }

    fn pump_events(&mut self) -> bool {
        self.window.poll_events();
        !self.window.should_close()
    }

    fn wait_device_idle(&mut self) -> VulkanResult<()> {
        self.inputs.device.wait_idle()
    }

    fn destroy_depth_buffer(&mut self) {
        self.objects.depth_buffer = None;
    }

    fn destroy_framebuffers(&mut self) {
        self.objects.framebuffers.clear();
    }

    fn destroy_pipeline(&mut self) {
        self.objects.pipeline = None;
    }

    fn destroy_render_pass(&mut self) {
        self.objects.render_pass = None;
    }

    fn destroy_swapchain(&mut self) {
        self.objects.destroy_swapchain();
    }

    fn create_swapchain(&mut self, extent: vk::Extent2D) -> VulkanResult<()> {
        self.objects.create_swapchain(&self.inputs, extent)
    }

    fn create_render_pass(&mut self) -> VulkanResult<()> {
        self.objects.create_render_pass(&self.inputs)
    }

    fn create_pipeline(&mut self) -> VulkanResult<()> {
        self.objects.create_pipeline(&self.inputs)
    }

    fn create_depth_buffer(&mut self) -> VulkanResult<()> {
        self.objects.create_depth_buffer(&self.inputs)
    }

    fn create_framebuffers(&mut self) -> VulkanResult<()> {
        self.objects.create_framebuffers(&self.inputs)
    }

    fn discard_resize_events(&mut self) {
        if self.window.take_resize_event() {
            log::debug!("Dropped resize events already covered by the rebuild");
        }
    }
}
