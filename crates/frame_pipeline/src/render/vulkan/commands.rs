//! Command buffer management
//!
//! Pool, recorder, render pass scope guard and blocking one-time submission.

use ash::{vk, Device};
use std::ops::{Deref, DerefMut};

use super::context::LogicalDevice;
use super::error::{ResultExt, VulkanError, VulkanResult};
use super::handle::impl_device_object;

/// Command pool wrapper with RAII cleanup
pub struct CommandPool {
    device: Device,
    command_pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a pool whose buffers can be reset individually
    pub fn new(device: &LogicalDevice, queue_family_index: u32) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let command_pool = unsafe { device.raw().create_command_pool(&pool_create_info, None) }
            .context("command pool creation")?;

        Ok(Self {
            device: device.raw().clone(),
            command_pool,
        })
    }

    /// Allocate primary command buffers
    pub fn allocate(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device.allocate_command_buffers(&alloc_info) }.context("command buffer allocation")
    }

    /// Return command buffers to the pool
    pub fn free(&self, command_buffers: &[vk::CommandBuffer]) {
        if !command_buffers.is_empty() {
            unsafe {
                self.device
                    .free_command_buffers(self.command_pool, command_buffers);
            }
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            // Destroying the pool frees every buffer allocated from it
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

impl_device_object!(CommandPool, vk::CommandPool, command_pool);

/// Command buffer recorder that tracks its recording state
pub struct CommandRecorder {
    device: Device,
    command_buffer: vk::CommandBuffer,
    recording: bool,
    in_render_pass: bool,
}

impl CommandRecorder {
    /// Wrap an allocated command buffer; nothing is recorded yet
    pub fn new(device: &Device, command_buffer: vk::CommandBuffer) -> Self {
        Self {
            device: device.clone(),
            command_buffer,
            recording: false,
            in_render_pass: false,
        }
    }

    /// Reset the buffer to the initial state
    ///
    /// Only valid once the fence guarding its last submission has signaled.
    pub fn reset(&mut self) -> VulkanResult<()> {
        if self.recording {
            return Err(VulkanError::usage("cannot reset a command buffer while recording"));
        }
        unsafe {
            self.device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
        }
        .context("command buffer reset")
    }

    /// Begin command recording
    pub fn begin(&mut self, flags: vk::CommandBufferUsageFlags) -> VulkanResult<()> {
        if self.recording {
            return Err(VulkanError::usage("command buffer already recording"));
        }

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);
        unsafe { self.device.begin_command_buffer(self.command_buffer, &begin_info) }
            .context("command buffer begin")?;

        self.recording = true;
        Ok(())
    }

    /// End command recording
    pub fn end(&mut self) -> VulkanResult<()> {
        if !self.recording {
            return Err(VulkanError::usage("command buffer not recording"));
        }
        if self.in_render_pass {
            return Err(VulkanError::usage("render pass still open"));
        }

        unsafe { self.device.end_command_buffer(self.command_buffer) }.context("command buffer end")?;

        self.recording = false;
        Ok(())
    }

    /// Begin a render pass; it ends when the returned guard is dropped
    pub fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
    ) -> VulkanResult<ActiveRenderPass<'_>> {
        if !self.recording {
            return Err(VulkanError::usage("command buffer not recording"));
        }
        if self.in_render_pass {
            return Err(VulkanError::usage("render pass already open"));
        }

        let render_pass_begin = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(clear_values);

        unsafe {
            self.device.cmd_begin_render_pass(
                self.command_buffer,
                &render_pass_begin,
                vk::SubpassContents::INLINE,
            );
        }
        self.in_render_pass = true;

        Ok(ActiveRenderPass { recorder: self })
    }

    /// Bind graphics pipeline
    pub fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(self.command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    /// Bind vertex buffers
    pub fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.command_buffer, first_binding, buffers, offsets);
        }
    }

    /// Bind index buffer
    pub fn bind_index_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(self.command_buffer, buffer, offset, index_type);
        }
    }

    /// Bind descriptor sets for the graphics bind point
    pub fn bind_descriptor_sets(&mut self, layout: vk::PipelineLayout, first_set: u32, sets: &[vk::DescriptorSet]) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                first_set,
                sets,
                &[],
            );
        }
    }

    /// Draw indexed
    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32, first_index: u32, vertex_offset: i32, first_instance: u32) {
        unsafe {
            self.device.cmd_draw_indexed(
                self.command_buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    /// Set viewport 0
    pub fn set_viewport(&mut self, viewport: vk::Viewport) {
        unsafe {
            self.device.cmd_set_viewport(self.command_buffer, 0, &[viewport]);
        }
    }

    /// Set scissor 0
    pub fn set_scissor(&mut self, scissor: vk::Rect2D) {
        unsafe {
            self.device.cmd_set_scissor(self.command_buffer, 0, &[scissor]);
        }
    }

    /// Copy between buffers
    pub fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device.cmd_copy_buffer(self.command_buffer, src, dst, regions);
        }
    }

    /// Copy a buffer into an image in TRANSFER_DST_OPTIMAL layout
    pub fn copy_buffer_to_image(&mut self, src: vk::Buffer, dst: vk::Image, regions: &[vk::BufferImageCopy]) {
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                self.command_buffer,
                src,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions,
            );
        }
    }

    /// Record a single image memory barrier
    pub fn image_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: vk::ImageMemoryBarrier,
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }
}

impl_device_object!(CommandRecorder, vk::CommandBuffer, command_buffer);

/// Open render pass scope
///
/// Dereferences to the recorder for draw commands and ends the pass on drop.
pub struct ActiveRenderPass<'a> {
    recorder: &'a mut CommandRecorder,
}

impl Deref for ActiveRenderPass<'_> {
    type Target = CommandRecorder;

    fn deref(&self) -> &CommandRecorder {
        self.recorder
    }
}

impl DerefMut for ActiveRenderPass<'_> {
    fn deref_mut(&mut self) -> &mut CommandRecorder {
        self.recorder
    }
}

impl Drop for ActiveRenderPass<'_> {
    fn drop(&mut self) {
        unsafe {
            self.recorder
                .device
                .cmd_end_render_pass(self.recorder.command_buffer);
        }
        self.recorder.in_render_pass = false;
    }
}

/// Frees a transient command buffer on every exit path
struct TransientBuffer<'a> {
    pool: &'a CommandPool,
    command_buffer: vk::CommandBuffer,
}

impl Drop for TransientBuffer<'_> {
    fn drop(&mut self) {
        self.pool.free(&[self.command_buffer]);
    }
}

/// Record commands into a fresh buffer, submit them and block until `queue` is idle
///
/// For startup uploads and layout transitions only; the wait stalls the queue.
pub fn one_time_submit<F>(device: &LogicalDevice, pool: &CommandPool, queue: vk::Queue, record: F) -> VulkanResult<()>
where
    F: FnOnce(&mut CommandRecorder) -> VulkanResult<()>,
{
    let command_buffer = pool
        .allocate(1)?
        .into_iter()
        .next()
        .ok_or_else(|| VulkanError::usage("driver returned no command buffer"))?;
    let transient = TransientBuffer { pool, command_buffer };

    let mut recorder = CommandRecorder::new(device.raw(), transient.command_buffer);
    recorder.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
    record(&mut recorder)?;
    recorder.end()?;

    let command_buffers = [transient.command_buffer];
    let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

    unsafe {
        device
            .raw()
            .queue_submit(queue, &[submit_info.build()], vk::Fence::null())
            .context("one-time submit")?;
        device.raw().queue_wait_idle(queue).context("one-time submit wait")?;
    }

    Ok(())
}
