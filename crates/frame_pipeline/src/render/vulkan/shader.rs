//! Shader modules and the graphics pipeline

use ash::{vk, Device};
use std::ffi::CStr;
use std::fs::File;
use std::path::Path;

use super::context::LogicalDevice;
use super::error::{ResultExt, VulkanError, VulkanResult};
use super::handle::impl_device_object;

const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Read a SPIR-V binary into correctly aligned words
pub fn load_spirv(path: impl AsRef<Path>) -> VulkanResult<Vec<u32>> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|e| {
        std::io::Error::new(e.kind(), format!("failed to open shader {}: {e}", path.display()))
    })?;
    let words = ash::util::read_spv(&mut file)?;
    log::debug!("Loaded shader {} ({} words)", path.display(), words.len());
    Ok(words)
}

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create a shader module from SPIR-V words
    pub fn from_spirv(device: &LogicalDevice, code: &[u32]) -> VulkanResult<Self> {
        if code.is_empty() {
            return Err(VulkanError::usage("empty SPIR-V module"));
        }

        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);
        let module = unsafe { device.raw().create_shader_module(&create_info, None) }
            .context("shader module creation")?;

        Ok(Self {
            device: device.raw().clone(),
            module,
        })
    }

    /// Load a SPIR-V file and create a module from it
    pub fn from_file(device: &LogicalDevice, path: impl AsRef<Path>) -> VulkanResult<Self> {
        Self::from_spirv(device, &load_spirv(path)?)
    }

    /// Stage description using the `main` entry point
    pub fn stage_info(&self, stage: vk::ShaderStageFlags) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

impl_device_object!(ShaderModule, vk::ShaderModule, module);

/// Fixed-function inputs that vary between pipelines
pub struct PipelineDesc<'a> {
    /// Vertex buffer bindings
    pub vertex_bindings: &'a [vk::VertexInputBindingDescription],
    /// Vertex attributes
    pub vertex_attributes: &'a [vk::VertexInputAttributeDescription],
    /// Descriptor set layouts in set order
    pub set_layouts: &'a [vk::DescriptorSetLayout],
}

/// Graphics pipeline and its layout, destroyed together
pub struct GraphicsPipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Triangle-list pipeline with depth testing, back-face culling and dynamic viewport/scissor
    pub fn new(
        device: &LogicalDevice,
        render_pass: vk::RenderPass,
        vertex_shader: &ShaderModule,
        fragment_shader: &ShaderModule,
        desc: &PipelineDesc<'_>,
    ) -> VulkanResult<Self> {
        let raw = device.raw();

        let shader_stages = [
            vertex_shader.stage_info(vk::ShaderStageFlags::VERTEX),
            fragment_shader.stage_info(vk::ShaderStageFlags::FRAGMENT),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(desc.vertex_bindings)
            .vertex_attribute_descriptions(desc.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Counts only; the rectangles are set while recording
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(desc.set_layouts);
        let layout = unsafe { raw.create_pipeline_layout(&layout_info, None) }.context("pipeline layout creation")?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        let created = unsafe {
            raw.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
        };
        let pipeline = match created {
            Ok(pipelines) => pipelines.into_iter().next(),
            Err((_, result)) => {
                unsafe { raw.destroy_pipeline_layout(layout, None) };
                return Err(result).context("graphics pipeline creation");
            }
        };
        let Some(pipeline) = pipeline else {
            unsafe { raw.destroy_pipeline_layout(layout, None) };
            return Err(VulkanError::usage("driver returned no pipeline"));
        };

        Ok(Self {
            device: raw.clone(),
            pipeline,
            layout,
        })
    }

    /// Pipeline layout for descriptor binding
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

impl_device_object!(GraphicsPipeline, vk::Pipeline, pipeline);
