//! Vulkan backend
//!
//! Every native object is owned by exactly one wrapper that destroys it in
//! `Drop`; raw handles are borrowed through [`DeviceObject::raw_handle`].

pub mod buffer;
pub mod commands;
pub mod context;
pub mod descriptor_set;
pub mod error;
pub mod frame;
pub mod framebuffer;
pub mod handle;
pub mod image;
pub mod memory;
pub mod rebuild;
pub mod render_pass;
pub mod renderer;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod window;

pub use buffer::Buffer;
pub use commands::{one_time_submit, ActiveRenderPass, CommandPool, CommandRecorder};
pub use context::{DebugMessenger, LogicalDevice, MessageStats, PhysicalDeviceInfo, QueueFamilyIndices, VulkanInstance};
pub use descriptor_set::{DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorSetWriter};
pub use error::{ResultExt, VulkanError, VulkanResult};
pub use frame::{FrameDevice, FrameLoop, FrameOutcome};
pub use framebuffer::Framebuffer;
pub use handle::DeviceObject;
pub use image::{DepthBuffer, Image, ImageDesc, ImageView, Sampler};
pub use memory::{find_memory_type, DeviceMemory};
pub use rebuild::{rebuild_swapchain, RebuildTarget};
pub use render_pass::RenderPass;
pub use renderer::{FrameContext, VulkanRenderer};
pub use shader::{GraphicsPipeline, PipelineDesc, ShaderModule};
pub use surface::Surface;
pub use swapchain::{AcquireStatus, PresentStatus, Swapchain};
pub use sync::{Fence, FrameSync, Semaphore};
pub use texture::Texture;
pub use window::{Window, WindowError};
