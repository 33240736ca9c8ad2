//! Framebuffer management

use ash::{vk, Device};

use super::context::LogicalDevice;
use super::error::{ResultExt, VulkanResult};
use super::handle::impl_device_object;

/// Framebuffer wrapper with RAII cleanup
pub struct Framebuffer {
    device: Device,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl Framebuffer {
    /// Create a single-layer framebuffer over `attachments`
    pub fn new(
        device: &LogicalDevice,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { device.raw().create_framebuffer(&create_info, None) }
            .context("framebuffer creation")?;

        Ok(Self {
            device: device.raw().clone(),
            framebuffer,
            extent,
        })
    }

    /// Size the framebuffer was created with
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}

impl_device_object!(Framebuffer, vk::Framebuffer, framebuffer);
