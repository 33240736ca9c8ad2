//! Presentation surface

use ash::extensions::khr::Surface as SurfaceLoader;
use ash::vk;

use super::context::VulkanInstance;
use super::error::{ResultExt, VulkanResult};
use super::handle::impl_device_object;
use super::window::Window;

/// Window surface with RAII cleanup
pub struct Surface {
    loader: SurfaceLoader,
    surface: vk::SurfaceKHR,
}

impl Surface {
    /// Create a surface for `window`
    pub fn new(instance: &VulkanInstance, window: &mut Window) -> VulkanResult<Self> {
        let loader = SurfaceLoader::new(instance.entry(), instance.instance());
        let surface = window.create_vulkan_surface(instance.instance().handle())?;
        log::debug!("Surface created");
        Ok(Self { loader, surface })
    }

    /// Current capabilities, re-queried on every call
    pub fn capabilities(&self, device: vk::PhysicalDevice) -> VulkanResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(device, self.surface)
        }
        .context("surface capabilities query")
    }

    /// Supported format and color space pairs
    pub fn formats(&self, device: vk::PhysicalDevice) -> VulkanResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_formats(device, self.surface)
        }
        .context("surface format query")
    }

    /// Supported present modes
    pub fn present_modes(&self, device: vk::PhysicalDevice) -> VulkanResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(device, self.surface)
        }
        .context("surface present mode query")
    }

    /// Whether `queue_family` on `device` can present to this surface
    pub fn supports_present(&self, device: vk::PhysicalDevice, queue_family: u32) -> VulkanResult<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(device, queue_family, self.surface)
        }
        .context("surface support query")
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}

impl_device_object!(Surface, vk::SurfaceKHR, surface);
