//! Vulkan synchronization primitives
//!
//! Semaphores order GPU work; fences let the CPU wait for it. One
//! [`FrameSync`] per frame slot bounds how far the CPU runs ahead.

use ash::{vk, Device};

use super::context::LogicalDevice;
use super::error::{ResultExt, VulkanResult};
use super::handle::impl_device_object;

/// Binary semaphore with RAII cleanup
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new semaphore
    pub fn new(device: &LogicalDevice) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe { device.raw().create_semaphore(&create_info, None) }
            .context("semaphore creation")?;

        Ok(Self {
            device: device.raw().clone(),
            semaphore,
        })
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

impl_device_object!(Semaphore, vk::Semaphore, semaphore);

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence, optionally already signaled
    pub fn new(device: &LogicalDevice, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { device.raw().create_fence(&create_info, None) }.context("fence creation")?;

        Ok(Self {
            device: device.raw().clone(),
            fence,
        })
    }

    /// Wait until signaled; `Ok(false)` means the timeout expired first
    pub fn wait(&self, timeout_ns: u64) -> VulkanResult<bool> {
        match unsafe { self.device.wait_for_fences(&[self.fence], true, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(result) => Err(result).context("fence wait"),
        }
    }

    /// Return to the unsignaled state
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe { self.device.reset_fences(&[self.fence]) }.context("fence reset")
    }

    /// Non-blocking status check
    pub fn is_signaled(&self) -> VulkanResult<bool> {
        unsafe { self.device.get_fence_status(self.fence) }.context("fence status")
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

impl_device_object!(Fence, vk::Fence, fence);

/// Synchronization objects owned by one frame slot
pub struct FrameSync {
    /// Signaled when the acquired swapchain image is ready
    pub image_available: Semaphore,
    /// Signaled when the slot's rendering finishes
    pub render_finished: Semaphore,
    /// Signaled when the slot's submission completes; created signaled
    pub in_flight: Fence,
}

impl FrameSync {
    /// Create frame synchronization objects
    pub fn new(device: &LogicalDevice) -> VulkanResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device)?,
            render_finished: Semaphore::new(device)?,
            in_flight: Fence::new(device, true)?,
        })
    }
}
