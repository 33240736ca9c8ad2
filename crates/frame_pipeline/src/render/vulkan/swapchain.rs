//! Vulkan swapchain management
//!
//! Surface parameter selection is split into pure functions so the preference
//! rules can be checked without a device.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::vk;

use super::context::LogicalDevice;
use super::error::{ResultExt, VulkanError, VulkanResult};
use super::handle::DeviceObject;
use super::image::ImageView;
use super::surface::Surface;

/// Color formats tried in order, each with [`PREFERRED_COLOR_SPACE`]
pub const PREFERRED_SURFACE_FORMATS: [vk::Format; 4] = [
    vk::Format::B8G8R8A8_SRGB,
    vk::Format::R8G8B8A8_SRGB,
    vk::Format::B8G8R8_UNORM,
    vk::Format::R8G8B8_UNORM,
];

/// Color space every preferred format must come with
pub const PREFERRED_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;

/// Outcome of acquiring a swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStatus {
    /// Image acquired and the swapchain matches the surface
    Success(u32),
    /// Image acquired but the swapchain should be rebuilt
    Suboptimal(u32),
    /// No image; the swapchain must be rebuilt before use
    OutOfDate,
}

/// Outcome of presenting a swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    /// Presented normally
    Success,
    /// Presented, but the swapchain no longer matches the surface exactly
    Suboptimal,
    /// Not presented; the swapchain is stale
    OutOfDate,
}

impl PresentStatus {
    /// Whether the swapchain needs rebuilding
    pub fn is_stale(self) -> bool {
        !matches!(self, Self::Success)
    }
}

/// Pick a surface format by fixed preference
///
/// A lone UNDEFINED entry means the surface accepts anything.
pub fn pick_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    if let [only] = available {
        if only.format == vk::Format::UNDEFINED {
            return Some(vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: PREFERRED_COLOR_SPACE,
            });
        }
    }

    PREFERRED_SURFACE_FORMATS
        .iter()
        .find_map(|&wanted| {
            available
                .iter()
                .find(|candidate| candidate.format == wanted && candidate.color_space == PREFERRED_COLOR_SPACE)
                .copied()
        })
        .or_else(|| available.first().copied())
}

/// MAILBOX, else IMMEDIATE, else FIFO
pub fn pick_present_mode(available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface's current extent, or `requested` clamped to the allowed range
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let (min, max) = (capabilities.min_image_extent, capabilities.max_image_extent);
    vk::Extent2D {
        width: requested.width.clamp(min.width, max.width.max(min.width)),
        height: requested.height.clamp(min.height, max.height.max(min.height)),
    }
}

/// One more than the minimum, capped by the maximum when there is one
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// IDENTITY when supported, otherwise whatever the surface currently uses
pub fn choose_pre_transform(capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if capabilities
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        capabilities.current_transform
    }
}

/// First supported of pre-multiplied, post-multiplied, inherit; else opaque
pub fn choose_composite_alpha(capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|&mode| capabilities.supported_composite_alpha.contains(mode))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Reject image usage the surface does not report as supported
pub fn check_image_usage(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    usage: vk::ImageUsageFlags,
) -> VulkanResult<vk::ImageUsageFlags> {
    if capabilities.supported_usage_flags.contains(usage) {
        Ok(usage)
    } else {
        Err(VulkanError::UnsupportedImageUsage {
            requested: usage,
            supported: capabilities.supported_usage_flags,
        })
    }
}

/// Exclusive ownership unless graphics and present use different families
pub fn image_sharing(graphics_family: u32, present_family: u32) -> (vk::SharingMode, Vec<u32>) {
    if graphics_family == present_family {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, vec![graphics_family, present_family])
    }
}

/// Classify a raw acquire result; only staleness is turned into a status
pub fn acquire_status_from(result: Result<(u32, bool), vk::Result>) -> VulkanResult<AcquireStatus> {
    match result {
        Ok((index, false)) => Ok(AcquireStatus::Success(index)),
        Ok((index, true)) => Ok(AcquireStatus::Suboptimal(index)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireStatus::OutOfDate),
        Err(result) => Err(result).context("swapchain image acquire"),
    }
}

/// Classify a raw present result; only staleness is turned into a status
pub fn present_status_from(result: Result<bool, vk::Result>) -> VulkanResult<PresentStatus> {
    match result {
        Ok(false) => Ok(PresentStatus::Success),
        Ok(true) => Ok(PresentStatus::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
        Err(result) => Err(result).context("swapchain present"),
    }
}

/// Swapchain and the views onto its images
///
/// The images themselves belong to the swapchain and are only referenced.
pub struct Swapchain {
    views: Vec<ImageView>,
    images: Vec<vk::Image>,
    swapchain: vk::SwapchainKHR,
    loader: SwapchainLoader,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Create a swapchain sized as close to `requested_extent` as the surface allows
    pub fn new(
        device: &LogicalDevice,
        surface: &Surface,
        requested_extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
        old_swapchain: vk::SwapchainKHR,
    ) -> VulkanResult<Self> {
        let physical = device.physical_device();
        let capabilities = surface.capabilities(physical)?;
        let usage = check_image_usage(&capabilities, usage)?;
        let formats = surface.formats(physical)?;
        let present_modes = surface.present_modes(physical)?;

        let format = pick_surface_format(&formats).ok_or(VulkanError::MissingFeature("surface formats"))?;
        let present_mode = pick_present_mode(&present_modes);
        let extent = choose_extent(&capabilities, requested_extent);
        let image_count = choose_image_count(&capabilities);
        let (sharing_mode, queue_families) = image_sharing(device.graphics_family(), device.present_family());

        log::debug!(
            "Creating swapchain {}x{} {:?} {:?} with {} images...",
            extent.width,
            extent.height,
            format.format,
            present_mode,
            image_count
        );

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.raw_handle())
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(usage)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&queue_families)
            .pre_transform(choose_pre_transform(&capabilities))
            .composite_alpha(choose_composite_alpha(&capabilities))
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let loader = SwapchainLoader::new(device.instance(), device.raw());
        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }.context("swapchain creation")?;

        // From here on `Drop` cleans up whatever was created
        let mut this = Self {
            views: Vec::new(),
            images: Vec::new(),
            swapchain,
            loader,
            format,
            extent,
            present_mode,
        };

        this.images = unsafe { this.loader.get_swapchain_images(swapchain) }.context("swapchain image query")?;
        this.views = this
            .images
            .iter()
            .map(|&image| ImageView::new(device, image, format.format, vk::ImageAspectFlags::COLOR))
            .collect::<VulkanResult<_>>()?;

        log::debug!("Swapchain created with {} images", this.images.len());
        Ok(this)
    }

    /// Acquire the next image, signaling `semaphore` and/or `fence` when it is ready
    pub fn acquire_next_image(
        &self,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> VulkanResult<AcquireStatus> {
        acquire_status_from(unsafe {
            self.loader
                .acquire_next_image(self.swapchain, timeout_ns, semaphore, fence)
        })
    }

    /// Queue `image_index` for presentation once `wait_semaphores` signal
    pub fn present(
        &self,
        queue: vk::Queue,
        wait_semaphores: &[vk::Semaphore],
        image_index: u32,
    ) -> VulkanResult<PresentStatus> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        present_status_from(unsafe { self.loader.queue_present(queue, &present_info) })
    }

    /// Destroy the image views, then the swapchain; safe to call repeatedly
    pub fn clear(&mut self) {
        self.views.clear();
        self.images.clear();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.loader.destroy_swapchain(self.swapchain, None);
            }
            self.swapchain = vk::SwapchainKHR::null();
        }
    }

    /// Chosen format and color space
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Image size
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Chosen present mode
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Swapchain-owned images
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// One view per image, in image order
    pub fn image_views(&self) -> &[ImageView] {
        &self.views
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.clear();
    }
}

impl DeviceObject for Swapchain {
    type Raw = vk::SwapchainKHR;

    fn raw_handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }
}
