//! Images, views, samplers and layout transitions

use ash::{vk, Device};

use super::commands::{one_time_submit, CommandPool, CommandRecorder};
use super::context::LogicalDevice;
use super::error::{ResultExt, VulkanError, VulkanResult};
use super::handle::{impl_device_object, DeviceObject};
use super::memory::DeviceMemory;

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Whether `format` carries a stencil component
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(format, vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT)
}

/// Aspect mask for a barrier moving an image of `format` into `new_layout`
pub fn aspect_mask_for(format: vk::Format, new_layout: vk::ImageLayout) -> vk::ImageAspectFlags {
    if new_layout == vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL {
        if has_stencil_component(format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Accesses to wait for and the stage they happen in when leaving `old_layout`
pub fn source_access_and_stage(
    old_layout: vk::ImageLayout,
) -> VulkanResult<(vk::AccessFlags, vk::PipelineStageFlags)> {
    match old_layout {
        vk::ImageLayout::UNDEFINED => Ok((vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE)),
        vk::ImageLayout::PREINITIALIZED => Ok((vk::AccessFlags::HOST_WRITE, vk::PipelineStageFlags::HOST)),
        vk::ImageLayout::GENERAL => Ok((vk::AccessFlags::empty(), vk::PipelineStageFlags::HOST)),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
            Ok((vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER))
        }
        other => Err(VulkanError::usage(format!("unsupported source layout {other:?}"))),
    }
}

/// Accesses to block and the stage they happen in when entering `new_layout`
pub fn destination_access_and_stage(
    new_layout: vk::ImageLayout,
) -> VulkanResult<(vk::AccessFlags, vk::PipelineStageFlags)> {
    match new_layout {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => Ok((
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        )),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => Ok((
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )),
        vk::ImageLayout::GENERAL => Ok((vk::AccessFlags::empty(), vk::PipelineStageFlags::HOST)),
        vk::ImageLayout::PRESENT_SRC_KHR => {
            Ok((vk::AccessFlags::empty(), vk::PipelineStageFlags::BOTTOM_OF_PIPE))
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            Ok((vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER))
        }
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => {
            Ok((vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER))
        }
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
            Ok((vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER))
        }
        other => Err(VulkanError::usage(format!("unsupported destination layout {other:?}"))),
    }
}

/// Record a barrier moving `image` from `old_layout` to `new_layout`
pub fn set_image_layout(
    recorder: &mut CommandRecorder,
    image: vk::Image,
    format: vk::Format,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> VulkanResult<()> {
    let (src_access, src_stage) = source_access_and_stage(old_layout)?;
    let (dst_access, dst_stage) = destination_access_and_stage(new_layout)?;

    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect_mask_for(format, new_layout),
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .build();

    recorder.image_barrier(src_stage, dst_stage, barrier);
    Ok(())
}

/// First candidate whose `tiling` features include all of `features`
pub fn select_supported_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    mut properties_of: impl FnMut(vk::Format) -> vk::FormatProperties,
) -> VulkanResult<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let props = properties_of(format);
            let available = if tiling == vk::ImageTiling::LINEAR {
                props.linear_tiling_features
            } else {
                props.optimal_tiling_features
            };
            available.contains(features)
        })
        .ok_or_else(|| VulkanError::NoSupportedFormat {
            candidates: candidates.to_vec(),
            features,
        })
}

/// [`select_supported_format`] against the device's real format table
pub fn find_supported_format(
    device: &LogicalDevice,
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
) -> VulkanResult<vk::Format> {
    select_supported_format(candidates, tiling, features, |format| device.format_properties(format))
}

/// Preferred depth attachment format
pub fn find_depth_format(device: &LogicalDevice) -> VulkanResult<vk::Format> {
    find_supported_format(
        device,
        &DEPTH_FORMAT_CANDIDATES,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
    )
}

/// Creation parameters for a single-mip 2D image
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Size in pixels
    pub extent: vk::Extent2D,
    /// Texel format
    pub format: vk::Format,
    /// Memory arrangement
    pub tiling: vk::ImageTiling,
    /// Intended uses
    pub usage: vk::ImageUsageFlags,
    /// UNDEFINED or PREINITIALIZED
    pub initial_layout: vk::ImageLayout,
}

/// 2D image with its own memory allocation
pub struct Image {
    device: Device,
    image: vk::Image,
    memory: DeviceMemory,
    desc: ImageDesc,
}

impl Image {
    /// Create an image and bind freshly allocated memory to it
    pub fn new(device: &LogicalDevice, desc: ImageDesc, properties: vk::MemoryPropertyFlags) -> VulkanResult<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(desc.format)
            .tiling(desc.tiling)
            .initial_layout(desc.initial_layout)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let raw = device.raw();
        let image = unsafe { raw.create_image(&image_info, None) }.context("image creation")?;

        let requirements = unsafe { raw.get_image_memory_requirements(image) };
        let bound = DeviceMemory::allocate(device, requirements, properties).and_then(|memory| {
            unsafe { raw.bind_image_memory(image, memory.raw_handle(), 0) }
                .context("image memory bind")
                .map(|()| memory)
        });
        let memory = match bound {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { raw.destroy_image(image, None) };
                return Err(e);
            }
        };

        Ok(Self {
            device: raw.clone(),
            image,
            memory,
            desc,
        })
    }

    /// Texel format
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    /// Size in pixels
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    /// Row pitch and offset of the color subresource; meaningful for linear tiling
    pub fn subresource_layout(&self) -> vk::SubresourceLayout {
        let subresource = vk::ImageSubresource {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            array_layer: 0,
        };
        unsafe { self.device.get_image_subresource_layout(self.image, subresource) }
    }

    /// Backing allocation, for host writes into linear images
    pub fn memory_mut(&mut self) -> &mut DeviceMemory {
        &mut self.memory
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image(self.image, None);
        }
    }
}

impl_device_object!(Image, vk::Image, image);

/// Image view with RAII cleanup
///
/// Views onto swapchain images are owned here even though the images are not.
pub struct ImageView {
    device: Device,
    view: vk::ImageView,
}

impl ImageView {
    /// Create a 2D view of the first mip and layer of `image`
    pub fn new(
        device: &LogicalDevice,
        image: vk::Image,
        format: vk::Format,
        aspect_mask: vk::ImageAspectFlags,
    ) -> VulkanResult<Self> {
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe { device.raw().create_image_view(&view_info, None) }.context("image view creation")?;

        Ok(Self {
            device: device.raw().clone(),
            view,
        })
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
        }
    }
}

impl_device_object!(ImageView, vk::ImageView, view);

/// Sampler with RAII cleanup
pub struct Sampler {
    device: Device,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Linear filtering, repeat addressing, 16x anisotropy
    pub fn linear_repeat(device: &LogicalDevice) -> VulkanResult<Self> {
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .mip_lod_bias(0.0)
            .anisotropy_enable(true)
            .max_anisotropy(16.0)
            .compare_enable(false)
            .compare_op(vk::CompareOp::NEVER)
            .min_lod(0.0)
            .max_lod(0.0)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK)
            .unnormalized_coordinates(false);

        let sampler = unsafe { device.raw().create_sampler(&sampler_info, None) }.context("sampler creation")?;

        Ok(Self {
            device: device.raw().clone(),
            sampler,
        })
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}

impl_device_object!(Sampler, vk::Sampler, sampler);

/// Depth attachment sized to the swapchain
pub struct DepthBuffer {
    view: ImageView,
    image: Image,
}

impl DepthBuffer {
    /// Create the image and view, then move it into DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    pub fn new(
        device: &LogicalDevice,
        pool: &CommandPool,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        log::debug!("Creating depth buffer {}x{} ({:?})...", extent.width, extent.height, format);

        let image = Image::new(
            device,
            ImageDesc {
                extent,
                format,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                initial_layout: vk::ImageLayout::UNDEFINED,
            },
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let view = ImageView::new(device, image.raw_handle(), format, vk::ImageAspectFlags::DEPTH)?;

        one_time_submit(device, pool, device.graphics_queue(), |recorder| {
            set_image_layout(
                recorder,
                image.raw_handle(),
                format,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            )
        })?;

        Ok(Self { view, image })
    }

    /// Depth format in use
    pub fn format(&self) -> vk::Format {
        self.image.format()
    }

    /// View to attach to framebuffers
    pub fn view(&self) -> &ImageView {
        &self.view
    }
}

impl DeviceObject for DepthBuffer {
    type Raw = vk::Image;

    fn raw_handle(&self) -> vk::Image {
        self.image.raw_handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stencil_formats() {
        assert!(has_stencil_component(vk::Format::D32_SFLOAT_S8_UINT));
        assert!(has_stencil_component(vk::Format::D24_UNORM_S8_UINT));
        assert!(!has_stencil_component(vk::Format::D32_SFLOAT));
        assert!(!has_stencil_component(vk::Format::R8G8B8A8_SRGB));
    }

    #[test]
    fn test_aspect_mask_for_depth_and_color() {
        let depth = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
        assert_eq!(aspect_mask_for(vk::Format::D32_SFLOAT, depth), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_mask_for(vk::Format::D24_UNORM_S8_UINT, depth),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_mask_for(vk::Format::R8G8B8A8_SRGB, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn test_staged_texture_transitions() {
        let (src_access, src_stage) = source_access_and_stage(vk::ImageLayout::UNDEFINED).unwrap();
        let (dst_access, dst_stage) = destination_access_and_stage(vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(src_access, vk::AccessFlags::empty());
        assert_eq!(src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(dst_stage, vk::PipelineStageFlags::TRANSFER);

        let (src_access, src_stage) = source_access_and_stage(vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        let (dst_access, dst_stage) =
            destination_access_and_stage(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn test_linear_texture_transition_waits_on_host() {
        let (access, stage) = source_access_and_stage(vk::ImageLayout::PREINITIALIZED).unwrap();
        assert_eq!(access, vk::AccessFlags::HOST_WRITE);
        assert_eq!(stage, vk::PipelineStageFlags::HOST);
    }

    #[test]
    fn test_depth_transition_targets_early_fragment_tests() {
        let (access, stage) =
            destination_access_and_stage(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL).unwrap();
        assert!(access.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert!(access.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ));
        assert_eq!(stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
    }

    #[test]
    fn test_unsupported_layouts_are_usage_errors() {
        assert!(matches!(
            source_access_and_stage(vk::ImageLayout::PRESENT_SRC_KHR),
            Err(VulkanError::Usage { .. })
        ));
        assert!(matches!(
            destination_access_and_stage(vk::ImageLayout::UNDEFINED),
            Err(VulkanError::Usage { .. })
        ));
    }

    fn optimal(features: vk::FormatFeatureFlags) -> vk::FormatProperties {
        vk::FormatProperties {
            optimal_tiling_features: features,
            ..Default::default()
        }
    }

    #[test]
    fn test_depth_format_falls_through_candidates() {
        let format = select_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |format| match format {
                vk::Format::D24_UNORM_S8_UINT => optimal(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT),
                _ => optimal(vk::FormatFeatureFlags::empty()),
            },
        )
        .unwrap();
        assert_eq!(format, vk::Format::D24_UNORM_S8_UINT);
    }

    #[test]
    fn test_tiling_selects_feature_set() {
        // Optimal support says nothing about linear tiling
        let result = select_supported_format(
            &[vk::Format::D32_SFLOAT],
            vk::ImageTiling::LINEAR,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |_| optimal(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT),
        );
        assert!(matches!(result, Err(VulkanError::NoSupportedFormat { .. })));
    }
}
