//! Sampled 2D texture
//!
//! Uploads go through a staging buffer unless linear tiling can be sampled
//! directly and staging is not forced.

use ash::vk;

use super::buffer::{Buffer, HOST_VISIBLE_COHERENT};
use super::commands::{one_time_submit, CommandPool};
use super::context::LogicalDevice;
use super::error::{VulkanError, VulkanResult};
use super::handle::DeviceObject;
use super::image::{set_image_layout, Image, ImageDesc, ImageView, Sampler};
use crate::assets::ImageData;

/// Texel format for color textures
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Features a linear-tiled image needs to be sampled by [`Sampler::linear_repeat`]
pub const LINEAR_SAMPLING_FEATURES: vk::FormatFeatureFlags = vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR;

/// Whether an upload must use a staging buffer
///
/// Sampling is always required on top of `required_features`.
pub fn needs_staging(
    force_staging: bool,
    linear_tiling_features: vk::FormatFeatureFlags,
    required_features: vk::FormatFeatureFlags,
) -> bool {
    force_staging || !linear_tiling_features.contains(required_features | vk::FormatFeatureFlags::SAMPLED_IMAGE)
}

/// Copy tightly packed rows of `row_bytes` into `dst`, one row every `row_pitch` bytes
pub fn copy_rows(src: &[u8], row_bytes: usize, dst: &mut [u8], row_pitch: usize) -> VulkanResult<()> {
    if row_bytes == 0 || row_pitch < row_bytes || src.len() % row_bytes != 0 {
        return Err(VulkanError::usage(format!(
            "cannot copy {} bytes as {}-byte rows with pitch {}",
            src.len(),
            row_bytes,
            row_pitch
        )));
    }
    let rows = src.len() / row_bytes;
    if rows > 0 && dst.len() < (rows - 1) * row_pitch + row_bytes {
        return Err(VulkanError::usage("destination too small for image rows"));
    }

    for (row, pixels) in src.chunks_exact(row_bytes).enumerate() {
        let start = row * row_pitch;
        dst[start..start + row_bytes].copy_from_slice(pixels);
    }
    Ok(())
}

/// Texture image, view and sampler
pub struct Texture {
    sampler: Sampler,
    view: ImageView,
    image: Image,
}

impl Texture {
    /// Upload `image_data` as an sRGB texture ready for fragment shader sampling
    pub fn from_image_data(
        device: &LogicalDevice,
        pool: &CommandPool,
        image_data: &ImageData,
        force_staging: bool,
    ) -> VulkanResult<Self> {
        let extent = vk::Extent2D {
            width: image_data.width,
            height: image_data.height,
        };
        let linear_features = device.format_properties(TEXTURE_FORMAT).linear_tiling_features;
        let staged = needs_staging(force_staging, linear_features, LINEAR_SAMPLING_FEATURES);

        log::debug!(
            "Creating texture {}x{} ({} upload)...",
            extent.width,
            extent.height,
            if staged { "staged" } else { "linear" }
        );

        let image = if staged {
            Self::upload_staged(device, pool, image_data, extent)?
        } else {
            Self::upload_linear(device, pool, image_data, extent)?
        };

        let view = ImageView::new(device, image.raw_handle(), TEXTURE_FORMAT, vk::ImageAspectFlags::COLOR)?;
        let sampler = Sampler::linear_repeat(device)?;
        log::debug!("Texture created");

        Ok(Self { sampler, view, image })
    }

    fn upload_staged(
        device: &LogicalDevice,
        pool: &CommandPool,
        image_data: &ImageData,
        extent: vk::Extent2D,
    ) -> VulkanResult<Image> {
        let staging = Buffer::host_visible_with_data(device, vk::BufferUsageFlags::TRANSFER_SRC, &image_data.data)?;

        let image = Image::new(
            device,
            ImageDesc {
                extent,
                format: TEXTURE_FORMAT,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
                initial_layout: vk::ImageLayout::UNDEFINED,
            },
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
        };

        // Transition, copy, transition; the order matters
        one_time_submit(device, pool, device.graphics_queue(), |recorder| {
            set_image_layout(
                recorder,
                image.raw_handle(),
                TEXTURE_FORMAT,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;
            recorder.copy_buffer_to_image(staging.raw_handle(), image.raw_handle(), &[region]);
            set_image_layout(
                recorder,
                image.raw_handle(),
                TEXTURE_FORMAT,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        })?;

        Ok(image)
    }

    fn upload_linear(
        device: &LogicalDevice,
        pool: &CommandPool,
        image_data: &ImageData,
        extent: vk::Extent2D,
    ) -> VulkanResult<Image> {
        let mut image = Image::new(
            device,
            ImageDesc {
                extent,
                format: TEXTURE_FORMAT,
                tiling: vk::ImageTiling::LINEAR,
                usage: vk::ImageUsageFlags::SAMPLED,
                initial_layout: vk::ImageLayout::PREINITIALIZED,
            },
            HOST_VISIBLE_COHERENT,
        )?;

        let layout = image.subresource_layout();
        let row_pitch = usize::try_from(layout.row_pitch)
            .map_err(|_| VulkanError::usage("row pitch exceeds address space"))?;
        let mapped_len = usize::try_from(layout.size)
            .map_err(|_| VulkanError::usage("image size exceeds address space"))?;

        let memory = image.memory_mut();
        let ptr = memory.map(layout.offset, layout.size)?;
        let dst = unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr().cast::<u8>(), mapped_len) };
        let copied = copy_rows(&image_data.data, image_data.row_bytes(), dst, row_pitch);
        memory.unmap()?;
        copied?;

        one_time_submit(device, pool, device.graphics_queue(), |recorder| {
            set_image_layout(
                recorder,
                image.raw_handle(),
                TEXTURE_FORMAT,
                vk::ImageLayout::PREINITIALIZED,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        })?;

        Ok(image)
    }

    /// View bound at the combined image sampler
    pub fn view(&self) -> &ImageView {
        &self.view
    }

    /// Sampler bound at the combined image sampler
    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    /// Size in pixels
    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }
}

impl DeviceObject for Texture {
    type Raw = vk::Image;

    fn raw_handle(&self) -> vk::Image {
        self.image.raw_handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLED: vk::FormatFeatureFlags = vk::FormatFeatureFlags::SAMPLED_IMAGE;

    #[test]
    fn test_forced_staging_wins() {
        assert!(needs_staging(true, SAMPLED, vk::FormatFeatureFlags::empty()));
    }

    #[test]
    fn test_linear_sampling_avoids_staging() {
        assert!(!needs_staging(false, SAMPLED, vk::FormatFeatureFlags::empty()));
    }

    #[test]
    fn test_linear_path_requires_linear_filtering() {
        assert!(needs_staging(false, SAMPLED, LINEAR_SAMPLING_FEATURES));
        assert!(!needs_staging(
            false,
            SAMPLED | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR,
            LINEAR_SAMPLING_FEATURES
        ));
    }

    #[test]
    fn test_missing_linear_features_force_staging() {
        assert!(needs_staging(false, vk::FormatFeatureFlags::empty(), vk::FormatFeatureFlags::empty()));
        assert!(needs_staging(
            false,
            SAMPLED,
            vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR
        ));
    }

    #[test]
    fn test_copy_rows_honors_pitch() {
        let src = [1, 2, 3, 4, 5, 6, 7, 8];
        let mut dst = [0u8; 12];
        copy_rows(&src, 4, &mut dst, 8).unwrap();
        assert_eq!(dst, [1, 2, 3, 4, 0, 0, 0, 0, 5, 6, 7, 8]);
    }

    #[test]
    fn test_copy_rows_rejects_short_destination() {
        let src = [0u8; 8];
        let mut dst = [0u8; 10];
        assert!(copy_rows(&src, 4, &mut dst, 8).is_err());
        assert!(copy_rows(&src, 4, &mut dst, 2).is_err());
    }
}
