//! Buffers with bound memory
//!
//! Host-visible buffers take direct writes. Device-local buffers are filled
//! through a temporary staging buffer and a blocking one-time copy.

use ash::{vk, Device};

use super::commands::{one_time_submit, CommandPool};
use super::context::LogicalDevice;
use super::error::{ResultExt, VulkanError, VulkanResult};
use super::handle::{impl_device_object, DeviceObject};
use super::memory::DeviceMemory;

/// Memory properties for buffers the CPU writes every frame
pub const HOST_VISIBLE_COHERENT: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Number of payload bytes a direct upload copies into a buffer of `capacity` bytes
pub fn copy_len(payload: usize, capacity: vk::DeviceSize) -> usize {
    usize::try_from(capacity).map_or(payload, |capacity| payload.min(capacity))
}

/// Spread `element_size`-byte elements out to `stride` bytes apart
///
/// A stride of 0 means tightly packed. Gap bytes are zero.
pub fn pack_strided(bytes: &[u8], element_size: usize, stride: usize) -> VulkanResult<Vec<u8>> {
    let stride = if stride == 0 { element_size } else { stride };
    if element_size == 0 || stride < element_size || bytes.len() % element_size != 0 {
        return Err(VulkanError::usage(format!(
            "cannot pack {} bytes as {}-byte elements with stride {}",
            bytes.len(),
            element_size,
            stride
        )));
    }
    if stride == element_size {
        return Ok(bytes.to_vec());
    }

    let mut packed = vec![0u8; bytes.len() / element_size * stride];
    for (dst, src) in packed.chunks_mut(stride).zip(bytes.chunks(element_size)) {
        dst[..element_size].copy_from_slice(src);
    }
    Ok(packed)
}

/// Buffer wrapper with memory management
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: DeviceMemory,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
}

impl Buffer {
    /// Create a buffer and bind freshly allocated memory to it
    pub fn new(
        device: &LogicalDevice,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        if size == 0 {
            return Err(VulkanError::usage("buffer size must be non-zero"));
        }

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let raw = device.raw();
        let buffer = unsafe { raw.create_buffer(&buffer_info, None) }.context("buffer creation")?;

        let requirements = unsafe { raw.get_buffer_memory_requirements(buffer) };
        let bound = DeviceMemory::allocate(device, requirements, properties).and_then(|memory| {
            unsafe { raw.bind_buffer_memory(buffer, memory.raw_handle(), 0) }
                .context("buffer memory bind")
                .map(|()| memory)
        });
        let memory = match bound {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { raw.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        Ok(Self {
            device: raw.clone(),
            buffer,
            memory,
            size,
            usage,
        })
    }

    /// Device-local buffer initialized with `bytes` through a staging copy
    ///
    /// `TRANSFER_DST` is added to `usage`.
    pub fn device_local_with_data(
        device: &LogicalDevice,
        pool: &CommandPool,
        usage: vk::BufferUsageFlags,
        bytes: &[u8],
    ) -> VulkanResult<Self> {
        let mut buffer = Self::new(
            device,
            bytes.len() as vk::DeviceSize,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        buffer.upload_staged(device, pool, bytes)?;
        Ok(buffer)
    }

    /// Host-visible, host-coherent buffer holding `bytes`
    pub fn host_visible_with_data(
        device: &LogicalDevice,
        usage: vk::BufferUsageFlags,
        bytes: &[u8],
    ) -> VulkanResult<Self> {
        let mut buffer = Self::new(device, bytes.len() as vk::DeviceSize, usage, HOST_VISIBLE_COHERENT)?;
        buffer.upload_direct(bytes)?;
        Ok(buffer)
    }

    /// Copy `bytes` straight into mapped memory, truncating at capacity
    ///
    /// Returns the number of bytes written.
    pub fn upload_direct(&mut self, bytes: &[u8]) -> VulkanResult<usize> {
        let len = copy_len(bytes.len(), self.size);
        self.memory.write_bytes(0, &bytes[..len])?;
        Ok(len)
    }

    /// Direct upload of fixed-size elements placed `stride` bytes apart
    pub fn upload_direct_strided(&mut self, bytes: &[u8], element_size: usize, stride: usize) -> VulkanResult<usize> {
        let packed = pack_strided(bytes, element_size, stride)?;
        self.upload_direct(&packed)
    }

    /// Upload through a temporary host-visible buffer and a device-side copy
    ///
    /// Blocks until the copy has finished; the staging buffer is gone on return.
    pub fn upload_staged(&mut self, device: &LogicalDevice, pool: &CommandPool, bytes: &[u8]) -> VulkanResult<()> {
        if !self.usage.contains(vk::BufferUsageFlags::TRANSFER_DST) {
            return Err(VulkanError::usage("staged upload target lacks TRANSFER_DST usage"));
        }
        let len = copy_len(bytes.len(), self.size);
        if len == 0 {
            return Ok(());
        }

        let staging = Self::host_visible_with_data(device, vk::BufferUsageFlags::TRANSFER_SRC, &bytes[..len])?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: len as vk::DeviceSize,
        };

        one_time_submit(device, pool, device.graphics_queue(), |recorder| {
            recorder.copy_buffer(staging.buffer, self.buffer, &[region]);
            Ok(())
        })
    }

    /// Strided variant of [`upload_staged`](Self::upload_staged)
    pub fn upload_staged_strided(
        &mut self,
        device: &LogicalDevice,
        pool: &CommandPool,
        bytes: &[u8],
        element_size: usize,
        stride: usize,
    ) -> VulkanResult<()> {
        let packed = pack_strided(bytes, element_size, stride)?;
        self.upload_staged(device, pool, &packed)
    }

    /// Read the contents back; only valid for host-visible buffers
    pub fn read_back(&mut self) -> VulkanResult<Vec<u8>> {
        let len = copy_len(usize::MAX, self.size);
        self.memory.read_bytes(0, len)
    }

    /// Requested size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Usage flags the buffer was created with
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Backing allocation
    pub fn memory(&self) -> &DeviceMemory {
        &self.memory
    }

    /// Backing allocation, for explicit map/unmap
    pub fn memory_mut(&mut self) -> &mut DeviceMemory {
        &mut self.memory
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // Memory is freed afterwards when the field drops
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
        }
    }
}

impl_device_object!(Buffer, vk::Buffer, buffer);
