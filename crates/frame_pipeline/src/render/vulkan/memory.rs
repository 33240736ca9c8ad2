//! Minimal device memory allocator
//!
//! One `vkAllocateMemory` per resource. Fine for the handful of long-lived
//! buffers and images this renderer owns; not meant for streaming.

use ash::{vk, Device};
use std::ffi::c_void;
use std::ptr::NonNull;

use super::context::LogicalDevice;
use super::error::{ResultExt, VulkanError, VulkanResult};
use super::handle::impl_device_object;

/// Find the first memory type allowed by `type_bits` that has every flag in `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    let type_count = memory_properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);

    (0..type_count)
        .find(|&i| {
            type_bits & (1 << i) != 0
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or(VulkanError::NoSuitableMemoryType {
            type_bits,
            properties,
        })
}

/// Flush or invalidate range for a mapping that starts at `offset`
///
/// Covers the rest of the mapping. On non-coherent memory `offset` must be a
/// multiple of `nonCoherentAtomSize`.
pub fn mapped_range(memory: vk::DeviceMemory, offset: vk::DeviceSize) -> vk::MappedMemoryRange {
    vk::MappedMemoryRange::builder()
        .memory(memory)
        .offset(offset)
        .size(vk::WHOLE_SIZE)
        .build()
}

/// A single device memory allocation
///
/// Tracks its own map state: mapping twice or unmapping an unmapped block is
/// reported as [`VulkanError::Usage`].
pub struct DeviceMemory {
    device: Device,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    properties: vk::MemoryPropertyFlags,
    mapped: Option<NonNull<c_void>>,
    mapped_offset: vk::DeviceSize,
}

impl DeviceMemory {
    /// Allocate memory satisfying `requirements` with at least `properties`
    pub fn allocate(
        device: &LogicalDevice,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let memory_type_index = find_memory_type(
            device.memory_properties(),
            requirements.memory_type_bits,
            properties,
        )?;
        // Report what the chosen type actually provides, which may exceed the request
        let properties = device.memory_properties().memory_types[memory_type_index as usize].property_flags;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe { device.raw().allocate_memory(&alloc_info, None) }
            .context("memory allocation")?;

        Ok(Self {
            device: device.raw().clone(),
            memory,
            size: requirements.size,
            properties,
            mapped: None,
            mapped_offset: 0,
        })
    }

    /// Allocation size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Property flags of the memory type that was chosen
    pub fn properties(&self) -> vk::MemoryPropertyFlags {
        self.properties
    }

    /// Whether the host can map this allocation
    pub fn is_host_visible(&self) -> bool {
        self.properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }

    /// Whether the allocation is currently mapped
    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Map `size` bytes starting at `offset`
    pub fn map(&mut self, offset: vk::DeviceSize, size: vk::DeviceSize) -> VulkanResult<NonNull<c_void>> {
        if self.mapped.is_some() {
            return Err(VulkanError::usage("memory is already mapped"));
        }
        if !self.is_host_visible() {
            return Err(VulkanError::usage("memory is not host visible"));
        }

        let ptr = unsafe {
            self.device
                .map_memory(self.memory, offset, size, vk::MemoryMapFlags::empty())
        }
        .context("memory map")?;

        let ptr = NonNull::new(ptr).ok_or_else(|| VulkanError::usage("driver returned a null mapping"))?;
        self.mapped = Some(ptr);
        self.mapped_offset = offset;
        Ok(ptr)
    }

    /// Release the current mapping
    pub fn unmap(&mut self) -> VulkanResult<()> {
        if self.mapped.take().is_none() {
            return Err(VulkanError::usage("memory is not mapped"));
        }
        unsafe { self.device.unmap_memory(self.memory) };
        Ok(())
    }

    /// Map, copy `bytes` to `offset`, flush if needed, unmap
    pub fn write_bytes(&mut self, offset: vk::DeviceSize, bytes: &[u8]) -> VulkanResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let ptr = self.map(offset, bytes.len() as vk::DeviceSize)?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr().cast::<u8>(), bytes.len());
        }
        let flushed = self.flush_if_needed();
        self.unmap()?;
        flushed
    }

    /// Map, copy `len` bytes out from `offset`, unmap
    pub fn read_bytes(&mut self, offset: vk::DeviceSize, len: usize) -> VulkanResult<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let ptr = self.map(offset, len as vk::DeviceSize)?;
        let invalidated = self.invalidate_if_needed();
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr().cast::<u8>(), len) }.to_vec();
        self.unmap()?;
        invalidated.map(|()| bytes)
    }

    fn flush_if_needed(&self) -> VulkanResult<()> {
        if self.properties.contains(vk::MemoryPropertyFlags::HOST_COHERENT) {
            return Ok(());
        }
        let range = mapped_range(self.memory, self.mapped_offset);
        unsafe { self.device.flush_mapped_memory_ranges(&[range]) }.context("flush mapped memory")
    }

    fn invalidate_if_needed(&self) -> VulkanResult<()> {
        if self.properties.contains(vk::MemoryPropertyFlags::HOST_COHERENT) {
            return Ok(());
        }
        let range = mapped_range(self.memory, self.mapped_offset);
        unsafe { self.device.invalidate_mapped_memory_ranges(&[range]) }
            .context("invalidate mapped memory")
    }
}

impl Drop for DeviceMemory {
    fn drop(&mut self) {
        unsafe {
            if self.mapped.take().is_some() {
                self.device.unmap_memory(self.memory);
            }
            self.device.free_memory(self.memory, None);
        }
    }
}

impl_device_object!(DeviceMemory, vk::DeviceMemory, memory);
