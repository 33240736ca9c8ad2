//! Resource tests against a real device
//!
//! Each test creates a headless device and returns early when no Vulkan
//! loader or suitable device is available.

use std::collections::HashSet;

use ash::vk;
use frame_pipeline::foundation::logging;
use frame_pipeline::render::vulkan::buffer::HOST_VISIBLE_COHERENT;
use frame_pipeline::render::vulkan::{
    one_time_submit, Buffer, CommandPool, DeviceObject, Fence, LogicalDevice, PhysicalDeviceInfo, Semaphore,
    VulkanError, VulkanInstance,
};

const PAGE: usize = 4096;

/// Declared in destruction order
struct Gpu {
    pool: CommandPool,
    device: LogicalDevice,
    _instance: VulkanInstance,
}

fn headless_gpu() -> Option<Gpu> {
    logging::init_for_tests();

    let instance = match VulkanInstance::new("gpu_resources", &[], false) {
        Ok(instance) => instance,
        Err(e) => {
            log::warn!("Skipping GPU test, no Vulkan instance: {}", e);
            return None;
        }
    };
    let info = match PhysicalDeviceInfo::select_headless(instance.instance()) {
        Ok(info) => info,
        Err(e) => {
            log::warn!("Skipping GPU test, no usable device: {}", e);
            return None;
        }
    };
    let device = LogicalDevice::with_extensions(instance.instance(), &info, &[]).ok()?;
    let pool = CommandPool::new(&device, device.graphics_family()).ok()?;

    Some(Gpu {
        pool,
        device,
        _instance: instance,
    })
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + 7) as u8).collect()
}

/// Device-local buffer that can be both upload target and copy source
fn device_local_buffer(gpu: &Gpu, size: vk::DeviceSize) -> Buffer {
    Buffer::new(
        &gpu.device,
        size,
        vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )
    .unwrap()
}

/// Copy `source` into host-visible memory and read it
fn copy_to_host(gpu: &Gpu, source: &Buffer) -> Vec<u8> {
    let size = source.size();
    let mut readback = Buffer::new(&gpu.device, size, vk::BufferUsageFlags::TRANSFER_DST, HOST_VISIBLE_COHERENT).unwrap();
    one_time_submit(&gpu.device, &gpu.pool, gpu.device.graphics_queue(), |recorder| {
        recorder.copy_buffer(
            source.raw_handle(),
            readback.raw_handle(),
            &[vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            }],
        );
        Ok(())
    })
    .unwrap();

    readback.read_back().unwrap()
}

/// Upload through the staged path, then copy back into host-visible memory
fn staged_round_trip(gpu: &Gpu, bytes: &[u8]) -> Vec<u8> {
    let mut device_local = device_local_buffer(gpu, bytes.len() as vk::DeviceSize);
    device_local.upload_staged(&gpu.device, &gpu.pool, bytes).unwrap();
    copy_to_host(gpu, &device_local)
}

/// Four 4-byte elements spread 16 bytes apart
fn strided_layout() -> (Vec<u8>, Vec<u8>) {
    let elements = pattern(16);
    let mut expected = vec![0u8; 64];
    for (i, element) in elements.chunks(4).enumerate() {
        expected[i * 16..i * 16 + 4].copy_from_slice(element);
    }
    (elements, expected)
}

#[test]
fn test_staged_upload_round_trip_sizes() {
    let Some(gpu) = headless_gpu() else { return };

    for len in [1, PAGE, PAGE + 1] {
        let bytes = pattern(len);
        assert_eq!(staged_round_trip(&gpu, &bytes), bytes, "round trip of {len} bytes");
    }
}

#[test]
fn test_direct_upload_truncates_at_capacity() {
    let Some(gpu) = headless_gpu() else { return };

    let mut buffer = Buffer::new(&gpu.device, 16, vk::BufferUsageFlags::UNIFORM_BUFFER, HOST_VISIBLE_COHERENT).unwrap();
    let written = buffer.upload_direct(&pattern(64)).unwrap();

    assert_eq!(written, 16);
    assert_eq!(buffer.read_back().unwrap(), pattern(16));
}

#[test]
fn test_handles_are_unique() {
    let Some(gpu) = headless_gpu() else { return };

    let semaphores: Vec<Semaphore> = (0..4).map(|_| Semaphore::new(&gpu.device).unwrap()).collect();
    let mut fences: Vec<Fence> = (0..4).map(|_| Fence::new(&gpu.device, true).unwrap()).collect();
    let buffers: Vec<Buffer> = (0..4)
        .map(|_| Buffer::new(&gpu.device, 64, vk::BufferUsageFlags::VERTEX_BUFFER, HOST_VISIBLE_COHERENT).unwrap())
        .collect();

    let semaphore_ids: HashSet<u64> = semaphores.iter().map(DeviceObject::raw_id).collect();
    let fence_ids: HashSet<u64> = fences.iter().map(DeviceObject::raw_id).collect();
    let buffer_ids: HashSet<u64> = buffers.iter().map(DeviceObject::raw_id).collect();
    assert_eq!(semaphore_ids.len(), 4);
    assert_eq!(fence_ids.len(), 4);
    assert_eq!(buffer_ids.len(), 4);

    // Dropping one leaves the rest usable
    fences.remove(1);
    for fence in &fences {
        assert!(fence.is_signaled().unwrap());
    }
}

#[test]
fn test_memory_map_state_errors() {
    let Some(gpu) = headless_gpu() else { return };

    let mut host = Buffer::new(&gpu.device, 256, vk::BufferUsageFlags::TRANSFER_SRC, HOST_VISIBLE_COHERENT).unwrap();
    let memory = host.memory_mut();

    assert!(matches!(memory.unmap(), Err(VulkanError::Usage { .. })));
    memory.map(0, vk::WHOLE_SIZE).unwrap();
    assert!(memory.is_mapped());
    assert!(matches!(memory.map(0, vk::WHOLE_SIZE), Err(VulkanError::Usage { .. })));
    memory.unmap().unwrap();
    assert!(!memory.is_mapped());

    let mut device_local = Buffer::new(
        &gpu.device,
        256,
        vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )
    .unwrap();
    if !device_local.memory().is_host_visible() {
        assert!(matches!(
            device_local.memory_mut().map(0, vk::WHOLE_SIZE),
            Err(VulkanError::Usage { .. })
        ));
    }
}

#[test]
fn test_staged_upload_requires_transfer_dst() {
    let Some(gpu) = headless_gpu() else { return };

    let mut buffer = Buffer::new(
        &gpu.device,
        32,
        vk::BufferUsageFlags::VERTEX_BUFFER,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )
    .unwrap();
    let result = buffer.upload_staged(&gpu.device, &gpu.pool, &pattern(32));
    assert!(matches!(result, Err(VulkanError::Usage { .. })));
}

#[test]
fn test_direct_strided_upload_spreads_elements() {
    let Some(gpu) = headless_gpu() else { return };
    let (elements, expected) = strided_layout();

    let mut buffer = Buffer::new(&gpu.device, 64, vk::BufferUsageFlags::VERTEX_BUFFER, HOST_VISIBLE_COHERENT).unwrap();
    let written = buffer.upload_direct_strided(&elements, 4, 16).unwrap();

    assert_eq!(written, 64);
    assert_eq!(buffer.read_back().unwrap(), expected);
}

#[test]
fn test_staged_strided_upload_spreads_elements() {
    let Some(gpu) = headless_gpu() else { return };
    let (elements, expected) = strided_layout();

    let mut buffer = device_local_buffer(&gpu, 64);
    buffer
        .upload_staged_strided(&gpu.device, &gpu.pool, &elements, 4, 16)
        .unwrap();

    assert_eq!(copy_to_host(&gpu, &buffer), expected);
}

#[test]
fn test_memory_writes_land_at_offset() {
    let Some(gpu) = headless_gpu() else { return };

    let mut host = Buffer::new(&gpu.device, 256, vk::BufferUsageFlags::TRANSFER_SRC, HOST_VISIBLE_COHERENT).unwrap();
    let memory = host.memory_mut();
    memory.write_bytes(0, &[0u8; 256]).unwrap();
    memory.write_bytes(64, &pattern(32)).unwrap();

    assert_eq!(memory.read_bytes(64, 32).unwrap(), pattern(32));
    let all = memory.read_bytes(0, 256).unwrap();
    assert!(all[..64].iter().all(|&b| b == 0));
    assert_eq!(&all[64..96], pattern(32).as_slice());
    assert!(all[96..].iter().all(|&b| b == 0));
}
