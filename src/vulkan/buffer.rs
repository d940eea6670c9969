use std::ptr::copy_nonoverlapping as memcpy;

use anyhow::{anyhow, Result};
use vulkanalia::prelude::v1_0::*;

use crate::vulkan::commands::{begin_single_time_commands, end_single_time_commands};
use crate::vulkan::frame::RendererData;

pub unsafe fn create_buffer(
    instance: &Instance,
    device: &Device,
    data: &RendererData,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
) -> Result<(vk::Buffer, vk::DeviceMemory)> {
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        // Only the graphics queue touches our buffers.
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = device.create_buffer(&buffer_info, None)?;

    let requirements = device.get_buffer_memory_requirements(buffer);
    let memory_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(get_memory_type_index(instance, data, properties, requirements)?);

    let buffer_memory = device.allocate_memory(&memory_info, None)?;
    device.bind_buffer_memory(buffer, buffer_memory, 0)?;

    Ok((buffer, buffer_memory))
}

/// Finds a memory type that satisfies both the resource requirements and
/// the requested property flags.
pub unsafe fn get_memory_type_index(
    instance: &Instance,
    data: &RendererData,
    properties: vk::MemoryPropertyFlags,
    requirements: vk::MemoryRequirements,
) -> Result<u32> {
    let memory = instance.get_physical_device_memory_properties(data.physical_device);

    (0..memory.memory_type_count)
        .find(|i| {
            let suitable = (requirements.memory_type_bits & (1 << i)) != 0;
            let memory_type = memory.memory_types[*i as usize];
            suitable && memory_type.property_flags.contains(properties)
        })
        .ok_or_else(|| anyhow!("Failed to find suitable memory type."))
}

/// Copies between buffers with a one-time command buffer. Source needs
/// TRANSFER_SRC, destination TRANSFER_DST.
pub unsafe fn copy_buffer(
    device: &Device,
    data: &RendererData,
    source: vk::Buffer,
    destination: vk::Buffer,
    size: vk::DeviceSize,
) -> Result<()> {
    let command_buffer = begin_single_time_commands(device, data)?;
    let region = vk::BufferCopy::builder().size(size);
    device.cmd_copy_buffer(command_buffer, source, destination, &[region]);
    end_single_time_commands(device, data, command_buffer)?;

    Ok(())
}

/// Writes `payload` into host-visible `memory`.
pub unsafe fn fill_memory<T>(
    device: &Device,
    memory: vk::DeviceMemory,
    payload: &[T],
) -> Result<()> {
    let size = std::mem::size_of_val(payload) as u64;
    let mapped = device.map_memory(memory, 0, size, vk::MemoryMapFlags::empty())?;
    memcpy(payload.as_ptr(), mapped.cast(), payload.len());
    device.unmap_memory(memory);
    Ok(())
}

/// Device-local buffer initialized through a staging copy.
pub unsafe fn create_device_buffer_with_data<T>(
    instance: &Instance,
    device: &Device,
    data: &RendererData,
    usage: vk::BufferUsageFlags,
    payload: &[T],
) -> Result<(vk::Buffer, vk::DeviceMemory)> {
    let size = std::mem::size_of_val(payload) as u64;

    let (staging_buffer, staging_memory) = create_buffer(
        instance,
        device,
        data,
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;
    fill_memory(device, staging_memory, payload)?;

    let (buffer, memory) = create_buffer(
        instance,
        device,
        data,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    copy_buffer(device, data, staging_buffer, buffer, size)?;

    device.destroy_buffer(staging_buffer, None);
    device.free_memory(staging_memory, None);

    Ok((buffer, memory))
}

/// Host-visible uniform buffer pre-filled with `payload`. Callers hand the
/// pair to the frame's reclamation list when its lifetime is one frame.
pub unsafe fn create_uniform_buffer_with_data<T>(
    instance: &Instance,
    device: &Device,
    data: &RendererData,
    payload: &[T],
) -> Result<(vk::Buffer, vk::DeviceMemory)> {
    let size = std::mem::size_of_val(payload) as u64;
    let (buffer, memory) = create_buffer(
        instance,
        device,
        data,
        size,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;
    fill_memory(device, memory, payload)?;
    Ok((buffer, memory))
}
