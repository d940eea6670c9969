use anyhow::Result;
use vulkanalia::prelude::v1_0::*;

use crate::vulkan::frame::{RendererData, MAX_FRAMES_IN_FLIGHT};
use crate::vulkan::queue::QueueFamilyIndices;

pub unsafe fn create_command_pool(
    instance: &Instance,
    device: &Device,
    data: &mut RendererData,
) -> Result<()> {
    let indices = QueueFamilyIndices::get(instance, data, data.physical_device)?;

    // Buffers are re-recorded every frame, so allow individual resets.
    let info = vk::CommandPoolCreateInfo::builder()
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        .queue_family_index(indices.graphics);

    data.command_pool = device.create_command_pool(&info, None)?;

    Ok(())
}

/// One primary command buffer per frame in flight. The buffer for frame N
/// is only re-recorded after the fence for frame N has signaled.
pub unsafe fn create_command_buffers(device: &Device, data: &mut RendererData) -> Result<()> {
    let info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(data.command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(MAX_FRAMES_IN_FLIGHT as u32);

    data.command_buffers = device.allocate_command_buffers(&info)?;

    Ok(())
}

/// Starts a throwaway command buffer for one-time init work (uploads,
/// layout transitions, IBL preprocessing).
pub unsafe fn begin_single_time_commands(
    device: &Device,
    data: &RendererData,
) -> Result<vk::CommandBuffer> {
    let info = vk::CommandBufferAllocateInfo::builder()
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_pool(data.command_pool)
        .command_buffer_count(1);

    let command_buffer = device.allocate_command_buffers(&info)?[0];

    let info = vk::CommandBufferBeginInfo::builder()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    device.begin_command_buffer(command_buffer, &info)?;

    Ok(command_buffer)
}

/// Submits and blocks on the graphics queue. Acceptable only at
/// initialization and shutdown; per-frame work goes through the
/// frames-in-flight path instead.
pub unsafe fn end_single_time_commands(
    device: &Device,
    data: &RendererData,
    command_buffer: vk::CommandBuffer,
) -> Result<()> {
    device.end_command_buffer(command_buffer)?;

    let command_buffers = &[command_buffer];
    let info = vk::SubmitInfo::builder().command_buffers(command_buffers);

    device.queue_submit(data.graphics_queue, &[info], vk::Fence::null())?;
    device.queue_wait_idle(data.graphics_queue)?;

    device.free_command_buffers(data.command_pool, command_buffers);

    Ok(())
}
