use anyhow::Result;
use vulkanalia::prelude::v1_0::*;

use crate::vulkan::frame::RendererData;
use crate::vulkan::image::{create_image, create_image_view};

/// One off-screen attachment: image + memory + sampled view.
#[derive(Clone, Copy, Debug, Default)]
pub struct RenderTarget {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

pub unsafe fn create_color_target(
    instance: &Instance,
    device: &Device,
    data: &RendererData,
    extent: vk::Extent2D,
    format: vk::Format,
) -> Result<RenderTarget> {
    let (image, memory) = create_image(
        instance,
        device,
        data,
        extent.width,
        extent.height,
        1,
        1,
        format,
        vk::ImageTiling::OPTIMAL,
        vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        vk::ImageCreateFlags::empty(),
    )?;
    let view = create_image_view(device, image, format, vk::ImageAspectFlags::COLOR, 1, 1)?;
    Ok(RenderTarget {
        image,
        memory,
        view,
        format,
        extent,
    })
}

pub unsafe fn create_depth_target(
    instance: &Instance,
    device: &Device,
    data: &RendererData,
    extent: vk::Extent2D,
    format: vk::Format,
) -> Result<RenderTarget> {
    let (image, memory) = create_image(
        instance,
        device,
        data,
        extent.width,
        extent.height,
        1,
        1,
        format,
        vk::ImageTiling::OPTIMAL,
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        vk::ImageCreateFlags::empty(),
    )?;
    let view = create_image_view(device, image, format, vk::ImageAspectFlags::DEPTH, 1, 1)?;
    Ok(RenderTarget {
        image,
        memory,
        view,
        format,
        extent,
    })
}

pub unsafe fn destroy_target(device: &Device, target: &RenderTarget) {
    if target.view != vk::ImageView::null() {
        device.destroy_image_view(target.view, None);
    }
    if target.image != vk::Image::null() {
        device.destroy_image(target.image, None);
    }
    if target.memory != vk::DeviceMemory::null() {
        device.free_memory(target.memory, None);
    }
}

pub unsafe fn create_framebuffer(
    device: &Device,
    render_pass: vk::RenderPass,
    attachments: &[vk::ImageView],
    extent: vk::Extent2D,
) -> Result<vk::Framebuffer> {
    let info = vk::FramebufferCreateInfo::builder()
        .render_pass(render_pass)
        .attachments(attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);
    Ok(device.create_framebuffer(&info, None)?)
}
