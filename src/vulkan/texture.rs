use std::fs::File;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use vulkanalia::prelude::v1_0::*;

use crate::vulkan::buffer::{create_buffer, fill_memory};
use crate::vulkan::frame::RendererData;
use crate::vulkan::image::{
    copy_buffer_to_image, create_image, create_image_view, create_texture_sampler,
    transition_image_layout,
};

/// Sampled texture owned by the backend's path-keyed cache.
#[derive(Clone, Copy, Debug)]
pub struct Texture {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
}

pub unsafe fn destroy_texture(device: &Device, texture: &Texture) {
    device.destroy_sampler(texture.sampler, None);
    device.destroy_image_view(texture.view, None);
    device.destroy_image(texture.image, None);
    device.free_memory(texture.memory, None);
}

/// Uploads raw pixels through a staging buffer and transitions the image
/// for sampling.
pub unsafe fn create_texture_from_pixels(
    instance: &Instance,
    device: &Device,
    data: &RendererData,
    width: u32,
    height: u32,
    format: vk::Format,
    pixels: &[u8],
) -> Result<Texture> {
    let size = pixels.len() as u64;
    let (staging_buffer, staging_memory) = create_buffer(
        instance,
        device,
        data,
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;
    fill_memory(device, staging_memory, pixels)?;

    let (image, memory) = create_image(
        instance,
        device,
        data,
        width,
        height,
        1,
        1,
        format,
        vk::ImageTiling::OPTIMAL,
        vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        vk::ImageCreateFlags::empty(),
    )?;

    transition_image_layout(
        device,
        data,
        image,
        vk::ImageAspectFlags::COLOR,
        1,
        1,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    )?;
    copy_buffer_to_image(device, data, staging_buffer, image, width, height, 1)?;
    transition_image_layout(
        device,
        data,
        image,
        vk::ImageAspectFlags::COLOR,
        1,
        1,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    )?;

    device.destroy_buffer(staging_buffer, None);
    device.free_memory(staging_memory, None);

    let view = create_image_view(device, image, format, vk::ImageAspectFlags::COLOR, 1, 1)?;
    let sampler = create_texture_sampler(device, 1)?;

    Ok(Texture {
        image,
        memory,
        view,
        sampler,
    })
}

/// Decodes a PNG from disk and uploads it as RGBA8. sRGB for color data,
/// UNORM for normal/height maps.
pub unsafe fn load_texture(
    instance: &Instance,
    device: &Device,
    data: &RendererData,
    path: &Path,
    srgb: bool,
) -> Result<Texture> {
    let file = File::open(path).with_context(|| format!("opening texture {}", path.display()))?;
    let decoder = png::Decoder::new(file);
    let mut reader = decoder.read_info()?;

    let mut pixels = vec![0; reader.output_buffer_size()];
    let info = reader.next_frame(&mut pixels)?;
    pixels.truncate(info.buffer_size());

    // Expand to RGBA; Vulkan has no 24-bit formats worth relying on.
    let rgba = match info.color_type {
        png::ColorType::Rgba => pixels,
        png::ColorType::Rgb => pixels
            .chunks_exact(3)
            .flat_map(|px| [px[0], px[1], px[2], 0xff])
            .collect(),
        png::ColorType::Grayscale => pixels
            .iter()
            .flat_map(|&v| [v, v, v, 0xff])
            .collect(),
        other => return Err(anyhow!("unsupported PNG color type {other:?}")),
    };

    let format = if srgb {
        vk::Format::R8G8B8A8_SRGB
    } else {
        vk::Format::R8G8B8A8_UNORM
    };
    create_texture_from_pixels(instance, device, data, info.width, info.height, format, &rgba)
}

/// 1x1 constant-color texture used for unbound material slots.
pub unsafe fn create_solid_texture(
    instance: &Instance,
    device: &Device,
    data: &RendererData,
    rgba: [u8; 4],
) -> Result<Texture> {
    create_texture_from_pixels(
        instance,
        device,
        data,
        1,
        1,
        vk::Format::R8G8B8A8_UNORM,
        &rgba,
    )
}

/// IEEE half conversion for the HDR upload path (no denormal care needed
/// for radiance values).
pub fn f32_to_f16(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exponent = ((bits >> 23) & 0xff) as i32;
    let mantissa = bits & 0x007f_ffff;

    if exponent == 0xff {
        // Inf / NaN.
        return sign | 0x7c00 | if mantissa != 0 { 0x0200 } else { 0 };
    }
    let unbiased = exponent - 127;
    if unbiased > 15 {
        return sign | 0x7c00; // overflow to inf
    }
    if unbiased < -14 {
        return sign; // flush to zero
    }
    sign | (((unbiased + 15) as u16) << 10) | ((mantissa >> 13) as u16)
}

/// Decodes an HDR equirectangular image to RGBA16F pixels.
pub fn decode_hdr(path: &Path) -> Result<(u32, u32, Vec<u16>)> {
    let image = image::open(path)
        .with_context(|| format!("decoding HDR environment {}", path.display()))?
        .into_rgb32f();
    let (width, height) = (image.width(), image.height());
    let mut half_pixels = Vec::with_capacity((width * height * 4) as usize);
    for pixel in image.pixels() {
        half_pixels.push(f32_to_f16(pixel.0[0]));
        half_pixels.push(f32_to_f16(pixel.0[1]));
        half_pixels.push(f32_to_f16(pixel.0[2]));
        half_pixels.push(f32_to_f16(1.0));
    }
    Ok((width, height, half_pixels))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_conversion_round_values() {
        assert_eq!(f32_to_f16(0.0), 0);
        assert_eq!(f32_to_f16(1.0), 0x3c00);
        assert_eq!(f32_to_f16(-2.0), 0xc000);
        assert_eq!(f32_to_f16(65504.0), 0x7bff);
        assert_eq!(f32_to_f16(f32::INFINITY), 0x7c00);
    }
}
