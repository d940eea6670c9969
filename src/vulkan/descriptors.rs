use anyhow::Result;
use vulkanalia::prelude::v1_0::*;

use crate::vulkan::frame::RendererData;

/// Material set: one UBO plus the six optional texture slots, bound in
/// fixed order (albedo, normal, metallic-roughness, ao, emissive, height).
pub const MATERIAL_TEXTURE_COUNT: u32 = 6;

unsafe fn layout(
    device: &Device,
    bindings: &[vk::DescriptorSetLayoutBinding],
) -> Result<vk::DescriptorSetLayout> {
    let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);
    Ok(device.create_descriptor_set_layout(&info, None)?)
}

fn ubo_binding(binding: u32, stages: vk::ShaderStageFlags) -> vk::DescriptorSetLayoutBinding {
    vk::DescriptorSetLayoutBinding::builder()
        .binding(binding)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(1)
        .stage_flags(stages)
        .build()
}

fn sampler_binding(binding: u32) -> vk::DescriptorSetLayoutBinding {
    vk::DescriptorSetLayoutBinding::builder()
        .binding(binding)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::FRAGMENT)
        .build()
}

/// Set 0 everywhere: the per-frame camera UBO.
pub unsafe fn create_per_frame_layout(device: &Device) -> Result<vk::DescriptorSetLayout> {
    layout(
        device,
        &[ubo_binding(
            0,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        )],
    )
}

/// Set 1 of the G-buffer pass: material UBO + texture slots.
pub unsafe fn create_material_layout(device: &Device) -> Result<vk::DescriptorSetLayout> {
    let mut bindings = vec![ubo_binding(
        0,
        vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
    )];
    for slot in 0..MATERIAL_TEXTURE_COUNT {
        bindings.push(sampler_binding(1 + slot));
    }
    layout(device, &bindings)
}

/// Set 2 of skinned draws: the bone palette.
pub unsafe fn create_bone_layout(device: &Device) -> Result<vk::DescriptorSetLayout> {
    layout(device, &[ubo_binding(0, vk::ShaderStageFlags::VERTEX)])
}

/// The deferred lighting set: G-buffer inputs, SSAO, the light and shadow
/// blocks, the cascade array and the IBL maps.
pub unsafe fn create_lighting_layout(device: &Device) -> Result<vk::DescriptorSetLayout> {
    let mut bindings = Vec::new();
    // 0..=3: G-buffer MRTs, 4: depth, 5: SSAO.
    for slot in 0..6 {
        bindings.push(sampler_binding(slot));
    }
    bindings.push(ubo_binding(6, vk::ShaderStageFlags::FRAGMENT)); // lights
    bindings.push(ubo_binding(7, vk::ShaderStageFlags::FRAGMENT)); // shadows
    bindings.push(sampler_binding(8)); // cascade depth array
    bindings.push(sampler_binding(9)); // irradiance cube
    bindings.push(sampler_binding(10)); // prefiltered cube
    bindings.push(sampler_binding(11)); // BRDF LUT
    layout(device, &bindings)
}

/// Shared layout for the post-process family: parameter UBO + up to four
/// sampled inputs.
pub unsafe fn create_post_layout(device: &Device) -> Result<vk::DescriptorSetLayout> {
    let mut bindings = vec![ubo_binding(0, vk::ShaderStageFlags::FRAGMENT)];
    for slot in 1..=4 {
        bindings.push(sampler_binding(slot));
    }
    layout(device, &bindings)
}

/// Terrain material: parameter UBO, splatmap, four layer albedos.
pub unsafe fn create_terrain_layout(device: &Device) -> Result<vk::DescriptorSetLayout> {
    let mut bindings = vec![ubo_binding(
        0,
        vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
    )];
    for slot in 1..=5 {
        bindings.push(sampler_binding(slot));
    }
    layout(device, &bindings)
}

/// UI overlay: just the texture atlas.
pub unsafe fn create_ui_layout(device: &Device) -> Result<vk::DescriptorSetLayout> {
    layout(device, &[sampler_binding(0)])
}

/// Per-frame transient pool. Reset wholesale at the top of the frame;
/// nothing allocated from it survives past the next reset, which is
/// exactly the lifetime of the per-draw material and post sets.
pub unsafe fn create_transient_pool(device: &Device) -> Result<vk::DescriptorPool> {
    let pool_sizes = [
        vk::DescriptorPoolSize::builder()
            .type_(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(2048)
            .build(),
        vk::DescriptorPoolSize::builder()
            .type_(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(4096)
            .build(),
    ];
    let info = vk::DescriptorPoolCreateInfo::builder()
        .pool_sizes(&pool_sizes)
        .max_sets(1024);
    Ok(device.create_descriptor_pool(&info, None)?)
}

/// Allocates one set from the frame's transient pool.
pub unsafe fn allocate_transient_set(
    device: &Device,
    pool: vk::DescriptorPool,
    set_layout: vk::DescriptorSetLayout,
) -> Result<vk::DescriptorSet> {
    let layouts = [set_layout];
    let info = vk::DescriptorSetAllocateInfo::builder()
        .descriptor_pool(pool)
        .set_layouts(&layouts);
    Ok(device.allocate_descriptor_sets(&info)?[0])
}

pub unsafe fn write_uniform(
    device: &Device,
    set: vk::DescriptorSet,
    binding: u32,
    buffer: vk::Buffer,
    range: u64,
) {
    let buffer_info = vk::DescriptorBufferInfo::builder()
        .buffer(buffer)
        .offset(0)
        .range(range);
    let buffer_infos = [buffer_info.build()];
    let write = vk::WriteDescriptorSet::builder()
        .dst_set(set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .buffer_info(&buffer_infos);
    device.update_descriptor_sets(&[write], &[] as &[vk::CopyDescriptorSet]);
}

pub unsafe fn write_sampler(
    device: &Device,
    set: vk::DescriptorSet,
    binding: u32,
    view: vk::ImageView,
    sampler: vk::Sampler,
    image_layout: vk::ImageLayout,
) {
    let image_info = vk::DescriptorImageInfo::builder()
        .image_layout(image_layout)
        .image_view(view)
        .sampler(sampler);
    let image_infos = [image_info.build()];
    let write = vk::WriteDescriptorSet::builder()
        .dst_set(set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .image_info(&image_infos);
    device.update_descriptor_sets(&[write], &[] as &[vk::CopyDescriptorSet]);
}

/// Convenience for the common "sampled color target" case.
pub unsafe fn write_target(
    device: &Device,
    set: vk::DescriptorSet,
    binding: u32,
    view: vk::ImageView,
    sampler: vk::Sampler,
) {
    write_sampler(
        device,
        set,
        binding,
        view,
        sampler,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );
}

pub unsafe fn reset_transient_pool(
    device: &Device,
    data: &RendererData,
    frame: usize,
) -> Result<()> {
    device.reset_descriptor_pool(
        data.transient_pools[frame],
        vk::DescriptorPoolResetFlags::empty(),
    )?;
    Ok(())
}
