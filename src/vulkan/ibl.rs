use std::path::Path;

use anyhow::Result;
use log::info;
use vulkanalia::prelude::v1_0::*;

use crate::vulkan::commands::{begin_single_time_commands, end_single_time_commands};
use crate::vulkan::frame::{Renderer, HDR_FORMAT};
use crate::vulkan::image::{create_image, create_image_view, create_linear_sampler};
use crate::vulkan::pipeline::{create_pipeline, set_viewport, PipelineDesc};
use crate::vulkan::render_pass::create_offscreen_pass;
use crate::vulkan::shader::ShaderStage;
use crate::vulkan::texture::{create_texture_from_pixels, decode_hdr, destroy_texture, Texture};

const ENVIRONMENT_SIZE: u32 = 512;
const IRRADIANCE_SIZE: u32 = 32;
const PREFILTER_SIZE: u32 = 128;
pub const PREFILTER_MIPS: u32 = 5;
const BRDF_LUT_SIZE: u32 = 512;
const BRDF_FORMAT: vk::Format = vk::Format::R16G16_SFLOAT;

/// Image-based-lighting resources: irradiance for diffuse ambient, a
/// roughness-prefiltered specular chain and the split-sum BRDF LUT.
pub struct IblEnvironment {
    pub environment: Texture,
    pub irradiance: Texture,
    pub prefiltered: Texture,
    pub brdf_lut: Texture,
    pub intensity: f32,
}

pub unsafe fn destroy_ibl(device: &Device, ibl: IblEnvironment) {
    destroy_texture(device, &ibl.environment);
    destroy_texture(device, &ibl.irradiance);
    destroy_texture(device, &ibl.prefiltered);
    destroy_texture(device, &ibl.brdf_lut);
}

struct CubeBuild {
    image: vk::Image,
    memory: vk::DeviceMemory,
    cube_view: vk::ImageView,
    /// One view per (mip, face), used as framebuffer attachments.
    face_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    size: u32,
    mips: u32,
}

unsafe fn build_cube(
    renderer: &Renderer,
    render_pass: vk::RenderPass,
    size: u32,
    mips: u32,
) -> Result<CubeBuild> {
    let (image, memory) = create_image(
        &renderer.instance,
        &renderer.device,
        &renderer.data,
        size,
        size,
        mips,
        6,
        HDR_FORMAT,
        vk::ImageTiling::OPTIMAL,
        vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        vk::ImageCreateFlags::CUBE_COMPATIBLE,
    )?;
    let cube_view = create_image_view(
        &renderer.device,
        image,
        HDR_FORMAT,
        vk::ImageAspectFlags::COLOR,
        mips,
        6,
    )?;

    let mut face_views = Vec::new();
    let mut framebuffers = Vec::new();
    for mip in 0..mips {
        let mip_size = (size >> mip).max(1);
        for face in 0..6u32 {
            let subresource_range = vk::ImageSubresourceRange::builder()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(mip)
                .level_count(1)
                .base_array_layer(face)
                .layer_count(1);
            let info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::_2D)
                .format(HDR_FORMAT)
                .subresource_range(subresource_range);
            let view = renderer.device.create_image_view(&info, None)?;
            let fb_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(std::slice::from_ref(&view))
                .width(mip_size)
                .height(mip_size)
                .layers(1);
            framebuffers.push(renderer.device.create_framebuffer(&fb_info, None)?);
            face_views.push(view);
        }
    }

    Ok(CubeBuild {
        image,
        memory,
        cube_view,
        face_views,
        framebuffers,
        size,
        mips,
    })
}

unsafe fn release_build_views(device: &Device, build: &mut CubeBuild) {
    for fb in build.framebuffers.drain(..) {
        device.destroy_framebuffer(fb, None);
    }
    for view in build.face_views.drain(..) {
        device.destroy_image_view(view, None);
    }
}

#[repr(C)]
struct FacePush {
    face: i32,
    roughness: f32,
}

/// Renders all (mip, face) targets of `build` with `pipeline`, sampling
/// `source`.
unsafe fn render_cube_faces(
    renderer: &Renderer,
    cb: vk::CommandBuffer,
    render_pass: vk::RenderPass,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    set: vk::DescriptorSet,
    build: &CubeBuild,
    roughness_per_mip: bool,
) {
    let device = &renderer.device;
    for mip in 0..build.mips {
        let mip_size = (build.size >> mip).max(1);
        let extent = vk::Extent2D {
            width: mip_size,
            height: mip_size,
        };
        let roughness = if roughness_per_mip {
            mip as f32 / (build.mips - 1).max(1) as f32
        } else {
            0.0
        };
        for face in 0..6u32 {
            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 1.0],
                },
            }];
            let render_area = vk::Rect2D::builder()
                .offset(vk::Offset2D::default())
                .extent(extent);
            let info = vk::RenderPassBeginInfo::builder()
                .render_pass(render_pass)
                .framebuffer(build.framebuffers[(mip * 6 + face) as usize])
                .render_area(render_area)
                .clear_values(&clear_values);
            device.cmd_begin_render_pass(cb, &info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, pipeline);
            set_viewport(device, cb, extent);
            device.cmd_bind_descriptor_sets(
                cb,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[set],
                &[],
            );
            let push = FacePush {
                face: face as i32,
                roughness,
            };
            device.cmd_push_constants(
                cb,
                layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                std::slice::from_raw_parts(
                    (&push as *const FacePush).cast::<u8>(),
                    std::mem::size_of::<FacePush>(),
                ),
            );
            device.cmd_draw(cb, 3, 1, 0, 0);
            device.cmd_end_render_pass(cb);
        }
    }
}

/// One-time IBL preprocessing: HDR equirect -> environment cube ->
/// irradiance + prefiltered specular + BRDF LUT. Blocks the graphics
/// queue; meant for initialization, not the frame loop.
pub unsafe fn create_ibl_environment(
    renderer: &mut Renderer,
    path: &Path,
    intensity: f32,
) -> Result<IblEnvironment> {
    let (width, height, half_pixels) = decode_hdr(path)?;
    let byte_len = half_pixels.len() * 2;
    let bytes = std::slice::from_raw_parts(half_pixels.as_ptr().cast::<u8>(), byte_len);
    let equirect = create_texture_from_pixels(
        &renderer.instance,
        &renderer.device,
        &renderer.data,
        width,
        height,
        HDR_FORMAT,
        bytes,
    )?;

    let device = &renderer.device;

    // Throwaway descriptor pool for the bake.
    let pool_sizes = [vk::DescriptorPoolSize::builder()
        .type_(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .descriptor_count(8)
        .build()];
    let pool_info = vk::DescriptorPoolCreateInfo::builder()
        .pool_sizes(&pool_sizes)
        .max_sets(8);
    let pool = device.create_descriptor_pool(&pool_info, None)?;

    let brdf_pass = create_offscreen_pass(device, &[BRDF_FORMAT], None, true)?;

    // Pipelines: all fullscreen-triangle, one sampler, 8-byte push.
    let fullscreen = renderer.compiler.compile(
        "fullscreen.vert",
        include_str!("shaders/fullscreen.vert"),
        ShaderStage::Vertex,
        &[],
    )?;
    let bake_pipeline = |name: &str, source: &str, pass: vk::RenderPass| -> Result<(vk::Pipeline, vk::PipelineLayout)> {
        let frag = renderer
            .compiler
            .compile(name, source, ShaderStage::Fragment, &[])?;
        let set_layouts = [renderer.ui_layout];
        create_pipeline(
            &renderer.device,
            &PipelineDesc {
                vert_spv: &fullscreen,
                frag_spv: Some(&frag),
                set_layouts: &set_layouts,
                push_constant_size: 8,
                render_pass: pass,
                ..PipelineDesc::default()
            },
        )
    };
    let equirect_pipeline = bake_pipeline(
        "equirect_to_cube.frag",
        include_str!("shaders/equirect_to_cube.frag"),
        renderer.hdr_pass,
    )?;
    let irradiance_pipeline = bake_pipeline(
        "irradiance.frag",
        include_str!("shaders/irradiance.frag"),
        renderer.hdr_pass,
    )?;
    let prefilter_pipeline = bake_pipeline(
        "prefilter.frag",
        include_str!("shaders/prefilter.frag"),
        renderer.hdr_pass,
    )?;
    let brdf_pipeline = bake_pipeline(
        "brdf_lut.frag",
        include_str!("shaders/brdf_lut.frag"),
        brdf_pass,
    )?;

    let device = &renderer.device;
    let mut environment = build_cube(renderer, renderer.hdr_pass, ENVIRONMENT_SIZE, 1)?;
    let mut irradiance = build_cube(renderer, renderer.hdr_pass, IRRADIANCE_SIZE, 1)?;
    let mut prefiltered = build_cube(renderer, renderer.hdr_pass, PREFILTER_SIZE, PREFILTER_MIPS)?;

    // BRDF LUT target.
    let (brdf_image, brdf_memory) = create_image(
        &renderer.instance,
        device,
        &renderer.data,
        BRDF_LUT_SIZE,
        BRDF_LUT_SIZE,
        1,
        1,
        BRDF_FORMAT,
        vk::ImageTiling::OPTIMAL,
        vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        vk::ImageCreateFlags::empty(),
    )?;
    let brdf_view = create_image_view(
        device,
        brdf_image,
        BRDF_FORMAT,
        vk::ImageAspectFlags::COLOR,
        1,
        1,
    )?;
    let brdf_fb_info = vk::FramebufferCreateInfo::builder()
        .render_pass(brdf_pass)
        .attachments(std::slice::from_ref(&brdf_view))
        .width(BRDF_LUT_SIZE)
        .height(BRDF_LUT_SIZE)
        .layers(1);
    let brdf_fb = device.create_framebuffer(&brdf_fb_info, None)?;

    let sampler = create_linear_sampler(device)?;

    // Descriptor sets for the bake sources.
    let allocate = |layout: vk::DescriptorSetLayout| -> Result<vk::DescriptorSet> {
        let layouts = [layout];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        Ok(device.allocate_descriptor_sets(&info)?[0])
    };
    let write = |set: vk::DescriptorSet, view: vk::ImageView| {
        crate::vulkan::descriptors::write_sampler(
            device,
            set,
            0,
            view,
            sampler,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
    };
    let equirect_set = allocate(renderer.ui_layout)?;
    write(equirect_set, equirect.view);
    let environment_set = allocate(renderer.ui_layout)?;
    write(environment_set, environment.cube_view);

    // Bake, phase 1: equirect -> environment cube.
    let cb = begin_single_time_commands(device, &renderer.data)?;
    render_cube_faces(
        renderer,
        cb,
        renderer.hdr_pass,
        equirect_pipeline.0,
        equirect_pipeline.1,
        equirect_set,
        &environment,
        false,
    );
    end_single_time_commands(device, &renderer.data, cb)?;

    // Phase 2: convolutions read the now-complete environment cube.
    let cb = begin_single_time_commands(device, &renderer.data)?;
    render_cube_faces(
        renderer,
        cb,
        renderer.hdr_pass,
        irradiance_pipeline.0,
        irradiance_pipeline.1,
        environment_set,
        &irradiance,
        false,
    );
    render_cube_faces(
        renderer,
        cb,
        renderer.hdr_pass,
        prefilter_pipeline.0,
        prefilter_pipeline.1,
        environment_set,
        &prefiltered,
        true,
    );
    {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 1.0],
            },
        }];
        let extent = vk::Extent2D {
            width: BRDF_LUT_SIZE,
            height: BRDF_LUT_SIZE,
        };
        let render_area = vk::Rect2D::builder()
            .offset(vk::Offset2D::default())
            .extent(extent);
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(brdf_pass)
            .framebuffer(brdf_fb)
            .render_area(render_area)
            .clear_values(&clear_values);
        device.cmd_begin_render_pass(cb, &info, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, brdf_pipeline.0);
        set_viewport(device, cb, extent);
        device.cmd_draw(cb, 3, 1, 0, 0);
        device.cmd_end_render_pass(cb);
    }
    end_single_time_commands(device, &renderer.data, cb)?;

    // Per-face scaffolding is no longer needed; the cube views live on.
    release_build_views(device, &mut environment);
    release_build_views(device, &mut irradiance);
    release_build_views(device, &mut prefiltered);
    device.destroy_framebuffer(brdf_fb, None);
    device.destroy_render_pass(brdf_pass, None);
    device.destroy_descriptor_pool(pool, None);
    for (pipeline, layout) in [
        equirect_pipeline,
        irradiance_pipeline,
        prefilter_pipeline,
        brdf_pipeline,
    ] {
        device.destroy_pipeline(pipeline, None);
        device.destroy_pipeline_layout(layout, None);
    }

    let make_texture = |build: &CubeBuild| -> Result<Texture> {
        Ok(Texture {
            image: build.image,
            memory: build.memory,
            view: build.cube_view,
            sampler: create_linear_sampler(device)?,
        })
    };
    let result = IblEnvironment {
        environment: make_texture(&environment)?,
        irradiance: make_texture(&irradiance)?,
        prefiltered: make_texture(&prefiltered)?,
        brdf_lut: Texture {
            image: brdf_image,
            memory: brdf_memory,
            view: brdf_view,
            sampler,
        },
        intensity,
    };
    destroy_texture(device, &equirect);

    info!(
        "IBL environment ready: {}x{} source, {} prefilter mips",
        width, height, PREFILTER_MIPS
    );
    Ok(result)
}
