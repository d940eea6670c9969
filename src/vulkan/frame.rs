use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Result};
use cgmath::SquareMatrix;
use log::{debug, info, warn};
use rustc_hash::FxHashMap;
use vk::{KhrSurfaceExtension, KhrSwapchainExtension};
use vulkanalia::loader::{LibloadingLoader, LIBRARY};
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::ExtDebugUtilsExtension;
use vulkanalia::window as vk_window;
use winit::window::Window;

use crate::config::RenderConfig;
use crate::ecs::{Entity, World};
use crate::math::Mat4f;
use crate::scene::view::{build_frame_data, FrameData};
use crate::vulkan::commands::{create_command_buffers, create_command_pool};
use crate::vulkan::csm::Cascade;
use crate::vulkan::descriptors::{
    self, allocate_transient_set, create_bone_layout, create_lighting_layout,
    create_material_layout, create_per_frame_layout, create_post_layout, create_terrain_layout,
    create_transient_pool,
};
use crate::vulkan::device::create_logical_device;
use crate::vulkan::ibl::IblEnvironment;
use crate::vulkan::image::{create_image, create_image_view, create_shadow_sampler};
use crate::vulkan::instance::{create_instance, VALIDATION_ENABLED};
use crate::vulkan::mesh::{destroy_mesh, upload_mesh, GpuMesh};
use crate::vulkan::overlay::{DebugLineBuffer, ParticlePool, UiCallback};
use crate::vulkan::physical_device::pick_physical_device;
use crate::vulkan::pipeline::{create_pipeline, Blend, PipelineDesc, VertexInput};
use crate::vulkan::render_pass::{create_depth_pass, create_offscreen_pass, create_swapchain_pass};
use crate::vulkan::shader::{ShaderCompiler, ShaderStage, ShaderVariantKey};
use crate::vulkan::swapchain::{create_swapchain, create_swapchain_image_views};
use crate::vulkan::targets::{
    create_color_target, create_depth_target, create_framebuffer, destroy_target, RenderTarget,
};
use crate::vulkan::texture::{create_solid_texture, create_texture_from_pixels, destroy_texture, load_texture, Texture};
use crate::vulkan::uniforms::{pack_per_frame, PerFrameUbo};

/// Two frames in flight: the CPU records frame N while the GPU finishes
/// frame N-2's resources.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

pub const GBUFFER_FORMATS: [vk::Format; 4] = [
    vk::Format::R8G8B8A8_UNORM,      // albedo + metallic
    vk::Format::R16G16B16A16_SFLOAT, // world normal + roughness
    vk::Format::R16G16B16A16_SFLOAT, // emissive + ao
    vk::Format::R8G8B8A8_UNORM,      // clearcoat, cc roughness, subsurface, lod alpha
];
pub const HDR_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
pub const AO_FORMAT: vk::Format = vk::Format::R16_UNORM;
pub const COC_FORMAT: vk::Format = vk::Format::R16_SFLOAT;
pub const SHADOW_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// The Vulkan handles behind the renderer, mutated by the free
/// `create_*` helpers during construction and swapchain recreation.
#[derive(Default)]
pub struct RendererData {
    pub messenger: vk::DebugUtilsMessengerEXT,
    pub surface: vk::SurfaceKHR,
    pub physical_device: vk::PhysicalDevice,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,

    pub swapchain: vk::SwapchainKHR,
    pub swapchain_format: vk::Format,
    pub swapchain_extent: vk::Extent2D,
    pub swapchain_images: Vec<vk::Image>,
    pub swapchain_image_views: Vec<vk::ImageView>,

    pub command_pool: vk::CommandPool,
    /// One primary command buffer per frame in flight.
    pub command_buffers: Vec<vk::CommandBuffer>,

    /// Signaled when the acquired image is ready; indexed by frame.
    pub image_available_semaphores: Vec<vk::Semaphore>,
    /// Signaled when rendering to an image completes; indexed by swapchain
    /// image so a semaphore is never re-signaled while an earlier present
    /// still waits on it.
    pub render_finished_semaphores: Vec<vk::Semaphore>,
    /// Signaled when all commands of a frame slot finished; indexed by
    /// frame.
    pub in_flight_fences: Vec<vk::Fence>,

    /// Per-frame descriptor pools, reset wholesale at the top of the
    /// frame.
    pub transient_pools: Vec<vk::DescriptorPool>,
    /// Per-frame buffers waiting for that slot's fence before destruction.
    pub reclaim: Vec<Vec<(vk::Buffer, vk::DeviceMemory)>>,
}

/// Framebuffer-sized render targets plus their framebuffers.
#[derive(Default)]
pub struct SceneTargets {
    pub gbuffer: Vec<RenderTarget>,
    pub depth: RenderTarget,
    pub gbuffer_fb: vk::Framebuffer,

    pub ssao_raw: RenderTarget,
    pub ssao_raw_fb: vk::Framebuffer,
    pub ssao_blurred: RenderTarget,
    pub ssao_blurred_fb: vk::Framebuffer,

    pub hdr_a: RenderTarget,
    pub hdr_a_fb: vk::Framebuffer,
    pub hdr_b: RenderTarget,
    pub hdr_b_fb: vk::Framebuffer,
    pub forward_fb_a: vk::Framebuffer,
    pub forward_fb_b: vk::Framebuffer,
    /// TAA history ping-pong: one read, one written, alternating by frame
    /// parity.
    pub history_a: RenderTarget,
    pub history_a_fb: vk::Framebuffer,
    pub history_b: RenderTarget,
    pub history_b_fb: vk::Framebuffer,

    pub coc: RenderTarget,
    pub coc_fb: vk::Framebuffer,
    pub dof_a: RenderTarget,
    pub dof_a_fb: vk::Framebuffer,
    pub dof_b: RenderTarget,
    pub dof_b_fb: vk::Framebuffer,

    pub bloom_a: RenderTarget,
    pub bloom_a_fb: vk::Framebuffer,
    pub bloom_b: RenderTarget,
    pub bloom_b_fb: vk::Framebuffer,

    pub swapchain_fbs: Vec<vk::Framebuffer>,
}

pub struct PipelinePair {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl Default for PipelinePair {
    fn default() -> Self {
        Self {
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
        }
    }
}

/// The fixed (non-variant) pipelines of the pass graph.
#[derive(Default)]
pub struct Pipelines {
    pub terrain: PipelinePair,
    pub shadow: PipelinePair,
    pub shadow_skinned: PipelinePair,
    pub lighting: PipelinePair,
    pub forward: PipelinePair,
    pub ssao: PipelinePair,
    pub ssao_blur: PipelinePair,
    pub taa: PipelinePair,
    pub dof_coc: PipelinePair,
    pub dof_blur: PipelinePair,
    pub dof_composite: PipelinePair,
    pub motion_blur: PipelinePair,
    pub bloom_extract: PipelinePair,
    pub blur: PipelinePair,
    pub composite: PipelinePair,
    pub present: PipelinePair,
    pub particle: PipelinePair,
    pub ui: PipelinePair,
    pub line: PipelinePair,
}

/// Cascaded shadow map resources: one D32 array image, one view and
/// framebuffer per cascade layer.
pub struct CsmResources {
    pub num_cascades: usize,
    pub resolution: u32,
    pub near: f32,
    pub far: f32,
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub array_view: vk::ImageView,
    pub layer_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub sampler: vk::Sampler,
    /// Recomputed every frame from the primary light.
    pub cascades: Vec<Cascade>,
}

/// The deferred renderer. Owns the device, all GPU caches and the frame
/// loop; the host drives it with `render_frame(world)` once per tick.
pub struct Renderer {
    pub entry: Entry,
    pub instance: Instance,
    pub device: Device,
    pub data: RendererData,
    pub config: RenderConfig,

    pub frame: usize,
    pub resized: bool,
    start: Instant,

    pub(crate) compiler: ShaderCompiler,
    pub(crate) variant_compiles: usize,

    // Descriptor set layouts, created once.
    pub(crate) per_frame_layout: vk::DescriptorSetLayout,
    pub(crate) material_layout: vk::DescriptorSetLayout,
    pub(crate) bone_layout: vk::DescriptorSetLayout,
    pub(crate) lighting_layout: vk::DescriptorSetLayout,
    pub(crate) post_layout: vk::DescriptorSetLayout,
    pub(crate) terrain_layout: vk::DescriptorSetLayout,

    // Render passes.
    pub(crate) gbuffer_pass: vk::RenderPass,
    pub(crate) hdr_pass: vk::RenderPass,
    pub(crate) ao_pass: vk::RenderPass,
    pub(crate) coc_pass: vk::RenderPass,
    pub(crate) forward_pass: vk::RenderPass,
    pub(crate) shadow_pass: vk::RenderPass,
    pub(crate) present_pass: vk::RenderPass,
    pub(crate) overlay_pass: vk::RenderPass,

    pub(crate) targets: SceneTargets,
    pub(crate) pipelines: Pipelines,
    /// Material variant cache: equal keys map to the same handle for the
    /// lifetime of the process.
    pub(crate) gbuffer_variants: FxHashMap<ShaderVariantKey, PipelinePair>,

    // Resource caches.
    pub(crate) meshes: FxHashMap<Entity, GpuMesh>,
    pub(crate) textures: HashMap<PathBuf, Texture>,

    // Fallback resources for unbound slots.
    pub(crate) white_texture: Texture,
    pub(crate) normal_texture: Texture,
    pub(crate) black_texture: Texture,
    pub(crate) black_cube: Texture,
    pub(crate) noise_texture: Texture,
    pub(crate) linear_sampler: vk::Sampler,
    /// Depth attachments are sampled unfiltered.
    pub(crate) nearest_sampler: vk::Sampler,
    pub(crate) ui_layout: vk::DescriptorSetLayout,

    pub(crate) csm: Option<CsmResources>,
    pub(crate) ibl: Option<IblEnvironment>,

    /// Shared host-visible instance buffer per frame slot, grown 2x on
    /// demand and never shrunk.
    pub(crate) instance_buffers: Vec<(vk::Buffer, vk::DeviceMemory, usize)>,

    // Overlay inputs, refilled by the host.
    pub debug_lines: DebugLineBuffer,
    pub particles: ParticlePool,
    pub(crate) ui_callback: Option<UiCallback>,

    // TAA state.
    pub(crate) prev_view_proj: Mat4f,
    pub(crate) taa_first_frame: bool,
    pub(crate) threading_enabled: bool,
}

impl Renderer {
    /// Brings up the whole backend for an existing window.
    pub unsafe fn create(window: &Window, config: RenderConfig, threading_enabled: bool) -> Result<Self> {
        let loader = LibloadingLoader::new(LIBRARY)?;
        let entry = Entry::new(loader).map_err(|e| anyhow!("{}", e))?;
        let mut data = RendererData::default();
        let instance = create_instance(window, &entry, &mut data)?;
        data.surface = vk_window::create_surface(&instance, &window, &window)?;
        pick_physical_device(&instance, &mut data)?;
        let device = create_logical_device(&entry, &instance, &mut data)?;

        create_swapchain(window, &instance, &device, &mut data)?;
        create_swapchain_image_views(&device, &mut data)?;
        create_command_pool(&instance, &device, &mut data)?;
        create_command_buffers(&device, &mut data)?;
        create_sync_objects(&device, &mut data)?;

        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            data.transient_pools.push(create_transient_pool(&device)?);
            data.reclaim.push(Vec::new());
        }

        let per_frame_layout = create_per_frame_layout(&device)?;
        let material_layout = create_material_layout(&device)?;
        let bone_layout = create_bone_layout(&device)?;
        let lighting_layout = create_lighting_layout(&device)?;
        let post_layout = create_post_layout(&device)?;
        let terrain_layout = create_terrain_layout(&device)?;

        let gbuffer_pass =
            create_offscreen_pass(&device, &GBUFFER_FORMATS, Some(DEPTH_FORMAT), true)?;
        let hdr_pass = create_offscreen_pass(&device, &[HDR_FORMAT], None, true)?;
        let ao_pass = create_offscreen_pass(&device, &[AO_FORMAT], None, true)?;
        let coc_pass = create_offscreen_pass(&device, &[COC_FORMAT], None, true)?;
        let forward_pass =
            create_offscreen_pass(&device, &[HDR_FORMAT], Some(DEPTH_FORMAT), false)?;
        let shadow_pass = create_depth_pass(&device, SHADOW_FORMAT)?;
        let present_pass = create_swapchain_pass(&device, data.swapchain_format, true)?;
        let overlay_pass = create_swapchain_pass(&device, data.swapchain_format, false)?;

        let compiler = ShaderCompiler::new()?;

        let white_texture = create_solid_texture(&instance, &device, &data, [255, 255, 255, 255])?;
        let normal_texture = create_solid_texture(&instance, &device, &data, [128, 128, 255, 255])?;
        let black_texture = create_solid_texture(&instance, &device, &data, [0, 0, 0, 255])?;
        let black_cube = create_black_cube(&instance, &device, &data)?;
        let noise_texture = create_noise_texture(&instance, &device, &data)?;
        let linear_sampler = crate::vulkan::image::create_linear_sampler(&device)?;
        let nearest_sampler = create_nearest_sampler(&device)?;
        let ui_layout = descriptors::create_ui_layout(&device)?;

        let mut renderer = Self {
            entry,
            instance,
            device,
            data,
            config: config.clone(),
            frame: 0,
            resized: false,
            start: Instant::now(),
            compiler,
            variant_compiles: 0,
            per_frame_layout,
            material_layout,
            bone_layout,
            lighting_layout,
            post_layout,
            terrain_layout,
            gbuffer_pass,
            hdr_pass,
            ao_pass,
            coc_pass,
            forward_pass,
            shadow_pass,
            present_pass,
            overlay_pass,
            targets: SceneTargets::default(),
            pipelines: Pipelines::default(),
            gbuffer_variants: FxHashMap::default(),
            meshes: FxHashMap::default(),
            textures: HashMap::new(),
            white_texture,
            normal_texture,
            black_texture,
            black_cube,
            noise_texture,
            linear_sampler,
            nearest_sampler,
            ui_layout,
            csm: None,
            ibl: None,
            instance_buffers: Vec::new(),
            debug_lines: DebugLineBuffer::default(),
            particles: ParticlePool::default(),
            ui_callback: None,
            prev_view_proj: Mat4f::identity(),
            taa_first_frame: true,
            threading_enabled,
        };

        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            renderer.instance_buffers.push((
                vk::Buffer::null(),
                vk::DeviceMemory::null(),
                0,
            ));
        }

        renderer.create_targets()?;
        renderer.create_fixed_pipelines()?;
        let shadows = config.shadows.clone();
        renderer.create_csm(shadows.num_cascades, shadows.resolution, shadows.near, shadows.far)?;

        info!("renderer initialized ({} swapchain images)", renderer.data.swapchain_images.len());
        Ok(renderer)
    }

    pub fn aspect_ratio(&self) -> f64 {
        let extent = self.data.swapchain_extent;
        if extent.height == 0 {
            1.0
        } else {
            f64::from(extent.width) / f64::from(extent.height)
        }
    }

    pub fn elapsed(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }

    /// Registers the UI overlay callback; pass 11 runs only while one is
    /// registered.
    pub fn set_ui_callback(&mut self, callback: UiCallback) {
        self.ui_callback = Some(callback);
    }

    /// Host hook for the debug-line overlay.
    pub fn draw_debug_line(
        &mut self,
        from: crate::math::Vec3f,
        to: crate::math::Vec3f,
        color: crate::math::Vec4f,
    ) {
        self.debug_lines.push_line(from, to, color);
    }

    pub fn variant_compile_count(&self) -> usize {
        self.variant_compiles
    }

    /// Renders one frame of `world` following the frame submit protocol.
    /// Returns without submitting on swapchain rebuilds.
    pub unsafe fn render_frame(&mut self, window: &Window, world: &World) -> Result<()> {
        if self.data.swapchain_extent.width == 0 || self.data.swapchain_extent.height == 0 {
            return Ok(());
        }

        // 1. Block until the GPU released this frame slot.
        let frame = self.frame;
        self.device
            .wait_for_fences(&[self.data.in_flight_fences[frame]], true, u64::MAX)?;

        // 2. Buffers deferred two frames ago are now safe to destroy.
        let stale = std::mem::take(&mut self.data.reclaim[frame]);
        for (buffer, memory) in stale {
            self.device.destroy_buffer(buffer, None);
            self.device.free_memory(memory, None);
        }

        // 3. Everything allocated from this frame's pool is dead now.
        descriptors::reset_transient_pool(&self.device, &self.data, frame)?;

        // 4. Acquire; OUT_OF_DATE means the surface changed under us.
        let result = self.device.acquire_next_image_khr(
            self.data.swapchain,
            u64::MAX,
            self.data.image_available_semaphores[frame],
            vk::Fence::null(),
        );
        let image_index = match result {
            Ok((image_index, _)) => image_index as usize,
            Err(vk::ErrorCode::OUT_OF_DATE_KHR) => {
                return self.recreate_swapchain(window);
            }
            Err(e) => return Err(anyhow!(e)),
        };

        // 5. Build the frame view and record the command buffer.
        let frame_data = build_frame_data(world, self.aspect_ratio(), self.threading_enabled);
        self.record_frame(world, &frame_data, frame, image_index)?;

        // 6. Submit. The fence is reset only now so an early return above
        // can never leave it unsignaled.
        let wait_semaphores = &[self.data.image_available_semaphores[frame]];
        let wait_stages = &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = &[self.data.command_buffers[frame]];
        let signal_semaphores = &[self.data.render_finished_semaphores[image_index]];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(signal_semaphores);

        self.device
            .reset_fences(&[self.data.in_flight_fences[frame]])?;
        self.device.queue_submit(
            self.data.graphics_queue,
            &[submit_info],
            self.data.in_flight_fences[frame],
        )?;

        // 7. Present, waiting on this image's render-finished semaphore.
        let swapchains = &[self.data.swapchain];
        let image_indices = &[image_index as u32];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(signal_semaphores)
            .swapchains(swapchains)
            .image_indices(image_indices);
        let result = self
            .device
            .queue_present_khr(self.data.present_queue, &present_info);

        let changed = result == Ok(vk::SuccessCode::SUBOPTIMAL_KHR)
            || result == Err(vk::ErrorCode::OUT_OF_DATE_KHR);
        if self.resized || changed {
            self.resized = false;
            self.recreate_swapchain(window)?;
        } else if let Err(e) = result {
            return Err(anyhow!(e));
        }

        // 8. TAA bookkeeping for next frame.
        self.prev_view_proj =
            crate::vulkan::uniforms::correct_projection(frame_data.projection) * frame_data.view;
        self.taa_first_frame = false;
        self.debug_lines.clear();

        self.frame = (self.frame + 1) % MAX_FRAMES_IN_FLIGHT;
        Ok(())
    }

    /// Tears down and rebuilds everything that depends on the surface.
    pub unsafe fn recreate_swapchain(&mut self, window: &Window) -> Result<()> {
        // Zero-sized (minimized) surfaces cannot back a swapchain; the
        // engine blocks on events until a real size arrives.
        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            self.data.swapchain_extent = vk::Extent2D::default();
            return Ok(());
        }

        debug!("recreating swapchain ({}x{})", size.width, size.height);
        self.device.device_wait_idle()?;
        self.destroy_swapchain_resources();

        create_swapchain(window, &self.instance, &self.device, &mut self.data)?;
        create_swapchain_image_views(&self.device, &mut self.data)?;
        self.create_targets()?;

        // Presents from before the rebuild may still reference the old
        // per-image semaphores, which were destroyed above; fresh ones are
        // created per new image.
        self.taa_first_frame = true;
        Ok(())
    }

    unsafe fn destroy_swapchain_resources(&mut self) {
        self.destroy_targets();
        let device = &self.device;
        for view in self.data.swapchain_image_views.drain(..) {
            device.destroy_image_view(view, None);
        }
        for semaphore in self.data.render_finished_semaphores.drain(..) {
            device.destroy_semaphore(semaphore, None);
        }
        if self.data.swapchain != vk::SwapchainKHR::null() {
            device.destroy_swapchain_khr(self.data.swapchain, None);
            self.data.swapchain = vk::SwapchainKHR::null();
        }
    }

    /// Builds every framebuffer-sized target and the per-image
    /// render-finished semaphores.
    unsafe fn create_targets(&mut self) -> Result<()> {
        let extent = self.data.swapchain_extent;
        let half = vk::Extent2D {
            width: (extent.width / 2).max(1),
            height: (extent.height / 2).max(1),
        };
        let device = &self.device;
        let instance = &self.instance;
        let data = &self.data;

        let mut targets = SceneTargets::default();
        for format in GBUFFER_FORMATS {
            targets
                .gbuffer
                .push(create_color_target(instance, device, data, extent, format)?);
        }
        targets.depth = create_depth_target(instance, device, data, extent, DEPTH_FORMAT)?;
        let mut gbuffer_views: Vec<vk::ImageView> =
            targets.gbuffer.iter().map(|t| t.view).collect();
        gbuffer_views.push(targets.depth.view);
        targets.gbuffer_fb =
            create_framebuffer(device, self.gbuffer_pass, &gbuffer_views, extent)?;

        targets.ssao_raw = create_color_target(instance, device, data, extent, AO_FORMAT)?;
        targets.ssao_raw_fb =
            create_framebuffer(device, self.ao_pass, &[targets.ssao_raw.view], extent)?;
        targets.ssao_blurred = create_color_target(instance, device, data, extent, AO_FORMAT)?;
        targets.ssao_blurred_fb =
            create_framebuffer(device, self.ao_pass, &[targets.ssao_blurred.view], extent)?;

        targets.hdr_a = create_color_target(instance, device, data, extent, HDR_FORMAT)?;
        targets.hdr_a_fb = create_framebuffer(device, self.hdr_pass, &[targets.hdr_a.view], extent)?;
        targets.hdr_b = create_color_target(instance, device, data, extent, HDR_FORMAT)?;
        targets.hdr_b_fb = create_framebuffer(device, self.hdr_pass, &[targets.hdr_b.view], extent)?;
        targets.forward_fb_a = create_framebuffer(
            device,
            self.forward_pass,
            &[targets.hdr_a.view, targets.depth.view],
            extent,
        )?;
        targets.forward_fb_b = create_framebuffer(
            device,
            self.forward_pass,
            &[targets.hdr_b.view, targets.depth.view],
            extent,
        )?;
        targets.history_a = create_color_target(instance, device, data, extent, HDR_FORMAT)?;
        targets.history_a_fb =
            create_framebuffer(device, self.hdr_pass, &[targets.history_a.view], extent)?;
        targets.history_b = create_color_target(instance, device, data, extent, HDR_FORMAT)?;
        targets.history_b_fb =
            create_framebuffer(device, self.hdr_pass, &[targets.history_b.view], extent)?;
        // History is sampled on the very first TAA pass, before anything
        // has rendered into it; give both targets a valid layout up front.
        for history in [&targets.history_a, &targets.history_b] {
            crate::vulkan::image::transition_image_layout(
                device,
                data,
                history.image,
                vk::ImageAspectFlags::COLOR,
                1,
                1,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )?;
        }

        targets.coc = create_color_target(instance, device, data, extent, COC_FORMAT)?;
        targets.coc_fb = create_framebuffer(device, self.coc_pass, &[targets.coc.view], extent)?;
        targets.dof_a = create_color_target(instance, device, data, extent, HDR_FORMAT)?;
        targets.dof_a_fb = create_framebuffer(device, self.hdr_pass, &[targets.dof_a.view], extent)?;
        targets.dof_b = create_color_target(instance, device, data, extent, HDR_FORMAT)?;
        targets.dof_b_fb = create_framebuffer(device, self.hdr_pass, &[targets.dof_b.view], extent)?;

        targets.bloom_a = create_color_target(instance, device, data, half, HDR_FORMAT)?;
        targets.bloom_a_fb =
            create_framebuffer(device, self.hdr_pass, &[targets.bloom_a.view], half)?;
        targets.bloom_b = create_color_target(instance, device, data, half, HDR_FORMAT)?;
        targets.bloom_b_fb =
            create_framebuffer(device, self.hdr_pass, &[targets.bloom_b.view], half)?;

        for view in &self.data.swapchain_image_views {
            targets.swapchain_fbs.push(create_framebuffer(
                device,
                self.present_pass,
                &[*view],
                extent,
            )?);
        }

        // Per-image semaphores follow the swapchain image count.
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let mut semaphores = Vec::new();
        for _ in 0..self.data.swapchain_images.len() {
            semaphores.push(device.create_semaphore(&semaphore_info, None)?);
        }

        self.targets = targets;
        self.data.render_finished_semaphores = semaphores;
        Ok(())
    }

    unsafe fn destroy_targets(&mut self) {
        let device = &self.device;
        let targets = std::mem::take(&mut self.targets);
        for fb in [
            targets.gbuffer_fb,
            targets.ssao_raw_fb,
            targets.ssao_blurred_fb,
            targets.hdr_a_fb,
            targets.hdr_b_fb,
            targets.forward_fb_a,
            targets.forward_fb_b,
            targets.history_a_fb,
            targets.history_b_fb,
            targets.coc_fb,
            targets.dof_a_fb,
            targets.dof_b_fb,
            targets.bloom_a_fb,
            targets.bloom_b_fb,
        ] {
            if fb != vk::Framebuffer::null() {
                device.destroy_framebuffer(fb, None);
            }
        }
        for fb in targets.swapchain_fbs {
            device.destroy_framebuffer(fb, None);
        }
        for target in &targets.gbuffer {
            destroy_target(device, target);
        }
        for target in [
            &targets.depth,
            &targets.ssao_raw,
            &targets.ssao_blurred,
            &targets.hdr_a,
            &targets.hdr_b,
            &targets.history_a,
            &targets.history_b,
            &targets.coc,
            &targets.dof_a,
            &targets.dof_b,
            &targets.bloom_a,
            &targets.bloom_b,
        ] {
            destroy_target(device, target);
        }
    }

    /// Lazily compiles and caches the G-buffer pipeline for a variant key.
    /// Equal keys always return the identical pipeline handle.
    pub(crate) unsafe fn ensure_gbuffer_variant(
        &mut self,
        key: ShaderVariantKey,
    ) -> Result<vk::Pipeline> {
        if let Some(pair) = self.gbuffer_variants.get(&key) {
            return Ok(pair.pipeline);
        }

        let defines = key.defines();
        let vert = self.compiler.compile(
            "gbuffer.vert",
            include_str!("shaders/gbuffer.vert"),
            ShaderStage::Vertex,
            &defines,
        )?;
        let frag = self.compiler.compile(
            "gbuffer.frag",
            include_str!("shaders/gbuffer.frag"),
            ShaderStage::Fragment,
            &defines,
        )?;
        self.variant_compiles += 1;

        let set_layouts = [self.per_frame_layout, self.material_layout, self.bone_layout];
        let (pipeline, layout) = create_pipeline(
            &self.device,
            &PipelineDesc {
                vert_spv: &vert,
                frag_spv: Some(&frag),
                set_layouts: &set_layouts,
                push_constant_size: std::mem::size_of::<crate::vulkan::uniforms::PushConstants>()
                    as u32,
                render_pass: self.gbuffer_pass,
                color_attachment_count: GBUFFER_FORMATS.len() as u32,
                blend: Blend::Opaque,
                depth_test: true,
                depth_write: true,
                cull_mode: vk::CullModeFlags::BACK,
                vertex_input: if key.contains(ShaderVariantKey::INSTANCED) {
                    VertexInput::MeshInstanced
                } else {
                    VertexInput::Mesh
                },
                ..PipelineDesc::default()
            },
        )?;
        debug!("compiled G-buffer variant {key:?}");
        self.gbuffer_variants
            .insert(key, PipelinePair { pipeline, layout });
        Ok(pipeline)
    }

    pub(crate) fn gbuffer_variant_layout(&self, key: ShaderVariantKey) -> vk::PipelineLayout {
        self.gbuffer_variants
            .get(&key)
            .map(|p| p.layout)
            .unwrap_or(vk::PipelineLayout::null())
    }

    /// GPU mesh for an entity, uploaded on first sight.
    pub(crate) unsafe fn ensure_mesh(
        &mut self,
        entity: Entity,
        mesh: &crate::scene::MeshData,
    ) -> Result<GpuMesh> {
        if let Some(cached) = self.meshes.get(&entity) {
            return Ok(cached.clone());
        }
        let uploaded = upload_mesh(&self.instance, &self.device, &self.data, mesh)?;
        self.meshes.insert(entity, uploaded.clone());
        Ok(uploaded)
    }

    /// Host-facing mesh upload hook.
    pub unsafe fn upload_mesh(&mut self, entity: Entity, mesh: &crate::scene::MeshData) -> Result<()> {
        self.ensure_mesh(entity, mesh)?;
        Ok(())
    }

    /// Path-keyed texture cache. Failures fall back to the neutral
    /// texture so a missing file costs a warning, not the frame.
    pub(crate) unsafe fn resolve_texture(&mut self, path: &Path, srgb: bool) -> Texture {
        if let Some(texture) = self.textures.get(path) {
            return *texture;
        }
        match load_texture(&self.instance, &self.device, &self.data, path, srgb) {
            Ok(texture) => {
                self.textures.insert(path.to_path_buf(), texture);
                texture
            }
            Err(error) => {
                warn!("texture {} failed to load: {error:#}", path.display());
                self.textures.insert(path.to_path_buf(), self.white_texture);
                self.white_texture
            }
        }
    }

    /// Host-facing texture upload hook.
    pub unsafe fn upload_texture(&mut self, path: &Path, srgb: bool) -> Result<()> {
        self.resolve_texture(path, srgb);
        Ok(())
    }

    /// Replaces the shadow cascade resources.
    pub unsafe fn create_csm(
        &mut self,
        num_cascades: usize,
        resolution: u32,
        near: f32,
        far: f32,
    ) -> Result<()> {
        self.device.device_wait_idle()?;
        if let Some(old) = self.csm.take() {
            destroy_csm(&self.device, old);
        }
        let num_cascades = num_cascades.clamp(1, crate::vulkan::uniforms::MAX_CASCADES);

        let (image, memory) = create_image(
            &self.instance,
            &self.device,
            &self.data,
            resolution,
            resolution,
            1,
            num_cascades as u32,
            SHADOW_FORMAT,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::ImageCreateFlags::empty(),
        )?;
        let array_view = {
            let subresource_range = vk::ImageSubresourceRange::builder()
                .aspect_mask(vk::ImageAspectFlags::DEPTH)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(num_cascades as u32);
            let info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::_2D_ARRAY)
                .format(SHADOW_FORMAT)
                .subresource_range(subresource_range);
            self.device.create_image_view(&info, None)?
        };

        let mut layer_views = Vec::new();
        let mut framebuffers = Vec::new();
        let extent = vk::Extent2D {
            width: resolution,
            height: resolution,
        };
        for layer in 0..num_cascades {
            let subresource_range = vk::ImageSubresourceRange::builder()
                .aspect_mask(vk::ImageAspectFlags::DEPTH)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(layer as u32)
                .layer_count(1);
            let info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::_2D)
                .format(SHADOW_FORMAT)
                .subresource_range(subresource_range);
            let view = self.device.create_image_view(&info, None)?;
            framebuffers.push(create_framebuffer(&self.device, self.shadow_pass, &[view], extent)?);
            layer_views.push(view);
        }

        // The cascade array is bound to the lighting set even on frames
        // with no directional light; it needs a sampleable layout before
        // its first shadow pass.
        crate::vulkan::image::transition_image_layout(
            &self.device,
            &self.data,
            image,
            vk::ImageAspectFlags::DEPTH,
            1,
            num_cascades as u32,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;

        let sampler = create_shadow_sampler(&self.device)?;
        self.csm = Some(CsmResources {
            num_cascades,
            resolution,
            near,
            far,
            image,
            memory,
            array_view,
            layer_views,
            framebuffers,
            sampler,
            cascades: Vec::new(),
        });
        Ok(())
    }

    /// One-time IBL preprocessing from an HDR equirectangular file.
    pub unsafe fn create_ibl_environment(&mut self, path: &Path, intensity: f32) -> Result<()> {
        let environment =
            crate::vulkan::ibl::create_ibl_environment(self, path, intensity)?;
        if let Some(old) = self.ibl.replace(environment) {
            self.device.device_wait_idle()?;
            crate::vulkan::ibl::destroy_ibl(&self.device, old);
        }
        Ok(())
    }

    /// Creates a uniform buffer that lives exactly until this frame slot
    /// comes around again.
    pub(crate) unsafe fn transient_ubo<T>(&mut self, frame: usize, payload: &[T]) -> Result<vk::Buffer> {
        let (buffer, memory) = crate::vulkan::buffer::create_uniform_buffer_with_data(
            &self.instance,
            &self.device,
            &self.data,
            payload,
        )?;
        self.data.reclaim[frame].push((buffer, memory));
        Ok(buffer)
    }

    pub(crate) unsafe fn transient_set(
        &self,
        frame: usize,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        allocate_transient_set(&self.device, self.data.transient_pools[frame], layout)
    }

    /// Per-frame camera set: transient UBO + transient set 0.
    pub(crate) unsafe fn per_frame_set(
        &mut self,
        frame: usize,
        ubo: &PerFrameUbo,
    ) -> Result<vk::DescriptorSet> {
        let buffer = self.transient_ubo(frame, std::slice::from_ref(ubo))?;
        let set = self.transient_set(frame, self.per_frame_layout)?;
        descriptors::write_uniform(
            &self.device,
            set,
            0,
            buffer,
            std::mem::size_of::<PerFrameUbo>() as u64,
        );
        Ok(set)
    }

    pub(crate) fn frame_ubo(&self, frame_data: &FrameData) -> PerFrameUbo {
        pack_per_frame(frame_data, self.elapsed())
    }

    /// Full shutdown. Waits for the device, then destroys every cache and
    /// handle in reverse creation order.
    pub unsafe fn destroy(&mut self) {
        let _ = self.device.device_wait_idle();

        self.destroy_swapchain_resources();

        for (_, mesh) in self.meshes.drain() {
            destroy_mesh(&self.device, &mesh);
        }
        let mut destroyed = std::collections::HashSet::new();
        for (_, texture) in self.textures.drain() {
            // The white fallback may be aliased under several paths.
            if destroyed.insert(texture.image) && texture.image != self.white_texture.image {
                destroy_texture(&self.device, &texture);
            }
        }
        for texture in [
            self.white_texture,
            self.normal_texture,
            self.black_texture,
            self.black_cube,
            self.noise_texture,
        ] {
            destroy_texture(&self.device, &texture);
        }
        self.device.destroy_sampler(self.linear_sampler, None);
        self.device.destroy_sampler(self.nearest_sampler, None);
        self.device.destroy_descriptor_set_layout(self.ui_layout, None);

        if let Some(csm) = self.csm.take() {
            destroy_csm(&self.device, csm);
        }
        if let Some(ibl) = self.ibl.take() {
            crate::vulkan::ibl::destroy_ibl(&self.device, ibl);
        }

        for (_, pair) in self.gbuffer_variants.drain() {
            self.device.destroy_pipeline(pair.pipeline, None);
            self.device.destroy_pipeline_layout(pair.layout, None);
        }
        let pipelines = std::mem::take(&mut self.pipelines);
        for pair in [
            pipelines.terrain,
            pipelines.shadow,
            pipelines.shadow_skinned,
            pipelines.lighting,
            pipelines.forward,
            pipelines.ssao,
            pipelines.ssao_blur,
            pipelines.taa,
            pipelines.dof_coc,
            pipelines.dof_blur,
            pipelines.dof_composite,
            pipelines.motion_blur,
            pipelines.bloom_extract,
            pipelines.blur,
            pipelines.composite,
            pipelines.present,
            pipelines.particle,
            pipelines.ui,
            pipelines.line,
        ] {
            if pair.pipeline != vk::Pipeline::null() {
                self.device.destroy_pipeline(pair.pipeline, None);
                self.device.destroy_pipeline_layout(pair.layout, None);
            }
        }

        for pass in [
            self.gbuffer_pass,
            self.hdr_pass,
            self.ao_pass,
            self.coc_pass,
            self.forward_pass,
            self.shadow_pass,
            self.present_pass,
            self.overlay_pass,
        ] {
            self.device.destroy_render_pass(pass, None);
        }

        for layout in [
            self.per_frame_layout,
            self.material_layout,
            self.bone_layout,
            self.lighting_layout,
            self.post_layout,
            self.terrain_layout,
        ] {
            self.device.destroy_descriptor_set_layout(layout, None);
        }

        for (buffer, memory, _) in self.instance_buffers.drain(..) {
            if buffer != vk::Buffer::null() {
                self.device.destroy_buffer(buffer, None);
                self.device.free_memory(memory, None);
            }
        }
        for list in &mut self.data.reclaim {
            for (buffer, memory) in list.drain(..) {
                self.device.destroy_buffer(buffer, None);
                self.device.free_memory(memory, None);
            }
        }
        for pool in self.data.transient_pools.drain(..) {
            self.device.destroy_descriptor_pool(pool, None);
        }
        for fence in self.data.in_flight_fences.drain(..) {
            self.device.destroy_fence(fence, None);
        }
        for semaphore in self.data.image_available_semaphores.drain(..) {
            self.device.destroy_semaphore(semaphore, None);
        }
        self.device.destroy_command_pool(self.data.command_pool, None);
        self.device.destroy_device(None);
        if VALIDATION_ENABLED {
            self.instance
                .destroy_debug_utils_messenger_ext(self.data.messenger, None);
        }
        self.instance.destroy_surface_khr(self.data.surface, None);
        self.instance.destroy_instance(None);
    }
}

unsafe fn destroy_csm(device: &Device, csm: CsmResources) {
    for fb in csm.framebuffers {
        device.destroy_framebuffer(fb, None);
    }
    for view in csm.layer_views {
        device.destroy_image_view(view, None);
    }
    device.destroy_image_view(csm.array_view, None);
    device.destroy_image(csm.image, None);
    device.free_memory(csm.memory, None);
    device.destroy_sampler(csm.sampler, None);
}

/// Frame-slot fences start signaled so the first wait falls through;
/// image-availability semaphores are per frame, render-finished per image
/// (created alongside the targets).
unsafe fn create_sync_objects(device: &Device, data: &mut RendererData) -> Result<()> {
    let semaphore_info = vk::SemaphoreCreateInfo::builder();
    let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

    for _ in 0..MAX_FRAMES_IN_FLIGHT {
        data.image_available_semaphores
            .push(device.create_semaphore(&semaphore_info, None)?);
        data.in_flight_fences
            .push(device.create_fence(&fence_info, None)?);
    }
    Ok(())
}

/// 1x1 black cubemap standing in for absent IBL bindings.
unsafe fn create_black_cube(
    instance: &Instance,
    device: &Device,
    data: &RendererData,
) -> Result<Texture> {
    let (image, memory) = create_image(
        instance,
        device,
        data,
        1,
        1,
        1,
        6,
        vk::Format::R8G8B8A8_UNORM,
        vk::ImageTiling::OPTIMAL,
        vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        vk::ImageCreateFlags::CUBE_COMPATIBLE,
    )?;
    crate::vulkan::image::transition_image_layout(
        device,
        data,
        image,
        vk::ImageAspectFlags::COLOR,
        1,
        6,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    )?;
    let view = create_image_view(device, image, vk::Format::R8G8B8A8_UNORM, vk::ImageAspectFlags::COLOR, 1, 6)?;
    let sampler = crate::vulkan::image::create_linear_sampler(device)?;
    Ok(Texture {
        image,
        memory,
        view,
        sampler,
    })
}

unsafe fn create_nearest_sampler(device: &Device) -> Result<vk::Sampler> {
    let info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::NEAREST)
        .min_filter(vk::Filter::NEAREST)
        .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .mipmap_mode(vk::SamplerMipmapMode::NEAREST);
    Ok(device.create_sampler(&info, None)?)
}

/// 4x4 random-rotation texture that jitters the SSAO kernel.
unsafe fn create_noise_texture(
    instance: &Instance,
    device: &Device,
    data: &RendererData,
) -> Result<Texture> {
    // Small xorshift keeps the pattern deterministic across runs.
    let mut state: u32 = 0x9e37_79b9;
    let mut next = || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        state
    };
    let mut pixels = Vec::with_capacity(16 * 4);
    for _ in 0..16 {
        pixels.push((next() % 256) as u8);
        pixels.push((next() % 256) as u8);
        pixels.push(128);
        pixels.push(255);
    }
    create_texture_from_pixels(
        instance,
        device,
        data,
        4,
        4,
        vk::Format::R8G8B8A8_UNORM,
        &pixels,
    )
}
