mod deferred;
mod geometry;
mod overlays;
mod post;

use anyhow::Result;
use cgmath::SquareMatrix;
use vulkanalia::prelude::v1_0::*;

use crate::math::Mat4f;
use crate::scene::view::FrameData;
use crate::vulkan::buffer::{create_buffer, fill_memory};
use crate::vulkan::descriptors::{write_target, write_uniform};
use anyhow::anyhow;

use crate::vulkan::frame::{PipelinePair, Renderer, GBUFFER_FORMATS};
use crate::vulkan::pipeline::{
    create_pipeline, set_viewport, Blend, PipelineDesc, VertexInput,
};
use crate::vulkan::shader::{ShaderStage, ShaderVariantKey};
use crate::vulkan::targets::RenderTarget;
use crate::vulkan::uniforms::PushConstants;

impl Renderer {
    /// Compiles and builds every non-variant pipeline of the pass graph.
    pub(crate) unsafe fn create_fixed_pipelines(&mut self) -> Result<()> {
        let fullscreen = self.compiler.compile(
            "fullscreen.vert",
            include_str!("../shaders/fullscreen.vert"),
            ShaderStage::Vertex,
            &[],
        )?;

        let frag = |compiler: &crate::vulkan::shader::ShaderCompiler,
                    name: &str,
                    source: &str|
         -> Result<Vec<u32>> {
            compiler.compile(name, source, ShaderStage::Fragment, &[])
        };

        let push_size = std::mem::size_of::<PushConstants>() as u32;

        // Terrain shares the G-buffer render pass.
        {
            let vert = self.compiler.compile(
                "terrain.vert",
                include_str!("../shaders/terrain.vert"),
                ShaderStage::Vertex,
                &[],
            )?;
            let frag = frag(&self.compiler, "terrain.frag", include_str!("../shaders/terrain.frag"))?;
            let set_layouts = [self.per_frame_layout, self.terrain_layout];
            let (pipeline, layout) = create_pipeline(
                &self.device,
                &PipelineDesc {
                    vert_spv: &vert,
                    frag_spv: Some(&frag),
                    set_layouts: &set_layouts,
                    push_constant_size: push_size,
                    render_pass: self.gbuffer_pass,
                    color_attachment_count: GBUFFER_FORMATS.len() as u32,
                    depth_test: true,
                    depth_write: true,
                    cull_mode: vk::CullModeFlags::BACK,
                    vertex_input: VertexInput::Mesh,
                    ..PipelineDesc::default()
                },
            )?;
            self.pipelines.terrain = PipelinePair { pipeline, layout };
        }

        // Depth-only cascade pipelines; front-face culling counters
        // peter-panning.
        for skinned in [false, true] {
            let defines: &[&str] = if skinned { &["FEATURE_SKINNING"] } else { &[] };
            let vert = self.compiler.compile(
                "shadow.vert",
                include_str!("../shaders/shadow.vert"),
                ShaderStage::Vertex,
                defines,
            )?;
            let set_layouts = [self.per_frame_layout, self.per_frame_layout, self.bone_layout];
            let (pipeline, layout) = create_pipeline(
                &self.device,
                &PipelineDesc {
                    vert_spv: &vert,
                    frag_spv: None,
                    set_layouts: &set_layouts,
                    push_constant_size: push_size,
                    render_pass: self.shadow_pass,
                    color_attachment_count: 0,
                    depth_test: true,
                    depth_write: true,
                    cull_mode: vk::CullModeFlags::FRONT,
                    vertex_input: VertexInput::Mesh,
                    depth_bias: 1.25,
                    ..PipelineDesc::default()
                },
            )?;
            if skinned {
                self.pipelines.shadow_skinned = PipelinePair { pipeline, layout };
            } else {
                self.pipelines.shadow = PipelinePair { pipeline, layout };
            }
        }

        // Deferred lighting.
        {
            let frag = frag(&self.compiler, "lighting.frag", include_str!("../shaders/lighting.frag"))?;
            let set_layouts = [self.per_frame_layout, self.lighting_layout];
            let (pipeline, layout) = create_pipeline(
                &self.device,
                &PipelineDesc {
                    vert_spv: &fullscreen,
                    frag_spv: Some(&frag),
                    set_layouts: &set_layouts,
                    render_pass: self.hdr_pass,
                    ..PipelineDesc::default()
                },
            )?;
            self.pipelines.lighting = PipelinePair { pipeline, layout };
        }

        // Forward transparents over the lit scene.
        {
            let vert = self.compiler.compile(
                "forward.vert",
                include_str!("../shaders/forward.vert"),
                ShaderStage::Vertex,
                &[],
            )?;
            let frag = frag(&self.compiler, "forward.frag", include_str!("../shaders/forward.frag"))?;
            let set_layouts = [self.per_frame_layout, self.material_layout, self.per_frame_layout];
            let (pipeline, layout) = create_pipeline(
                &self.device,
                &PipelineDesc {
                    vert_spv: &vert,
                    frag_spv: Some(&frag),
                    set_layouts: &set_layouts,
                    push_constant_size: push_size,
                    render_pass: self.forward_pass,
                    blend: Blend::Alpha,
                    depth_test: true,
                    depth_write: false,
                    cull_mode: vk::CullModeFlags::NONE,
                    vertex_input: VertexInput::Mesh,
                    ..PipelineDesc::default()
                },
            )?;
            self.pipelines.forward = PipelinePair { pipeline, layout };
        }

        // The fullscreen post family all share the post set layout.
        let post_pipeline = |renderer: &Renderer,
                                 name: &str,
                                 source: &str,
                                 render_pass: vk::RenderPass|
         -> Result<PipelinePair> {
            let frag = renderer
                .compiler
                .compile(name, source, ShaderStage::Fragment, &[])?;
            let set_layouts = [renderer.post_layout];
            let (pipeline, layout) = create_pipeline(
                &renderer.device,
                &PipelineDesc {
                    vert_spv: &fullscreen,
                    frag_spv: Some(&frag),
                    set_layouts: &set_layouts,
                    render_pass,
                    ..PipelineDesc::default()
                },
            )?;
            Ok(PipelinePair { pipeline, layout })
        };

        self.pipelines.ssao =
            post_pipeline(self, "ssao.frag", include_str!("../shaders/ssao.frag"), self.ao_pass)?;
        self.pipelines.ssao_blur = post_pipeline(
            self,
            "ssao_blur.frag",
            include_str!("../shaders/ssao_blur.frag"),
            self.ao_pass,
        )?;
        self.pipelines.taa =
            post_pipeline(self, "taa.frag", include_str!("../shaders/taa.frag"), self.hdr_pass)?;
        self.pipelines.dof_coc = post_pipeline(
            self,
            "dof_coc.frag",
            include_str!("../shaders/dof_coc.frag"),
            self.coc_pass,
        )?;
        self.pipelines.dof_blur = post_pipeline(
            self,
            "dof_blur.frag",
            include_str!("../shaders/dof_blur.frag"),
            self.hdr_pass,
        )?;
        self.pipelines.dof_composite = post_pipeline(
            self,
            "dof_composite.frag",
            include_str!("../shaders/dof_composite.frag"),
            self.hdr_pass,
        )?;
        self.pipelines.motion_blur = post_pipeline(
            self,
            "motion_blur.frag",
            include_str!("../shaders/motion_blur.frag"),
            self.hdr_pass,
        )?;
        self.pipelines.bloom_extract = post_pipeline(
            self,
            "bloom_extract.frag",
            include_str!("../shaders/bloom_extract.frag"),
            self.hdr_pass,
        )?;
        self.pipelines.blur =
            post_pipeline(self, "blur.frag", include_str!("../shaders/blur.frag"), self.hdr_pass)?;
        self.pipelines.composite = post_pipeline(
            self,
            "composite.frag",
            include_str!("../shaders/composite.frag"),
            self.hdr_pass,
        )?;
        self.pipelines.present = post_pipeline(
            self,
            "present.frag",
            include_str!("../shaders/present.frag"),
            self.present_pass,
        )?;

        // Overlays.
        {
            let vert = self.compiler.compile(
                "particle.vert",
                include_str!("../shaders/particle.vert"),
                ShaderStage::Vertex,
                &[],
            )?;
            let frag = frag(&self.compiler, "particle.frag", include_str!("../shaders/particle.frag"))?;
            let set_layouts = [self.per_frame_layout];
            let (pipeline, layout) = create_pipeline(
                &self.device,
                &PipelineDesc {
                    vert_spv: &vert,
                    frag_spv: Some(&frag),
                    set_layouts: &set_layouts,
                    render_pass: self.overlay_pass,
                    blend: Blend::Alpha,
                    topology: vk::PrimitiveTopology::POINT_LIST,
                    vertex_input: VertexInput::Particle,
                    ..PipelineDesc::default()
                },
            )?;
            self.pipelines.particle = PipelinePair { pipeline, layout };
        }
        {
            let vert = self.compiler.compile(
                "ui.vert",
                include_str!("../shaders/ui.vert"),
                ShaderStage::Vertex,
                &[],
            )?;
            let frag = frag(&self.compiler, "ui.frag", include_str!("../shaders/ui.frag"))?;
            let set_layouts = [self.ui_layout];
            let (pipeline, layout) = create_pipeline(
                &self.device,
                &PipelineDesc {
                    vert_spv: &vert,
                    frag_spv: Some(&frag),
                    set_layouts: &set_layouts,
                    push_constant_size: 8,
                    render_pass: self.overlay_pass,
                    blend: Blend::Alpha,
                    vertex_input: VertexInput::Ui,
                    ..PipelineDesc::default()
                },
            )?;
            self.pipelines.ui = PipelinePair { pipeline, layout };
        }
        {
            let vert = self.compiler.compile(
                "line.vert",
                include_str!("../shaders/line.vert"),
                ShaderStage::Vertex,
                &[],
            )?;
            let frag = frag(&self.compiler, "line.frag", include_str!("../shaders/line.frag"))?;
            let set_layouts = [self.per_frame_layout];
            let (pipeline, layout) = create_pipeline(
                &self.device,
                &PipelineDesc {
                    vert_spv: &vert,
                    frag_spv: Some(&frag),
                    set_layouts: &set_layouts,
                    render_pass: self.overlay_pass,
                    blend: Blend::Alpha,
                    topology: vk::PrimitiveTopology::LINE_LIST,
                    vertex_input: VertexInput::Line,
                    ..PipelineDesc::default()
                },
            )?;
            self.pipelines.line = PipelinePair { pipeline, layout };
        }

        Ok(())
    }

    /// Records the whole pass graph for one frame into this slot's
    /// command buffer.
    pub(crate) unsafe fn record_frame(
        &mut self,
        world: &crate::ecs::World,
        frame_data: &FrameData,
        frame: usize,
        image_index: usize,
    ) -> Result<()> {
        let cb = self.data.command_buffers[frame];
        self.device
            .reset_command_buffer(cb, vk::CommandBufferResetFlags::empty())?;
        let begin = vk::CommandBufferBeginInfo::builder();
        self.device.begin_command_buffer(cb, &begin)?;

        self.update_cascades(frame_data);

        let frame_ubo = self.frame_ubo(frame_data);
        let per_frame_set = self.per_frame_set(frame, &frame_ubo)?;

        // 1. Cascaded shadow maps, gated on a primary directional light.
        if frame_data.primary_light_direction.is_some() {
            self.record_shadow_pass(cb, frame, world, frame_data)?;
        }

        // 2. G-buffer (an empty frame still clears the targets).
        self.record_gbuffer_pass(cb, frame, world, frame_data, per_frame_set)?;

        // 3. SSAO raw + blur.
        let ssao_enabled = self.config.post.ssao_enabled && !frame_data.is_empty();
        let ssao_view = if ssao_enabled {
            self.record_ssao(cb, frame, frame_data)?
        } else {
            self.white_texture.view
        };

        // 4. Deferred lighting into the first HDR target.
        self.record_lighting_pass(cb, frame, frame_data, per_frame_set, ssao_view)?;

        // 4b. Transparents, back-to-front, over the lit scene.
        if !frame_data.transparent.is_empty() {
            self.record_forward_pass(cb, frame, world, frame_data, per_frame_set)?;
        }

        // 5..8. Post chain over ping-ponged HDR targets. TAA writes the
        // history target for next frame and the chain continues from it.
        let mut src: (vk::Framebuffer, RenderTarget) = (self.targets.hdr_a_fb, self.targets.hdr_a);
        let mut free: Vec<(vk::Framebuffer, RenderTarget)> =
            vec![(self.targets.hdr_b_fb, self.targets.hdr_b)];
        let history_images = [self.targets.history_a.image, self.targets.history_b.image];
        let mut rotate = |src: &mut (vk::Framebuffer, RenderTarget),
                          dst: (vk::Framebuffer, RenderTarget),
                          free: &mut Vec<(vk::Framebuffer, RenderTarget)>| {
            if !history_images.contains(&src.1.image) {
                free.push(*src);
            }
            *src = dst;
        };

        if self.config.post.taa_enabled {
            let parity = frame % 2 == 0;
            let (write_fb, write_target) = if parity {
                (self.targets.history_a_fb, self.targets.history_a)
            } else {
                (self.targets.history_b_fb, self.targets.history_b)
            };
            let read_view = if parity {
                self.targets.history_b.view
            } else {
                self.targets.history_a.view
            };
            self.record_taa(cb, frame, frame_data, src.1.view, read_view, write_fb, write_target.extent)?;
            rotate(&mut src, (write_fb, write_target), &mut free);
        }

        if self.config.post.dof_enabled {
            let dst = free.pop().ok_or_else(|| anyhow!("no free HDR target"))?;
            self.record_dof(cb, frame, frame_data, src.1.view, dst)?;
            rotate(&mut src, dst, &mut free);
        }

        if self.config.post.motion_blur_enabled {
            let dst = free.pop().ok_or_else(|| anyhow!("no free HDR target"))?;
            self.record_motion_blur(cb, frame, frame_data, src.1.view, dst)?;
            rotate(&mut src, dst, &mut free);
        }

        let bloom_enabled = self.config.post.bloom_enabled;
        let composite_needed = bloom_enabled
            || self.config.post.color_grading_enabled
            || self.config.post.vignette_enabled;
        let mut tonemapped = false;
        if composite_needed {
            let bloom_view = if bloom_enabled {
                self.record_bloom(cb, frame, src.1.view)?
            } else {
                self.black_texture.view
            };
            let dst = free.pop().ok_or_else(|| anyhow!("no free HDR target"))?;
            self.record_composite(cb, frame, src.1.view, bloom_view, dst)?;
            rotate(&mut src, dst, &mut free);
            tonemapped = true;
        }

        // 9. Present blit (+ optional FXAA, tonemap fallback when the
        // composite pass was skipped).
        self.record_present(cb, frame, src.1.view, image_index, !tonemapped)?;

        // 10..12. Overlays on the swapchain image.
        if !self.particles.is_empty() {
            self.record_particles(cb, frame, per_frame_set, image_index)?;
        }
        if self.ui_callback.is_some() {
            self.record_ui(cb, frame, image_index)?;
        }
        if self.config.debug_lines_enabled && !self.debug_lines.is_empty() {
            self.record_debug_lines(cb, frame, per_frame_set, image_index)?;
        }

        self.device.end_command_buffer(cb)?;
        Ok(())
    }

    fn update_cascades(&mut self, frame_data: &FrameData) {
        let Some(light_dir) = frame_data.primary_light_direction else {
            if let Some(csm) = self.csm.as_mut() {
                csm.cascades.clear();
            }
            return;
        };
        let Some(csm) = self.csm.as_mut() else {
            return;
        };
        csm.cascades = crate::vulkan::csm::compute_cascades(
            csm.num_cascades,
            csm.near,
            csm.far,
            frame_data.view,
            frame_data.projection,
            light_dir,
            csm.resolution,
        );
    }

    /// Shared fullscreen-pass helper: transient parameter UBO, transient
    /// post set, one triangle.
    pub(crate) unsafe fn fullscreen_pass<T>(
        &mut self,
        cb: vk::CommandBuffer,
        frame: usize,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
        params: &T,
        inputs: &[(u32, vk::ImageView, vk::Sampler)],
    ) -> Result<()> {
        let buffer = self.transient_ubo(frame, std::slice::from_ref(params))?;
        let set = self.transient_set(frame, self.post_layout)?;
        write_uniform(&self.device, set, 0, buffer, std::mem::size_of::<T>() as u64);
        for (binding, view, sampler) in inputs {
            write_target(&self.device, set, *binding, *view, *sampler);
        }

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
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);
        self.device
            .cmd_begin_render_pass(cb, &info, vk::SubpassContents::INLINE);
        self.device
            .cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, pipeline);
        set_viewport(&self.device, cb, extent);
        self.device.cmd_bind_descriptor_sets(
            cb,
            vk::PipelineBindPoint::GRAPHICS,
            layout,
            0,
            &[set],
            &[],
        );
        self.device.cmd_draw(cb, 3, 1, 0, 0);
        self.device.cmd_end_render_pass(cb);
        Ok(())
    }

    /// Host-visible vertex buffer living until this frame slot recurs.
    pub(crate) unsafe fn transient_vertices<T>(
        &mut self,
        frame: usize,
        payload: &[T],
    ) -> Result<vk::Buffer> {
        let size = std::mem::size_of_val(payload) as u64;
        let (buffer, memory) = create_buffer(
            &self.instance,
            &self.device,
            &self.data,
            size,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        fill_memory(&self.device, memory, payload)?;
        self.data.reclaim[frame].push((buffer, memory));
        Ok(buffer)
    }

    /// Uploads the batched instance matrices into this frame's shared
    /// host-visible buffer, growing it 2x when it would overflow. The
    /// buffer is never shrunk.
    pub(crate) unsafe fn upload_instances(
        &mut self,
        frame: usize,
        matrices: &[Mat4f],
    ) -> Result<vk::Buffer> {
        let needed = matrices.len().max(1);
        let (buffer, memory, capacity) = self.instance_buffers[frame];
        if capacity < needed {
            let mut new_capacity = capacity.max(64);
            while new_capacity < needed {
                new_capacity *= 2;
            }
            if buffer != vk::Buffer::null() {
                // The old buffer may still be read by the in-flight frame.
                self.data.reclaim[frame].push((buffer, memory));
            }
            let (new_buffer, new_memory) = create_buffer(
                &self.instance,
                &self.device,
                &self.data,
                (new_capacity * std::mem::size_of::<Mat4f>()) as u64,
                vk::BufferUsageFlags::VERTEX_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?;
            self.instance_buffers[frame] = (new_buffer, new_memory, new_capacity);
        }
        let (buffer, memory, _) = self.instance_buffers[frame];
        fill_memory(&self.device, memory, matrices)?;
        Ok(buffer)
    }

    /// Clip-space matrices for the post passes.
    pub(crate) fn view_proj(&self, frame_data: &FrameData) -> (Mat4f, Mat4f) {
        let view_proj =
            crate::vulkan::uniforms::correct_projection(frame_data.projection) * frame_data.view;
        let inverse = view_proj.invert().unwrap_or_else(Mat4f::identity);
        (view_proj, inverse)
    }
}

