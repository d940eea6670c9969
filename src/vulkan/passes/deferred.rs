use anyhow::Result;
use cgmath::SquareMatrix;
use vulkanalia::prelude::v1_0::*;

use crate::math::Mat4f;
use crate::scene::view::FrameData;
use crate::vulkan::descriptors::{write_target, write_uniform};
use crate::vulkan::frame::Renderer;
use crate::vulkan::pipeline::set_viewport;
use crate::vulkan::uniforms::{
    correct_projection, pack_lights, ssao_kernel, LightsUbo, PostParamsUbo, ShadowUbo, SsaoUbo,
    MAX_CASCADES,
};

impl Renderer {
    /// Pass 3: SSAO raw estimate then separable blur. Returns the view the
    /// lighting pass should sample (the blur lands back in the raw
    /// target).
    pub(crate) unsafe fn record_ssao(
        &mut self,
        cb: vk::CommandBuffer,
        frame: usize,
        frame_data: &FrameData,
    ) -> Result<vk::ImageView> {
        let extent = self.data.swapchain_extent;
        let projection = correct_projection(frame_data.projection);
        let ubo = SsaoUbo {
            projection,
            inv_projection: projection.invert().unwrap_or_else(Mat4f::identity),
            samples: ssao_kernel(),
            params: [
                0.5,   // radius
                0.025, // bias
                1.5,   // power
                extent.width as f32 / 4.0,
            ],
        };
        let depth_view = self.targets.depth.view;
        let normal_view = self.targets.gbuffer[1].view;
        let raw = (self.ao_pass, self.targets.ssao_raw_fb);
        let (noise_view, noise_sampler) = (self.noise_texture.view, self.noise_texture.sampler);
        let nearest = self.nearest_sampler;
        let linear = self.linear_sampler;

        let ssao_pipeline = (self.pipelines.ssao.pipeline, self.pipelines.ssao.layout);
        self.fullscreen_pass(
            cb,
            frame,
            raw.0,
            raw.1,
            extent,
            ssao_pipeline.0,
            ssao_pipeline.1,
            &ubo,
            &[
                (1, depth_view, nearest),
                (2, normal_view, linear),
                (3, noise_view, noise_sampler),
            ],
        )?;

        // Separable 4-tap box blur, horizontal into the spare target and
        // vertical back into the raw one.
        let blur = (self.pipelines.ssao_blur.pipeline, self.pipelines.ssao_blur.layout);
        let horizontal = PostParamsUbo {
            params0: [1.0, 0.0, 0.0, 0.0],
            ..PostParamsUbo::default()
        };
        let raw_view = self.targets.ssao_raw.view;
        let blurred_fb = self.targets.ssao_blurred_fb;
        self.fullscreen_pass(
            cb,
            frame,
            self.ao_pass,
            blurred_fb,
            extent,
            blur.0,
            blur.1,
            &horizontal,
            &[(1, raw_view, linear)],
        )?;
        let vertical = PostParamsUbo {
            params0: [0.0, 1.0, 0.0, 0.0],
            ..PostParamsUbo::default()
        };
        let blurred_view = self.targets.ssao_blurred.view;
        let raw_fb = self.targets.ssao_raw_fb;
        self.fullscreen_pass(
            cb,
            frame,
            self.ao_pass,
            raw_fb,
            extent,
            blur.0,
            blur.1,
            &vertical,
            &[(1, blurred_view, linear)],
        )?;

        Ok(self.targets.ssao_raw.view)
    }

    /// Pass 4: fullscreen deferred shading into the first HDR target.
    pub(crate) unsafe fn record_lighting_pass(
        &mut self,
        cb: vk::CommandBuffer,
        frame: usize,
        frame_data: &FrameData,
        per_frame_set: vk::DescriptorSet,
        ssao_view: vk::ImageView,
    ) -> Result<()> {
        let extent = self.data.swapchain_extent;

        let lights_ubo = pack_lights(
            &frame_data.lights,
            self.ibl.is_some(),
            self.ibl.as_ref().map_or(0.0, |ibl| ibl.intensity),
        );
        let lights_buffer = self.transient_ubo(frame, std::slice::from_ref(&lights_ubo))?;

        let shadow_ubo = self.shadow_ubo(frame_data);
        let shadow_buffer = self.transient_ubo(frame, std::slice::from_ref(&shadow_ubo))?;

        let set = self.transient_set(frame, self.lighting_layout)?;
        for (binding, target) in self.targets.gbuffer.iter().enumerate() {
            write_target(
                &self.device,
                set,
                binding as u32,
                target.view,
                self.linear_sampler,
            );
        }
        write_target(&self.device, set, 4, self.targets.depth.view, self.nearest_sampler);
        write_target(&self.device, set, 5, ssao_view, self.linear_sampler);
        write_uniform(
            &self.device,
            set,
            6,
            lights_buffer,
            std::mem::size_of::<LightsUbo>() as u64,
        );
        write_uniform(
            &self.device,
            set,
            7,
            shadow_buffer,
            std::mem::size_of::<ShadowUbo>() as u64,
        );
        if let Some(csm) = self.csm.as_ref() {
            write_target(&self.device, set, 8, csm.array_view, csm.sampler);
        }
        let (irradiance, prefiltered, brdf) = match self.ibl.as_ref() {
            Some(ibl) => (
                (ibl.irradiance.view, ibl.irradiance.sampler),
                (ibl.prefiltered.view, ibl.prefiltered.sampler),
                (ibl.brdf_lut.view, ibl.brdf_lut.sampler),
            ),
            None => (
                (self.black_cube.view, self.black_cube.sampler),
                (self.black_cube.view, self.black_cube.sampler),
                (self.black_texture.view, self.black_texture.sampler),
            ),
        };
        write_target(&self.device, set, 9, irradiance.0, irradiance.1);
        write_target(&self.device, set, 10, prefiltered.0, prefiltered.1);
        write_target(&self.device, set, 11, brdf.0, brdf.1);

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 1.0],
            },
        }];
        let render_area = vk::Rect2D::builder()
            .offset(vk::Offset2D::default())
            .extent(extent);
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.hdr_pass)
            .framebuffer(self.targets.hdr_a_fb)
            .render_area(render_area)
            .clear_values(&clear_values);
        self.device
            .cmd_begin_render_pass(cb, &info, vk::SubpassContents::INLINE);
        self.device.cmd_bind_pipeline(
            cb,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipelines.lighting.pipeline,
        );
        set_viewport(&self.device, cb, extent);
        self.device.cmd_bind_descriptor_sets(
            cb,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipelines.lighting.layout,
            0,
            &[per_frame_set, set],
            &[],
        );
        self.device.cmd_draw(cb, 3, 1, 0, 0);
        self.device.cmd_end_render_pass(cb);
        Ok(())
    }

    fn shadow_ubo(&self, frame_data: &FrameData) -> ShadowUbo {
        let mut ubo = ShadowUbo {
            cascades: [Mat4f::identity(); MAX_CASCADES],
            splits: [[0.0; 4]; 5],
            num_cascades: 0,
            has_shadows: 0,
            _pad: [0; 2],
        };
        let Some(csm) = self.csm.as_ref() else {
            return ubo;
        };
        if csm.cascades.is_empty() || frame_data.primary_light_direction.is_none() {
            return ubo;
        }
        ubo.num_cascades = csm.cascades.len() as i32;
        ubo.has_shadows = 1;
        for (slot, cascade) in csm.cascades.iter().take(MAX_CASCADES).enumerate() {
            ubo.cascades[slot] = cascade.view_proj;
            ubo.splits[slot] = [cascade.split_depth, 0.0, 0.0, 0.0];
        }
        ubo.splits[4] = [csm.far, 0.0, 0.0, 0.0];
        ubo
    }
}
