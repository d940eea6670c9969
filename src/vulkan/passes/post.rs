use anyhow::Result;
use vulkanalia::prelude::v1_0::*;

use crate::scene::view::FrameData;
use crate::vulkan::frame::Renderer;
use crate::vulkan::targets::RenderTarget;
use crate::vulkan::uniforms::PostParamsUbo;

impl Renderer {
    /// Pass 5: temporal anti-aliasing. Blends the current scene with the
    /// reprojected history and writes next frame's history in the same
    /// draw.
    pub(crate) unsafe fn record_taa(
        &mut self,
        cb: vk::CommandBuffer,
        frame: usize,
        frame_data: &FrameData,
        current_view: vk::ImageView,
        history_view: vk::ImageView,
        write_fb: vk::Framebuffer,
        extent: vk::Extent2D,
    ) -> Result<()> {
        let (_, inv_view_proj) = self.view_proj(frame_data);
        let params = PostParamsUbo {
            matrix_a: self.prev_view_proj,
            matrix_b: inv_view_proj,
            params0: [
                self.config.post.taa_feedback,
                if self.taa_first_frame { 1.0 } else { 0.0 },
                0.0,
                0.0,
            ],
            ..PostParamsUbo::default()
        };
        let depth_view = self.targets.depth.view;
        let linear = self.linear_sampler;
        let nearest = self.nearest_sampler;
        let pipeline = (self.pipelines.taa.pipeline, self.pipelines.taa.layout);
        self.fullscreen_pass(
            cb,
            frame,
            self.hdr_pass,
            write_fb,
            extent,
            pipeline.0,
            pipeline.1,
            &params,
            &[
                (1, current_view, linear),
                (2, history_view, linear),
                (3, depth_view, nearest),
            ],
        )
    }

    /// Pass 6: depth of field. CoC from depth, separable CoC-weighted
    /// blur, then a sharp/blurred composite into `dst`.
    pub(crate) unsafe fn record_dof(
        &mut self,
        cb: vk::CommandBuffer,
        frame: usize,
        frame_data: &FrameData,
        src_view: vk::ImageView,
        dst: (vk::Framebuffer, RenderTarget),
    ) -> Result<()> {
        let extent = self.data.swapchain_extent;
        let (_, inv_view_proj) = self.view_proj(frame_data);
        let linear = self.linear_sampler;
        let nearest = self.nearest_sampler;

        let coc_params = PostParamsUbo {
            matrix_a: inv_view_proj,
            matrix_b: frame_data.view,
            params0: [
                self.config.post.dof_focus_distance,
                self.config.post.dof_focus_range,
                1.0,
                0.0,
            ],
            ..PostParamsUbo::default()
        };
        let depth_view = self.targets.depth.view;
        let coc = (self.pipelines.dof_coc.pipeline, self.pipelines.dof_coc.layout);
        let coc_fb = self.targets.coc_fb;
        self.fullscreen_pass(
            cb,
            frame,
            self.coc_pass,
            coc_fb,
            extent,
            coc.0,
            coc.1,
            &coc_params,
            &[(1, depth_view, nearest)],
        )?;

        let coc_view = self.targets.coc.view;
        let blur = (self.pipelines.dof_blur.pipeline, self.pipelines.dof_blur.layout);
        let horizontal = PostParamsUbo {
            params0: [1.0, 0.0, 0.0, 0.0],
            ..PostParamsUbo::default()
        };
        let dof_a_fb = self.targets.dof_a_fb;
        self.fullscreen_pass(
            cb,
            frame,
            self.hdr_pass,
            dof_a_fb,
            extent,
            blur.0,
            blur.1,
            &horizontal,
            &[(1, src_view, linear), (2, coc_view, linear)],
        )?;
        let vertical = PostParamsUbo {
            params0: [0.0, 1.0, 0.0, 0.0],
            ..PostParamsUbo::default()
        };
        let dof_a_view = self.targets.dof_a.view;
        let dof_b_fb = self.targets.dof_b_fb;
        self.fullscreen_pass(
            cb,
            frame,
            self.hdr_pass,
            dof_b_fb,
            extent,
            blur.0,
            blur.1,
            &vertical,
            &[(1, dof_a_view, linear), (2, coc_view, linear)],
        )?;

        let dof_b_view = self.targets.dof_b.view;
        let composite = (
            self.pipelines.dof_composite.pipeline,
            self.pipelines.dof_composite.layout,
        );
        self.fullscreen_pass(
            cb,
            frame,
            self.hdr_pass,
            dst.0,
            extent,
            composite.0,
            composite.1,
            &PostParamsUbo::default(),
            &[
                (1, src_view, linear),
                (2, dof_b_view, linear),
                (3, coc_view, linear),
            ],
        )
    }

    /// Pass 7: camera motion blur from depth reprojection.
    pub(crate) unsafe fn record_motion_blur(
        &mut self,
        cb: vk::CommandBuffer,
        frame: usize,
        frame_data: &FrameData,
        src_view: vk::ImageView,
        dst: (vk::Framebuffer, RenderTarget),
    ) -> Result<()> {
        let extent = self.data.swapchain_extent;
        let (_, inv_view_proj) = self.view_proj(frame_data);
        let params = PostParamsUbo {
            matrix_a: self.prev_view_proj,
            matrix_b: inv_view_proj,
            params0: [
                self.config.post.motion_blur_strength,
                self.config.post.motion_blur_samples.max(1) as f32,
                0.0,
                0.0,
            ],
            ..PostParamsUbo::default()
        };
        let depth_view = self.targets.depth.view;
        let linear = self.linear_sampler;
        let nearest = self.nearest_sampler;
        let pipeline = (
            self.pipelines.motion_blur.pipeline,
            self.pipelines.motion_blur.layout,
        );
        self.fullscreen_pass(
            cb,
            frame,
            self.hdr_pass,
            dst.0,
            extent,
            pipeline.0,
            pipeline.1,
            &params,
            &[(1, src_view, linear), (2, depth_view, nearest)],
        )
    }

    /// Pass 8a: bright-pass extract into the half-resolution bloom chain,
    /// then two separable gaussian rounds. Returns the final bloom view.
    pub(crate) unsafe fn record_bloom(
        &mut self,
        cb: vk::CommandBuffer,
        frame: usize,
        src_view: vk::ImageView,
    ) -> Result<vk::ImageView> {
        let extent = self.targets.bloom_a.extent;
        let linear = self.linear_sampler;

        let extract = PostParamsUbo {
            params0: [self.config.post.bloom_threshold, 0.0, 0.0, 0.0],
            ..PostParamsUbo::default()
        };
        let extract_pipeline = (
            self.pipelines.bloom_extract.pipeline,
            self.pipelines.bloom_extract.layout,
        );
        let bloom_a_fb = self.targets.bloom_a_fb;
        self.fullscreen_pass(
            cb,
            frame,
            self.hdr_pass,
            bloom_a_fb,
            extent,
            extract_pipeline.0,
            extract_pipeline.1,
            &extract,
            &[(1, src_view, linear)],
        )?;

        let blur = (self.pipelines.blur.pipeline, self.pipelines.blur.layout);
        for _ in 0..2 {
            let horizontal = PostParamsUbo {
                params0: [1.0, 0.0, 0.0, 0.0],
                ..PostParamsUbo::default()
            };
            let a_view = self.targets.bloom_a.view;
            let b_fb = self.targets.bloom_b_fb;
            self.fullscreen_pass(
                cb,
                frame,
                self.hdr_pass,
                b_fb,
                extent,
                blur.0,
                blur.1,
                &horizontal,
                &[(1, a_view, linear)],
            )?;
            let vertical = PostParamsUbo {
                params0: [0.0, 1.0, 0.0, 0.0],
                ..PostParamsUbo::default()
            };
            let b_view = self.targets.bloom_b.view;
            let a_fb = self.targets.bloom_a_fb;
            self.fullscreen_pass(
                cb,
                frame,
                self.hdr_pass,
                a_fb,
                extent,
                blur.0,
                blur.1,
                &vertical,
                &[(1, b_view, linear)],
            )?;
        }
        Ok(self.targets.bloom_a.view)
    }

    /// Pass 8b: bloom merge, tonemap, gamma, vignette, color grading.
    pub(crate) unsafe fn record_composite(
        &mut self,
        cb: vk::CommandBuffer,
        frame: usize,
        src_view: vk::ImageView,
        bloom_view: vk::ImageView,
        dst: (vk::Framebuffer, RenderTarget),
    ) -> Result<()> {
        let extent = self.data.swapchain_extent;
        let post = self.config.post.clone();
        let params = PostParamsUbo {
            params0: [
                post.bloom_intensity,
                post.gamma,
                post.tone_mapping as i32 as f32,
                post.vignette_strength,
            ],
            params1: [
                post.color_grading[0],
                post.color_grading[1],
                post.color_grading[2],
                0.0,
            ],
            flags: [
                i32::from(post.bloom_enabled),
                i32::from(post.vignette_enabled),
                i32::from(post.color_grading_enabled),
                0,
            ],
            ..PostParamsUbo::default()
        };
        let linear = self.linear_sampler;
        let pipeline = (
            self.pipelines.composite.pipeline,
            self.pipelines.composite.layout,
        );
        self.fullscreen_pass(
            cb,
            frame,
            self.hdr_pass,
            dst.0,
            extent,
            pipeline.0,
            pipeline.1,
            &params,
            &[(1, src_view, linear), (2, bloom_view, linear)],
        )
    }

    /// Pass 9: blit onto the swapchain image, with optional FXAA and the
    /// tonemap fallback when the composite pass did not run.
    pub(crate) unsafe fn record_present(
        &mut self,
        cb: vk::CommandBuffer,
        frame: usize,
        src_view: vk::ImageView,
        image_index: usize,
        fallback_tonemap: bool,
    ) -> Result<()> {
        let extent = self.data.swapchain_extent;
        let params = PostParamsUbo {
            params0: [
                self.config.post.tone_mapping as i32 as f32,
                self.config.post.gamma,
                0.0,
                0.0,
            ],
            flags: [
                i32::from(self.config.post.fxaa_enabled),
                i32::from(fallback_tonemap),
                0,
                0,
            ],
            ..PostParamsUbo::default()
        };
        let linear = self.linear_sampler;
        let fb = self.targets.swapchain_fbs[image_index];
        let pipeline = (self.pipelines.present.pipeline, self.pipelines.present.layout);
        self.fullscreen_pass(
            cb,
            frame,
            self.present_pass,
            fb,
            extent,
            pipeline.0,
            pipeline.1,
            &params,
            &[(1, src_view, linear)],
        )
    }
}
