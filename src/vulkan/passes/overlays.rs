use anyhow::Result;
use vulkanalia::prelude::v1_0::*;

use crate::vulkan::descriptors::write_target;
use crate::vulkan::frame::Renderer;
use crate::vulkan::overlay::ParticleVertex;
use crate::vulkan::pipeline::set_viewport;

impl Renderer {
    unsafe fn begin_overlay(&self, cb: vk::CommandBuffer, image_index: usize) {
        let render_area = vk::Rect2D::builder()
            .offset(vk::Offset2D::default())
            .extent(self.data.swapchain_extent);
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.overlay_pass)
            .framebuffer(self.targets.swapchain_fbs[image_index])
            .render_area(render_area);
        self.device
            .cmd_begin_render_pass(cb, &info, vk::SubpassContents::INLINE);
        set_viewport(&self.device, cb, self.data.swapchain_extent);
    }

    /// Pass 10: live particles as camera-facing point sprites.
    pub(crate) unsafe fn record_particles(
        &mut self,
        cb: vk::CommandBuffer,
        frame: usize,
        per_frame_set: vk::DescriptorSet,
        image_index: usize,
    ) -> Result<()> {
        let vertices: Vec<ParticleVertex> = self
            .particles
            .particles
            .iter()
            .map(|p| ParticleVertex {
                position: [p.position.x, p.position.y, p.position.z],
                size: p.size,
                color: [p.color.x, p.color.y, p.color.z, p.color.w],
            })
            .collect();
        let buffer = self.transient_vertices(frame, &vertices)?;

        self.begin_overlay(cb, image_index);
        self.device.cmd_bind_pipeline(
            cb,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipelines.particle.pipeline,
        );
        self.device.cmd_bind_descriptor_sets(
            cb,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipelines.particle.layout,
            0,
            &[per_frame_set],
            &[],
        );
        self.device.cmd_bind_vertex_buffers(cb, 0, &[buffer], &[0]);
        self.device.cmd_draw(cb, vertices.len() as u32, 1, 0, 0);
        self.device.cmd_end_render_pass(cb);
        Ok(())
    }

    /// Pass 11: the registered UI callback's triangles in pixel space.
    pub(crate) unsafe fn record_ui(
        &mut self,
        cb: vk::CommandBuffer,
        frame: usize,
        image_index: usize,
    ) -> Result<()> {
        let extent = self.data.swapchain_extent;
        // Take the callback out so it can borrow whatever it likes while
        // we still own `self`.
        let Some(mut callback) = self.ui_callback.take() else {
            return Ok(());
        };
        let vertices = callback(extent.width, extent.height);
        self.ui_callback = Some(callback);
        if vertices.is_empty() {
            return Ok(());
        }

        let buffer = self.transient_vertices(frame, &vertices)?;
        let set = self.transient_set(frame, self.ui_layout)?;
        write_target(
            &self.device,
            set,
            0,
            self.white_texture.view,
            self.white_texture.sampler,
        );

        self.begin_overlay(cb, image_index);
        self.device.cmd_bind_pipeline(
            cb,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipelines.ui.pipeline,
        );
        self.device.cmd_bind_descriptor_sets(
            cb,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipelines.ui.layout,
            0,
            &[set],
            &[],
        );
        let screen = [extent.width as f32, extent.height as f32];
        self.device.cmd_push_constants(
            cb,
            self.pipelines.ui.layout,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            0,
            std::slice::from_raw_parts(screen.as_ptr().cast::<u8>(), 8),
        );
        self.device.cmd_bind_vertex_buffers(cb, 0, &[buffer], &[0]);
        self.device.cmd_draw(cb, vertices.len() as u32, 1, 0, 0);
        self.device.cmd_end_render_pass(cb);
        Ok(())
    }

    /// Pass 12: world-space debug lines.
    pub(crate) unsafe fn record_debug_lines(
        &mut self,
        cb: vk::CommandBuffer,
        frame: usize,
        per_frame_set: vk::DescriptorSet,
        image_index: usize,
    ) -> Result<()> {
        let vertices = self.debug_lines.vertices.clone();
        let buffer = self.transient_vertices(frame, &vertices)?;

        self.begin_overlay(cb, image_index);
        self.device.cmd_bind_pipeline(
            cb,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipelines.line.pipeline,
        );
        self.device.cmd_bind_descriptor_sets(
            cb,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipelines.line.layout,
            0,
            &[per_frame_set],
            &[],
        );
        self.device.cmd_bind_vertex_buffers(cb, 0, &[buffer], &[0]);
        self.device.cmd_draw(cb, vertices.len() as u32, 1, 0, 0);
        self.device.cmd_end_render_pass(cb);
        Ok(())
    }
}
