use anyhow::Result;
use vulkanalia::prelude::v1_0::*;

use crate::vulkan::mesh::Vertex;

/// How a pipeline consumes vertex data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexInput {
    /// No vertex buffers: the vertex shader synthesizes a fullscreen
    /// triangle from gl_VertexIndex.
    None,
    Mesh,
    /// Mesh vertices plus the per-instance matrix stream on binding 3.
    MeshInstanced,
    /// Debug-line overlay vertices.
    Line,
    /// Particle point sprites.
    Particle,
    /// UI overlay vertices in pixel space.
    Ui,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Blend {
    Opaque,
    Alpha,
    Additive,
}

/// Everything that varies between the graphics pipelines of the pass
/// graph. One factory function keeps the forty-odd parameters of
/// vkCreateGraphicsPipelines in one place.
pub struct PipelineDesc<'a> {
    pub vert_spv: &'a [u32],
    pub frag_spv: Option<&'a [u32]>,
    pub set_layouts: &'a [vk::DescriptorSetLayout],
    pub push_constant_size: u32,
    pub render_pass: vk::RenderPass,
    pub color_attachment_count: u32,
    pub blend: Blend,
    pub depth_test: bool,
    pub depth_write: bool,
    pub cull_mode: vk::CullModeFlags,
    pub topology: vk::PrimitiveTopology,
    pub vertex_input: VertexInput,
    /// Constant depth bias for the shadow pipelines.
    pub depth_bias: f32,
}

impl<'a> Default for PipelineDesc<'a> {
    fn default() -> Self {
        Self {
            vert_spv: &[],
            frag_spv: None,
            set_layouts: &[],
            push_constant_size: 0,
            render_pass: vk::RenderPass::null(),
            color_attachment_count: 1,
            blend: Blend::Opaque,
            depth_test: false,
            depth_write: false,
            cull_mode: vk::CullModeFlags::NONE,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            vertex_input: VertexInput::None,
            depth_bias: 0.0,
        }
    }
}

pub unsafe fn create_shader_module(device: &Device, spv: &[u32]) -> Result<vk::ShaderModule> {
    let info = vk::ShaderModuleCreateInfo::builder()
        .code_size(spv.len() * 4)
        .code(spv);
    Ok(device.create_shader_module(&info, None)?)
}

pub unsafe fn create_pipeline(
    device: &Device,
    desc: &PipelineDesc,
) -> Result<(vk::Pipeline, vk::PipelineLayout)> {
    let vert_module = create_shader_module(device, desc.vert_spv)?;
    let frag_module = match desc.frag_spv {
        Some(spv) => Some(create_shader_module(device, spv)?),
        None => None,
    };

    let mut stages = vec![vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(vert_module)
        .name(b"main\0")
        .build()];
    if let Some(frag_module) = frag_module {
        stages.push(
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_module)
                .name(b"main\0")
                .build(),
        );
    }

    let mut binding_descriptions = Vec::new();
    let mut attribute_descriptions = Vec::new();
    match desc.vertex_input {
        VertexInput::None => {}
        VertexInput::Mesh => {
            binding_descriptions.push(Vertex::binding_description());
            attribute_descriptions.extend(Vertex::attribute_descriptions());
        }
        VertexInput::MeshInstanced => {
            binding_descriptions.push(Vertex::binding_description());
            binding_descriptions.push(Vertex::instance_binding_description());
            attribute_descriptions.extend(Vertex::attribute_descriptions());
            attribute_descriptions.extend(Vertex::instance_attribute_descriptions());
        }
        VertexInput::Line => {
            binding_descriptions.push(crate::vulkan::overlay::LineVertex::binding_description());
            attribute_descriptions
                .extend(crate::vulkan::overlay::LineVertex::attribute_descriptions());
        }
        VertexInput::Particle => {
            binding_descriptions
                .push(crate::vulkan::overlay::ParticleVertex::binding_description());
            attribute_descriptions
                .extend(crate::vulkan::overlay::ParticleVertex::attribute_descriptions());
        }
        VertexInput::Ui => {
            binding_descriptions.push(crate::vulkan::overlay::UiVertex::binding_description());
            attribute_descriptions
                .extend(crate::vulkan::overlay::UiVertex::attribute_descriptions());
        }
    }
    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(desc.topology)
        .primitive_restart_enable(false);

    // Viewport and scissor are dynamic so cached pipelines survive
    // swapchain recreation.
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(desc.cull_mode)
        // Counter-clockwise after the projection Y-flip.
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(desc.depth_bias != 0.0)
        .depth_bias_constant_factor(desc.depth_bias)
        .depth_bias_slope_factor(if desc.depth_bias != 0.0 { 1.75 } else { 0.0 });

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::_1);

    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(desc.depth_test)
        .depth_write_enable(desc.depth_write)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let attachment = |blend: Blend| {
        let builder = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::all());
        match blend {
            Blend::Opaque => builder.blend_enable(false),
            Blend::Alpha => builder
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .alpha_blend_op(vk::BlendOp::ADD),
            Blend::Additive => builder
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::ONE)
                .dst_color_blend_factor(vk::BlendFactor::ONE)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE)
                .alpha_blend_op(vk::BlendOp::ADD),
        }
        .build()
    };
    let attachments = vec![attachment(desc.blend); desc.color_attachment_count as usize];
    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(&attachments);

    let push_constant_ranges = if desc.push_constant_size > 0 {
        vec![vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .offset(0)
            .size(desc.push_constant_size)
            .build()]
    } else {
        Vec::new()
    };
    let layout_info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(desc.set_layouts)
        .push_constant_ranges(&push_constant_ranges);
    let layout = device.create_pipeline_layout(&layout_info, None)?;

    let info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(desc.render_pass)
        .subpass(0);

    let pipeline = device
        .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)?
        .0[0];

    device.destroy_shader_module(vert_module, None);
    if let Some(frag_module) = frag_module {
        device.destroy_shader_module(frag_module, None);
    }

    Ok((pipeline, layout))
}

/// Sets the dynamic viewport + scissor to cover `extent`.
pub unsafe fn set_viewport(device: &Device, command_buffer: vk::CommandBuffer, extent: vk::Extent2D) {
    let viewport = vk::Viewport::builder()
        .x(0.0)
        .y(0.0)
        .width(extent.width as f32)
        .height(extent.height as f32)
        .min_depth(0.0)
        .max_depth(1.0);
    let scissor = vk::Rect2D::builder()
        .offset(vk::Offset2D { x: 0, y: 0 })
        .extent(extent);
    device.cmd_set_viewport(command_buffer, 0, &[viewport]);
    device.cmd_set_scissor(command_buffer, 0, &[scissor]);
}
