use std::mem::size_of;

use vulkanalia::prelude::v1_0::*;

use crate::math::{Vec3f, Vec4f};

/// Vertex of the debug line overlay.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct LineVertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

impl LineVertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(size_of::<LineVertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    pub fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(0)
                .build(),
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32A32_SFLOAT)
                .offset(12)
                .build(),
        ]
    }
}

/// CPU-side line list, refilled by the host every frame through
/// `Renderer::draw_debug_line` and drained by the overlay pass.
#[derive(Default)]
pub struct DebugLineBuffer {
    pub vertices: Vec<LineVertex>,
}

impl DebugLineBuffer {
    pub fn push_line(&mut self, from: Vec3f, to: Vec3f, color: Vec4f) {
        let color = [color.x, color.y, color.z, color.w];
        self.vertices.push(LineVertex {
            position: [from.x, from.y, from.z],
            color,
        });
        self.vertices.push(LineVertex {
            position: [to.x, to.y, to.z],
            color,
        });
    }

    pub fn clear(&mut self) {
        self.vertices.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

/// One live particle. Spawn/update logic lives with the host; the
/// renderer only draws whatever is in the pools each frame.
#[derive(Clone, Copy, Debug)]
pub struct Particle {
    pub position: Vec3f,
    pub size: f32,
    pub color: Vec4f,
    pub lifetime: f32,
}

#[derive(Default)]
pub struct ParticlePool {
    pub particles: Vec<Particle>,
}

impl ParticlePool {
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
}

/// Point-sprite vertex of the particle overlay.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ParticleVertex {
    pub position: [f32; 3],
    pub size: f32,
    pub color: [f32; 4],
}

impl ParticleVertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(size_of::<ParticleVertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    pub fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32B32A32_SFLOAT)
                .offset(0)
                .build(),
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32A32_SFLOAT)
                .offset(16)
                .build(),
        ]
    }
}

/// UI overlay vertex in pixel coordinates; the shader normalizes by the
/// framebuffer size.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct UiVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    pub color: [f32; 4],
}

impl UiVertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(size_of::<UiVertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    pub fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(0)
                .build(),
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(8)
                .build(),
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(2)
                .format(vk::Format::R32G32B32A32_SFLOAT)
                .offset(16)
                .build(),
        ]
    }
}

/// Widget logic stays outside the core: the callback receives the
/// framebuffer size and returns triangles to draw.
pub type UiCallback = Box<dyn FnMut(u32, u32) -> Vec<UiVertex>>;
