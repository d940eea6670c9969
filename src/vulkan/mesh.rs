use std::mem::size_of;

use anyhow::Result;
use vulkanalia::prelude::v1_0::*;

use crate::scene::MeshData;
use crate::vulkan::buffer::create_device_buffer_with_data;
use crate::vulkan::frame::RendererData;

/// Interleaved vertex as uploaded to the GPU. Bone lanes are zeroed for
/// rigid meshes so every pipeline shares one layout.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub bone_weights: [f32; 4],
    pub bone_indices: [u16; 4],
}

/// Vertex binding 3 carries per-instance model matrices for batched draws.
pub const INSTANCE_BINDING: u32 = 3;

impl Vertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    pub fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        let attr = |location: u32, format: vk::Format, offset: u32| {
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(location)
                .format(format)
                .offset(offset)
                .build()
        };
        vec![
            attr(0, vk::Format::R32G32B32_SFLOAT, 0),
            attr(1, vk::Format::R32G32B32_SFLOAT, 12),
            attr(2, vk::Format::R32G32_SFLOAT, 24),
            attr(3, vk::Format::R32G32B32A32_SFLOAT, 32),
            attr(4, vk::Format::R16G16B16A16_UINT, 48),
        ]
    }

    /// Binding + attributes for the per-instance model matrix, one vec4
    /// column per attribute location.
    pub fn instance_binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(INSTANCE_BINDING)
            .stride(size_of::<[[f32; 4]; 4]>() as u32)
            .input_rate(vk::VertexInputRate::INSTANCE)
            .build()
    }

    pub fn instance_attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        (0..4u32)
            .map(|column| {
                vk::VertexInputAttributeDescription::builder()
                    .binding(INSTANCE_BINDING)
                    .location(5 + column)
                    .format(vk::Format::R32G32B32A32_SFLOAT)
                    .offset(column * 16)
                    .build()
            })
            .collect()
    }
}

/// GPU copy of one mesh. Owned by the backend's entity-keyed cache;
/// destroyed only at shutdown or explicit eviction.
#[derive(Clone, Debug)]
pub struct GpuMesh {
    pub vertex_buffer: vk::Buffer,
    pub vertex_memory: vk::DeviceMemory,
    pub index_buffer: vk::Buffer,
    pub index_memory: vk::DeviceMemory,
    pub index_count: u32,
    pub skinned: bool,
}

fn interleave(mesh: &MeshData) -> Vec<Vertex> {
    let count = mesh.positions.len();
    let mut vertices = Vec::with_capacity(count);
    for i in 0..count {
        vertices.push(Vertex {
            position: mesh.positions[i],
            normal: mesh.normals.get(i).copied().unwrap_or([0.0, 1.0, 0.0]),
            uv: mesh.uvs.get(i).copied().unwrap_or([0.0, 0.0]),
            bone_weights: mesh
                .bone_weights
                .as_ref()
                .and_then(|w| w.get(i).copied())
                .unwrap_or([0.0; 4]),
            bone_indices: mesh
                .bone_indices
                .as_ref()
                .and_then(|b| b.get(i).copied())
                .unwrap_or([0; 4]),
        });
    }
    vertices
}

pub unsafe fn upload_mesh(
    instance: &Instance,
    device: &Device,
    data: &RendererData,
    mesh: &MeshData,
) -> Result<GpuMesh> {
    let vertices = interleave(mesh);
    let (vertex_buffer, vertex_memory) = create_device_buffer_with_data(
        instance,
        device,
        data,
        vk::BufferUsageFlags::VERTEX_BUFFER,
        &vertices,
    )?;
    let (index_buffer, index_memory) = create_device_buffer_with_data(
        instance,
        device,
        data,
        vk::BufferUsageFlags::INDEX_BUFFER,
        &mesh.indices,
    )?;

    Ok(GpuMesh {
        vertex_buffer,
        vertex_memory,
        index_buffer,
        index_memory,
        index_count: mesh.indices.len() as u32,
        skinned: mesh.is_skinned(),
    })
}

pub unsafe fn destroy_mesh(device: &Device, mesh: &GpuMesh) {
    device.destroy_buffer(mesh.vertex_buffer, None);
    device.free_memory(mesh.vertex_memory, None);
    device.destroy_buffer(mesh.index_buffer, None);
    device.free_memory(mesh.index_memory, None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_is_tightly_packed() {
        assert_eq!(size_of::<Vertex>(), 56);
        let attrs = Vertex::attribute_descriptions();
        assert_eq!(attrs.len(), 5);
        assert_eq!(attrs[4].offset, 48);
    }

    #[test]
    fn interleave_zeroes_missing_bone_data() {
        let mesh = MeshData {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
            normals: vec![[0.0, 1.0, 0.0]; 2],
            uvs: vec![[0.0, 0.0]; 2],
            bone_weights: None,
            bone_indices: None,
            indices: vec![0, 1, 0],
        };
        let vertices = interleave(&mesh);
        assert_eq!(vertices.len(), 2);
        assert_eq!(vertices[0].bone_weights, [0.0; 4]);
        assert_eq!(vertices[1].position, [1.0, 0.0, 0.0]);
    }
}
