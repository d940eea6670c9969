use anyhow::Result;
use cgmath::SquareMatrix;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use vulkanalia::prelude::v1_0::*;

use crate::ecs::World;
use crate::math::{Mat3f, Mat4f};
use crate::scene::view::{DrawRecord, FrameData};
use crate::scene::Material;
use crate::vulkan::descriptors::{write_target, write_uniform};
use crate::vulkan::frame::Renderer;
use crate::vulkan::mesh::INSTANCE_BINDING;
use crate::vulkan::pipeline::set_viewport;
use crate::vulkan::shader::ShaderVariantKey;
use crate::vulkan::uniforms::{
    pack_bones, pack_lights, pack_material, pack_push_constants, BoneUbo, LightsUbo, MaterialUbo,
    PerFrameUbo, PushConstants, TerrainUbo,
};

fn push_bytes(push: &PushConstants) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            (push as *const PushConstants).cast::<u8>(),
            std::mem::size_of::<PushConstants>(),
        )
    }
}

/// Draws batched as instanced when mesh and variant agree for two or more
/// records.
struct InstancedBatch {
    key: ShaderVariantKey,
    records: Vec<usize>,
}

fn group_instanced(records: &[DrawRecord]) -> (Vec<InstancedBatch>, Vec<usize>) {
    let mut batches: Vec<InstancedBatch> = Vec::new();
    let mut index_of: FxHashMap<(usize, u32), usize> = FxHashMap::default();
    for (i, record) in records.iter().enumerate() {
        let key = ShaderVariantKey::from_material(&record.material);
        let group = (Arc::as_ptr(&record.mesh) as usize, key.bits());
        let slot = *index_of.entry(group).or_insert_with(|| {
            batches.push(InstancedBatch {
                key,
                records: Vec::new(),
            });
            batches.len() - 1
        });
        batches[slot].records.push(i);
    }

    let mut singles = Vec::new();
    let mut instanced = Vec::new();
    for batch in batches {
        if batch.records.len() >= 2 {
            instanced.push(batch);
        } else {
            singles.extend(batch.records);
        }
    }
    (instanced, singles)
}

impl Renderer {
    /// Transient material set: UBO plus the six texture slots (fallbacks
    /// for absent ones). Everything allocated here dies at the next visit
    /// to this frame slot.
    pub(crate) unsafe fn material_set(
        &mut self,
        frame: usize,
        material: &Material,
    ) -> Result<vk::DescriptorSet> {
        let ubo = pack_material(material, 1.0);
        let buffer = self.transient_ubo(frame, std::slice::from_ref(&ubo))?;
        let set = self.transient_set(frame, self.material_layout)?;
        write_uniform(
            &self.device,
            set,
            0,
            buffer,
            std::mem::size_of::<MaterialUbo>() as u64,
        );

        let albedo = material
            .albedo_map
            .as_ref()
            .map(|p| self.resolve_texture(p, true))
            .unwrap_or(self.white_texture);
        let normal = material
            .normal_map
            .as_ref()
            .map(|p| self.resolve_texture(p, false))
            .unwrap_or(self.normal_texture);
        let metallic_roughness = material
            .metallic_roughness_map
            .as_ref()
            .map(|p| self.resolve_texture(p, false))
            .unwrap_or(self.white_texture);
        let ao = material
            .ao_map
            .as_ref()
            .map(|p| self.resolve_texture(p, false))
            .unwrap_or(self.white_texture);
        let emissive = material
            .emissive_map
            .as_ref()
            .map(|p| self.resolve_texture(p, true))
            .unwrap_or(self.white_texture);
        let height = material
            .height_map
            .as_ref()
            .map(|p| self.resolve_texture(p, false))
            .unwrap_or(self.black_texture);

        for (binding, texture) in [
            (1, albedo),
            (2, normal),
            (3, metallic_roughness),
            (4, ao),
            (5, emissive),
            (6, height),
        ] {
            write_target(&self.device, set, binding, texture.view, texture.sampler);
        }
        Ok(set)
    }

    /// Bone palette set for a skinned draw; identity palette when the
    /// entity has no skin component.
    unsafe fn bone_set(
        &mut self,
        frame: usize,
        world: &World,
        entity: crate::ecs::Entity,
    ) -> Result<vk::DescriptorSet> {
        let ubo = match world.skins.get(entity) {
            Some(skin) => pack_bones(&skin.bone_matrices),
            None => pack_bones(&[]),
        };
        let buffer = self.transient_ubo(frame, std::slice::from_ref(&ubo))?;
        let set = self.transient_set(frame, self.bone_layout)?;
        write_uniform(
            &self.device,
            set,
            0,
            buffer,
            std::mem::size_of::<BoneUbo>() as u64,
        );
        Ok(set)
    }

    /// Pass 1: one depth-only pass per cascade, rendered with the
    /// cascade's light matrix in the per-frame slot.
    pub(crate) unsafe fn record_shadow_pass(
        &mut self,
        cb: vk::CommandBuffer,
        frame: usize,
        world: &World,
        frame_data: &FrameData,
    ) -> Result<()> {
        let Some(csm) = self.csm.as_ref() else {
            return Ok(());
        };
        if csm.cascades.is_empty() {
            return Ok(());
        }
        let resolution = csm.resolution;
        let cascades: Vec<(vk::Framebuffer, Mat4f)> = csm
            .framebuffers
            .iter()
            .zip(csm.cascades.iter())
            .map(|(fb, cascade)| (*fb, cascade.view_proj))
            .collect();

        let extent = vk::Extent2D {
            width: resolution,
            height: resolution,
        };

        for (framebuffer, view_proj) in cascades {
            // The cascade matrix rides in the projection slot; view stays
            // identity so projection * view * model works unchanged.
            let override_ubo = PerFrameUbo {
                view: Mat4f::identity(),
                projection: view_proj,
                inv_view_proj: Mat4f::identity(),
                camera_pos: [
                    frame_data.camera_position.x,
                    frame_data.camera_position.y,
                    frame_data.camera_position.z,
                    1.0,
                ],
                time: self.elapsed(),
                _pad: [0.0; 3],
            };
            let cascade_set = self.per_frame_set(frame, &override_ubo)?;

            let clear_values = [vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            }];
            let render_area = vk::Rect2D::builder()
                .offset(vk::Offset2D::default())
                .extent(extent);
            let info = vk::RenderPassBeginInfo::builder()
                .render_pass(self.shadow_pass)
                .framebuffer(framebuffer)
                .render_area(render_area)
                .clear_values(&clear_values);
            self.device
                .cmd_begin_render_pass(cb, &info, vk::SubpassContents::INLINE);
            set_viewport(&self.device, cb, extent);

            for record in frame_data
                .opaque
                .iter()
                .chain(frame_data.transparent.iter())
            {
                if !record.cast_shadows {
                    continue;
                }
                let mesh = self.ensure_mesh(record.entity, &record.mesh)?;
                let (pipeline, layout) = if mesh.skinned {
                    (
                        self.pipelines.shadow_skinned.pipeline,
                        self.pipelines.shadow_skinned.layout,
                    )
                } else {
                    (self.pipelines.shadow.pipeline, self.pipelines.shadow.layout)
                };
                self.device
                    .cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, pipeline);
                self.device.cmd_bind_descriptor_sets(
                    cb,
                    vk::PipelineBindPoint::GRAPHICS,
                    layout,
                    0,
                    &[cascade_set],
                    &[],
                );
                if mesh.skinned {
                    let bones = self.bone_set(frame, world, record.entity)?;
                    self.device.cmd_bind_descriptor_sets(
                        cb,
                        vk::PipelineBindPoint::GRAPHICS,
                        layout,
                        2,
                        &[bones],
                        &[],
                    );
                }
                let push = pack_push_constants(record.model, record.normal);
                self.device.cmd_push_constants(
                    cb,
                    layout,
                    vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                    0,
                    push_bytes(&push),
                );
                self.device
                    .cmd_bind_vertex_buffers(cb, 0, &[mesh.vertex_buffer], &[0]);
                self.device
                    .cmd_bind_index_buffer(cb, mesh.index_buffer, 0, vk::IndexType::UINT32);
                self.device.cmd_draw_indexed(cb, mesh.index_count, 1, 0, 0, 0);
            }

            self.device.cmd_end_render_pass(cb);
        }
        Ok(())
    }

    /// Pass 2: opaque geometry into the MRTs, instanced batches first,
    /// then singles, then terrain.
    pub(crate) unsafe fn record_gbuffer_pass(
        &mut self,
        cb: vk::CommandBuffer,
        frame: usize,
        world: &World,
        frame_data: &FrameData,
        per_frame_set: vk::DescriptorSet,
    ) -> Result<()> {
        let extent = self.data.swapchain_extent;

        let mut clear_values = vec![
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 0.0],
                },
            };
            4
        ];
        clear_values.push(vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        });
        let render_area = vk::Rect2D::builder()
            .offset(vk::Offset2D::default())
            .extent(extent);
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.gbuffer_pass)
            .framebuffer(self.targets.gbuffer_fb)
            .render_area(render_area)
            .clear_values(&clear_values);
        self.device
            .cmd_begin_render_pass(cb, &info, vk::SubpassContents::INLINE);
        set_viewport(&self.device, cb, extent);

        let (instanced, singles) = group_instanced(&frame_data.opaque);

        // All batch transforms share one upload into the frame's instance
        // buffer; each batch binds at its own offset.
        if !instanced.is_empty() {
            let mut matrices: Vec<Mat4f> = Vec::new();
            let mut offsets = Vec::with_capacity(instanced.len());
            for batch in &instanced {
                offsets.push(matrices.len());
                for &index in &batch.records {
                    matrices.push(frame_data.opaque[index].model);
                }
            }
            let instance_buffer = self.upload_instances(frame, &matrices)?;

            for (batch, offset) in instanced.iter().zip(offsets) {
                let first = &frame_data.opaque[batch.records[0]];
                let key = batch.key | ShaderVariantKey::INSTANCED;
                let pipeline = self.ensure_gbuffer_variant(key)?;
                let layout = self.gbuffer_variant_layout(key);

                self.device
                    .cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, pipeline);
                self.device.cmd_bind_descriptor_sets(
                    cb,
                    vk::PipelineBindPoint::GRAPHICS,
                    layout,
                    0,
                    &[per_frame_set],
                    &[],
                );
                let material = self.material_set(frame, &first.material)?;
                self.device.cmd_bind_descriptor_sets(
                    cb,
                    vk::PipelineBindPoint::GRAPHICS,
                    layout,
                    1,
                    &[material],
                    &[],
                );

                let mesh = self.ensure_mesh(first.entity, &first.mesh)?;
                self.device
                    .cmd_bind_vertex_buffers(cb, 0, &[mesh.vertex_buffer], &[0]);
                self.device.cmd_bind_vertex_buffers(
                    cb,
                    INSTANCE_BINDING,
                    &[instance_buffer],
                    &[(offset * std::mem::size_of::<Mat4f>()) as u64],
                );
                self.device
                    .cmd_bind_index_buffer(cb, mesh.index_buffer, 0, vk::IndexType::UINT32);

                // Instance attributes override these; identity keeps the
                // shader uniform interface satisfied.
                let push = pack_push_constants(Mat4f::identity(), Mat3f::identity());
                self.device.cmd_push_constants(
                    cb,
                    layout,
                    vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                    0,
                    push_bytes(&push),
                );
                self.device.cmd_draw_indexed(
                    cb,
                    mesh.index_count,
                    batch.records.len() as u32,
                    0,
                    0,
                    0,
                );
            }
        }

        for index in singles {
            let record = &frame_data.opaque[index];
            let mesh = self.ensure_mesh(record.entity, &record.mesh)?;
            let mut key = ShaderVariantKey::from_material(&record.material);
            if mesh.skinned {
                key |= ShaderVariantKey::SKINNING;
            }
            let pipeline = self.ensure_gbuffer_variant(key)?;
            let layout = self.gbuffer_variant_layout(key);

            self.device
                .cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, pipeline);
            self.device.cmd_bind_descriptor_sets(
                cb,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[per_frame_set],
                &[],
            );
            let material = self.material_set(frame, &record.material)?;
            self.device.cmd_bind_descriptor_sets(
                cb,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                1,
                &[material],
                &[],
            );
            if mesh.skinned {
                let bones = self.bone_set(frame, world, record.entity)?;
                self.device.cmd_bind_descriptor_sets(
                    cb,
                    vk::PipelineBindPoint::GRAPHICS,
                    layout,
                    2,
                    &[bones],
                    &[],
                );
            }

            let push = pack_push_constants(record.model, record.normal);
            self.device.cmd_push_constants(
                cb,
                layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                push_bytes(&push),
            );
            self.device
                .cmd_bind_vertex_buffers(cb, 0, &[mesh.vertex_buffer], &[0]);
            self.device
                .cmd_bind_index_buffer(cb, mesh.index_buffer, 0, vk::IndexType::UINT32);
            self.device.cmd_draw_indexed(cb, mesh.index_count, 1, 0, 0, 0);
        }

        self.record_terrain(cb, frame, world, per_frame_set)?;

        self.device.cmd_end_render_pass(cb);
        Ok(())
    }

    /// Terrain chunks, drawn within the G-buffer render pass.
    unsafe fn record_terrain(
        &mut self,
        cb: vk::CommandBuffer,
        frame: usize,
        world: &World,
        per_frame_set: vk::DescriptorSet,
    ) -> Result<()> {
        if world.terrains.is_empty() {
            return Ok(());
        }
        let pipeline = self.pipelines.terrain.pipeline;
        let layout = self.pipelines.terrain.layout;

        for (entity, terrain) in world.terrains.iter() {
            let Some(model) = world.world_transform(entity) else {
                continue;
            };
            let mesh = self.ensure_mesh(entity, &terrain.mesh)?;

            let ubo = TerrainUbo {
                uv_scales: terrain.uv_scales,
                roughness: terrain.layer_roughness,
            };
            let buffer = self.transient_ubo(frame, std::slice::from_ref(&ubo))?;
            let set = self.transient_set(frame, self.terrain_layout)?;
            write_uniform(
                &self.device,
                set,
                0,
                buffer,
                std::mem::size_of::<TerrainUbo>() as u64,
            );
            let splat = self.resolve_texture(&terrain.splatmap, false);
            write_target(&self.device, set, 1, splat.view, splat.sampler);
            for (slot, layer) in terrain.layers.iter().enumerate() {
                let texture = layer
                    .as_ref()
                    .map(|p| self.resolve_texture(p, true))
                    .unwrap_or(self.white_texture);
                write_target(&self.device, set, 2 + slot as u32, texture.view, texture.sampler);
            }

            self.device
                .cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, pipeline);
            self.device.cmd_bind_descriptor_sets(
                cb,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[per_frame_set, set],
                &[],
            );
            let model_f32 = crate::math::mat4_to_f32(model);
            let normal = crate::math::normal_matrix(model);
            let normal_f32 = Mat3f::new(
                normal.x.x as f32,
                normal.x.y as f32,
                normal.x.z as f32,
                normal.y.x as f32,
                normal.y.y as f32,
                normal.y.z as f32,
                normal.z.x as f32,
                normal.z.y as f32,
                normal.z.z as f32,
            );
            let push = pack_push_constants(model_f32, normal_f32);
            self.device.cmd_push_constants(
                cb,
                layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                push_bytes(&push),
            );
            self.device
                .cmd_bind_vertex_buffers(cb, 0, &[mesh.vertex_buffer], &[0]);
            self.device
                .cmd_bind_index_buffer(cb, mesh.index_buffer, 0, vk::IndexType::UINT32);
            self.device.cmd_draw_indexed(cb, mesh.index_count, 1, 0, 0, 0);
        }
        Ok(())
    }

    /// Pass 4b: transparents blended over the lit HDR scene, depth-tested
    /// against the G-buffer depth but never writing it.
    pub(crate) unsafe fn record_forward_pass(
        &mut self,
        cb: vk::CommandBuffer,
        frame: usize,
        _world: &World,
        frame_data: &FrameData,
        per_frame_set: vk::DescriptorSet,
    ) -> Result<()> {
        let extent = self.data.swapchain_extent;

        // Shared light block for every transparent draw this frame.
        let lights_ubo = pack_lights(
            &frame_data.lights,
            self.ibl.is_some(),
            self.ibl.as_ref().map_or(0.0, |ibl| ibl.intensity),
        );
        let lights_buffer = self.transient_ubo(frame, std::slice::from_ref(&lights_ubo))?;
        let lights_set = self.transient_set(frame, self.per_frame_layout)?;
        write_uniform(
            &self.device,
            lights_set,
            0,
            lights_buffer,
            std::mem::size_of::<LightsUbo>() as u64,
        );

        let render_area = vk::Rect2D::builder()
            .offset(vk::Offset2D::default())
            .extent(extent);
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.forward_pass)
            .framebuffer(self.targets.forward_fb_a)
            .render_area(render_area);
        self.device
            .cmd_begin_render_pass(cb, &info, vk::SubpassContents::INLINE);
        self.device.cmd_bind_pipeline(
            cb,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipelines.forward.pipeline,
        );
        set_viewport(&self.device, cb, extent);
        let layout = self.pipelines.forward.layout;
        self.device.cmd_bind_descriptor_sets(
            cb,
            vk::PipelineBindPoint::GRAPHICS,
            layout,
            0,
            &[per_frame_set],
            &[],
        );
        self.device.cmd_bind_descriptor_sets(
            cb,
            vk::PipelineBindPoint::GRAPHICS,
            layout,
            2,
            &[lights_set],
            &[],
        );

        // FrameData already sorted these back-to-front.
        for record in &frame_data.transparent {
            let mesh = self.ensure_mesh(record.entity, &record.mesh)?;
            let material = self.material_set(frame, &record.material)?;
            self.device.cmd_bind_descriptor_sets(
                cb,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                1,
                &[material],
                &[],
            );
            let push = pack_push_constants(record.model, record.normal);
            self.device.cmd_push_constants(
                cb,
                layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                push_bytes(&push),
            );
            self.device
                .cmd_bind_vertex_buffers(cb, 0, &[mesh.vertex_buffer], &[0]);
            self.device
                .cmd_bind_index_buffer(cb, mesh.index_buffer, 0, vk::IndexType::UINT32);
            self.device.cmd_draw_indexed(cb, mesh.index_count, 1, 0, 0, 0);
        }

        self.device.cmd_end_render_pass(cb);
        Ok(())
    }
}
