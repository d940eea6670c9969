use std::sync::Arc;

use cgmath::{InnerSpace, SquareMatrix};
use rayon::prelude::*;

use crate::ecs::{Entity, World};
use crate::math::{mat4_to_f32, normal_matrix, Frustum, Mat3f, Mat4, Mat4f, Vec3, Vec3f};
use crate::scene::light::LightComponent;
use crate::scene::material::Material;
use crate::scene::mesh::MeshData;

pub const MAX_POINT_LIGHTS: usize = 16;
pub const MAX_DIRECTIONAL_LIGHTS: usize = 4;

/// One mesh to draw this frame, with everything the backend needs already
/// resolved to f32.
#[derive(Clone)]
pub struct DrawRecord {
    pub entity: Entity,
    pub mesh: Arc<MeshData>,
    pub material: Material,
    pub model: Mat4f,
    pub normal: Mat3f,
    pub cast_shadows: bool,
    /// Squared distance to the camera; orders the transparent pass.
    pub distance2: f64,
}

#[derive(Clone, Copy, Debug)]
pub struct PointLightData {
    pub position: Vec3f,
    pub color: Vec3f,
    pub intensity: f32,
    pub range: f32,
}

#[derive(Clone, Copy, Debug)]
pub struct DirectionalLightData {
    pub direction: Vec3f,
    pub color: Vec3f,
    pub intensity: f32,
}

#[derive(Clone, Debug, Default)]
pub struct LightSet {
    pub point: Vec<PointLightData>,
    pub directional: Vec<DirectionalLightData>,
}

/// Backend-agnostic description of one frame, produced by the view walk
/// and consumed by the render graph. An empty frame (no active camera)
/// still renders as a clear.
#[derive(Clone)]
pub struct FrameData {
    pub view: Mat4f,
    pub projection: Mat4f,
    pub camera_position: Vec3f,
    pub opaque: Vec<DrawRecord>,
    pub transparent: Vec<DrawRecord>,
    pub lights: LightSet,
    /// Direction of the first directional light; drives the shadow
    /// cascades when present.
    pub primary_light_direction: Option<Vec3f>,
}

impl Default for FrameData {
    fn default() -> Self {
        Self {
            view: Mat4f::identity(),
            projection: Mat4f::identity(),
            camera_position: Vec3f::new(0.0, 0.0, 0.0),
            opaque: Vec::new(),
            transparent: Vec::new(),
            lights: LightSet::default(),
            primary_light_direction: None,
        }
    }
}

impl Default for DrawRecord {
    fn default() -> Self {
        Self {
            entity: Entity(0),
            mesh: Arc::new(MeshData::default()),
            material: Material::default(),
            model: Mat4f::identity(),
            normal: Mat3f::identity(),
            cast_shadows: true,
            distance2: 0.0,
        }
    }
}

impl FrameData {
    pub fn is_empty(&self) -> bool {
        self.opaque.is_empty() && self.transparent.is_empty()
    }
}

/// Walks the component stores once and assembles the frame: find the
/// active camera, cull mesh entities against its frustum, classify opaque
/// vs transparent, gather lights.
pub fn build_frame_data(world: &World, aspect: f64, threading: bool) -> FrameData {
    // 1. First active camera wins.
    let camera = world
        .cameras
        .iter()
        .find(|(_, c)| c.active)
        .and_then(|(entity, camera)| {
            world
                .world_transform(entity)
                .map(|matrix| (camera.clone(), matrix))
        });
    let Some((camera, camera_world)) = camera else {
        return FrameData::default();
    };

    // 2. View = inverse world, camera position = fourth column.
    let view = camera_world.invert().unwrap_or_else(Mat4::identity);
    let projection = camera.projection(aspect);
    let camera_position = Vec3::new(camera_world.w.x, camera_world.w.y, camera_world.w.z);

    // 3. Frustum planes from the combined matrix.
    let frustum = Frustum::from_view_proj(projection * view);

    // 4. Cull and classify. The candidate snapshot is taken serially; the
    // cull itself may shard across threads since it only reads.
    struct Candidate {
        entity: Entity,
        mesh: Arc<MeshData>,
        material: Material,
        world: Mat4,
        radius: f64,
        center: Vec3,
        cast_shadows: bool,
    }
    let candidates: Vec<Candidate> = world
        .meshes
        .iter()
        .filter_map(|(entity, mesh)| {
            let (position, _, scale) = world.world_pose(entity)?;
            let world_matrix = world.world_transform(entity)?;
            let radius =
                mesh.bounding_radius() * scale.x.abs().max(scale.y.abs()).max(scale.z.abs());
            Some(Candidate {
                entity,
                mesh: mesh.mesh.clone(),
                material: mesh.material.clone(),
                world: world_matrix,
                radius,
                center: position,
                cast_shadows: mesh.cast_shadows,
            })
        })
        .collect();

    let classify = |candidate: &Candidate| -> Option<(DrawRecord, bool)> {
        if !frustum.contains_sphere(candidate.center, candidate.radius) {
            return None;
        }
        let record = DrawRecord {
            entity: candidate.entity,
            mesh: candidate.mesh.clone(),
            material: candidate.material.clone(),
            model: mat4_to_f32(candidate.world),
            normal: mat3_to_f32(normal_matrix(candidate.world)),
            cast_shadows: candidate.cast_shadows,
            distance2: (candidate.center - camera_position).magnitude2(),
        };
        let transparent = candidate.material.is_transparent();
        Some((record, transparent))
    };

    let classified: Vec<Option<(DrawRecord, bool)>> = if threading {
        candidates.par_iter().map(classify).collect()
    } else {
        candidates.iter().map(classify).collect()
    };

    let mut opaque = Vec::new();
    let mut transparent = Vec::new();
    for (record, is_transparent) in classified.into_iter().flatten() {
        if is_transparent {
            transparent.push(record);
        } else {
            opaque.push(record);
        }
    }

    // 5. Lights, capped to the UBO array sizes.
    let mut lights = LightSet::default();
    let mut primary_light_direction = None;
    for (entity, light) in world.lights.iter() {
        match light {
            LightComponent::Point {
                color,
                intensity,
                range,
            } => {
                if lights.point.len() < MAX_POINT_LIGHTS {
                    if let Some((position, _, _)) = world.world_pose(entity) {
                        lights.point.push(PointLightData {
                            position: vec3_to_f32(position),
                            color: vec3_to_f32(*color),
                            intensity: *intensity as f32,
                            range: *range as f32,
                        });
                    }
                }
            }
            LightComponent::Directional {
                direction,
                color,
                intensity,
            } => {
                if lights.directional.len() < MAX_DIRECTIONAL_LIGHTS {
                    let dir = vec3_to_f32(*direction);
                    if primary_light_direction.is_none() {
                        primary_light_direction = Some(dir);
                    }
                    lights.directional.push(DirectionalLightData {
                        direction: dir,
                        color: vec3_to_f32(*color),
                        intensity: *intensity as f32,
                    });
                }
            }
        }
    }

    // 6. Transparents draw far-to-near.
    transparent.sort_by(|a, b| b.distance2.total_cmp(&a.distance2));

    FrameData {
        view: mat4_to_f32(view),
        projection: mat4_to_f32(projection),
        camera_position: vec3_to_f32(camera_position),
        opaque,
        transparent,
        lights,
        primary_light_direction,
    }
}

fn vec3_to_f32(v: Vec3) -> Vec3f {
    Vec3f::new(v.x as f32, v.y as f32, v.z as f32)
}

fn mat3_to_f32(m: crate::math::Mat3) -> Mat3f {
    Mat3f::new(
        m.x.x as f32, m.x.y as f32, m.x.z as f32, //
        m.y.x as f32, m.y.y as f32, m.y.z as f32, //
        m.z.x as f32, m.z.y as f32, m.z.z as f32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::camera::CameraComponent;
    use crate::scene::mesh::MeshComponent;
    use crate::scene::transform::Transform;

    fn quad_mesh() -> Arc<MeshData> {
        Arc::new(MeshData {
            positions: vec![
                [-0.5, -0.5, 0.0],
                [0.5, -0.5, 0.0],
                [0.5, 0.5, 0.0],
                [-0.5, 0.5, 0.0],
            ],
            normals: vec![[0.0, 0.0, 1.0]; 4],
            uvs: vec![[0.0, 0.0]; 4],
            bone_weights: None,
            bone_indices: None,
            indices: vec![0, 1, 2, 0, 2, 3],
        })
    }

    fn world_with_camera() -> (World, Entity) {
        let mut world = World::new();
        let camera = world.spawn();
        // Looking down -Z from the origin (default orientation).
        world.transforms.insert(camera, Transform::default());
        world.cameras.insert(camera, CameraComponent::default());
        (world, camera)
    }

    #[test]
    fn no_active_camera_yields_empty_frame() {
        let mut world = World::new();
        let mesh_entity = world.spawn();
        world.transforms.insert(mesh_entity, Transform::default());
        world
            .meshes
            .insert(mesh_entity, MeshComponent::new(quad_mesh(), Material::default()));
        let frame = build_frame_data(&world, 16.0 / 9.0, false);
        assert!(frame.is_empty());
        assert!(frame.lights.point.is_empty());
    }

    #[test]
    fn culls_meshes_behind_the_camera() {
        let (mut world, _) = world_with_camera();
        let visible = world.spawn();
        world
            .transforms
            .insert(visible, Transform::from_position(Vec3::new(0.0, 0.0, -5.0)));
        world
            .meshes
            .insert(visible, MeshComponent::new(quad_mesh(), Material::default()));

        let behind = world.spawn();
        world
            .transforms
            .insert(behind, Transform::from_position(Vec3::new(0.0, 0.0, 5.0)));
        world
            .meshes
            .insert(behind, MeshComponent::new(quad_mesh(), Material::default()));

        let frame = build_frame_data(&world, 1.0, false);
        assert_eq!(frame.opaque.len(), 1);
        assert_eq!(frame.opaque[0].entity, visible);
    }

    #[test]
    fn transparent_draws_sort_back_to_front() {
        let (mut world, _) = world_with_camera();
        let mut glass = Material::default();
        glass.opacity = 0.5;
        let near = world.spawn();
        world
            .transforms
            .insert(near, Transform::from_position(Vec3::new(0.0, 0.0, -2.0)));
        world
            .meshes
            .insert(near, MeshComponent::new(quad_mesh(), glass.clone()));
        let far = world.spawn();
        world
            .transforms
            .insert(far, Transform::from_position(Vec3::new(0.0, 0.0, -20.0)));
        world.meshes.insert(far, MeshComponent::new(quad_mesh(), glass));

        let frame = build_frame_data(&world, 1.0, false);
        assert!(frame.opaque.is_empty());
        assert_eq!(frame.transparent.len(), 2);
        assert_eq!(frame.transparent[0].entity, far);
        assert_eq!(frame.transparent[1].entity, near);
    }

    #[test]
    fn serial_and_parallel_culling_agree() {
        let (mut world, _) = world_with_camera();
        for i in 0..32 {
            let e = world.spawn();
            world.transforms.insert(
                e,
                Transform::from_position(Vec3::new((i % 8) as f64, 0.0, -2.0 - i as f64)),
            );
            world
                .meshes
                .insert(e, MeshComponent::new(quad_mesh(), Material::default()));
        }
        let serial = build_frame_data(&world, 1.0, false);
        let parallel = build_frame_data(&world, 1.0, true);
        let ids = |f: &FrameData| f.opaque.iter().map(|d| d.entity).collect::<Vec<_>>();
        assert_eq!(ids(&serial), ids(&parallel));
    }

    #[test]
    fn first_directional_light_is_primary() {
        let (mut world, _) = world_with_camera();
        let l1 = world.spawn();
        world.lights.insert(
            l1,
            LightComponent::directional(Vec3::new(-1.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 1.0), 3.0),
        );
        let l2 = world.spawn();
        world.lights.insert(
            l2,
            LightComponent::directional(Vec3::new(1.0, -1.0, 0.0), Vec3::new(1.0, 0.0, 0.0), 1.0),
        );
        let frame = build_frame_data(&world, 1.0, false);
        assert_eq!(frame.lights.directional.len(), 2);
        let primary = frame.primary_light_direction.unwrap();
        assert!(primary.x < 0.0);
    }
}
