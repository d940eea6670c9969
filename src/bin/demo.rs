use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use cgmath::{Deg, Rotation3};

use onyx::math::{Quat, Vec3};
use onyx::physics::{Collider, ColliderShape, RigidBody};
use onyx::scene::{CameraComponent, LightComponent, Material, MeshComponent, MeshData, Transform};
use onyx::Engine;

/// Unit cube mesh, good enough to watch bodies fall.
fn cube_mesh() -> Arc<MeshData> {
    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut uvs = Vec::new();
    let mut indices = Vec::new();
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
    ];
    for (normal, right, up) in faces {
        let base = positions.len() as u32;
        for (sx, sy) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            positions.push([
                normal[0] * 0.5 + right[0] * sx + up[0] * sy,
                normal[1] * 0.5 + right[1] * sx + up[1] * sy,
                normal[2] * 0.5 + right[2] * sx + up[2] * sy,
            ]);
            normals.push(normal);
            uvs.push([sx + 0.5, sy + 0.5]);
        }
        indices.extend([base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    Arc::new(MeshData {
        positions,
        normals,
        uvs,
        bone_weights: None,
        bone_indices: None,
        indices,
    })
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    let mut engine = Engine::initialize(1280, 720, "onyx demo", Default::default())?;
    let mesh = cube_mesh();

    // Static floor.
    let floor = engine.world.spawn();
    engine.world.transforms.insert(
        floor,
        Transform::from_position(Vec3::new(0.0, -0.5, 0.0)).with_scale(Vec3::new(20.0, 1.0, 20.0)),
    );
    engine.world.colliders.insert(
        floor,
        Collider::new(ColliderShape::Aabb {
            half_extents: Vec3::new(0.5, 0.5, 0.5),
        }),
    );
    engine.world.bodies.insert(floor, RigidBody::fixed());
    engine.world.meshes.insert(
        floor,
        MeshComponent::new(mesh.clone(), Material::default()),
    );

    // A tumbling stack of dynamic cubes.
    for i in 0..6 {
        let cube = engine.world.spawn();
        engine.world.transforms.insert(
            cube,
            Transform::from_position(Vec3::new(0.1 * i as f64, 1.0 + 1.2 * f64::from(i), 0.0))
                .with_rotation(Quat::from_axis_angle(Vec3::unit_y(), Deg(10.0 * f64::from(i)))),
        );
        let shape = ColliderShape::Obb {
            half_extents: Vec3::new(0.5, 0.5, 0.5),
        };
        engine.world.bodies.insert(cube, RigidBody::dynamic(1.0, &shape));
        engine.world.colliders.insert(cube, Collider::new(shape));
        let material = Material::default().with_albedo(Vec3::new(
            0.3 + 0.1 * f64::from(i),
            0.5,
            0.9 - 0.1 * f64::from(i),
        ));
        engine
            .world
            .meshes
            .insert(cube, MeshComponent::new(mesh.clone(), material));
    }

    let sun = engine.world.spawn();
    engine.world.lights.insert(
        sun,
        LightComponent::directional(Vec3::new(-0.4, -1.0, -0.3), Vec3::new(1.0, 0.96, 0.9), 3.0),
    );

    let camera = engine.world.spawn();
    engine.world.transforms.insert(
        camera,
        Transform::from_position(Vec3::new(0.0, 4.0, 12.0)),
    );
    engine.world.cameras.insert(camera, CameraComponent::default());

    let mut last = Instant::now();
    while !engine.should_close() {
        let now = Instant::now();
        let dt = now.duration_since(last).as_secs_f64().min(0.25);
        last = now;
        engine.tick(dt)?;
    }
    engine.shutdown();
    Ok(())
}
