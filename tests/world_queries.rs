//! Raycast queries and fixed-step boundary behavior through the world API.

use approx::assert_relative_eq;
use cgmath::InnerSpace;

use onyx::math::Vec3;
use onyx::physics::{CapsuleAxis, Collider, ColliderShape, RigidBody};
use onyx::scene::Transform;
use onyx::{PhysicsConfig, World};

const DT: f64 = 1.0 / 60.0;

#[test]
fn ray_hits_capsule_side_exactly() {
    let mut world = World::new();
    let capsule = world.spawn();
    world
        .transforms
        .insert(capsule, Transform::from_position(Vec3::new(0.0, 0.0, 0.0)));
    world.colliders.insert(
        capsule,
        Collider::new(ColliderShape::Capsule {
            radius: 0.5,
            half_height: 1.0,
            axis: CapsuleAxis::Y,
        }),
    );

    let hit = world
        .raycast(Vec3::new(2.0, 0.0, 0.0), Vec3::new(-1.0, 0.0, 0.0), 100.0)
        .expect("capsule hit");
    assert_eq!(hit.entity, capsule);
    assert_relative_eq!(hit.distance, 1.5, epsilon = 1e-6);
    assert_relative_eq!(hit.normal.x, 1.0, epsilon = 1e-6);
    assert_relative_eq!(hit.normal.y, 0.0, epsilon = 1e-6);
}

#[test]
fn raycast_is_repeatable_and_all_hits_are_sorted() {
    let mut world = World::new();
    for x in [3.0, 9.0, 6.0] {
        let sphere = world.spawn();
        world
            .transforms
            .insert(sphere, Transform::from_position(Vec3::new(x, 0.0, 0.0)));
        world
            .colliders
            .insert(sphere, Collider::new(ColliderShape::Sphere { radius: 1.0 }));
    }

    let first = world.raycast(Vec3::new(0.0, 0.0, 0.0), Vec3::unit_x(), 100.0).unwrap();
    let second = world.raycast(Vec3::new(0.0, 0.0, 0.0), Vec3::unit_x(), 100.0).unwrap();
    assert_eq!(first.entity, second.entity);
    assert_eq!(first.distance, second.distance);
    assert_relative_eq!(first.distance, 2.0, epsilon = 1e-9);

    let all = world.raycast_all(Vec3::new(0.0, 0.0, 0.0), Vec3::unit_x(), 100.0);
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[test]
fn triggers_are_excluded_from_raycasts() {
    let mut world = World::new();
    let trigger = world.spawn();
    world
        .transforms
        .insert(trigger, Transform::from_position(Vec3::new(2.0, 0.0, 0.0)));
    world.colliders.insert(
        trigger,
        Collider::trigger(ColliderShape::Sphere { radius: 1.0 }),
    );

    assert!(world
        .raycast(Vec3::new(0.0, 0.0, 0.0), Vec3::unit_x(), 100.0)
        .is_none());
}

#[test]
fn zero_step_is_a_no_op() {
    let mut world = World::new();
    let sphere = world.spawn();
    let shape = ColliderShape::Sphere { radius: 1.0 };
    world
        .transforms
        .insert(sphere, Transform::from_position(Vec3::new(0.0, 10.0, 0.0)));
    world.bodies.insert(sphere, RigidBody::dynamic(1.0, &shape));
    world.colliders.insert(sphere, Collider::new(shape));

    world.step(0.0);

    assert_eq!(world.physics.accumulator(), 0.0);
    let body = world.bodies.get(sphere).unwrap();
    assert_eq!(body.velocity, Vec3::new(0.0, 0.0, 0.0));
    assert_eq!(world.transforms.get(sphere).unwrap().position.y, 10.0);
}

#[test]
fn oversized_step_clamps_to_max_substeps() {
    let config = PhysicsConfig::default();
    let mut world = World::with_physics_config(config.clone());
    let sphere = world.spawn();
    let shape = ColliderShape::Sphere { radius: 1.0 };
    world
        .transforms
        .insert(sphere, Transform::from_position(Vec3::new(0.0, 100.0, 0.0)));
    world.bodies.insert(sphere, RigidBody::dynamic(1.0, &shape));
    world.colliders.insert(sphere, Collider::new(shape));

    world.step(100.0 * config.fixed_dt);

    // Exactly max_substeps sub-steps ran, then the backlog was dropped.
    let body = world.bodies.get(sphere).unwrap();
    let expected = 9.81 * config.fixed_dt * config.max_substeps as f64;
    assert_relative_eq!(body.velocity.magnitude(), expected, max_relative = 1e-6);
    assert_eq!(world.physics.accumulator(), 0.0);
}

#[test]
fn serial_and_parallel_stepping_agree() {
    let build = |threading: bool| {
        let mut world = World::with_physics_config(PhysicsConfig {
            threading_enabled: threading,
            ..PhysicsConfig::default()
        });
        let floor = world.spawn();
        world
            .transforms
            .insert(floor, Transform::from_position(Vec3::new(0.0, -0.05, 0.0)));
        world.colliders.insert(
            floor,
            Collider::new(ColliderShape::Aabb {
                half_extents: Vec3::new(20.0, 0.05, 20.0),
            }),
        );
        world.bodies.insert(floor, RigidBody::fixed());

        for i in 0..12 {
            let body = world.spawn();
            let shape = ColliderShape::Sphere { radius: 0.5 };
            world.transforms.insert(
                body,
                Transform::from_position(Vec3::new(
                    (i % 4) as f64 * 0.9,
                    1.0 + (i / 4) as f64 * 1.1,
                    (i % 3) as f64 * 0.8,
                )),
            );
            world.bodies.insert(body, RigidBody::dynamic(1.0, &shape));
            world.colliders.insert(body, Collider::new(shape));
        }
        world
    };

    let mut serial = build(false);
    let mut parallel = build(true);
    for _ in 0..180 {
        serial.step(DT);
        parallel.step(DT);
    }

    // The parallel narrowphase gathers results in pair order, so both
    // paths integrate identical trajectories.
    let positions = |world: &World| {
        world
            .bodies
            .iter()
            .map(|(e, _)| world.transforms.get(e).unwrap().position)
            .collect::<Vec<_>>()
    };
    for (a, b) in positions(&serial).iter().zip(positions(&parallel)) {
        assert_relative_eq!(a.x, b.x, epsilon = 1e-12);
        assert_relative_eq!(a.y, b.y, epsilon = 1e-12);
        assert_relative_eq!(a.z, b.z, epsilon = 1e-12);
    }
}

#[test]
fn ccd_stops_fast_body_at_thin_wall() {
    let mut world = World::with_physics_config(PhysicsConfig {
        gravity: Vec3::new(0.0, 0.0, 0.0),
        ..PhysicsConfig::default()
    });

    let wall = world.spawn();
    world
        .transforms
        .insert(wall, Transform::from_position(Vec3::new(0.0, 0.0, 0.0)));
    world.colliders.insert(
        wall,
        Collider::new(ColliderShape::Aabb {
            half_extents: Vec3::new(0.05, 10.0, 10.0),
        }),
    );
    world.bodies.insert(wall, RigidBody::fixed());

    let bullet = world.spawn();
    let shape = ColliderShape::Sphere { radius: 0.1 };
    world
        .transforms
        .insert(bullet, Transform::from_position(Vec3::new(-10.0, 0.0, 0.0)));
    let mut body = RigidBody::dynamic(0.1, &shape).with_ccd();
    body.velocity = Vec3::new(600.0, 0.0, 0.0);
    world.bodies.insert(bullet, body);
    world.colliders.insert(bullet, Collider::new(shape));

    for _ in 0..30 {
        world.step(DT);
    }

    // Without CCD the bullet tunnels 10 units per step; with it the body
    // must end up on the near side of the wall.
    let x = world.transforms.get(bullet).unwrap().position.x;
    assert!(x < 0.1, "bullet tunnelled to x = {x}");
}
