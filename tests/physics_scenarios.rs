//! End-to-end physics scenarios driven purely through the public world API.

use std::cell::Cell;
use std::rc::Rc;

use approx::assert_relative_eq;
use cgmath::InnerSpace;

use onyx::math::Vec3;
use onyx::physics::{
    Collider, ColliderShape, CollisionCallbackComponent, Joint, JointKind, RigidBody,
    TriggerComponent,
};
use onyx::scene::Transform;
use onyx::{Entity, PhysicsConfig, World};

const DT: f64 = 1.0 / 60.0;

fn static_floor(world: &mut World, top: f64) -> Entity {
    let floor = world.spawn();
    world.transforms.insert(
        floor,
        Transform::from_position(Vec3::new(0.0, top - 0.05, 0.0)),
    );
    world.colliders.insert(
        floor,
        Collider::new(ColliderShape::Aabb {
            half_extents: Vec3::new(10.0, 0.05, 10.0),
        }),
    );
    world.bodies.insert(floor, RigidBody::fixed());
    floor
}

fn dynamic_sphere(world: &mut World, position: Vec3, radius: f64) -> Entity {
    let sphere = world.spawn();
    let shape = ColliderShape::Sphere { radius };
    world
        .transforms
        .insert(sphere, Transform::from_position(position));
    world.bodies.insert(sphere, RigidBody::dynamic(1.0, &shape));
    world.colliders.insert(sphere, Collider::new(shape));
    sphere
}

#[test]
fn falling_sphere_rests_on_floor() {
    let mut world = World::new();
    static_floor(&mut world, 0.0);
    let sphere = dynamic_sphere(&mut world, Vec3::new(0.0, 4.0, 0.0), 1.0);

    let enters = Rc::new(Cell::new(0u32));
    let enters_cb = enters.clone();
    world.collision_callbacks.insert(
        sphere,
        CollisionCallbackComponent::default().on_enter(Box::new(move |_, _, _, _| {
            enters_cb.set(enters_cb.get() + 1);
        })),
    );

    let mut grounded_tick = None;
    for tick in 0..240 {
        world.step(DT);
        if grounded_tick.is_none() && world.bodies.get(sphere).unwrap().grounded {
            grounded_tick = Some(tick);
        }
    }

    // Landed early and stayed put.
    assert!(grounded_tick.expect("sphere never touched the floor") < 60);
    let y = world.transforms.get(sphere).unwrap().position.y;
    assert!((0.98..=1.02).contains(&y), "resting height {y}");

    let body = world.bodies.get(sphere).unwrap();
    assert!(body.velocity.magnitude() < 0.05);
    assert!(body.sleeping, "sphere should have fallen asleep");
    assert_eq!(body.velocity, Vec3::new(0.0, 0.0, 0.0));

    // The pair produced exactly one enter event.
    assert_eq!(enters.get(), 1);
}

#[test]
fn stacked_boxes_stabilize_and_sleep() {
    let mut world = World::new();
    static_floor(&mut world, 0.0);

    let shape = ColliderShape::Obb {
        half_extents: Vec3::new(0.5, 0.5, 0.5),
    };
    let mut cubes = Vec::new();
    for level in 0..5 {
        let cube = world.spawn();
        world.transforms.insert(
            cube,
            Transform::from_position(Vec3::new(0.0, 0.5 + level as f64, 0.0)),
        );
        world.bodies.insert(cube, RigidBody::dynamic(1.0, &shape));
        world.colliders.insert(cube, Collider::new(shape.clone()));
        cubes.push(cube);
    }

    for _ in 0..120 {
        world.step(DT);
    }

    for &cube in &cubes {
        let body = world.bodies.get(cube).unwrap();
        assert!(body.sleeping, "{cube} still awake after 2 s");
        assert_eq!(body.velocity, Vec3::new(0.0, 0.0, 0.0));
    }

    let top = world.transforms.get(cubes[4]).unwrap().position.y;
    assert!((4.4..=4.55).contains(&top), "top cube at {top}");

    // Neighbours never interpenetrate beyond a few slops.
    for pair in cubes.windows(2) {
        let lower = world.transforms.get(pair[0]).unwrap().position.y;
        let upper = world.transforms.get(pair[1]).unwrap().position.y;
        assert!(upper - lower >= 1.0 - 0.02, "stack crushed: {} over {}", upper, lower);
    }

    // Rotation norms stay unit through the whole pile.
    for &cube in &cubes {
        let norm = world.transforms.get(cube).unwrap().rotation.magnitude();
        assert!((norm - 1.0).abs() < 1e-4);
    }
}

#[test]
fn hinge_pendulum_swings_in_plane() {
    let mut world = World::new();

    let anchor = world.spawn();
    world
        .transforms
        .insert(anchor, Transform::from_position(Vec3::new(0.0, 0.0, 0.0)));
    world.bodies.insert(anchor, RigidBody::fixed());

    let bob = world.spawn();
    let bob_shape = ColliderShape::Sphere { radius: 0.1 };
    world
        .transforms
        .insert(bob, Transform::from_position(Vec3::new(1.0, 0.0, 0.0)));
    world.bodies.insert(bob, RigidBody::dynamic(1.0, &bob_shape));

    let joint_entity = world.spawn();
    world.joints.insert(
        joint_entity,
        Joint::new(
            anchor,
            bob,
            JointKind::Hinge {
                axis: Vec3::new(0.0, 0.0, 1.0),
                limits: None,
            },
        )
        .with_anchors(Vec3::new(0.0, 0.0, 0.0), Vec3::new(-1.0, 0.0, 0.0)),
    );

    let mut downward_crossings = Vec::new();
    let mut previous_x = 1.0_f64;
    let mut energies = Vec::new();
    for tick in 0..240 {
        world.step(DT);
        let transform = world.transforms.get(bob).unwrap();
        let body = world.bodies.get(bob).unwrap();

        // Stays in the xy-plane.
        assert!(
            transform.position.z.abs() < 1e-3,
            "bob left the hinge plane: z = {}",
            transform.position.z
        );

        let x = transform.position.x;
        if previous_x > 0.0 && x <= 0.0 {
            downward_crossings.push(tick as f64 * DT);
        }
        previous_x = x;

        if tick % 30 == 0 {
            let kinetic = 0.5 * body.velocity.magnitude2();
            let potential = 9.81 * (transform.position.y + 1.0);
            energies.push(kinetic + potential);
        }
    }

    // Period within 10% of the analytic 2*pi*sqrt(L/g).
    assert!(
        downward_crossings.len() >= 2,
        "pendulum did not complete a cycle"
    );
    let period = downward_crossings[1] - downward_crossings[0];
    let expected = 2.0 * std::f64::consts::PI * (1.0f64 / 9.81).sqrt();
    assert_relative_eq!(period, expected, max_relative = 0.10);

    // The constraint only removes energy (up to solver noise).
    for window in energies.windows(2) {
        assert!(window[1] <= window[0] + 0.05, "energy grew: {window:?}");
    }
}

#[test]
fn trigger_fires_enter_stay_exit_once_each() {
    let mut world = World::with_physics_config(PhysicsConfig {
        gravity: Vec3::new(0.0, 0.0, 0.0),
        ..PhysicsConfig::default()
    });

    let trigger = world.spawn();
    world
        .transforms
        .insert(trigger, Transform::from_position(Vec3::new(0.0, 0.5, 0.0)));
    world.colliders.insert(
        trigger,
        Collider::trigger(ColliderShape::Aabb {
            half_extents: Vec3::new(0.5, 0.5, 0.5),
        }),
    );

    let sphere = dynamic_sphere(&mut world, Vec3::new(5.0, 0.5, 0.0), 0.5);
    world.bodies.get_mut(sphere).unwrap().velocity = Vec3::new(-2.0, 0.0, 0.0);

    let enters = Rc::new(Cell::new(0u32));
    let stays = Rc::new(Cell::new(0u32));
    let exits = Rc::new(Cell::new(0u32));
    let exited_entity = Rc::new(Cell::new(None::<Entity>));
    let (e, s, x, xe) = (enters.clone(), stays.clone(), exits.clone(), exited_entity.clone());
    world.triggers.insert(
        trigger,
        TriggerComponent::default()
            .on_enter(Box::new(move |_, _, _| e.set(e.get() + 1)))
            .on_stay(Box::new(move |_, _, _| s.set(s.get() + 1)))
            .on_exit(Box::new(move |_, other, _| {
                x.set(x.get() + 1);
                xe.set(Some(other));
            })),
    );

    for _ in 0..300 {
        world.step(DT);
    }

    assert_eq!(enters.get(), 1, "one enter");
    assert!(stays.get() > 0, "some stays while overlapping");
    assert_eq!(exits.get(), 1, "one exit");
    assert_eq!(exited_entity.get(), Some(sphere));
}

#[test]
fn callback_panic_does_not_poison_the_tick() {
    let mut world = World::new();
    static_floor(&mut world, 0.0);
    let sphere = dynamic_sphere(&mut world, Vec3::new(0.0, 2.0, 0.0), 1.0);

    let stays = Rc::new(Cell::new(0u32));
    let stays_cb = stays.clone();
    world.collision_callbacks.insert(
        sphere,
        CollisionCallbackComponent::default()
            .on_enter(Box::new(|_, _, _, _| panic!("callback exploded")))
            .on_stay(Box::new(move |_, _, _, _| {
                stays_cb.set(stays_cb.get() + 1);
            })),
    );

    for _ in 0..120 {
        world.step(DT);
    }

    // The panicking enter callback was isolated; stay events kept firing
    // and the body still settled.
    assert!(stays.get() > 0);
    let y = world.transforms.get(sphere).unwrap().position.y;
    assert!((0.9..=1.1).contains(&y));
}

#[test]
fn commands_queued_in_callbacks_apply_after_the_phase() {
    let mut world = World::new();
    static_floor(&mut world, 0.0);
    let sphere = dynamic_sphere(&mut world, Vec3::new(0.0, 2.0, 0.0), 1.0);

    world.collision_callbacks.insert(
        sphere,
        CollisionCallbackComponent::default().on_enter(Box::new(|me, _, _, commands| {
            commands.set_velocity(me, Vec3::new(0.0, 5.0, 0.0));
        })),
    );

    let mut bounced = false;
    for _ in 0..240 {
        world.step(DT);
        if world.bodies.get(sphere).unwrap().velocity.y > 2.0 {
            bounced = true;
            break;
        }
    }
    assert!(bounced, "queued velocity change never applied");
}
