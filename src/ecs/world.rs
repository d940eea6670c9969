use cgmath::Rotation;

use crate::ecs::{ComponentStore, Entity};
use crate::math::{mul_elements, Mat4, Quat, Vec3};
use crate::physics::events::{CollisionCallbackComponent, TriggerComponent};
use crate::physics::raycast::{ray_test, RayHit};
use crate::physics::{Collider, Joint, PhysicsConfig, PhysicsPipeline, RigidBody};
use crate::scene::{
    CameraComponent, LightComponent, MeshComponent, SkinComponent, TerrainComponent, Transform,
};

/// Deferred world mutation, queued from inside callbacks and applied after
/// the callback phase so no callback can observe a half-mutated world.
#[derive(Debug)]
pub enum WorldCommand {
    Despawn(Entity),
    SetVelocity(Entity, Vec3),
    ApplyImpulse(Entity, Vec3),
    Wake(Entity),
}

#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: Vec<WorldCommand>,
}

impl CommandQueue {
    pub fn push(&mut self, command: WorldCommand) {
        self.commands.push(command);
    }

    pub fn despawn(&mut self, entity: Entity) {
        self.push(WorldCommand::Despawn(entity));
    }

    pub fn set_velocity(&mut self, entity: Entity, velocity: Vec3) {
        self.push(WorldCommand::SetVelocity(entity, velocity));
    }

    pub fn apply_impulse(&mut self, entity: Entity, impulse: Vec3) {
        self.push(WorldCommand::ApplyImpulse(entity, impulse));
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// The entity-component world: one tagged-array store per component kind,
/// plus the physics pipeline state that persists across steps.
///
/// The store is only ever mutated on the tick thread; the parallel phases
/// inside `step` operate on snapshots taken up front.
#[derive(Default)]
pub struct World {
    next_entity: u64,
    pub transforms: ComponentStore<Transform>,
    pub bodies: ComponentStore<RigidBody>,
    pub colliders: ComponentStore<Collider>,
    pub joints: ComponentStore<Joint>,
    pub meshes: ComponentStore<MeshComponent>,
    pub terrains: ComponentStore<TerrainComponent>,
    pub skins: ComponentStore<SkinComponent>,
    pub cameras: ComponentStore<CameraComponent>,
    pub lights: ComponentStore<LightComponent>,
    pub collision_callbacks: ComponentStore<CollisionCallbackComponent>,
    pub triggers: ComponentStore<TriggerComponent>,
    pending_despawns: Vec<Entity>,
    pub physics: PhysicsPipeline,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_physics_config(config: PhysicsConfig) -> Self {
        Self {
            physics: PhysicsPipeline::new(config),
            ..Self::default()
        }
    }

    /// Allocates a fresh entity id. Ids are never reused within a run.
    pub fn spawn(&mut self) -> Entity {
        self.next_entity += 1;
        Entity(self.next_entity)
    }

    /// Immediately removes the entity and every component attached to it.
    pub fn despawn(&mut self, entity: Entity) {
        self.transforms.remove(entity);
        self.bodies.remove(entity);
        self.colliders.remove(entity);
        self.joints.remove(entity);
        self.meshes.remove(entity);
        self.terrains.remove(entity);
        self.skins.remove(entity);
        self.cameras.remove(entity);
        self.lights.remove(entity);
        self.collision_callbacks.remove(entity);
        self.triggers.remove(entity);
    }

    /// Queues a removal for the end of the current phase. Safe to call
    /// while iterating any store.
    pub fn despawn_deferred(&mut self, entity: Entity) {
        self.pending_despawns.push(entity);
    }

    pub fn apply_deferred(&mut self) {
        let pending = std::mem::take(&mut self.pending_despawns);
        for entity in pending {
            self.despawn(entity);
        }
    }

    pub(crate) fn apply_commands(&mut self, queue: CommandQueue) {
        for command in queue.commands {
            match command {
                WorldCommand::Despawn(entity) => self.despawn(entity),
                WorldCommand::SetVelocity(entity, velocity) => {
                    if let Some(body) = self.bodies.get_mut(entity) {
                        body.velocity = velocity;
                        body.wake();
                    }
                }
                WorldCommand::ApplyImpulse(entity, impulse) => {
                    if let Some(body) = self.bodies.get_mut(entity) {
                        let delta = impulse * body.inv_mass;
                        body.velocity += delta;
                        body.wake();
                    }
                }
                WorldCommand::Wake(entity) => {
                    if let Some(body) = self.bodies.get_mut(entity) {
                        body.wake();
                    }
                }
            }
        }
    }

    /// Composes the parent chain into a world-space (position, rotation,
    /// scale) triple. Returns None when the entity has no transform.
    pub fn world_pose(&self, entity: Entity) -> Option<(Vec3, Quat, Vec3)> {
        let transform = self.transforms.get(entity)?;
        let mut position = transform.position;
        let mut rotation = transform.rotation;
        let mut scale = transform.scale;
        let mut parent = transform.parent;
        let mut depth = 0;
        while let Some(parent_entity) = parent {
            if depth > 64 {
                log::warn!("transform parent chain of {entity} exceeds depth 64; truncating");
                break;
            }
            let Some(parent_transform) = self.transforms.get(parent_entity) else {
                break;
            };
            position = parent_transform.position
                + parent_transform
                    .rotation
                    .rotate_vector(mul_elements(position, parent_transform.scale));
            rotation = parent_transform.rotation * rotation;
            scale = mul_elements(scale, parent_transform.scale);
            parent = parent_transform.parent;
            depth += 1;
        }
        Some((position, rotation, scale))
    }

    /// World matrix of an entity, parent chain included.
    pub fn world_transform(&self, entity: Entity) -> Option<Mat4> {
        let (position, rotation, scale) = self.world_pose(entity)?;
        Some(
            Mat4::from_translation(position)
                * Mat4::from(rotation)
                * Mat4::from_nonuniform_scale(scale.x, scale.y, scale.z),
        )
    }

    /// Advances physics by `dt`, firing trigger and collision callbacks.
    pub fn step(&mut self, dt: f64) {
        let mut pipeline = std::mem::take(&mut self.physics);
        pipeline.step(self, dt);
        self.physics = pipeline;
    }

    /// Closest non-trigger hit along the ray, if any. Two calls against an
    /// unchanged world return the same hit.
    pub fn raycast(&self, origin: Vec3, direction: Vec3, max_dist: f64) -> Option<RayHit> {
        let direction = crate::math::safe_normalize(direction);
        let mut best: Option<RayHit> = None;
        for proxy in self.ray_proxies() {
            if let Some(hit) = ray_test(&proxy, origin, direction, max_dist) {
                if best.map_or(true, |b| hit.distance < b.distance) {
                    best = Some(hit);
                }
            }
        }
        best
    }

    /// Every non-trigger hit along the ray, sorted ascending by distance.
    pub fn raycast_all(&self, origin: Vec3, direction: Vec3, max_dist: f64) -> Vec<RayHit> {
        let direction = crate::math::safe_normalize(direction);
        let mut hits: Vec<RayHit> = self
            .ray_proxies()
            .filter_map(|proxy| ray_test(&proxy, origin, direction, max_dist))
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits
    }

    fn ray_proxies(&self) -> impl Iterator<Item = crate::physics::shapes::ShapeProxy> + '_ {
        self.colliders.iter().filter_map(move |(entity, collider)| {
            if collider.is_trigger {
                return None;
            }
            let (position, rotation, scale) = self.world_pose(entity)?;
            let (body_type, friction, restitution) = match self.bodies.get(entity) {
                Some(body) => (body.body_type, body.friction, body.restitution),
                None => (crate::physics::BodyType::Static, 0.5, 0.0),
            };
            Some(crate::physics::shapes::ShapeProxy::new(
                entity, collider, position, rotation, scale, body_type, friction, restitution,
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cgmath::{Deg, Rotation3};

    #[test]
    fn entity_ids_are_never_reused() {
        let mut world = World::new();
        let a = world.spawn();
        world.despawn(a);
        let b = world.spawn();
        assert_ne!(a, b);
    }

    #[test]
    fn world_pose_composes_parent_chain() {
        let mut world = World::new();
        let parent = world.spawn();
        let child = world.spawn();
        world.transforms.insert(
            parent,
            Transform::from_position(Vec3::new(10.0, 0.0, 0.0))
                .with_rotation(Quat::from_axis_angle(Vec3::unit_y(), Deg(90.0))),
        );
        let mut child_transform = Transform::from_position(Vec3::new(1.0, 0.0, 0.0));
        child_transform.parent = Some(parent);
        world.transforms.insert(child, child_transform);

        let (position, _, _) = world.world_pose(child).unwrap();
        // Parent rotates the child's +X offset onto -Z.
        assert_relative_eq!(position.x, 10.0, epsilon = 1e-9);
        assert_relative_eq!(position.z, -1.0, epsilon = 1e-9);
    }

    #[test]
    fn repeated_raycast_is_deterministic() {
        let mut world = World::new();
        let sphere = world.spawn();
        world
            .transforms
            .insert(sphere, Transform::from_position(Vec3::new(5.0, 0.0, 0.0)));
        world.colliders.insert(
            sphere,
            Collider::new(crate::physics::ColliderShape::Sphere { radius: 1.0 }),
        );

        let first = world.raycast(Vec3::new(0.0, 0.0, 0.0), Vec3::unit_x(), 100.0).unwrap();
        let second = world.raycast(Vec3::new(0.0, 0.0, 0.0), Vec3::unit_x(), 100.0).unwrap();
        assert_eq!(first.entity, second.entity);
        assert_eq!(first.distance, second.distance);
        assert_relative_eq!(first.distance, 4.0, epsilon = 1e-9);
    }
}
