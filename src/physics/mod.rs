pub mod body;
pub mod broadphase;
pub mod ccd;
pub mod events;
pub mod gjk;
pub mod joint;
pub mod manifold;
pub mod narrowphase;
pub mod raycast;
pub mod shapes;
pub mod solver;

pub use body::{BodyType, RigidBody};
pub use events::{CollisionCallbackComponent, TriggerComponent};
pub use joint::{Joint, JointKind};
pub use manifold::{ContactManifold, ContactPoint, PairKey};
pub use raycast::RayHit;
pub use shapes::{CapsuleAxis, Collider, ColliderShape, Heightfield};

use cgmath::{InnerSpace, Matrix, Zero};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::ecs::{CommandQueue, Entity, World};
use crate::math::{clamp_magnitude, integrate_rotation, sanitize, Aabb, Mat3, Vec3};
use broadphase::SpatialHash;
use joint::JointConstraint;
use manifold::ContactManifold as Manifold;
use shapes::ShapeProxy;
use solver::{ContactConstraint, SolverBody};

/// Tunables for the fixed-step pipeline. Defaults follow the values the
/// solver was stabilized with; they are safe to tweak between steps.
#[derive(Clone, Debug)]
pub struct PhysicsConfig {
    pub gravity: Vec3,
    pub fixed_dt: f64,
    pub max_substeps: usize,
    pub solver_iterations: usize,
    pub broadphase_cell_size: f64,
    pub contact_breaking_distance: f64,
    pub penetration_slop: f64,
    pub position_correction: f64,
    /// Minimum approach speed before restitution kicks in.
    pub restitution_threshold: f64,
    pub sleep_linear_threshold: f64,
    pub sleep_angular_threshold: f64,
    pub sleep_time: f64,
    pub max_linear_velocity: f64,
    pub max_angular_velocity: f64,
    /// Parallel narrowphase over snapshots; serial and parallel paths
    /// produce identical manifold sets.
    pub threading_enabled: bool,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.81, 0.0),
            fixed_dt: 1.0 / 60.0,
            max_substeps: 4,
            solver_iterations: 8,
            broadphase_cell_size: 2.0,
            contact_breaking_distance: 0.02,
            penetration_slop: 0.005,
            position_correction: 0.2,
            restitution_threshold: 1.0,
            sleep_linear_threshold: 0.05,
            sleep_angular_threshold: 0.05,
            sleep_time: 0.5,
            max_linear_velocity: 1.0e3,
            max_angular_velocity: 1.0e2,
            threading_enabled: false,
        }
    }
}

/// Fixed-step physics driver plus all state that survives across
/// sub-steps: the manifold cache for warm starting, trigger overlap sets
/// and the previous contact-pair set for enter/stay/exit events.
pub struct PhysicsPipeline {
    pub config: PhysicsConfig,
    accumulator: f64,
    hash: SpatialHash,
    manifold_cache: FxHashMap<PairKey, Manifold>,
    previous_pairs: FxHashSet<PairKey>,
    trigger_overlaps: FxHashMap<Entity, FxHashSet<Entity>>,
}

impl Default for PhysicsPipeline {
    fn default() -> Self {
        Self::new(PhysicsConfig::default())
    }
}

impl PhysicsPipeline {
    pub fn new(config: PhysicsConfig) -> Self {
        let cell = config.broadphase_cell_size;
        Self {
            config,
            accumulator: 0.0,
            hash: SpatialHash::new(cell),
            manifold_cache: FxHashMap::default(),
            previous_pairs: FxHashSet::default(),
            trigger_overlaps: FxHashMap::default(),
        }
    }

    pub fn accumulator(&self) -> f64 {
        self.accumulator
    }

    /// Decomposes a variable tick into fixed sub-steps. Oversized ticks are
    /// capped at `max_substeps` and the leftover accumulator is dropped so
    /// a long stall cannot snowball into ever-longer steps.
    pub fn step(&mut self, world: &mut World, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        self.accumulator += dt;
        let fixed_dt = self.config.fixed_dt;
        let mut substeps = 0;
        while self.accumulator >= fixed_dt && substeps < self.config.max_substeps {
            self.substep(world, fixed_dt);
            self.accumulator -= fixed_dt;
            substeps += 1;
        }
        if self.accumulator > fixed_dt * self.config.max_substeps as f64 {
            log::debug!(
                "physics falling behind: dropping {:.3}s of accumulated time",
                self.accumulator
            );
            self.accumulator = 0.0;
        }
    }

    fn substep(&mut self, world: &mut World, dt: f64) {
        let config = self.config.clone();

        // --- 1 & 2: inertia refresh, force integration ------------------
        for (entity, body) in world.bodies.iter_mut() {
            if !body.is_dynamic() {
                continue;
            }
            if let Some(transform) = world.transforms.get(entity) {
                let r: Mat3 = transform.rotation.into();
                body.inv_inertia_world = r * body.inv_inertia_local * r.transpose();
            }
            if body.sleeping {
                continue;
            }
            body.velocity += config.gravity * body.gravity_scale * dt;
            body.velocity *= (1.0 - body.linear_damping * dt).max(0.0);
            body.angular_velocity *= (1.0 - body.angular_damping * dt).max(0.0);
            body.grounded = false;
            body.velocity = clamp_magnitude(sanitize(body.velocity), config.max_linear_velocity);
            body.angular_velocity =
                clamp_magnitude(sanitize(body.angular_velocity), config.max_angular_velocity);
        }

        // --- 3: broadphase over a read-only snapshot --------------------
        let proxies = build_proxies(world);
        let aabbs: Vec<Aabb> = proxies.iter().map(|p| p.aabb).collect();
        let mut proxy_of_entity: FxHashMap<Entity, usize> = FxHashMap::default();
        for (i, p) in proxies.iter().enumerate() {
            proxy_of_entity.entry(p.entity).or_insert(i);
        }

        self.hash.clear();
        for (i, p) in proxies.iter().enumerate() {
            if !p.is_trigger {
                self.hash.insert(i as u32, &p.aabb);
            }
        }
        let candidate_pairs: Vec<(u32, u32)> = self
            .hash
            .pairs(&aabbs)
            .into_iter()
            .filter(|&(i, j)| {
                let a = &proxies[i as usize];
                let b = &proxies[j as usize];
                a.entity != b.entity
                    && (a.body_type == BodyType::Dynamic || b.body_type == BodyType::Dynamic)
            })
            .collect();

        // --- 4: narrowphase, optionally data-parallel -------------------
        // Results are gathered in pair order either way, so both paths
        // produce the same manifold sequence.
        let raw_manifolds: Vec<Option<Manifold>> = if config.threading_enabled {
            candidate_pairs
                .par_iter()
                .map(|&(i, j)| narrowphase::collide(&proxies[i as usize], &proxies[j as usize]))
                .collect()
        } else {
            candidate_pairs
                .iter()
                .map(|&(i, j)| narrowphase::collide(&proxies[i as usize], &proxies[j as usize]))
                .collect()
        };

        // --- 5: manifold cache, warm-start transfer ---------------------
        let mut manifolds: Vec<Manifold> = Vec::with_capacity(raw_manifolds.len());
        for manifold in raw_manifolds.into_iter().flatten() {
            let mut manifold = manifold;
            if let Some(previous) = self.manifold_cache.get(&manifold.key()) {
                manifold.warm_start_from(previous, config.contact_breaking_distance);
            }
            manifolds.push(manifold);
        }

        // Contact with an awake, moving partner wakes a sleeping body.
        for manifold in &manifolds {
            let state = |e: Entity| {
                world.bodies.get(e).map_or((false, false), |b| {
                    let moving = !b.sleeping
                        && (b.velocity.magnitude2() > 1e-8
                            || b.angular_velocity.magnitude2() > 1e-8);
                    (b.sleeping, moving)
                })
            };
            let (a_asleep, a_moving) = state(manifold.entity_a);
            let (b_asleep, b_moving) = state(manifold.entity_b);
            if a_asleep && b_moving {
                if let Some(body) = world.bodies.get_mut(manifold.entity_a) {
                    body.wake();
                }
            }
            if b_asleep && a_moving {
                if let Some(body) = world.bodies.get_mut(manifold.entity_b) {
                    body.wake();
                }
            }
        }

        // --- 6-8: solver ------------------------------------------------
        let (mut solver_bodies, mut slot_of_entity) = snapshot_bodies(world);

        let mut constraints: Vec<ContactConstraint> = Vec::with_capacity(manifolds.len());
        for manifold in manifolds {
            let both_sleeping = [manifold.entity_a, manifold.entity_b].iter().all(|&e| {
                world.bodies.get(e).map_or(false, |b| b.sleeping)
            });
            let a = ensure_slot(
                world,
                &mut solver_bodies,
                &mut slot_of_entity,
                manifold.entity_a,
            );
            let b = ensure_slot(
                world,
                &mut solver_bodies,
                &mut slot_of_entity,
                manifold.entity_b,
            );
            match (a, b) {
                (Some(a), Some(b)) if !both_sleeping => constraints.push(ContactConstraint {
                    manifold,
                    a,
                    b,
                    tangent1: Vec3::zero(),
                    tangent2: Vec3::zero(),
                }),
                // Sleeping pairs keep their cached manifold untouched so
                // the pair set and impulses survive until wake-up.
                _ => {
                    self.manifold_cache.insert(manifold.key(), manifold.clone());
                    self.previous_pairs.insert(manifold.key());
                    continue;
                }
            }
        }

        let mut joints: Vec<JointConstraint> = Vec::new();
        for (joint_entity, joint) in world.joints.iter() {
            let a = slot_of_entity.get(&joint.body_a).copied();
            let b = slot_of_entity.get(&joint.body_b).copied();
            let (Some(a), Some(b)) = (a, b) else {
                // A joint referencing a missing body is skipped for this
                // sub-step, not an error.
                log::trace!("joint on {joint_entity} skipped: body not in solver set");
                continue;
            };
            if let Some(constraint) =
                JointConstraint::prepare(joint_entity, joint.clone(), a, b, &solver_bodies, dt)
            {
                joints.push(constraint);
            }
        }

        solver::prepare_contacts(&solver_bodies, &mut constraints, dt, &config);
        solver::warm_start_contacts(&mut solver_bodies, &constraints);
        for joint in &joints {
            joint.warm_start(&mut solver_bodies);
        }

        // Contacts and joints interleave within each iteration so late
        // constraints see the velocities the earlier ones produced.
        for _ in 0..config.solver_iterations {
            solver::solve_contacts(&mut solver_bodies, &mut constraints);
            for joint in &mut joints {
                joint.solve(&mut solver_bodies, dt);
            }
        }

        for joint in joints {
            if let Some(stored) = world.joints.get_mut(joint.joint_entity) {
                stored.impulse = joint.joint.impulse;
                stored.angular_impulse = joint.joint.angular_impulse;
                stored.axial_impulse = joint.joint.axial_impulse;
                stored.limit_impulse = joint.joint.limit_impulse;
                stored.reference = joint.joint.reference;
            }
        }

        // --- 9: CCD sweep for flagged fast movers -----------------------
        let mut ccd_moves: FxHashMap<Entity, Vec3> = FxHashMap::default();
        for slot in 0..solver_bodies.len() {
            let entity = solver_bodies[slot].entity;
            let wants_ccd = world
                .bodies
                .get(entity)
                .map_or(false, |b| b.ccd && b.is_dynamic() && !b.sleeping);
            if !wants_ccd {
                continue;
            }
            let Some(&proxy_index) = proxy_of_entity.get(&entity) else {
                continue;
            };
            let velocity = solver_bodies[slot].velocity;
            let displacement = velocity.magnitude() * dt;
            let threshold = proxies[proxy_index].aabb.smallest_extent() * 0.5;
            if displacement <= threshold {
                continue;
            }
            let hit = ccd::sweep(&proxies[proxy_index], velocity, dt, &proxies, |j| {
                j == proxy_index
                    || proxies[j].entity == entity
                    || proxies[j].body_type == BodyType::Dynamic
            });
            if let Some(hit) = hit {
                let normal_speed = velocity.dot(hit.normal);
                let mut settled = velocity;
                if normal_speed < 0.0 {
                    settled -= hit.normal * normal_speed;
                }
                // Advance to impact, then carry the remaining time forward
                // once with the deflected velocity.
                let advance = velocity * hit.toi + settled * (dt - hit.toi).max(0.0);
                solver_bodies[slot].velocity = settled;
                ccd_moves.insert(entity, advance);
                log::trace!("ccd: {entity} impact at toi {:.5}", hit.toi);
            }
        }

        // --- 10: write-back and integration -----------------------------
        for solver_body in &solver_bodies {
            if let Some(body) = world.bodies.get_mut(solver_body.entity) {
                if body.is_dynamic() && !body.sleeping {
                    body.velocity =
                        clamp_magnitude(sanitize(solver_body.velocity), config.max_linear_velocity);
                    body.angular_velocity = clamp_magnitude(
                        sanitize(solver_body.angular_velocity),
                        config.max_angular_velocity,
                    );
                }
            }
        }
        for (entity, body) in world.bodies.iter_mut() {
            if body.sleeping || body.body_type == BodyType::Static {
                continue;
            }
            if let Some(transform) = world.transforms.get_mut(entity) {
                match ccd_moves.get(&entity) {
                    Some(delta) => transform.position += *delta,
                    None => transform.position += body.velocity * dt,
                }
                transform.rotation =
                    integrate_rotation(transform.rotation, body.angular_velocity, dt);
            }
        }

        // --- 11: grounded flags -----------------------------------------
        for constraint in &constraints {
            let normal = constraint.manifold.normal;
            if normal.y > 0.7 {
                if let Some(body) = world.bodies.get_mut(constraint.manifold.entity_b) {
                    body.grounded = true;
                }
            } else if normal.y < -0.7 {
                if let Some(body) = world.bodies.get_mut(constraint.manifold.entity_a) {
                    body.grounded = true;
                }
            }
        }

        let mut commands = CommandQueue::default();

        // --- 12: trigger overlap events ---------------------------------
        self.run_triggers(world, &proxies, &aabbs, &mut commands);

        // --- 13: collision enter/stay/exit callbacks --------------------
        // Refresh the cache with the post-solve impulses first; the event
        // pass borrows it immutably.
        let mut current_pairs: FxHashSet<PairKey> = FxHashSet::default();
        let mut fresh_cache: FxHashMap<PairKey, Manifold> = FxHashMap::default();
        for constraint in constraints {
            let key = constraint.manifold.key();
            current_pairs.insert(key);
            fresh_cache.insert(key, constraint.manifold);
        }
        // Carry over the sleeping pairs preserved above.
        for (key, manifold) in self.manifold_cache.drain() {
            if self.previous_pairs.contains(&key) && !current_pairs.contains(&key) {
                let both_sleeping = [manifold.entity_a, manifold.entity_b]
                    .iter()
                    .all(|&e| world.bodies.get(e).map_or(false, |b| b.sleeping));
                if both_sleeping {
                    current_pairs.insert(key);
                    fresh_cache.insert(key, manifold);
                }
            }
        }
        self.manifold_cache = fresh_cache;

        self.dispatch_collision_events(world, &current_pairs, &mut commands);
        self.previous_pairs = current_pairs;

        // --- 14: islands and sleep --------------------------------------
        self.update_sleep(world, dt);

        world.apply_commands(commands);
        world.apply_deferred();
    }

    fn run_triggers(
        &mut self,
        world: &mut World,
        proxies: &[ShapeProxy],
        aabbs: &[Aabb],
        commands: &mut CommandQueue,
    ) {
        let mut new_overlaps: FxHashMap<Entity, FxHashSet<Entity>> = FxHashMap::default();
        for proxy in proxies.iter().filter(|p| p.is_trigger) {
            let mut overlapping = FxHashSet::default();
            for index in self.hash.query(&proxy.aabb, aabbs) {
                let other = &proxies[index as usize];
                if other.entity == proxy.entity {
                    continue;
                }
                if narrowphase::collide(proxy, other).is_some() {
                    overlapping.insert(other.entity);
                }
            }
            new_overlaps.insert(proxy.entity, overlapping);
        }

        for (trigger_entity, overlapping) in &new_overlaps {
            let previous = self.trigger_overlaps.remove(trigger_entity).unwrap_or_default();
            if let Some(trigger) = world.triggers.get_mut(*trigger_entity) {
                for &other in overlapping.iter() {
                    if previous.contains(&other) {
                        if let Some(cb) = trigger.on_stay.as_mut() {
                            events::invoke_guarded("trigger on_stay", || {
                                cb(*trigger_entity, other, commands)
                            });
                        }
                    } else if let Some(cb) = trigger.on_enter.as_mut() {
                        events::invoke_guarded("trigger on_enter", || {
                            cb(*trigger_entity, other, commands)
                        });
                    }
                }
                for &other in previous.iter() {
                    if !overlapping.contains(&other) {
                        if let Some(cb) = trigger.on_exit.as_mut() {
                            events::invoke_guarded("trigger on_exit", || {
                                cb(*trigger_entity, other, commands)
                            });
                        }
                    }
                }
            }
        }
        self.trigger_overlaps = new_overlaps;
    }

    fn dispatch_collision_events(
        &self,
        world: &mut World,
        current: &FxHashSet<PairKey>,
        commands: &mut CommandQueue,
    ) {
        let mut fire_contact =
            |world: &mut World, me: Entity, other: Entity, key: &PairKey, entered: bool| {
                let Some(manifold) = self.manifold_cache.get(key) else {
                    return;
                };
                if let Some(callbacks) = world.collision_callbacks.get_mut(me) {
                    let slot = if entered {
                        callbacks.on_enter.as_mut()
                    } else {
                        callbacks.on_stay.as_mut()
                    };
                    if let Some(cb) = slot {
                        let label = if entered {
                            "collision on_enter"
                        } else {
                            "collision on_stay"
                        };
                        events::invoke_guarded(label, || cb(me, other, manifold, commands));
                    }
                }
            };

        for key in current {
            let entered = !self.previous_pairs.contains(key);
            fire_contact(world, key.0, key.1, key, entered);
            fire_contact(world, key.1, key.0, key, entered);
        }

        for key in self.previous_pairs.difference(current) {
            let both_sleeping = [key.0, key.1]
                .iter()
                .all(|&e| world.bodies.get(e).map_or(false, |b| b.sleeping));
            if both_sleeping {
                continue;
            }
            for (me, other) in [(key.0, key.1), (key.1, key.0)] {
                if let Some(callbacks) = world.collision_callbacks.get_mut(me) {
                    if let Some(cb) = callbacks.on_exit.as_mut() {
                        events::invoke_guarded("collision on_exit", || cb(me, other, commands));
                    }
                }
            }
        }
    }

    /// Union-find over dynamic bodies linked by contacts or joints; an
    /// island sleeps only when every member has been quiet long enough,
    /// and any active member keeps the whole island awake.
    fn update_sleep(&mut self, world: &mut World, dt: f64) {
        let config = &self.config;
        let mut index_of: FxHashMap<Entity, usize> = FxHashMap::default();
        let mut entities: Vec<Entity> = Vec::new();
        for (entity, body) in world.bodies.iter() {
            if body.is_dynamic() {
                index_of.insert(entity, entities.len());
                entities.push(entity);
            }
        }
        let mut parent: Vec<usize> = (0..entities.len()).collect();
        fn find(parent: &mut Vec<usize>, i: usize) -> usize {
            if parent[i] != i {
                let up = parent[i];
                let root = find(parent, up);
                parent[i] = root;
            }
            parent[i]
        }
        let mut union = |parent: &mut Vec<usize>, a: Entity, b: Entity| {
            if let (Some(&i), Some(&j)) = (index_of.get(&a), index_of.get(&b)) {
                let (ri, rj) = (find(parent, i), find(parent, j));
                if ri != rj {
                    parent[ri] = rj;
                }
            }
        };
        for key in &self.previous_pairs {
            union(&mut parent, key.0, key.1);
        }
        for (_, joint) in world.joints.iter() {
            union(&mut parent, joint.body_a, joint.body_b);
        }

        // Per-body timers.
        for (_, body) in world.bodies.iter_mut() {
            if !body.is_dynamic() || body.sleeping {
                continue;
            }
            let quiet = body.velocity.magnitude() < config.sleep_linear_threshold
                && body.angular_velocity.magnitude() < config.sleep_angular_threshold;
            if quiet {
                body.sleep_timer += dt;
            } else {
                body.sleep_timer = 0.0;
            }
        }

        // Island verdicts.
        let mut ready: FxHashMap<usize, bool> = FxHashMap::default();
        let mut active: FxHashMap<usize, bool> = FxHashMap::default();
        for (i, &entity) in entities.iter().enumerate() {
            let body = world.bodies.get(entity).expect("indexed above");
            let root = find(&mut parent, i);
            let body_ready = body.sleeping || body.sleep_timer >= config.sleep_time;
            let body_active = !body.sleeping && body.sleep_timer == 0.0;
            *ready.entry(root).or_insert(true) &= body_ready;
            *active.entry(root).or_insert(false) |= body_active;
        }
        for (i, &entity) in entities.iter().enumerate() {
            let root = find(&mut parent, i);
            let island_ready = ready.get(&root).copied().unwrap_or(false);
            let island_active = active.get(&root).copied().unwrap_or(false);
            let body = world.bodies.get_mut(entity).expect("indexed above");
            if island_ready && !body.sleeping {
                log::trace!("{entity} falls asleep");
                body.sleeping = true;
                body.velocity = Vec3::zero();
                body.angular_velocity = Vec3::zero();
            } else if island_active && body.sleeping {
                log::trace!("{entity} woken by island activity");
                body.wake();
            }
        }
    }
}

/// World-space snapshot of every collider, in component insertion order.
fn build_proxies(world: &World) -> Vec<ShapeProxy> {
    let mut proxies = Vec::with_capacity(world.colliders.len());
    for (entity, collider) in world.colliders.iter() {
        let Some((position, rotation, scale)) = world.world_pose(entity) else {
            continue;
        };
        let (body_type, friction, restitution) = match world.bodies.get(entity) {
            Some(body) => (body.body_type, body.friction, body.restitution),
            None => (BodyType::Static, 0.5, 0.0),
        };
        proxies.push(ShapeProxy::new(
            entity, collider, position, rotation, scale, body_type, friction, restitution,
        ));
    }
    proxies
}

/// Solver snapshot of every rigid body. Static and kinematic bodies get
/// zero inverse mass so impulses cannot move them.
fn snapshot_bodies(world: &World) -> (Vec<SolverBody>, FxHashMap<Entity, usize>) {
    let mut bodies = Vec::with_capacity(world.bodies.len());
    let mut slots = FxHashMap::default();
    for (entity, body) in world.bodies.iter() {
        let Some((position, rotation, _)) = world.world_pose(entity) else {
            continue;
        };
        let dynamic = body.is_dynamic();
        slots.insert(entity, bodies.len());
        bodies.push(SolverBody {
            entity,
            body_type: body.body_type,
            inv_mass: if dynamic { body.inv_mass } else { 0.0 },
            inv_inertia: if dynamic {
                body.inv_inertia_world
            } else {
                Mat3::zero()
            },
            velocity: body.velocity,
            angular_velocity: body.angular_velocity,
            position,
            rotation,
        });
    }
    (bodies, slots)
}

/// Returns the solver slot for `entity`, materializing an implicit static
/// body for plain colliders that have no RigidBody component.
fn ensure_slot(
    world: &World,
    bodies: &mut Vec<SolverBody>,
    slots: &mut FxHashMap<Entity, usize>,
    entity: Entity,
) -> Option<usize> {
    if let Some(&slot) = slots.get(&entity) {
        return Some(slot);
    }
    let (position, rotation, _) = world.world_pose(entity)?;
    let slot = bodies.len();
    bodies.push(SolverBody {
        entity,
        body_type: BodyType::Static,
        inv_mass: 0.0,
        inv_inertia: Mat3::zero(),
        velocity: Vec3::zero(),
        angular_velocity: Vec3::zero(),
        position,
        rotation,
    });
    slots.insert(entity, slot);
    Some(slot)
}
