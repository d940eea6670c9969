use cgmath::{InnerSpace, Zero};

use crate::ecs::Entity;
use crate::math::{tangent_basis, Mat3, Quat, Vec3, EPSILON};
use crate::physics::body::BodyType;
use crate::physics::manifold::ContactManifold;
use crate::physics::PhysicsConfig;

/// Snapshot of a body taken before constraint solving. Velocities are
/// mutated by the iterations and written back to the component store
/// afterwards; positions and rotations stay fixed during the solve.
#[derive(Clone, Debug)]
pub struct SolverBody {
    pub entity: Entity,
    pub body_type: BodyType,
    pub inv_mass: f64,
    pub inv_inertia: Mat3,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    pub position: Vec3,
    pub rotation: Quat,
}

impl SolverBody {
    pub fn apply_impulse(&mut self, impulse: Vec3, arm: Vec3) {
        self.velocity += impulse * self.inv_mass;
        self.angular_velocity += self.inv_inertia * arm.cross(impulse);
    }

    pub fn velocity_at(&self, arm: Vec3) -> Vec3 {
        self.velocity + self.angular_velocity.cross(arm)
    }
}

/// One manifold bound to solver body slots, with the per-point effective
/// masses and bias terms precomputed.
pub struct ContactConstraint {
    pub manifold: ContactManifold,
    pub a: usize,
    pub b: usize,
    pub tangent1: Vec3,
    pub tangent2: Vec3,
}

/// Effective mass of a unit impulse along `n` applied at arms `ra`/`rb`:
/// the diagonal entry of the contact-space Gram matrix.
fn effective_mass(a: &SolverBody, b: &SolverBody, ra: Vec3, rb: Vec3, n: Vec3) -> f64 {
    let term_a = (a.inv_inertia * ra.cross(n)).cross(ra);
    let term_b = (b.inv_inertia * rb.cross(n)).cross(rb);
    let k = a.inv_mass + b.inv_mass + n.dot(term_a + term_b);
    if k > EPSILON {
        1.0 / k
    } else {
        0.0
    }
}

/// Pre-step: lever arms, effective masses, Baumgarte and restitution bias.
pub fn prepare_contacts(
    bodies: &[SolverBody],
    constraints: &mut [ContactConstraint],
    dt: f64,
    config: &PhysicsConfig,
) {
    let inv_dt = if dt > EPSILON { 1.0 / dt } else { 0.0 };
    for constraint in constraints {
        let (t1, t2) = tangent_basis(constraint.manifold.normal);
        constraint.tangent1 = t1;
        constraint.tangent2 = t2;

        let body_a = &bodies[constraint.a];
        let body_b = &bodies[constraint.b];
        let normal = constraint.manifold.normal;
        let restitution = constraint.manifold.restitution;

        for point in &mut constraint.manifold.points {
            point.ra = point.position - body_a.position;
            point.rb = point.position - body_b.position;
            point.normal_mass = effective_mass(body_a, body_b, point.ra, point.rb, normal);
            point.tangent_mass = [
                effective_mass(body_a, body_b, point.ra, point.rb, t1),
                effective_mass(body_a, body_b, point.ra, point.rb, t2),
            ];

            let baumgarte = config.position_correction
                * inv_dt
                * (point.penetration - config.penetration_slop).max(0.0);

            let rel = body_b.velocity_at(point.rb) - body_a.velocity_at(point.ra);
            let rel_n = rel.dot(normal);
            // Restitution only for genuinely approaching contacts, so
            // resting stacks do not vibrate.
            let restitution_bias = if rel_n < -config.restitution_threshold {
                -restitution * rel_n
            } else {
                0.0
            };
            point.bias = baumgarte + restitution_bias;
        }
    }
}

/// Applies the cached impulses once before iterating.
pub fn warm_start_contacts(bodies: &mut [SolverBody], constraints: &[ContactConstraint]) {
    for constraint in constraints {
        let normal = constraint.manifold.normal;
        for point in &constraint.manifold.points {
            let impulse = normal * point.normal_impulse
                + constraint.tangent1 * point.tangent_impulse[0]
                + constraint.tangent2 * point.tangent_impulse[1];
            let (ra, rb) = (point.ra, point.rb);
            let (a, b) = split_pair(bodies, constraint.a, constraint.b);
            a.apply_impulse(-impulse, ra);
            b.apply_impulse(impulse, rb);
        }
    }
}

/// One Gauss-Seidel sweep over all contact points: normal row first
/// (accumulated impulse clamped non-negative), then both friction rows
/// clamped to the friction cone of the current normal impulse.
pub fn solve_contacts(bodies: &mut [SolverBody], constraints: &mut [ContactConstraint]) {
    for constraint in constraints {
        let normal = constraint.manifold.normal;
        let friction = constraint.manifold.friction;
        for point in &mut constraint.manifold.points {
            let (a, b) = split_pair(bodies, constraint.a, constraint.b);

            let rel = b.velocity_at(point.rb) - a.velocity_at(point.ra);
            let rel_n = rel.dot(normal);
            let delta = point.normal_mass * (-rel_n + point.bias);
            let old = point.normal_impulse;
            point.normal_impulse = (old + delta).max(0.0);
            let applied = point.normal_impulse - old;
            a.apply_impulse(normal * -applied, point.ra);
            b.apply_impulse(normal * applied, point.rb);

            let max_tangent = friction * point.normal_impulse;
            for (k, tangent) in [constraint.tangent1, constraint.tangent2].into_iter().enumerate() {
                let rel = b.velocity_at(point.rb) - a.velocity_at(point.ra);
                let rel_t = rel.dot(tangent);
                let delta = point.tangent_mass[k] * -rel_t;
                let old = point.tangent_impulse[k];
                point.tangent_impulse[k] = (old + delta).clamp(-max_tangent, max_tangent);
                let applied = point.tangent_impulse[k] - old;
                a.apply_impulse(tangent * -applied, point.ra);
                b.apply_impulse(tangent * applied, point.rb);
            }
        }
    }
}

/// Disjoint mutable access to a body pair.
pub fn split_pair(bodies: &mut [SolverBody], a: usize, b: usize) -> (&mut SolverBody, &mut SolverBody) {
    debug_assert_ne!(a, b);
    if a < b {
        let (lo, hi) = bodies.split_at_mut(b);
        (&mut lo[a], &mut hi[0])
    } else {
        let (lo, hi) = bodies.split_at_mut(a);
        (&mut hi[0], &mut lo[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::manifold::{ContactManifold, ContactPoint};
    use cgmath::{Rad, Rotation3, SquareMatrix};

    fn body(entity: u64, inv_mass: f64, position: Vec3, velocity: Vec3) -> SolverBody {
        SolverBody {
            entity: Entity(entity),
            body_type: if inv_mass > 0.0 {
                BodyType::Dynamic
            } else {
                BodyType::Static
            },
            inv_mass,
            inv_inertia: if inv_mass > 0.0 {
                Mat3::from_diagonal(Vec3::new(1.0, 1.0, 1.0))
            } else {
                Mat3::zero()
            },
            velocity,
            angular_velocity: Vec3::zero(),
            position,
            rotation: Quat::from_axis_angle(Vec3::unit_y(), Rad(0.0)),
        }
    }

    fn head_on_constraint() -> (Vec<SolverBody>, Vec<ContactConstraint>) {
        let bodies = vec![
            body(1, 0.0, Vec3::new(0.0, -0.5, 0.0), Vec3::zero()),
            body(2, 1.0, Vec3::new(0.0, 0.5, 0.0), Vec3::new(0.0, -5.0, 0.0)),
        ];
        let mut manifold = ContactManifold::new(Entity(1), Entity(2), Vec3::unit_y());
        manifold.friction = 0.5;
        manifold.push(ContactPoint::new(Vec3::zero(), 0.01));
        let constraints = vec![ContactConstraint {
            manifold,
            a: 0,
            b: 1,
            tangent1: Vec3::zero(),
            tangent2: Vec3::zero(),
        }];
        (bodies, constraints)
    }

    #[test]
    fn normal_impulse_stays_non_negative_and_stops_approach() {
        let (mut bodies, mut constraints) = head_on_constraint();
        let config = PhysicsConfig::default();
        prepare_contacts(&bodies, &mut constraints, 1.0 / 60.0, &config);
        for _ in 0..8 {
            solve_contacts(&mut bodies, &mut constraints);
        }
        let point = &constraints[0].manifold.points[0];
        assert!(point.normal_impulse >= 0.0);
        // Relative normal velocity should be resolved (up to bias pushout).
        assert!(bodies[1].velocity.y >= -1e-9);
        // Friction cone holds.
        let cone = constraints[0].manifold.friction * point.normal_impulse + 1e-12;
        assert!(point.tangent_impulse[0].abs() <= cone);
        assert!(point.tangent_impulse[1].abs() <= cone);
    }

    #[test]
    fn static_body_never_moves() {
        let (mut bodies, mut constraints) = head_on_constraint();
        let config = PhysicsConfig::default();
        prepare_contacts(&bodies, &mut constraints, 1.0 / 60.0, &config);
        warm_start_contacts(&mut bodies, &constraints);
        for _ in 0..8 {
            solve_contacts(&mut bodies, &mut constraints);
        }
        assert_eq!(bodies[0].velocity, Vec3::zero());
        assert_eq!(bodies[0].angular_velocity, Vec3::zero());
    }
}
