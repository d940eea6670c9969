use cgmath::InnerSpace;

use crate::math::{safe_normalize, Vec3, EPSILON};
use crate::physics::shapes::ShapeProxy;

const MAX_ADVANCEMENT_STEPS: usize = 16;
const CONTACT_TOLERANCE: f64 = 1e-3;

/// Earliest time of impact found by a conservative-advancement sweep.
#[derive(Clone, Copy, Debug)]
pub struct SweepHit {
    pub toi: f64,
    pub normal: Vec3,
    pub other: usize,
}

/// Sweeps the body's bounding sphere along `velocity * dt` against the
/// given colliders, advancing by the current clearance each step. The
/// clearance comes from each shape's point-distance query, so shapes
/// without an analytic routine degrade to their bounding box; bodies they
/// miss fall back to discrete collision for the sub-step.
pub fn sweep(
    proxy: &ShapeProxy,
    velocity: Vec3,
    dt: f64,
    others: &[ShapeProxy],
    skip: impl Fn(usize) -> bool,
) -> Option<SweepHit> {
    let speed = velocity.magnitude();
    if speed < EPSILON {
        return None;
    }
    let dir = velocity / speed;
    let center = proxy.aabb.center();
    let radius = proxy.aabb.half_extents().magnitude();

    let mut best: Option<SweepHit> = None;
    for (index, other) in others.iter().enumerate() {
        if skip(index) || other.is_trigger {
            continue;
        }
        // Cheap reject: the collider is farther than the whole sweep.
        let start_clearance = other.distance_to_point(center) - radius;
        if start_clearance > speed * dt {
            continue;
        }

        let mut t = 0.0;
        for _ in 0..MAX_ADVANCEMENT_STEPS {
            let p = center + velocity * t;
            let clearance = other.distance_to_point(p) - radius;
            if clearance < CONTACT_TOLERANCE {
                if best.map_or(true, |b| t < b.toi) {
                    best = Some(SweepHit {
                        toi: t,
                        normal: distance_gradient(other, p),
                        other: index,
                    });
                }
                break;
            }
            // Advance by the clearance: nothing can be hit sooner.
            t += clearance / speed;
            if t >= dt {
                break;
            }
        }
    }
    best
}

/// Outward surface normal approximated by the gradient of the distance
/// field, central differences.
fn distance_gradient(shape: &ShapeProxy, p: Vec3) -> Vec3 {
    let h = 1e-4;
    let dx = shape.distance_to_point(p + Vec3::new(h, 0.0, 0.0))
        - shape.distance_to_point(p - Vec3::new(h, 0.0, 0.0));
    let dy = shape.distance_to_point(p + Vec3::new(0.0, h, 0.0))
        - shape.distance_to_point(p - Vec3::new(0.0, h, 0.0));
    let dz = shape.distance_to_point(p + Vec3::new(0.0, 0.0, h))
        - shape.distance_to_point(p - Vec3::new(0.0, 0.0, h));
    safe_normalize(Vec3::new(dx, dy, dz))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::Entity;
    use crate::physics::body::BodyType;
    use crate::physics::shapes::{Collider, ColliderShape};
    use crate::math::Quat;
    use approx::assert_relative_eq;
    use cgmath::Zero;

    fn proxy(entity: u64, shape: ColliderShape, position: Vec3) -> ShapeProxy {
        ShapeProxy::new(
            Entity(entity),
            &Collider::new(shape),
            position,
            Quat::from_sv(1.0, Vec3::zero()),
            Vec3::new(1.0, 1.0, 1.0),
            BodyType::Static,
            0.5,
            0.0,
        )
    }

    #[test]
    fn fast_sphere_hits_thin_wall_mid_step() {
        let bullet = proxy(1, ColliderShape::Sphere { radius: 0.1 }, Vec3::new(-5.0, 0.0, 0.0));
        let wall = proxy(
            2,
            ColliderShape::Aabb {
                half_extents: Vec3::new(0.05, 10.0, 10.0),
            },
            Vec3::zero(),
        );
        // 600 units/s: tunnels straight through a discrete step at 1/60.
        let hit = sweep(&bullet, Vec3::new(600.0, 0.0, 0.0), 1.0 / 60.0, &[wall], |_| false)
            .expect("sweep hit");
        // Impact happens around x = -0.15 => toi near (5 - 0.15) / 600.
        assert!(hit.toi > 0.0 && hit.toi < 1.0 / 60.0);
        assert_relative_eq!(hit.normal.x, -1.0, epsilon = 1e-3);
    }

    #[test]
    fn slow_body_reports_no_hit() {
        let ball = proxy(1, ColliderShape::Sphere { radius: 0.1 }, Vec3::new(-5.0, 0.0, 0.0));
        let wall = proxy(
            2,
            ColliderShape::Aabb {
                half_extents: Vec3::new(0.05, 10.0, 10.0),
            },
            Vec3::zero(),
        );
        assert!(sweep(&ball, Vec3::new(1.0, 0.0, 0.0), 1.0 / 60.0, &[wall], |_| false).is_none());
    }
}
