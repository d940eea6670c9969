use cgmath::{InnerSpace, Rotation};

use crate::ecs::Entity;
use crate::math::{mul_elements, safe_normalize, Aabb, Vec3, EPSILON};
use crate::physics::shapes::{ColliderShape, ShapeProxy};

/// Result of a ray query, ordered by distance along the ray.
#[derive(Clone, Copy, Debug)]
pub struct RayHit {
    pub entity: Entity,
    pub distance: f64,
    pub position: Vec3,
    pub normal: Vec3,
}

/// Tests one collider. The ray direction must be unit length.
pub fn ray_test(proxy: &ShapeProxy, origin: Vec3, direction: Vec3, max_dist: f64) -> Option<RayHit> {
    let hit = match &proxy.shape {
        ColliderShape::Sphere { radius } => {
            ray_sphere(origin, direction, proxy.position, radius * max_scale(proxy), max_dist)
        }
        ColliderShape::Aabb { half_extents } => {
            let half = mul_elements(*half_extents, proxy.scale);
            let aabb = Aabb::from_center_half_extents(
                proxy.position,
                Vec3::new(half.x.abs(), half.y.abs(), half.z.abs()),
            );
            ray_aabb(origin, direction, &aabb, max_dist)
        }
        ColliderShape::Obb { half_extents } => {
            ray_obb(origin, direction, proxy, *half_extents, max_dist)
        }
        ColliderShape::Capsule { .. } => ray_capsule(origin, direction, proxy, max_dist),
        ColliderShape::ConvexHull { .. } => {
            // Documented approximation: AABB pre-test, then the local
            // bounding-box slab stands in for the exact hull faces.
            proxy.aabb.ray_intersect(origin, direction, max_dist)?;
            ray_obb_local_box(origin, direction, proxy, max_dist)
        }
        ColliderShape::Triangle { a, b, c } => {
            let to_world =
                |v: Vec3| proxy.position + proxy.rotation.rotate_vector(mul_elements(v, proxy.scale));
            ray_triangle(origin, direction, to_world(*a), to_world(*b), to_world(*c), max_dist)
        }
        ColliderShape::Heightfield { .. } => ray_heightfield(origin, direction, proxy, max_dist),
    }?;
    Some(RayHit {
        entity: proxy.entity,
        ..hit
    })
}

fn max_scale(p: &ShapeProxy) -> f64 {
    p.scale.x.abs().max(p.scale.y.abs()).max(p.scale.z.abs())
}

fn hit(distance: f64, position: Vec3, normal: Vec3) -> Option<RayHit> {
    Some(RayHit {
        entity: Entity(0),
        distance,
        position,
        normal,
    })
}

/// Quadratic in t against |o + t d - c| = r.
fn ray_sphere(
    origin: Vec3,
    direction: Vec3,
    center: Vec3,
    radius: f64,
    max_dist: f64,
) -> Option<RayHit> {
    let m = origin - center;
    let b = m.dot(direction);
    let c = m.magnitude2() - radius * radius;
    if c > 0.0 && b > 0.0 {
        return None;
    }
    let discriminant = b * b - c;
    if discriminant < 0.0 {
        return None;
    }
    let t = (-b - discriminant.sqrt()).max(0.0);
    if t > max_dist {
        return None;
    }
    let position = origin + direction * t;
    hit(t, position, safe_normalize(position - center))
}

fn ray_aabb(origin: Vec3, direction: Vec3, aabb: &Aabb, max_dist: f64) -> Option<RayHit> {
    let t = aabb.ray_intersect(origin, direction, max_dist)?;
    let position = origin + direction * t;
    // Face normal from the dominant axis of the surface point.
    let local = position - aabb.center();
    let half = aabb.half_extents();
    let ratios = [
        (local.x / half.x.max(EPSILON)).abs(),
        (local.y / half.y.max(EPSILON)).abs(),
        (local.z / half.z.max(EPSILON)).abs(),
    ];
    let axis = ratios
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut normal = Vec3::new(0.0, 0.0, 0.0);
    normal[axis] = 1.0_f64.copysign(local[axis]);
    hit(t, position, normal)
}

/// Transforms the ray into the box's local frame and runs the slab test.
fn ray_obb(
    origin: Vec3,
    direction: Vec3,
    proxy: &ShapeProxy,
    half_extents: Vec3,
    max_dist: f64,
) -> Option<RayHit> {
    let inv_rot = proxy.rotation.invert();
    let local_origin = inv_rot.rotate_vector(origin - proxy.position);
    let local_dir = inv_rot.rotate_vector(direction);
    let half = mul_elements(half_extents, proxy.scale);
    let aabb = Aabb::from_center_half_extents(
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(half.x.abs(), half.y.abs(), half.z.abs()),
    );
    let local_hit = ray_aabb(local_origin, local_dir, &aabb, max_dist)?;
    hit(
        local_hit.distance,
        origin + direction * local_hit.distance,
        proxy.rotation.rotate_vector(local_hit.normal),
    )
}

fn ray_obb_local_box(
    origin: Vec3,
    direction: Vec3,
    proxy: &ShapeProxy,
    max_dist: f64,
) -> Option<RayHit> {
    let local = proxy.shape.local_aabb();
    let inv_rot = proxy.rotation.invert();
    let local_origin = inv_rot.rotate_vector(origin - proxy.position);
    let local_dir = inv_rot.rotate_vector(direction);
    let scaled = Aabb::new(
        mul_elements(local.min, proxy.scale),
        mul_elements(local.max, proxy.scale),
    );
    let local_hit = ray_aabb(local_origin, local_dir, &scaled, max_dist)?;
    hit(
        local_hit.distance,
        origin + direction * local_hit.distance,
        proxy.rotation.rotate_vector(local_hit.normal),
    )
}

/// Infinite-cylinder quadratic clipped to the segment span, then the two
/// sphere caps.
fn ray_capsule(origin: Vec3, direction: Vec3, proxy: &ShapeProxy, max_dist: f64) -> Option<RayHit> {
    let (radius, half_height, axis) = match proxy.shape {
        ColliderShape::Capsule {
            radius,
            half_height,
            axis,
        } => (radius * max_scale(proxy), half_height, axis),
        _ => return None,
    };
    let axis_dir = proxy.rotation.rotate_vector(axis.unit());
    let axis_scale = match axis {
        crate::physics::shapes::CapsuleAxis::X => proxy.scale.x.abs(),
        crate::physics::shapes::CapsuleAxis::Y => proxy.scale.y.abs(),
        crate::physics::shapes::CapsuleAxis::Z => proxy.scale.z.abs(),
    };
    let half = half_height * axis_scale;
    let p0 = proxy.position - axis_dir * half;
    let p1 = proxy.position + axis_dir * half;

    let mut best: Option<RayHit> = None;
    let mut consider = |candidate: Option<RayHit>| {
        if let Some(c) = candidate {
            if best.map_or(true, |b| c.distance < b.distance) {
                best = Some(c);
            }
        }
    };

    // Cylinder body: solve the quadratic of the ray against the infinite
    // cylinder, accept solutions whose axial projection is inside the span.
    let d = direction - axis_dir * direction.dot(axis_dir);
    let m = (origin - proxy.position) - axis_dir * (origin - proxy.position).dot(axis_dir);
    let a = d.magnitude2();
    if a > EPSILON {
        let b = m.dot(d);
        let c = m.magnitude2() - radius * radius;
        let disc = b * b - a * c;
        if disc >= 0.0 {
            let t = (-b - disc.sqrt()) / a;
            if t >= 0.0 && t <= max_dist {
                let position = origin + direction * t;
                let axial = (position - proxy.position).dot(axis_dir);
                if axial.abs() <= half {
                    let on_axis = proxy.position + axis_dir * axial;
                    consider(hit(t, position, safe_normalize(position - on_axis)));
                }
            }
        }
    }
    consider(ray_sphere(origin, direction, p0, radius, max_dist));
    consider(ray_sphere(origin, direction, p1, radius, max_dist));
    best
}

/// Moeller-Trumbore, front and back faces.
fn ray_triangle(
    origin: Vec3,
    direction: Vec3,
    a: Vec3,
    b: Vec3,
    c: Vec3,
    max_dist: f64,
) -> Option<RayHit> {
    let ab = b - a;
    let ac = c - a;
    let pvec = direction.cross(ac);
    let det = ab.dot(pvec);
    if det.abs() < EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let tvec = origin - a;
    let u = tvec.dot(pvec) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let qvec = tvec.cross(ab);
    let v = direction.dot(qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = ac.dot(qvec) * inv_det;
    if t < 0.0 || t > max_dist {
        return None;
    }
    let mut normal = safe_normalize(ab.cross(ac));
    if normal.dot(direction) > 0.0 {
        normal = -normal;
    }
    hit(t, origin + direction * t, normal)
}

/// Marches the ray across the field in cell-sized steps and tests the two
/// triangles of each crossed cell.
fn ray_heightfield(
    origin: Vec3,
    direction: Vec3,
    proxy: &ShapeProxy,
    max_dist: f64,
) -> Option<RayHit> {
    let field = match &proxy.shape {
        ColliderShape::Heightfield { field } => field.clone(),
        _ => return None,
    };
    proxy.aabb.ray_intersect(origin, direction, max_dist)?;

    let step = field.cell * 0.5;
    let steps = (max_dist / step).ceil() as usize;
    let mut previous_above = true;
    for i in 0..=steps.min(4096) {
        let t = i as f64 * step;
        if t > max_dist {
            break;
        }
        let p = origin + direction * t;
        let local = proxy.rotation.invert().rotate_vector(p - proxy.position);
        let ground = field.sample(local.x, local.z);
        let above = local.y > ground;
        if !above && previous_above && i > 0 {
            // Refine by bisection between the last two samples.
            let mut lo = t - step;
            let mut hi = t;
            for _ in 0..16 {
                let mid = (lo + hi) * 0.5;
                let q = origin + direction * mid;
                let lq = proxy.rotation.invert().rotate_vector(q - proxy.position);
                if lq.y > field.sample(lq.x, lq.z) {
                    lo = mid;
                } else {
                    hi = mid;
                }
            }
            let t_hit = (lo + hi) * 0.5;
            let position = origin + direction * t_hit;
            // Normal from the sampled surface gradient.
            let lp = proxy.rotation.invert().rotate_vector(position - proxy.position);
            let h = field.cell * 0.25;
            let dx = field.sample(lp.x + h, lp.z) - field.sample(lp.x - h, lp.z);
            let dz = field.sample(lp.x, lp.z + h) - field.sample(lp.x, lp.z - h);
            let normal = proxy
                .rotation
                .rotate_vector(safe_normalize(Vec3::new(-dx / (2.0 * h), 1.0, -dz / (2.0 * h))));
            return hit(t_hit, position, normal);
        }
        previous_above = above;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::body::BodyType;
    use crate::physics::shapes::{CapsuleAxis, Collider};
    use crate::math::Quat;
    use approx::assert_relative_eq;
    use cgmath::{Deg, Rotation3, Zero};

    fn proxy(shape: ColliderShape, position: Vec3, rotation: Quat) -> ShapeProxy {
        ShapeProxy::new(
            Entity(7),
            &Collider::new(shape),
            position,
            rotation,
            Vec3::new(1.0, 1.0, 1.0),
            BodyType::Static,
            0.5,
            0.0,
        )
    }

    #[test]
    fn ray_hits_capsule_side() {
        let capsule = proxy(
            ColliderShape::Capsule {
                radius: 0.5,
                half_height: 1.0,
                axis: CapsuleAxis::Y,
            },
            Vec3::zero(),
            Quat::from_sv(1.0, Vec3::zero()),
        );
        let hit = ray_test(&capsule, Vec3::new(2.0, 0.0, 0.0), -Vec3::unit_x(), 10.0).unwrap();
        assert_relative_eq!(hit.distance, 1.5, epsilon = 1e-6);
        assert_relative_eq!(hit.normal.x, 1.0, epsilon = 1e-6);
        assert_eq!(hit.entity, Entity(7));
    }

    #[test]
    fn ray_hits_capsule_cap() {
        let capsule = proxy(
            ColliderShape::Capsule {
                radius: 0.5,
                half_height: 1.0,
                axis: CapsuleAxis::Y,
            },
            Vec3::zero(),
            Quat::from_sv(1.0, Vec3::zero()),
        );
        let hit = ray_test(&capsule, Vec3::new(0.0, 4.0, 0.0), -Vec3::unit_y(), 10.0).unwrap();
        assert_relative_eq!(hit.distance, 2.5, epsilon = 1e-6);
        assert_relative_eq!(hit.normal.y, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn ray_obb_respects_rotation() {
        let obb = proxy(
            ColliderShape::Obb {
                half_extents: Vec3::new(2.0, 0.5, 0.5),
            },
            Vec3::zero(),
            Quat::from_axis_angle(Vec3::unit_z(), Deg(90.0)),
        );
        // The long axis now points along Y; from above we hit at y = 2.
        let hit = ray_test(&obb, Vec3::new(0.0, 5.0, 0.0), -Vec3::unit_y(), 10.0).unwrap();
        assert_relative_eq!(hit.distance, 3.0, epsilon = 1e-6);
    }

    #[test]
    fn ray_sphere_from_inside_clamps_to_origin() {
        let sphere = proxy(
            ColliderShape::Sphere { radius: 2.0 },
            Vec3::zero(),
            Quat::from_sv(1.0, Vec3::zero()),
        );
        let hit = ray_test(&sphere, Vec3::zero(), Vec3::unit_x(), 10.0).unwrap();
        assert_relative_eq!(hit.distance, 0.0, epsilon = 1e-9);
    }
}
