use cgmath::{InnerSpace, Rotation, Zero};

use crate::math::{mul_elements, safe_normalize, Mat3, Vec3, EPSILON};
use crate::physics::gjk;
use crate::physics::manifold::{ContactManifold, ContactPoint};
use crate::physics::shapes::{ColliderShape, ShapeProxy};

/// Precise shape-pair test. Returns a manifold with the normal pointing
/// from `a` to `b`, or None when the shapes do not touch.
///
/// Dispatch is ordered by shape rank so each unordered pair is implemented
/// once; a swapped invocation flips the resulting normal.
pub fn collide(a: &ShapeProxy, b: &ShapeProxy) -> Option<ContactManifold> {
    if rank(&a.shape) > rank(&b.shape) {
        let mut m = collide(b, a)?;
        std::mem::swap(&mut m.entity_a, &mut m.entity_b);
        m.normal = -m.normal;
        for p in &mut m.points {
            std::mem::swap(&mut p.ra, &mut p.rb);
        }
        return Some(m);
    }

    let mut manifold = match (&a.shape, &b.shape) {
        (ColliderShape::Sphere { .. }, ColliderShape::Sphere { .. }) => sphere_sphere(a, b),
        (ColliderShape::Sphere { .. }, ColliderShape::Aabb { .. })
        | (ColliderShape::Sphere { .. }, ColliderShape::Obb { .. }) => sphere_box(a, b),
        (ColliderShape::Sphere { .. }, ColliderShape::Triangle { a: ta, b: tb, c: tc }) => {
            sphere_triangle(a, b, *ta, *tb, *tc)
        }
        (ColliderShape::Sphere { .. }, ColliderShape::Capsule { .. }) => sphere_capsule(a, b),
        (ColliderShape::Capsule { .. }, ColliderShape::Capsule { .. }) => capsule_capsule(a, b),
        (ColliderShape::Capsule { .. }, ColliderShape::Aabb { .. })
        | (ColliderShape::Capsule { .. }, ColliderShape::Obb { .. }) => capsule_box(a, b),
        (ColliderShape::Aabb { .. } | ColliderShape::Obb { .. }, ColliderShape::Aabb { .. })
        | (ColliderShape::Aabb { .. } | ColliderShape::Obb { .. }, ColliderShape::Obb { .. }) => {
            box_box(a, b)
        }
        (_, ColliderShape::Heightfield { .. }) => heightfield_any(a, b),
        (ColliderShape::Triangle { .. }, ColliderShape::Triangle { .. }) => None,
        // Convex hulls and remaining mixed convex pairs share the generic
        // support-mapping path.
        _ => convex_convex(a, b),
    }?;

    if manifold.points.is_empty() {
        return None;
    }
    // Material combine: geometric-mean friction, maximum restitution.
    manifold.friction = (a.friction * b.friction).max(0.0).sqrt();
    manifold.restitution = a.restitution.max(b.restitution);
    manifold.reduce();
    Some(manifold)
}

fn rank(shape: &ColliderShape) -> u8 {
    match shape {
        ColliderShape::Sphere { .. } => 0,
        ColliderShape::Capsule { .. } => 1,
        ColliderShape::Aabb { .. } => 2,
        ColliderShape::Obb { .. } => 3,
        ColliderShape::ConvexHull { .. } => 4,
        ColliderShape::Triangle { .. } => 5,
        ColliderShape::Heightfield { .. } => 6,
    }
}

fn max_scale(p: &ShapeProxy) -> f64 {
    p.scale.x.abs().max(p.scale.y.abs()).max(p.scale.z.abs())
}

fn sphere_radius(p: &ShapeProxy) -> f64 {
    match p.shape {
        ColliderShape::Sphere { radius } => radius * max_scale(p),
        _ => 0.0,
    }
}

fn capsule_segment(p: &ShapeProxy) -> (Vec3, Vec3, f64) {
    match p.shape {
        ColliderShape::Capsule {
            radius,
            half_height,
            axis,
        } => {
            let dir = p.rotation.rotate_vector(axis.unit());
            let axis_scale = match axis {
                crate::physics::shapes::CapsuleAxis::X => p.scale.x.abs(),
                crate::physics::shapes::CapsuleAxis::Y => p.scale.y.abs(),
                crate::physics::shapes::CapsuleAxis::Z => p.scale.z.abs(),
            };
            let half = half_height * axis_scale;
            (
                p.position - dir * half,
                p.position + dir * half,
                radius * max_scale(p),
            )
        }
        _ => (p.position, p.position, 0.0),
    }
}

/// Oriented box view shared by the SAT and clipping code. `Aabb` shapes
/// arrive here with identity rotation already applied by the proxy.
#[derive(Clone, Copy)]
struct Box3 {
    center: Vec3,
    axes: [Vec3; 3],
    half: Vec3,
}

fn as_box(p: &ShapeProxy) -> Option<Box3> {
    let half_extents = match p.shape {
        ColliderShape::Aabb { half_extents } | ColliderShape::Obb { half_extents } => half_extents,
        _ => return None,
    };
    let r: Mat3 = p.rotation.into();
    let scaled = mul_elements(half_extents, p.scale);
    Some(Box3 {
        center: p.position,
        axes: [r.x, r.y, r.z],
        half: Vec3::new(scaled.x.abs(), scaled.y.abs(), scaled.z.abs()),
    })
}

fn sphere_sphere(a: &ShapeProxy, b: &ShapeProxy) -> Option<ContactManifold> {
    let ra = sphere_radius(a);
    let rb = sphere_radius(b);
    let delta = b.position - a.position;
    let dist2 = delta.magnitude2();
    let reach = ra + rb;
    if dist2 >= reach * reach {
        return None;
    }
    let dist = dist2.sqrt();
    let normal = if dist > EPSILON {
        delta / dist
    } else {
        Vec3::unit_y()
    };
    let penetration = reach - dist;
    let mut m = ContactManifold::new(a.entity, b.entity, normal);
    m.push(ContactPoint::new(
        a.position + normal * (ra - penetration * 0.5),
        penetration,
    ));
    Some(m)
}

fn sphere_box(a: &ShapeProxy, b: &ShapeProxy) -> Option<ContactManifold> {
    let bx = as_box(b)?;
    let r = sphere_radius(a);
    let rel = a.position - bx.center;
    let local = Vec3::new(
        rel.dot(bx.axes[0]),
        rel.dot(bx.axes[1]),
        rel.dot(bx.axes[2]),
    );
    let clamped = Vec3::new(
        local.x.clamp(-bx.half.x, bx.half.x),
        local.y.clamp(-bx.half.y, bx.half.y),
        local.z.clamp(-bx.half.z, bx.half.z),
    );
    let inside = local == clamped;

    let (normal_local, penetration, closest_local) = if inside {
        // Center inside the box: push out through the nearest face.
        let gaps = [
            (bx.half.x - local.x.abs(), 0usize),
            (bx.half.y - local.y.abs(), 1),
            (bx.half.z - local.z.abs(), 2),
        ];
        let &(gap, axis) = gaps
            .iter()
            .min_by(|(x, _), (y, _)| x.total_cmp(y))
            .unwrap();
        let mut n = Vec3::zero();
        n[axis] = 1.0_f64.copysign(local[axis]);
        (n, gap + r, clamped)
    } else {
        let delta = local - clamped;
        let dist2 = delta.magnitude2();
        if dist2 >= r * r {
            return None;
        }
        let dist = dist2.sqrt();
        (delta / dist.max(EPSILON), r - dist, clamped)
    };

    let normal_world =
        bx.axes[0] * normal_local.x + bx.axes[1] * normal_local.y + bx.axes[2] * normal_local.z;
    let closest_world = bx.center
        + bx.axes[0] * closest_local.x
        + bx.axes[1] * closest_local.y
        + bx.axes[2] * closest_local.z;

    // Sphere is A, so the manifold normal (A -> B) opposes the push-out.
    let mut m = ContactManifold::new(a.entity, b.entity, -normal_world);
    m.push(ContactPoint::new(closest_world, penetration));
    Some(m)
}

fn sphere_capsule(a: &ShapeProxy, b: &ShapeProxy) -> Option<ContactManifold> {
    let r_sphere = sphere_radius(a);
    let (p0, p1, r_capsule) = capsule_segment(b);
    let closest = closest_point_on_segment(p0, p1, a.position);
    let delta = closest - a.position;
    let reach = r_sphere + r_capsule;
    let dist2 = delta.magnitude2();
    if dist2 >= reach * reach {
        return None;
    }
    let dist = dist2.sqrt();
    let normal = if dist > EPSILON {
        delta / dist
    } else {
        Vec3::unit_y()
    };
    let mut m = ContactManifold::new(a.entity, b.entity, normal);
    m.push(ContactPoint::new(
        a.position + normal * (r_sphere - (reach - dist) * 0.5),
        reach - dist,
    ));
    Some(m)
}

fn sphere_triangle(
    a: &ShapeProxy,
    b: &ShapeProxy,
    ta: Vec3,
    tb: Vec3,
    tc: Vec3,
) -> Option<ContactManifold> {
    // Triangle vertices live in the owning entity's frame.
    let to_world = |v: Vec3| b.position + b.rotation.rotate_vector(mul_elements(v, b.scale));
    let (wa, wb, wc) = (to_world(ta), to_world(tb), to_world(tc));
    let r = sphere_radius(a);
    let closest = closest_point_on_triangle(a.position, wa, wb, wc);
    let delta = closest - a.position;
    let dist2 = delta.magnitude2();
    if dist2 >= r * r {
        return None;
    }
    let dist = dist2.sqrt();
    let normal = if dist > EPSILON {
        delta / dist
    } else {
        -safe_normalize((wb - wa).cross(wc - wa))
    };
    let mut m = ContactManifold::new(a.entity, b.entity, normal);
    m.push(ContactPoint::new(closest, r - dist));
    Some(m)
}

fn capsule_capsule(a: &ShapeProxy, b: &ShapeProxy) -> Option<ContactManifold> {
    let (a0, a1, ra) = capsule_segment(a);
    let (b0, b1, rb) = capsule_segment(b);
    let (ca, cb) = closest_points_segment_segment(a0, a1, b0, b1);
    let delta = cb - ca;
    let reach = ra + rb;
    let dist2 = delta.magnitude2();
    if dist2 >= reach * reach {
        return None;
    }
    let dist = dist2.sqrt();
    let normal = if dist > EPSILON {
        delta / dist
    } else {
        Vec3::unit_y()
    };
    let mut m = ContactManifold::new(a.entity, b.entity, normal);
    m.push(ContactPoint::new(
        ca + normal * (ra - (reach - dist) * 0.5),
        reach - dist,
    ));
    Some(m)
}

fn capsule_box(a: &ShapeProxy, b: &ShapeProxy) -> Option<ContactManifold> {
    let bx = as_box(b)?;
    let (p0, p1, r) = capsule_segment(a);

    // Deterministic ternary search for the segment parameter closest to the
    // box; the squared-distance profile along a segment is convex.
    let box_distance2 = |p: Vec3| {
        let rel = p - bx.center;
        let local = Vec3::new(
            rel.dot(bx.axes[0]).clamp(-bx.half.x, bx.half.x),
            rel.dot(bx.axes[1]).clamp(-bx.half.y, bx.half.y),
            rel.dot(bx.axes[2]).clamp(-bx.half.z, bx.half.z),
        );
        let closest = bx.center
            + bx.axes[0] * local.x
            + bx.axes[1] * local.y
            + bx.axes[2] * local.z;
        (p - closest).magnitude2()
    };
    let mut lo = 0.0_f64;
    let mut hi = 1.0_f64;
    for _ in 0..40 {
        let m1 = lo + (hi - lo) / 3.0;
        let m2 = hi - (hi - lo) / 3.0;
        let d1 = box_distance2(p0 + (p1 - p0) * m1);
        let d2 = box_distance2(p0 + (p1 - p0) * m2);
        if d1 < d2 {
            hi = m2;
        } else {
            lo = m1;
        }
    }
    let t = (lo + hi) * 0.5;
    let center = p0 + (p1 - p0) * t;

    // Sphere-at-closest-point against the box.
    let sphere_proxy = ShapeProxy {
        shape: ColliderShape::Sphere { radius: r },
        position: center,
        scale: Vec3::new(1.0, 1.0, 1.0),
        ..a.clone()
    };
    sphere_box(&sphere_proxy, b).map(|mut m| {
        m.entity_a = a.entity;
        m
    })
}

/// 15-axis SAT for oriented box pairs, with face clipping for the manifold.
fn box_box(a: &ShapeProxy, b: &ShapeProxy) -> Option<ContactManifold> {
    let ba = as_box(a)?;
    let bb = as_box(b)?;
    let delta = bb.center - ba.center;

    let project = |bx: &Box3, axis: Vec3| {
        bx.half.x * bx.axes[0].dot(axis).abs()
            + bx.half.y * bx.axes[1].dot(axis).abs()
            + bx.half.z * bx.axes[2].dot(axis).abs()
    };

    // Axis source: 0..3 = A face, 3..6 = B face, 6..15 = edge cross.
    let mut best_overlap = f64::INFINITY;
    let mut best_axis = Vec3::unit_y();
    let mut best_kind = 0usize;

    let mut test = |axis: Vec3, kind: usize, best_overlap: &mut f64, best_axis: &mut Vec3, best_kind: &mut usize| -> bool {
        let len2 = axis.magnitude2();
        if len2 < EPSILON {
            return true; // parallel edges, skip axis
        }
        let axis = axis / len2.sqrt();
        let dist = delta.dot(axis).abs();
        let overlap = project(&ba, axis) + project(&bb, axis) - dist;
        if overlap < 0.0 {
            return false;
        }
        // Edge axes must beat the best face axis by a margin, which keeps
        // the manifold on stable face contacts.
        let beats = if kind >= 6 {
            overlap < *best_overlap * 0.95
        } else {
            overlap < *best_overlap
        };
        if beats {
            *best_overlap = overlap;
            *best_axis = if delta.dot(axis) < 0.0 { -axis } else { axis };
            *best_kind = kind;
        }
        true
    };

    for i in 0..3 {
        if !test(ba.axes[i], i, &mut best_overlap, &mut best_axis, &mut best_kind) {
            return None;
        }
    }
    for i in 0..3 {
        if !test(bb.axes[i], 3 + i, &mut best_overlap, &mut best_axis, &mut best_kind) {
            return None;
        }
    }
    for i in 0..3 {
        for j in 0..3 {
            let axis = ba.axes[i].cross(bb.axes[j]);
            if !test(axis, 6 + i * 3 + j, &mut best_overlap, &mut best_axis, &mut best_kind) {
                return None;
            }
        }
    }

    let mut m = ContactManifold::new(a.entity, b.entity, best_axis);
    if best_kind >= 6 {
        // Edge-edge contact: closest points between the two involved edges.
        let i = (best_kind - 6) / 3;
        let j = (best_kind - 6) % 3;
        let (ea0, ea1) = support_edge(&ba, best_axis, i);
        let (eb0, eb1) = support_edge(&bb, -best_axis, j);
        let (pa, pb) = closest_points_segment_segment(ea0, ea1, eb0, eb1);
        m.push(ContactPoint::new((pa + pb) * 0.5, best_overlap));
        return Some(m);
    }

    // Face contact: clip the incident face of one box against the side
    // planes of the reference face on the other.
    let (reference, incident, ref_normal) = if best_kind < 3 {
        (&ba, &bb, best_axis)
    } else {
        (&bb, &ba, -best_axis)
    };
    let points = clip_face_contact(reference, incident, ref_normal);
    for (position, depth) in points {
        m.push(ContactPoint::new(position, depth));
    }
    Some(m)
}

/// The edge of `bx` along local axis `edge_axis` most extreme in `dir`.
fn support_edge(bx: &Box3, dir: Vec3, edge_axis: usize) -> (Vec3, Vec3) {
    let u = (edge_axis + 1) % 3;
    let v = (edge_axis + 2) % 3;
    let su = 1.0_f64.copysign(bx.axes[u].dot(dir));
    let sv = 1.0_f64.copysign(bx.axes[v].dot(dir));
    let base = bx.center + bx.axes[u] * (bx.half[u] * su) + bx.axes[v] * (bx.half[v] * sv);
    (
        base - bx.axes[edge_axis] * bx.half[edge_axis],
        base + bx.axes[edge_axis] * bx.half[edge_axis],
    )
}

fn face_vertices(bx: &Box3, normal: Vec3) -> ([Vec3; 4], usize) {
    // Pick the face whose outward normal best matches `normal`.
    let mut face_axis = 0;
    let mut best = f64::NEG_INFINITY;
    for i in 0..3 {
        let d = bx.axes[i].dot(normal).abs();
        if d > best {
            best = d;
            face_axis = i;
        }
    }
    let sign = 1.0_f64.copysign(bx.axes[face_axis].dot(normal));
    let n = bx.axes[face_axis] * sign;
    let u = bx.axes[(face_axis + 1) % 3] * bx.half[(face_axis + 1) % 3];
    let v = bx.axes[(face_axis + 2) % 3] * bx.half[(face_axis + 2) % 3];
    let c = bx.center + n * bx.half[face_axis];
    ([c + u + v, c + u - v, c - u - v, c - u + v], face_axis)
}

fn clip_face_contact(reference: &Box3, incident: &Box3, ref_normal: Vec3) -> Vec<(Vec3, f64)> {
    let (ref_face, ref_axis) = face_vertices(reference, ref_normal);
    let (incident_face, _) = face_vertices(incident, -ref_normal);

    let mut polygon: Vec<Vec3> = incident_face.to_vec();

    // Clip against the four side planes of the reference face.
    for i in 0..3 {
        if i == ref_axis {
            continue;
        }
        for sign in [-1.0, 1.0] {
            let plane_normal = reference.axes[i] * sign;
            let plane_offset = plane_normal.dot(reference.center) + reference.half[i];
            polygon = clip_polygon(&polygon, plane_normal, plane_offset);
            if polygon.is_empty() {
                return Vec::new();
            }
        }
    }

    // Keep only points at or below the reference face plane.
    let face_offset = ref_normal.dot(ref_face[0]);
    polygon
        .into_iter()
        .filter_map(|p| {
            let depth = face_offset - ref_normal.dot(p);
            if depth >= 0.0 {
                Some((p, depth))
            } else {
                None
            }
        })
        .collect()
}

/// Sutherland-Hodgman clip of a polygon against plane n.x <= offset.
fn clip_polygon(polygon: &[Vec3], normal: Vec3, offset: f64) -> Vec<Vec3> {
    let mut out = Vec::with_capacity(polygon.len() + 1);
    for (i, &current) in polygon.iter().enumerate() {
        let next = polygon[(i + 1) % polygon.len()];
        let d0 = normal.dot(current) - offset;
        let d1 = normal.dot(next) - offset;
        if d0 <= 0.0 {
            out.push(current);
        }
        if (d0 < 0.0 && d1 > 0.0) || (d0 > 0.0 && d1 < 0.0) {
            out.push(current + (next - current) * (d0 / (d0 - d1)));
        }
    }
    out
}

fn convex_convex(a: &ShapeProxy, b: &ShapeProxy) -> Option<ContactManifold> {
    let pen = gjk::intersect(a, b)?;
    if pen.depth <= 0.0 {
        return None;
    }
    let mut m = ContactManifold::new(a.entity, b.entity, pen.normal);
    m.push(ContactPoint::new(pen.contact, pen.depth));
    Some(m)
}

/// Heightfields collide through the triangles of the cells the other
/// shape's AABB sweeps over; every triangle hit is treated as static
/// geometry and merged into one manifold.
fn heightfield_any(a: &ShapeProxy, b: &ShapeProxy) -> Option<ContactManifold> {
    let field = match &b.shape {
        ColliderShape::Heightfield { field } => field.clone(),
        _ => return None,
    };
    if matches!(a.shape, ColliderShape::Heightfield { .. }) {
        return None;
    }

    // Footprint of A in field-local cell coordinates.
    let inv_rot = b.rotation.invert();
    let local_min = inv_rot.rotate_vector(a.aabb.min - b.position);
    let local_max = inv_rot.rotate_vector(a.aabb.max - b.position);
    let lo_x = ((local_min.x.min(local_max.x) / field.cell).floor() as isize).max(0) as usize;
    let lo_z = ((local_min.z.min(local_max.z) / field.cell).floor() as isize).max(0) as usize;
    let hi_x = ((local_min.x.max(local_max.x) / field.cell).ceil() as usize).min(field.width - 1);
    let hi_z = ((local_min.z.max(local_max.z) / field.cell).ceil() as usize).min(field.depth - 1);
    if lo_x >= hi_x || lo_z >= hi_z {
        return None;
    }

    let mut merged: Option<ContactManifold> = None;
    let mut deepest = 0.0_f64;
    for iz in lo_z..hi_z {
        for ix in lo_x..hi_x {
            let corner = |dx: usize, dz: usize| {
                Vec3::new(
                    (ix + dx) as f64 * field.cell,
                    field.height_at(ix + dx, iz + dz),
                    (iz + dz) as f64 * field.cell,
                )
            };
            let quad = [corner(0, 0), corner(1, 0), corner(1, 1), corner(0, 1)];
            for tri in [[quad[0], quad[1], quad[2]], [quad[0], quad[2], quad[3]]] {
                let tri_proxy = ShapeProxy {
                    shape: ColliderShape::Triangle {
                        a: tri[0],
                        b: tri[1],
                        c: tri[2],
                    },
                    ..b.clone()
                };
                let hit = match &a.shape {
                    ColliderShape::Sphere { .. } => {
                        sphere_triangle(a, &tri_proxy, tri[0], tri[1], tri[2])
                    }
                    _ => convex_convex(a, &tri_proxy),
                };
                if let Some(hit) = hit {
                    let depth = hit
                        .points
                        .iter()
                        .map(|p| p.penetration)
                        .fold(0.0, f64::max);
                    let merged = merged.get_or_insert_with(|| {
                        ContactManifold::new(a.entity, b.entity, hit.normal)
                    });
                    if depth > deepest {
                        deepest = depth;
                        merged.normal = hit.normal;
                    }
                    for p in hit.points {
                        merged.push(p);
                    }
                }
            }
        }
    }
    merged
}

pub fn closest_point_on_segment(p0: Vec3, p1: Vec3, point: Vec3) -> Vec3 {
    let d = p1 - p0;
    let len2 = d.magnitude2();
    if len2 < EPSILON {
        return p0;
    }
    let t = ((point - p0).dot(d) / len2).clamp(0.0, 1.0);
    p0 + d * t
}

/// Closest points between two segments (Ericson, Real-Time Collision
/// Detection 5.1.9).
pub fn closest_points_segment_segment(p1: Vec3, q1: Vec3, p2: Vec3, q2: Vec3) -> (Vec3, Vec3) {
    let d1 = q1 - p1;
    let d2 = q2 - p2;
    let r = p1 - p2;
    let a = d1.magnitude2();
    let e = d2.magnitude2();
    let f = d2.dot(r);

    let (s, t);
    if a < EPSILON && e < EPSILON {
        return (p1, p2);
    }
    if a < EPSILON {
        s = 0.0;
        t = (f / e).clamp(0.0, 1.0);
    } else {
        let c = d1.dot(r);
        if e < EPSILON {
            t = 0.0;
            s = (-c / a).clamp(0.0, 1.0);
        } else {
            let b = d1.dot(d2);
            let denom = a * e - b * b;
            let mut s_val = if denom > EPSILON {
                ((b * f - c * e) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let t_val = (b * s_val + f) / e;
            let t_clamped = t_val.clamp(0.0, 1.0);
            if (t_val - t_clamped).abs() > EPSILON {
                s_val = ((t_clamped * b - c) / a).clamp(0.0, 1.0);
            }
            s = s_val;
            t = t_clamped;
        }
    }
    (p1 + d1 * s, p2 + d2 * t)
}

pub fn closest_point_on_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    // Ericson 5.1.5, region walk over the barycentric domain.
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        return a + ab * (d1 / (d1 - d3));
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        return a + ac * (d2 / (d2 - d6));
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        return b + (c - b) * ((d4 - d3) / ((d4 - d3) + (d5 - d6)));
    }

    let denom = 1.0 / (va + vb + vc);
    a + ab * (vb * denom) + ac * (vc * denom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::Entity;
    use crate::physics::body::BodyType;
    use crate::physics::shapes::{CapsuleAxis, Collider};
    use crate::math::Quat;
    use approx::assert_relative_eq;
    use cgmath::{Deg, Rotation3};

    fn proxy(entity: u64, shape: ColliderShape, position: Vec3) -> ShapeProxy {
        ShapeProxy::new(
            Entity(entity),
            &Collider::new(shape),
            position,
            Quat::from_sv(1.0, Vec3::zero()),
            Vec3::new(1.0, 1.0, 1.0),
            BodyType::Dynamic,
            0.5,
            0.0,
        )
    }

    #[test]
    fn sphere_sphere_normal_points_a_to_b() {
        let a = proxy(1, ColliderShape::Sphere { radius: 1.0 }, Vec3::zero());
        let b = proxy(
            2,
            ColliderShape::Sphere { radius: 1.0 },
            Vec3::new(1.5, 0.0, 0.0),
        );
        let m = collide(&a, &b).expect("contact");
        assert_relative_eq!(m.normal.x, 1.0, epsilon = 1e-9);
        assert_relative_eq!(m.points[0].penetration, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn sphere_resting_on_box_has_up_contact() {
        let floor = proxy(
            1,
            ColliderShape::Aabb {
                half_extents: Vec3::new(10.0, 0.05, 10.0),
            },
            Vec3::zero(),
        );
        let ball = proxy(
            2,
            ColliderShape::Sphere { radius: 1.0 },
            Vec3::new(0.0, 1.0, 0.0),
        );
        let m = collide(&floor, &ball).expect("contact");
        // Normal floor -> ball is +Y.
        assert_relative_eq!(m.normal.y, 1.0, epsilon = 1e-9);
        assert_relative_eq!(m.points[0].penetration, 0.05, epsilon = 1e-9);
    }

    #[test]
    fn stacked_boxes_produce_four_point_face_manifold() {
        let a = proxy(
            1,
            ColliderShape::Aabb {
                half_extents: Vec3::new(0.5, 0.5, 0.5),
            },
            Vec3::zero(),
        );
        let b = proxy(
            2,
            ColliderShape::Aabb {
                half_extents: Vec3::new(0.5, 0.5, 0.5),
            },
            Vec3::new(0.0, 0.95, 0.0),
        );
        let m = collide(&a, &b).expect("contact");
        assert_relative_eq!(m.normal.y, 1.0, epsilon = 1e-9);
        assert_eq!(m.points.len(), 4);
        for p in &m.points {
            assert_relative_eq!(p.penetration, 0.05, epsilon = 1e-9);
        }
    }

    #[test]
    fn rotated_box_floor_contact_uses_face_axis() {
        let floor = proxy(
            1,
            ColliderShape::Aabb {
                half_extents: Vec3::new(10.0, 0.5, 10.0),
            },
            Vec3::zero(),
        );
        let tilted = ShapeProxy::new(
            Entity(2),
            &Collider::new(ColliderShape::Obb {
                half_extents: Vec3::new(0.5, 0.5, 0.5),
            }),
            Vec3::new(0.0, 1.1, 0.0),
            Quat::from_axis_angle(Vec3::unit_y(), Deg(30.0)),
            Vec3::new(1.0, 1.0, 1.0),
            BodyType::Dynamic,
            0.5,
            0.0,
        );
        let m = collide(&floor, &tilted).expect("contact");
        assert_relative_eq!(m.normal.y, 1.0, epsilon = 1e-6);
        assert!(!m.points.is_empty() && m.points.len() <= 4);
    }

    #[test]
    fn capsule_capsule_cross_contact() {
        let a = proxy(
            1,
            ColliderShape::Capsule {
                radius: 0.5,
                half_height: 1.0,
                axis: CapsuleAxis::Y,
            },
            Vec3::zero(),
        );
        let b = proxy(
            2,
            ColliderShape::Capsule {
                radius: 0.5,
                half_height: 1.0,
                axis: CapsuleAxis::X,
            },
            Vec3::new(0.0, 0.0, 0.8),
        );
        let m = collide(&a, &b).expect("contact");
        assert_relative_eq!(m.normal.z, 1.0, epsilon = 1e-9);
        assert_relative_eq!(m.points[0].penetration, 0.2, epsilon = 1e-9);
    }

    #[test]
    fn separated_shapes_return_none() {
        let a = proxy(1, ColliderShape::Sphere { radius: 0.5 }, Vec3::zero());
        let b = proxy(
            2,
            ColliderShape::Obb {
                half_extents: Vec3::new(0.5, 0.5, 0.5),
            },
            Vec3::new(5.0, 0.0, 0.0),
        );
        assert!(collide(&a, &b).is_none());
    }

    #[test]
    fn serial_and_swapped_dispatch_agree() {
        let a = proxy(1, ColliderShape::Sphere { radius: 1.0 }, Vec3::zero());
        let b = proxy(
            2,
            ColliderShape::Obb {
                half_extents: Vec3::new(1.0, 1.0, 1.0),
            },
            Vec3::new(1.5, 0.0, 0.0),
        );
        let m1 = collide(&a, &b).expect("contact");
        let m2 = collide(&b, &a).expect("contact");
        assert_relative_eq!(m1.normal.x, -m2.normal.x, epsilon = 1e-9);
        assert_relative_eq!(
            m1.points[0].penetration,
            m2.points[0].penetration,
            epsilon = 1e-9
        );
    }
}
