use cgmath::{InnerSpace, Zero};

use crate::math::{safe_normalize, Vec3, EPSILON};
use crate::physics::shapes::ShapeProxy;

const MAX_ITERATIONS: usize = 64;
const EPA_TOLERANCE: f64 = 1e-6;

/// Vertex of the Minkowski difference A - B, with the witness points on
/// both shapes kept for contact reconstruction.
#[derive(Clone, Copy, Debug)]
pub struct SupportPoint {
    pub point: Vec3,
    pub on_a: Vec3,
    pub on_b: Vec3,
}

fn minkowski_support(a: &ShapeProxy, b: &ShapeProxy, dir: Vec3) -> SupportPoint {
    let on_a = a.support(dir);
    let on_b = b.support(-dir);
    SupportPoint {
        point: on_a - on_b,
        on_a,
        on_b,
    }
}

/// Penetration result of a GJK+EPA query. The normal points from A to B.
#[derive(Clone, Copy, Debug)]
pub struct Penetration {
    pub normal: Vec3,
    pub depth: f64,
    /// Midpoint between the two deepest supports along the normal.
    pub contact: Vec3,
}

/// GJK overlap test. Evolves a simplex in the Minkowski difference until it
/// encloses the origin or a support fails to pass it.
pub fn gjk(a: &ShapeProxy, b: &ShapeProxy) -> Option<Vec<SupportPoint>> {
    let mut dir = b.position - a.position;
    if dir.magnitude2() < EPSILON {
        dir = Vec3::unit_x();
    }

    let mut simplex = vec![minkowski_support(a, b, dir)];
    dir = -simplex[0].point;

    for _ in 0..MAX_ITERATIONS {
        if dir.magnitude2() < EPSILON * EPSILON {
            // Origin sits on the simplex boundary; report as touching.
            return Some(simplex);
        }
        let new = minkowski_support(a, b, dir);
        if new.point.dot(dir) < 0.0 {
            // The new support cannot pass the origin: no overlap.
            return None;
        }
        simplex.push(new);
        if next_simplex(&mut simplex, &mut dir) {
            return Some(simplex);
        }
    }
    None
}

/// One step of simplex evolution. Returns true once the simplex encloses
/// the origin; otherwise prunes the simplex and writes the next search
/// direction.
fn next_simplex(simplex: &mut Vec<SupportPoint>, dir: &mut Vec3) -> bool {
    match simplex.len() {
        2 => line_case(simplex, dir),
        3 => triangle_case(simplex, dir),
        4 => tetrahedron_case(simplex, dir),
        _ => false,
    }
}

fn line_case(simplex: &mut Vec<SupportPoint>, dir: &mut Vec3) -> bool {
    let a = simplex[1].point;
    let b = simplex[0].point;
    let ab = b - a;
    let ao = -a;
    if ab.dot(ao) > 0.0 {
        *dir = ab.cross(ao).cross(ab);
    } else {
        *simplex = vec![simplex[1]];
        *dir = ao;
    }
    false
}

fn triangle_case(simplex: &mut Vec<SupportPoint>, dir: &mut Vec3) -> bool {
    let a = simplex[2].point;
    let b = simplex[1].point;
    let c = simplex[0].point;
    let ab = b - a;
    let ac = c - a;
    let ao = -a;
    let abc = ab.cross(ac);

    if abc.cross(ac).dot(ao) > 0.0 {
        if ac.dot(ao) > 0.0 {
            *simplex = vec![simplex[0], simplex[2]];
            *dir = ac.cross(ao).cross(ac);
        } else {
            *simplex = vec![simplex[1], simplex[2]];
            return line_case(simplex, dir);
        }
    } else if ab.cross(abc).dot(ao) > 0.0 {
        *simplex = vec![simplex[1], simplex[2]];
        return line_case(simplex, dir);
    } else if abc.dot(ao) > 0.0 {
        *dir = abc;
    } else {
        simplex.swap(0, 1);
        *dir = -abc;
    }
    false
}

fn tetrahedron_case(simplex: &mut Vec<SupportPoint>, dir: &mut Vec3) -> bool {
    let a = simplex[3].point;
    let b = simplex[2].point;
    let c = simplex[1].point;
    let d = simplex[0].point;
    let ao = -a;
    let ab = b - a;
    let ac = c - a;
    let ad = d - a;

    let abc = ab.cross(ac);
    let acd = ac.cross(ad);
    let adb = ad.cross(ab);

    if abc.dot(ao) > 0.0 {
        *simplex = vec![simplex[1], simplex[2], simplex[3]];
        return triangle_case(simplex, dir);
    }
    if acd.dot(ao) > 0.0 {
        *simplex = vec![simplex[0], simplex[1], simplex[3]];
        return triangle_case(simplex, dir);
    }
    if adb.dot(ao) > 0.0 {
        *simplex = vec![simplex[2], simplex[0], simplex[3]];
        return triangle_case(simplex, dir);
    }
    true
}

#[derive(Clone, Copy, Debug)]
struct Face {
    indices: [usize; 3],
    normal: Vec3,
    distance: f64,
}

fn make_face(verts: &[SupportPoint], indices: [usize; 3]) -> Option<Face> {
    let a = verts[indices[0]].point;
    let b = verts[indices[1]].point;
    let c = verts[indices[2]].point;
    let mut normal = (b - a).cross(c - a);
    if normal.magnitude2() < EPSILON * EPSILON {
        return None;
    }
    normal = normal.normalize();
    let mut distance = normal.dot(a);
    let mut indices = indices;
    if distance < 0.0 {
        // Flip winding so normals always face away from the origin.
        normal = -normal;
        distance = -distance;
        indices.swap(1, 2);
    }
    Some(Face {
        indices,
        normal,
        distance,
    })
}

/// EPA: expands the terminal GJK simplex into a polytope whose closest face
/// to the origin yields the penetration normal and depth.
///
/// Degenerate input (flat simplex, zero-area faces) falls back to a unit-Y
/// normal with zero depth rather than failing the whole narrowphase.
pub fn epa(a: &ShapeProxy, b: &ShapeProxy, simplex: &[SupportPoint]) -> Penetration {
    let fallback = Penetration {
        normal: Vec3::unit_y(),
        depth: 0.0,
        contact: (a.position + b.position) * 0.5,
    };

    let mut verts = simplex.to_vec();
    if !inflate_to_tetrahedron(a, b, &mut verts) {
        return fallback;
    }

    let mut faces: Vec<Face> = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]]
        .into_iter()
        .filter_map(|idx| make_face(&verts, idx))
        .collect();
    if faces.len() < 4 {
        return fallback;
    }

    for _ in 0..MAX_ITERATIONS {
        let closest = match faces
            .iter()
            .enumerate()
            .min_by(|(_, x), (_, y)| x.distance.total_cmp(&y.distance))
        {
            Some((i, _)) => i,
            None => return fallback,
        };
        let face = faces[closest];

        let support = minkowski_support(a, b, face.normal);
        let growth = support.point.dot(face.normal) - face.distance;
        if growth < EPA_TOLERANCE {
            return finalize(a, b, face);
        }

        // Remove every face the new vertex can see; the once-used boundary
        // edges form the silhouette to stitch the new vertex into.
        let mut edges: Vec<(usize, usize)> = Vec::new();
        let mut kept = Vec::with_capacity(faces.len());
        for f in faces {
            if f.normal.dot(support.point - verts[f.indices[0]].point) > 0.0 {
                for (i, j) in [(0, 1), (1, 2), (2, 0)] {
                    let edge = (f.indices[i], f.indices[j]);
                    if let Some(pos) = edges.iter().position(|&(x, y)| (y, x) == edge) {
                        edges.remove(pos);
                    } else {
                        edges.push(edge);
                    }
                }
            } else {
                kept.push(f);
            }
        }
        faces = kept;

        let new_index = verts.len();
        verts.push(support);
        for (i, j) in edges {
            if let Some(f) = make_face(&verts, [i, j, new_index]) {
                faces.push(f);
            }
        }
        if faces.is_empty() {
            return fallback;
        }
    }

    // Iteration cap reached: report the best face found so far.
    match faces
        .iter()
        .min_by(|x, y| x.distance.total_cmp(&y.distance))
    {
        Some(face) => finalize(a, b, *face),
        None => fallback,
    }
}

fn finalize(a: &ShapeProxy, b: &ShapeProxy, face: Face) -> Penetration {
    let normal = face.normal;
    let deep_a = a.support(normal);
    let deep_b = b.support(-normal);
    Penetration {
        normal,
        depth: face.distance,
        contact: (deep_a + deep_b) * 0.5,
    }
}

/// EPA needs a volumetric start. GJK can terminate with fewer than four
/// vertices when the origin lies on a boundary feature; probe the axis
/// directions to recover a tetrahedron.
fn inflate_to_tetrahedron(a: &ShapeProxy, b: &ShapeProxy, verts: &mut Vec<SupportPoint>) -> bool {
    let probes = [
        Vec3::unit_x(),
        -Vec3::unit_x(),
        Vec3::unit_y(),
        -Vec3::unit_y(),
        Vec3::unit_z(),
        -Vec3::unit_z(),
    ];
    let mut p = 0;
    while verts.len() < 4 && p < probes.len() {
        let candidate = minkowski_support(a, b, probes[p]);
        p += 1;
        let distinct = verts
            .iter()
            .all(|v| (v.point - candidate.point).magnitude2() > EPSILON);
        if !distinct {
            continue;
        }
        // Reject candidates that keep the simplex degenerate.
        let ok = match verts.len() {
            0 | 1 => true,
            2 => {
                let ab = verts[1].point - verts[0].point;
                ab.cross(candidate.point - verts[0].point).magnitude2() > EPSILON
            }
            _ => {
                let ab = verts[1].point - verts[0].point;
                let ac = verts[2].point - verts[0].point;
                ab.cross(ac).dot(candidate.point - verts[0].point).abs() > EPSILON
            }
        };
        if ok {
            verts.push(candidate);
        }
    }
    verts.len() == 4
}

/// Full convex-vs-convex query: overlap via GJK, penetration via EPA.
pub fn intersect(a: &ShapeProxy, b: &ShapeProxy) -> Option<Penetration> {
    let simplex = gjk(a, b)?;
    let mut pen = epa(a, b, &simplex);
    pen.normal = safe_normalize(pen.normal);
    Some(pen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::Entity;
    use crate::physics::body::BodyType;
    use crate::physics::shapes::{Collider, ColliderShape};
    use crate::math::Quat;
    use approx::assert_relative_eq;

    fn hull_cube(center: Vec3, half: f64) -> ShapeProxy {
        let mut verts = Vec::new();
        for sx in [-half, half] {
            for sy in [-half, half] {
                for sz in [-half, half] {
                    verts.push(Vec3::new(sx, sy, sz));
                }
            }
        }
        ShapeProxy::new(
            Entity(1),
            &Collider::new(ColliderShape::convex_hull(verts)),
            center,
            Quat::from_sv(1.0, Vec3::zero()),
            Vec3::new(1.0, 1.0, 1.0),
            BodyType::Dynamic,
            0.5,
            0.0,
        )
    }

    #[test]
    fn separated_hulls_do_not_intersect() {
        let a = hull_cube(Vec3::zero(), 0.5);
        let b = hull_cube(Vec3::new(3.0, 0.0, 0.0), 0.5);
        assert!(intersect(&a, &b).is_none());
    }

    #[test]
    fn overlapping_hulls_report_axis_and_depth() {
        let a = hull_cube(Vec3::zero(), 0.5);
        let b = hull_cube(Vec3::new(0.8, 0.0, 0.0), 0.5);
        let pen = intersect(&a, &b).expect("overlap");
        assert_relative_eq!(pen.normal.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(pen.depth, 0.2, epsilon = 1e-6);
    }

    #[test]
    fn deep_overlap_picks_minimum_translation() {
        let a = hull_cube(Vec3::zero(), 1.0);
        let b = hull_cube(Vec3::new(0.25, 1.8, 0.0), 1.0);
        let pen = intersect(&a, &b).expect("overlap");
        assert_relative_eq!(pen.normal.y, 1.0, epsilon = 1e-6);
        assert_relative_eq!(pen.depth, 0.2, epsilon = 1e-6);
    }
}
