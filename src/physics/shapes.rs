use std::sync::Arc;

use cgmath::{InnerSpace, Rotation, SquareMatrix, Zero};

use crate::ecs::Entity;
use crate::math::{mul_elements, safe_normalize, Aabb, Mat3, Quat, Vec3, EPSILON};
use crate::physics::body::BodyType;

/// Axis a capsule extends along, in its local frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapsuleAxis {
    X,
    Y,
    Z,
}

impl CapsuleAxis {
    pub fn unit(self) -> Vec3 {
        match self {
            Self::X => Vec3::unit_x(),
            Self::Y => Vec3::unit_y(),
            Self::Z => Vec3::unit_z(),
        }
    }
}

/// Regular grid of heights, local origin at the grid's minimum corner.
/// Chunk generation happens outside the core; the collider only samples.
#[derive(Clone, Debug)]
pub struct Heightfield {
    pub width: usize,
    pub depth: usize,
    pub cell: f64,
    pub heights: Vec<f64>,
}

impl Heightfield {
    pub fn height_at(&self, ix: usize, iz: usize) -> f64 {
        self.heights[iz.min(self.depth - 1) * self.width + ix.min(self.width - 1)]
    }

    /// Bilinear height sample at a local (x, z) position.
    pub fn sample(&self, x: f64, z: f64) -> f64 {
        let fx = (x / self.cell).clamp(0.0, (self.width - 1) as f64);
        let fz = (z / self.cell).clamp(0.0, (self.depth - 1) as f64);
        let ix = fx.floor() as usize;
        let iz = fz.floor() as usize;
        let tx = fx - ix as f64;
        let tz = fz - iz as f64;
        let h00 = self.height_at(ix, iz);
        let h10 = self.height_at(ix + 1, iz);
        let h01 = self.height_at(ix, iz + 1);
        let h11 = self.height_at(ix + 1, iz + 1);
        let h0 = h00 * (1.0 - tx) + h10 * tx;
        let h1 = h01 * (1.0 - tx) + h11 * tx;
        h0 * (1.0 - tz) + h1 * tz
    }

    pub fn local_aabb(&self) -> Aabb {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for &h in &self.heights {
            lo = lo.min(h);
            hi = hi.max(h);
        }
        Aabb::new(
            Vec3::new(0.0, lo, 0.0),
            Vec3::new(
                (self.width - 1) as f64 * self.cell,
                hi,
                (self.depth - 1) as f64 * self.cell,
            ),
        )
    }
}

/// Collision geometry. Dispatch happens by `match` on the variant; anything
/// convex without a dedicated pair routine falls through to GJK/EPA via the
/// shared support mapping.
#[derive(Clone, Debug)]
pub enum ColliderShape {
    Sphere { radius: f64 },
    /// World-axis-aligned box; ignores the body's rotation.
    Aabb { half_extents: Vec3 },
    Obb { half_extents: Vec3 },
    Capsule { radius: f64, half_height: f64, axis: CapsuleAxis },
    ConvexHull { vertices: Arc<[Vec3]> },
    Triangle { a: Vec3, b: Vec3, c: Vec3 },
    Heightfield { field: Arc<Heightfield> },
}

impl ColliderShape {
    pub fn convex_hull(vertices: Vec<Vec3>) -> Self {
        Self::ConvexHull {
            vertices: vertices.into(),
        }
    }

    /// True for shapes that only ever collide as static world geometry.
    pub fn is_static_only(&self) -> bool {
        matches!(self, Self::Triangle { .. } | Self::Heightfield { .. })
    }

    /// Local-space support point: the vertex maximizing <v, dir>.
    pub fn local_support(&self, dir: Vec3) -> Vec3 {
        match self {
            Self::Sphere { radius } => safe_normalize(dir) * *radius,
            Self::Aabb { half_extents } | Self::Obb { half_extents } => Vec3::new(
                half_extents.x.copysign(dir.x),
                half_extents.y.copysign(dir.y),
                half_extents.z.copysign(dir.z),
            ),
            Self::Capsule {
                radius,
                half_height,
                axis,
            } => {
                let a = axis.unit();
                let end = a * half_height.copysign(dir.dot(a));
                end + safe_normalize(dir) * *radius
            }
            Self::ConvexHull { vertices } => {
                let mut best = Vec3::zero();
                let mut best_dot = f64::NEG_INFINITY;
                for &v in vertices.iter() {
                    let d = v.dot(dir);
                    if d > best_dot {
                        best_dot = d;
                        best = v;
                    }
                }
                best
            }
            Self::Triangle { a, b, c } => {
                let mut best = *a;
                let mut best_dot = a.dot(dir);
                for v in [*b, *c] {
                    let d = v.dot(dir);
                    if d > best_dot {
                        best_dot = d;
                        best = v;
                    }
                }
                best
            }
            // No meaningful support mapping; heightfields never enter GJK.
            Self::Heightfield { .. } => Vec3::zero(),
        }
    }

    /// Conservative local bounding box.
    pub fn local_aabb(&self) -> Aabb {
        match self {
            Self::Sphere { radius } => {
                let r = Vec3::new(*radius, *radius, *radius);
                Aabb::new(-r, r)
            }
            Self::Aabb { half_extents } | Self::Obb { half_extents } => {
                Aabb::new(-*half_extents, *half_extents)
            }
            Self::Capsule {
                radius,
                half_height,
                axis,
            } => {
                let mut half = Vec3::new(*radius, *radius, *radius);
                match axis {
                    CapsuleAxis::X => half.x += half_height,
                    CapsuleAxis::Y => half.y += half_height,
                    CapsuleAxis::Z => half.z += half_height,
                }
                Aabb::new(-half, half)
            }
            Self::ConvexHull { vertices } => Aabb::from_points(vertices.iter().copied()),
            Self::Triangle { a, b, c } => Aabb::from_points([*a, *b, *c]),
            Self::Heightfield { field } => field.local_aabb(),
        }
    }

    /// Inverse of the local inertia tensor for a body of `mass`.
    ///
    /// Spheres and boxes use the solid analytic tensors; capsules are
    /// approximated by their bounding cylinder, hulls by their bounding box.
    pub fn inv_inertia(&self, mass: f64) -> Mat3 {
        if mass <= 0.0 {
            return Mat3::zero();
        }
        let diag = |x: f64, y: f64, z: f64| {
            Mat3::from_diagonal(Vec3::new(
                if x > EPSILON { 1.0 / x } else { 0.0 },
                if y > EPSILON { 1.0 / y } else { 0.0 },
                if z > EPSILON { 1.0 / z } else { 0.0 },
            ))
        };
        match self {
            Self::Sphere { radius } => {
                let i = 0.4 * mass * radius * radius;
                diag(i, i, i)
            }
            Self::Aabb { half_extents } | Self::Obb { half_extents } => {
                let w = half_extents * 2.0;
                let f = mass / 12.0;
                diag(
                    f * (w.y * w.y + w.z * w.z),
                    f * (w.x * w.x + w.z * w.z),
                    f * (w.x * w.x + w.y * w.y),
                )
            }
            Self::Capsule {
                radius,
                half_height,
                axis,
            } => {
                let h = 2.0 * half_height;
                let r = *radius;
                let along = 0.5 * mass * r * r;
                let across = mass * (3.0 * r * r + h * h) / 12.0;
                match axis {
                    CapsuleAxis::X => diag(along, across, across),
                    CapsuleAxis::Y => diag(across, along, across),
                    CapsuleAxis::Z => diag(across, across, along),
                }
            }
            Self::ConvexHull { .. } => {
                let half = self.local_aabb().half_extents();
                Self::Obb { half_extents: half }.inv_inertia(mass)
            }
            Self::Triangle { .. } | Self::Heightfield { .. } => Mat3::zero(),
        }
    }
}

/// Collider component: geometry plus a local offset in the owning entity's
/// transform frame. Triggers report overlaps but never feed the solver.
#[derive(Clone, Debug)]
pub struct Collider {
    pub shape: ColliderShape,
    pub offset: Vec3,
    pub is_trigger: bool,
}

impl Collider {
    pub fn new(shape: ColliderShape) -> Self {
        Self {
            shape,
            offset: Vec3::zero(),
            is_trigger: false,
        }
    }

    pub fn trigger(shape: ColliderShape) -> Self {
        Self {
            is_trigger: true,
            ..Self::new(shape)
        }
    }

    pub fn with_offset(mut self, offset: Vec3) -> Self {
        self.offset = offset;
        self
    }
}

/// Immutable world-space snapshot of one collider, taken before the
/// parallel narrowphase so pair tests never touch the component store.
#[derive(Clone, Debug)]
pub struct ShapeProxy {
    pub entity: Entity,
    pub shape: ColliderShape,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub aabb: Aabb,
    pub is_trigger: bool,
    pub body_type: BodyType,
    pub friction: f64,
    pub restitution: f64,
}

impl ShapeProxy {
    pub fn new(
        entity: Entity,
        collider: &Collider,
        position: Vec3,
        rotation: Quat,
        scale: Vec3,
        body_type: BodyType,
        friction: f64,
        restitution: f64,
    ) -> Self {
        // Axis-aligned boxes deliberately drop the body rotation.
        let rotation = match collider.shape {
            ColliderShape::Aabb { .. } => Quat::from_sv(1.0, Vec3::zero()),
            _ => rotation,
        };
        let world_position = position + rotation.rotate_vector(mul_elements(collider.offset, scale));
        let aabb = collider
            .shape
            .local_aabb()
            .transformed(world_position, rotation, scale);
        Self {
            entity,
            shape: collider.shape.clone(),
            position: world_position,
            rotation,
            scale,
            aabb,
            is_trigger: collider.is_trigger,
            body_type,
            friction,
            restitution,
        }
    }

    /// World-space support point of the (scaled, rotated, translated) shape.
    pub fn support(&self, dir: Vec3) -> Vec3 {
        let local_dir = mul_elements(self.rotation.invert().rotate_vector(dir), self.scale);
        let local = mul_elements(self.shape.local_support(local_dir), self.scale);
        self.position + self.rotation.rotate_vector(local)
    }

    /// Distance from a world point to the surface of this shape; negative
    /// inside. Heightfields measure against the sampled surface below.
    pub fn distance_to_point(&self, p: Vec3) -> f64 {
        let local = mul_elements(
            self.rotation.invert().rotate_vector(p - self.position),
            Vec3::new(1.0 / self.scale.x, 1.0 / self.scale.y, 1.0 / self.scale.z),
        );
        let scale = self.scale.x.abs().max(self.scale.y.abs()).max(self.scale.z.abs());
        match &self.shape {
            ColliderShape::Sphere { radius } => (local.magnitude() - radius) * scale,
            ColliderShape::Aabb { half_extents } | ColliderShape::Obb { half_extents } => {
                let b = Aabb::new(-*half_extents, *half_extents);
                if b.contains_point(local) {
                    let d = *half_extents - Vec3::new(local.x.abs(), local.y.abs(), local.z.abs());
                    -d.x.min(d.y).min(d.z) * scale
                } else {
                    b.distance_to_point(local) * scale
                }
            }
            ColliderShape::Capsule {
                radius,
                half_height,
                axis,
            } => {
                let a = axis.unit();
                let t = local.dot(a).clamp(-*half_height, *half_height);
                ((local - a * t).magnitude() - radius) * scale
            }
            ColliderShape::ConvexHull { .. } | ColliderShape::Triangle { .. } => {
                // Bounding-box approximation is enough for the conservative
                // advancement that consumes this query.
                self.shape.local_aabb().distance_to_point(local) * scale
            }
            ColliderShape::Heightfield { field } => (local.y - field.sample(local.x, local.z)) * scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::body::BodyType;
    use approx::assert_relative_eq;
    use cgmath::{Deg, Rotation3, Zero};

    fn proxy(shape: ColliderShape, position: Vec3, rotation: Quat) -> ShapeProxy {
        ShapeProxy::new(
            Entity(1),
            &Collider::new(shape),
            position,
            rotation,
            Vec3::new(1.0, 1.0, 1.0),
            BodyType::Dynamic,
            0.5,
            0.0,
        )
    }

    #[test]
    fn sphere_support_reaches_surface() {
        let p = proxy(
            ColliderShape::Sphere { radius: 2.0 },
            Vec3::new(1.0, 0.0, 0.0),
            Quat::from_sv(1.0, Vec3::zero()),
        );
        let s = p.support(Vec3::unit_x());
        assert_relative_eq!(s.x, 3.0, epsilon = 1e-9);
    }

    #[test]
    fn obb_support_tracks_rotation() {
        let p = proxy(
            ColliderShape::Obb {
                half_extents: Vec3::new(2.0, 1.0, 1.0),
            },
            Vec3::zero(),
            Quat::from_axis_angle(Vec3::unit_z(), Deg(90.0)),
        );
        // The long X axis now points along +Y.
        let s = p.support(Vec3::unit_y());
        assert_relative_eq!(s.y, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn aabb_shape_ignores_rotation() {
        let p = proxy(
            ColliderShape::Aabb {
                half_extents: Vec3::new(2.0, 1.0, 1.0),
            },
            Vec3::zero(),
            Quat::from_axis_angle(Vec3::unit_z(), Deg(45.0)),
        );
        assert_relative_eq!(p.aabb.max.x, 2.0, epsilon = 1e-9);
        assert_relative_eq!(p.aabb.max.y, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn capsule_distance_to_point() {
        let p = proxy(
            ColliderShape::Capsule {
                radius: 0.5,
                half_height: 1.0,
                axis: CapsuleAxis::Y,
            },
            Vec3::zero(),
            Quat::from_sv(1.0, Vec3::zero()),
        );
        assert_relative_eq!(p.distance_to_point(Vec3::new(2.0, 0.0, 0.0)), 1.5, epsilon = 1e-9);
        assert_relative_eq!(p.distance_to_point(Vec3::new(0.0, 2.0, 0.0)), 0.5, epsilon = 1e-9);
    }
}
