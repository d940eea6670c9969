use cgmath::InnerSpace;

use super::{Mat3, Quat, Vec3};

/// Axis-aligned bounding box in world units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_center_half_extents(center: Vec3, half: Vec3) -> Self {
        Self {
            min: center - half,
            max: center + half,
        }
    }

    pub fn from_points<I: IntoIterator<Item = Vec3>>(points: I) -> Self {
        let mut iter = points.into_iter();
        let first = iter.next().unwrap_or(Vec3::new(0.0, 0.0, 0.0));
        let mut aabb = Self::new(first, first);
        for p in iter {
            aabb.grow_point(p);
        }
        aabb
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn smallest_extent(&self) -> f64 {
        let e = self.max - self.min;
        e.x.min(e.y).min(e.z)
    }

    pub fn grow_point(&mut self, p: Vec3) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.min.z = self.min.z.min(p.z);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
        self.max.z = self.max.z.max(p.z);
    }

    pub fn expand(&self, margin: f64) -> Self {
        let m = Vec3::new(margin, margin, margin);
        Self {
            min: self.min - m,
            max: self.max + m,
        }
    }

    pub fn merge(&self, other: &Self) -> Self {
        Self {
            min: Vec3::new(
                self.min.x.min(other.min.x),
                self.min.y.min(other.min.y),
                self.min.z.min(other.min.z),
            ),
            max: Vec3::new(
                self.max.x.max(other.max.x),
                self.max.y.max(other.max.y),
                self.max.z.max(other.max.z),
            ),
        }
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Closest point inside the box to `p`.
    pub fn clamp_point(&self, p: Vec3) -> Vec3 {
        Vec3::new(
            p.x.clamp(self.min.x, self.max.x),
            p.y.clamp(self.min.y, self.max.y),
            p.z.clamp(self.min.z, self.max.z),
        )
    }

    pub fn distance_to_point(&self, p: Vec3) -> f64 {
        (p - self.clamp_point(p)).magnitude()
    }

    /// Transforms a local-space box by rotation + translation + scale and
    /// returns the enclosing world-space box. Uses the absolute-value
    /// rotation matrix so the result stays conservative without visiting
    /// all eight corners.
    pub fn transformed(&self, position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        let center = super::mul_elements(self.center(), scale);
        let half = super::mul_elements(self.half_extents(), scale);
        let half = Vec3::new(half.x.abs(), half.y.abs(), half.z.abs());

        let r: Mat3 = rotation.into();
        let world_center = position + r * center;
        let world_half = Vec3::new(
            r.x.x.abs() * half.x + r.y.x.abs() * half.y + r.z.x.abs() * half.z,
            r.x.y.abs() * half.x + r.y.y.abs() * half.y + r.z.y.abs() * half.z,
            r.x.z.abs() * half.x + r.y.z.abs() * half.y + r.z.z.abs() * half.z,
        );
        Self::from_center_half_extents(world_center, world_half)
    }

    /// Slab test. Returns the entry distance along the ray when the box is
    /// hit within `max_dist`.
    pub fn ray_intersect(&self, origin: Vec3, direction: Vec3, max_dist: f64) -> Option<f64> {
        let mut t_min: f64 = 0.0;
        let mut t_max = max_dist;
        for axis in 0..3 {
            let (o, d, lo, hi) = match axis {
                0 => (origin.x, direction.x, self.min.x, self.max.x),
                1 => (origin.y, direction.y, self.min.y, self.max.y),
                _ => (origin.z, direction.z, self.min.z, self.max.z),
            };
            if d.abs() < super::EPSILON {
                if o < lo || o > hi {
                    return None;
                }
            } else {
                let inv = 1.0 / d;
                let mut t0 = (lo - o) * inv;
                let mut t1 = (hi - o) * inv;
                if t0 > t1 {
                    std::mem::swap(&mut t0, &mut t1);
                }
                t_min = t_min.max(t0);
                t_max = t_max.min(t1);
                if t_min > t_max {
                    return None;
                }
            }
        }
        Some(t_min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cgmath::{Rad, Rotation3};

    #[test]
    fn identity_transform_preserves_box() {
        let local = Aabb::new(Vec3::new(-1.0, -2.0, -3.0), Vec3::new(1.0, 2.0, 3.0));
        let world = local.transformed(
            Vec3::new(0.0, 0.0, 0.0),
            Quat::from_axis_angle(Vec3::unit_y(), Rad(0.0)),
            Vec3::new(1.0, 1.0, 1.0),
        );
        assert_relative_eq!(world.min.x, local.min.x, epsilon = 1e-12);
        assert_relative_eq!(world.max.z, local.max.z, epsilon = 1e-12);
    }

    #[test]
    fn rotated_box_is_conservative() {
        let local = Aabb::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0));
        let world = local.transformed(
            Vec3::new(0.0, 0.0, 0.0),
            Quat::from_axis_angle(Vec3::unit_y(), Rad(std::f64::consts::FRAC_PI_4)),
            Vec3::new(1.0, 1.0, 1.0),
        );
        let expect = std::f64::consts::SQRT_2;
        assert_relative_eq!(world.max.x, expect, epsilon = 1e-9);
        assert_relative_eq!(world.max.y, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn ray_slab_hits_front_face() {
        let b = Aabb::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0));
        let t = b
            .ray_intersect(Vec3::new(-5.0, 0.0, 0.0), Vec3::unit_x(), 100.0)
            .unwrap();
        assert_relative_eq!(t, 4.0, epsilon = 1e-9);
    }

    #[test]
    fn ray_misses_offset_box() {
        let b = Aabb::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0));
        assert!(b
            .ray_intersect(Vec3::new(-5.0, 3.0, 0.0), Vec3::unit_x(), 100.0)
            .is_none());
    }
}
