use cgmath::InnerSpace;

use super::{Mat4, Vec3, Vec4};

/// View frustum as six inward-facing planes (ax + by + cz + d >= 0 inside),
/// extracted from a combined view-projection matrix.
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    /// Gribb/Hartmann plane extraction: each plane is a sum or difference
    /// of the fourth row of `view_proj` with one of the first three rows.
    pub fn from_view_proj(m: Mat4) -> Self {
        let row = |i: usize| Vec4::new(m.x[i], m.y[i], m.z[i], m.w[i]);
        let r0 = row(0);
        let r1 = row(1);
        let r2 = row(2);
        let r3 = row(3);

        let mut planes = [
            r3 + r0, // left
            r3 - r0, // right
            r3 + r1, // bottom
            r3 - r1, // top
            r3 + r2, // near
            r3 - r2, // far
        ];
        for p in &mut planes {
            let n = Vec3::new(p.x, p.y, p.z).magnitude();
            if n > super::EPSILON {
                *p /= n;
            }
        }
        Self { planes }
    }

    pub fn contains_sphere(&self, center: Vec3, radius: f64) -> bool {
        for p in &self.planes {
            let dist = p.x * center.x + p.y * center.y + p.z * center.z + p.w;
            if dist < -radius {
                return false;
            }
        }
        true
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        self.contains_sphere(p, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{perspective, Deg, Matrix4, Point3};

    fn look_down_neg_z() -> Mat4 {
        let proj: Mat4 = perspective(Deg(60.0), 16.0 / 9.0, 0.1, 100.0);
        let view = Matrix4::look_at_rh(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 0.0, -1.0),
            Vec3::unit_y(),
        );
        proj * view
    }

    #[test]
    fn sphere_ahead_is_inside() {
        let f = Frustum::from_view_proj(look_down_neg_z());
        assert!(f.contains_sphere(Vec3::new(0.0, 0.0, -10.0), 1.0));
    }

    #[test]
    fn sphere_behind_camera_is_culled() {
        let f = Frustum::from_view_proj(look_down_neg_z());
        assert!(!f.contains_sphere(Vec3::new(0.0, 0.0, 10.0), 1.0));
    }

    #[test]
    fn sphere_straddling_plane_is_kept() {
        let f = Frustum::from_view_proj(look_down_neg_z());
        // Center outside the far plane, radius reaching back in.
        assert!(f.contains_sphere(Vec3::new(0.0, 0.0, -101.0), 5.0));
    }
}
