pub mod aabb;
pub mod frustum;

pub use aabb::Aabb;
pub use frustum::Frustum;

use cgmath::{InnerSpace, Matrix, SquareMatrix, Zero};

/// Simulation-side math runs in f64; only matrices handed to the GPU are
/// narrowed to f32.
pub type Vec3 = cgmath::Vector3<f64>;
pub type Vec4 = cgmath::Vector4<f64>;
pub type Quat = cgmath::Quaternion<f64>;
pub type Mat3 = cgmath::Matrix3<f64>;
pub type Mat4 = cgmath::Matrix4<f64>;

pub type Vec2f = cgmath::Vector2<f32>;
pub type Vec3f = cgmath::Vector3<f32>;
pub type Vec4f = cgmath::Vector4<f32>;
pub type Mat3f = cgmath::Matrix3<f32>;
pub type Mat4f = cgmath::Matrix4<f32>;

pub const EPSILON: f64 = 1e-6;

/// Normalizes `v`, falling back to world up for degenerate input so callers
/// never see a NaN direction.
pub fn safe_normalize(v: Vec3) -> Vec3 {
    let len2 = v.magnitude2();
    if len2 < EPSILON * EPSILON {
        Vec3::unit_y()
    } else {
        v / len2.sqrt()
    }
}

/// Component-wise multiply. cgmath keeps this behind `ElementWise`; a free
/// function reads better at the call sites we have.
pub fn mul_elements(a: Vec3, b: Vec3) -> Vec3 {
    Vec3::new(a.x * b.x, a.y * b.y, a.z * b.z)
}

/// Advances an orientation by an angular velocity over `dt`.
///
/// Builds the incremental rotation dq = (cos(|w| dt / 2), sin(|w| dt / 2) * axis)
/// and renormalizes the product to keep the unit-norm invariant.
pub fn integrate_rotation(q: Quat, angular_velocity: Vec3, dt: f64) -> Quat {
    let omega = angular_velocity.magnitude();
    if omega < EPSILON {
        return q;
    }
    let axis = angular_velocity / omega;
    let half = omega * dt * 0.5;
    let dq = Quat::from_sv(half.cos(), axis * half.sin());
    (dq * q).normalize()
}

/// Builds two unit tangents orthogonal to `normal`.
///
/// The reference axis is picked away from the dominant component of the
/// normal so the basis stays stable as the normal rotates.
pub fn tangent_basis(normal: Vec3) -> (Vec3, Vec3) {
    let reference = if normal.x.abs() > 0.9 {
        Vec3::unit_y()
    } else {
        Vec3::unit_x()
    };
    let t1 = safe_normalize(normal.cross(reference));
    let t2 = normal.cross(t1);
    (t1, t2)
}

/// 3x3 skew-symmetric cross-product matrix of `v` (so `skew(v) * u == v x u`).
pub fn skew(v: Vec3) -> Mat3 {
    Mat3::new(
        0.0, v.z, -v.y, //
        -v.z, 0.0, v.x, //
        v.y, -v.x, 0.0,
    )
}

pub fn mat4_to_f32(m: Mat4) -> Mat4f {
    Mat4f::new(
        m.x.x as f32, m.x.y as f32, m.x.z as f32, m.x.w as f32, //
        m.y.x as f32, m.y.y as f32, m.y.z as f32, m.y.w as f32, //
        m.z.x as f32, m.z.y as f32, m.z.z as f32, m.z.w as f32, //
        m.w.x as f32, m.w.y as f32, m.w.z as f32, m.w.w as f32,
    )
}

/// Normal matrix of a model transform: transpose of the inverse of the
/// upper-left 3x3. Falls back to identity for singular scales.
pub fn normal_matrix(model: Mat4) -> Mat3 {
    let linear = Mat3::new(
        model.x.x, model.x.y, model.x.z, //
        model.y.x, model.y.y, model.y.z, //
        model.z.x, model.z.y, model.z.z,
    );
    match linear.invert() {
        Some(inv) => inv.transpose(),
        None => Mat3::identity(),
    }
}

/// Replaces non-finite components with zero. Applied at integration time to
/// keep one bad constraint from poisoning the whole island.
pub fn sanitize(v: Vec3) -> Vec3 {
    Vec3::new(
        if v.x.is_finite() { v.x } else { 0.0 },
        if v.y.is_finite() { v.y } else { 0.0 },
        if v.z.is_finite() { v.z } else { 0.0 },
    )
}

/// Clamps the magnitude of `v` to `max`, preserving direction.
pub fn clamp_magnitude(v: Vec3, max: f64) -> Vec3 {
    let len2 = v.magnitude2();
    if len2 > max * max {
        v * (max / len2.sqrt())
    } else {
        v
    }
}

pub fn vec3_is_zero(v: Vec3) -> bool {
    v.is_zero()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cgmath::{Rotation, Rotation3};

    #[test]
    fn normalize_degenerate_falls_back_to_up() {
        let n = safe_normalize(Vec3::zero());
        assert_relative_eq!(n.y, 1.0);
    }

    #[test]
    fn integrated_rotation_stays_unit_norm() {
        let mut q = Quat::from_axis_angle(Vec3::unit_x(), cgmath::Rad(0.3));
        for _ in 0..1000 {
            q = integrate_rotation(q, Vec3::new(3.0, -2.0, 7.0), 1.0 / 60.0);
        }
        assert!((q.magnitude() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn rotation_roundtrip_is_identity() {
        let q = Quat::from_axis_angle(safe_normalize(Vec3::new(1.0, 2.0, 3.0)), cgmath::Rad(1.1));
        let v = Vec3::new(0.5, -4.0, 2.0);
        let back = q.invert() * (q * v);
        assert_relative_eq!(back.x, v.x, epsilon = 1e-6);
        assert_relative_eq!(back.y, v.y, epsilon = 1e-6);
        assert_relative_eq!(back.z, v.z, epsilon = 1e-6);
    }

    #[test]
    fn tangent_basis_is_orthonormal() {
        for n in [
            Vec3::unit_x(),
            Vec3::unit_y(),
            Vec3::unit_z(),
            safe_normalize(Vec3::new(0.96, 0.2, 0.1)),
        ] {
            let (t1, t2) = tangent_basis(n);
            assert_relative_eq!(t1.magnitude(), 1.0, epsilon = 1e-9);
            assert_relative_eq!(t2.magnitude(), 1.0, epsilon = 1e-9);
            assert_relative_eq!(n.dot(t1), 0.0, epsilon = 1e-9);
            assert_relative_eq!(n.dot(t2), 0.0, epsilon = 1e-9);
            assert_relative_eq!(t1.dot(t2), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn skew_matches_cross_product() {
        let v = Vec3::new(1.0, -2.0, 0.5);
        let u = Vec3::new(0.3, 4.0, -1.0);
        let via_matrix = skew(v) * u;
        let direct = v.cross(u);
        assert_relative_eq!(via_matrix.x, direct.x, epsilon = 1e-12);
        assert_relative_eq!(via_matrix.y, direct.y, epsilon = 1e-12);
        assert_relative_eq!(via_matrix.z, direct.z, epsilon = 1e-12);
    }
}
