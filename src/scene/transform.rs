use cgmath::{InnerSpace, Rotation3};

use crate::ecs::Entity;
use crate::math::{Mat4, Quat, Vec3};

/// Spatial state of an entity. Positions and orientations are double
/// precision; only the matrices handed to the renderer drop to f32.
///
/// Invariants: `rotation` stays within 1e-6 of unit norm (re-normalized by
/// the physics integrator), scale components are non-zero.
#[derive(Clone, Debug)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    /// Optional parent for hierarchy composition. Entity ids, not pointers,
    /// so the component stays serializable and cycles cannot form by
    /// construction of the spawn order.
    pub parent: Option<Entity>,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 0.0),
            rotation: Quat::from_axis_angle(Vec3::unit_y(), cgmath::Rad(0.0)),
            scale: Vec3::new(1.0, 1.0, 1.0),
            parent: None,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation.normalize();
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Local TRS matrix.
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_translation(self.position)
            * Mat4::from(self.rotation)
            * Mat4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }

    pub fn max_scale_axis(&self) -> f64 {
        self.scale
            .x
            .abs()
            .max(self.scale.y.abs())
            .max(self.scale.z.abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn trs_order_applies_scale_first() {
        let t = Transform::from_position(Vec3::new(1.0, 0.0, 0.0))
            .with_rotation(Quat::from_axis_angle(Vec3::unit_z(), cgmath::Deg(90.0)))
            .with_scale(Vec3::new(2.0, 1.0, 1.0));
        let m = t.matrix();
        // Local +X is scaled to length 2, then rotated onto +Y, then offset.
        let p = m * cgmath::Vector4::new(1.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(p.x, 1.0, epsilon = 1e-9);
        assert_relative_eq!(p.y, 2.0, epsilon = 1e-9);
    }
}
