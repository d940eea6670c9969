use cgmath::{perspective, Deg};

use crate::math::Mat4;

/// Perspective camera. The first active camera found during the view walk
/// drives the frame; all others are ignored.
#[derive(Clone, Debug)]
pub struct CameraComponent {
    pub fov_y_degrees: f64,
    pub near: f64,
    pub far: f64,
    pub active: bool,
}

impl Default for CameraComponent {
    fn default() -> Self {
        Self {
            fov_y_degrees: 60.0,
            near: 0.1,
            far: 500.0,
            active: true,
        }
    }
}

impl CameraComponent {
    /// GL-convention projection (Y up, -1..1 clip depth from cgmath). The
    /// render backend flips Y and remaps depth before packing UBOs.
    pub fn projection(&self, aspect: f64) -> Mat4 {
        perspective(Deg(self.fov_y_degrees), aspect, self.near, self.far)
    }
}
