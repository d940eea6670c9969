use crate::math::Vec3;

/// Light source attached to an entity. Point lights take their position from
/// the entity's transform; directional lights carry an explicit direction.
#[derive(Clone, Debug)]
pub enum LightComponent {
    Point {
        color: Vec3,
        intensity: f64,
        range: f64,
    },
    Directional {
        direction: Vec3,
        color: Vec3,
        intensity: f64,
    },
}

impl LightComponent {
    pub fn point(color: Vec3, intensity: f64, range: f64) -> Self {
        Self::Point {
            color,
            intensity,
            range,
        }
    }

    pub fn directional(direction: Vec3, color: Vec3, intensity: f64) -> Self {
        Self::Directional {
            direction: crate::math::safe_normalize(direction),
            color,
            intensity,
        }
    }
}
