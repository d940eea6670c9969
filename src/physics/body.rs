use cgmath::Zero;

use crate::math::{Mat3, Vec3};
use crate::physics::shapes::ColliderShape;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyType {
    /// Integrated, collides, receives impulses.
    Dynamic,
    /// Moves by its velocity but has infinite mass in the solver.
    Kinematic,
    /// Never moves. inv_mass is zero and integration skips it.
    Static,
}

/// Rigid body state. World-space inverse inertia is refreshed from the
/// orientation at the start of every sub-step; the local tensor is fixed at
/// construction from the collider shape.
#[derive(Clone, Debug)]
pub struct RigidBody {
    pub body_type: BodyType,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    pub mass: f64,
    pub inv_mass: f64,
    pub inv_inertia_local: Mat3,
    pub inv_inertia_world: Mat3,
    pub linear_damping: f64,
    pub angular_damping: f64,
    pub friction: f64,
    pub restitution: f64,
    pub gravity_scale: f64,
    pub grounded: bool,
    pub sleeping: bool,
    pub sleep_timer: f64,
    /// Opt-in continuous collision for fast movers.
    pub ccd: bool,
}

impl RigidBody {
    pub fn dynamic(mass: f64, shape: &ColliderShape) -> Self {
        let mass = mass.max(1e-9);
        let inv_inertia_local = shape.inv_inertia(mass);
        Self {
            body_type: BodyType::Dynamic,
            velocity: Vec3::zero(),
            angular_velocity: Vec3::zero(),
            mass,
            inv_mass: 1.0 / mass,
            inv_inertia_local,
            inv_inertia_world: inv_inertia_local,
            linear_damping: 0.0,
            angular_damping: 0.05,
            friction: 0.5,
            restitution: 0.0,
            gravity_scale: 1.0,
            grounded: false,
            sleeping: false,
            sleep_timer: 0.0,
            ccd: false,
        }
    }

    pub fn fixed() -> Self {
        Self {
            body_type: BodyType::Static,
            mass: 0.0,
            inv_mass: 0.0,
            inv_inertia_local: Mat3::zero(),
            inv_inertia_world: Mat3::zero(),
            ..Self::dynamic(1.0, &ColliderShape::Sphere { radius: 1.0 })
        }
    }

    pub fn kinematic() -> Self {
        Self {
            body_type: BodyType::Kinematic,
            ..Self::fixed()
        }
    }

    pub fn with_friction(mut self, friction: f64) -> Self {
        self.friction = friction;
        self
    }

    pub fn with_restitution(mut self, restitution: f64) -> Self {
        self.restitution = restitution;
        self
    }

    pub fn with_damping(mut self, linear: f64, angular: f64) -> Self {
        self.linear_damping = linear;
        self.angular_damping = angular;
        self
    }

    pub fn with_ccd(mut self) -> Self {
        self.ccd = true;
        self
    }

    pub fn is_dynamic(&self) -> bool {
        self.body_type == BodyType::Dynamic
    }

    /// Wakes the body and restarts its sleep clock.
    pub fn wake(&mut self) {
        self.sleeping = false;
        self.sleep_timer = 0.0;
    }
}
