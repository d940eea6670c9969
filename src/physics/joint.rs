use cgmath::{InnerSpace, Rotation, SquareMatrix, Zero};

use crate::ecs::Entity;
use crate::math::{safe_normalize, skew, tangent_basis, Mat3, Quat, Vec3, EPSILON};
use crate::physics::solver::{split_pair, SolverBody};

/// Joint flavor. All variants share the anchored point constraint; the
/// angular rows differ per kind.
#[derive(Clone, Debug)]
pub enum JointKind {
    /// Anchors coincide, rotation free.
    BallSocket,
    /// Anchor distance held at `target`, rotation free.
    Distance { target: f64 },
    /// Rotation only about `axis` (local to body A), optional angle limits
    /// in radians.
    Hinge { axis: Vec3, limits: Option<(f64, f64)> },
    /// Anchors coincide and relative rotation is locked.
    Fixed,
    /// Translation only along `axis` (local to body A), rotation locked,
    /// optional travel limits.
    Slider { axis: Vec3, limits: Option<(f64, f64)> },
}

/// Joint component. Holds entity ids rather than references so the graph
/// stays serializable; the solver resolves ids each sub-step and silently
/// skips joints whose bodies are gone.
#[derive(Clone, Debug)]
pub struct Joint {
    pub body_a: Entity,
    pub body_b: Entity,
    pub local_anchor_a: Vec3,
    pub local_anchor_b: Vec3,
    pub kind: JointKind,
    /// Accumulated impulses, persisted across sub-steps for warm starting.
    pub impulse: Vec3,
    pub angular_impulse: Vec3,
    pub axial_impulse: f64,
    pub limit_impulse: f64,
    /// Relative rotation at the first solve, the zero reference for
    /// angular locks and limit angles.
    pub reference: Option<Quat>,
}

impl Joint {
    pub fn new(body_a: Entity, body_b: Entity, kind: JointKind) -> Self {
        Self {
            body_a,
            body_b,
            local_anchor_a: Vec3::zero(),
            local_anchor_b: Vec3::zero(),
            kind,
            impulse: Vec3::zero(),
            angular_impulse: Vec3::zero(),
            axial_impulse: 0.0,
            limit_impulse: 0.0,
            reference: None,
        }
    }

    pub fn with_anchors(mut self, local_anchor_a: Vec3, local_anchor_b: Vec3) -> Self {
        self.local_anchor_a = local_anchor_a;
        self.local_anchor_b = local_anchor_b;
        self
    }
}

/// Joint bound to solver slots with the per-sub-step geometry precomputed.
pub struct JointConstraint {
    pub joint_entity: Entity,
    pub joint: Joint,
    pub a: usize,
    pub b: usize,
    ra: Vec3,
    rb: Vec3,
    point_mass: Mat3,
    point_bias: Vec3,
    axis_world: Vec3,
    angular_mass: Mat3,
    angular_bias: Vec3,
    beta_over_dt: f64,
}

const JOINT_BETA: f64 = 0.2;

impl JointConstraint {
    /// Resolves geometry against the current solver bodies. Returns None
    /// when the 3x3 blocks are singular (two static bodies, degenerate
    /// inertia), in which case the joint is skipped for this sub-step.
    pub fn prepare(
        joint_entity: Entity,
        mut joint: Joint,
        a: usize,
        b: usize,
        bodies: &[SolverBody],
        dt: f64,
    ) -> Option<Self> {
        let body_a = &bodies[a];
        let body_b = &bodies[b];
        let beta_over_dt = if dt > EPSILON { JOINT_BETA / dt } else { 0.0 };

        if joint.reference.is_none() {
            joint.reference = Some(body_a.rotation.invert() * body_b.rotation);
        }

        let ra = body_a.rotation.rotate_vector(joint.local_anchor_a);
        let rb = body_b.rotation.rotate_vector(joint.local_anchor_b);

        // Shared 3x3 point-mass block:
        // K = (ma + mb) I - S(ra) Ia S(ra) - S(rb) Ib S(rb)
        let mass_sum = body_a.inv_mass + body_b.inv_mass;
        let sa = skew(ra);
        let sb = skew(rb);
        let k = Mat3::from_diagonal(Vec3::new(mass_sum, mass_sum, mass_sum))
            - sa * body_a.inv_inertia * sa
            - sb * body_b.inv_inertia * sb;
        let point_mass = k.invert()?;

        let c = (body_b.position + rb) - (body_a.position + ra);
        let point_bias = c * beta_over_dt;

        let axis_world = match joint.kind {
            JointKind::Hinge { axis, .. } | JointKind::Slider { axis, .. } => {
                body_a.rotation.rotate_vector(safe_normalize(axis))
            }
            // Distance warm-starts along the current anchor separation.
            JointKind::Distance { .. } => safe_normalize(c),
            _ => Vec3::unit_y(),
        };

        let angular_k = body_a.inv_inertia + body_b.inv_inertia;
        let angular_mass = angular_k.invert().unwrap_or_else(Mat3::zero);

        // Orientation error for the locked-rotation kinds, as the vector
        // part of the relative rotation away from the reference.
        let angular_bias = match (&joint.kind, joint.reference) {
            (JointKind::Fixed | JointKind::Slider { .. }, Some(reference)) => {
                let q_err = body_a.rotation.invert() * body_b.rotation * reference.invert();
                body_a.rotation.rotate_vector(q_err.v * 2.0) * beta_over_dt
            }
            _ => Vec3::zero(),
        };

        Some(Self {
            joint_entity,
            joint,
            a,
            b,
            ra,
            rb,
            point_mass,
            point_bias,
            axis_world,
            angular_mass,
            angular_bias,
            beta_over_dt,
        })
    }

    /// Applies last sub-step's impulses once before iterating.
    pub fn warm_start(&self, bodies: &mut [SolverBody]) {
        let (body_a, body_b) = split_pair(bodies, self.a, self.b);
        let linear = self.joint.impulse + self.axis_vector() * self.joint.axial_impulse;
        body_a.apply_impulse(-linear, self.ra);
        body_b.apply_impulse(linear, self.rb);
        body_a.angular_velocity -= body_a.inv_inertia * self.joint.angular_impulse;
        body_b.angular_velocity += body_b.inv_inertia * self.joint.angular_impulse;
    }

    fn axis_vector(&self) -> Vec3 {
        match self.joint.kind {
            JointKind::Distance { .. } | JointKind::Slider { .. } => self.axis_world,
            _ => Vec3::zero(),
        }
    }

    /// One velocity iteration.
    pub fn solve(&mut self, bodies: &mut [SolverBody], dt: f64) {
        match self.joint.kind.clone() {
            JointKind::BallSocket => self.solve_point(bodies),
            JointKind::Fixed => {
                self.solve_angular_lock(bodies);
                self.solve_point(bodies);
            }
            JointKind::Hinge { axis: _, limits } => {
                self.solve_hinge_angular(bodies);
                self.solve_point(bodies);
                if let Some((lo, hi)) = limits {
                    self.solve_hinge_limit(bodies, lo, hi, dt);
                }
            }
            JointKind::Slider { axis: _, limits } => {
                self.solve_angular_lock(bodies);
                self.solve_slider_translation(bodies);
                if let Some((lo, hi)) = limits {
                    self.solve_slider_limit(bodies, lo, hi);
                }
            }
            JointKind::Distance { target } => self.solve_distance(bodies, target),
        }
    }

    /// 3x3 point constraint shared by ball-socket, fixed and hinge.
    fn solve_point(&mut self, bodies: &mut [SolverBody]) {
        let (body_a, body_b) = split_pair(bodies, self.a, self.b);
        let rel = body_b.velocity_at(self.rb) - body_a.velocity_at(self.ra);
        let impulse = self.point_mass * -(rel + self.point_bias);
        self.joint.impulse += impulse;
        body_a.apply_impulse(-impulse, self.ra);
        body_b.apply_impulse(impulse, self.rb);
    }

    /// Locks all relative rotation (fixed, slider).
    fn solve_angular_lock(&mut self, bodies: &mut [SolverBody]) {
        let (body_a, body_b) = split_pair(bodies, self.a, self.b);
        let rel = body_b.angular_velocity - body_a.angular_velocity;
        let impulse = self.angular_mass * -(rel + self.angular_bias);
        self.joint.angular_impulse += impulse;
        body_a.angular_velocity -= body_a.inv_inertia * impulse;
        body_b.angular_velocity += body_b.inv_inertia * impulse;
    }

    /// Constrains the two angular degrees of freedom perpendicular to the
    /// hinge axis.
    fn solve_hinge_angular(&mut self, bodies: &mut [SolverBody]) {
        let (b1, b2) = tangent_basis(self.axis_world);
        let (body_a, body_b) = split_pair(bodies, self.a, self.b);
        let rel = body_b.angular_velocity - body_a.angular_velocity;
        for dir in [b1, b2] {
            let k = dir.dot((body_a.inv_inertia + body_b.inv_inertia) * dir);
            if k < EPSILON {
                continue;
            }
            let lambda = -rel.dot(dir) / k;
            let impulse = dir * lambda;
            self.joint.angular_impulse += impulse;
            body_a.angular_velocity -= body_a.inv_inertia * impulse;
            body_b.angular_velocity += body_b.inv_inertia * impulse;
        }
    }

    fn hinge_angle(&self, bodies: &[SolverBody]) -> f64 {
        let body_a = &bodies[self.a];
        let body_b = &bodies[self.b];
        let reference = match self.joint.reference {
            Some(q) => q,
            None => return 0.0,
        };
        let relative = body_a.rotation.invert() * body_b.rotation * reference.invert();
        let axis_local = match self.joint.kind {
            JointKind::Hinge { axis, .. } => safe_normalize(axis),
            _ => return 0.0,
        };
        2.0 * relative.v.dot(axis_local).atan2(relative.s)
    }

    fn solve_hinge_limit(&mut self, bodies: &mut [SolverBody], lo: f64, hi: f64, dt: f64) {
        let angle = self.hinge_angle(bodies);
        let (violation, side) = if angle < lo {
            (lo - angle, 1.0)
        } else if angle > hi {
            (angle - hi, -1.0)
        } else {
            self.joint.limit_impulse = 0.0;
            return;
        };
        let (body_a, body_b) = split_pair(bodies, self.a, self.b);
        let axis = self.axis_world;
        let k = axis.dot((body_a.inv_inertia + body_b.inv_inertia) * axis);
        if k < EPSILON {
            return;
        }
        let rel = (body_b.angular_velocity - body_a.angular_velocity).dot(axis);
        let bias = if dt > EPSILON { JOINT_BETA / dt * violation } else { 0.0 };
        let lambda = (-rel * side + bias) / k;
        // One-sided: the accumulated limit impulse only pushes back into
        // the allowed range.
        let old = self.joint.limit_impulse;
        self.joint.limit_impulse = (old + lambda).max(0.0);
        let applied = (self.joint.limit_impulse - old) * side;
        let impulse = axis * applied;
        body_a.angular_velocity -= body_a.inv_inertia * impulse;
        body_b.angular_velocity += body_b.inv_inertia * impulse;
    }

    /// Scalar rows along the two directions perpendicular to the slide
    /// axis, anchoring the translation to the axis line.
    fn solve_slider_translation(&mut self, bodies: &mut [SolverBody]) {
        let (p1, p2) = tangent_basis(self.axis_world);
        let (body_a, body_b) = split_pair(bodies, self.a, self.b);
        for dir in [p1, p2] {
            let term_a = (body_a.inv_inertia * self.ra.cross(dir)).cross(self.ra);
            let term_b = (body_b.inv_inertia * self.rb.cross(dir)).cross(self.rb);
            let k = body_a.inv_mass + body_b.inv_mass + dir.dot(term_a + term_b);
            if k < EPSILON {
                continue;
            }
            let rel = body_b.velocity_at(self.rb) - body_a.velocity_at(self.ra);
            let bias = self.point_bias.dot(dir);
            let lambda = -(rel.dot(dir) + bias) / k;
            let impulse = dir * lambda;
            self.joint.impulse += impulse;
            body_a.apply_impulse(-impulse, self.ra);
            body_b.apply_impulse(impulse, self.rb);
        }
    }

    fn solve_slider_limit(&mut self, bodies: &mut [SolverBody], lo: f64, hi: f64) {
        let (travel, axis) = {
            let body_a = &bodies[self.a];
            let body_b = &bodies[self.b];
            let d = (body_b.position + self.rb) - (body_a.position + self.ra);
            (d.dot(self.axis_world), self.axis_world)
        };
        let (violation, side) = if travel < lo {
            (lo - travel, 1.0)
        } else if travel > hi {
            (travel - hi, -1.0)
        } else {
            self.joint.axial_impulse = 0.0;
            return;
        };
        let (body_a, body_b) = split_pair(bodies, self.a, self.b);
        let term_a = (body_a.inv_inertia * self.ra.cross(axis)).cross(self.ra);
        let term_b = (body_b.inv_inertia * self.rb.cross(axis)).cross(self.rb);
        let k = body_a.inv_mass + body_b.inv_mass + axis.dot(term_a + term_b);
        if k < EPSILON {
            return;
        }
        let rel = (body_b.velocity_at(self.rb) - body_a.velocity_at(self.ra)).dot(axis);
        let lambda = (-rel * side + self.beta_over_dt * violation) / k;
        let old = self.joint.axial_impulse;
        self.joint.axial_impulse = (old + lambda).max(0.0);
        let applied = (self.joint.axial_impulse - old) * side;
        let impulse = axis * applied;
        body_a.apply_impulse(-impulse, self.ra);
        body_b.apply_impulse(impulse, self.rb);
    }

    /// Scalar distance row between the anchors.
    fn solve_distance(&mut self, bodies: &mut [SolverBody], target: f64) {
        let (u, error) = {
            let body_a = &bodies[self.a];
            let body_b = &bodies[self.b];
            let d = (body_b.position + self.rb) - (body_a.position + self.ra);
            let len = d.magnitude();
            if len < EPSILON {
                return;
            }
            (d / len, len - target)
        };
        let (body_a, body_b) = split_pair(bodies, self.a, self.b);
        let term_a = (body_a.inv_inertia * self.ra.cross(u)).cross(self.ra);
        let term_b = (body_b.inv_inertia * self.rb.cross(u)).cross(self.rb);
        let k = body_a.inv_mass + body_b.inv_mass + u.dot(term_a + term_b);
        if k < EPSILON {
            return;
        }
        let rel = (body_b.velocity_at(self.rb) - body_a.velocity_at(self.ra)).dot(u);
        let lambda = -(rel + self.beta_over_dt * error) / k;
        self.joint.axial_impulse += lambda;
        // Re-derive the stored world axis so warm starting uses the
        // direction the impulse was actually applied along.
        self.axis_world = u;
        let impulse = u * lambda;
        body_a.apply_impulse(-impulse, self.ra);
        body_b.apply_impulse(impulse, self.rb);
    }
}
