use cgmath::{InnerSpace, Zero};
use smallvec::SmallVec;

use crate::ecs::Entity;
use crate::math::Vec3;

/// Canonical unordered pair key: the smaller entity id always comes first,
/// so (a, b) and (b, a) collapse to one cache slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey(pub Entity, pub Entity);

impl PairKey {
    pub fn new(a: Entity, b: Entity) -> Self {
        if a <= b {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }
}

/// One contact point for a single sub-step. Accumulated impulses survive
/// across sub-steps through the manifold cache (warm starting); everything
/// else is recomputed in the solver pre-step.
#[derive(Clone, Copy, Debug)]
pub struct ContactPoint {
    pub position: Vec3,
    pub penetration: f64,
    pub normal_impulse: f64,
    pub tangent_impulse: [f64; 2],
    pub normal_mass: f64,
    pub tangent_mass: [f64; 2],
    pub bias: f64,
    /// Lever arms from each body's center, filled in the pre-step.
    pub ra: Vec3,
    pub rb: Vec3,
}

impl ContactPoint {
    pub fn new(position: Vec3, penetration: f64) -> Self {
        Self {
            position,
            penetration: penetration.max(0.0),
            normal_impulse: 0.0,
            tangent_impulse: [0.0; 2],
            normal_mass: 0.0,
            tangent_mass: [0.0; 2],
            bias: 0.0,
            ra: Vec3::zero(),
            rb: Vec3::zero(),
        }
    }
}

/// Contact set for one collider pair. The normal points from A towards B.
#[derive(Clone, Debug)]
pub struct ContactManifold {
    pub entity_a: Entity,
    pub entity_b: Entity,
    pub normal: Vec3,
    pub friction: f64,
    pub restitution: f64,
    pub points: SmallVec<[ContactPoint; 4]>,
}

impl ContactManifold {
    pub fn new(entity_a: Entity, entity_b: Entity, normal: Vec3) -> Self {
        Self {
            entity_a,
            entity_b,
            normal,
            friction: 0.0,
            restitution: 0.0,
            points: SmallVec::new(),
        }
    }

    pub fn key(&self) -> PairKey {
        PairKey::new(self.entity_a, self.entity_b)
    }

    pub fn push(&mut self, point: ContactPoint) {
        self.points.push(point);
    }

    /// Copies accumulated impulses from last sub-step's manifold for points
    /// that are still recognizably the same contact (within the breaking
    /// distance).
    pub fn warm_start_from(&mut self, previous: &ContactManifold, breaking_distance: f64) {
        let break2 = breaking_distance * breaking_distance;
        for point in &mut self.points {
            let mut best: Option<(&ContactPoint, f64)> = None;
            for old in &previous.points {
                let d2 = (old.position - point.position).magnitude2();
                if d2 < break2 && best.map_or(true, |(_, bd)| d2 < bd) {
                    best = Some((old, d2));
                }
            }
            if let Some((old, _)) = best {
                point.normal_impulse = old.normal_impulse;
                point.tangent_impulse = old.tangent_impulse;
            }
        }
    }

    /// Reduces the point set to at most four, keeping the selection that
    /// spans the largest contact area:
    ///   1. deepest penetration,
    ///   2. farthest from (1),
    ///   3. maximizing triangle area with (1)-(2),
    ///   4. farthest from the (1,2,3) plane.
    pub fn reduce(&mut self) {
        if self.points.len() <= 4 {
            return;
        }
        let points = std::mem::take(&mut self.points);

        let deepest = points
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.penetration.total_cmp(&b.penetration))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let p0 = points[deepest].position;

        let farthest = points
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                (a.position - p0)
                    .magnitude2()
                    .total_cmp(&(b.position - p0).magnitude2())
            })
            .map(|(i, _)| i)
            .unwrap_or(deepest);
        let p1 = points[farthest].position;

        let max_area = points
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                let area_a = (a.position - p0).cross(a.position - p1).magnitude2();
                let area_b = (b.position - p0).cross(b.position - p1).magnitude2();
                area_a.total_cmp(&area_b)
            })
            .map(|(i, _)| i)
            .unwrap_or(deepest);
        let p2 = points[max_area].position;

        let plane_normal = (p1 - p0).cross(p2 - p0);
        let off_plane = points
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                let da = (a.position - p0).dot(plane_normal).abs();
                let db = (b.position - p0).dot(plane_normal).abs();
                da.total_cmp(&db)
            })
            .map(|(i, _)| i)
            .unwrap_or(deepest);

        let mut keep = [deepest, farthest, max_area, off_plane];
        keep.sort_unstable();
        let mut reduced = SmallVec::new();
        let mut last = usize::MAX;
        for idx in keep {
            if idx != last {
                reduced.push(points[idx]);
            }
            last = idx;
        }
        self.points = reduced;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_manifold(positions: &[(f64, f64)]) -> ContactManifold {
        let mut m = ContactManifold::new(Entity(1), Entity(2), Vec3::unit_y());
        for &(x, z) in positions {
            m.push(ContactPoint::new(Vec3::new(x, 0.0, z), 0.01));
        }
        m
    }

    #[test]
    fn pair_key_is_canonical() {
        assert_eq!(
            PairKey::new(Entity(9), Entity(3)),
            PairKey::new(Entity(3), Entity(9))
        );
        let k = PairKey::new(Entity(9), Entity(3));
        assert!(k.0 <= k.1);
    }

    #[test]
    fn reduction_caps_at_four_and_keeps_extremes() {
        let mut m = flat_manifold(&[
            (0.0, 0.0),
            (1.0, 0.0),
            (1.0, 1.0),
            (0.0, 1.0),
            (0.5, 0.5),
            (0.4, 0.6),
        ]);
        m.points[2].penetration = 0.05; // deepest corner must survive
        m.reduce();
        assert!(m.points.len() <= 4);
        assert!(m
            .points
            .iter()
            .any(|p| (p.position - Vec3::new(1.0, 0.0, 1.0)).magnitude2() < 1e-12));
    }

    #[test]
    fn warm_start_copies_impulses_within_breaking_distance() {
        let mut old = flat_manifold(&[(0.0, 0.0)]);
        old.points[0].normal_impulse = 3.0;
        old.points[0].tangent_impulse = [0.5, -0.25];

        let mut new = flat_manifold(&[(0.005, 0.0), (5.0, 0.0)]);
        new.warm_start_from(&old, 0.02);
        assert_eq!(new.points[0].normal_impulse, 3.0);
        assert_eq!(new.points[0].tangent_impulse, [0.5, -0.25]);
        assert_eq!(new.points[1].normal_impulse, 0.0);
    }
}
