use rustc_hash::{FxHashMap, FxHashSet};

use crate::math::Aabb;

/// Uniform spatial hash over world-space AABBs.
///
/// Rebuilt from scratch every sub-step; there is no persistent tree to
/// maintain. Cells map to the list of proxy indices whose box touches them,
/// and the pair query re-checks actual AABB overlap to cull the cell-level
/// false positives.
pub struct SpatialHash {
    cell_size: f64,
    cells: FxHashMap<(i64, i64, i64), Vec<u32>>,
}

impl SpatialHash {
    pub fn new(cell_size: f64) -> Self {
        Self {
            cell_size: cell_size.max(1e-3),
            cells: FxHashMap::default(),
        }
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }

    fn cell_range(&self, aabb: &Aabb) -> ((i64, i64, i64), (i64, i64, i64)) {
        let inv = 1.0 / self.cell_size;
        let lo = (
            (aabb.min.x * inv).floor() as i64,
            (aabb.min.y * inv).floor() as i64,
            (aabb.min.z * inv).floor() as i64,
        );
        let hi = (
            (aabb.max.x * inv).floor() as i64,
            (aabb.max.y * inv).floor() as i64,
            (aabb.max.z * inv).floor() as i64,
        );
        (lo, hi)
    }

    pub fn insert(&mut self, index: u32, aabb: &Aabb) {
        let (lo, hi) = self.cell_range(aabb);
        for x in lo.0..=hi.0 {
            for y in lo.1..=hi.1 {
                for z in lo.2..=hi.2 {
                    self.cells.entry((x, y, z)).or_default().push(index);
                }
            }
        }
    }

    /// Unordered candidate pairs, deduplicated across cells and verified
    /// against the actual AABBs. Output is sorted so downstream phases see
    /// a deterministic order regardless of hash iteration.
    pub fn pairs(&self, aabbs: &[Aabb]) -> Vec<(u32, u32)> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        for indices in self.cells.values() {
            for (slot, &a) in indices.iter().enumerate() {
                for &b in &indices[slot + 1..] {
                    let key = if a < b { (a, b) } else { (b, a) };
                    if !seen.insert(key) {
                        continue;
                    }
                    if aabbs[key.0 as usize].overlaps(&aabbs[key.1 as usize]) {
                        out.push(key);
                    }
                }
            }
        }
        out.sort_unstable();
        out
    }

    /// Indices whose cells intersect `aabb`, overlap-verified. Used by the
    /// trigger pass and by ray/CCD pre-filters.
    pub fn query(&self, aabb: &Aabb, aabbs: &[Aabb]) -> Vec<u32> {
        let (lo, hi) = self.cell_range(aabb);
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        for x in lo.0..=hi.0 {
            for y in lo.1..=hi.1 {
                for z in lo.2..=hi.2 {
                    if let Some(indices) = self.cells.get(&(x, y, z)) {
                        for &i in indices {
                            if seen.insert(i) && aabbs[i as usize].overlaps(aabb) {
                                out.push(i);
                            }
                        }
                    }
                }
            }
        }
        out.sort_unstable();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;

    fn unit_box_at(x: f64) -> Aabb {
        Aabb::from_center_half_extents(Vec3::new(x, 0.0, 0.0), Vec3::new(0.5, 0.5, 0.5))
    }

    #[test]
    fn overlapping_boxes_pair_once() {
        let aabbs = vec![unit_box_at(0.0), unit_box_at(0.4), unit_box_at(10.0)];
        let mut hash = SpatialHash::new(2.0);
        for (i, aabb) in aabbs.iter().enumerate() {
            hash.insert(i as u32, aabb);
        }
        let pairs = hash.pairs(&aabbs);
        assert_eq!(pairs, vec![(0, 1)]);
    }

    #[test]
    fn boxes_spanning_many_cells_are_deduplicated() {
        let big = Aabb::from_center_half_extents(Vec3::new(0.0, 0.0, 0.0), Vec3::new(5.0, 5.0, 5.0));
        let aabbs = vec![big, unit_box_at(1.0)];
        let mut hash = SpatialHash::new(2.0);
        for (i, aabb) in aabbs.iter().enumerate() {
            hash.insert(i as u32, aabb);
        }
        assert_eq!(hash.pairs(&aabbs), vec![(0, 1)]);
    }

    #[test]
    fn query_returns_touching_indices() {
        let aabbs = vec![unit_box_at(0.0), unit_box_at(10.0)];
        let mut hash = SpatialHash::new(2.0);
        for (i, aabb) in aabbs.iter().enumerate() {
            hash.insert(i as u32, aabb);
        }
        let probe = Aabb::from_center_half_extents(Vec3::new(0.2, 0.0, 0.0), Vec3::new(0.5, 0.5, 0.5));
        assert_eq!(hash.query(&probe, &aabbs), vec![0]);
    }
}
