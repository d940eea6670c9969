pub mod world;

pub use world::{CommandQueue, World, WorldCommand};

use rustc_hash::FxHashMap;

/// Opaque entity identifier. Ids are handed out by a monotonic per-world
/// counter and never reused within a run, so stale ids simply fail lookups
/// instead of aliasing a new entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity(pub(crate) u64);

impl Entity {
    pub fn id(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

/// Tagged-array store for one component kind.
///
/// Components live in a dense vector in insertion order; a side map resolves
/// entity -> slot. Iteration order is the insertion order, which keeps
/// snapshots (and therefore solver input order) reproducible from run to run.
pub struct ComponentStore<T> {
    entries: Vec<(Entity, T)>,
    index: FxHashMap<Entity, usize>,
}

impl<T> Default for ComponentStore<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: FxHashMap::default(),
        }
    }
}

impl<T> ComponentStore<T> {
    pub fn insert(&mut self, entity: Entity, component: T) -> Option<T> {
        match self.index.get(&entity) {
            Some(&slot) => {
                let old = std::mem::replace(&mut self.entries[slot].1, component);
                Some(old)
            }
            None => {
                self.index.insert(entity, self.entries.len());
                self.entries.push((entity, component));
                None
            }
        }
    }

    /// Ordered removal. Later slots shift down so iteration order stays
    /// insertion-stable; the index map is patched for the shifted tail.
    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        let slot = self.index.remove(&entity)?;
        let (_, component) = self.entries.remove(slot);
        for (e, _) in &self.entries[slot..] {
            if let Some(s) = self.index.get_mut(e) {
                *s -= 1;
            }
        }
        Some(component)
    }

    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.index.get(&entity).map(|&slot| &self.entries[slot].1)
    }

    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        match self.index.get(&entity) {
            Some(&slot) => Some(&mut self.entries[slot].1),
            None => None,
        }
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.index.contains_key(&entity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.entries.iter().map(|(e, c)| (*e, c))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Entity, &mut T)> {
        self.entries.iter_mut().map(|(e, c)| (*e, c))
    }

    /// Visitor-style iteration. Structural changes made while visiting must
    /// go through the world's deferred queue, not this store.
    pub fn for_each(&mut self, mut visit: impl FnMut(Entity, &mut T)) {
        for (entity, component) in &mut self.entries {
            visit(*entity, component);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_is_insertion_stable_across_removal() {
        let mut store = ComponentStore::default();
        let ids: Vec<Entity> = (1..=5).map(Entity).collect();
        for (i, &e) in ids.iter().enumerate() {
            store.insert(e, i as u32);
        }
        store.remove(ids[1]);
        let order: Vec<u64> = store.iter().map(|(e, _)| e.id()).collect();
        assert_eq!(order, vec![1, 3, 4, 5]);
        // The shifted tail still resolves through the index map.
        assert_eq!(store.get(ids[4]), Some(&4));
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut store = ComponentStore::default();
        store.insert(Entity(7), "a");
        let old = store.insert(Entity(7), "b");
        assert_eq!(old, Some("a"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(Entity(7)), Some(&"b"));
    }
}
