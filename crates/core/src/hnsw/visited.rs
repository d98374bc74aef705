//! Generation-stamped visited set for graph traversal.
//!
//! `reset()` bumps a generation counter instead of zeroing the array, so a
//! traversal costs O(nodes touched) rather than O(graph size).

#[derive(Debug)]
pub struct VisitedSet {
    stamps: Vec<u16>,
    generation: u16,
}

impl VisitedSet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            stamps: vec![0u16; capacity],
            generation: 1,
        }
    }

    /// Grows to cover `capacity` ids and forgets every previous visit.
    /// The stamp array is zeroed only when the generation wraps.
    pub fn reset(&mut self, capacity: usize) {
        if capacity > self.stamps.len() {
            self.stamps.resize(capacity, 0);
        }
        if self.generation == u16::MAX {
            self.stamps.fill(0);
            self.generation = 1;
        } else {
            self.generation += 1;
        }
    }

    /// Marks `id`. Returns `true` on the first visit in this generation.
    #[inline]
    pub fn insert(&mut self, id: u32) -> bool {
        let stamp = &mut self.stamps[id as usize];
        if *stamp == self.generation {
            false
        } else {
            *stamp = self.generation;
            true
        }
    }

    #[inline]
    pub fn contains(&self, id: u32) -> bool {
        self.stamps.get(id as usize) == Some(&self.generation)
    }
}

impl Default for VisitedSet {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}
