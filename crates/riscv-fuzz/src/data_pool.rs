//! The Data Pool: the backing random data for the program's data sections,
//! keyed by a seed id the corpus and the SI reference.

use indexmap::IndexMap;
use libafl_bolts::rands::Rand;
use serde::{Deserialize, Serialize};

pub type SeedId = u64;

/// Bounded, oldest-first-evicting map from seed id to its 64-bit data
/// vector. `IndexMap` keeps insertion order so eviction is just "remove the
/// front entry" without a separate queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPool {
    entries: IndexMap<SeedId, Vec<u64>>,
    max_data_seeds: usize,
    next_id: SeedId,
    entry_len: usize,
}

impl DataPool {
    pub fn new(max_data_seeds: usize, entry_len: usize) -> Self {
        Self { entries: IndexMap::new(), max_data_seeds, next_id: 0, entry_len }
    }

    /// Generates a fresh random 64-bit sequence, stores it, and returns its
    /// id, evicting the oldest entry if the pool is already at capacity.
    pub fn add_data<R: Rand>(&mut self, rand: &mut R) -> SeedId {
        if self.entries.len() >= self.max_data_seeds {
            self.entries.shift_remove_index(0);
        }
        let data: Vec<u64> = (0..self.entry_len).map(|_| rand.next()).collect();
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, data);
        id
    }

    pub fn get(&self, id: SeedId) -> Option<&[u64]> {
        self.entries.get(&id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use libafl_bolts::rands::StdRand;

    use super::*;

    #[test]
    fn add_data_beyond_capacity_evicts_oldest() {
        let mut rand = StdRand::with_seed(42);
        let mut pool = DataPool::new(2, 4);
        let first = pool.add_data(&mut rand);
        let _second = pool.add_data(&mut rand);
        assert!(pool.get(first).is_some());
        let _third = pool.add_data(&mut rand);
        assert!(pool.get(first).is_none(), "oldest entry should have been evicted");
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn entries_have_the_configured_length() {
        let mut rand = StdRand::with_seed(1);
        let mut pool = DataPool::new(4, 8);
        let id = pool.add_data(&mut rand);
        assert_eq!(pool.get(id).unwrap().len(), 8);
    }
}
