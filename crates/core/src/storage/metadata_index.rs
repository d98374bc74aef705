//! Inverted metadata index: `key -> value -> slots`.
//!
//! Maintained on every mutation so equality filters can narrow the candidate set
//! before any distance is computed.

use crate::search::filter::{CompareOp, Filter, Literal};
use crate::storage::VectorStore;
use crate::vector::Metadata;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataIndex {
    postings: HashMap<String, HashMap<String, BTreeSet<u32>>>,
}

impl MetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes every live slot of `store`.
    pub fn build(store: &VectorStore) -> Self {
        let mut index = Self::new();
        for slot in store.live_slots() {
            index.add(slot, store.metadata(slot));
        }
        index
    }

    pub fn add(&mut self, slot: u32, metadata: &Metadata) {
        for (k, v) in metadata.iter() {
            self.postings
                .entry(k.to_string())
                .or_default()
                .entry(v.to_string())
                .or_default()
                .insert(slot);
        }
    }

    pub fn remove(&mut self, slot: u32, metadata: &Metadata) {
        for (k, v) in metadata.iter() {
            let Some(values) = self.postings.get_mut(k) else {
                continue;
            };
            if let Some(slots) = values.get_mut(v) {
                slots.remove(&slot);
                if slots.is_empty() {
                    values.remove(v);
                }
            }
            if values.is_empty() {
                self.postings.remove(k);
            }
        }
    }

    pub fn update(&mut self, slot: u32, old: &Metadata, new: &Metadata) {
        self.remove(slot, old);
        self.add(slot, new);
    }

    /// Slots whose `key` equals `value`, ascending.
    pub fn query(&self, key: &str, value: &str) -> Vec<u32> {
        self.slots(key, value)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn count(&self, key: &str, value: &str) -> usize {
        self.slots(key, value).map_or(0, BTreeSet::len)
    }

    fn slots(&self, key: &str, value: &str) -> Option<&BTreeSet<u32>> {
        self.postings.get(key)?.get(value)
    }

    /// A superset of the slots matching `filter`, if the index can bound it.
    ///
    /// String equalities resolve through the postings; conjunctions intersect,
    /// disjunctions union. Anything else is unbounded (`None`).
    pub fn candidates(&self, filter: &Filter) -> Option<BTreeSet<u32>> {
        match filter {
            Filter::Compare {
                key,
                op: CompareOp::Eq,
                value: Literal::Text(value),
            } => Some(self.slots(key, value).cloned().unwrap_or_default()),
            Filter::And(l, r) => match (self.candidates(l), self.candidates(r)) {
                (Some(a), Some(b)) => Some(a.intersection(&b).copied().collect()),
                (Some(a), None) | (None, Some(a)) => Some(a),
                (None, None) => None,
            },
            Filter::Or(l, r) => {
                let mut a = self.candidates(l)?;
                a.extend(self.candidates(r)?);
                Some(a)
            }
            _ => None,
        }
    }

    /// Number of distinct keys.
    pub fn key_count(&self) -> usize {
        self.postings.len()
    }

    pub fn heap_bytes(&self) -> usize {
        self.postings
            .iter()
            .map(|(k, values)| {
                k.capacity()
                    + 48
                    + values
                        .iter()
                        .map(|(v, slots)| v.capacity() + 48 + slots.len() * 16)
                        .sum::<usize>()
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexed() -> MetadataIndex {
        let mut idx = MetadataIndex::new();
        idx.add(0, &Metadata::from_pairs([("color", "red"), ("size", "s")]));
        idx.add(1, &Metadata::from_pairs([("color", "blue"), ("size", "s")]));
        idx.add(2, &Metadata::from_pairs([("color", "red"), ("size", "l")]));
        idx
    }

    #[test]
    fn test_query_and_count() {
        let idx = indexed();
        assert_eq!(idx.query("color", "red"), vec![0, 2]);
        assert_eq!(idx.count("size", "s"), 2);
        assert!(idx.query("color", "green").is_empty());
    }

    #[test]
    fn test_update_moves_slot() {
        let mut idx = indexed();
        idx.update(
            1,
            &Metadata::from_pairs([("color", "blue"), ("size", "s")]),
            &Metadata::from_pairs([("color", "red"), ("size", "s")]),
        );
        assert_eq!(idx.query("color", "red"), vec![0, 1, 2]);
        assert_eq!(idx.count("color", "blue"), 0);
    }

    #[test]
    fn test_candidates_for_filters() {
        let idx = indexed();
        let f = Filter::eq("color", "red").and(Filter::eq("size", "s"));
        assert_eq!(idx.candidates(&f).unwrap().into_iter().collect::<Vec<_>>(), vec![0]);
        let f = Filter::eq("color", "blue").or(Filter::eq("size", "l"));
        assert_eq!(idx.candidates(&f).unwrap().len(), 2);
        let f = Filter::parse("score > 3").unwrap();
        assert!(idx.candidates(&f).is_none());
        let f = Filter::parse("color == 'red' AND score > 3").unwrap();
        assert_eq!(idx.candidates(&f).unwrap().len(), 2);
    }

    #[test]
    fn test_remove_cleans_empty_keys() {
        let mut idx = MetadataIndex::new();
        let m = Metadata::from_pairs([("k", "v")]);
        idx.add(5, &m);
        idx.remove(5, &m);
        assert_eq!(idx.key_count(), 0);
    }
}
