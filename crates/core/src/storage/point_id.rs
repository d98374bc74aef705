//! Stable string IDs for records.
//!
//! Slots are renumbered by compaction; a [`PointIdMap`] gives callers a name that
//! survives it. The database keeps the map in step with deletes and remaps it
//! after every compaction.

use crate::error::{Result, VectorDbError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointIdMap {
    forward: HashMap<String, u32>,
    reverse: HashMap<u32, String>,
}

impl PointIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `id` to `slot`, replacing any previous mapping of either side.
    pub fn set(&mut self, id: &str, slot: u32) -> Result<()> {
        if id.is_empty() {
            return Err(VectorDbError::InvalidArgument("point id must be non-empty".into()));
        }
        if let Some(old_slot) = self.forward.remove(id) {
            self.reverse.remove(&old_slot);
        }
        if let Some(old_id) = self.reverse.remove(&slot) {
            self.forward.remove(&old_id);
        }
        self.forward.insert(id.to_string(), slot);
        self.reverse.insert(slot, id.to_string());
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<u32> {
        self.forward.get(id).copied()
    }

    pub fn has(&self, id: &str) -> bool {
        self.forward.contains_key(id)
    }

    /// Removes `id`. Returns the slot it named.
    pub fn remove(&mut self, id: &str) -> Option<u32> {
        let slot = self.forward.remove(id)?;
        self.reverse.remove(&slot);
        Some(slot)
    }

    /// Removes whatever id names `slot`.
    pub fn remove_slot(&mut self, slot: u32) -> Option<String> {
        let id = self.reverse.remove(&slot)?;
        self.forward.remove(&id);
        Some(id)
    }

    pub fn reverse_lookup(&self, slot: u32) -> Option<&str> {
        self.reverse.get(&slot).map(String::as_str)
    }

    /// A fresh random (v4) UUID string.
    pub fn generate_uuid() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// `(id, slot)` pairs in ascending slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        let mut pairs: Vec<(&str, u32)> = self.reverse.iter().map(|(&s, id)| (id.as_str(), s)).collect();
        pairs.sort_unstable_by_key(|&(_, s)| s);
        pairs.into_iter()
    }

    /// Applies a compaction remap; ids of dropped slots disappear.
    pub fn remap(&mut self, remap: &[Option<u32>]) {
        let old = std::mem::take(&mut self.reverse);
        self.forward.clear();
        for (slot, id) in old {
            if let Some(Some(new_slot)) = remap.get(slot as usize) {
                self.forward.insert(id.clone(), *new_slot);
                self.reverse.insert(*new_slot, id);
            }
        }
    }

    /// Writes the map as JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let pairs: Vec<(&str, u32)> = self.iter().collect();
        let json = serde_json::to_vec_pretty(&pairs)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let pairs: Vec<(String, u32)> = serde_json::from_slice(&bytes)?;
        let mut map = Self::new();
        for (id, slot) in pairs {
            map.set(&id, slot)?;
        }
        Ok(map)
    }

    pub fn heap_bytes(&self) -> usize {
        self.forward.keys().map(|k| 2 * (k.capacity() + 32)).sum()
    }
}
