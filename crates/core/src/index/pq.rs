//! Standalone product quantization index.
//!
//! Every live slot is kept as `m` code bytes. Search scans all codes with an
//! asymmetric lookup table, keeps a shortlist and reranks it exactly.

use crate::config;
use crate::distance::{cmp_hits, DistanceMetric};
use crate::error::{Result, VectorDbError};
use crate::quantization::{AdcMode, PqCodebook};
use crate::search::exact::TopK;
use crate::storage::VectorStore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PqConfig {
    pub m: usize,
    pub nbits: u8,
    pub train_iters: usize,
}

impl Default for PqConfig {
    fn default() -> Self {
        Self {
            m: config::PQ_DEFAULT_M,
            nbits: config::PQ_DEFAULT_NBITS,
            train_iters: config::DEFAULT_TRAIN_ITERS,
        }
    }
}

impl PqConfig {
    pub fn validate(&self, dimension: usize) -> Result<()> {
        if self.m == 0 || dimension % self.m != 0 {
            return Err(VectorDbError::InvalidConfig(format!(
                "PQ m={} must divide dimension {dimension}",
                self.m
            )));
        }
        if !(1..=8).contains(&self.nbits) {
            return Err(VectorDbError::InvalidConfig(format!(
                "PQ nbits={} must be in 1..=8",
                self.nbits
            )));
        }
        if self.train_iters == 0 {
            return Err(VectorDbError::InvalidConfig("PQ train_iters must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PqIndex {
    pub config: PqConfig,
    dimension: usize,
    codebook: Option<PqCodebook>,
    codes: Vec<u8>,
    /// Slots currently holding a valid code.
    encoded: Vec<bool>,
}

impl PqIndex {
    pub fn new(dimension: usize, config: PqConfig) -> Self {
        Self {
            config,
            dimension,
            codebook: None,
            codes: Vec::new(),
            encoded: Vec::new(),
        }
    }

    pub fn is_trained(&self) -> bool {
        self.codebook.is_some()
    }

    pub fn train(&mut self, data: &[f32]) -> Result<()> {
        let count = data.len() / self.dimension.max(1);
        let needed = 1usize << self.config.nbits;
        if count < needed {
            return Err(VectorDbError::InvalidTrainingData(format!(
                "PQ needs at least 2^nbits = {needed} training vectors (got {count})"
            )));
        }
        let codebook = PqCodebook::train(
            data,
            self.dimension,
            self.config.m,
            self.config.nbits,
            self.config.train_iters,
        )?;
        self.codebook = Some(codebook);
        self.codes.clear();
        self.encoded.clear();
        tracing::debug!(m = self.config.m, nbits = self.config.nbits, count, "PQ trained");
        Ok(())
    }

    pub fn reassign_all(&mut self, store: &VectorStore) {
        self.codes = vec![0; store.len() * self.config.m];
        self.encoded = vec![false; store.len()];
        for slot in store.live_slots() {
            self.insert(store, slot);
        }
    }

    pub fn insert(&mut self, store: &VectorStore, slot: u32) {
        let Some(codebook) = self.codebook.as_ref() else {
            return;
        };
        let code = codebook.encode(store.vector(slot));
        let (s, m) = (slot as usize, self.config.m);
        if self.encoded.len() <= s {
            self.encoded.resize(s + 1, false);
            self.codes.resize((s + 1) * m, 0);
        }
        self.codes[s * m..(s + 1) * m].copy_from_slice(&code);
        self.encoded[s] = true;
    }

    pub fn remove(&mut self, slot: u32) {
        if let Some(e) = self.encoded.get_mut(slot as usize) {
            *e = false;
        }
    }

    pub fn update(&mut self, store: &VectorStore, slot: u32) {
        self.insert(store, slot);
    }

    fn shortlist<A>(&self, query: &[f32], metric: DistanceMetric, size: usize, accept: &A) -> Vec<(f32, u32)>
    where
        A: Fn(u32) -> bool,
    {
        let Some(codebook) = self.codebook.as_ref() else {
            return Vec::new();
        };
        let mode = match metric {
            DistanceMetric::DotProduct | DistanceMetric::Cosine => AdcMode::InnerProduct,
            _ => AdcMode::L2,
        };
        let table = codebook.build_distance_table(query, mode);
        let m = self.config.m;
        let mut top = TopK::new(size);
        for (slot, _) in self.encoded.iter().enumerate().filter(|(_, &e)| e) {
            let slot = slot as u32;
            if accept(slot) {
                let s = slot as usize;
                top.push(table.distance(&self.codes[s * m..(s + 1) * m]), slot);
            }
        }
        top.into_sorted()
    }

    pub fn search<A>(
        &self,
        store: &VectorStore,
        query: &[f32],
        metric: DistanceMetric,
        k: usize,
        rerank_top: Option<usize>,
        accept: &A,
    ) -> Vec<(f32, u32)>
    where
        A: Fn(u32) -> bool,
    {
        if k == 0 {
            return Vec::new();
        }
        let size = k.max(rerank_top.unwrap_or(config::PQ_DEFAULT_RERANK));
        let mut hits: Vec<(f32, u32)> = self
            .shortlist(query, metric, size, accept)
            .into_iter()
            .map(|(_, slot)| (store.distance(metric, query, slot), slot))
            .collect();
        hits.sort_unstable_by(cmp_hits);
        hits.truncate(k);
        hits
    }

    /// Range search scores every encoded slot exactly; codes only pick the order of work.
    pub fn range_search<A>(
        &self,
        store: &VectorStore,
        query: &[f32],
        metric: DistanceMetric,
        radius: f32,
        max_results: usize,
        accept: &A,
    ) -> Vec<(f32, u32)>
    where
        A: Fn(u32) -> bool,
    {
        let mut hits: Vec<(f32, u32)> = self
            .encoded
            .iter()
            .enumerate()
            .filter(|(s, &e)| e && accept(*s as u32))
            .map(|(s, _)| (store.distance(metric, query, s as u32), s as u32))
            .filter(|&(d, _)| d <= radius)
            .collect();
        hits.sort_unstable_by(cmp_hits);
        hits.truncate(max_results);
        hits
    }

    pub fn heap_bytes(&self) -> usize {
        self.codebook.as_ref().map_or(0, PqCodebook::heap_bytes) + self.codes.capacity() + self.encoded.capacity()
    }

    pub fn validate(&self, slots: usize) -> std::result::Result<(), String> {
        if self.encoded.len() > slots || self.codes.len() != self.encoded.len() * self.config.m {
            return Err("PQ code arena does not match slot count".into());
        }
        if let Some(cb) = &self.codebook {
            if cb.dimension() != self.dimension {
                return Err("PQ codebook dimension mismatch".into());
            }
        }
        Ok(())
    }
}
