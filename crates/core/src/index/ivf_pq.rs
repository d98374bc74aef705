//! IVF-PQ: coarse k-means partitioning plus residual product quantization.
//!
//! Each vector is assigned to its nearest coarse centroid and the residual
//! (vector minus centroid) is PQ-encoded. A query probes `nprobe` lists, scores
//! codes with an asymmetric L2 lookup table built from the query residual, keeps
//! an oversampled candidate pool, then reranks the best candidates with exact
//! distances (or scalar-quantized reconstructions when enabled).

use crate::config;
use crate::distance::{cmp_hits, normalized, DistanceMetric};
use crate::error::{Result, VectorDbError};
use crate::index::ivf_flat::UNASSIGNED;
use crate::quantization::kmeans::{kmeans, nearest_centroid, nearest_centroids, SimpleRng, TRAIN_SEED};
use crate::quantization::{AdcMode, PqCodebook, ScalarQuantConfig, ScalarQuantizer};
use crate::search::exact::TopK;
use crate::storage::VectorStore;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IvfPqConfig {
    pub nlist: usize,
    /// Sub-quantizers; must divide the dimension.
    pub m: usize,
    /// Bits per code, 1..=8.
    pub nbits: u8,
    pub nprobe: usize,
    pub train_iters: usize,
    /// Candidates reranked with exact distances when the query gives no override (0 = off).
    pub default_rerank: usize,
    /// Normalize vectors and queries before coarse assignment and encoding.
    pub use_cosine: bool,
    /// Candidate pool multiplier over `k` (>= 1.0).
    pub oversampling_factor: f32,
    pub use_scalar_quant: bool,
    pub scalar_quant: ScalarQuantConfig,
}

impl Default for IvfPqConfig {
    fn default() -> Self {
        Self {
            nlist: config::IVF_DEFAULT_NLIST,
            m: config::PQ_DEFAULT_M,
            nbits: config::PQ_DEFAULT_NBITS,
            nprobe: config::IVF_DEFAULT_NPROBE,
            train_iters: config::DEFAULT_TRAIN_ITERS,
            default_rerank: config::IVFPQ_DEFAULT_RERANK,
            use_cosine: false,
            oversampling_factor: config::IVFPQ_DEFAULT_OVERSAMPLING,
            use_scalar_quant: false,
            scalar_quant: ScalarQuantConfig::default(),
        }
    }
}

impl IvfPqConfig {
    pub fn validate(&self, dimension: usize) -> Result<()> {
        if self.nlist == 0 || self.nprobe == 0 || self.train_iters == 0 {
            return Err(VectorDbError::InvalidConfig(
                "IVF-PQ nlist, nprobe and train_iters must be > 0".into(),
            ));
        }
        if self.nprobe > self.nlist {
            return Err(VectorDbError::InvalidConfig(format!(
                "IVF-PQ nprobe {} exceeds nlist {}",
                self.nprobe, self.nlist
            )));
        }
        if self.m == 0 || dimension % self.m != 0 {
            return Err(VectorDbError::InvalidConfig(format!(
                "IVF-PQ m={} must divide dimension {dimension}",
                self.m
            )));
        }
        if !(1..=8).contains(&self.nbits) {
            return Err(VectorDbError::InvalidConfig(format!(
                "IVF-PQ nbits={} must be in 1..=8",
                self.nbits
            )));
        }
        if !self.oversampling_factor.is_finite() || self.oversampling_factor < 1.0 {
            return Err(VectorDbError::InvalidConfig(format!(
                "IVF-PQ oversampling_factor must be >= 1.0 (got {})",
                self.oversampling_factor
            )));
        }
        if self.use_scalar_quant {
            self.scalar_quant.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvfPqIndex {
    pub config: IvfPqConfig,
    dimension: usize,
    coarse: Vec<f32>,
    codebook: Option<PqCodebook>,
    sq: Option<ScalarQuantizer>,
    lists: Vec<Vec<u32>>,
    assignment: Vec<u32>,
    /// `m` bytes per slot.
    codes: Vec<u8>,
    /// `sq.bytes_per_vector()` bytes per slot when scalar quantization is on.
    sq_codes: Vec<u8>,
}

impl IvfPqIndex {
    pub fn new(dimension: usize, config: IvfPqConfig) -> Self {
        Self {
            config,
            dimension,
            coarse: Vec::new(),
            codebook: None,
            sq: None,
            lists: Vec::new(),
            assignment: Vec::new(),
            codes: Vec::new(),
            sq_codes: Vec::new(),
        }
    }

    pub fn is_trained(&self) -> bool {
        self.codebook.is_some()
    }

    fn prepare<'a>(&self, v: &'a [f32]) -> Cow<'a, [f32]> {
        if self.config.use_cosine {
            Cow::Owned(normalized(v))
        } else {
            Cow::Borrowed(v)
        }
    }

    fn centroid(&self, list: usize) -> &[f32] {
        &self.coarse[list * self.dimension..(list + 1) * self.dimension]
    }

    /// Trains coarse centroids, the residual codebook and the optional scalar
    /// quantizer on `data` (`count × dimension`, flat).
    pub fn train(&mut self, data: &[f32]) -> Result<()> {
        let dim = self.dimension;
        let count = data.len() / dim;
        let codebook_size = 1usize << self.config.nbits;
        if count < self.config.nlist || count < codebook_size {
            return Err(VectorDbError::InvalidTrainingData(format!(
                "IVF-PQ needs at least max(nlist={}, 2^nbits={codebook_size}) training vectors (got {count})",
                self.config.nlist
            )));
        }
        let prepared: Vec<f32> = if self.config.use_cosine {
            data.chunks_exact(dim).flat_map(normalized).collect()
        } else {
            data.to_vec()
        };

        let mut rng = SimpleRng::new(TRAIN_SEED);
        let coarse = kmeans(&prepared, dim, self.config.nlist, self.config.train_iters, &mut rng);
        let mut residuals = Vec::with_capacity(prepared.len());
        for v in prepared.chunks_exact(dim) {
            let (list, _) = nearest_centroid(&coarse, dim, v);
            let c = &coarse[list * dim..(list + 1) * dim];
            residuals.extend(v.iter().zip(c).map(|(x, y)| x - y));
        }
        let codebook = PqCodebook::train(
            &residuals,
            dim,
            self.config.m,
            self.config.nbits,
            self.config.train_iters,
        )?;
        self.sq = if self.config.use_scalar_quant {
            Some(ScalarQuantizer::train(&prepared, dim, self.config.scalar_quant)?)
        } else {
            None
        };
        self.coarse = coarse;
        self.codebook = Some(codebook);
        self.lists = vec![Vec::new(); self.config.nlist];
        self.assignment.clear();
        self.codes.clear();
        self.sq_codes.clear();
        tracing::debug!(
            nlist = self.config.nlist,
            m = self.config.m,
            nbits = self.config.nbits,
            count,
            "IVF-PQ trained"
        );
        Ok(())
    }

    /// Encodes every live slot of `store` from scratch.
    pub fn reassign_all(&mut self, store: &VectorStore) {
        for list in &mut self.lists {
            list.clear();
        }
        self.assignment = vec![UNASSIGNED; store.len()];
        self.codes = vec![0; store.len() * self.config.m];
        self.sq_codes = vec![0; store.len() * self.sq_width()];
        for slot in store.live_slots() {
            self.insert(store, slot);
        }
    }

    fn sq_width(&self) -> usize {
        self.sq.as_ref().map_or(0, ScalarQuantizer::bytes_per_vector)
    }

    pub fn insert(&mut self, store: &VectorStore, slot: u32) {
        let Some(codebook) = self.codebook.as_ref() else {
            return;
        };
        let v = self.prepare(store.vector(slot)).into_owned();
        let (list, _) = nearest_centroid(&self.coarse, self.dimension, &v);
        let residual: Vec<f32> = v.iter().zip(self.centroid(list)).map(|(x, c)| x - c).collect();
        let code = codebook.encode(&residual);
        let sq_code = self.sq.as_ref().map(|sq| sq.encode(&v));

        let s = slot as usize;
        let m = self.config.m;
        if self.assignment.len() <= s {
            self.assignment.resize(s + 1, UNASSIGNED);
            self.codes.resize((s + 1) * m, 0);
            self.sq_codes.resize((s + 1) * self.sq_width(), 0);
        }
        self.codes[s * m..(s + 1) * m].copy_from_slice(&code);
        if let Some(sq_code) = sq_code {
            let w = sq_code.len();
            self.sq_codes[s * w..(s + 1) * w].copy_from_slice(&sq_code);
        }
        self.lists[list].push(slot);
        self.assignment[s] = list as u32;
    }

    pub fn remove(&mut self, slot: u32) {
        let Some(list) = self.assignment.get_mut(slot as usize) else {
            return;
        };
        if *list == UNASSIGNED {
            return;
        }
        let members = &mut self.lists[*list as usize];
        if let Some(pos) = members.iter().position(|&s| s == slot) {
            members.swap_remove(pos);
        }
        *list = UNASSIGNED;
    }

    pub fn update(&mut self, store: &VectorStore, slot: u32) {
        self.remove(slot);
        self.insert(store, slot);
    }

    #[inline]
    fn code(&self, slot: u32) -> &[u8] {
        let m = self.config.m;
        &self.codes[slot as usize * m..(slot as usize + 1) * m]
    }

    /// Refined distance for a candidate: scalar-quantized reconstruction when
    /// available, otherwise the stored vector.
    fn refine(&self, store: &VectorStore, query: &[f32], metric: DistanceMetric, slot: u32) -> f32 {
        match &self.sq {
            Some(sq) => {
                let w = sq.bytes_per_vector();
                let s = slot as usize;
                let approx = sq.decode(&self.sq_codes[s * w..(s + 1) * w]);
                metric.distance(query, &approx)
            }
            None => store.distance(metric, query, slot),
        }
    }

    /// Maps a squared-L2 ADC estimate onto `metric`'s scale, for the metrics
    /// where one exists.
    fn estimate(&self, adc: f32, metric: DistanceMetric) -> Option<f32> {
        match metric {
            DistanceMetric::Euclidean => Some(adc.max(0.0).sqrt()),
            DistanceMetric::Cosine if self.config.use_cosine => Some(adc * 0.5),
            _ => None,
        }
    }

    /// Approximate candidates from the probed lists, best ADC score first.
    fn candidates<A>(&self, query: &[f32], nprobe: Option<usize>, pool: usize, accept: &A) -> Vec<(f32, u32)>
    where
        A: Fn(u32) -> bool,
    {
        let Some(codebook) = self.codebook.as_ref() else {
            return Vec::new();
        };
        let q = self.prepare(query);
        let n = nprobe.unwrap_or(self.config.nprobe).clamp(1, self.config.nlist);
        let mut top = TopK::new(pool);
        for list in nearest_centroids(&self.coarse, self.dimension, &q, n) {
            if self.lists[list].is_empty() {
                continue;
            }
            let residual: Vec<f32> = q.iter().zip(self.centroid(list)).map(|(x, c)| x - c).collect();
            let table = codebook.build_distance_table(&residual, AdcMode::L2);
            for &slot in &self.lists[list] {
                if accept(slot) {
                    top.push(table.distance(self.code(slot)), slot);
                }
            }
        }
        top.into_sorted()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn search<A>(
        &self,
        store: &VectorStore,
        query: &[f32],
        metric: DistanceMetric,
        k: usize,
        nprobe: Option<usize>,
        rerank_top: Option<usize>,
        accept: &A,
    ) -> Vec<(f32, u32)>
    where
        A: Fn(u32) -> bool,
    {
        if k == 0 {
            return Vec::new();
        }
        let oversampled = ((k as f32) * self.config.oversampling_factor).ceil() as usize;
        let requested = rerank_top.unwrap_or(self.config.default_rerank);
        let pool = oversampled.max(k).max(requested);
        let mut hits = self.candidates(query, nprobe, pool, accept);

        let mut rerank = if requested > 0 { requested.max(k) } else { 0 };
        if rerank == 0 && self.config.oversampling_factor > 1.0 {
            rerank = hits.len();
        }
        // ADC scores only translate to L2-like metrics; everything else is refined.
        if self.estimate(0.0, metric).is_none() {
            rerank = hits.len();
        }
        let rerank = rerank.min(hits.len());

        for hit in hits[rerank..].iter_mut() {
            hit.0 = self.estimate(hit.0, metric).unwrap_or(hit.0);
        }
        for hit in hits[..rerank].iter_mut() {
            hit.0 = self.refine(store, query, metric, hit.1);
        }
        hits[..rerank].sort_unstable_by(cmp_hits);
        hits.truncate(k);
        hits
    }

    #[allow(clippy::too_many_arguments)]
    pub fn range_search<A>(
        &self,
        store: &VectorStore,
        query: &[f32],
        metric: DistanceMetric,
        radius: f32,
        max_results: usize,
        nprobe: Option<usize>,
        accept: &A,
    ) -> Vec<(f32, u32)>
    where
        A: Fn(u32) -> bool,
    {
        let pool: usize = self.lists.iter().map(Vec::len).sum();
        let mut hits: Vec<(f32, u32)> = self
            .candidates(query, nprobe, pool, accept)
            .into_iter()
            .map(|(_, slot)| (self.refine(store, query, metric, slot), slot))
            .filter(|&(d, _)| d <= radius)
            .collect();
        hits.sort_unstable_by(cmp_hits);
        hits.truncate(max_results);
        hits
    }

    pub fn heap_bytes(&self) -> usize {
        self.coarse.capacity() * 4
            + self.codebook.as_ref().map_or(0, PqCodebook::heap_bytes)
            + self.sq.as_ref().map_or(0, ScalarQuantizer::heap_bytes)
            + self.lists.iter().map(|l| l.capacity() * 4 + 24).sum::<usize>()
            + self.assignment.capacity() * 4
            + self.codes.capacity()
            + self.sq_codes.capacity()
    }

    pub fn validate(&self, slots: usize) -> std::result::Result<(), String> {
        if self.codebook.is_some() && self.coarse.len() != self.config.nlist * self.dimension {
            return Err("IVF-PQ coarse centroid array has the wrong length".into());
        }
        if self.assignment.len() > slots || self.codes.len() != self.assignment.len() * self.config.m {
            return Err("IVF-PQ code arena does not match its assignment table".into());
        }
        if self.lists.iter().flatten().any(|&s| s as usize >= self.assignment.len()) {
            return Err("IVF-PQ list entry out of range".into());
        }
        Ok(())
    }
}
