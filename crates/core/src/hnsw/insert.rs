//! HNSW construction: insertion, in-place relinking after an update, and
//! heuristic neighbor pruning (Algorithm 4 of the HNSW paper).

use crate::distance::cmp_hits;
use crate::hnsw::graph::HnswGraph;
use crate::hnsw::search::search_layer;
use crate::hnsw::visited::VisitedSet;
use crate::storage::VectorStore;
use std::collections::HashSet;

impl HnswGraph {
    /// Inserts store slot `node`, which must equal the current node count.
    pub fn insert(&mut self, store: &VectorStore, node: u32) {
        debug_assert_eq!(node as usize, self.node_count());
        let level = self.random_level(node);
        self.neighbors.push(vec![Vec::new(); level + 1]);
        self.levels.push(level as u8);
        if self.code_words > 0 {
            self.codes.resize(self.codes.len() + self.code_words, 0);
            self.set_code(node, store.vector(node));
        }

        let Some(entry_point) = self.entry_point else {
            self.entry_point = Some(node);
            self.max_layer = level;
            return;
        };

        self.link(store, node, entry_point, &[]);

        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(node);
        }
    }

    /// Reconnects `node` after its vector changed in the store.
    ///
    /// Outgoing links are rebuilt from a fresh search seeded with the old
    /// neighbors; incoming links from other nodes are kept.
    pub fn update(&mut self, store: &VectorStore, node: u32) {
        self.set_code(node, store.vector(node));
        let old: Vec<u32> = self.neighbors[node as usize]
            .iter_mut()
            .flat_map(std::mem::take)
            .collect::<HashSet<u32>>()
            .into_iter()
            .collect();

        let entry_point = match self.entry_point {
            Some(ep) if ep != node => ep,
            _ => match old.iter().copied().min().or_else(|| self.any_other_node(node)) {
                Some(seed) => seed,
                None => return,
            },
        };
        self.link(store, node, entry_point, &old);
    }

    fn any_other_node(&self, node: u32) -> Option<u32> {
        (0..self.node_count() as u32).find(|&n| n != node)
    }

    /// Searches from `entry_point` and wires `node` into every layer up to its level.
    fn link(&mut self, store: &VectorStore, node: u32, entry_point: u32, seeds: &[u32]) {
        let level = self.level(node);
        let metric = self.config.metric;
        let query = store.vector(node).to_vec();
        let dist = |other: u32| store.distance(metric, &query, other);
        let accept = |other: u32| other != node && store.is_live(other);
        let pass_all = |other: u32| other != node;
        let mut visited = VisitedSet::with_capacity(self.node_count());

        // Greedy descent above the node's level
        let mut current = entry_point;
        for layer in (level + 1..=self.max_layer).rev() {
            let step = search_layer(self, &[current], 1, layer, &mut visited, &dist, &pass_all, 0);
            if let Some(&(_, nearest)) = step.first() {
                current = nearest;
            }
        }

        let top = level.min(self.max_layer);
        let mut layer_eps: Vec<u32> = vec![current];
        for layer in (0..=top).rev() {
            layer_eps.extend(seeds.iter().copied().filter(|&s| s != node && self.level(s) >= layer));
            let candidates = search_layer(
                self,
                &layer_eps,
                self.config.ef_construction,
                layer,
                &mut visited,
                &dist,
                &accept,
                0,
            );
            let m_max = self.config.max_links(layer);
            let selected = select_neighbors_heuristic(self, store, &candidates, m_max);
            self.neighbors[node as usize][layer] = selected.iter().map(|&(_, id)| id).collect();

            layer_eps.clear();
            layer_eps.extend(candidates.iter().map(|&(_, id)| id));
            if layer_eps.is_empty() {
                layer_eps.push(current);
            }
        }

        // Back-links, pruning any neighbor pushed over capacity
        for layer in 0..=top {
            let m_max = self.config.max_links(layer);
            let mine = self.neighbors[node as usize][layer].clone();
            for neighbor in mine {
                let nid = neighbor as usize;
                if self.neighbors[nid].len() <= layer {
                    continue;
                }
                if self.neighbors[nid][layer].contains(&node) {
                    continue;
                }
                self.neighbors[nid][layer].push(node);
                if self.neighbors[nid][layer].len() > m_max {
                    let candidates: Vec<(f32, u32)> = self.neighbors[nid][layer]
                        .iter()
                        .map(|&c| (store.distance_between(metric, neighbor, c), c))
                        .collect();
                    let pruned = select_neighbors_heuristic(self, store, &candidates, m_max);
                    self.neighbors[nid][layer] = pruned.iter().map(|&(_, id)| id).collect();
                }
            }
        }
    }

    /// Builds a fresh graph over every live slot of `store`, in slot order.
    ///
    /// Tombstoned slots get an empty, unreachable node so ids stay aligned with slots.
    pub fn rebuild(store: &VectorStore, config: crate::hnsw::HnswConfig) -> Self {
        let mut graph = HnswGraph::new(store.dimension(), config);
        for slot in 0..store.len() as u32 {
            if store.is_live(slot) {
                graph.insert(store, slot);
            } else {
                graph.push_isolated(slot);
            }
        }
        graph
    }

    /// Appends a node with no links.
    pub(crate) fn push_isolated(&mut self, node: u32) {
        debug_assert_eq!(node as usize, self.node_count());
        self.neighbors.push(vec![Vec::new()]);
        self.levels.push(0);
        if self.code_words > 0 {
            self.codes.resize(self.codes.len() + self.code_words, 0);
        }
    }
}

/// Heuristic neighbor selection (Algorithm 4 of the HNSW paper).
///
/// A candidate is kept only if it is closer to the base node than to every
/// neighbor already kept. Leftover slots are filled with the closest unused
/// candidates.
fn select_neighbors_heuristic(
    graph: &HnswGraph,
    store: &VectorStore,
    candidates: &[(f32, u32)],
    m: usize,
) -> Vec<(f32, u32)> {
    let mut sorted = candidates.to_vec();
    sorted.sort_unstable_by(cmp_hits);
    sorted.dedup_by_key(|c| c.1);

    let metric = graph.config.metric;
    let mut selected: Vec<(f32, u32)> = Vec::with_capacity(m);
    for &(dist_to_base, cid) in &sorted {
        if selected.len() >= m {
            break;
        }
        let diverse = selected
            .iter()
            .all(|&(_, sid)| dist_to_base <= store.distance_between(metric, cid, sid));
        if diverse {
            selected.push((dist_to_base, cid));
        }
    }

    if selected.len() < m {
        let chosen: HashSet<u32> = selected.iter().map(|&(_, id)| id).collect();
        for &(dist, cid) in &sorted {
            if selected.len() >= m {
                break;
            }
            if !chosen.contains(&cid) {
                selected.push((dist, cid));
            }
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use crate::distance::DistanceMetric;
    use crate::hnsw::{HnswConfig, HnswGraph};
    use crate::storage::VectorStore;
    use crate::vector::Metadata;
    use rand::{Rng, SeedableRng};

    fn random_store(n: usize, dim: usize, seed: u64) -> VectorStore {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let mut store = VectorStore::new(dim, false);
        for _ in 0..n {
            let v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
            store.push_dense(&v, Metadata::new());
        }
        store
    }

    fn build(store: &VectorStore, config: HnswConfig) -> HnswGraph {
        let mut graph = HnswGraph::new(store.dimension(), config);
        for slot in 0..store.len() as u32 {
            graph.insert(store, slot);
        }
        graph
    }

    fn brute_force(store: &VectorStore, q: &[f32], k: usize) -> Vec<u32> {
        let mut all: Vec<(f32, u32)> = store
            .live_slots()
            .map(|s| (store.distance(DistanceMetric::Euclidean, q, s), s))
            .collect();
        crate::distance::sort_hits(&mut all);
        all.into_iter().take(k).map(|(_, s)| s).collect()
    }

    // ── Construction ───────────────────────────────────────────────────

    #[test]
    fn test_insert_respects_link_caps() {
        let store = random_store(400, 8, 1);
        let config = HnswConfig {
            m: 4,
            ef_construction: 32,
            ..Default::default()
        };
        let graph = build(&store, config);
        assert!(graph.validate(store.len()).is_ok());
        for node in 0..graph.node_count() as u32 {
            for layer in 0..=graph.level(node) {
                let cap = graph.config.max_links(layer);
                assert!(graph.neighbors(node, layer).len() <= cap);
            }
        }
    }

    #[test]
    fn test_recall_against_brute_force() {
        let store = random_store(1000, 16, 2);
        let graph = build(&store, HnswConfig::default());
        let accept = |s: u32| store.is_live(s);
        let mut rng = rand::rngs::StdRng::seed_from_u64(99);
        let mut hits = 0;
        let queries = 50;
        for _ in 0..queries {
            let q: Vec<f32> = (0..16).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let got: Vec<u32> = graph
                .search(&store, &q, DistanceMetric::Euclidean, 10, Some(64), &accept, false)
                .into_iter()
                .map(|(_, s)| s)
                .collect();
            let truth = brute_force(&store, &q, 10);
            hits += got.iter().filter(|s| truth.contains(s)).count();
        }
        let recall = hits as f64 / (queries * 10) as f64;
        assert!(recall > 0.9, "recall@10 = {recall}");
    }

    #[test]
    fn test_update_relinks_node() {
        let mut store = random_store(200, 4, 3);
        let mut graph = build(&store, HnswConfig::default());
        store.set_dense(17, &[5.0, 5.0, 5.0, 5.0]);
        graph.update(&store, 17);
        let accept = |s: u32| store.is_live(s);
        let hits = graph.search(&store, &[5.0, 5.0, 5.0, 5.0], DistanceMetric::Euclidean, 1, None, &accept, false);
        assert_eq!(hits[0].1, 17);
        assert!(hits[0].0 < 1e-6);
    }

    #[test]
    fn test_rebuild_skips_tombstones() {
        let mut store = random_store(100, 4, 4);
        for s in (0..100).step_by(3) {
            store.tombstone(s);
        }
        let graph = HnswGraph::rebuild(&store, HnswConfig::default());
        assert!(graph.validate(store.len()).is_ok());
        for node in 0..100u32 {
            if store.is_deleted(node) {
                assert!(graph.neighbors(node, 0).is_empty());
            } else {
                assert!(graph.neighbors(node, 0).iter().all(|&n| store.is_live(n)));
            }
        }
    }

    // ── Search variants ────────────────────────────────────────────────

    #[test]
    fn test_binary_quant_search_reranks_exactly() {
        let store = random_store(500, 32, 5);
        let config = HnswConfig {
            use_binary_quant: true,
            quant_rerank: 64,
            ..Default::default()
        };
        let graph = build(&store, config);
        let accept = |s: u32| store.is_live(s);
        let q = store.vector(42).to_vec();
        let hits = graph.search(&store, &q, DistanceMetric::Euclidean, 5, None, &accept, false);
        assert_eq!(hits.len(), 5);
        assert_eq!(hits[0].1, 42);
        for w in hits.windows(2) {
            assert!(w[0].0 <= w[1].0);
        }
        let exact = store.distance(DistanceMetric::Euclidean, &q, hits[1].1);
        assert!((hits[1].0 - exact).abs() < 1e-6);
    }

    #[test]
    fn test_acorn_filtered_search_finds_rare_matches() {
        let store = random_store(800, 8, 6);
        let config = HnswConfig {
            m: 6,
            use_acorn: true,
            acorn_hops: 2,
            ..Default::default()
        };
        let graph = build(&store, config);
        let accept = |s: u32| store.is_live(s) && s % 50 == 0;
        let q = store.vector(0).to_vec();
        let hits = graph.search(&store, &q, DistanceMetric::Euclidean, 5, None, &accept, true);
        assert_eq!(hits.len(), 5);
        assert!(hits.iter().all(|&(_, s)| s % 50 == 0));
        assert_eq!(hits[0].1, 0);
    }

    #[test]
    fn test_empty_graph_returns_nothing() {
        let store = VectorStore::new(4, false);
        let graph = HnswGraph::new(4, HnswConfig::default());
        let accept = |_: u32| true;
        assert!(graph
            .search(&store, &[0.0; 4], DistanceMetric::Euclidean, 3, None, &accept, false)
            .is_empty());
    }
}
