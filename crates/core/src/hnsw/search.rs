//! HNSW search: single-layer beam search and multi-layer k-NN.
//!
//! Results are gated by an `accept` predicate (liveness plus any metadata
//! filter). Rejected nodes are still used for navigation. With ACORN enabled a
//! rejected neighbor additionally opens up to `acorn_hops` extra hops so the beam
//! keeps finding accepted nodes under selective filters.

use crate::distance::{cmp_hits, DistanceMetric};
use crate::hnsw::graph::HnswGraph;
use crate::hnsw::visited::VisitedSet;
use crate::quantization::binary;
use crate::storage::VectorStore;
use ordered_float::OrderedFloat;
use std::cell::RefCell;
use std::collections::BinaryHeap;

thread_local! {
    /// Per-thread visited set reused across searches.
    static SEARCH_VISITED: RefCell<VisitedSet> = RefCell::new(VisitedSet::default());
}

/// Frontier entry: max-heap on negative distance gives closest-first.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    neg_distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.neg_distance
            .cmp(&other.neg_distance)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Result entry: max-heap by distance so the worst result is on top.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResultEntry {
    distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for ResultEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for ResultEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct Beam {
    candidates: BinaryHeap<Candidate>,
    results: BinaryHeap<ResultEntry>,
    ef: usize,
    worst: f32,
}

impl Beam {
    fn new(ef: usize) -> Self {
        Self {
            candidates: BinaryHeap::with_capacity(ef * 2),
            results: BinaryHeap::with_capacity(ef + 1),
            ef,
            worst: f32::MAX,
        }
    }

    #[inline]
    fn admits(&self, dist: f32) -> bool {
        self.results.len() < self.ef || dist < self.worst
    }

    fn offer(&mut self, id: u32, dist: f32, accepted: bool) {
        if !self.admits(dist) {
            return;
        }
        self.candidates.push(Candidate {
            neg_distance: OrderedFloat(-dist),
            id,
        });
        if accepted {
            self.results.push(ResultEntry {
                distance: OrderedFloat(dist),
                id,
            });
            if self.results.len() > self.ef {
                self.results.pop();
            }
            if self.results.len() >= self.ef {
                self.worst = self.results.peek().map_or(f32::MAX, |r| r.distance.0);
            }
        }
    }
}

/// Beam search on one layer.
///
/// Returns up to `ef` accepted nodes, closest first. `dist` scores a node against
/// the query. `acorn_hops > 0` expands around rejected neighbors.
#[allow(clippy::too_many_arguments)]
pub(crate) fn search_layer<D, A>(
    graph: &HnswGraph,
    entry_points: &[u32],
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
    dist: &D,
    accept: &A,
    acorn_hops: usize,
) -> Vec<(f32, u32)>
where
    D: Fn(u32) -> f32,
    A: Fn(u32) -> bool,
{
    visited.reset(graph.node_count());
    let mut beam = Beam::new(ef.max(1));

    for &ep in entry_points {
        if visited.insert(ep) {
            let d = dist(ep);
            beam.candidates.push(Candidate {
                neg_distance: OrderedFloat(-d),
                id: ep,
            });
            if accept(ep) {
                beam.results.push(ResultEntry {
                    distance: OrderedFloat(d),
                    id: ep,
                });
            }
        }
    }
    while beam.results.len() > beam.ef {
        beam.results.pop();
    }
    if beam.results.len() >= beam.ef {
        beam.worst = beam.results.peek().map_or(f32::MAX, |r| r.distance.0);
    }

    let mut frontier: Vec<u32> = Vec::new();
    let mut next: Vec<u32> = Vec::new();

    while let Some(candidate) = beam.candidates.pop() {
        let c_dist = -candidate.neg_distance.0;
        if beam.results.len() >= beam.ef && c_dist > beam.worst {
            break;
        }

        for &neighbor in graph.neighbors(candidate.id, layer) {
            if !visited.insert(neighbor) {
                continue;
            }
            let accepted = accept(neighbor);
            beam.offer(neighbor, dist(neighbor), accepted);

            if accepted || acorn_hops == 0 {
                continue;
            }
            // ACORN: look past the rejected neighbor for accepted ones
            frontier.clear();
            frontier.push(neighbor);
            for _ in 0..acorn_hops {
                next.clear();
                for &f in &frontier {
                    for &hop in graph.neighbors(f, layer) {
                        if !visited.insert(hop) {
                            continue;
                        }
                        if accept(hop) {
                            beam.offer(hop, dist(hop), true);
                        } else {
                            next.push(hop);
                        }
                    }
                }
                if next.is_empty() {
                    break;
                }
                std::mem::swap(&mut frontier, &mut next);
            }
        }
    }

    let mut out: Vec<(f32, u32)> = beam
        .results
        .into_iter()
        .map(|r| (r.distance.0, r.id))
        .collect();
    out.sort_unstable_by(cmp_hits);
    out
}

impl HnswGraph {
    /// Multi-layer k-NN search.
    ///
    /// `query` must be normalized by the caller when the store holds normalized
    /// vectors and `metric` is Cosine. `accept` must reject tombstoned slots.
    /// Returned distances are exact under `metric`.
    #[allow(clippy::too_many_arguments)]
    pub fn search<A>(
        &self,
        store: &VectorStore,
        query: &[f32],
        metric: DistanceMetric,
        k: usize,
        ef_search: Option<usize>,
        accept: &A,
        filtered: bool,
    ) -> Vec<(f32, u32)>
    where
        A: Fn(u32) -> bool,
    {
        let entry_point = match self.entry_point {
            Some(ep) if k > 0 => ep,
            _ => return Vec::new(),
        };

        let query_code = if self.code_words > 0 {
            binary::encode(query)
        } else {
            Vec::new()
        };
        let exact = |node: u32| store.distance(metric, query, node);
        let hamming = |node: u32| binary::hamming(&query_code, self.code(node)) as f32;
        let quantized = self.code_words > 0;

        let acorn_hops = if self.config.use_acorn && filtered {
            self.config.acorn_hops
        } else {
            0
        };
        let rerank = if quantized {
            self.config.quant_rerank.max(k)
        } else {
            k
        };

        SEARCH_VISITED.with(|cell| {
            let mut visited = cell.borrow_mut();
            let pass_all = |_: u32| true;

            let mut current = entry_point;
            for layer in (1..=self.max_layer).rev() {
                let step = if quantized {
                    search_layer(self, &[current], 1, layer, &mut visited, &hamming, &pass_all, 0)
                } else {
                    search_layer(self, &[current], 1, layer, &mut visited, &exact, &pass_all, 0)
                };
                if let Some(&(_, nearest)) = step.first() {
                    current = nearest;
                }
            }

            // Adaptive ef: widen the beam (up to 4x) while accepted results fall short.
            let base_ef = ef_search.unwrap_or(self.config.ef_search).max(rerank);
            let max_ef = (base_ef * 4).min(self.node_count().max(base_ef));
            let mut ef = base_ef;
            let mut results = loop {
                let found = if quantized {
                    search_layer(self, &[current], ef, 0, &mut visited, &hamming, accept, acorn_hops)
                } else {
                    search_layer(self, &[current], ef, 0, &mut visited, &exact, accept, acorn_hops)
                };
                if found.len() >= k || ef >= max_ef {
                    break found;
                }
                ef = (ef * 2).min(max_ef);
            };

            if quantized {
                results.truncate(rerank);
                for hit in results.iter_mut() {
                    hit.0 = exact(hit.1);
                }
                results.sort_unstable_by(cmp_hits);
            }
            results.truncate(k);
            results
        })
    }
}
