//! KD-Tree: exact k-NN by axis-aligned binary partitioning.
//!
//! The splitting axis cycles with depth. Inserts append leaves without
//! rebalancing; [`KdTree::rebuild`] builds a median-balanced tree and runs on
//! every compaction. Deleted or updated slots deactivate their node, which stays
//! in place as a routing point until the next rebuild.
//!
//! Axis gaps bound Euclidean and Manhattan distances from below, so those metrics
//! prune subtrees. Other metrics fall back to scanning active nodes.

use crate::distance::{cmp_hits, DistanceMetric};
use crate::search::exact::TopK;
use crate::storage::VectorStore;
use serde::{Deserialize, Serialize};

const NIL: u32 = u32::MAX;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KdNode {
    slot: u32,
    /// Copy of the slot's coordinate on this node's axis at insert time.
    split: f32,
    left: u32,
    right: u32,
    active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdTree {
    dimension: usize,
    nodes: Vec<KdNode>,
    root: u32,
    /// Active node for each slot, or `NIL`.
    node_of: Vec<u32>,
}

impl KdTree {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            nodes: Vec::new(),
            root: NIL,
            node_of: Vec::new(),
        }
    }

    #[inline]
    fn axis(&self, depth: usize) -> usize {
        depth % self.dimension
    }

    pub fn insert(&mut self, store: &VectorStore, slot: u32) {
        let v = store.vector(slot);
        let mut depth = 0usize;
        let mut parent = NIL;
        let mut go_left = false;
        let mut cur = self.root;
        while cur != NIL {
            let node = &self.nodes[cur as usize];
            parent = cur;
            go_left = v[self.axis(depth)] < node.split;
            cur = if go_left { node.left } else { node.right };
            depth += 1;
        }

        let id = self.nodes.len() as u32;
        self.nodes.push(KdNode {
            slot,
            split: v[self.axis(depth)],
            left: NIL,
            right: NIL,
            active: true,
        });
        if parent == NIL {
            self.root = id;
        } else if go_left {
            self.nodes[parent as usize].left = id;
        } else {
            self.nodes[parent as usize].right = id;
        }
        if self.node_of.len() <= slot as usize {
            self.node_of.resize(slot as usize + 1, NIL);
        }
        self.node_of[slot as usize] = id;
    }

    /// Deactivates the node of `slot`.
    pub fn remove(&mut self, slot: u32) {
        if let Some(node) = self.node_of.get_mut(slot as usize) {
            if *node != NIL {
                self.nodes[*node as usize].active = false;
                *node = NIL;
            }
        }
    }

    /// Re-inserts `slot` after its coordinates changed.
    pub fn update(&mut self, store: &VectorStore, slot: u32) {
        self.remove(slot);
        self.insert(store, slot);
    }

    /// Median-balanced tree over every live slot of `store`.
    pub fn rebuild(store: &VectorStore) -> Self {
        let mut tree = KdTree::new(store.dimension());
        tree.node_of = vec![NIL; store.len()];
        let mut slots: Vec<u32> = store.live_slots().collect();
        tree.nodes.reserve(slots.len());
        tree.root = tree.build_balanced(store, &mut slots, 0);
        tree
    }

    fn build_balanced(&mut self, store: &VectorStore, slots: &mut [u32], depth: usize) -> u32 {
        if slots.is_empty() {
            return NIL;
        }
        let axis = self.axis(depth);
        slots.sort_unstable_by(|&a, &b| {
            store.vector(a)[axis]
                .total_cmp(&store.vector(b)[axis])
                .then(a.cmp(&b))
        });
        let mut mid = slots.len() / 2;
        // Equal keys route right, so the median must be the first of its run.
        let key = store.vector(slots[mid])[axis];
        while mid > 0 && store.vector(slots[mid - 1])[axis] == key {
            mid -= 1;
        }
        let slot = slots[mid];
        let id = self.nodes.len() as u32;
        self.nodes.push(KdNode {
            slot,
            split: key,
            left: NIL,
            right: NIL,
            active: true,
        });
        self.node_of[slot as usize] = id;
        let (left, rest) = slots.split_at_mut(mid);
        let left_id = self.build_balanced(store, left, depth + 1);
        let right_id = self.build_balanced(store, &mut rest[1..], depth + 1);
        self.nodes[id as usize].left = left_id;
        self.nodes[id as usize].right = right_id;
        id
    }

    /// Exact k nearest accepted slots.
    pub fn search<A>(
        &self,
        store: &VectorStore,
        query: &[f32],
        metric: DistanceMetric,
        k: usize,
        accept: &A,
    ) -> Vec<(f32, u32)>
    where
        A: Fn(u32) -> bool,
    {
        let mut top = TopK::new(k);
        if k == 0 || self.root == NIL {
            return Vec::new();
        }
        if !metric.supports_axis_pruning() {
            for node in self.nodes.iter().filter(|n| n.active && accept(n.slot)) {
                top.push(store.distance(metric, query, node.slot), node.slot);
            }
            return top.into_sorted();
        }

        // (node, depth, lower bound on distance to anything in the subtree)
        let mut stack: Vec<(u32, usize, f32)> = vec![(self.root, 0, 0.0)];
        while let Some((id, depth, bound)) = stack.pop() {
            if bound > top.worst() {
                continue;
            }
            let node = &self.nodes[id as usize];
            if node.active && accept(node.slot) {
                top.push(store.distance(metric, query, node.slot), node.slot);
            }
            let diff = query[self.axis(depth)] - node.split;
            let (near, far) = if diff < 0.0 {
                (node.left, node.right)
            } else {
                (node.right, node.left)
            };
            if far != NIL {
                stack.push((far, depth + 1, bound.max(diff.abs())));
            }
            if near != NIL {
                stack.push((near, depth + 1, bound));
            }
        }
        top.into_sorted()
    }

    /// Every accepted slot within `radius`, closest first, at most `max_results`.
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
        let mut hits = Vec::new();
        let prune = metric.supports_axis_pruning();
        let mut stack: Vec<(u32, usize)> = Vec::new();
        if self.root != NIL {
            stack.push((self.root, 0));
        }
        while let Some((id, depth)) = stack.pop() {
            let node = &self.nodes[id as usize];
            if node.active && accept(node.slot) {
                let d = store.distance(metric, query, node.slot);
                if d <= radius {
                    hits.push((d, node.slot));
                }
            }
            let diff = query[self.axis(depth)] - node.split;
            let (near, far) = if diff < 0.0 {
                (node.left, node.right)
            } else {
                (node.right, node.left)
            };
            if near != NIL {
                stack.push((near, depth + 1));
            }
            if far != NIL && (!prune || diff.abs() <= radius) {
                stack.push((far, depth + 1));
            }
        }
        hits.sort_unstable_by(cmp_hits);
        hits.truncate(max_results);
        hits
    }

    /// Depth of the deepest leaf (0 for an empty tree).
    pub fn depth(&self) -> usize {
        let mut max = 0;
        let mut stack: Vec<(u32, usize)> = Vec::new();
        if self.root != NIL {
            stack.push((self.root, 1));
        }
        while let Some((id, d)) = stack.pop() {
            max = max.max(d);
            let node = &self.nodes[id as usize];
            for child in [node.left, node.right] {
                if child != NIL {
                    stack.push((child, d + 1));
                }
            }
        }
        max
    }

    pub fn heap_bytes(&self) -> usize {
        self.nodes.capacity() * std::mem::size_of::<KdNode>() + self.node_of.capacity() * 4
    }

    pub fn validate(&self, slots: usize) -> std::result::Result<(), String> {
        if self.node_of.len() > slots {
            return Err("KD-Tree maps more slots than the store holds".into());
        }
        let n = self.nodes.len() as u32;
        for node in &self.nodes {
            if node.slot as usize >= slots
                || (node.left != NIL && node.left >= n)
                || (node.right != NIL && node.right >= n)
            {
                return Err("KD-Tree node out of range".into());
            }
        }
        if self.root != NIL && self.root >= n {
            return Err("KD-Tree root out of range".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::exact::exact_knn;
    use crate::vector::Metadata;
    use rand::{Rng, SeedableRng};

    fn random_store(n: usize, dim: usize) -> VectorStore {
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        let mut s = VectorStore::new(dim, false);
        for _ in 0..n {
            let v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-10.0..10.0)).collect();
            s.push_dense(&v, Metadata::new());
        }
        s
    }

    fn incremental(store: &VectorStore) -> KdTree {
        let mut t = KdTree::new(store.dimension());
        for slot in 0..store.len() as u32 {
            t.insert(store, slot);
        }
        t
    }

    #[test]
    fn test_matches_brute_force_for_all_metrics() {
        let store = random_store(300, 3);
        let tree = incremental(&store);
        let q = [0.5, -1.0, 2.0];
        for metric in [
            DistanceMetric::Euclidean,
            DistanceMetric::Manhattan,
            DistanceMetric::Cosine,
            DistanceMetric::DotProduct,
        ] {
            let got = tree.search(&store, &q, metric, 7, &|_| true);
            let want = exact_knn(&store, &q, metric, 7, &|_| true);
            assert_eq!(got, want, "{metric}");
        }
    }

    #[test]
    fn test_update_and_remove() {
        let mut store = random_store(50, 2);
        let mut tree = incremental(&store);
        store.set_dense(10, &[100.0, 100.0]);
        tree.update(&store, 10);
        let hit = tree.search(&store, &[99.0, 99.0], DistanceMetric::Euclidean, 1, &|_| true);
        assert_eq!(hit[0].1, 10);
        tree.remove(10);
        let hit = tree.search(&store, &[99.0, 99.0], DistanceMetric::Euclidean, 1, &|_| true);
        assert_ne!(hit[0].1, 10);
    }

    #[test]
    fn test_rebuild_is_balanced_and_exact() {
        let mut store = VectorStore::new(1, false);
        for i in 0..1023 {
            store.push_dense(&[i as f32], Metadata::new());
        }
        let degenerate = incremental(&store);
        assert_eq!(degenerate.depth(), 1023);
        let balanced = KdTree::rebuild(&store);
        assert_eq!(balanced.depth(), 10);
        let got = balanced.search(&store, &[511.4], DistanceMetric::Euclidean, 3, &|_| true);
        let slots: Vec<u32> = got.iter().map(|h| h.1).collect();
        assert_eq!(slots, vec![511, 512, 510]);
    }

    #[test]
    fn test_rebuild_with_duplicate_keys() {
        let mut store = VectorStore::new(2, false);
        for i in 0..20 {
            store.push_dense(&[1.0, i as f32], Metadata::new());
        }
        let tree = KdTree::rebuild(&store);
        for i in 0..20u32 {
            let hit = tree.search(&store, &[1.0, i as f32], DistanceMetric::Euclidean, 1, &|_| true);
            assert_eq!(hit[0].1, i);
        }
    }

    #[test]
    fn test_range_search_matches_scan() {
        let store = random_store(200, 2);
        let tree = incremental(&store);
        let got = tree.range_search(&store, &[0.0, 0.0], DistanceMetric::Euclidean, 4.0, 1000, &|_| true);
        let want = crate::search::exact::exact_range(&store, &[0.0, 0.0], DistanceMetric::Euclidean, 4.0, 1000, &|_| true);
        assert_eq!(got, want);
    }
}
