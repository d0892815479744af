//! Layered adjacency storage.
//!
//! Build-time graph: one `NeighborList` per (node, layer). Lists publish
//! their length through an atomic so concurrent beam searches can traverse
//! them without locking while inserters append under per-node mutexes.
//! After build, layer 0 is repacked into a flat arena
//! `[degree, n0, n1, ..]` addressed through an offset table; the query path
//! only ever reads that arena at the bottom layer.

use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::OnceLock;

pub type NodeId = u32;

/// Adjacency list with a published length over a fixed backing buffer.
///
/// Writers store id slots first and publish the new length with `Release`;
/// readers load the length with `Acquire` and scan slots with relaxed loads.
/// The buffer never reallocates, so a stale length can only hide recent
/// appends or replay ids that were valid at some point. Either way a reader
/// sees nothing but well-formed node ids.
pub struct NeighborList {
    len: AtomicUsize,
    slots: Box<[AtomicU32]>,
}

impl NeighborList {
    pub(crate) fn with_capacity(cap: usize) -> Self {
        let slots: Vec<AtomicU32> = (0..cap).map(|_| AtomicU32::new(0)).collect();
        Self {
            len: AtomicUsize::new(0),
            slots: slots.into_boxed_slice(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn get(&self, idx: usize) -> NodeId {
        self.slots[idx].load(Ordering::Relaxed)
    }

    /// Append one id. Caller holds the owning node's lock.
    pub fn push(&self, id: NodeId) {
        let n = self.len.load(Ordering::Relaxed);
        self.slots[n].store(id, Ordering::Relaxed);
        self.len.store(n + 1, Ordering::Release);
    }

    /// Overwrite the whole list. Caller holds the owning node's lock, or is
    /// the inserting thread and the node is not linked anywhere yet.
    pub fn replace(&self, ids: &[NodeId]) {
        debug_assert!(ids.len() <= self.slots.len());
        for (slot, &id) in self.slots.iter().zip(ids.iter()) {
            slot.store(id, Ordering::Relaxed);
        }
        self.len.store(ids.len(), Ordering::Release);
    }

    pub fn to_vec(&self) -> Vec<NodeId> {
        (0..self.len()).map(|k| self.get(k)).collect()
    }
}

struct NodeSlot {
    layers: OnceLock<Box<[NeighborList]>>,
}

/// Per-node, per-layer adjacency for the whole index.
pub struct LayeredGraph {
    nodes: Box<[NodeSlot]>,
    m: usize,
    m0: usize,
}

impl LayeredGraph {
    pub fn new(n: usize, m: usize, m0: usize) -> Self {
        let nodes: Vec<NodeSlot> = (0..n)
            .map(|_| NodeSlot {
                layers: OnceLock::new(),
            })
            .collect();
        Self {
            nodes: nodes.into_boxed_slice(),
            m,
            m0,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Degree cap for a layer.
    #[inline]
    pub fn max_degree(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m0
        } else {
            self.m
        }
    }

    /// Allocate a node's layer stack. Called exactly once per node by its
    /// inserting thread, before the node id can appear in any other list.
    /// Each list carries one spare slot for the transient overfull state
    /// while a back-link re-prune runs.
    pub fn init_node(&self, id: NodeId, top_layer: usize) {
        let lists: Vec<NeighborList> = (0..=top_layer)
            .map(|lc| NeighborList::with_capacity(self.max_degree(lc) + 1))
            .collect();
        let fresh = self.nodes[id as usize]
            .layers
            .set(lists.into_boxed_slice())
            .is_ok();
        debug_assert!(fresh, "node {id} initialized twice");
    }

    /// Adjacency of `id` at `layer`. None while the node is unpublished or
    /// when it does not reach that layer.
    #[inline]
    pub fn neighbors(&self, id: NodeId, layer: usize) -> Option<&NeighborList> {
        self.nodes[id as usize]
            .layers
            .get()
            .and_then(|ls| ls.get(layer))
    }

    /// Highest layer the node participates in.
    pub fn top_layer(&self, id: NodeId) -> usize {
        self.nodes[id as usize]
            .layers
            .get()
            .map_or(0, |ls| ls.len() - 1)
    }
}

/// Read-only flat rendition of layer 0: for node `i`, `flat[offsets[i]]` is
/// the degree, followed by that many neighbor ids in insertion order.
pub struct PackedLayer0 {
    flat: Box<[u32]>,
    offsets: Box<[usize]>,
}

impl PackedLayer0 {
    pub fn empty() -> Self {
        Self {
            flat: Box::new([]),
            offsets: Box::new([]),
        }
    }

    /// Copy every node's layer-0 adjacency into the arena. Runs after the
    /// parallel build region, once the graph is quiescent.
    pub fn pack(graph: &LayeredGraph) -> Self {
        let n = graph.len();
        let mut offsets = vec![0usize; n];
        let mut total = 0usize;
        for i in 0..n {
            offsets[i] = total;
            let deg = graph.neighbors(i as NodeId, 0).map_or(0, NeighborList::len);
            total += 1 + deg;
        }

        let mut flat = vec![0u32; total];
        // Carve one disjoint slice per node, then fill them in parallel
        let mut rows: Vec<&mut [u32]> = Vec::with_capacity(n);
        let mut rest = flat.as_mut_slice();
        for i in 0..n {
            let end = if i + 1 < n { offsets[i + 1] } else { total };
            let (row, tail) = rest.split_at_mut(end - offsets[i]);
            rows.push(row);
            rest = tail;
        }
        rows.into_par_iter().enumerate().for_each(|(i, row)| {
            let deg = row.len() - 1;
            row[0] = deg as u32;
            if let Some(list) = graph.neighbors(i as NodeId, 0) {
                for k in 0..deg {
                    row[1 + k] = list.get(k);
                }
            }
        });

        Self {
            flat: flat.into_boxed_slice(),
            offsets: offsets.into_boxed_slice(),
        }
    }

    #[inline]
    pub fn degree(&self, id: NodeId) -> usize {
        self.flat[self.offsets[id as usize]] as usize
    }

    /// Neighbor ids of `id` in their insertion order.
    #[inline]
    pub fn neighbors(&self, id: NodeId) -> &[u32] {
        let off = self.offsets[id as usize];
        let deg = self.flat[off] as usize;
        &self.flat[off + 1..off + 1 + deg]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_replace_round_trip() {
        let list = NeighborList::with_capacity(5);
        assert!(list.is_empty());
        list.push(3);
        list.push(9);
        assert_eq!(list.to_vec(), vec![3, 9]);

        list.replace(&[1, 2, 3]);
        assert_eq!(list.len(), 3);
        assert_eq!(list.to_vec(), vec![1, 2, 3]);

        // Shrinking replace publishes the shorter length
        list.replace(&[7]);
        assert_eq!(list.to_vec(), vec![7]);
    }

    #[test]
    fn concurrent_readers_see_a_valid_prefix() {
        use std::sync::atomic::AtomicBool;

        let list = NeighborList::with_capacity(1024);
        let done = AtomicBool::new(false);

        std::thread::scope(|s| {
            s.spawn(|| {
                for id in 0..1024u32 {
                    list.push(id);
                }
                done.store(true, Ordering::Release);
            });
            s.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    let n = list.len();
                    for k in 0..n {
                        // Slots below a published length always hold the
                        // value written for that position
                        assert_eq!(list.get(k), k as u32);
                    }
                }
            });
        });
        assert_eq!(list.len(), 1024);
    }

    #[test]
    fn layered_graph_caps_and_top_layer() {
        let g = LayeredGraph::new(4, 8, 16);
        assert_eq!(g.max_degree(0), 16);
        assert_eq!(g.max_degree(1), 8);
        assert_eq!(g.max_degree(5), 8);

        g.init_node(2, 3);
        assert_eq!(g.top_layer(2), 3);
        assert!(g.neighbors(2, 3).is_some());
        assert!(g.neighbors(2, 4).is_none());
        // Unpublished node
        assert!(g.neighbors(1, 0).is_none());
    }

    #[test]
    fn pack_mirrors_layer0() {
        let g = LayeredGraph::new(3, 4, 8);
        g.init_node(0, 1);
        g.init_node(1, 0);
        g.init_node(2, 0);

        g.neighbors(0, 0).unwrap().replace(&[1, 2]);
        g.neighbors(1, 0).unwrap().replace(&[0]);
        // Node 2 keeps an empty list

        let packed = PackedLayer0::pack(&g);
        assert_eq!(packed.degree(0), 2);
        assert_eq!(packed.neighbors(0), &[1, 2]);
        assert_eq!(packed.degree(1), 1);
        assert_eq!(packed.neighbors(1), &[0]);
        assert_eq!(packed.degree(2), 0);
        assert_eq!(packed.neighbors(2), &[] as &[u32]);
    }
}
