//! Hierarchical proximity graph: concurrent construction and two-phase
//! mixed-precision search.
//!
//! Build inserts nodes in parallel. Each inserter owns the writes to its own
//! node; back-links onto existing nodes happen under that node's lock; beam
//! searches running concurrently read adjacency through the published-length
//! discipline of [`crate::core::graph::NeighborList`] and never lock.
//!
//! Queries descend greedily to layer 1 with exact distances, run the layer-0
//! beam over the packed adjacency with quantized distances, then re-rank the
//! beam with exact distances. The re-rank is what holds recall@10 at target;
//! quantized ordering alone is not trustworthy near the cut.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use thiserror::Error;
use tracing::debug;

use crate::core::graph::{LayeredGraph, NodeId, PackedLayer0};
use crate::core::quantization::ScalarQuantizer;
use crate::core::scratch::{with_scratch, Candidate, SearchScratch};
use crate::simd::{self, DistanceFunc, QuantDistanceFunc};

/// Target degree above layer 0; the layer-0 cap is `2 * M`.
const M: usize = 40;
const M0: usize = 2 * M;
/// Beam width while building.
const EF_CONSTRUCTION: usize = 300;
/// Beam width at layer 0 while querying.
const EF_SEARCH: usize = 200;
/// Inverse log base of the geometric level draw (1 / ln 2).
const ML: f32 = 1.0 / std::f32::consts::LN_2;
/// Diversification slack: accepted neighbor `e` rejects candidate `c` when
/// `dist(c, e) * GAMMA < dist(c, q)`.
const GAMMA: f32 = 1.0;
/// Hard cap on the level draw. Tail probability past it is ~2^-17.
const MAX_LEVEL: usize = 16;
/// Chunk granularity for the work-stealing insert loop.
const INSERT_CHUNK: usize = 128;
const LEVEL_SEED: u64 = 12345;

/// Number of ids written by [`AnnIndex::search`].
pub const TOP_K: usize = 10;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("dimension must be at least 1")]
    InvalidDimension,
    #[error("base length {len} is not a multiple of dimension {dim}")]
    LengthMismatch { len: usize, dim: usize },
}

#[derive(Debug, Clone, Copy)]
struct EntryPoint {
    node: NodeId,
    level: usize,
}

/// An immutable, fully built index. Construction happens in
/// [`AnnIndex::build`]; there is no observable partially-built state.
pub struct AnnIndex {
    dim: usize,
    num_vectors: usize,
    data: Vec<f32>,
    quantizer: ScalarQuantizer,
    data_quant: Vec<u8>,
    graph: LayeredGraph,
    packed0: PackedLayer0,
    entry: EntryPoint,
}

impl AnnIndex {
    /// Ingest `base` (row-major, `N * dimension` floats) and build the graph.
    pub fn build(dimension: usize, base: Vec<f32>) -> Result<Self, BuildError> {
        if dimension == 0 {
            return Err(BuildError::InvalidDimension);
        }
        if base.len() % dimension != 0 {
            return Err(BuildError::LengthMismatch {
                len: base.len(),
                dim: dimension,
            });
        }
        let n = base.len() / dimension;
        debug!(n, dim = dimension, "building index");

        let mut index = Self {
            dim: dimension,
            num_vectors: n,
            data: base,
            quantizer: ScalarQuantizer::disabled(),
            data_quant: Vec::new(),
            graph: LayeredGraph::new(n, M, M0),
            packed0: PackedLayer0::empty(),
            entry: EntryPoint { node: 0, level: 0 },
        };
        if n == 0 {
            return Ok(index);
        }

        index.entry = index.build_graph();
        index.packed0 = PackedLayer0::pack(&index.graph);
        index.quantizer = ScalarQuantizer::fit(&index.data);
        index.data_quant = index.quantizer.encode_base(&index.data, index.dim);
        debug!(
            max_level = index.entry.level,
            entry = index.entry.node,
            quantized = index.quantizer.enabled,
            "index ready"
        );
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.num_vectors
    }

    pub fn is_empty(&self) -> bool {
        self.num_vectors == 0
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    /// Top-10 approximate neighbors of `query`, ascending by exact distance,
    /// ties by smaller id. Short candidate sets pad with the best id found
    /// (0 on an empty index).
    pub fn search(&self, query: &[f32], out: &mut [i32; TOP_K]) {
        assert_eq!(query.len(), self.dim, "query dimension mismatch");
        if self.num_vectors == 0 {
            out.fill(0);
            return;
        }
        let dist = simd::get_l2_sq();
        let dist_q = simd::get_l2_sq_u8();

        with_scratch(|scratch| {
            let quantized = self.quantizer.enabled;
            if quantized {
                if scratch.quant_query.len() < self.dim {
                    scratch.quant_query.resize(self.dim, 0);
                }
                self.quantizer
                    .encode_into(query, &mut scratch.quant_query[..self.dim]);
            }

            // Greedy descent to layer 1, exact distances, single-best hops
            let mut ep = self.entry.node;
            let mut best = unsafe { dist(query, self.vector(ep)) };
            for lc in (1..=self.entry.level).rev() {
                let mut moved = true;
                while moved {
                    moved = false;
                    let Some(list) = self.graph.neighbors(ep, lc) else {
                        break;
                    };
                    for k in 0..list.len() {
                        let cand = list.get(k);
                        let d = unsafe { dist(query, self.vector(cand)) };
                        if d < best {
                            best = d;
                            ep = cand;
                            moved = true;
                        }
                    }
                }
            }

            self.search_layer0(query, quantized, ep, EF_SEARCH, dist, dist_q, scratch);

            // Exact re-ranking of the whole beam
            let SearchScratch {
                results, rerank, ..
            } = scratch;
            rerank.clear();
            for c in results.iter() {
                rerank.push(Candidate {
                    dist: unsafe { dist(query, self.vector(c.id)) },
                    id: c.id,
                });
            }
            if rerank.len() > TOP_K {
                rerank.select_nth_unstable(TOP_K - 1);
                rerank[..TOP_K].sort_unstable();
            } else {
                rerank.sort_unstable();
            }

            for (k, slot) in out.iter_mut().enumerate() {
                *slot = if k < rerank.len() {
                    rerank[k].id as i32
                } else if let Some(first) = rerank.first() {
                    first.id as i32
                } else {
                    0
                };
            }
        });
    }

    /// Brute-force oracle with the same output contract as [`Self::search`].
    pub fn search_exhaustive(&self, query: &[f32], out: &mut [i32; TOP_K]) {
        assert_eq!(query.len(), self.dim, "query dimension mismatch");
        if self.num_vectors == 0 {
            out.fill(0);
            return;
        }
        let dist = simd::get_l2_sq();
        let mut all: Vec<Candidate> = (0..self.num_vectors as u32)
            .map(|id| Candidate {
                dist: unsafe { dist(query, self.vector(id)) },
                id,
            })
            .collect();
        if all.len() > TOP_K {
            all.select_nth_unstable(TOP_K - 1);
            all[..TOP_K].sort_unstable();
        } else {
            all.sort_unstable();
        }
        for (k, slot) in out.iter_mut().enumerate() {
            *slot = if k < all.len() {
                all[k].id as i32
            } else {
                all[0].id as i32
            };
        }
    }

    #[inline]
    fn vector(&self, id: NodeId) -> &[f32] {
        let start = id as usize * self.dim;
        &self.data[start..start + self.dim]
    }

    #[inline]
    fn quant_row(&self, id: NodeId) -> &[u8] {
        let start = id as usize * self.dim;
        &self.data_quant[start..start + self.dim]
    }

    fn build_graph(&self) -> EntryPoint {
        let dist = simd::get_l2_sq();
        let locks: Vec<Mutex<()>> = (0..self.num_vectors).map(|_| Mutex::new(())).collect();

        // Node 0 is fully initialized before any other insertion starts
        let level0 = random_level();
        self.graph.init_node(0, level0);
        let entry = Mutex::new(EntryPoint {
            node: 0,
            level: level0,
        });

        let ctx = BuildCtx {
            dim: self.dim,
            n: self.num_vectors,
            data: &self.data,
            graph: &self.graph,
            locks: &locks,
            entry: &entry,
            dist,
        };

        (1..self.num_vectors as u32)
            .into_par_iter()
            .with_min_len(INSERT_CHUNK)
            .for_each(|i| ctx.insert(i));

        let ep = *entry.lock();
        debug!(max_level = ep.level, entry = ep.node, "graph constructed");
        ep
    }

    /// Layer-0 beam over the packed adjacency. Quantized distances when the
    /// quantizer is enabled, exact otherwise. Leaves the beam in
    /// `scratch.results`, ascending.
    #[allow(clippy::too_many_arguments)]
    fn search_layer0(
        &self,
        query: &[f32],
        quantized: bool,
        ep: NodeId,
        ef: usize,
        dist: DistanceFunc,
        dist_q: QuantDistanceFunc,
        scratch: &mut SearchScratch,
    ) {
        scratch.visited.prepare(self.num_vectors);
        let SearchScratch {
            visited,
            quant_query,
            candidates,
            results,
            ..
        } = scratch;
        candidates.clear();
        results.clear();

        let dist_at = |id: NodeId| -> f32 {
            if quantized {
                unsafe { dist_q(self.quant_row(id), &quant_query[..self.dim]) }
            } else {
                unsafe { dist(query, self.vector(id)) }
            }
        };

        visited.mark(ep);
        let d0 = dist_at(ep);
        candidates.push(Reverse(Candidate { dist: d0, id: ep }));
        insert_result(results, ef, Candidate { dist: d0, id: ep });

        while let Some(Reverse(curr)) = candidates.pop() {
            if results.len() == ef && curr.dist > results[results.len() - 1].dist {
                break;
            }

            let nbrs = self.packed0.neighbors(curr.id);
            for (k, &nid) in nbrs.iter().enumerate() {
                if visited.is_visited(nid) {
                    continue;
                }
                visited.mark(nid);

                // Hide memory latency: touch the row two neighbors ahead
                if k + 2 < nbrs.len() {
                    let ahead = nbrs[k + 2] as usize;
                    if quantized {
                        simd::prefetch_row_u8(&self.data_quant, ahead, self.dim);
                    } else {
                        simd::prefetch_row_f32(&self.data, ahead, self.dim);
                    }
                }

                let d = dist_at(nid);
                if results.len() < ef || d < results[results.len() - 1].dist {
                    insert_result(results, ef, Candidate { dist: d, id: nid });
                    candidates.push(Reverse(Candidate { dist: d, id: nid }));
                }
            }
        }
    }
}

/// Insertion sort into the bounded ascending result buffer.
fn insert_result(w: &mut Vec<Candidate>, ef: usize, cand: Candidate) {
    if w.len() == ef {
        if cand.dist >= w[ef - 1].dist {
            return;
        }
        w.pop();
    }
    let pos = w.partition_point(|c| c.dist <= cand.dist);
    w.insert(pos, cand);
}

/// Geometric level draw: `floor(-ln(U) / ln 2)` from a per-thread generator
/// seeded by the rayon worker index.
fn random_level() -> usize {
    thread_local! {
        static LEVEL_RNG: RefCell<Option<StdRng>> = const { RefCell::new(None) };
    }
    LEVEL_RNG.with(|cell| {
        let mut slot = cell.borrow_mut();
        let rng = slot.get_or_insert_with(|| {
            let worker = rayon::current_thread_index().unwrap_or(0) as u64;
            StdRng::seed_from_u64(LEVEL_SEED + worker)
        });
        let u: f32 = rng.gen::<f32>().max(f32::MIN_POSITIVE);
        ((-u.ln() * ML) as usize).min(MAX_LEVEL)
    })
}

/// Shared borrows threaded through one node insertion.
struct BuildCtx<'a> {
    dim: usize,
    n: usize,
    data: &'a [f32],
    graph: &'a LayeredGraph,
    locks: &'a [Mutex<()>],
    entry: &'a Mutex<EntryPoint>,
    dist: DistanceFunc,
}

impl BuildCtx<'_> {
    #[inline]
    fn vector(&self, id: NodeId) -> &[f32] {
        let start = id as usize * self.dim;
        &self.data[start..start + self.dim]
    }

    #[inline]
    fn d(&self, a: &[f32], b: &[f32]) -> f32 {
        unsafe { (self.dist)(a, b) }
    }

    fn insert(&self, i: NodeId) {
        let query = self.vector(i);
        let level = random_level();
        let snapshot = *self.entry.lock();
        let mut ep = snapshot.node;

        // Greedy descent through the layers above this node's top. Reads
        // race with concurrent appends; a stale list length at worst costs
        // one extra hop.
        if level < snapshot.level {
            let mut best = self.d(query, self.vector(ep));
            for lc in (level + 1..=snapshot.level).rev() {
                let mut moved = true;
                while moved {
                    moved = false;
                    let Some(list) = self.graph.neighbors(ep, lc) else {
                        break;
                    };
                    for k in 0..list.len() {
                        let cand = list.get(k);
                        let d = self.d(query, self.vector(cand));
                        if d < best {
                            best = d;
                            ep = cand;
                            moved = true;
                        }
                    }
                }
            }
        }

        self.graph.init_node(i, level);

        let mut eps: Vec<NodeId> = vec![ep];
        for lc in (0..=level.min(snapshot.level)).rev() {
            let found = self.search_layer_build(query, &eps, EF_CONSTRUCTION, lc);

            // Exact distances again, ascending, ties by id
            let mut sorted: Vec<Candidate> = found
                .into_iter()
                .map(|c| Candidate {
                    dist: self.d(query, self.vector(c)),
                    id: c,
                })
                .collect();
            sorted.sort_unstable();

            let cap = self.graph.max_degree(lc);
            let selected = self.select_diverse(&sorted, cap);

            // Own links need no lock; nothing points at node i on this layer yet
            if let Some(list) = self.graph.neighbors(i, lc) {
                list.replace(&selected);
            }

            for &j in &selected {
                self.link_back(j, i, lc, cap);
            }
            eps = selected;
        }

        if level > snapshot.level {
            let mut guard = self.entry.lock();
            if level > guard.level {
                *guard = EntryPoint { node: i, level };
            }
        }
    }

    /// Beam search over the mutable graph with exact distances. Returns up
    /// to `ef` ids in no particular order; callers re-sort.
    fn search_layer_build(
        &self,
        query: &[f32],
        eps: &[NodeId],
        ef: usize,
        lc: usize,
    ) -> Vec<NodeId> {
        with_scratch(|scratch| {
            let visited = &mut scratch.visited;
            visited.prepare(self.n);

            // Frontier pops closest-first; `best` keeps the ef closest seen,
            // farthest on top.
            let mut frontier: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
            let mut best: BinaryHeap<Candidate> = BinaryHeap::new();

            for &pid in eps {
                if visited.is_visited(pid) {
                    continue;
                }
                visited.mark(pid);
                let d = self.d(query, self.vector(pid));
                frontier.push(Reverse(Candidate { dist: d, id: pid }));
                best.push(Candidate { dist: d, id: pid });
                if best.len() > ef {
                    best.pop();
                }
            }

            while let Some(Reverse(curr)) = frontier.pop() {
                let farthest = best.peek().map_or(f32::MAX, |c| c.dist);
                if best.len() >= ef && curr.dist > farthest {
                    break;
                }

                let Some(list) = self.graph.neighbors(curr.id, lc) else {
                    continue;
                };
                let deg = list.len();
                for k in 0..deg {
                    let nid = list.get(k);
                    if visited.is_visited(nid) {
                        continue;
                    }
                    visited.mark(nid);

                    if k + 1 < deg {
                        simd::prefetch_row_f32(self.data, list.get(k + 1) as usize, self.dim);
                    }

                    let d = self.d(query, self.vector(nid));
                    let farthest = best.peek().map_or(f32::MAX, |c| c.dist);
                    if best.len() < ef || d < farthest {
                        frontier.push(Reverse(Candidate { dist: d, id: nid }));
                        best.push(Candidate { dist: d, id: nid });
                        if best.len() > ef {
                            best.pop();
                        }
                    }
                }
            }

            best.into_iter().map(|c| c.id).collect()
        })
    }

    /// Diversified selection: walk candidates in ascending distance, keep
    /// those not strictly dominated by an already-kept neighbor.
    fn select_diverse(&self, sorted: &[Candidate], cap: usize) -> Vec<NodeId> {
        let mut kept: Vec<NodeId> = Vec::with_capacity(cap);
        for cand in sorted {
            if kept.len() >= cap {
                break;
            }
            let cv = self.vector(cand.id);
            let dominated = kept
                .iter()
                .any(|&e| self.d(cv, self.vector(e)) * GAMMA < cand.dist);
            if !dominated {
                kept.push(cand.id);
            }
        }
        kept
    }

    /// Append `i` to `j`'s layer-`lc` list under `j`'s lock. When the cap is
    /// exceeded, re-prune the list from scratch with distances from `j`.
    fn link_back(&self, j: NodeId, i: NodeId, lc: usize, cap: usize) {
        let _guard = self.locks[j as usize].lock();
        let Some(list) = self.graph.neighbors(j, lc) else {
            return;
        };
        list.push(i);
        if list.len() <= cap {
            return;
        }

        let jv = self.vector(j);
        let mut members: Vec<Candidate> = (0..list.len())
            .map(|k| {
                let id = list.get(k);
                Candidate {
                    dist: self.d(jv, self.vector(id)),
                    id,
                }
            })
            .collect();
        members.sort_unstable();
        let kept = self.select_diverse(&members, cap);
        list.replace(&kept);
    }
}
