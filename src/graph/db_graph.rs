use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use anyhow::{ensure, Result};
use rand::Rng;
use smallvec::SmallVec;
use tracing::{info, warn};

use crate::graph::binary_kmer::BinaryKmer;
use crate::graph::dna::{Nucleotide, NUCLEOTIDES};
use crate::graph::hash_table::HashTable;
use crate::graph::node::{
    bits_to_words, bitset_clear, bitset_get, bitset_set_mt, bitset_test_and_set_mt,
    bkmer_orientation, covg_increment_mt, edge_bit, edges_has_edge, edges_or_mt,
    edges_with_orientation, oriented_bkmer, Colour, Covg, DbNode, Edges, HashKey, Orientation,
    HASH_NOT_FOUND,
};
use crate::graph::path_store::PathStore;

/// Default sample name before any file names a colour.
pub const UNDEFINED_SAMPLE: &str = "undefined";

/// Per-colour cleaning provenance, carried through `.ctx` headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleaningInfo {
    pub tip_clipping: bool,
    pub rm_low_covg_supernodes: bool,
    pub rm_low_covg_nodes: bool,
    pub low_covg_supernodes_thr: u32,
    pub low_covg_nodes_thr: u32,
    pub cleaned_against: String,
}

/// Per-colour metadata mirrored into graph file headers.
#[derive(Debug, Clone)]
pub struct GraphInfo {
    pub sample_name: String,
    pub mean_read_length: u32,
    pub total_sequence: u64,
    pub error_rate: [u8; 16],
    pub cleaning: CleaningInfo,
}

impl Default for GraphInfo {
    fn default() -> GraphInfo {
        GraphInfo {
            sample_name: UNDEFINED_SAMPLE.to_owned(),
            mean_read_length: 0,
            total_sequence: 0,
            error_rate: [0; 16],
            cleaning: CleaningInfo::default(),
        }
    }
}

impl GraphInfo {
    /// Fold a loaded read batch into the running mean read length.
    pub fn update_seq_stats(&mut self, num_bases: u64, num_reads: u64) {
        if num_reads > 0 {
            let total_reads =
                (self.total_sequence / self.mean_read_length.max(1) as u64) + num_reads;
            self.total_sequence += num_bases;
            self.mean_read_length = (self.total_sequence / total_reads.max(1)) as u32;
        }
    }
}

/// The coloured de Bruijn graph: a fixed-capacity kmer set plus
/// per-colour annotation planes and the path store.
///
/// All annotation planes are atomic, so the building phase may share
/// `&Graph` across threads. Exclusive passes (wipe, defragment, reset)
/// take `&mut self`, which is how the "no concurrent walker" rule is
/// enforced.
pub struct Graph {
    pub ht: HashTable,
    pub kmer_size: usize,
    pub num_of_cols: usize,
    pub num_edge_cols: usize,
    pub ginfo: Vec<GraphInfo>,

    /// `Edges` byte per (node, edge colour); row-major by node.
    col_edges: Vec<AtomicU8>,
    /// Saturating coverage per (node, colour); row-major by node.
    col_covgs: Vec<AtomicU32>,
    /// Bit per (node, colour): colour-major planes of capacity bits.
    node_in_cols: Vec<AtomicU64>,
    /// Bit per (node, orientation), for PCR-duplicate suppression.
    readstrt: Vec<AtomicU64>,

    pub pstore: PathStore,
}

impl Graph {
    /// Allocate every plane up front. `path_mem` is the path arena size
    /// in bytes; pass 0 when no paths will be used.
    pub fn new(
        kmer_size: usize,
        num_of_cols: usize,
        num_edge_cols: usize,
        capacity: u64,
        path_mem: usize,
    ) -> Graph {
        assert!(num_of_cols > 0);
        assert!(num_edge_cols == 1 || num_edge_cols == num_of_cols);
        crate::graph::binary_kmer::check_kmer_size(kmer_size, "graph alloc")
            .expect("invalid kmer size");

        let ht = HashTable::new(capacity);
        let cap = ht.capacity() as usize;
        let words_per_col = bits_to_words(cap);

        let graph = Graph {
            kmer_size,
            num_of_cols,
            num_edge_cols,
            ginfo: vec![GraphInfo::default(); num_of_cols],
            col_edges: (0..cap * num_edge_cols).map(|_| AtomicU8::new(0)).collect(),
            col_covgs: (0..cap * num_of_cols).map(|_| AtomicU32::new(0)).collect(),
            node_in_cols: (0..words_per_col * num_of_cols)
                .map(|_| AtomicU64::new(0))
                .collect(),
            readstrt: (0..bits_to_words(2 * cap)).map(|_| AtomicU64::new(0)).collect(),
            pstore: PathStore::new(ht.capacity(), num_of_cols, path_mem),
            ht,
        };
        info!(
            "[graph] kmer-size: {}; colours: {}; capacity: {}",
            kmer_size, num_of_cols, cap
        );
        graph
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.ht.capacity()
    }

    #[inline]
    pub fn node_assigned(&self, hkey: HashKey) -> bool {
        self.ht.slot_assigned(hkey)
    }

    #[inline]
    pub fn bkmer(&self, hkey: HashKey) -> BinaryKmer {
        self.ht.bkmer_at(hkey)
    }

    /// The kmer as seen from `node`'s strand.
    #[inline]
    pub fn oriented_bkmer(&self, node: DbNode) -> BinaryKmer {
        oriented_bkmer(self.bkmer(node.key), node.orient, self.kmer_size)
    }

    /// First base of the node read along its orientation.
    #[inline]
    pub fn first_nuc(&self, node: DbNode) -> Nucleotide {
        self.oriented_bkmer(node).first_nuc(self.kmer_size)
    }

    /// Last base of the node read along its orientation.
    #[inline]
    pub fn last_nuc(&self, node: DbNode) -> Nucleotide {
        self.oriented_bkmer(node).last_nuc()
    }

    // -------------------------------------------------------------------------
    // Lookup / insert
    // -------------------------------------------------------------------------

    /// Find a kmer (any strand), returning the directed node view.
    pub fn find(&self, bkmer: BinaryKmer) -> Option<DbNode> {
        let bkey = bkmer.key(self.kmer_size);
        let hkey = self.ht.find(bkey);
        if hkey == HASH_NOT_FOUND {
            None
        } else {
            Some(DbNode::new(hkey, bkmer_orientation(bkmer, bkey)))
        }
    }

    pub fn find_str(&self, s: &str) -> Result<Option<DbNode>> {
        Ok(self.find(BinaryKmer::from_str(s, self.kmer_size)?))
    }

    /// Find or insert a kmer. Thread safe; both strands of a kmer map
    /// to the same slot. Returns the node and whether it already
    /// existed.
    pub fn find_or_add_node_mt(&self, bkmer: BinaryKmer) -> Result<(DbNode, bool)> {
        let bkey = bkmer.key(self.kmer_size);
        let (hkey, found) = self.ht.find_or_insert(bkey)?;
        Ok((DbNode::new(hkey, bkmer_orientation(bkmer, bkey)), found))
    }

    /// Mark node membership and bump coverage for `col`.
    pub fn update_node_mt(&self, node: DbNode, col: Colour) {
        self.set_in_colour_mt(node.key, col);
        self.increment_coverage_mt(node.key, col);
    }

    // -------------------------------------------------------------------------
    // Colour planes
    // -------------------------------------------------------------------------

    #[inline]
    fn covg_idx(&self, hkey: HashKey, col: Colour) -> usize {
        hkey as usize * self.num_of_cols + col
    }

    #[inline]
    fn edges_idx(&self, hkey: HashKey, col: Colour) -> usize {
        hkey as usize * self.num_edge_cols + col
    }

    #[inline]
    fn in_col_bit(&self, hkey: HashKey, col: Colour) -> usize {
        col * (bits_to_words(self.capacity() as usize) * 64) + hkey as usize
    }

    #[inline]
    pub fn covg(&self, hkey: HashKey, col: Colour) -> Covg {
        self.col_covgs[self.covg_idx(hkey, col)].load(Ordering::Relaxed)
    }

    pub fn increment_coverage_mt(&self, hkey: HashKey, col: Colour) {
        covg_increment_mt(&self.col_covgs, self.covg_idx(hkey, col));
    }

    pub fn add_coverage_mt(&self, hkey: HashKey, col: Colour, covg: Covg) {
        let idx = self.covg_idx(hkey, col);
        let mut cur = self.col_covgs[idx].load(Ordering::Relaxed);
        loop {
            let next = cur.saturating_add(covg);
            match self.col_covgs[idx].compare_exchange_weak(
                cur,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(seen) => cur = seen,
            }
        }
    }

    #[inline]
    pub fn node_has_col(&self, hkey: HashKey, col: Colour) -> bool {
        bitset_get(&self.node_in_cols, self.in_col_bit(hkey, col))
    }

    #[inline]
    pub fn set_in_colour_mt(&self, hkey: HashKey, col: Colour) {
        bitset_set_mt(&self.node_in_cols, self.in_col_bit(hkey, col));
    }

    /// Edges byte for one edge colour.
    #[inline]
    pub fn edges(&self, hkey: HashKey, col: Colour) -> Edges {
        self.col_edges[self.edges_idx(hkey, col)].load(Ordering::Acquire)
    }

    /// Union of edges over every edge colour.
    pub fn edges_union(&self, hkey: HashKey) -> Edges {
        (0..self.num_edge_cols)
            .map(|col| self.edges(hkey, col))
            .fold(0, |a, b| a | b)
    }

    /// OR a whole edges byte into one edge plane (graph file loading).
    pub fn union_edges_mt(&self, hkey: HashKey, edge_col: Colour, edges: Edges) {
        edges_or_mt(&self.col_edges, self.edges_idx(hkey, edge_col), edges);
    }

    /// Edge colour a graph colour maps to: one shared plane collapses
    /// every colour onto plane 0.
    #[inline]
    pub fn edge_col(&self, col: Colour) -> Colour {
        if self.num_edge_cols == 1 {
            0
        } else {
            col
        }
    }

    // -------------------------------------------------------------------------
    // Read-start bits (PCR duplicate suppression)
    // -------------------------------------------------------------------------

    #[inline]
    pub fn has_read_start_mt(&self, node: DbNode) -> bool {
        bitset_get(&self.readstrt, 2 * node.key as usize + node.orient as usize)
    }

    #[inline]
    pub fn set_read_start_mt(&self, node: DbNode) -> bool {
        bitset_test_and_set_mt(&self.readstrt, 2 * node.key as usize + node.orient as usize)
    }

    // -------------------------------------------------------------------------
    // Edges
    // -------------------------------------------------------------------------

    /// Record the edge `src → tgt` in colour `col`: the outgoing bit on
    /// `src` and the reciprocal incoming bit on `tgt`. Palindromic
    /// self-loops collapse onto a single bit. Thread safe.
    pub fn add_edge_mt(&self, col: Colour, src: DbNode, tgt: DbNode) {
        debug_assert!(col < self.num_edge_cols);
        let lhs_nuc = self.first_nuc(src);
        let rhs_nuc = self.last_nuc(tgt);
        edges_or_mt(
            &self.col_edges,
            self.edges_idx(src.key, col),
            edge_bit(rhs_nuc, src.orient),
        );
        edges_or_mt(
            &self.col_edges,
            self.edges_idx(tgt.key, col),
            edge_bit(lhs_nuc.complement(), tgt.orient.opposite()),
        );
    }

    /// Are both halves of the edge `src → tgt` present (in any colour)?
    pub fn check_edges(&self, src: DbNode, tgt: DbNode) -> bool {
        let lhs_nuc = self.first_nuc(src);
        let rhs_nuc = self.last_nuc(tgt);
        let src_edges = self.edges_union(src.key);
        let tgt_edges = self.edges_union(tgt.key);
        edges_has_edge(src_edges, rhs_nuc, src.orient)
            && edges_has_edge(tgt_edges, lhs_nuc.complement(), tgt.orient.opposite())
    }

    // -------------------------------------------------------------------------
    // Traversal
    // -------------------------------------------------------------------------

    /// Follow the `next_nuc` out-edge of a node. The edge must exist;
    /// the target kmer must be in the graph (checked in debug builds).
    pub fn next_node(
        &self,
        node_bkey: BinaryKmer,
        next_nuc: Nucleotide,
        orient: Orientation,
    ) -> DbNode {
        let bkmer = match orient {
            Orientation::Forward => node_bkey.left_shift_add(self.kmer_size, next_nuc),
            Orientation::Reverse => {
                node_bkey.right_shift_add(self.kmer_size, next_nuc.complement())
            }
        };
        let next = self
            .find(bkmer)
            .map(|n| DbNode::new(n.key, n.orient.xor(orient)));
        debug_assert!(next.is_some(), "next_node: edge leads nowhere");
        next.unwrap_or(DbNode::new(HASH_NOT_FOUND, Orientation::Forward))
    }

    /// Enumerate existing out-neighbours of the kmer in `orient`,
    /// filtered by `edges`. Returns (node, forward nucleotide) pairs.
    pub fn next_nodes(
        &self,
        node_bkey: BinaryKmer,
        orient: Orientation,
        edges: Edges,
    ) -> SmallVec<[(DbNode, Nucleotide); 4]> {
        let mut out = SmallVec::new();
        let oriented = edges_with_orientation(edges, orient);
        let shifted = match orient {
            Orientation::Forward => node_bkey.left_shift_one_base(self.kmer_size),
            Orientation::Reverse => node_bkey.right_shift_one_base(),
        };

        for nuc in NUCLEOTIDES {
            if oriented & (1 << nuc.code()) != 0 {
                let bkmer = match orient {
                    Orientation::Forward => shifted.set_last_nuc(nuc),
                    Orientation::Reverse => {
                        shifted.set_first_nuc(nuc.complement(), self.kmer_size)
                    }
                };
                if let Some(found) = self.find(bkmer) {
                    out.push((DbNode::new(found.key, found.orient.xor(orient)), nuc));
                } else {
                    debug_assert!(false, "edge bit set but neighbour kmer missing");
                }
            }
        }
        out
    }

    // -------------------------------------------------------------------------
    // Whole-graph passes
    // -------------------------------------------------------------------------

    /// Clear one colour's coverage, membership and edges.
    pub fn wipe_colour(&mut self, col: Colour) {
        info!("[graph] wiping colour {}", col);
        if self.num_edge_cols == 1 && self.num_of_cols > 1 {
            warn!("[graph] single edge plane: edges of all colours will be wiped");
        }
        self.ginfo[col] = GraphInfo::default();

        let cap = self.capacity() as usize;
        for hkey in 0..cap {
            self.col_covgs[self.covg_idx(hkey as HashKey, col)].store(0, Ordering::Relaxed);
            self.col_edges[self.edges_idx(hkey as HashKey, self.edge_col(col))]
                .store(0, Ordering::Relaxed);
            bitset_clear(&self.node_in_cols, self.in_col_bit(hkey as HashKey, col));
        }
    }

    /// Rebuild edges from k-1 overlaps: for every node and every
    /// missing out-edge, probe the hash table for the neighbour kmer
    /// and join the colours both nodes belong to. Requires one edge
    /// plane per colour.
    pub fn add_all_edges(&self) {
        assert_eq!(self.num_of_cols, self.num_edge_cols);
        self.ht.par_for_each(|hkey, node_bkey| {
            let iedges = (0..self.num_edge_cols)
                .map(|col| self.edges(hkey, col))
                .fold(0xffu8, |a, b| a & b);

            for orient in [Orientation::Forward, Orientation::Reverse] {
                let shifted = match orient {
                    Orientation::Forward => node_bkey.left_shift_one_base(self.kmer_size),
                    Orientation::Reverse => node_bkey.right_shift_one_base(),
                };
                for nuc in NUCLEOTIDES {
                    let edge = edge_bit(nuc, orient);
                    // Skip edges already present in every colour
                    if edge & iedges != 0 {
                        continue;
                    }
                    let bkmer = match orient {
                        Orientation::Forward => shifted.set_last_nuc(nuc),
                        Orientation::Reverse => {
                            shifted.set_first_nuc(nuc.complement(), self.kmer_size)
                        }
                    };
                    let bkey = bkmer.key(self.kmer_size);
                    let next = self.ht.find(bkey);
                    if next == HASH_NOT_FOUND {
                        continue;
                    }
                    for col in 0..self.num_edge_cols {
                        if self.node_has_col(hkey, col) && self.node_has_col(next, col) {
                            edges_or_mt(&self.col_edges, self.edges_idx(hkey, col), edge);
                        }
                    }
                }
            }
        });
    }

    /// Offline consistency check: every edge bit must lead to a stored
    /// neighbour and be reciprocated by that neighbour.
    pub fn healthcheck(&self) -> Result<()> {
        info!("[graph] running edge check...");
        let failed = AtomicU64::new(0);
        self.ht.par_for_each(|hkey, bkmer| {
            let edges = self.edges_union(hkey);
            for orient in [Orientation::Forward, Orientation::Reverse] {
                let neighbours = self.next_nodes(bkmer, orient, edges);
                let expect = edges_with_orientation(edges, orient).count_ones() as usize;
                if neighbours.len() != expect {
                    failed.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                let this = DbNode::new(hkey, orient);
                for &(next, _) in neighbours.iter() {
                    if !self.check_edges(this, next) {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        });
        let failures = failed.load(Ordering::Relaxed);
        ensure!(
            failures == 0,
            "Graph healthcheck failed: {} inconsistent node(s)",
            failures
        );
        Ok(())
    }

    /// Uniformly sample an assigned slot; `None` when the graph is
    /// empty.
    pub fn rand_node<R: Rng>(&self, rng: &mut R) -> Option<HashKey> {
        if self.ht.num_kmers() == 0 {
            warn!("[graph] no entries in hash table - cannot sample");
            return None;
        }
        let cap = self.capacity();
        loop {
            let hkey = rng.gen_range(0..cap);
            if self.node_assigned(hkey) {
                return Some(hkey);
            }
        }
    }

    /// Wipe everything back to the freshly allocated state.
    pub fn reset(&mut self) {
        self.ht.empty();
        for info in self.ginfo.iter_mut() {
            *info = GraphInfo::default();
        }
        for e in self.col_edges.iter_mut() {
            *e.get_mut() = 0;
        }
        for c in self.col_covgs.iter_mut() {
            *c.get_mut() = 0;
        }
        for w in self.node_in_cols.iter_mut() {
            *w.get_mut() = 0;
        }
        for w in self.readstrt.iter_mut() {
            *w.get_mut() = 0;
        }
        let cap = self.ht.capacity();
        let ncols = self.num_of_cols;
        let path_mem = self.pstore.mem_capacity();
        self.pstore = PathStore::new(cap, ncols, path_mem);
    }
}
