use std::hash::Hasher;

use fxhash::FxHasher;
use smallvec::SmallVec;

use crate::graph::binary_kmer::BinaryKmer;
use crate::graph::db_graph::Graph;
use crate::graph::dna::Nucleotide;
use crate::graph::node::{Colour, DbNode};
use crate::graph::packed_path::{PathIndex, PATH_NULL};

/// Cursor into one link record that is still consistent with the walk.
#[derive(Debug, Clone, Copy)]
struct FollowPath {
    pindex: PathIndex,
    pos: u32,
    plen: u32,
}

/// Why [`GraphWalker::next`] stopped, for reporting.
#[derive(Debug, Default, Clone, Copy)]
pub struct GraphWalkerStats {
    pub steps: u64,
    pub paths_picked_up: u64,
    pub branches_resolved: u64,
    pub dead_ends: u64,
    pub ambiguous_stops: u64,
}

/// Single-path traversal guided by the path store.
///
/// The walker follows unique out-edges on its own; at a multi-way
/// branch the link records picked up along the way vote on the next
/// base, and the walk ends unless exactly one base wins.
pub struct GraphWalker<'g> {
    graph: &'g Graph,
    pub node: DbNode,
    /// Canonical kmer stored for `node.key`.
    pub bkey: BinaryKmer,
    ctxcol: Colour,
    ctpcol: Colour,
    paths: Vec<FollowPath>,
    pub stats: GraphWalkerStats,
}

impl<'g> GraphWalker<'g> {
    /// Seed the walker at `anchor` with up to `max_context` nodes of
    /// surrounding contig. Going forward the context is the block
    /// *ending* at the last node of `nodes`; going backward the block
    /// starting at the first node, walked on the opposite strand.
    /// Walking the seed picks up every link record that starts inside
    /// it and outlives the bases already consumed.
    pub fn prime(
        graph: &'g Graph,
        nodes: &[DbNode],
        max_context: usize,
        go_forward: bool,
        ctxcol: Colour,
        ctpcol: Colour,
    ) -> GraphWalker<'g> {
        assert!(!nodes.is_empty());
        let context = max_context.max(1).min(nodes.len());

        let seed: SmallVec<[DbNode; 32]> = if go_forward {
            nodes[nodes.len() - context..].iter().copied().collect()
        } else {
            nodes[..context].iter().rev().map(|n| n.flipped()).collect()
        };

        let mut wlk = GraphWalker {
            graph,
            node: seed[0],
            bkey: graph.bkmer(seed[0].key),
            ctxcol,
            ctpcol,
            paths: Vec::new(),
            stats: GraphWalkerStats::default(),
        };
        wlk.pick_up_paths();

        for &node in &seed[1..] {
            let nuc = graph.last_nuc(node);
            wlk.force_step(node, nuc);
        }
        wlk
    }

    #[inline]
    pub fn colour_context(&self) -> (Colour, Colour) {
        (self.ctxcol, self.ctpcol)
    }

    /// Load link records attached to the current (node, orientation) in
    /// the walker's path colour, starting each at offset zero.
    fn pick_up_paths(&mut self) {
        let mut pindex = self.graph.pstore.head(self.node.key);
        while pindex != PATH_NULL {
            let rec = self.graph.pstore.record(pindex);
            if rec.orient == self.node.orient
                && self.graph.pstore.record_in_colour(pindex, self.ctpcol)
            {
                self.paths.push(FollowPath {
                    pindex,
                    pos: 0,
                    plen: rec.plen,
                });
                self.stats.paths_picked_up += 1;
            }
            pindex = rec.prev;
        }
    }

    /// Move onto `node`, consuming `nuc` from every active path and
    /// dropping the ones that disagree, then pick up the node's own
    /// records.
    fn force_step(&mut self, node: DbNode, nuc: Nucleotide) {
        let pstore = &self.graph.pstore;
        self.paths.retain_mut(|p| {
            if pstore.record_seq_nuc(p.pindex, p.pos) != nuc {
                return false;
            }
            p.pos += 1;
            p.pos < p.plen
        });
        self.node = node;
        self.bkey = self.graph.bkmer(node.key);
        self.stats.steps += 1;
        self.pick_up_paths();
    }

    /// Tally active-path votes for the next base.
    fn path_votes(&self) -> [u32; 4] {
        let mut votes = [0u32; 4];
        for p in &self.paths {
            votes[self.graph.pstore.record_seq_nuc(p.pindex, p.pos).code() as usize] += 1;
        }
        votes
    }

    /// The out-neighbours the walker may consider from the current
    /// node, respecting the graph colour context.
    fn neighbours(&self) -> SmallVec<[(DbNode, Nucleotide); 4]> {
        let graph = self.graph;
        let edges = graph.edges(self.node.key, graph.edge_col(self.ctxcol));
        let mut out = graph.next_nodes(self.bkey, self.node.orient, edges);
        // With one shared edge plane, restrict to nodes in our colour
        if graph.num_edge_cols == 1 && graph.num_of_cols > 1 {
            out.retain(|(node, _)| graph.node_has_col(node.key, self.ctxcol));
        }
        out
    }

    /// Would the walker's path consensus object to taking `nuc` next?
    /// Used by the corrector's end check when replaying aligned nodes.
    pub fn agrees_with(&self, nuc: Nucleotide) -> bool {
        let votes = self.path_votes();
        match unique_winner(&votes) {
            Some(winner) => winner == nuc,
            None => true,
        }
    }

    /// Take one step. `None` ends the walk: dead end, or a branch the
    /// active paths cannot disambiguate.
    pub fn next(&mut self) -> Option<DbNode> {
        let neighbours = self.neighbours();
        let (node, nuc) = match neighbours.len() {
            0 => {
                self.stats.dead_ends += 1;
                return None;
            }
            1 => neighbours[0],
            _ => {
                let votes = self.path_votes();
                let hit = unique_winner(&votes)
                    .and_then(|winner| neighbours.iter().find(|(_, nuc)| *nuc == winner));
                match hit {
                    Some(&choice) => {
                        self.stats.branches_resolved += 1;
                        choice
                    }
                    None => {
                        self.stats.ambiguous_stops += 1;
                        return None;
                    }
                }
            }
        };
        self.force_step(node, nuc);
        Some(node)
    }

    /// Follow `nuc` out of the current node regardless of votes.
    /// The caller asserts the edge exists (aligned contigs do).
    pub fn jump(&mut self, nuc: Nucleotide) {
        let next = self
            .graph
            .next_node(self.bkey, nuc, self.node.orient);
        self.force_step(next, nuc);
    }

    /// Stable fingerprint of the walker's wider context at `bkmer`,
    /// fed to the repeat walker's bloom filter.
    pub fn fasthash(&self, bkmer: BinaryKmer) -> u64 {
        let mut hasher = FxHasher::default();
        hasher.write_u64(bkmer.0);
        hasher.write_usize(self.paths.len());
        for p in &self.paths {
            hasher.write_u64(p.pindex);
            hasher.write_u32(p.pos);
        }
        hasher.finish()
    }

    /// Number of link records still guiding the walk.
    pub fn num_active_paths(&self) -> usize {
        self.paths.len()
    }

    /// Release every path cursor.
    pub fn finish(&mut self) {
        self.paths.clear();
    }
}

/// Record the ambiguity rule in one place: a base wins only when it has
/// more votes than every other base and at least one vote. Ties fail.
fn unique_winner(votes: &[u32; 4]) -> Option<Nucleotide> {
    let mut best = 0usize;
    for i in 1..4 {
        if votes[i] > votes[best] {
            best = i;
        }
    }
    if votes[best] == 0 {
        return None;
    }
    let ties = votes.iter().filter(|&&v| v == votes[best]).count();
    if ties > 1 {
        None
    } else {
        Some(Nucleotide::from_code(best as u8))
    }
}
