use anyhow::Result;
use fxhash::FxHashMap;

use crate::graph::alignment::DbAlignment;
use crate::graph::db_graph::Graph;
use crate::graph::graph_walker::GraphWalker;
use crate::graph::node::{edges_indegree, edges_outdegree, Colour, DbNode};
use crate::graph::packed_path::{pack_seq, MAX_PATHLEN};
use crate::graph::repeat_walker::RepeatWalker;

/// Bloom width for the per-worker repeat walkers (4MB each).
const RPT_WALKER_NBITS: u32 = 22;

/// Knobs for turning a noisy alignment into corrected walks.
#[derive(Debug, Clone, Copy)]
pub struct CorrectAlnParam {
    /// Graph colour walked and path colour consulted.
    pub ctxcol: Colour,
    pub ctpcol: Colour,
    /// Permitted mate-pair insert range (nodes bridged at the mate
    /// boundary).
    pub ins_gap_min: u32,
    pub ins_gap_max: u32,
    /// Maximum number of nodes used to prime the graph walker.
    pub max_context: u32,
    /// A bridged sequence gap of expected size `x` may deviate by up to
    /// `x * gap_variance + gap_wiggle` nodes.
    pub gap_wiggle: u32,
    pub gap_variance: f32,
    /// Walk from one side only (conservative) instead of both.
    pub one_way_gap_traverse: bool,
    /// Veto bridges whose path hints contradict the remaining read.
    pub use_end_check: bool,
}

impl Default for CorrectAlnParam {
    fn default() -> CorrectAlnParam {
        CorrectAlnParam {
            ctxcol: 0,
            ctpcol: 0,
            ins_gap_min: 0,
            ins_gap_max: 500,
            max_context: 200,
            gap_wiggle: 5,
            gap_variance: 0.1,
            one_way_gap_traverse: true,
            use_end_check: true,
        }
    }
}

/// Outcome counters; walker failures are normal terminations, not
/// errors, so they land here rather than in a `Result`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CorrectAlnStats {
    pub gap_attempts: u64,
    pub gaps_bridged: u64,
    pub mate_gap_attempts: u64,
    pub mate_gaps_bridged: u64,
    pub walk_failures: u64,
    pub gap_len_rejected: u64,
    pub end_check_vetoes: u64,
}

impl CorrectAlnStats {
    pub fn merge(&mut self, other: &CorrectAlnStats) {
        self.gap_attempts += other.gap_attempts;
        self.gaps_bridged += other.gaps_bridged;
        self.mate_gap_attempts += other.mate_gap_attempts;
        self.mate_gaps_bridged += other.mate_gaps_bridged;
        self.walk_failures += other.walk_failures;
        self.gap_len_rejected += other.gap_len_rejected;
        self.end_check_vetoes += other.end_check_vetoes;
    }
}

/// Streams gap-filled contigs out of one alignment at a time.
///
/// Workers are allocated once per thread and reused: the repeat-walker
/// bitsets are sized to the graph and cleared with `fast_clear` between
/// attempts.
pub struct CorrectAlnWorker<'g> {
    graph: &'g Graph,
    params: CorrectAlnParam,
    rptwlk: RepeatWalker,
    rptwlk2: RepeatWalker,

    // start_idx  gap_idx  end_idx
    // v..........v........v
    // emitted contig covers [start_idx..end_idx); on a failed gap the
    // next call resumes at gap_idx
    start_idx: usize,
    prev_start_idx: usize,
    end_idx: usize,

    contig: Vec<DbNode>,
    pub gapstats: CorrectAlnStats,
}

impl<'g> CorrectAlnWorker<'g> {
    pub fn new(graph: &'g Graph) -> CorrectAlnWorker<'g> {
        CorrectAlnWorker {
            graph,
            params: CorrectAlnParam::default(),
            rptwlk: RepeatWalker::new(graph.capacity(), RPT_WALKER_NBITS),
            rptwlk2: RepeatWalker::new(graph.capacity(), RPT_WALKER_NBITS),
            start_idx: 0,
            prev_start_idx: 0,
            end_idx: 0,
            contig: Vec::new(),
            gapstats: CorrectAlnStats::default(),
        }
    }

    /// Reset per-alignment state. Call once before streaming contigs
    /// for a new alignment.
    pub fn init(&mut self, params: CorrectAlnParam) {
        self.params = params;
        self.start_idx = 0;
        self.prev_start_idx = 0;
        self.end_idx = 0;
    }

    /// Alignment index where the last emitted contig began.
    pub fn contig_start_idx(&self) -> usize {
        self.prev_start_idx
    }

    /// Alignment index one past the last emitted contig.
    pub fn contig_end_idx(&self) -> usize {
        self.end_idx
    }

    /// The next gap-filled contig of `aln`, or `None` once the
    /// alignment is exhausted. `aln` must be the alignment this worker
    /// was initialised for.
    pub fn next_contig(&mut self, aln: &DbAlignment) -> Option<Vec<DbNode>> {
        let n = aln.len();
        if self.start_idx >= n {
            return None;
        }
        self.prev_start_idx = self.start_idx;
        self.contig.clear();
        self.contig.push(aln.nodes[self.start_idx]);

        let mut idx = self.start_idx;
        loop {
            // Extend over the gap-free island
            let mut gap_idx = idx + 1;
            while gap_idx < n && aln.gaps[gap_idx] == 0 && !aln.is_mate_start(gap_idx) {
                self.contig.push(aln.nodes[gap_idx]);
                gap_idx += 1;
            }

            if gap_idx == n {
                self.start_idx = n;
                self.end_idx = n;
                return Some(self.contig.clone());
            }

            let is_mate = aln.is_mate_start(gap_idx);
            match self.traverse_gap(aln, gap_idx, is_mate) {
                Some(bridge) => {
                    self.contig.extend_from_slice(&bridge);
                    self.contig.push(aln.nodes[gap_idx]);
                    idx = gap_idx;
                }
                None => {
                    self.start_idx = gap_idx;
                    self.end_idx = gap_idx;
                    return Some(self.contig.clone());
                }
            }
        }
    }

    /// Admissible bridge length for a gap with `expected` missing nodes.
    fn gap_bounds(&self, expected: u32, is_mate: bool) -> (u32, u32) {
        if is_mate {
            (self.params.ins_gap_min, self.params.ins_gap_max)
        } else {
            let leeway =
                (expected as f32 * self.params.gap_variance) as u32 + self.params.gap_wiggle;
            (expected.saturating_sub(leeway), expected + leeway)
        }
    }

    /// Try to walk across the gap before `aln.nodes[gap_idx]`.
    /// Returns the interior bridge nodes on success.
    fn traverse_gap(
        &mut self,
        aln: &DbAlignment,
        gap_idx: usize,
        is_mate: bool,
    ) -> Option<Vec<DbNode>> {
        self.gapstats.gap_attempts += 1;
        if is_mate {
            self.gapstats.mate_gap_attempts += 1;
        }

        let (min_len, max_len) = self.gap_bounds(aln.gaps[gap_idx], is_mate);
        let max_steps = (max_len as usize) + self.graph.kmer_size;
        let target = aln.nodes[gap_idx];

        let bridge = if self.params.one_way_gap_traverse {
            self.walk_one_way(aln, gap_idx, target, max_steps)
        } else {
            self.walk_two_way(aln, gap_idx, target, max_steps)
        };

        let Some(bridge) = bridge else {
            self.gapstats.walk_failures += 1;
            return None;
        };

        let len = bridge.len() as u32;
        if len < min_len || len > max_len {
            self.gapstats.gap_len_rejected += 1;
            return None;
        }

        self.gapstats.gaps_bridged += 1;
        if is_mate {
            self.gapstats.mate_gaps_bridged += 1;
        }
        Some(bridge)
    }

    /// Prime at the contig walked so far, step forward until the first
    /// post-gap node appears or the step cap / repeat walker stops us.
    fn walk_one_way(
        &mut self,
        aln: &DbAlignment,
        gap_idx: usize,
        target: DbNode,
        max_steps: usize,
    ) -> Option<Vec<DbNode>> {
        let params = self.params;
        let mut wlk = GraphWalker::prime(
            self.graph,
            &self.contig,
            params.max_context as usize,
            true,
            params.ctxcol,
            params.ctpcol,
        );

        let mut visited: Vec<DbNode> = Vec::new();
        let mut reached = false;
        while visited.len() <= max_steps {
            let Some(node) = wlk.next() else { break };
            if !self.rptwlk.attempt_traverse(&wlk) {
                break;
            }
            visited.push(node);
            if node == target {
                reached = true;
                break;
            }
        }

        let mut ok = reached;
        if ok && params.use_end_check {
            ok = end_check_passes(self.graph, &mut wlk, aln, gap_idx);
            if !ok {
                self.gapstats.end_check_vetoes += 1;
            }
        }

        wlk.finish();
        self.rptwlk.fast_clear(&visited);

        if ok {
            visited.pop(); // drop the target itself
            Some(visited)
        } else {
            None
        }
    }

    /// Liberal mode: walk from both sides and accept when the tips
    /// meet on an interior node.
    fn walk_two_way(
        &mut self,
        aln: &DbAlignment,
        gap_idx: usize,
        target: DbNode,
        max_steps: usize,
    ) -> Option<Vec<DbNode>> {
        let params = self.params;
        let graph = self.graph;

        let mut fwd = GraphWalker::prime(
            graph,
            &self.contig,
            params.max_context as usize,
            true,
            params.ctxcol,
            params.ctpcol,
        );
        // Prime backwards on the contiguous island that starts at the
        // target; later islands are separated by gaps of their own.
        let mut run_end = gap_idx + 1;
        while run_end < aln.len() && aln.gaps[run_end] == 0 && !aln.is_mate_start(run_end) {
            run_end += 1;
        }
        let mut bwd = GraphWalker::prime(
            graph,
            &aln.nodes[gap_idx..run_end],
            params.max_context as usize,
            false,
            params.ctxcol,
            params.ctpcol,
        );

        let mut fwd_nodes: Vec<DbNode> = Vec::new();
        let mut bwd_nodes: Vec<DbNode> = Vec::new();
        // node (forward strand) -> number of backward steps taken to it
        let mut bwd_seen: FxHashMap<DbNode, usize> = FxHashMap::default();
        bwd_seen.insert(target, 0);

        let mut join: Option<(usize, usize)> = None; // (fwd steps, bwd steps)
        while join.is_none() && fwd_nodes.len() + bwd_nodes.len() <= 2 * max_steps {
            // Forward step
            let Some(node) = fwd.next() else { break };
            if !self.rptwlk.attempt_traverse(&fwd) {
                break;
            }
            fwd_nodes.push(node);
            if let Some(&bsteps) = bwd_seen.get(&node) {
                join = Some((fwd_nodes.len(), bsteps));
                break;
            }

            // Backward step
            if let Some(bnode) = bwd.next() {
                if !self.rptwlk2.attempt_traverse(&bwd) {
                    break;
                }
                bwd_nodes.push(bnode);
                bwd_seen.insert(bnode.flipped(), bwd_nodes.len());
                if fwd_nodes.last() == Some(&bnode.flipped()) {
                    join = Some((fwd_nodes.len(), bwd_nodes.len()));
                    break;
                }
            }
        }

        fwd.finish();
        bwd.finish();
        self.rptwlk.fast_clear(&fwd_nodes);
        self.rptwlk2.fast_clear(&bwd_nodes);

        let (fsteps, bsteps) = join?;
        // fwd_nodes[..fsteps] ends on the meeting node; the remaining
        // backward nodes lead from there to the target, flipped and in
        // reverse order. The meeting node appears once; `target` is
        // excluded (it is re-appended from the alignment).
        let mut bridge = fwd_nodes[..fsteps].to_vec();
        for i in (1..bsteps).rev() {
            bridge.push(bwd_nodes[i - 1].flipped());
        }
        if bridge.last() == Some(&target) {
            bridge.pop();
        }
        Some(bridge)
    }
}

/// Replay the aligned nodes just past the bridged gap against the
/// walker's surviving path hints; a contradiction vetoes the bridge.
fn end_check_passes(
    graph: &Graph,
    wlk: &mut GraphWalker,
    aln: &DbAlignment,
    gap_idx: usize,
) -> bool {
    let (ctxcol, _) = wlk.colour_context();
    let mut idx = gap_idx + 1;
    while idx < aln.len() && aln.gaps[idx] == 0 && !aln.is_mate_start(idx) {
        let expected = aln.nodes[idx];
        let nuc = graph.last_nuc(expected);
        if !wlk.agrees_with(nuc) {
            return false;
        }
        // Without the edge we cannot replay further; accept what we saw
        let edges = graph.edges(wlk.node.key, graph.edge_col(ctxcol));
        if !crate::graph::node::edges_has_edge(edges, nuc, wlk.node.orient) {
            break;
        }
        wlk.jump(nuc);
        if wlk.node != expected {
            return false;
        }
        idx += 1;
    }
    true
}

// -----------------------------------------------------------------------------
// Path generation
// -----------------------------------------------------------------------------

/// Register the branch choices of a corrected walk into the path store.
///
/// For each direction of the contig, a link record is deposited at the
/// first node and at every node a walker could newly converge on (k-1
/// overlap in-degree ≥ 2). The record carries the bases of all
/// subsequent nodes up to the last branching point, so a walker primed
/// anywhere on the contig can re-make the same choices.
///
/// Returns the number of records added (deduplicated records that only
/// gained a colour bit do not count).
pub fn generate_paths_from_contig(
    graph: &Graph,
    nodes: &[DbNode],
    ctxcol: Colour,
    ctpcol: Colour,
) -> Result<u64> {
    let mut added = 0;
    added += generate_one_direction(graph, nodes.iter().copied(), nodes.len(), ctxcol, ctpcol)?;
    added += generate_one_direction(
        graph,
        nodes.iter().rev().map(|n| n.flipped()),
        nodes.len(),
        ctxcol,
        ctpcol,
    )?;
    Ok(added)
}

fn generate_one_direction(
    graph: &Graph,
    nodes: impl Iterator<Item = DbNode>,
    len: usize,
    ctxcol: Colour,
    ctpcol: Colour,
) -> Result<u64> {
    if len < 2 {
        return Ok(0);
    }
    let nodes: Vec<DbNode> = nodes.collect();
    let edge_col = graph.edge_col(ctxcol);

    // The base consumed stepping onto each node
    let step_nucs: Vec<_> = nodes[1..].iter().map(|&n| graph.last_nuc(n)).collect();

    // Last index whose out-edge choice is worth recording
    let last_fork = (0..len - 1)
        .rev()
        .find(|&i| edges_outdegree(graph.edges(nodes[i].key, edge_col), nodes[i].orient) >= 2);
    let Some(last_fork) = last_fork else {
        return Ok(0);
    };

    let mut added = 0;
    for s in 0..=last_fork {
        let converges =
            edges_indegree(graph.edges(nodes[s].key, edge_col), nodes[s].orient) >= 2;
        if s != 0 && !converges {
            continue;
        }
        let plen = (last_fork - s + 1) as u32;
        if plen > MAX_PATHLEN {
            continue;
        }
        let packed = pack_seq(&step_nucs[s..s + plen as usize]);
        let (_, new) = graph.pstore.find_or_add_mt(
            nodes[s].key,
            ctpcol,
            nodes[s].orient,
            plen,
            &packed,
        )?;
        added += u64::from(new);
    }
    Ok(added)
}
