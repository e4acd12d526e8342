use crate::graph::binary_kmer::BinaryKmer;
use crate::graph::db_graph::Graph;
use crate::graph::node::DbNode;

/// A read matched against the graph kmer by kmer: the islands of
/// aligned nodes plus how many read bases fall in between them.
///
/// `gaps[i]` counts the bases between matched kmer `i-1` and matched
/// kmer `i` (0 when adjacent); `gaps[0]` is the unmatched prefix of the
/// read. `r1enderr` is the unmatched suffix of read one.
#[derive(Debug, Default)]
pub struct DbAlignment {
    pub nodes: Vec<DbNode>,
    pub gaps: Vec<u32>,
    pub r1enderr: u32,
    pub seq_len: usize,
    /// Index into `nodes` where the mate read begins, if one was given.
    pub r2strtidx: Option<usize>,
}

/// Mask out bases the aligner must not anchor on: non-ACGT bytes,
/// low-quality calls, and bases inside homopolymer runs of
/// `hp_cutoff` or longer (0 disables the check).
fn base_mask(seq: &[u8], quals: Option<&[u8]>, fq_cutoff: u8, q_offset: u8, hp_cutoff: u8) -> Vec<bool> {
    let mut mask: Vec<bool> = seq
        .iter()
        .map(|&b| crate::graph::dna::Nucleotide::from_char(b).is_some())
        .collect();

    if let Some(quals) = quals {
        if fq_cutoff > 0 {
            for (m, &q) in mask.iter_mut().zip(quals) {
                if q.saturating_sub(q_offset) < fq_cutoff {
                    *m = false;
                }
            }
        }
    }

    if hp_cutoff > 0 {
        let mut run_start = 0;
        for i in 1..=seq.len() {
            if i == seq.len() || !seq[i].eq_ignore_ascii_case(&seq[run_start]) {
                if i - run_start >= hp_cutoff as usize {
                    mask[run_start..i].fill(false);
                }
                run_start = i;
            }
        }
    }

    mask
}

impl DbAlignment {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Does the matched node at `idx` start the mate read?
    pub fn is_mate_start(&self, idx: usize) -> bool {
        self.r2strtidx == Some(idx)
    }

    /// Align a single read sequence against the graph.
    pub fn from_seq(
        graph: &Graph,
        seq: &[u8],
        quals: Option<&[u8]>,
        fq_cutoff: u8,
        q_offset: u8,
        hp_cutoff: u8,
    ) -> DbAlignment {
        let mut aln = DbAlignment::default();
        aln.append_read(graph, seq, quals, fq_cutoff, q_offset, hp_cutoff);
        aln.r1enderr = aln.trailing_err(graph, seq.len(), 0);
        aln.seq_len = seq.len();
        aln
    }

    /// Align a read pair. The caller orients the mate so both reads
    /// run along the same strand (FF).
    #[allow(clippy::too_many_arguments)]
    pub fn from_read_pair(
        graph: &Graph,
        r1: &[u8],
        r2: &[u8],
        quals: Option<(&[u8], &[u8])>,
        fq_cutoff: u8,
        q_offset: u8,
        hp_cutoff: u8,
    ) -> DbAlignment {
        let (q1, q2) = match quals {
            Some((a, b)) => (Some(a), Some(b)),
            None => (None, None),
        };
        let mut aln = DbAlignment::default();
        aln.append_read(graph, r1, q1, fq_cutoff, q_offset, hp_cutoff);
        aln.r1enderr = aln.trailing_err(graph, r1.len(), 0);

        aln.r2strtidx = Some(aln.nodes.len());
        aln.append_read(graph, r2, q2, fq_cutoff, q_offset, hp_cutoff);

        aln.seq_len = r1.len() + r2.len();
        aln
    }

    /// Unmatched tail length of the read spanning `nodes[from..]`.
    fn trailing_err(&self, graph: &Graph, read_len: usize, read_node_offset: usize) -> u32 {
        if self.nodes.len() <= read_node_offset {
            return read_len as u32;
        }
        // last matched kmer start within this read
        let matched: u32 = self.gaps[read_node_offset..]
            .iter()
            .map(|&g| g + 1)
            .sum::<u32>()
            + graph.kmer_size as u32
            - 1;
        read_len as u32 - matched.min(read_len as u32)
    }

    fn append_read(
        &mut self,
        graph: &Graph,
        seq: &[u8],
        quals: Option<&[u8]>,
        fq_cutoff: u8,
        q_offset: u8,
        hp_cutoff: u8,
    ) {
        let k = graph.kmer_size;
        if seq.len() < k {
            return;
        }
        let mask = base_mask(seq, quals, fq_cutoff, q_offset, hp_cutoff);

        let mut prev_pos: Option<usize> = None;
        let mut bkmer: Option<BinaryKmer> = None;

        for pos in 0..=seq.len() - k {
            // Roll the kmer forward where possible, rebuild after a break
            let next = match bkmer {
                Some(b) if mask[pos + k - 1] => {
                    crate::graph::dna::Nucleotide::from_char(seq[pos + k - 1])
                        .map(|nuc| b.left_shift_add(k, nuc))
                }
                _ => {
                    if mask[pos..pos + k].iter().all(|&m| m) {
                        BinaryKmer::from_seq(&seq[pos..pos + k], k).ok()
                    } else {
                        None
                    }
                }
            };
            bkmer = next;

            let Some(b) = bkmer else { continue };
            if let Some(node) = graph.find(b) {
                let gap = match prev_pos {
                    Some(p) => (pos - p - 1) as u32,
                    None => pos as u32,
                };
                self.nodes.push(node);
                self.gaps.push(gap);
                prev_pos = Some(pos);
            }
        }
    }
}
