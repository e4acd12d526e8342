use anyhow::{ensure, Result};
use rayon::prelude::*;
use tracing::info;

use crate::graph::binary_kmer::BinaryKmer;
use crate::graph::db_graph::Graph;
use crate::graph::dna::Nucleotide;
use crate::graph::node::Colour;

/// Totals for one loading run.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoadingStats {
    pub num_seqs_loaded: u64,
    pub num_seqs_skipped: u64,
    pub total_bases_loaded: u64,
    pub num_kmers_loaded: u64,
    pub num_kmers_novel: u64,
}

impl LoadingStats {
    pub fn merge(&mut self, other: &LoadingStats) {
        self.num_seqs_loaded += other.num_seqs_loaded;
        self.num_seqs_skipped += other.num_seqs_skipped;
        self.total_bases_loaded += other.total_bases_loaded;
        self.num_kmers_loaded += other.num_kmers_loaded;
        self.num_kmers_novel += other.num_kmers_novel;
    }
}

/// Insert every kmer of an all-ACGT sequence into colour `colour`,
/// wiring the edges between consecutive kmers. Thread safe. Returns
/// the number of kmers that were new to the graph.
pub fn build_from_seq_mt(graph: &Graph, colour: Colour, seq: &[u8]) -> Result<u64> {
    let kmer_size = graph.kmer_size;
    ensure!(
        seq.len() >= kmer_size,
        "Sequence shorter than kmer size: {} < {}",
        seq.len(),
        kmer_size
    );
    let edge_col = graph.edge_col(colour);
    let mut num_novel = 0u64;

    let mut bkmer = BinaryKmer::from_seq(seq, kmer_size)?;
    let (mut prev, found) = graph.find_or_add_node_mt(bkmer)?;
    graph.update_node_mt(prev, colour);
    num_novel += u64::from(!found);

    for &b in &seq[kmer_size..] {
        let Some(nuc) = Nucleotide::from_char(b) else {
            anyhow::bail!("Invalid base '{}' in sequence", b as char);
        };
        bkmer = bkmer.left_shift_add(kmer_size, nuc);
        let (curr, found) = graph.find_or_add_node_mt(bkmer)?;
        graph.update_node_mt(curr, colour);
        graph.add_edge_mt(edge_col, prev, curr);
        num_novel += u64::from(!found);
        prev = curr;
    }

    Ok(num_novel)
}

/// Load the ACGT runs of one read, splitting on non-ACGT bytes.
pub fn load_read_mt(graph: &Graph, colour: Colour, seq: &[u8], stats: &mut LoadingStats) -> Result<()> {
    let kmer_size = graph.kmer_size;
    let mut start = 0usize;
    let mut loaded = false;

    while start < seq.len() {
        // Next run of plain bases
        while start < seq.len() && Nucleotide::from_char(seq[start]).is_none() {
            start += 1;
        }
        let mut end = start;
        while end < seq.len() && Nucleotide::from_char(seq[end]).is_some() {
            end += 1;
        }
        if end - start >= kmer_size {
            let novel = build_from_seq_mt(graph, colour, &seq[start..end])?;
            stats.total_bases_loaded += (end - start) as u64;
            stats.num_kmers_loaded += (end - start + 1 - kmer_size) as u64;
            stats.num_kmers_novel += novel;
            loaded = true;
        }
        start = end;
    }

    if loaded {
        stats.num_seqs_loaded += 1;
    } else {
        stats.num_seqs_skipped += 1;
    }
    Ok(())
}

/// Is this read's start kmer novel for duplicate suppression purposes?
/// The first kmer of each read is fingerprinted by its `(node, strand)`
/// read-start bit: a read whose start was seen before is treated as a
/// PCR duplicate and skipped.
pub fn seq_is_novel_mt(graph: &Graph, seq: &[u8]) -> Result<bool> {
    let kmer_size = graph.kmer_size;
    if seq.len() < kmer_size {
        return Ok(false);
    }
    let Ok(bkmer) = BinaryKmer::from_seq(&seq[..kmer_size], kmer_size) else {
        // Reads starting with Ns cannot be fingerprinted; keep them
        return Ok(true);
    };
    let (node, _) = graph.find_or_add_node_mt(bkmer)?;
    Ok(!graph.set_read_start_mt(node))
}

/// Fan a batch of sequences over the rayon pool, all into one colour.
pub fn load_seqs_par(
    graph: &Graph,
    colour: Colour,
    seqs: &[Vec<u8>],
    remove_dups: bool,
) -> Result<LoadingStats> {
    let stats = seqs
        .par_iter()
        .map(|seq| -> Result<LoadingStats> {
            let mut stats = LoadingStats::default();
            if remove_dups && !seq_is_novel_mt(graph, seq)? {
                stats.num_seqs_skipped += 1;
                return Ok(stats);
            }
            load_read_mt(graph, colour, seq, &mut stats)?;
            Ok(stats)
        })
        .try_reduce(LoadingStats::default, |mut a, b| {
            a.merge(&b);
            Ok(a)
        })?;

    info!(
        "[load] colour {}: {} seqs, {} bases, {} kmers ({} novel)",
        colour,
        stats.num_seqs_loaded,
        stats.total_bases_loaded,
        stats.num_kmers_loaded,
        stats.num_kmers_novel
    );
    Ok(stats)
}
