use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::graph::binary_kmer::BinaryKmer;
use crate::graph::dna::Nucleotide;

/// Index of a slot in the hash table.
pub type HashKey = u64;

/// Sentinel returned by lookups when a kmer is absent.
pub const HASH_NOT_FOUND: HashKey = u64::MAX;

/// Sample index. A graph holds `num_of_cols` colours.
pub type Colour = usize;

/// Per-colour coverage counter, saturating at `u32::MAX`.
pub type Covg = u32;

/// Which strand of an undirected kmer a node refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Orientation {
    Forward = 0,
    Reverse = 1,
}

impl Orientation {
    #[inline]
    pub fn opposite(self) -> Orientation {
        match self {
            Orientation::Forward => Orientation::Reverse,
            Orientation::Reverse => Orientation::Forward,
        }
    }

    /// XOR two orientations: flipping twice is the identity.
    #[inline]
    pub fn xor(self, other: Orientation) -> Orientation {
        if self == other {
            Orientation::Forward
        } else {
            Orientation::Reverse
        }
    }

    #[inline]
    pub fn from_bit(bit: u8) -> Orientation {
        if bit == 0 {
            Orientation::Forward
        } else {
            Orientation::Reverse
        }
    }
}

/// A directed incarnation of a stored (canonical) kmer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DbNode {
    pub key: HashKey,
    pub orient: Orientation,
}

impl DbNode {
    #[inline]
    pub fn new(key: HashKey, orient: Orientation) -> DbNode {
        DbNode { key, orient }
    }

    /// The same kmer viewed from the other strand.
    #[inline]
    pub fn flipped(self) -> DbNode {
        DbNode {
            key: self.key,
            orient: self.orient.opposite(),
        }
    }
}

/// Orientation of `bkmer` relative to its canonical key.
#[inline]
pub fn bkmer_orientation(bkmer: BinaryKmer, bkey: BinaryKmer) -> Orientation {
    if bkmer == bkey {
        Orientation::Forward
    } else {
        Orientation::Reverse
    }
}

/// Oriented view of a stored key: the key itself going forward, its
/// reverse complement going reverse.
#[inline]
pub fn oriented_bkmer(bkey: BinaryKmer, orient: Orientation, kmer_size: usize) -> BinaryKmer {
    match orient {
        Orientation::Forward => bkey,
        Orientation::Reverse => bkey.reverse_complement(kmer_size),
    }
}

// -----------------------------------------------------------------------------
// Edges byte
// -----------------------------------------------------------------------------

/// One byte of edge bits: bits 0..3 are forward-outgoing {A,C,G,T},
/// bits 4..7 are reverse-outgoing (equivalently forward-incoming).
pub type Edges = u8;

#[inline]
pub fn edge_bit(nuc: Nucleotide, orient: Orientation) -> Edges {
    1u8 << (nuc.code() + 4 * orient as u8)
}

#[inline]
pub fn edges_has_edge(edges: Edges, nuc: Nucleotide, orient: Orientation) -> bool {
    edges & edge_bit(nuc, orient) != 0
}

/// Keep only the four bits outgoing in `orient`, shifted down to 0..3.
#[inline]
pub fn edges_with_orientation(edges: Edges, orient: Orientation) -> Edges {
    (edges >> (4 * orient as u8)) & 0xf
}

#[inline]
pub fn edges_outdegree(edges: Edges, orient: Orientation) -> u32 {
    edges_with_orientation(edges, orient).count_ones()
}

#[inline]
pub fn edges_indegree(edges: Edges, orient: Orientation) -> u32 {
    edges_with_orientation(edges, orient.opposite()).count_ones()
}

/// Render an edges byte in the `.ctx` text style: lower case for
/// incoming (reverse), upper case for outgoing (forward), "." padding.
/// e.g. "a.g....T"
pub fn edges_to_string(edges: Edges) -> String {
    let mut s = String::with_capacity(8);
    for i in 0..4u8 {
        if edges & (1 << (i + 4)) != 0 {
            s.push(b"acgt"[i as usize] as char);
        } else {
            s.push('.');
        }
    }
    for i in 0..4u8 {
        if edges & (1 << i) != 0 {
            s.push(b"ACGT"[i as usize] as char);
        } else {
            s.push('.');
        }
    }
    s
}

// -----------------------------------------------------------------------------
// Atomic plane helpers
// -----------------------------------------------------------------------------

/// Words needed to hold `nbits` bits.
#[inline]
pub fn bits_to_words(nbits: usize) -> usize {
    (nbits + 63) / 64
}

#[inline]
pub fn bitset_get(words: &[AtomicU64], bit: usize) -> bool {
    words[bit / 64].load(Ordering::Acquire) & (1u64 << (bit % 64)) != 0
}

#[inline]
pub fn bitset_set_mt(words: &[AtomicU64], bit: usize) {
    words[bit / 64].fetch_or(1u64 << (bit % 64), Ordering::AcqRel);
}

#[inline]
pub fn bitset_clear(words: &[AtomicU64], bit: usize) {
    words[bit / 64].fetch_and(!(1u64 << (bit % 64)), Ordering::AcqRel);
}

/// Set a bit and report whether it was already set.
#[inline]
pub fn bitset_test_and_set_mt(words: &[AtomicU64], bit: usize) -> bool {
    let mask = 1u64 << (bit % 64);
    words[bit / 64].fetch_or(mask, Ordering::AcqRel) & mask != 0
}

#[inline]
pub fn edges_or_mt(plane: &[AtomicU8], idx: usize, edges: Edges) {
    plane[idx].fetch_or(edges, Ordering::AcqRel);
}

/// Bump a coverage counter, sticking at the ceiling once reached.
#[inline]
pub fn covg_increment_mt(plane: &[AtomicU32], idx: usize) {
    let mut covg = plane[idx].load(Ordering::Relaxed);
    while covg < u32::MAX {
        match plane[idx].compare_exchange_weak(
            covg,
            covg + 1,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(seen) => covg = seen,
        }
    }
}
