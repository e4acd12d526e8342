use anyhow::{bail, Result};

use crate::graph::dna::Nucleotide;

/// Smallest supported k-mer size.
pub const MIN_KMER_SIZE: usize = 3;
/// Largest k that fits one 64-bit word at two bits per base.
pub const MAX_KMER_SIZE: usize = 31;

/// Number of 64-bit words per packed k-mer (fixed for k ≤ 31).
pub const NUM_BKMER_WORDS: usize = 1;

/// A k-mer packed two bits per base into a single `u64`.
///
/// The first (leftmost) base sits in the most significant used bits, so
/// comparing two packed values of the same k compares the base strings
/// lexicographically. Bits above `2*k` are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BinaryKmer(pub u64);

/// Validate a k-mer size read from a file or the command line: odd and
/// within `[MIN_KMER_SIZE, MAX_KMER_SIZE]`.
pub fn check_kmer_size(kmer_size: usize, source: &str) -> Result<()> {
    if kmer_size < MIN_KMER_SIZE || kmer_size > MAX_KMER_SIZE {
        bail!(
            "Cannot handle kmer size {} [{}-{}; {}]",
            kmer_size,
            MIN_KMER_SIZE,
            MAX_KMER_SIZE,
            source
        );
    }
    if kmer_size % 2 == 0 {
        bail!("Kmer size appears to be even! {} [{}]", kmer_size, source);
    }
    Ok(())
}

#[inline]
fn kmer_mask(kmer_size: usize) -> u64 {
    // 2*k never reaches 64 since k <= 31
    (1u64 << (2 * kmer_size)) - 1
}

/// Reverse the order of the 32 two-bit groups in a word.
#[inline]
fn reverse_base_pairs(mut x: u64) -> u64 {
    x = x.swap_bytes();
    x = ((x & 0x0F0F_0F0F_0F0F_0F0F) << 4) | ((x >> 4) & 0x0F0F_0F0F_0F0F_0F0F);
    x = ((x & 0x3333_3333_3333_3333) << 2) | ((x >> 2) & 0x3333_3333_3333_3333);
    x
}

impl BinaryKmer {
    #[inline]
    pub fn zero() -> BinaryKmer {
        BinaryKmer(0)
    }

    /// Pack an ACGT byte sequence. Errors on non-ACGT bytes or length
    /// mismatch.
    pub fn from_seq(seq: &[u8], kmer_size: usize) -> Result<BinaryKmer> {
        if seq.len() < kmer_size {
            bail!(
                "Sequence too short for kmer: {} < {}",
                seq.len(),
                kmer_size
            );
        }
        let mut packed = 0u64;
        for &b in &seq[..kmer_size] {
            match Nucleotide::from_char(b) {
                Some(nuc) => packed = (packed << 2) | nuc.code() as u64,
                None => bail!("Invalid base '{}' in kmer", b as char),
            }
        }
        Ok(BinaryKmer(packed))
    }

    pub fn from_str(s: &str, kmer_size: usize) -> Result<BinaryKmer> {
        BinaryKmer::from_seq(s.as_bytes(), kmer_size)
    }

    pub fn to_string(self, kmer_size: usize) -> String {
        let mut buf = String::with_capacity(kmer_size);
        for i in (0..kmer_size).rev() {
            let code = ((self.0 >> (2 * i)) & 3) as u8;
            buf.push(Nucleotide::from_code(code).to_char() as char);
        }
        buf
    }

    /// Base at position `idx` (0 = leftmost).
    #[inline]
    pub fn nuc_at(self, idx: usize, kmer_size: usize) -> Nucleotide {
        debug_assert!(idx < kmer_size);
        Nucleotide::from_code(((self.0 >> (2 * (kmer_size - 1 - idx))) & 3) as u8)
    }

    #[inline]
    pub fn first_nuc(self, kmer_size: usize) -> Nucleotide {
        self.nuc_at(0, kmer_size)
    }

    #[inline]
    pub fn last_nuc(self) -> Nucleotide {
        Nucleotide::from_code((self.0 & 3) as u8)
    }

    /// Drop the leftmost base, append `nuc` on the right.
    #[inline]
    pub fn left_shift_add(self, kmer_size: usize, nuc: Nucleotide) -> BinaryKmer {
        BinaryKmer(((self.0 << 2) | nuc.code() as u64) & kmer_mask(kmer_size))
    }

    /// Drop the rightmost base, prepend `nuc` on the left.
    #[inline]
    pub fn right_shift_add(self, kmer_size: usize, nuc: Nucleotide) -> BinaryKmer {
        BinaryKmer((self.0 >> 2) | ((nuc.code() as u64) << (2 * (kmer_size - 1))))
    }

    /// Shift one base left without appending (rightmost base becomes A).
    #[inline]
    pub fn left_shift_one_base(self, kmer_size: usize) -> BinaryKmer {
        BinaryKmer((self.0 << 2) & kmer_mask(kmer_size))
    }

    /// Shift one base right without prepending (leftmost base becomes A).
    #[inline]
    pub fn right_shift_one_base(self) -> BinaryKmer {
        BinaryKmer(self.0 >> 2)
    }

    #[inline]
    pub fn set_first_nuc(self, nuc: Nucleotide, kmer_size: usize) -> BinaryKmer {
        let shift = 2 * (kmer_size - 1);
        BinaryKmer((self.0 & !(3u64 << shift)) | ((nuc.code() as u64) << shift))
    }

    #[inline]
    pub fn set_last_nuc(self, nuc: Nucleotide) -> BinaryKmer {
        BinaryKmer((self.0 & !3u64) | nuc.code() as u64)
    }

    /// Reverse complement: complement every base and reverse their order.
    #[inline]
    pub fn reverse_complement(self, kmer_size: usize) -> BinaryKmer {
        let complemented = self.0 ^ kmer_mask(kmer_size);
        BinaryKmer(reverse_base_pairs(complemented) >> (64 - 2 * kmer_size))
    }

    /// Canonical key: the lexicographically smaller of the kmer and its
    /// reverse complement. With k odd a kmer is never its own reverse
    /// complement, so the choice is strict.
    #[inline]
    pub fn key(self, kmer_size: usize) -> BinaryKmer {
        let rc = self.reverse_complement(kmer_size);
        if self.0 <= rc.0 {
            self
        } else {
            rc
        }
    }
}
