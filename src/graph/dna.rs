use rand::Rng;

/// One of the four nucleotides, packed into two bits.
///
/// The complement pairing (A↔T, C↔G) is a bitwise XOR with 3,
/// which the packed-kmer code relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Nucleotide {
    A = 0,
    C = 1,
    G = 2,
    T = 3,
}

pub const NUCLEOTIDES: [Nucleotide; 4] = [
    Nucleotide::A,
    Nucleotide::C,
    Nucleotide::G,
    Nucleotide::T,
];

/// Code for bytes that are not A/C/G/T (either case).
const INVALID: u8 = 8;

/// Static ASCII→2-bit lookup table.
/// 0 = A, 1 = C, 2 = G, 3 = T, 8 = anything else
static LUT: [u8; 256] = {
    let mut t = [INVALID; 256];
    t[b'A' as usize] = 0;
    t[b'a' as usize] = 0;
    t[b'C' as usize] = 1;
    t[b'c' as usize] = 1;
    t[b'G' as usize] = 2;
    t[b'g' as usize] = 2;
    t[b'T' as usize] = 3;
    t[b't' as usize] = 3;
    t
};

impl Nucleotide {
    /// Decode a 2-bit code. Panics on codes > 3 in debug builds.
    #[inline]
    pub fn from_code(code: u8) -> Nucleotide {
        debug_assert!(code < 4);
        NUCLEOTIDES[(code & 3) as usize]
    }

    /// Encode an ASCII base, returning `None` for non-ACGT bytes.
    #[inline]
    pub fn from_char(b: u8) -> Option<Nucleotide> {
        let code = LUT[b as usize];
        if code == INVALID {
            None
        } else {
            Some(Nucleotide::from_code(code))
        }
    }

    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// A↔T, C↔G
    #[inline]
    pub fn complement(self) -> Nucleotide {
        Nucleotide::from_code(self as u8 ^ 3)
    }

    #[inline]
    pub fn to_char(self) -> u8 {
        b"ACGT"[self as usize]
    }
}

/// Is every byte of `seq` a valid (either-case) base?
#[inline]
pub fn seq_is_dna(seq: &[u8]) -> bool {
    seq.iter().all(|&b| LUT[b as usize] != INVALID)
}

/// Complement of a single ASCII base; non-ACGT bytes pass through unchanged.
#[inline]
pub fn char_complement(b: u8) -> u8 {
    match b {
        b'A' => b'T',
        b'a' => b't',
        b'C' => b'G',
        b'c' => b'g',
        b'G' => b'C',
        b'g' => b'c',
        b'T' => b'A',
        b't' => b'a',
        other => other,
    }
}

/// Reverse-complement of a plain sequence, e.g. "AC" → "GT"
pub fn reverse_complement_str(seq: &str) -> String {
    seq.bytes()
        .rev()
        .map(|b| char_complement(b) as char)
        .collect()
}

/// Return the canonical form of `kmer`: the lexicographically smaller
/// of the k-mer and its reverse complement.
#[inline]
pub fn canonical_str(kmer: &str) -> String {
    let rc = reverse_complement_str(kmer);
    if kmer <= rc.as_str() {
        kmer.to_owned()
    } else {
        rc
    }
}

/// Random "ACGT" string of length `len`. Useful for testing.
pub fn rand_dna_string<R: Rng>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| NUCLEOTIDES[rng.gen_range(0..4)].to_char() as char)
        .collect()
}
