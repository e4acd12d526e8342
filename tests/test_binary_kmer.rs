#[cfg(test)]
mod tests {
    use ctxgraph::graph::binary_kmer::{check_kmer_size, BinaryKmer};
    use ctxgraph::graph::dna::{
        canonical_str, rand_dna_string, reverse_complement_str, Nucleotide,
    };
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /* --------------------------------------------------------------------- */
    /*  string round-trips                                                   */
    /* --------------------------------------------------------------------- */

    #[test]
    fn pack_unpack_roundtrip() {
        for s in ["ACGTA", "TTTTT", "AAAAA", "GATCA"] {
            let bk = BinaryKmer::from_str(s, 5).unwrap();
            assert_eq!(bk.to_string(5), s);
        }
        // Minimum and maximum supported k
        let s3 = "ACG";
        assert_eq!(BinaryKmer::from_str(s3, 3).unwrap().to_string(3), s3);
        let s31: String = "ACGT".chars().cycle().take(31).collect();
        assert_eq!(
            BinaryKmer::from_str(&s31, 31).unwrap().to_string(31),
            s31
        );
    }

    #[test]
    fn from_seq_rejects_bad_bases() {
        assert!(BinaryKmer::from_str("ACGTN", 5).is_err());
        assert!(BinaryKmer::from_str("ACG", 5).is_err()); // too short
    }

    /* --------------------------------------------------------------------- */
    /*  complement / reverse complement                                      */
    /* --------------------------------------------------------------------- */

    #[test]
    fn complement_is_xor_with_three() {
        assert_eq!(Nucleotide::A.complement(), Nucleotide::T);
        assert_eq!(Nucleotide::C.complement(), Nucleotide::G);
        assert_eq!(Nucleotide::G.complement(), Nucleotide::C);
        assert_eq!(Nucleotide::T.complement(), Nucleotide::A);
    }

    #[test]
    fn reverse_complement_matches_string_version() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let s = rand_dna_string(&mut rng, 7);
            let bk = BinaryKmer::from_str(&s, 7).unwrap();
            assert_eq!(
                bk.reverse_complement(7).to_string(7),
                reverse_complement_str(&s)
            );
        }
    }

    #[test]
    fn reverse_complement_str_is_involution() {
        let mut rng = StdRng::seed_from_u64(7);
        for len in [0usize, 1, 5, 31, 100] {
            let s = rand_dna_string(&mut rng, len);
            assert_eq!(reverse_complement_str(&reverse_complement_str(&s)), s);
        }
    }

    /* --------------------------------------------------------------------- */
    /*  canonical keys                                                       */
    /* --------------------------------------------------------------------- */

    #[test]
    fn canonical_key_is_smaller_strand() {
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..200 {
            let s = rand_dna_string(&mut rng, 9);
            let bk = BinaryKmer::from_str(&s, 9).unwrap();
            let rc = bk.reverse_complement(9);

            let key = bk.key(9);
            assert!(key.0 <= bk.0 && key.0 <= rc.0);
            assert_eq!(key, rc.key(9));
            assert_eq!(key.to_string(9), canonical_str(&s));

            // k odd: a kmer is never its own reverse complement
            assert_ne!(key, key.reverse_complement(9));
        }
    }

    /* --------------------------------------------------------------------- */
    /*  shifts                                                               */
    /* --------------------------------------------------------------------- */

    #[test]
    fn shift_add_matches_string_edits() {
        let bk = BinaryKmer::from_str("ACGTA", 5).unwrap();
        assert_eq!(bk.left_shift_add(5, Nucleotide::C).to_string(5), "CGTAC");
        assert_eq!(bk.right_shift_add(5, Nucleotide::C).to_string(5), "CACGT");
        assert_eq!(bk.left_shift_one_base(5).to_string(5), "CGTAA");
        assert_eq!(bk.right_shift_one_base().to_string(5), "AACGT");
        assert_eq!(bk.set_first_nuc(Nucleotide::T, 5).to_string(5), "TCGTA");
        assert_eq!(bk.set_last_nuc(Nucleotide::G).to_string(5), "ACGTG");
        assert_eq!(bk.first_nuc(5), Nucleotide::A);
        assert_eq!(bk.last_nuc(), Nucleotide::A);
        assert_eq!(bk.nuc_at(2, 5), Nucleotide::G);
    }

    /* --------------------------------------------------------------------- */
    /*  kmer size validation                                                 */
    /* --------------------------------------------------------------------- */

    #[test]
    fn kmer_size_limits() {
        assert!(check_kmer_size(3, "test").is_ok());
        assert!(check_kmer_size(31, "test").is_ok());
        assert!(check_kmer_size(4, "test").is_err()); // even
        assert!(check_kmer_size(1, "test").is_err()); // too small
        assert!(check_kmer_size(33, "test").is_err()); // too large
    }
}
