#[cfg(test)]
mod tests {
    use ctxgraph::graph::binary_kmer::BinaryKmer;
    use ctxgraph::graph::db_graph::Graph;
    use ctxgraph::graph::dna::Nucleotide;
    use ctxgraph::graph::node::{DbNode, Orientation};
    use ctxgraph::graph::packed_path::{pack_seq, seq_nuc, PATH_NULL};
    use ctxgraph::graph::path_set::PathSet;

    fn nucs(s: &str) -> Vec<Nucleotide> {
        s.bytes().map(|b| Nucleotide::from_char(b).unwrap()).collect()
    }

    fn test_graph() -> (Graph, DbNode) {
        let graph = Graph::new(5, 8, 1, 1024, 1 << 16);
        let (node, _) = graph
            .find_or_add_node_mt(BinaryKmer::from_str("AAACA", 5).unwrap())
            .unwrap();
        (graph, node)
    }

    /* --------------------------------------------------------------------- */
    /*  packed records                                                       */
    /* --------------------------------------------------------------------- */

    #[test]
    fn seq_packing_is_msb_first() {
        let packed = pack_seq(&nucs("CGT"));
        // C=01 G=10 T=11 -> 0b01_10_11_00
        assert_eq!(packed, vec![0b0110_1100]);
        assert_eq!(seq_nuc(&packed, 0), Nucleotide::C);
        assert_eq!(seq_nuc(&packed, 1), Nucleotide::G);
        assert_eq!(seq_nuc(&packed, 2), Nucleotide::T);

        let five = pack_seq(&nucs("AACGT"));
        assert_eq!(five.len(), 2);
        assert_eq!(seq_nuc(&five, 4), Nucleotide::T);
    }

    /* --------------------------------------------------------------------- */
    /*  find_or_add deduplication                                            */
    /* --------------------------------------------------------------------- */

    #[test]
    fn identical_content_is_stored_once() {
        let (graph, node) = test_graph();
        let pstore = &graph.pstore;
        let packed = pack_seq(&nucs("CGT"));

        let (p1, new1) = pstore
            .find_or_add_mt(node.key, 2, node.orient, 3, &packed)
            .unwrap();
        let (p2, new2) = pstore
            .find_or_add_mt(node.key, 2, node.orient, 3, &packed)
            .unwrap();
        let (p3, new3) = pstore
            .find_or_add_mt(node.key, 5, node.orient, 3, &packed)
            .unwrap();

        assert!(new1);
        assert!(!new2);
        assert!(!new3);
        assert_eq!(p1, p2);
        assert_eq!(p1, p3);

        assert_eq!(pstore.num_of_paths(), 1);
        assert_eq!(pstore.num_kmers_with_paths(), 1);

        assert!(pstore.record_in_colour(p1, 2));
        assert!(pstore.record_in_colour(p1, 5));
        assert!(!pstore.record_in_colour(p1, 0));

        // Exactly one record hangs off the kmer
        let head = pstore.head(node.key);
        assert_eq!(head, p1);
        assert_eq!(pstore.record(head).prev, PATH_NULL);
    }

    #[test]
    fn distinct_content_extends_the_chain() {
        let (graph, node) = test_graph();
        let pstore = &graph.pstore;

        pstore
            .find_or_add_mt(node.key, 0, node.orient, 3, &pack_seq(&nucs("CGT")))
            .unwrap();
        pstore
            .find_or_add_mt(node.key, 0, node.orient, 2, &pack_seq(&nucs("AT")))
            .unwrap();
        pstore
            .find_or_add_mt(node.key, 0, node.orient.opposite(), 3, &pack_seq(&nucs("CGT")))
            .unwrap();

        assert_eq!(pstore.num_of_paths(), 3);
        assert_eq!(pstore.num_kmers_with_paths(), 1);

        let set = PathSet::from_store(pstore, pstore.head(node.key));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn orientations_are_distinct_content() {
        let (graph, node) = test_graph();
        let pstore = &graph.pstore;
        let packed = pack_seq(&nucs("AC"));

        let (fwd, _) = pstore
            .find_or_add_mt(node.key, 0, Orientation::Forward, 2, &packed)
            .unwrap();
        let (rev, _) = pstore
            .find_or_add_mt(node.key, 0, Orientation::Reverse, 2, &packed)
            .unwrap();
        assert_ne!(fwd, rev);
        assert_eq!(pstore.record(fwd).orient, Orientation::Forward);
        assert_eq!(pstore.record(rev).orient, Orientation::Reverse);
    }

    /* --------------------------------------------------------------------- */
    /*  arena exhaustion                                                     */
    /* --------------------------------------------------------------------- */

    #[test]
    fn arena_full_is_an_error() {
        let graph = Graph::new(5, 1, 1, 1024, 8); // room for nothing
        let (node, _) = graph
            .find_or_add_node_mt(BinaryKmer::from_str("AAACA", 5).unwrap())
            .unwrap();
        let res = graph
            .pstore
            .find_or_add_mt(node.key, 0, node.orient, 3, &pack_seq(&nucs("CGT")));
        assert!(res.is_err());
    }

    /* --------------------------------------------------------------------- */
    /*  release / clean / defragment                                         */
    /* --------------------------------------------------------------------- */

    #[test]
    fn release_colour_then_defragment_reclaims_records() {
        let (mut graph, node) = test_graph();
        let (other, _) = graph
            .find_or_add_node_mt(BinaryKmer::from_str("CCCAC", 5).unwrap())
            .unwrap();

        // node: one record only in colour 1; other: one in colours 0+1
        graph
            .pstore
            .find_or_add_mt(node.key, 1, node.orient, 3, &pack_seq(&nucs("CGT")))
            .unwrap();
        graph
            .pstore
            .find_or_add_mt(other.key, 0, other.orient, 2, &pack_seq(&nucs("AT")))
            .unwrap();
        graph
            .pstore
            .find_or_add_mt(other.key, 1, other.orient, 2, &pack_seq(&nucs("AT")))
            .unwrap();
        assert_eq!(graph.pstore.num_of_paths(), 2);

        graph.pstore.release_colour(1);
        // Records remain until defragmentation
        assert_eq!(graph.pstore.num_of_paths(), 2);

        graph.pstore.defragment().unwrap();
        graph.pstore.integrity_check().unwrap();

        assert_eq!(graph.pstore.num_of_paths(), 1);
        assert_eq!(graph.pstore.num_kmers_with_paths(), 1);
        assert_eq!(graph.pstore.head(node.key), PATH_NULL);

        let head = graph.pstore.head(other.key);
        assert_ne!(head, PATH_NULL);
        let rec = graph.pstore.record(head);
        assert_eq!(rec.plen, 2);
        assert!(graph.pstore.record_in_colour(head, 0));
        assert!(!graph.pstore.record_in_colour(head, 1));
    }

    #[test]
    fn defragment_preserves_chain_order_and_content() {
        let (mut graph, node) = test_graph();
        let pstore = &graph.pstore;
        for (i, seq) in ["CGT", "AT", "GGA", "TTTA"].iter().enumerate() {
            let n = nucs(seq);
            pstore
                .find_or_add_mt(node.key, i % 3, node.orient, n.len() as u32, &pack_seq(&n))
                .unwrap();
        }
        let before = PathSet::from_store(pstore, pstore.head(node.key));

        graph.pstore.defragment().unwrap();
        graph.pstore.integrity_check().unwrap();

        let after = PathSet::from_store(&graph.pstore, graph.pstore.head(node.key));
        assert_eq!(before.entries.len(), after.entries.len());
        for (b, a) in before.entries.iter().zip(after.entries.iter()) {
            assert_eq!(b.orient, a.orient);
            assert_eq!(b.plen, a.plen);
            assert_eq!(b.seq, a.seq);
            assert_eq!(b.colset, a.colset);
        }
    }

    #[test]
    fn clean_drops_weakly_supported_records() {
        let (mut graph, node) = test_graph();
        let strong = pack_seq(&nucs("CGT"));
        let weak = pack_seq(&nucs("AT"));

        graph
            .pstore
            .find_or_add_mt(node.key, 0, node.orient, 3, &strong)
            .unwrap();
        graph
            .pstore
            .find_or_add_mt(node.key, 1, node.orient, 3, &strong)
            .unwrap();
        graph
            .pstore
            .find_or_add_mt(node.key, 0, node.orient, 2, &weak)
            .unwrap();

        graph.pstore.clean(2);
        graph.pstore.integrity_check().unwrap();

        assert_eq!(graph.pstore.num_of_paths(), 1);
        let head = graph.pstore.head(node.key);
        assert_eq!(graph.pstore.record(head).plen, 3);
    }

    /* --------------------------------------------------------------------- */
    /*  path set merging                                                     */
    /* --------------------------------------------------------------------- */

    #[test]
    fn slim_folds_prefixes_into_longer_paths() {
        let (graph, node) = test_graph();
        let pstore = &graph.pstore;
        pstore
            .find_or_add_mt(node.key, 0, node.orient, 2, &pack_seq(&nucs("CG")))
            .unwrap();
        pstore
            .find_or_add_mt(node.key, 1, node.orient, 4, &pack_seq(&nucs("CGTA")))
            .unwrap();
        pstore
            .find_or_add_mt(node.key, 2, node.orient, 3, &pack_seq(&nucs("TTT")))
            .unwrap();

        let mut set = PathSet::from_store(pstore, pstore.head(node.key));
        set.slim();

        assert_eq!(set.len(), 2);
        let kept: Vec<_> = set.entries.iter().filter(|e| !e.removed).collect();
        let long = kept.iter().find(|e| e.plen == 4).unwrap();
        // The prefix's colour folded into the longer record
        assert_eq!(long.colset[0] & 0b11, 0b11);
    }

    /* --------------------------------------------------------------------- */
    /*  concurrent appends                                                   */
    /* --------------------------------------------------------------------- */

    #[test]
    fn concurrent_find_or_add_keeps_each_content_once() {
        let (graph, node) = test_graph();
        let seqs = ["CGT", "AT", "GGA", "TTTA", "C", "AACC"];

        std::thread::scope(|scope| {
            for t in 0..4usize {
                let pstore = &graph.pstore;
                let seqs = &seqs;
                scope.spawn(move || {
                    for (i, s) in seqs.iter().enumerate() {
                        let n: Vec<Nucleotide> =
                            s.bytes().map(|b| Nucleotide::from_char(b).unwrap()).collect();
                        pstore
                            .find_or_add_mt(
                                node.key,
                                (t + i) % 8,
                                node.orient,
                                n.len() as u32,
                                &pack_seq(&n),
                            )
                            .unwrap();
                    }
                });
            }
        });

        assert_eq!(graph.pstore.num_of_paths(), seqs.len() as u64);
        assert_eq!(graph.pstore.num_kmers_with_paths(), 1);
        let set = PathSet::from_store(&graph.pstore, graph.pstore.head(node.key));
        assert_eq!(set.len(), seqs.len());
        graph.pstore.integrity_check().unwrap();
    }
}
