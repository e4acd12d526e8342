#[cfg(test)]
mod tests {
    use ctxgraph::graph::binary_kmer::BinaryKmer;
    use ctxgraph::graph::build::build_from_seq_mt;
    use ctxgraph::graph::db_graph::Graph;
    use ctxgraph::graph::dna::Nucleotide;
    use ctxgraph::graph::node::{edge_bit, DbNode, Orientation};

    fn node(graph: &Graph, s: &str) -> DbNode {
        graph
            .find_str(s)
            .unwrap()
            .unwrap_or_else(|| panic!("kmer {} not in graph", s))
    }

    /* --------------------------------------------------------------------- */
    /*  insert + canonicalise                                                */
    /* --------------------------------------------------------------------- */

    #[test]
    fn both_strands_share_one_slot() {
        let graph = Graph::new(5, 1, 1, 1024, 0);

        let fwd = BinaryKmer::from_str("ACGTA", 5).unwrap();
        let rev = BinaryKmer::from_str("TACGT", 5).unwrap(); // reverse complement

        let (n1, found1) = graph.find_or_add_node_mt(fwd).unwrap();
        let (n2, found2) = graph.find_or_add_node_mt(rev).unwrap();

        assert!(!found1);
        assert!(found2);
        assert_eq!(graph.ht.num_kmers(), 1);
        assert_eq!(n1.key, n2.key);
        assert_ne!(n1.orient, n2.orient);

        // Lookup agrees with insertion regardless of strand
        assert_eq!(node(&graph, "ACGTA").key, node(&graph, "TACGT").key);
    }

    #[test]
    fn concurrent_inserts_agree_on_slots() {
        let graph = Graph::new(7, 1, 1, 4096, 0);
        let seq = b"ACGTACGTTAGGCATTACGGACCATTGACCAT";

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    build_from_seq_mt(&graph, 0, seq).unwrap();
                });
            }
        });

        // Four identical loads: one slot per distinct kmer, coverage 4x
        let expect_kmers = graph.ht.num_kmers();
        assert!(expect_kmers > 0 && expect_kmers <= (seq.len() - 6) as u64);
        let first = node(&graph, "ACGTACG");
        assert_eq!(graph.covg(first.key, 0) % 4, 0);
        graph.healthcheck().unwrap();
    }

    /* --------------------------------------------------------------------- */
    /*  edges                                                                */
    /* --------------------------------------------------------------------- */

    #[test]
    fn edge_add_is_reciprocal() {
        let graph = Graph::new(3, 1, 1, 1024, 0);
        let (aaa, _) = graph
            .find_or_add_node_mt(BinaryKmer::from_str("AAA", 3).unwrap())
            .unwrap();
        let (aac, _) = graph
            .find_or_add_node_mt(BinaryKmer::from_str("AAC", 3).unwrap())
            .unwrap();

        graph.add_edge_mt(0, aaa, aac);

        // Outgoing C on AAA, incoming (reverse-T) on AAC
        assert_eq!(
            graph.edges(aaa.key, 0),
            edge_bit(Nucleotide::C, Orientation::Forward)
        );
        assert_eq!(
            graph.edges(aac.key, 0),
            edge_bit(Nucleotide::T, Orientation::Reverse)
        );
        assert!(graph.check_edges(aaa, aac));

        // The edge is walkable
        let nexts = graph.next_nodes(graph.bkmer(aaa.key), aaa.orient, graph.edges(aaa.key, 0));
        assert_eq!(nexts.len(), 1);
        assert_eq!(nexts[0].0, aac);
        assert_eq!(nexts[0].1, Nucleotide::C);
    }

    #[test]
    fn palindromic_self_edge_collapses_to_one_bit() {
        let graph = Graph::new(3, 1, 1, 1024, 0);
        // "CGT" is the reverse complement of "ACG": both strands live in
        // one slot and the ACG→CGT edge loops back onto it
        let (acg, _) = graph
            .find_or_add_node_mt(BinaryKmer::from_str("ACG", 3).unwrap())
            .unwrap();
        let cgt = {
            let (n, found) = graph
                .find_or_add_node_mt(BinaryKmer::from_str("CGT", 3).unwrap())
                .unwrap();
            assert!(found);
            n
        };
        assert_eq!(acg.key, cgt.key);

        graph.add_edge_mt(0, acg, cgt);
        assert_eq!(
            graph.edges(acg.key, 0),
            edge_bit(Nucleotide::T, Orientation::Forward)
        );
        assert!(graph.check_edges(acg, cgt));
    }

    #[test]
    fn built_graph_passes_healthcheck() {
        let graph = Graph::new(5, 1, 1, 4096, 0);
        build_from_seq_mt(&graph, 0, b"AAACACCATGGCTAGGATTACACGTTAGC").unwrap();
        graph.healthcheck().unwrap();
    }

    /* --------------------------------------------------------------------- */
    /*  next_node                                                            */
    /* --------------------------------------------------------------------- */

    #[test]
    fn next_node_follows_both_strands() {
        let graph = Graph::new(5, 1, 1, 1024, 0);
        build_from_seq_mt(&graph, 0, b"AAACACCAT").unwrap();

        let n = node(&graph, "AAACA");
        let next = graph.next_node(graph.bkmer(n.key), Nucleotide::C, n.orient);
        assert_eq!(next, node(&graph, "AACAC"));

        // Walking the other strand steps backwards through the sequence
        let rev = node(&graph, "AACAC").flipped();
        let prev = graph.next_node(graph.bkmer(rev.key), Nucleotide::T, rev.orient);
        assert_eq!(prev.key, node(&graph, "AAACA").key);
    }

    /* --------------------------------------------------------------------- */
    /*  colour planes                                                        */
    /* --------------------------------------------------------------------- */

    #[test]
    fn coverage_and_membership_per_colour() {
        let graph = Graph::new(5, 2, 2, 1024, 0);
        build_from_seq_mt(&graph, 0, b"AAACACCAT").unwrap();
        build_from_seq_mt(&graph, 1, b"AAACACCAT").unwrap();
        build_from_seq_mt(&graph, 1, b"AAACACCAT").unwrap();

        let n = node(&graph, "AAACA");
        assert_eq!(graph.covg(n.key, 0), 1);
        assert_eq!(graph.covg(n.key, 1), 2);
        assert!(graph.node_has_col(n.key, 0));
        assert!(graph.node_has_col(n.key, 1));
    }

    #[test]
    fn wipe_colour_clears_only_that_colour() {
        let mut graph = Graph::new(5, 2, 2, 1024, 0);
        build_from_seq_mt(&graph, 0, b"AAACACCAT").unwrap();
        build_from_seq_mt(&graph, 1, b"AAACACCAT").unwrap();

        graph.wipe_colour(1);

        let n = node(&graph, "AAACA");
        assert_eq!(graph.covg(n.key, 0), 1);
        assert_eq!(graph.covg(n.key, 1), 0);
        assert!(graph.node_has_col(n.key, 0));
        assert!(!graph.node_has_col(n.key, 1));
        assert_ne!(graph.edges(n.key, 0), 0);
        assert_eq!(graph.edges(n.key, 1), 0);
    }

    /* --------------------------------------------------------------------- */
    /*  add_all_edges                                                        */
    /* --------------------------------------------------------------------- */

    #[test]
    fn add_all_edges_rebuilds_from_overlaps() {
        let graph = Graph::new(5, 1, 1, 1024, 0);
        let seq = b"AAACACCATGG";
        let k = 5;

        // Insert kmers without any edges
        for i in 0..=seq.len() - k {
            let bk = BinaryKmer::from_seq(&seq[i..i + k], k).unwrap();
            let (n, _) = graph.find_or_add_node_mt(bk).unwrap();
            graph.update_node_mt(n, 0);
        }
        let n = node(&graph, "AAACA");
        assert_eq!(graph.edges(n.key, 0), 0);

        graph.add_all_edges();
        graph.healthcheck().unwrap();

        let nexts = graph.next_nodes(graph.bkmer(n.key), n.orient, graph.edges(n.key, 0));
        assert_eq!(nexts.len(), 1);
        assert_eq!(nexts[0].0, node(&graph, "AACAC"));
    }

    /* --------------------------------------------------------------------- */
    /*  read-start bits                                                      */
    /* --------------------------------------------------------------------- */

    #[test]
    fn read_start_bit_fires_once_per_strand() {
        let graph = Graph::new(5, 1, 1, 1024, 0);
        let (n, _) = graph
            .find_or_add_node_mt(BinaryKmer::from_str("AAACA", 5).unwrap())
            .unwrap();
        assert!(!graph.set_read_start_mt(n)); // first set: was clear
        assert!(graph.set_read_start_mt(n)); // duplicate
        assert!(!graph.set_read_start_mt(n.flipped())); // other strand distinct
    }

    /* --------------------------------------------------------------------- */
    /*  hash table exhaustion                                                */
    /* --------------------------------------------------------------------- */

    #[test]
    fn capacity_exhaustion_is_an_error() {
        use ctxgraph::graph::dna::rand_dna_string;
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        // Smallest possible table: one bucket of 64 slots
        let graph = Graph::new(31, 1, 1, 1, 0);
        let mut rng = StdRng::seed_from_u64(1);
        let mut result = Ok(());
        for _ in 0..20_000 {
            let s = rand_dna_string(&mut rng, 31);
            let bk = BinaryKmer::from_str(&s, 31).unwrap();
            result = graph.find_or_add_node_mt(bk).map(|_| ());
            if result.is_err() {
                break;
            }
        }
        assert!(result.is_err(), "table never filled");
    }
}
