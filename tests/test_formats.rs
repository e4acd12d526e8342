#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::path::PathBuf;

    use ctxgraph::format::file_filter::FileFilter;
    use ctxgraph::format::graph_file::{
        write_graph, GraphFileHeader, GraphFileReader, GraphLoadingPrefs,
    };
    use ctxgraph::format::path_file::{
        paths_format_merge, write_header, write_optimised_paths, PathFileHeader, PathFileReader,
    };
    use ctxgraph::graph::build::build_from_seq_mt;
    use ctxgraph::graph::db_graph::Graph;
    use ctxgraph::graph::dna::{rand_dna_string, Nucleotide};
    use ctxgraph::graph::packed_path::pack_seq;
    use ctxgraph::graph::path_set::PathSet;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /* --------------------------------------------------------------------- */
    /*  file filter parsing                                                  */
    /* --------------------------------------------------------------------- */

    #[test]
    fn filter_parsing_table() {
        let f = FileFilter::parse("graphs/sample.ctx").unwrap();
        assert_eq!(f.path, PathBuf::from("graphs/sample.ctx"));
        assert_eq!(f.intocol, 0);
        assert_eq!(f.resolve(3).unwrap(), vec![0, 1, 2]);
        assert!(f.is_identity(3));

        let f = FileFilter::parse("2:sample.ctx").unwrap();
        assert_eq!(f.path, PathBuf::from("sample.ctx"));
        assert_eq!(f.intocol, 2);
        assert!(!f.is_identity(1));

        let f = FileFilter::parse("sample.ctx:0,2-4").unwrap();
        assert_eq!(f.resolve(5).unwrap(), vec![0, 2, 3, 4]);
        assert_eq!(f.into_ncols(5), 4);

        let f = FileFilter::parse("7:sample.ctx:1-2").unwrap();
        assert_eq!(f.intocol, 7);
        assert_eq!(f.resolve(3).unwrap(), vec![1, 2]);

        // A colon inside the file name is not a colspec
        let f = FileFilter::parse("dir:with:names.ctx").unwrap();
        assert_eq!(f.path, PathBuf::from("dir:with:names.ctx"));

        // Explicit identity spec counts as identity
        let f = FileFilter::parse("sample.ctx:0-2").unwrap();
        assert!(f.is_identity(3));
        assert!(!f.is_identity(4));
    }

    #[test]
    fn filter_rejects_bad_colours() {
        let f = FileFilter::parse("sample.ctx:5").unwrap();
        assert!(f.resolve(3).is_err());
        assert!(FileFilter::parse("sample.ctx:3-1").is_err());
    }

    /* --------------------------------------------------------------------- */
    /*  graph (.ctx) round-trip                                              */
    /* --------------------------------------------------------------------- */

    fn graph_snapshot(graph: &Graph) -> HashMap<u64, (Vec<u32>, Vec<u8>)> {
        let mut snap = HashMap::new();
        graph.ht.for_each(|hkey, bkmer| {
            let covgs = (0..graph.num_of_cols).map(|c| graph.covg(hkey, c)).collect();
            let edges = (0..graph.num_of_cols)
                .map(|c| graph.edges(hkey, graph.edge_col(c)))
                .collect();
            snap.insert(bkmer.0, (covgs, edges));
        });
        snap
    }

    #[test]
    fn ctx_write_read_is_a_fixed_point() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.ctx");

        let mut rng = StdRng::seed_from_u64(2024);
        let graph = Graph::new(5, 1, 1, 4096, 0);
        let seq = rand_dna_string(&mut rng, 104);
        build_from_seq_mt(&graph, 0, seq.as_bytes()).unwrap();
        graph.ginfo[0..1]
            .iter()
            .for_each(|info| assert_eq!(info.sample_name, "undefined"));

        let written = write_graph(&graph, &path).unwrap();
        assert_eq!(written, graph.ht.num_kmers());

        let mut reader = GraphFileReader::open(path.to_str().unwrap()).unwrap();
        assert_eq!(reader.hdr.kmer_size, 5);
        assert_eq!(reader.num_kmers, written);

        let mut reloaded = Graph::new(5, 1, 1, 4096, 0);
        reader
            .load_into(&mut reloaded, GraphLoadingPrefs::default())
            .unwrap();

        assert_eq!(graph_snapshot(&graph), graph_snapshot(&reloaded));
        reloaded.healthcheck().unwrap();
    }

    #[test]
    fn ctx_colour_projection_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("single.ctx");

        let graph = Graph::new(5, 1, 1, 1024, 0);
        build_from_seq_mt(&graph, 0, b"AAACACCAT").unwrap();
        write_graph(&graph, &path).unwrap();

        // Load the single colour into colour 2 of a 3-colour graph
        let arg = format!("2:{}", path.display());
        let mut reader = GraphFileReader::open(&arg).unwrap();
        let mut merged = Graph::new(5, 3, 3, 1024, 0);
        reader
            .load_into(&mut merged, GraphLoadingPrefs::default())
            .unwrap();

        let node = merged.find_str("AAACA").unwrap().unwrap();
        assert_eq!(merged.covg(node.key, 0), 0);
        assert_eq!(merged.covg(node.key, 2), 1);
        assert!(merged.node_has_col(node.key, 2));
    }

    #[test]
    fn ctx_header_rejects_corruption() {
        use ctxgraph::format::graph_file::read_header;

        let graph = Graph::new(5, 1, 1, 64, 0);
        let hdr = GraphFileHeader::from_graph(&graph);

        let mut buf = Vec::new();
        ctxgraph::format::graph_file::write_header(&mut buf, &hdr).unwrap();

        // Bad magic
        let mut bad = buf.clone();
        bad[0] = b'X';
        assert!(read_header(&mut Cursor::new(&bad), "test").is_err());

        // Even kmer size
        let mut bad = buf.clone();
        bad[10] = 4; // kmer_size field
        assert!(read_header(&mut Cursor::new(&bad), "test").is_err());

        // Zero colours
        let mut bad = buf.clone();
        bad[18] = 0; // num_of_cols field
        assert!(read_header(&mut Cursor::new(&bad), "test").is_err());

        // Intact header parses
        assert!(read_header(&mut Cursor::new(&buf), "test").is_ok());
    }

    /* --------------------------------------------------------------------- */
    /*  paths (.ctp) round-trip                                              */
    /* --------------------------------------------------------------------- */

    fn nucs(s: &str) -> Vec<Nucleotide> {
        s.bytes().map(|b| Nucleotide::from_char(b).unwrap()).collect()
    }

    /// Per-kmer multiset of (orient, plen, seq, colset) records.
    fn path_snapshot(graph: &Graph) -> HashMap<u64, Vec<(u8, u32, Vec<u8>, Vec<u8>)>> {
        let mut snap = HashMap::new();
        graph.ht.for_each(|hkey, bkmer| {
            let set = PathSet::from_store(&graph.pstore, graph.pstore.head(hkey));
            if set.entries.is_empty() {
                return;
            }
            let mut entries: Vec<_> = set
                .entries
                .iter()
                .map(|e| (e.orient as u8, e.plen, e.seq.clone(), e.colset.clone()))
                .collect();
            entries.sort();
            snap.insert(bkmer.0, entries);
        });
        snap
    }

    fn build_path_graph() -> Graph {
        let graph = Graph::new(5, 3, 3, 1024, 1 << 14);
        build_from_seq_mt(&graph, 0, b"AAACACCATGGCTA").unwrap();
        let pstore = &graph.pstore;

        let a = graph.find_str("AAACA").unwrap().unwrap();
        let b = graph.find_str("CCATG").unwrap().unwrap();
        for (col, seq) in [(0usize, "CGT"), (1, "CGT"), (2, "AT")] {
            let n = nucs(seq);
            pstore
                .find_or_add_mt(a.key, col, a.orient, n.len() as u32, &pack_seq(&n))
                .unwrap();
        }
        let n = nucs("GGTAC");
        pstore
            .find_or_add_mt(b.key, 2, b.orient.opposite(), n.len() as u32, &pack_seq(&n))
            .unwrap();
        graph
    }

    #[test]
    fn ctp_write_read_is_a_fixed_point() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.ctp");

        let graph = build_path_graph();
        write_optimised_paths(&graph, &path).unwrap();

        let mut reader = PathFileReader::open(path.to_str().unwrap()).unwrap();
        assert_eq!(reader.hdr.num_of_paths, graph.pstore.num_of_paths());
        assert_eq!(
            reader.hdr.num_kmers_with_paths,
            graph.pstore.num_kmers_with_paths()
        );

        let mut reloaded = Graph::new(5, 3, 3, 1024, 1 << 14);
        reader.load_into(&mut reloaded, true).unwrap();
        reloaded.pstore.integrity_check().unwrap();

        assert_eq!(path_snapshot(&graph), path_snapshot(&reloaded));
        assert_eq!(
            reloaded.pstore.num_of_paths(),
            graph.pstore.num_of_paths()
        );
        assert_eq!(
            reloaded.pstore.num_of_bytes(),
            reader.hdr.num_path_bytes
        );
    }

    #[test]
    fn ctp_merge_deduplicates_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = dir.path().join("a.ctp");
        let p2 = dir.path().join("b.ctp");

        let graph = build_path_graph();
        write_optimised_paths(&graph, &p1).unwrap();
        write_optimised_paths(&graph, &p2).unwrap();

        // Loading the same records twice must not duplicate them
        let mut readers = vec![
            PathFileReader::open(p1.to_str().unwrap()).unwrap(),
            PathFileReader::open(p2.to_str().unwrap()).unwrap(),
        ];
        let mut merged = Graph::new(5, 3, 3, 1024, 1 << 15);
        paths_format_merge(&mut readers, &mut merged, true, false).unwrap();
        merged.pstore.integrity_check().unwrap();

        assert_eq!(path_snapshot(&graph), path_snapshot(&merged));
    }

    #[test]
    fn ctp_header_rejects_corruption() {
        use ctxgraph::format::path_file::read_header;

        let hdr = PathFileHeader {
            version: 1,
            kmer_size: 5,
            num_of_cols: 2,
            num_of_paths: 0,
            num_path_bytes: 0,
            num_kmers_with_paths: 0,
            sample_names: vec!["a".into(), "b".into()],
        };
        let mut buf = Vec::new();
        write_header(&mut buf, &hdr).unwrap();
        assert!(read_header(&mut Cursor::new(&buf), "test").is_ok());

        // Unknown version
        let mut bad = buf.clone();
        bad[5] = 9;
        assert!(read_header(&mut Cursor::new(&bad), "test").is_err());

        // Even kmer size
        let mut bad = buf.clone();
        bad[9] = 6;
        assert!(read_header(&mut Cursor::new(&bad), "test").is_err());

        // Zero colours rejected (claims no colours, then ends early)
        let hdr_zero = PathFileHeader {
            num_of_cols: 0,
            sample_names: vec![],
            ..hdr.clone()
        };
        let mut buf0 = Vec::new();
        write_header(&mut buf0, &hdr_zero).unwrap();
        assert!(read_header(&mut Cursor::new(&buf0), "test").is_err());
    }

    #[test]
    fn ctp_rejects_out_of_bounds_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oob.ctp");

        let graph = build_path_graph();
        write_optimised_paths(&graph, &path).unwrap();

        // Corrupt the final kmer's head index (last 8 bytes of file)
        let mut bytes = std::fs::read(&path).unwrap();
        let n = bytes.len();
        bytes[n - 8..].copy_from_slice(&u64::MAX.to_le_bytes());
        let bad = dir.path().join("bad.ctp");
        std::fs::write(&bad, &bytes).unwrap();

        let mut reader = PathFileReader::open(bad.to_str().unwrap()).unwrap();
        let mut reloaded = Graph::new(5, 3, 3, 1024, 1 << 14);
        assert!(reader.load_into(&mut reloaded, true).is_err());
    }

    #[test]
    fn output_files_are_never_clobbered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("once.ctx");

        let graph = Graph::new(5, 1, 1, 1024, 0);
        build_from_seq_mt(&graph, 0, b"AAACACCAT").unwrap();
        write_graph(&graph, &path).unwrap();
        assert!(write_graph(&graph, &path).is_err());
    }
}
