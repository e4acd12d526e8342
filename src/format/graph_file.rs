use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use tracing::info;

use crate::format::file_filter::FileFilter;
use crate::format::{
    len_string_bytes, read_len_string, read_u32, read_u64, read_u8, write_len_string,
    MAX_FILE_COLOURS,
};
use crate::graph::binary_kmer::{check_kmer_size, BinaryKmer, NUM_BKMER_WORDS};
use crate::graph::build::LoadingStats;
use crate::graph::db_graph::{CleaningInfo, Graph, GraphInfo, UNDEFINED_SAMPLE};
use crate::graph::node::Covg;

pub const CTX_MAGIC: &[u8; 6] = b"CORTEX";
pub const CTX_VERSION: u32 = 6;

/// Everything the `.ctx` header carries, one entry of per-colour
/// metadata per file colour.
#[derive(Debug, Clone)]
pub struct GraphFileHeader {
    pub version: u32,
    pub kmer_size: usize,
    pub num_of_bitfields: u32,
    pub num_of_cols: usize,
    pub ginfo: Vec<GraphInfo>,
}

impl GraphFileHeader {
    /// Bytes the header occupies on disk.
    pub fn disk_size(&self) -> usize {
        let per_col: usize = self
            .ginfo
            .iter()
            .map(|info| {
                4 + 8
                    + len_string_bytes(&info.sample_name)
                    + 16
                    + (1 + 1 + 1 + 4 + 4 + len_string_bytes(&info.cleaning.cleaned_against))
            })
            .sum();
        CTX_MAGIC.len() * 2 + 4 * 4 + per_col
    }

    pub fn from_graph(graph: &Graph) -> GraphFileHeader {
        GraphFileHeader {
            version: CTX_VERSION,
            kmer_size: graph.kmer_size,
            num_of_bitfields: NUM_BKMER_WORDS as u32,
            num_of_cols: graph.num_of_cols,
            ginfo: graph.ginfo.clone(),
        }
    }
}

fn read_cleaning_info(r: &mut impl Read, path: &str) -> Result<CleaningInfo> {
    Ok(CleaningInfo {
        tip_clipping: read_u8(r, "tip cleaning flag", path)? != 0,
        rm_low_covg_supernodes: read_u8(r, "supernode cleaning flag", path)? != 0,
        rm_low_covg_nodes: read_u8(r, "node cleaning flag", path)? != 0,
        low_covg_supernodes_thr: read_u32(r, "supernode cleaning threshold", path)?,
        low_covg_nodes_thr: read_u32(r, "node cleaning threshold", path)?,
        cleaned_against: read_len_string(r, "cleaned-against name", path)?,
    })
}

fn write_cleaning_info(w: &mut impl Write, info: &CleaningInfo) -> Result<()> {
    w.write_all(&[
        info.tip_clipping as u8,
        info.rm_low_covg_supernodes as u8,
        info.rm_low_covg_nodes as u8,
    ])?;
    w.write_all(&info.low_covg_supernodes_thr.to_le_bytes())?;
    w.write_all(&info.low_covg_nodes_thr.to_le_bytes())?;
    write_len_string(w, &info.cleaned_against)?;
    Ok(())
}

/// Parse and validate a `.ctx` header.
pub fn read_header(r: &mut impl Read, path: &str) -> Result<GraphFileHeader> {
    let mut magic = [0u8; 6];
    r.read_exact(&mut magic)
        .with_context(|| format!("reading magic [{}]", path))?;
    if &magic != CTX_MAGIC {
        bail!("File is not a valid graph file [{}]", path);
    }

    let version = read_u32(r, "version", path)?;
    let kmer_size = read_u32(r, "kmer_size", path)? as usize;
    let num_of_bitfields = read_u32(r, "num_of_bitfields", path)?;
    let num_of_cols = read_u32(r, "num_of_cols", path)? as usize;

    if version != CTX_VERSION {
        bail!("Graph file version not supported [version: {}; {}]", version, path);
    }
    check_kmer_size(kmer_size, path)?;
    if num_of_bitfields as usize != NUM_BKMER_WORDS {
        bail!(
            "Graph file kmers use {} words; this build handles {} [{}]",
            num_of_bitfields,
            NUM_BKMER_WORDS,
            path
        );
    }
    if num_of_cols == 0 {
        bail!("Number of colours is zero [{}]", path);
    }
    if num_of_cols > MAX_FILE_COLOURS {
        bail!("Large number of colours: {} [{}]", num_of_cols, path);
    }

    let mut ginfo = vec![GraphInfo::default(); num_of_cols];
    for info in ginfo.iter_mut() {
        info.mean_read_length = read_u32(r, "mean read length", path)?;
    }
    for info in ginfo.iter_mut() {
        info.total_sequence = read_u64(r, "total sequence", path)?;
    }
    for info in ginfo.iter_mut() {
        info.sample_name = read_len_string(r, "sample name", path)?;
    }
    for info in ginfo.iter_mut() {
        r.read_exact(&mut info.error_rate)
            .with_context(|| format!("reading error rate [{}]", path))?;
    }
    for info in ginfo.iter_mut() {
        info.cleaning = read_cleaning_info(r, path)?;
    }

    r.read_exact(&mut magic)
        .with_context(|| format!("reading trailing magic [{}]", path))?;
    if &magic != CTX_MAGIC {
        bail!("Corrupt graph header: trailing magic missing [{}]", path);
    }

    Ok(GraphFileHeader {
        version,
        kmer_size,
        num_of_bitfields,
        num_of_cols,
        ginfo,
    })
}

pub fn write_header(w: &mut impl Write, hdr: &GraphFileHeader) -> Result<()> {
    w.write_all(CTX_MAGIC)?;
    w.write_all(&hdr.version.to_le_bytes())?;
    w.write_all(&(hdr.kmer_size as u32).to_le_bytes())?;
    w.write_all(&hdr.num_of_bitfields.to_le_bytes())?;
    w.write_all(&(hdr.num_of_cols as u32).to_le_bytes())?;
    for info in &hdr.ginfo {
        w.write_all(&info.mean_read_length.to_le_bytes())?;
    }
    for info in &hdr.ginfo {
        w.write_all(&info.total_sequence.to_le_bytes())?;
    }
    for info in &hdr.ginfo {
        write_len_string(w, &info.sample_name)?;
    }
    for info in &hdr.ginfo {
        w.write_all(&info.error_rate)?;
    }
    for info in &hdr.ginfo {
        write_cleaning_info(w, &info.cleaning)?;
    }
    w.write_all(CTX_MAGIC)?;
    Ok(())
}

/// How kmer records fold into the in-memory graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphLoadingPrefs {
    /// Skip kmers absent from the graph instead of inserting them.
    pub must_exist_in_graph: bool,
    /// Clamp loaded coverage to 0/1.
    pub boolean_covgs: bool,
}

/// A `.ctx` file opened through its colour filter.
pub struct GraphFileReader {
    pub fltr: FileFilter,
    pub hdr: GraphFileHeader,
    /// Source colours selected by the filter, in destination order.
    pub cols: Vec<usize>,
    pub num_kmers: u64,
    reader: BufReader<File>,
}

impl GraphFileReader {
    /// Bytes of one kmer record for a file with `ncols` colours.
    fn record_size(ncols: usize) -> usize {
        8 * NUM_BKMER_WORDS + ncols * 4 + ncols
    }

    /// Open `arg` (`[intocol:]path[:colspec]`), parse and validate the
    /// header, and size the record section against the file length.
    pub fn open(arg: &str) -> Result<GraphFileReader> {
        let fltr = FileFilter::parse(arg)?;
        let path = fltr.path.display().to_string();
        let file = File::open(&fltr.path).with_context(|| format!("Cannot open file: {}", path))?;
        let file_size = file
            .metadata()
            .with_context(|| format!("Cannot get file size: {}", path))?
            .len();
        let mut reader = BufReader::new(file);
        let hdr = read_header(&mut reader, &path)?;
        let cols = fltr.resolve(hdr.num_of_cols)?;

        let data_bytes = file_size - hdr.disk_size() as u64;
        let record_size = GraphFileReader::record_size(hdr.num_of_cols) as u64;
        if data_bytes % record_size != 0 {
            bail!(
                "Truncated graph file: {} trailing byte(s) [{}]",
                data_bytes % record_size,
                path
            );
        }

        Ok(GraphFileReader {
            num_kmers: data_bytes / record_size,
            fltr,
            hdr,
            cols,
            reader,
        })
    }

    /// Stream every record into `graph`, projecting colours through the
    /// filter. Returns the number of kmers loaded.
    pub fn load_into(&mut self, graph: &mut Graph, prefs: GraphLoadingPrefs) -> Result<u64> {
        let path = self.fltr.path.display().to_string();
        ensure!(
            self.hdr.kmer_size == graph.kmer_size,
            "Graph kmer size mismatch: {} != {} [{}]",
            self.hdr.kmer_size,
            graph.kmer_size,
            path
        );
        ensure!(
            self.fltr.intocol + self.cols.len() <= graph.num_of_cols,
            "Loading colours {}-{} into a graph of {} colour(s) [{}]",
            self.fltr.intocol,
            self.fltr.intocol + self.cols.len() - 1,
            graph.num_of_cols,
            path
        );

        self.fltr.print_status(self.hdr.num_of_cols);

        // Fill in sample names for colours still unnamed, fold in the
        // sequence totals behind the mean read length
        for (i, &src) in self.cols.iter().enumerate() {
            let dst = self.fltr.intocol + i;
            let src_info = &self.hdr.ginfo[src];
            if graph.ginfo[dst].sample_name == UNDEFINED_SAMPLE {
                graph.ginfo[dst].sample_name = src_info.sample_name.clone();
            }
            let src_reads = if src_info.mean_read_length > 0 {
                src_info.total_sequence / src_info.mean_read_length as u64
            } else {
                0
            };
            graph.ginfo[dst].update_seq_stats(src_info.total_sequence, src_reads);
        }

        let ncols = self.hdr.num_of_cols;
        let mut covgs = vec![0 as Covg; ncols];
        let mut edges = vec![0u8; ncols];
        let mut stats = LoadingStats::default();

        for _ in 0..self.num_kmers {
            let word = read_u64(&mut self.reader, "kmer", &path)?;
            let bkey = BinaryKmer(word);
            for covg in covgs.iter_mut() {
                *covg = read_u32(&mut self.reader, "coverage", &path)?;
            }
            for edge in edges.iter_mut() {
                *edge = read_u8(&mut self.reader, "edges", &path)?;
            }

            // Nothing to load in the selected colours
            if self
                .cols
                .iter()
                .all(|&src| covgs[src] == 0 && edges[src] == 0)
            {
                continue;
            }

            let node = if prefs.must_exist_in_graph {
                match graph.find(bkey) {
                    Some(node) => node,
                    None => continue,
                }
            } else {
                let (node, _) = graph.find_or_add_node_mt(bkey)?;
                node
            };

            for (i, &src) in self.cols.iter().enumerate() {
                let dst = self.fltr.intocol + i;
                if covgs[src] > 0 {
                    let covg = if prefs.boolean_covgs { 1 } else { covgs[src] };
                    graph.add_coverage_mt(node.key, dst, covg);
                    graph.set_in_colour_mt(node.key, dst);
                }
                if edges[src] != 0 {
                    graph.set_in_colour_mt(node.key, dst);
                    // With one shared edge plane every colour folds onto it
                    graph.union_edges_mt(node.key, graph.edge_col(dst), edges[src]);
                }
            }
            stats.num_kmers_loaded += 1;
        }

        info!(
            "[load] {}: {} kmers into {} colour(s)",
            path,
            stats.num_kmers_loaded,
            self.cols.len()
        );
        Ok(stats.num_kmers_loaded)
    }
}

/// Serialise the whole graph. Refuses to overwrite an existing file;
/// a file left half-written by a failure is removed.
pub fn write_graph(graph: &Graph, path: &Path) -> Result<u64> {
    if path.exists() {
        bail!("Output file already exists: {}", path.display());
    }
    write_graph_inner(graph, path).map_err(|e| {
        let _ = std::fs::remove_file(path);
        e
    })
}

fn write_graph_inner(graph: &Graph, path: &Path) -> Result<u64> {
    let file =
        File::create(path).with_context(|| format!("Cannot create file: {}", path.display()))?;
    let mut w = BufWriter::new(file);

    let hdr = GraphFileHeader::from_graph(graph);
    write_header(&mut w, &hdr)?;

    let mut num_kmers = 0u64;
    let mut err = None;
    graph.ht.for_each(|hkey, bkmer| {
        if err.is_some() {
            return;
        }
        let res = (|| -> Result<()> {
            w.write_all(&bkmer.0.to_le_bytes())?;
            for col in 0..graph.num_of_cols {
                w.write_all(&graph.covg(hkey, col).to_le_bytes())?;
            }
            for col in 0..graph.num_of_cols {
                let edges = graph.edges(hkey, graph.edge_col(col));
                w.write_all(&[edges])?;
            }
            Ok(())
        })();
        if let Err(e) = res {
            err = Some(e);
        }
        num_kmers += 1;
    });
    if let Some(e) = err {
        return Err(e).with_context(|| format!("writing graph records [{}]", path.display()));
    }

    w.flush()
        .with_context(|| format!("flushing graph file [{}]", path.display()))?;
    info!("[save] {}: {} kmers", path.display(), num_kmers);
    Ok(num_kmers)
}
