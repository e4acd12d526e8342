use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use tracing::{info, warn};

use crate::format::file_filter::FileFilter;
use crate::format::{read_len_string, read_u32, read_u64, write_len_string, MAX_FILE_COLOURS};
use crate::graph::binary_kmer::{check_kmer_size, BinaryKmer};
use crate::graph::db_graph::{Graph, UNDEFINED_SAMPLE};
use crate::graph::node::HashKey;
use crate::graph::packed_path::{colset_bytes, PathIndex, PATH_NULL, PREV_BYTES};
use crate::graph::path_set::PathSet;

pub const CTP_MAGIC: &[u8; 5] = b"PATHS";
pub const CTP_VERSION: u32 = 1;

// Format:
// -- Header --
// "PATHS"<u32:version><u32:kmer_size><u32:num_of_cols>
// <u64:num_of_paths><u64:num_path_bytes><u64:num_kmers_with_paths>
// -- Colours --
// <u32:len><len bytes:sample_name> x num_of_cols
// -- Data --
// <u8 x num_path_bytes:packed records>
// (<binary kmer><u64:path_index>) x num_kmers_with_paths

#[derive(Debug, Clone)]
pub struct PathFileHeader {
    pub version: u32,
    pub kmer_size: usize,
    pub num_of_cols: usize,
    pub num_of_paths: u64,
    pub num_path_bytes: u64,
    pub num_kmers_with_paths: u64,
    pub sample_names: Vec<String>,
}

/// Parse and validate a `.ctp` header.
pub fn read_header(r: &mut impl Read, path: &str) -> Result<PathFileHeader> {
    let mut magic = [0u8; 5];
    r.read_exact(&mut magic)
        .with_context(|| format!("reading magic [{}]", path))?;

    let version = read_u32(r, "version", path)?;
    let kmer_size = read_u32(r, "kmer_size", path)? as usize;
    let num_of_cols = read_u32(r, "num_of_cols", path)? as usize;
    let num_of_paths = read_u64(r, "num_of_paths", path)?;
    let num_path_bytes = read_u64(r, "num_path_bytes", path)?;
    let num_kmers_with_paths = read_u64(r, "num_kmers_with_paths", path)?;

    if num_of_cols > MAX_FILE_COLOURS {
        bail!("Large number of colours: {} [{}]", num_of_cols, path);
    }

    let mut sample_names = Vec::with_capacity(num_of_cols);
    for _ in 0..num_of_cols {
        sample_names.push(read_len_string(r, "sample name", path)?);
    }

    if &magic != CTP_MAGIC {
        bail!("File is not a valid paths file [{}]", path);
    }
    if version != CTP_VERSION {
        bail!("Paths file version not supported [version: {}; {}]", version, path);
    }
    check_kmer_size(kmer_size, path)?;
    if num_of_cols == 0 {
        bail!("Number of colours is zero [{}]", path);
    }

    Ok(PathFileHeader {
        version,
        kmer_size,
        num_of_cols,
        num_of_paths,
        num_path_bytes,
        num_kmers_with_paths,
        sample_names,
    })
}

pub fn write_header(w: &mut impl Write, hdr: &PathFileHeader) -> Result<()> {
    w.write_all(CTP_MAGIC)?;
    w.write_all(&hdr.version.to_le_bytes())?;
    w.write_all(&(hdr.kmer_size as u32).to_le_bytes())?;
    w.write_all(&(hdr.num_of_cols as u32).to_le_bytes())?;
    w.write_all(&hdr.num_of_paths.to_le_bytes())?;
    w.write_all(&hdr.num_path_bytes.to_le_bytes())?;
    w.write_all(&hdr.num_kmers_with_paths.to_le_bytes())?;
    for name in &hdr.sample_names {
        write_len_string(w, name)?;
    }
    Ok(())
}

/// A `.ctp` file opened through its colour filter.
pub struct PathFileReader {
    pub fltr: FileFilter,
    pub hdr: PathFileHeader,
    pub cols: Vec<usize>,
    reader: BufReader<File>,
}

impl PathFileReader {
    pub fn open(arg: &str) -> Result<PathFileReader> {
        let fltr = FileFilter::parse(arg)?;
        let path = fltr.path.display().to_string();
        let file = File::open(&fltr.path).with_context(|| format!("Cannot open file: {}", path))?;
        let mut reader = BufReader::new(file);
        let hdr = read_header(&mut reader, &path)?;
        let cols = fltr.resolve(hdr.num_of_cols)?;
        Ok(PathFileReader {
            fltr,
            hdr,
            cols,
            reader,
        })
    }

    fn path_str(&self) -> String {
        self.fltr.path.display().to_string()
    }

    fn check_against_graph(&self, graph: &Graph) -> Result<()> {
        let path = self.path_str();
        ensure!(
            self.hdr.kmer_size == graph.kmer_size,
            "Path file kmer size mismatch: {} != {} [{}]",
            self.hdr.kmer_size,
            graph.kmer_size,
            path
        );
        ensure!(
            self.fltr.intocol + self.cols.len() <= graph.pstore.num_of_cols(),
            "Loading path colours {}-{} into a store of {} colour(s) [{}]",
            self.fltr.intocol,
            self.fltr.intocol + self.cols.len() - 1,
            graph.pstore.num_of_cols(),
            path
        );
        Ok(())
    }

    /// Fill in sample names for graph colours still unnamed.
    fn update_sample_names(&self, graph: &mut Graph) {
        for (i, &src) in self.cols.iter().enumerate() {
            let dst = self.fltr.intocol + i;
            if graph.ginfo[dst].sample_name == UNDEFINED_SAMPLE {
                graph.ginfo[dst].sample_name = self.hdr.sample_names[src].clone();
            }
        }
    }

    /// Read one `{kmer, head index}` pair from the index section.
    fn read_kmer_entry(&mut self, path: &str) -> Result<(BinaryKmer, PathIndex)> {
        let bkmer = BinaryKmer(read_u64(&mut self.reader, "kmer", path)?);
        let pindex = read_u64(&mut self.reader, "kmer path index", path)?;
        if pindex > self.hdr.num_path_bytes {
            bail!(
                "Path index out of bounds [{} > {}] [{}]",
                pindex,
                self.hdr.num_path_bytes,
                path
            );
        }
        Ok((bkmer, pindex))
    }

    fn warn_unless_eof(&mut self, path: &str) {
        let mut end = [0u8; 1];
        if self.reader.read(&mut end).unwrap_or(0) != 0 {
            warn!("End of file not reached when loading! [{}]", path);
        }
    }

    /// Resolve a kmer from the index section to a graph node.
    fn kmer_to_hkey(
        &self,
        graph: &mut Graph,
        bkmer: BinaryKmer,
        insert_missing_kmers: bool,
        path: &str,
    ) -> Result<HashKey> {
        if insert_missing_kmers {
            let (node, _) = graph.find_or_add_node_mt(bkmer)?;
            Ok(node.key)
        } else {
            match graph.find(bkmer) {
                Some(node) => Ok(node.key),
                None => bail!(
                    "Node missing: {} [{}]",
                    bkmer.to_string(graph.kmer_size),
                    path
                ),
            }
        }
    }

    /// Load the whole file straight into the graph's untouched path
    /// store. The filter must be the identity; use
    /// [`paths_format_merge`] otherwise.
    pub fn load_into(&mut self, graph: &mut Graph, insert_missing_kmers: bool) -> Result<()> {
        let path = self.path_str();
        ensure!(
            self.fltr.is_identity(self.hdr.num_of_cols),
            "Direct path loading cannot apply a colour filter [{}]",
            path
        );
        // Raw records embed the colour bitset, so widths must agree
        ensure!(
            colset_bytes(self.hdr.num_of_cols) == graph.pstore.colset_bytes(),
            "Direct path loading needs matching colour counts: {} != {} [{}]",
            self.hdr.num_of_cols,
            graph.pstore.num_of_cols(),
            path
        );
        self.check_against_graph(graph)?;
        self.update_sample_names(graph);
        self.fltr.print_status(self.hdr.num_of_cols);

        let mut blob = vec![0u8; self.hdr.num_path_bytes as usize];
        self.reader
            .read_exact(&mut blob)
            .with_context(|| format!("reading path data [{}]", path))?;
        graph.pstore.load_blob(&blob, self.hdr.num_of_paths)?;

        for _ in 0..self.hdr.num_kmers_with_paths {
            let (bkmer, pindex) = self.read_kmer_entry(&path)?;
            let hkey = self.kmer_to_hkey(graph, bkmer, insert_missing_kmers, &path)?;
            graph.pstore.set_head(hkey, pindex);
        }

        self.warn_unless_eof(&path);
        graph.pstore.print_status();
        Ok(())
    }

    /// Merge this file into a store that may already hold paths,
    /// deduplicating against the existing chains. `rmv_redundant` also
    /// drops records that are prefixes of longer ones.
    pub fn merge_into(
        &mut self,
        graph: &mut Graph,
        insert_missing_kmers: bool,
        rmv_redundant: bool,
    ) -> Result<()> {
        let path = self.path_str();
        self.check_against_graph(graph)?;
        self.update_sample_names(graph);
        self.fltr.print_status(self.hdr.num_of_cols);

        let mut blob = vec![0u8; self.hdr.num_path_bytes as usize];
        self.reader
            .read_exact(&mut blob)
            .with_context(|| format!("reading path data [{}]", path))?;

        let file_cb = colset_bytes(self.hdr.num_of_cols);
        let store_cb = graph.pstore.colset_bytes();

        for _ in 0..self.hdr.num_kmers_with_paths {
            let (bkmer, pindex) = self.read_kmer_entry(&path)?;
            let hkey = self.kmer_to_hkey(graph, bkmer, insert_missing_kmers, &path)?;

            let mut incoming = PathSet::from_buffer(
                &blob,
                pindex,
                file_cb,
                &self.cols,
                self.fltr.intocol,
                store_cb,
            )?;
            if rmv_redundant {
                incoming.slim();
            }
            let existing = PathSet::from_store(&graph.pstore, graph.pstore.head(hkey));
            incoming.merge_into_existing(&existing, &graph.pstore);
            incoming.store_new_entries(&graph.pstore, hkey)?;
        }

        self.warn_unless_eof(&path);
        Ok(())
    }
}

/// Load one or more path files into the graph. The first file takes
/// the fast path when the store is untouched and needs no projection;
/// the rest merge chain by chain.
pub fn paths_format_merge(
    readers: &mut [PathFileReader],
    graph: &mut Graph,
    insert_missing_kmers: bool,
    rmv_redundant: bool,
) -> Result<()> {
    for reader in readers.iter_mut() {
        let direct = !graph.pstore.has_paths()
            && graph.pstore.num_of_bytes() == 0
            && reader.fltr.is_identity(reader.hdr.num_of_cols)
            && reader.hdr.num_of_cols == graph.pstore.num_of_cols()
            && !rmv_redundant;
        if direct {
            reader.load_into(graph, insert_missing_kmers)?;
        } else {
            reader.merge_into(graph, insert_missing_kmers, rmv_redundant)?;
        }
    }
    graph.pstore.print_status();
    Ok(())
}

/// Serialise the path store with records laid out in chain order and
/// `prev` pointers rewritten as file-local byte offsets. The reloaded
/// blob is traversable at arena offset zero without fixups.
pub fn write_optimised_paths(graph: &Graph, path: &Path) -> Result<()> {
    if path.exists() {
        bail!("Output file already exists: {}", path.display());
    }
    write_optimised_inner(graph, path).map_err(|e| {
        let _ = std::fs::remove_file(path);
        e
    })
}

fn write_optimised_inner(graph: &Graph, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Cannot create file: {}", path.display()))?;
    let mut w = BufWriter::new(file);

    let pstore = &graph.pstore;
    let cb = pstore.colset_bytes();

    // Sizing pass: chain traversal skips bytes dead since the last
    // defragmentation, so the header counts are recomputed here.
    let mut num_of_paths = 0u64;
    let mut num_path_bytes = 0u64;
    let mut num_kmers_with_paths = 0u64;
    graph.ht.for_each(|hkey, _| {
        let mut pindex = pstore.head(hkey);
        if pindex == PATH_NULL {
            return;
        }
        num_kmers_with_paths += 1;
        while pindex != PATH_NULL {
            let rec = pstore.record(pindex);
            num_of_paths += 1;
            num_path_bytes += rec.mem(cb) as u64;
            pindex = rec.prev;
        }
    });

    let hdr = PathFileHeader {
        version: CTP_VERSION,
        kmer_size: graph.kmer_size,
        num_of_cols: pstore.num_of_cols(),
        num_of_paths,
        num_path_bytes,
        num_kmers_with_paths,
        sample_names: graph
            .ginfo
            .iter()
            .take(pstore.num_of_cols())
            .map(|info| info.sample_name.clone())
            .collect(),
    };
    write_header(&mut w, &hdr)?;

    // Data pass: each record's prev becomes the offset just past it,
    // where the next record of the same chain lands.
    let mut kmer_heads: Vec<(BinaryKmer, PathIndex)> = Vec::new();
    let mut offset = 0u64;
    let mut err: Option<anyhow::Error> = None;
    graph.ht.for_each(|hkey, bkmer| {
        if err.is_some() {
            return;
        }
        let mut pindex = pstore.head(hkey);
        if pindex == PATH_NULL {
            return;
        }
        kmer_heads.push((bkmer, offset));
        while pindex != PATH_NULL {
            let rec = pstore.record(pindex);
            let mem = rec.mem(cb) as u64;
            pindex = rec.prev;
            offset += mem;
            let file_prev = if pindex == PATH_NULL { PATH_NULL } else { offset };
            let body = pstore.copy_out(rec.pindex + PREV_BYTES as u64, mem as usize - PREV_BYTES);
            let res = w
                .write_all(&file_prev.to_le_bytes())
                .and_then(|_| w.write_all(&body));
            if let Err(e) = res {
                err = Some(e.into());
                return;
            }
        }
    });
    if let Some(e) = err {
        return Err(e).with_context(|| format!("writing path records [{}]", path.display()));
    }

    for (bkmer, head) in &kmer_heads {
        w.write_all(&bkmer.0.to_le_bytes())?;
        w.write_all(&head.to_le_bytes())?;
    }

    w.flush()
        .with_context(|| format!("flushing paths file [{}]", path.display()))?;
    info!(
        "[save] {}: {} paths, {} bytes, {} kmers",
        path.display(),
        num_of_paths,
        num_path_bytes,
        num_kmers_with_paths
    );
    Ok(())
}
