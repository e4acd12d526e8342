pub mod opts;

use anyhow::{ensure, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use crate::cli::opts::{GraphInputArgs, PathInputArgs};
use crate::format::graph_file::{GraphFileReader, GraphLoadingPrefs};
use crate::format::path_file::{paths_format_merge, PathFileReader};
use crate::graph::db_graph::Graph;
use crate::graph::packed_path::colset_bytes;

/// Coarse per-file progress bar.
fn file_progress(len: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("       {bar:40} {pos}/{len} [{elapsed_precise}] {msg}")
            .context("building progress style")?,
    );
    Ok(pb)
}

/// Open every input, size a graph to fit them all, and stream them in.
pub fn load_graphs(graph_args: &GraphInputArgs, path_args: Option<&PathInputArgs>) -> Result<Graph> {
    ensure!(!graph_args.graphs.is_empty(), "No graph files given");

    let mut graph_readers = graph_args
        .graphs
        .iter()
        .map(|arg| GraphFileReader::open(arg))
        .collect::<Result<Vec<_>>>()?;

    let mut path_readers = match path_args {
        Some(args) => args
            .paths
            .iter()
            .map(|arg| PathFileReader::open(arg))
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    let kmer_size = graph_readers[0].hdr.kmer_size;
    let num_of_cols = graph_readers
        .iter()
        .map(|r| r.fltr.intocol + r.cols.len())
        .chain(path_readers.iter().map(|r| r.fltr.intocol + r.cols.len()))
        .max()
        .unwrap_or(1);

    let total_kmers: u64 = graph_readers.iter().map(|r| r.num_kmers).sum();
    let capacity = ((total_kmers as f64 * graph_args.capacity_factor) as u64).max(1024);

    // Colour bitsets may widen when projected into the merged store
    let store_cb = colset_bytes(num_of_cols);
    let path_mem: usize = path_readers
        .iter()
        .map(|r| {
            let file_cb = colset_bytes(r.hdr.num_of_cols);
            r.hdr.num_path_bytes as usize
                + r.hdr.num_of_paths as usize * store_cb.saturating_sub(file_cb)
        })
        .sum();

    let mut graph = Graph::new(kmer_size, num_of_cols, num_of_cols, capacity, path_mem * 2);

    let pb = file_progress((graph_readers.len() + path_readers.len()) as u64)?;
    for reader in graph_readers.iter_mut() {
        reader.load_into(&mut graph, GraphLoadingPrefs::default())?;
        pb.inc(1);
    }
    if let Some(args) = path_args {
        paths_format_merge(
            &mut path_readers,
            &mut graph,
            args.insert_missing_kmers,
            args.remove_redundant,
        )?;
        pb.inc(path_readers.len() as u64);
    }
    pb.finish_with_message("| Finished loading");

    graph.ht.print_stats();
    Ok(graph)
}
