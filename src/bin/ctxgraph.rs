use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;

use ctxgraph::cli::opts::{GraphInputArgs, OutputArgs, PathInputArgs};
use ctxgraph::cli::load_graphs;
use ctxgraph::format::path_file::write_optimised_paths;
use ctxgraph::graph::db_graph::Graph;
use ctxgraph::graph::node::{edges_to_string, Orientation};
use ctxgraph::graph::packed_path::PATH_NULL;

/// Inspect and merge coloured de Bruijn graph (.ctx) and path (.ctp)
/// files.
#[derive(Parser)]
#[command(name = "ctxgraph", version, about)]
struct Cli {
    /// Only print warnings and errors [flag]
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every kmer with its per-colour coverage and edges
    View {
        #[command(flatten)]
        graphs: GraphInputArgs,
    },
    /// Check graph edge consistency and path-store integrity
    Check {
        #[command(flatten)]
        graphs: GraphInputArgs,
        #[command(flatten)]
        paths: PathInputArgs,
    },
    /// Print the link records attached to each kmer
    Pview {
        #[command(flatten)]
        graphs: GraphInputArgs,
        #[command(flatten)]
        paths: PathInputArgs,
    },
    /// Merge path files into one optimised .ctp
    Join {
        #[command(flatten)]
        graphs: GraphInputArgs,
        #[command(flatten)]
        paths: PathInputArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
}

fn main() {
    // Catch and handle errors; exit non-zero on failure
    if let Err(e) = run() {
        eprintln!("{:?}", e);
        std::process::exit(1);
    }
    std::process::exit(0);
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet { Level::WARN } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::View { graphs } => {
            setup_threads(graphs.n_threads)?;
            let graph = load_graphs(&graphs, None)?;
            print_kmers(&graph)
        }
        Commands::Check { graphs, paths } => {
            setup_threads(graphs.n_threads)?;
            let graph = load_graphs(&graphs, Some(&paths))?;
            graph.healthcheck()?;
            graph.pstore.integrity_check()?;
            println!("ok");
            Ok(())
        }
        Commands::Pview { graphs, paths } => {
            setup_threads(graphs.n_threads)?;
            let graph = load_graphs(&graphs, Some(&paths))?;
            print_paths(&graph)
        }
        Commands::Join {
            graphs,
            paths,
            output,
        } => {
            setup_threads(graphs.n_threads)?;
            let graph = load_graphs(&graphs, Some(&paths))?;
            write_optimised_paths(&graph, &output.out)
        }
    }
}

fn setup_threads(n_threads: usize) -> Result<()> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .build_global()
        .context("building Rayon thread pool")
}

fn print_kmers(graph: &Graph) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut err = None;
    graph.ht.for_each(|hkey, bkmer| {
        if err.is_some() {
            return;
        }
        let mut line = bkmer.to_string(graph.kmer_size);
        for col in 0..graph.num_of_cols {
            line.push_str(&format!(" {}", graph.covg(hkey, col)));
        }
        for col in 0..graph.num_of_cols {
            line.push(' ');
            line.push_str(&edges_to_string(graph.edges(hkey, graph.edge_col(col))));
        }
        line.push('\n');
        if let Err(e) = out.write_all(line.as_bytes()) {
            err = Some(e);
        }
    });
    match err {
        Some(e) => Err(e).context("writing kmers"),
        None => Ok(()),
    }
}

fn print_paths(graph: &Graph) -> Result<()> {
    let pstore = &graph.pstore;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut err = None;

    graph.ht.for_each(|hkey, bkmer| {
        if err.is_some() || pstore.head(hkey) == PATH_NULL {
            return;
        }
        let res = (|| -> Result<()> {
            for orient in [Orientation::Forward, Orientation::Reverse] {
                let mut pindex = pstore.head(hkey);
                let mut first = true;
                while pindex != PATH_NULL {
                    let rec = pstore.record(pindex);
                    if rec.orient == orient {
                        if first {
                            writeln!(
                                out,
                                "{}:{}",
                                bkmer.to_string(graph.kmer_size),
                                orient as u8
                            )?;
                            first = false;
                        }
                        let seq: String = (0..rec.plen)
                            .map(|i| pstore.record_seq_nuc(pindex, i).to_char() as char)
                            .collect();
                        let cols: Vec<usize> = (0..pstore.num_of_cols())
                            .filter(|&col| pstore.record_in_colour(pindex, col))
                            .collect();
                        writeln!(out, "  {} cols={:?} seq={}", rec.plen, cols, seq)?;
                    }
                    pindex = rec.prev;
                }
            }
            Ok(())
        })();
        if let Err(e) = res {
            err = Some(e);
        }
    });

    match err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
