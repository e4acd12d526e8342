use clap::Args;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct GraphInputArgs {
    /// Graph file(s) to load, `[intocol:]path.ctx[:colspec]` [path]
    #[clap(value_parser, required = true, help_heading = "Core")]
    pub graphs: Vec<String>,

    /// Number of threads to use [integer]
    #[clap(short = 't', long, default_value = "1", help_heading = "Core")]
    pub n_threads: usize,

    /// Extra hash-table headroom as a multiple of the kmers on disk
    ///
    /// Raise this when merging many files with little kmer overlap.
    #[clap(long, default_value = "2.0", help_heading = "Memory")]
    pub capacity_factor: f64,
}

#[derive(Debug, Args)]
pub struct PathInputArgs {
    /// Path file(s) to load, `[intocol:]path.ctp[:colspec]` [path]
    #[clap(short = 'p', long = "paths", value_parser, num_args = 1.., help_heading = "Core")]
    pub paths: Vec<String>,

    /// Insert kmers named by path files but missing from the graph [flag]
    #[clap(long, help_heading = "Core")]
    pub insert_missing_kmers: bool,

    /// Drop path records that repeat or prefix longer ones [flag]
    #[clap(long, alias = "rm-redundant", help_heading = "Core")]
    pub remove_redundant: bool,
}

#[derive(Debug, Args)]
pub struct OutputArgs {
    /// Output file [path]
    #[clap(short = 'o', long, value_parser, required = true, help_heading = "Core")]
    pub out: PathBuf,
}
