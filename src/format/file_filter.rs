use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::info;

/// A path argument with an optional colour projection:
/// `[intocol:]path[:colspec]` where colspec is a comma list of single
/// colours or dash ranges over the file's colours, e.g.
/// `2:graphs/sample.ctx:0,3-5` loads file colours 0,3,4,5 into graph
/// colours 2..6. Without a colspec every file colour loads in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFilter {
    pub path: PathBuf,
    pub intocol: usize,
    cols: Option<Vec<usize>>,
}

fn is_colspec(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_digit() || b == b',' || b == b'-')
}

/// Expand `0,2-4` into `[0,2,3,4]`.
fn parse_ranges(spec: &str) -> Result<Vec<usize>> {
    let mut cols = Vec::new();
    for part in spec.split(',') {
        match part.split_once('-') {
            None => {
                let col: usize = part
                    .parse()
                    .with_context(|| format!("bad colour '{}' in filter", part))?;
                cols.push(col);
            }
            Some((from, to)) => {
                let from: usize = from
                    .parse()
                    .with_context(|| format!("bad colour range '{}' in filter", part))?;
                let to: usize = to
                    .parse()
                    .with_context(|| format!("bad colour range '{}' in filter", part))?;
                if from > to {
                    bail!("Colour range is backwards: {}", part);
                }
                cols.extend(from..=to);
            }
        }
    }
    Ok(cols)
}

impl FileFilter {
    /// Plain filter: whole file, loaded from colour zero.
    pub fn direct(path: &Path) -> FileFilter {
        FileFilter {
            path: path.to_owned(),
            intocol: 0,
            cols: None,
        }
    }

    pub fn parse(arg: &str) -> Result<FileFilter> {
        let mut rest = arg;
        let mut intocol = 0usize;

        // Leading "<digits>:" names the destination colour
        if let Some((head, tail)) = rest.split_once(':') {
            if !head.is_empty() && head.bytes().all(|b| b.is_ascii_digit()) {
                intocol = head.parse().context("bad intocol in filter")?;
                rest = tail;
            }
        }

        // Trailing ":<colspec>" selects source colours
        let mut cols = None;
        if let Some((head, tail)) = rest.rsplit_once(':') {
            if !head.is_empty() && is_colspec(tail) {
                cols = Some(parse_ranges(tail)?);
                rest = head;
            }
        }

        if rest.is_empty() {
            bail!("Empty path in file filter: '{}'", arg);
        }

        Ok(FileFilter {
            path: PathBuf::from(rest),
            intocol,
            cols,
        })
    }

    /// The source colours this filter loads, in destination order.
    /// Errors if any named colour is outside the file's colour count.
    pub fn resolve(&self, file_ncols: usize) -> Result<Vec<usize>> {
        match &self.cols {
            None => Ok((0..file_ncols).collect()),
            Some(cols) => {
                for &col in cols {
                    if col >= file_ncols {
                        bail!(
                            "Filter colour {} out of range: {} has {} colour(s)",
                            col,
                            self.path.display(),
                            file_ncols
                        );
                    }
                }
                Ok(cols.clone())
            }
        }
    }

    /// Does this filter load the whole file unchanged?
    pub fn is_identity(&self, file_ncols: usize) -> bool {
        self.intocol == 0
            && match &self.cols {
                None => true,
                Some(cols) => cols.iter().copied().eq(0..file_ncols),
            }
    }

    /// Number of destination colours written.
    pub fn into_ncols(&self, file_ncols: usize) -> usize {
        match &self.cols {
            None => file_ncols,
            Some(cols) => cols.len(),
        }
    }

    /// One status line describing the projection.
    pub fn print_status(&self, file_ncols: usize) {
        let ncols = self.into_ncols(file_ncols);
        match &self.cols {
            None => info!("[load] {}", self.path.display()),
            Some(cols) => info!(
                "[load] {} with colour filter: {:?}",
                self.path.display(),
                cols
            ),
        }
        if ncols == 1 {
            info!("[load]   into colour {}", self.intocol);
        } else {
            info!(
                "[load]   into colours {}-{}",
                self.intocol,
                self.intocol + ncols - 1
            );
        }
    }
}
