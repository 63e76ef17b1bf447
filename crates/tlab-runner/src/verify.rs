use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

use crate::catalog::FixtureDescriptor;
use crate::grid::Grid;

/// Outcome of a fully successful verification pass.
#[derive(Debug, PartialEq, Eq)]
pub struct VerifySummary {
    pub worker_dirs: usize,
    pub verified_pairs: usize,
}

/// Checks every downloaded matrix against the transpose of its source
/// fixture. Runs strictly after all workers finished and the server
/// stopped; the first mismatch is a hard failure.
pub fn verify_all(downloads_dir: &Path, catalog: &[FixtureDescriptor]) -> Result<VerifySummary> {
    let worker_dirs = find_worker_dirs(downloads_dir)?;
    if worker_dirs.is_empty() {
        bail!(
            "no worker result directories under {}",
            downloads_dir.display()
        );
    }

    let mut verified_pairs = 0;
    for dir in &worker_dirs {
        for desc in catalog {
            let downloaded = dir.join(&desc.name);
            info!(
                original = %desc.file_path.display(),
                result = %downloaded.display(),
                "verifying transposed matrix"
            );
            let original = Grid::load(&desc.file_path)?;
            let result = Grid::load(&downloaded)?;
            expect_transposed(&original, &result).with_context(|| {
                format!(
                    "{} is not the transpose of {}",
                    downloaded.display(),
                    desc.file_path.display()
                )
            })?;
            verified_pairs += 1;
        }
    }

    info!(
        workers = worker_dirs.len(),
        pairs = verified_pairs,
        "verification passed"
    );
    Ok(VerifySummary {
        worker_dirs: worker_dirs.len(),
        verified_pairs,
    })
}

/// Worker result trees are the numeric-named children of the downloads
/// directory, one per worker index.
fn find_worker_dirs(downloads_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in WalkDir::new(downloads_dir).min_depth(1).max_depth(1) {
        let entry = entry.context("scanning downloads directory")?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !name.is_empty() && name.chars().all(|c| c.is_ascii_digit()) {
            dirs.push(entry.into_path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Passes iff shapes match and `result[i][j] == original[j][i]` for every
/// cell.
pub fn expect_transposed(original: &Grid, result: &Grid) -> Result<()> {
    if original.shape() != result.shape() {
        bail!(
            "shape mismatch: original is {:?}, result is {:?}",
            original.shape(),
            result.shape()
        );
    }
    let (rows, cols) = result.shape();
    for i in 0..rows {
        for j in 0..cols {
            if result.get(i, j) != original.get(j, i) {
                bail!(
                    "cell ({}, {}) holds {:?} but the original holds {:?} at ({}, {})",
                    i,
                    j,
                    result.get(i, j),
                    original.get(j, i),
                    j,
                    i
                );
            }
        }
    }
    Ok(())
}
