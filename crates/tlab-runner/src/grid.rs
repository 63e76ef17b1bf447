//! Header-less CSV grids of exact scalar values.

use anyhow::{anyhow, bail, Context, Result};
use std::path::Path;
use std::str::FromStr;

/// One matrix cell. Integer and float cells never compare equal, which
/// matches parse-then-compare verification: a server echoing `5` where the
/// fixture held `5.0` is a mismatch in formatting class, not a pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i128),
    Float(f64),
}

impl FromStr for Scalar {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(i) = s.parse::<i128>() {
            return Ok(Scalar::Int(i));
        }
        s.parse::<f64>()
            .map(Scalar::Float)
            .map_err(|_| anyhow!("cell is not a number: {:?}", s))
    }
}

/// A rectangular grid loaded from a header-less, comma-separated file.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    cells: Vec<Vec<Scalar>>,
    cols: usize,
}

impl Grid {
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .with_context(|| format!("unable to open grid {}", path.display()))?;

        let mut cells = Vec::new();
        for record in reader.records() {
            let record = record.with_context(|| format!("malformed grid {}", path.display()))?;
            let row = record
                .iter()
                .map(Scalar::from_str)
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("malformed grid {}", path.display()))?;
            cells.push(row);
        }
        if cells.is_empty() {
            bail!("grid {} is empty", path.display());
        }
        let cols = cells[0].len();
        Ok(Self { cells, cols })
    }

    pub fn rows(&self) -> usize {
        self.cells.len()
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows(), self.cols)
    }

    pub fn get(&self, row: usize, col: usize) -> &Scalar {
        &self.cells[row][col]
    }
}
