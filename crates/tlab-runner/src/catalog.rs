use std::fmt;
use std::path::{Path, PathBuf};

/// Cell type of a generated test matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatrixType {
    Bool,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F64,
}

impl MatrixType {
    pub const ALL: [MatrixType; 10] = [
        MatrixType::Bool,
        MatrixType::U8,
        MatrixType::U16,
        MatrixType::U32,
        MatrixType::U64,
        MatrixType::I8,
        MatrixType::I16,
        MatrixType::I32,
        MatrixType::I64,
        MatrixType::F64,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatrixType::Bool => "bool",
            MatrixType::U8 => "u8",
            MatrixType::U16 => "u16",
            MatrixType::U32 => "u32",
            MatrixType::U64 => "u64",
            MatrixType::I8 => "i8",
            MatrixType::I16 => "i16",
            MatrixType::I32 => "i32",
            MatrixType::I64 => "i64",
            MatrixType::F64 => "f64",
        }
    }
}

impl fmt::Display for MatrixType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Size classes, as (label, dimension) of a square matrix.
pub const SIZES: [(&str, usize); 5] = [
    ("tiny", 4),
    ("small", 12),
    ("normal", 100),
    ("big", 1000),
    ("large", 10000),
];

/// One generated matrix file. Built once at startup and shared read-only
/// across all workers.
#[derive(Debug, Clone)]
pub struct FixtureDescriptor {
    pub name: String,
    pub file_path: PathBuf,
    pub mtype: MatrixType,
    pub dimension: usize,
}

impl FixtureDescriptor {
    pub fn new(size: &str, dimension: usize, mtype: MatrixType, fixtures_dir: &Path) -> Self {
        let name = format!("{}_{}_matrix.csv", size, mtype.as_str());
        let file_path = fixtures_dir.join(&name);
        Self {
            name,
            file_path,
            mtype,
            dimension,
        }
    }
}

/// The full fixture catalog: every type crossed with every size class.
pub fn catalog(fixtures_dir: &Path) -> Vec<FixtureDescriptor> {
    let mut out = Vec::with_capacity(MatrixType::ALL.len() * SIZES.len());
    for mtype in MatrixType::ALL {
        for (size, dimension) in SIZES {
            out.push(FixtureDescriptor::new(size, dimension, mtype, fixtures_dir));
        }
    }
    out
}
