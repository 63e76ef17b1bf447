use anyhow::{Context, Result};
use rand::prelude::*;
use std::fs;
use tracing::{debug, info};

use crate::catalog::{FixtureDescriptor, MatrixType};

/// Generates every missing fixture in the catalog. Already-present files
/// are skipped untouched so reruns do not regenerate large matrices.
pub fn generate_all(catalog: &[FixtureDescriptor]) -> Result<()> {
    info!(fixtures = catalog.len(), "generating test matrices");
    for desc in catalog {
        if desc.file_path.exists() {
            debug!(fixture = %desc.name, "fixture already exists, skipping");
            continue;
        }
        info!(fixture = %desc.name, dimension = desc.dimension, "generating fixture");
        generate_one(desc)?;
    }
    Ok(())
}

fn generate_one(desc: &FixtureDescriptor) -> Result<()> {
    if let Some(parent) = desc.file_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("unable to create {}", parent.display()))?;
    }

    // Written to a temp name and renamed so an interrupted run never leaves
    // a half-generated file that a later run would skip as complete.
    let tmp = desc.file_path.with_extension("csv.tmp");
    let mut writer = csv::WriterBuilder::new()
        .from_path(&tmp)
        .with_context(|| format!("unable to create {}", tmp.display()))?;

    let mut rng = rand::thread_rng();
    for _ in 0..desc.dimension {
        let row: Vec<String> = (0..desc.dimension)
            .map(|_| sample_cell(desc.mtype, &mut rng))
            .collect();
        writer.write_record(&row)?;
    }
    writer.flush()?;
    drop(writer);

    fs::rename(&tmp, &desc.file_path)
        .with_context(|| format!("unable to move fixture into {}", desc.file_path.display()))?;
    Ok(())
}

/// Samples one cell uniformly over the type's natural range: full-width
/// integer ranges, `{0, 1}` for bool, `[0, f64::MAX)` for floats.
fn sample_cell<R: Rng>(mtype: MatrixType, rng: &mut R) -> String {
    match mtype {
        MatrixType::Bool => u8::from(rng.gen::<bool>()).to_string(),
        MatrixType::U8 => rng.gen::<u8>().to_string(),
        MatrixType::U16 => rng.gen::<u16>().to_string(),
        MatrixType::U32 => rng.gen::<u32>().to_string(),
        MatrixType::U64 => rng.gen::<u64>().to_string(),
        MatrixType::I8 => rng.gen::<i8>().to_string(),
        MatrixType::I16 => rng.gen::<i16>().to_string(),
        MatrixType::I32 => rng.gen::<i32>().to_string(),
        MatrixType::I64 => rng.gen::<i64>().to_string(),
        // Exponent form: plain Display would expand values near f64::MAX
        // to hundreds of digits per cell. Both round-trip exactly.
        MatrixType::F64 => format!("{:e}", rng.gen::<f64>() * f64::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Grid, Scalar};
    use std::path::{Path, PathBuf};

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "tlab_fixtures_{}_{}_{}",
            tag,
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&dir).expect("temp dir");
        dir
    }

    fn small_catalog(dir: &Path) -> Vec<FixtureDescriptor> {
        MatrixType::ALL
            .iter()
            .map(|&mtype| FixtureDescriptor::new("tiny", 4, mtype, dir))
            .collect()
    }

    #[test]
    fn generates_square_grids_for_every_type() {
        let dir = temp_dir("gen");
        let catalog = small_catalog(&dir);
        generate_all(&catalog).expect("generate");
        for desc in &catalog {
            let grid = Grid::load(&desc.file_path).expect("generated grid loads");
            assert_eq!(grid.shape(), (4, 4), "fixture {}", desc.name);
        }
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn regeneration_leaves_existing_fixtures_unchanged() {
        let dir = temp_dir("idem");
        let catalog = small_catalog(&dir);
        generate_all(&catalog).expect("first generation");
        let before: Vec<Vec<u8>> = catalog
            .iter()
            .map(|d| fs::read(&d.file_path).expect("read fixture"))
            .collect();
        generate_all(&catalog).expect("second generation");
        for (desc, expected) in catalog.iter().zip(&before) {
            let after = fs::read(&desc.file_path).expect("read fixture");
            assert_eq!(&after, expected, "fixture {} was rewritten", desc.name);
        }
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn bool_cells_are_zero_or_one() {
        let dir = temp_dir("bool");
        let desc = FixtureDescriptor::new("tiny", 4, MatrixType::Bool, &dir);
        generate_all(std::slice::from_ref(&desc)).expect("generate");
        let grid = Grid::load(&desc.file_path).expect("load");
        for i in 0..4 {
            for j in 0..4 {
                match grid.get(i, j) {
                    Scalar::Int(v) => assert!(*v == 0 || *v == 1, "bool cell {}", v),
                    other => panic!("bool cell parsed as {:?}", other),
                }
            }
        }
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn float_cells_are_non_negative_floats() {
        let dir = temp_dir("float");
        let desc = FixtureDescriptor::new("tiny", 4, MatrixType::F64, &dir);
        generate_all(std::slice::from_ref(&desc)).expect("generate");
        let grid = Grid::load(&desc.file_path).expect("load");
        for i in 0..4 {
            for j in 0..4 {
                match grid.get(i, j) {
                    Scalar::Float(v) => assert!(*v >= 0.0 && v.is_finite(), "float cell {}", v),
                    other => panic!("float cell parsed as {:?}", other),
                }
            }
        }
        let _ = fs::remove_dir_all(dir);
    }
}
