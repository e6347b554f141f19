//! Matrix Market input and output through `sprs::io`.

use std::path::Path;

use anyhow::{Context, Result};
use pslu_core::SparseColumns;
use sprs::CsMat;

/// Read a square real matrix and convert it to validated CSC.
pub fn read_matrix(path: &Path) -> Result<SparseColumns> {
    let triplets = sprs::io::read_matrix_market::<f64, usize, _>(path)
        .with_context(|| format!("reading Matrix Market file {}", path.display()))?;
    let csc: CsMat<f64> = triplets.to_csc();
    let columns = SparseColumns::from_sprs(csc.view())
        .with_context(|| format!("loading {}", path.display()))?;
    Ok(columns)
}

pub fn write_matrix(path: &Path, a: &SparseColumns) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let csc = a.to_sprs();
    sprs::io::write_matrix_market(path, &csc)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pslu_core::gallery;
    use tempfile::tempdir;

    #[test]
    fn test_written_matrix_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grid.mtx");
        let a = gallery::convection_diffusion_2d(4, 2.0).unwrap();
        write_matrix(&path, &a).unwrap();

        let b = read_matrix(&path).unwrap();
        assert_eq!(b.n(), a.n());
        assert_eq!(b.nnz(), a.nnz());
        for j in 0..a.n() {
            assert_eq!(b.column_rows(j), a.column_rows(j));
        }
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = read_matrix(Path::new("/nonexistent/matrix.mtx")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/matrix.mtx"));
    }
}
