use matrix_util::common_io::read_lines;
use matrix_util::dmatrix_io::{csr_to_dense, CsrMatrix, DMatrix};
use matrix_util::mtx_io::read_mtx_csr;
use matrix_util::traits::{ConvertMatOps, IoOps};

use candle_core::{Device, Tensor};
use log::info;

/// Cells (rows) by features (columns)
#[derive(Clone, Debug)]
pub enum ExpressionMatrix {
    Dense(DMatrix<f32>),
    Sparse(CsrMatrix<f32>),
}

impl ExpressionMatrix {
    pub fn nrows(&self) -> usize {
        match self {
            Self::Dense(x) => x.nrows(),
            Self::Sparse(x) => x.nrows(),
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            Self::Dense(x) => x.ncols(),
            Self::Sparse(x) => x.ncols(),
        }
    }

    pub fn to_dense(&self) -> DMatrix<f32> {
        match self {
            Self::Dense(x) => x.clone(),
            Self::Sparse(x) => csr_to_dense(x),
        }
    }

    /// Densify into an `n x d` tensor
    pub fn to_tensor(&self, dev: &Device) -> anyhow::Result<Tensor> {
        match self {
            Self::Dense(x) => x.to_tensor(dev),
            Self::Sparse(x) => csr_to_dense(x).to_tensor(dev),
        }
    }
}

impl From<DMatrix<f32>> for ExpressionMatrix {
    fn from(x: DMatrix<f32>) -> Self {
        Self::Dense(x)
    }
}

impl From<CsrMatrix<f32>> for ExpressionMatrix {
    fn from(x: CsrMatrix<f32>) -> Self {
        Self::Sparse(x)
    }
}

/// Expression matrix with one condition label per cell
#[derive(Clone, Debug)]
pub struct AnnotatedData {
    pub x: ExpressionMatrix,
    pub conditions: Vec<Box<str>>,
}

impl AnnotatedData {
    pub fn new(x: impl Into<ExpressionMatrix>, conditions: Vec<Box<str>>) -> anyhow::Result<Self> {
        let x = x.into();
        if x.nrows() != conditions.len() {
            return Err(anyhow::anyhow!(
                "{} cells vs. {} condition labels",
                x.nrows(),
                conditions.len()
            ));
        }
        Ok(Self { x, conditions })
    }

    /// Read a data matrix and its labels
    /// * `data_file` - `.mtx[.gz]` (sparse) or delimited text (dense), cells in rows
    /// * `label_file` - one condition label per line
    pub fn read(data_file: &str, label_file: &str) -> anyhow::Result<Self> {
        let x: ExpressionMatrix = if is_mtx(data_file) {
            read_mtx_csr(data_file)?.into()
        } else {
            DMatrix::<f32>::from_file(data_file, None)?.into()
        };

        let conditions: Vec<Box<str>> = read_lines(label_file)?
            .into_iter()
            .map(|s| s.trim().to_string().into_boxed_str())
            .filter(|s| !s.is_empty())
            .collect();

        info!(
            "read {} x {} data from {} with labels from {}",
            x.nrows(),
            x.ncols(),
            data_file,
            label_file
        );

        Self::new(x, conditions)
    }

    pub fn num_cells(&self) -> usize {
        self.x.nrows()
    }

    pub fn num_features(&self) -> usize {
        self.x.ncols()
    }
}

fn is_mtx(file: &str) -> bool {
    let file = file.strip_suffix(".gz").unwrap_or(file);
    file.ends_with(".mtx")
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrix_util::common_io::write_lines;
    use matrix_util::mtx_io::write_mtx_triplets;

    #[test]
    fn sparse_and_dense_files_agree() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mtx_file = dir.path().join("x.mtx.gz");
        let tsv_file = dir.path().join("x.tsv");
        let lab_file = dir.path().join("y.txt");
        let mtx_file = mtx_file.to_str().unwrap();
        let tsv_file = tsv_file.to_str().unwrap();
        let lab_file = lab_file.to_str().unwrap();

        write_mtx_triplets(&[(0, 1, 2.), (2, 0, 3.)], 3, 2, mtx_file)?;
        write_lines(&["0\t2", "0\t0", "3\t0"], tsv_file)?;
        write_lines(&["ctrl", "stim", "ctrl"], lab_file)?;

        let sparse = AnnotatedData::read(mtx_file, lab_file)?;
        let dense = AnnotatedData::read(tsv_file, lab_file)?;
        assert!(matches!(sparse.x, ExpressionMatrix::Sparse(_)));
        assert_eq!(sparse.num_cells(), 3);
        assert_eq!(sparse.x.to_dense(), dense.x.to_dense());
        assert_eq!(sparse.conditions[1].as_ref(), "stim");

        let t = sparse.x.to_tensor(&Device::Cpu)?;
        assert_eq!(t.to_vec2::<f32>()?[2], vec![3., 0.]);
        Ok(())
    }

    #[test]
    fn label_count_must_match() {
        let x = DMatrix::<f32>::zeros(3, 2);
        assert!(AnnotatedData::new(x, vec!["a".into()]).is_err());
    }
}
