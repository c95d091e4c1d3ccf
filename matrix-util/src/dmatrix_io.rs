use crate::common_io::{Delimiter, read_lines_of_types, write_lines};
use crate::traits::*;
use candle_core::{Device, Tensor};
pub use nalgebra::DMatrix;
pub use nalgebra_sparse::{coo::CooMatrix, csr::CsrMatrix};

use std::fmt::Display;
use std::str::FromStr;

impl<T> IoOps for DMatrix<T>
where
    T: nalgebra::Scalar + Send + FromStr + Display + Copy,
    <T as FromStr>::Err: Display,
{
    type Scalar = T;
    type Mat = Self;

    fn read_file_delim(
        file: &str,
        delim: impl Into<Delimiter>,
        skip: Option<usize>,
    ) -> anyhow::Result<Self::Mat> {
        let data = read_lines_of_types::<T>(file, delim, skip)?.lines;

        if data.is_empty() {
            return Err(anyhow::anyhow!("no data in {}", file));
        }

        let ncols = data[0].len();
        let nrows = data.len();

        if let Some((i, row)) = data.iter().enumerate().find(|(_, r)| r.len() != ncols) {
            return Err(anyhow::anyhow!(
                "{}: row {} has {} columns, but expected {}",
                file,
                i + 1,
                row.len(),
                ncols
            ));
        }

        let data = data.into_iter().flatten();
        Ok(DMatrix::<T>::from_row_iterator(nrows, ncols, data))
    }

    fn write_file_delim(&self, file: &str, delim: &str) -> anyhow::Result<()> {
        // keep the order of the rows
        let lines = self
            .row_iter()
            .map(|row| {
                row.iter()
                    .map(|x| format!("{}", *x))
                    .collect::<Vec<String>>()
                    .join(delim)
                    .into_boxed_str()
            })
            .collect::<Vec<_>>();

        write_lines(&lines, file)?;
        Ok(())
    }
}

impl ConvertMatOps for DMatrix<f32> {
    type Mat = Self;
    type Scalar = f32;

    fn from_tensor(x: &Tensor) -> anyhow::Result<Self::Mat> {
        let (nrow, ncol) = x.dims2()?;
        let data = x
            .to_dtype(candle_core::DType::F32)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        Ok(DMatrix::<f32>::from_row_iterator(nrow, ncol, data))
    }

    fn to_tensor(&self, dev: &Device) -> anyhow::Result<Tensor> {
        // nalgebra stores columns; candle wants rows
        let data: Vec<f32> = self.transpose().as_slice().to_vec();
        Ok(Tensor::from_vec(data, (self.nrows(), self.ncols()), dev)?)
    }
}

impl MatTriplets for CsrMatrix<f32> {
    type Mat = Self;
    type Scalar = f32;

    fn from_nonzero_triplets(
        nrow: usize,
        ncol: usize,
        triplets: Vec<(usize, usize, Self::Scalar)>,
    ) -> anyhow::Result<Self::Mat> {
        let mut coo = CooMatrix::<f32>::new(nrow, ncol);
        for (i, j, x_ij) in triplets {
            if i >= nrow || j >= ncol {
                return Err(anyhow::anyhow!(
                    "triplet ({}, {}) out of bounds {} x {}",
                    i,
                    j,
                    nrow,
                    ncol
                ));
            }
            coo.push(i, j, x_ij);
        }
        Ok(CsrMatrix::from(&coo))
    }

    fn to_nonzero_triplets(
        &self,
    ) -> anyhow::Result<(usize, usize, Vec<(usize, usize, Self::Scalar)>)> {
        let triplets = self
            .triplet_iter()
            .map(|(i, j, &x_ij)| (i, j, x_ij))
            .collect();
        Ok((self.nrows(), self.ncols(), triplets))
    }
}

/// Densify a sparse matrix
pub fn csr_to_dense(csr: &CsrMatrix<f32>) -> DMatrix<f32> {
    nalgebra_sparse::convert::serial::convert_csr_dense(csr)
}
