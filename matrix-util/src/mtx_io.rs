use crate::common_io::*;
use crate::dmatrix_io::CsrMatrix;
use crate::traits::MatTriplets;
use rayon::prelude::*;
use std::io::Write;

/// Write the triplets into a MatrixMarket file with 1-based indices
/// * `triplets` - the triplets to write
/// * `nrow` - number of rows
/// * `ncol` - number of columns
/// * `mtx_file` - the output file (e.g., "matrix.mtx.gz")
pub fn write_mtx_triplets(
    triplets: &[(usize, usize, f32)],
    nrow: usize,
    ncol: usize,
    mtx_file: &str,
) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(mtx_file)?;

    let nnz = triplets.len();
    writeln!(buf, "%%MatrixMarket matrix coordinate real general")?;
    writeln!(buf, "{}\t{}\t{}", nrow, ncol, nnz)?;

    for (row, col, val) in triplets {
        writeln!(buf, "{}\t{}\t{}", row + 1, col + 1, val)?;
    }

    buf.flush()?;
    Ok(())
}

/// Read a matrix market file and return a vector of 0-based triplets
/// (row, col, val) with the shape `(nrow, ncol)`
/// * `mtx_file` - Path to the matrix market file
pub fn read_mtx_triplets(
    mtx_file: &str,
) -> anyhow::Result<(Vec<(usize, usize, f32)>, (usize, usize))> {
    let ReadLinesOut { lines, header } = read_lines_of_words(mtx_file, Some(0))?;

    if header.len() != 3 {
        return Err(anyhow::anyhow!(
            "{}: failed to parse the size line {:?}",
            mtx_file,
            header
        ));
    }

    let nrow = header[0].parse::<usize>()?;
    let ncol = header[1].parse::<usize>()?;
    let nnz = header[2].parse::<usize>()?;

    fn parse_row_col_val(words: &[Box<str>]) -> Option<(usize, usize, f32)> {
        if words.len() != 3 {
            return None;
        }
        // convert 1-based to 0-based
        let row = words[0].parse::<usize>().ok()?.checked_sub(1)?;
        let col = words[1].parse::<usize>().ok()?.checked_sub(1)?;
        let val = words[2].parse::<f32>().ok()?;
        Some((row, col, val))
    }

    let triplets = lines
        .par_iter()
        .enumerate()
        .map(|(i, words)| {
            parse_row_col_val(words)
                .ok_or_else(|| anyhow::anyhow!("{}: bad entry #{}: {:?}", mtx_file, i + 1, words))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    if triplets.len() != nnz {
        log::warn!(
            "{}: expected {} non-zero elements, but found {}",
            mtx_file,
            nnz,
            triplets.len()
        );
    }

    Ok((triplets, (nrow, ncol)))
}

/// Read a matrix market file into a sparse matrix
pub fn read_mtx_csr(mtx_file: &str) -> anyhow::Result<CsrMatrix<f32>> {
    let (triplets, (nrow, ncol)) = read_mtx_triplets(mtx_file)?;
    CsrMatrix::<f32>::from_nonzero_triplets(nrow, ncol, triplets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mtx_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("m.mtx.gz");
        let file = file.to_str().unwrap();

        let triplets = vec![(0, 0, 1.5), (2, 1, -2.)];
        write_mtx_triplets(&triplets, 3, 2, file)?;

        let (read, shape) = read_mtx_triplets(file)?;
        assert_eq!(shape, (3, 2));
        assert_eq!(read, triplets);

        let csr = read_mtx_csr(file)?;
        assert_eq!(csr.nnz(), 2);
        assert_eq!(csr.nrows(), 3);
        Ok(())
    }

    #[test]
    fn zero_index_is_an_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("bad.mtx");
        let file = file.to_str().unwrap();
        write_lines(
            &["%%MatrixMarket matrix coordinate real general", "2 2 1", "0 1 1.0"],
            file,
        )?;
        assert!(read_mtx_triplets(file).is_err());
        Ok(())
    }
}
