use matrix_util::dmatrix_io::*;
use matrix_util::mtx_io::*;
use matrix_util::traits::{ConvertMatOps, IoOps, MatTriplets};
use rand::Rng;

fn random_sparse(nrow: usize, ncol: usize) -> DMatrix<f32> {
    let mut rng = rand::rng();
    DMatrix::<f32>::from_fn(nrow, ncol, |_, _| {
        if rng.random_bool(0.3) {
            rng.random_range(0_f32..10_f32).round()
        } else {
            0.
        }
    })
}

#[test]
fn dmatrix_tensor_io_test() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let tsv_file = dir.path().join("x.txt.gz");
    let tsv_file = tsv_file.to_str().unwrap();

    let xx = random_sparse(30, 20);
    xx.to_tsv(tsv_file)?;

    let yy = candle_core::Tensor::from_tsv(tsv_file, None)?;
    let zz = DMatrix::<f32>::from_tensor(&yy)?;
    approx::assert_abs_diff_eq!(xx, zz);
    Ok(())
}

#[test]
fn mtx_densify_test() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mtx_file = dir.path().join("x.mtx.gz");
    let mtx_file = mtx_file.to_str().unwrap();

    let xx = random_sparse(25, 15);
    let triplets: Vec<(usize, usize, f32)> = xx
        .row_iter()
        .enumerate()
        .flat_map(|(i, row)| {
            row.iter()
                .enumerate()
                .filter(|(_, x)| **x != 0.)
                .map(|(j, &x)| (i, j, x))
                .collect::<Vec<_>>()
        })
        .collect();

    write_mtx_triplets(&triplets, 25, 15, mtx_file)?;
    let csr = read_mtx_csr(mtx_file)?;
    assert_eq!(csr.nnz(), triplets.len());
    assert_eq!(csr_to_dense(&csr), xx);

    let (nrow, ncol, back) = csr.to_nonzero_triplets()?;
    assert_eq!((nrow, ncol), (25, 15));
    assert_eq!(back.len(), triplets.len());
    Ok(())
}
