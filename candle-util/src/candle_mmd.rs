use candle_core::{Device, Result, Tensor};
use serde::{Deserialize, Serialize};

/// Bandwidths of the default multi-scale RBF kernel
pub const MULTI_SCALE_SIGMAS: [f64; 19] = [
    1e-6, 1e-5, 1e-4, 1e-3, 1e-2, 1e-1, 1., 5., 10., 15., 20., 25., 30., 35., 100., 1e3, 1e4,
    1e5, 1e6,
];

/// Kernels to compare two sets of vectors
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MmdKernel {
    /// `exp(-|x - y|^2 / d)`
    Rbf,
    /// average of `exp(-|x - y|^2 / (2 sigma))` over `MULTI_SCALE_SIGMAS`
    #[default]
    MultiScaleRbf,
    /// `sum_i w(i) * exp(-|x - y|^2 / s(i)^2)`
    Raphy { scales: Vec<f64>, weights: Vec<f64> },
}

impl MmdKernel {
    /// A weighted multi-bandwidth kernel. Missing weights will be
    /// uniform `1/|scales|`.
    pub fn raphy(scales: Vec<f64>, weights: Option<Vec<f64>>) -> Result<Self> {
        if scales.is_empty() {
            candle_core::bail!("raphy kernel needs at least one scale");
        }
        if scales.iter().any(|&s| s <= 0.) {
            candle_core::bail!("raphy kernel scales must be positive: {:?}", scales);
        }
        let weights = match weights {
            Some(w) if w.len() != scales.len() => {
                candle_core::bail!(
                    "raphy kernel: {} weights vs. {} scales",
                    w.len(),
                    scales.len()
                );
            }
            Some(w) => w,
            None => vec![1. / scales.len() as f64; scales.len()],
        };
        Ok(Self::Raphy { scales, weights })
    }
}

/// How condition groups are paired up in the MMD loss
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MmdPairing {
    /// every pair `(j, k)` with `j < k`
    #[default]
    AllPairs,
    /// adjacent pairs `(k, k + 1)`, weighted by `n_conditions - 1 - k`
    /// (the nested-loop chain of the trVAE multi-condition loss)
    Chain,
}

/// Pairwise squared Euclidean distances
///
/// * `x_nd` - n x d
/// * `y_md` - m x d
///
/// Returns `n x m` matrix
pub fn squared_distance(x_nd: &Tensor, y_md: &Tensor) -> Result<Tensor> {
    let x_n1d = x_nd.unsqueeze(1)?;
    let y_1md = y_md.unsqueeze(0)?;
    x_n1d.broadcast_sub(&y_1md)?.sqr()?.sum(2)
}

/// Kernel matrix `K(x_i, y_j)` of size `n x m`
pub fn compute_kernel(x_nd: &Tensor, y_md: &Tensor, kernel: &MmdKernel) -> Result<Tensor> {
    let (_, d) = x_nd.dims2()?;
    let (_, d_y) = y_md.dims2()?;
    if d != d_y {
        candle_core::bail!("kernel on mismatched dimensions: {} vs. {}", d, d_y);
    }

    let dist_nm = squared_distance(x_nd, y_md)?;

    match kernel {
        MmdKernel::Rbf => (dist_nm * (-1. / d as f64))?.exp(),
        MmdKernel::MultiScaleRbf => {
            let mut ret = dist_nm.zeros_like()?;
            for sigma in MULTI_SCALE_SIGMAS {
                let beta = 1. / (2. * sigma);
                ret = (ret + (&dist_nm * (-beta))?.exp()?)?;
            }
            ret / MULTI_SCALE_SIGMAS.len() as f64
        }
        MmdKernel::Raphy { scales, weights } => {
            let mut ret = dist_nm.zeros_like()?;
            for (&s, &w) in scales.iter().zip(weights.iter()) {
                ret = (ret + ((&dist_nm * (-1. / (s * s)))?.exp()? * w)?)?;
            }
            Ok(ret)
        }
    }
}

/// Maximum mean discrepancy between two samples
///
/// mmd = E[K(x,x')] + E[K(y,y')] - 2 E[K(x,y)]
///
/// Returns a scalar tensor; empty samples are errors.
pub fn compute_mmd(x_nd: &Tensor, y_md: &Tensor, kernel: &MmdKernel) -> Result<Tensor> {
    if x_nd.dim(0)? == 0 || y_md.dim(0)? == 0 {
        candle_core::bail!(
            "mmd on an empty sample: {:?} vs. {:?}",
            x_nd.dims(),
            y_md.dims()
        );
    }
    let k_xx = compute_kernel(x_nd, x_nd, kernel)?.mean_all()?;
    let k_yy = compute_kernel(y_md, y_md, kernel)?.mean_all()?;
    let k_xy = compute_kernel(x_nd, y_md, kernel)?.mean_all()?;
    (k_xx + k_yy)? - (k_xy * 2.)?
}

/// Group sample indexes by their condition codes. The `k`-th element
/// holds the rows of condition `k`; codes `>= n_conditions` are
/// errors.
pub fn partition_by_label(labels: &[u32], n_conditions: usize) -> Result<Vec<Vec<u32>>> {
    let mut groups = vec![vec![]; n_conditions];
    for (i, &k) in labels.iter().enumerate() {
        let k = k as usize;
        if k >= n_conditions {
            candle_core::bail!("condition code {} out of range [0, {})", k, n_conditions);
        }
        groups[k].push(i as u32);
    }
    Ok(groups)
}

/// Sum of MMD between condition-specific groups of rows
///
/// * `h_nd` - representation (n x d) to align across conditions
/// * `labels` - condition code of each row
/// * `n_conditions` - number of possible codes
/// * `kernel` - kernel function
/// * `pairing` - which pairs of groups are compared
///
/// Pairs involving an empty group contribute zero.
pub fn condition_mmd_loss(
    h_nd: &Tensor,
    labels: &[u32],
    n_conditions: usize,
    kernel: &MmdKernel,
    pairing: MmdPairing,
) -> Result<Tensor> {
    let n = h_nd.dim(0)?;
    if n != labels.len() {
        candle_core::bail!("{} rows vs. {} labels", n, labels.len());
    }

    let groups = partition_by_label(labels, n_conditions)?;
    let device = h_nd.device();

    let h_by_condition = groups
        .iter()
        .map(|rows| gather_rows(h_nd, rows, device))
        .collect::<Result<Vec<_>>>()?;

    let pairs: Vec<(usize, usize, f64)> = match pairing {
        MmdPairing::AllPairs => (0..n_conditions)
            .flat_map(|k| (0..k).map(move |j| (j, k, 1.)))
            .collect(),
        MmdPairing::Chain => (1..n_conditions)
            .map(|k| (k - 1, k, (n_conditions - k) as f64))
            .collect(),
    };

    let mut loss = Tensor::zeros((), h_nd.dtype(), device)?;
    for (j, k, weight) in pairs {
        if let (Some(h_j), Some(h_k)) = (&h_by_condition[j], &h_by_condition[k]) {
            loss = (loss + (compute_mmd(h_j, h_k, kernel)? * weight)?)?;
        } else {
            log::debug!("skipping empty condition pair ({}, {})", j, k);
        }
    }
    Ok(loss)
}

fn gather_rows(h_nd: &Tensor, rows: &[u32], device: &Device) -> Result<Option<Tensor>> {
    if rows.is_empty() {
        return Ok(None);
    }
    let idx = Tensor::from_slice(rows, rows.len(), device)?;
    Ok(Some(h_nd.index_select(&idx, 0)?))
}

/// One-hot encoding of condition codes (n x n_conditions)
pub fn one_hot_labels(labels: &[u32], n_conditions: usize, device: &Device) -> Result<Tensor> {
    let mut data = vec![0_f32; labels.len() * n_conditions];
    for (i, &k) in labels.iter().enumerate() {
        let k = k as usize;
        if k >= n_conditions {
            candle_core::bail!("condition code {} out of range [0, {})", k, n_conditions);
        }
        data[i * n_conditions + k] = 1.;
    }
    Tensor::from_vec(data, (labels.len(), n_conditions), device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::DType;

    fn kernels() -> Vec<MmdKernel> {
        vec![
            MmdKernel::Rbf,
            MmdKernel::MultiScaleRbf,
            MmdKernel::raphy(vec![0.5, 1., 2.], None).unwrap(),
        ]
    }

    #[test]
    fn rbf_literal_values() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::new(&[[0_f32, 0.]], &dev)?;
        let y = Tensor::new(&[[1_f32, 1.]], &dev)?;

        let k_xx = compute_kernel(&x, &x, &MmdKernel::Rbf)?.to_vec2::<f32>()?;
        let k_xy = compute_kernel(&x, &y, &MmdKernel::Rbf)?.to_vec2::<f32>()?;

        assert_abs_diff_eq!(k_xx[0][0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(k_xy[0][0], (-1_f32).exp(), epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn squared_distance_shape_and_values() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::new(&[[0_f32, 0.], [1., 2.], [3., 0.]], &dev)?;
        let y = Tensor::new(&[[0_f32, 1.], [1., 1.]], &dev)?;
        let d = squared_distance(&x, &y)?;
        assert_eq!(d.dims(), &[3, 2]);
        let d = d.to_vec2::<f32>()?;
        assert_abs_diff_eq!(d[0][0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(d[1][1], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(d[2][0], 10.0, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn multi_scale_kernel_is_bounded() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::randn(0_f32, 1., (7, 4), &dev)?;
        let k = compute_kernel(&x, &x, &MmdKernel::MultiScaleRbf)?;
        let diag = k.to_vec2::<f32>()?;
        for (i, row) in diag.iter().enumerate() {
            assert_abs_diff_eq!(row[i], 1.0, epsilon = 1e-5);
            for &v in row {
                assert!((0. ..=1.0 + 1e-5).contains(&v));
            }
        }
        Ok(())
    }

    #[test]
    fn self_mmd_is_zero() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::randn(0_f32, 1., (20, 5), &dev)?;
        for kernel in kernels() {
            let mmd = compute_mmd(&x, &x, &kernel)?.to_scalar::<f32>()?;
            assert_abs_diff_eq!(mmd, 0.0, epsilon = 1e-5);
        }
        Ok(())
    }

    #[test]
    fn mmd_is_symmetric() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::randn(0_f32, 1., (15, 3), &dev)?;
        let y = Tensor::randn(0.5_f32, 1., (9, 3), &dev)?;
        for kernel in kernels() {
            let xy = compute_mmd(&x, &y, &kernel)?.to_scalar::<f32>()?;
            let yx = compute_mmd(&y, &x, &kernel)?.to_scalar::<f32>()?;
            assert_abs_diff_eq!(xy, yx, epsilon = 1e-5);
        }
        Ok(())
    }

    #[test]
    fn mmd_detects_shift() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::randn(0_f32, 1., (30, 2), &dev)?;
        let y = (Tensor::randn(0_f32, 1., (30, 2), &dev)? + 5.)?;
        let near = compute_mmd(&x, &x, &MmdKernel::Rbf)?.to_scalar::<f32>()?;
        let far = compute_mmd(&x, &y, &MmdKernel::Rbf)?.to_scalar::<f32>()?;
        assert!(far > near + 0.1, "far {} vs. near {}", far, near);
        Ok(())
    }

    #[test]
    fn singleton_groups_are_finite() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::new(&[[1_f32, 2.]], &dev)?;
        let y = Tensor::new(&[[3_f32, 4.]], &dev)?;
        let mmd = compute_mmd(&x, &y, &MmdKernel::MultiScaleRbf)?.to_scalar::<f32>()?;
        assert!(mmd.is_finite());
        Ok(())
    }

    #[test]
    fn empty_sample_is_an_error() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::zeros((0, 3), DType::F32, &dev)?;
        let y = Tensor::ones((2, 3), DType::F32, &dev)?;
        assert!(compute_mmd(&x, &y, &MmdKernel::Rbf).is_err());
        Ok(())
    }

    #[test]
    fn partition_groups_rows() -> Result<()> {
        let groups = partition_by_label(&[2, 0, 2, 1, 0], 4)?;
        assert_eq!(groups, vec![vec![1, 4], vec![3], vec![0, 2], vec![]]);
        assert!(partition_by_label(&[0, 5], 3).is_err());
        Ok(())
    }

    #[test]
    fn empty_condition_contributes_nothing() -> Result<()> {
        let dev = Device::Cpu;
        let h = Tensor::randn(0_f32, 1., (6, 3), &dev)?;
        let loss = condition_mmd_loss(
            &h,
            &[0, 0, 0, 0, 0, 0],
            3,
            &MmdKernel::MultiScaleRbf,
            MmdPairing::AllPairs,
        )?
        .to_scalar::<f32>()?;
        assert_eq!(loss, 0.);
        Ok(())
    }

    #[test]
    fn pairing_orders() -> Result<()> {
        let dev = Device::Cpu;
        let h = Tensor::new(&[[0_f32], [1.], [3.], [6.]], &dev)?;
        let labels = [0, 1, 2, 2];
        let kernel = MmdKernel::Rbf;

        let part = |rows: &[u32]| -> Result<Tensor> {
            h.index_select(&Tensor::from_slice(rows, rows.len(), &dev)?, 0)
        };
        let (g0, g1, g2) = (part(&[0])?, part(&[1])?, part(&[2, 3])?);
        let m01 = compute_mmd(&g0, &g1, &kernel)?.to_scalar::<f32>()?;
        let m02 = compute_mmd(&g0, &g2, &kernel)?.to_scalar::<f32>()?;
        let m12 = compute_mmd(&g1, &g2, &kernel)?.to_scalar::<f32>()?;

        let all = condition_mmd_loss(&h, &labels, 3, &kernel, MmdPairing::AllPairs)?
            .to_scalar::<f32>()?;
        let chain = condition_mmd_loss(&h, &labels, 3, &kernel, MmdPairing::Chain)?
            .to_scalar::<f32>()?;

        assert_abs_diff_eq!(all, m01 + m02 + m12, epsilon = 1e-5);
        // (0, 1) is compared twice, (1, 2) once
        assert_abs_diff_eq!(chain, 2. * m01 + m12, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn raphy_validates_parameters() {
        assert!(MmdKernel::raphy(vec![], None).is_err());
        assert!(MmdKernel::raphy(vec![1., 2.], Some(vec![1.])).is_err());
        assert!(MmdKernel::raphy(vec![0.], None).is_err());
        match MmdKernel::raphy(vec![1., 2., 4., 8.], None).unwrap() {
            MmdKernel::Raphy { weights, .. } => assert_eq!(weights, vec![0.25; 4]),
            _ => unreachable!(),
        }
    }

    #[test]
    fn one_hot_rows() -> Result<()> {
        let y = one_hot_labels(&[1, 0, 2], 3, &Device::Cpu)?.to_vec2::<f32>()?;
        assert_eq!(y, vec![vec![0., 1., 0.], vec![1., 0., 0.], vec![0., 0., 1.]]);
        assert!(one_hot_labels(&[3], 3, &Device::Cpu).is_err());
        Ok(())
    }
}
