use candle_core::{Result, Tensor};

/// KL divergence loss between a diagonal Gaussian and `N(0, I)`
///
/// 0.5 * sum_k (sigma^2 + mu^2 - 1 - log(sigma^2))
///
/// * `z_mean` - mean of Gaussian distribution
/// * `z_lnvar` - log variance of Gaussian distribution
///
/// Returns a per-sample vector (n)
pub fn gaussian_kl_loss(z_mean: &Tensor, z_lnvar: &Tensor) -> Result<Tensor> {
    let z_var = z_lnvar.exp()?;
    (z_var - 1. + z_mean.powf(2.)? - z_lnvar)?.sum(z_mean.rank() - 1)? * 0.5
}

/// Squared reconstruction error of each sample
///
/// err(i) = sum_w [ x(i,w) - xhat(i,w) ]^2
///
/// * `x_nd` - observed data (n x d), or any `n x ...` shape
/// * `hat_nd` - reconstruction of the same shape
///
pub fn squared_error_loss(x_nd: &Tensor, hat_nd: &Tensor) -> Result<Tensor> {
    if x_nd.dims() != hat_nd.dims() {
        candle_core::bail!(
            "reconstruction {:?} doesn't match data {:?}",
            hat_nd.dims(),
            x_nd.dims()
        );
    }
    x_nd.sub(hat_nd)?.sqr()?.flatten_from(1)?.sum(1)
}

/// Gaussian log-likelihood of unit variance
///
/// llik(i) = -0.5 * sum_w [ x(i,w) - xhat(i,w) ]^2
///
pub fn gaussian_likelihood(x_nd: &Tensor, hat_nd: &Tensor) -> Result<Tensor> {
    squared_error_loss(x_nd, hat_nd)? * (-0.5)
}
