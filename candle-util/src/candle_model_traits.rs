use candle_core::{Result, Tensor};

/// Latent inference of a conditional encoder
pub struct EncoderLatent {
    /// latent mean (n x k), or the deterministic code
    pub z_mean: Tensor,
    /// latent log-variance (n x k), only for variational encoders
    pub z_lnvar: Option<Tensor>,
    /// sampled latent state (n x k)
    pub z: Tensor,
}

/// Outputs of a conditional decoder
pub struct DecoderOutput {
    /// reconstruction of the same shape as the input
    pub recon: Tensor,
    /// activations of the MMD layer (n x m)
    pub mmd: Tensor,
}

pub trait ConditionalEncoderT {
    /// Encode data with respect to its condition
    ///
    /// # Arguments
    /// * `x_nd` - input data (n x d), or (n x c x h x w) for images
    /// * `y_nc` - one-hot condition labels (n x c)
    /// * `noise_nk` - standard normal noise for reparameterization;
    ///   if `None`, `z` is the latent mean
    /// * `train` - whether to use dropout/batchnorm or not
    fn forward_t(
        &self,
        x_nd: &Tensor,
        y_nc: &Tensor,
        noise_nk: Option<&Tensor>,
        train: bool,
    ) -> Result<EncoderLatent>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;

    fn is_variational(&self) -> bool;
}

pub trait ConditionalDecoderT {
    /// Map latent states to the MMD layer
    /// * `z_nk` - latent states
    /// * `y_nc` - one-hot condition labels (n x c)
    fn forward_mmd_t(&self, z_nk: &Tensor, y_nc: &Tensor, train: bool) -> Result<Tensor>;

    /// Finish decoding from the MMD layer
    fn forward_from_mmd_t(&self, h_nm: &Tensor, train: bool) -> Result<Tensor>;

    /// A decoder that spits out reconstruction and the MMD layer
    fn forward_t(&self, z_nk: &Tensor, y_nc: &Tensor, train: bool) -> Result<DecoderOutput> {
        let mmd = self.forward_mmd_t(z_nk, y_nc, train)?;
        let recon = self.forward_from_mmd_t(&mmd, train)?;
        Ok(DecoderOutput { recon, mmd })
    }

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;

    fn dim_mmd(&self) -> usize;
}

/// `z = mean + exp(lnvar / 2) * eps`
///
/// * `z_mean` - latent mean (n x k)
/// * `z_lnvar` - latent log-variance (n x k)
/// * `noise_nk` - `eps ~ N(0, I)`, or `None` to return the mean
pub fn reparameterize(
    z_mean: &Tensor,
    z_lnvar: &Tensor,
    noise_nk: Option<&Tensor>,
) -> Result<Tensor> {
    match noise_nk {
        Some(eps) => {
            if eps.dims() != z_mean.dims() {
                candle_core::bail!(
                    "noise {:?} doesn't match latent {:?}",
                    eps.dims(),
                    z_mean.dims()
                );
            }
            z_mean + (z_lnvar * 0.5)?.exp()?.mul(eps)?
        }
        None => Ok(z_mean.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::{DType, Device};

    #[test]
    fn reparameterize_with_and_without_noise() -> Result<()> {
        let dev = Device::Cpu;
        let mean = Tensor::new(&[[1_f32, -1.]], &dev)?;
        let lnvar = Tensor::new(&[[0_f32, 2_f32.ln() * 2.]], &dev)?;

        let z = reparameterize(&mean, &lnvar, None)?.to_vec2::<f32>()?;
        assert_eq!(z, vec![vec![1., -1.]]);

        let eps = Tensor::ones((1, 2), DType::F32, &dev)?;
        let z = reparameterize(&mean, &lnvar, Some(&eps))?.to_vec2::<f32>()?;
        assert_abs_diff_eq!(z[0][0], 2.0, epsilon = 1e-5);
        assert_abs_diff_eq!(z[0][1], 1.0, epsilon = 1e-5);

        let bad = Tensor::ones((2, 2), DType::F32, &dev)?;
        assert!(reparameterize(&mean, &lnvar, Some(&bad)).is_err());
        Ok(())
    }
}
