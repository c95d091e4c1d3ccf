use crate::candle_aux_layers::*;
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{Activation, Dropout, Linear, Module, ModuleT, VarBuilder};

/// Fully connected conditional decoder:
/// `concat(z, y) -> mmd -> fc -> x`
pub struct DenseConditionalDecoder {
    n_features: usize,
    n_conditions: usize,
    n_latent: usize,
    n_mmd: usize,
    mmd: DenseBlock,
    mmd_dropout: Option<Dropout>,
    fc: StackLayers<DenseBlock>,
    out: Linear,
    out_activation: Option<Activation>,
}

impl ConditionalDecoderT for DenseConditionalDecoder {
    fn forward_mmd_t(&self, z_nk: &Tensor, y_nc: &Tensor, train: bool) -> Result<Tensor> {
        if z_nk.dim(1)? != self.n_latent || y_nc.dim(1)? != self.n_conditions {
            candle_core::bail!(
                "expected {} latent dims and {} conditions, but found {:?} and {:?}",
                self.n_latent,
                self.n_conditions,
                z_nk.dims(),
                y_nc.dims()
            );
        }
        let zy = Tensor::cat(&[z_nk, &y_nc.to_dtype(z_nk.dtype())?], 1)?;
        self.mmd.forward_t(&zy, train)
    }

    fn forward_from_mmd_t(&self, h_nm: &Tensor, train: bool) -> Result<Tensor> {
        let h = match &self.mmd_dropout {
            Some(dropout) => dropout.forward_t(h_nm, train)?,
            None => h_nm.clone(),
        };
        let h = self.fc.forward_t(&h, train)?;
        let x_nd = self.out.forward(&h)?;
        match &self.out_activation {
            Some(act) => act.forward(&x_nd),
            None => Ok(x_nd),
        }
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }

    fn dim_mmd(&self) -> usize {
        self.n_mmd
    }
}

impl DenseConditionalDecoder {
    /// Will create a new decoder module with these variables:
    ///
    /// * `mmd.linear.weight`, `mmd.bn.*`
    /// * `fc.{}.linear.weight`, `fc.{}.bn.*` where {} is the layer index
    /// * `out.{weight,bias}`
    ///
    /// # Arguments
    /// * `n_features` - output dimension
    /// * `n_conditions` - the number of conditions
    /// * `n_latent` - latent dimension
    /// * `n_mmd` - width of the MMD layer
    /// * `layers` - hidden layers after the MMD layer
    /// * `dropout_rate` - dropout after each hidden layer
    /// * `out_activation` - `Some(Relu)` for non-negative output, `None` for linear
    /// * `vs` - variable builder
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        n_features: usize,
        n_conditions: usize,
        n_latent: usize,
        n_mmd: usize,
        layers: &[usize],
        dropout_rate: f32,
        out_activation: Option<Activation>,
        vs: VarBuilder,
    ) -> Result<Self> {
        let mmd = DenseBlock::new(
            DenseBlockArgs {
                in_dim: n_latent + n_conditions,
                out_dim: n_mmd,
                bias: false,
                batch_norm: true,
                activation: leaky_relu(),
                dropout_rate: 0.,
            },
            vs.pp("mmd"),
        )?;
        let mmd_dropout = (dropout_rate > 0.).then(|| Dropout::new(dropout_rate));

        let mut fc = StackLayers::<DenseBlock>::new();
        let mut prev_dim = n_mmd;
        for (j, &next_dim) in layers.iter().enumerate() {
            fc.push(DenseBlock::new(
                DenseBlockArgs {
                    in_dim: prev_dim,
                    out_dim: next_dim,
                    bias: false,
                    batch_norm: true,
                    activation: leaky_relu(),
                    dropout_rate,
                },
                vs.pp(format!("fc.{}", j)),
            )?);
            prev_dim = next_dim;
        }

        let out = candle_nn::linear(prev_dim, n_features, vs.pp("out"))?;

        Ok(Self {
            n_features,
            n_conditions,
            n_latent,
            n_mmd,
            mmd,
            mmd_dropout,
            fc,
            out,
            out_activation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn split_decoding_matches_full_pass() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

        let dec = DenseConditionalDecoder::new(
            10,
            3,
            4,
            6,
            &[8, 16],
            0.2,
            Some(Activation::Relu),
            vb.pp("dec"),
        )?;
        assert_eq!(dec.dim_mmd(), 6);

        let z = Tensor::randn(0_f32, 1., (5, 4), &dev)?;
        let y = crate::candle_mmd::one_hot_labels(&[0, 1, 2, 2, 0], 3, &dev)?;

        let out = dec.forward_t(&z, &y, false)?;
        assert_eq!(out.recon.dims(), &[5, 10]);
        assert_eq!(out.mmd.dims(), &[5, 6]);
        assert!(out.recon.min_all()?.to_scalar::<f32>()? >= 0.);

        let recon = dec.forward_from_mmd_t(&out.mmd, false)?;
        let diff = (recon - &out.recon)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.);

        let bad_y = crate::candle_mmd::one_hot_labels(&[0, 1, 1, 1, 0], 2, &dev)?;
        assert!(dec.forward_t(&z, &bad_y, false).is_err());
        Ok(())
    }
}
