use crate::candle_aux_layers::*;
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, ModuleT, VarBuilder};

/// Fully connected conditional encoder: `concat(x, y) -> fc -> z`
pub struct DenseConditionalEncoder {
    n_features: usize,
    n_conditions: usize,
    n_latent: usize,
    fc: StackLayers<DenseBlock>,
    z_mean: Linear,
    z_lnvar: Option<Linear>,
}

impl ConditionalEncoderT for DenseConditionalEncoder {
    fn forward_t(
        &self,
        x_nd: &Tensor,
        y_nc: &Tensor,
        noise_nk: Option<&Tensor>,
        train: bool,
    ) -> Result<EncoderLatent> {
        let h_nl = self.hidden(x_nd, y_nc, train)?;
        let z_mean = self.z_mean.forward(&h_nl)?;

        match &self.z_lnvar {
            Some(z_lnvar) => {
                let z_lnvar = z_lnvar.forward(&h_nl)?.clamp(-8., 8.)?;
                let z = reparameterize(&z_mean, &z_lnvar, noise_nk)?;
                Ok(EncoderLatent {
                    z_mean,
                    z_lnvar: Some(z_lnvar),
                    z,
                })
            }
            None => Ok(EncoderLatent {
                z: z_mean.clone(),
                z_mean,
                z_lnvar: None,
            }),
        }
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }

    fn is_variational(&self) -> bool {
        self.z_lnvar.is_some()
    }
}

impl DenseConditionalEncoder {
    fn hidden(&self, x_nd: &Tensor, y_nc: &Tensor, train: bool) -> Result<Tensor> {
        let x_nd = x_nd.flatten_from(1)?;
        if x_nd.dim(1)? != self.n_features || y_nc.dim(1)? != self.n_conditions {
            candle_core::bail!(
                "expected {} features and {} conditions, but found {:?} and {:?}",
                self.n_features,
                self.n_conditions,
                x_nd.dims(),
                y_nc.dims()
            );
        }
        let xy = Tensor::cat(&[&x_nd, &y_nc.to_dtype(x_nd.dtype())?], 1)?;
        self.fc.forward_t(&xy, train)
    }

    /// Will create a new encoder module with these variables:
    ///
    /// * `fc.{}.linear.weight` and `fc.{}.bn.*` where {} is the layer index
    /// * `z.mean.{weight,bias}`
    /// * `z.lnvar.{weight,bias}` if variational
    ///
    /// # Arguments
    /// * `n_features` - the number of (flattened) input features
    /// * `n_conditions` - the number of conditions (one-hot width)
    /// * `n_latent` - latent dimension
    /// * `layers` - fully connected layers, each with the dim
    /// * `dropout_rate` - dropout after each hidden layer
    /// * `variational` - Gaussian latent (mean, log-variance) or a deterministic code
    /// * `vs` - variable builder
    pub fn new(
        n_features: usize,
        n_conditions: usize,
        n_latent: usize,
        layers: &[usize],
        dropout_rate: f32,
        variational: bool,
        vs: VarBuilder,
    ) -> Result<Self> {
        if layers.is_empty() {
            candle_core::bail!("need at least one hidden layer");
        }

        let mut fc = StackLayers::<DenseBlock>::new();
        let mut prev_dim = n_features + n_conditions;
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

        let z_mean = candle_nn::linear(prev_dim, n_latent, vs.pp("z.mean"))?;
        let z_lnvar = if variational {
            Some(candle_nn::linear(prev_dim, n_latent, vs.pp("z.lnvar"))?)
        } else {
            None
        };

        Ok(Self {
            n_features,
            n_conditions,
            n_latent,
            fc,
            z_mean,
            z_lnvar,
        })
    }
}
