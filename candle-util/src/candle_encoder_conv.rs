use crate::candle_aux_layers::*;
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{Activation, Dropout, Linear, Module, ModuleT, VarBuilder};

/// Channel widths of the four UNet resolution levels
pub const UNET_FILTERS: [usize; 4] = [32, 64, 128, 256];

/// Width of the fully connected layers around the UNet bottleneck
pub const UNET_DENSE_DIM: usize = 1024;

/// `(channels, height, width)` of images stored as flattened rows
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl ImageShape {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    pub fn numel(&self) -> usize {
        self.channels * self.height * self.width
    }

    /// Check that both spatial sides can be halved `n_halvings` times
    pub fn check_divisible(&self, n_halvings: u32) -> Result<()> {
        let factor = 2_usize.pow(n_halvings);
        if self.height % factor != 0 || self.width % factor != 0 || self.height == 0 {
            candle_core::bail!(
                "image {}x{} must be divisible by {}",
                self.height,
                self.width,
                factor
            );
        }
        Ok(())
    }

    /// (n x c*h*w) -> (n x c x h x w)
    pub fn unflatten(&self, x_nd: &Tensor) -> Result<Tensor> {
        let n = x_nd.dim(0)?;
        x_nd.reshape((n, self.channels, self.height, self.width))
    }
}

/// Turns one-hot labels into an extra image channel:
/// `y -> Dense(128, relu) -> Dense(h*w, relu) -> (n x 1 x h x w)`
pub struct LabelChannel {
    fc1: Linear,
    fc2: Linear,
    height: usize,
    width: usize,
}

impl LabelChannel {
    pub fn new(n_conditions: usize, shape: ImageShape, vs: VarBuilder) -> Result<Self> {
        let fc1 = candle_nn::linear(n_conditions, 128, vs.pp("fc1"))?;
        let fc2 = candle_nn::linear(128, shape.height * shape.width, vs.pp("fc2"))?;
        Ok(Self {
            fc1,
            fc2,
            height: shape.height,
            width: shape.width,
        })
    }
}

impl Module for LabelChannel {
    fn forward(&self, y_nc: &Tensor) -> Result<Tensor> {
        let n = y_nc.dim(0)?;
        let h = self.fc1.forward(y_nc)?.relu()?;
        let h = self.fc2.forward(&h)?.relu()?;
        h.reshape((n, 1, self.height, self.width))
    }
}

fn gaussian_head(
    h_nl: &Tensor,
    z_mean: &Linear,
    z_lnvar: Option<&Linear>,
    noise_nk: Option<&Tensor>,
) -> Result<EncoderLatent> {
    let mean = z_mean.forward(h_nl)?;
    match z_lnvar {
        Some(z_lnvar) => {
            let lnvar = z_lnvar.forward(h_nl)?.clamp(-8., 8.)?;
            let z = reparameterize(&mean, &lnvar, noise_nk)?;
            Ok(EncoderLatent {
                z_mean: mean,
                z_lnvar: Some(lnvar),
                z,
            })
        }
        None => Ok(EncoderLatent {
            z: mean.clone(),
            z_mean: mean,
            z_lnvar: None,
        }),
    }
}

fn check_inputs(x_nd: &Tensor, y_nc: &Tensor, shape: &ImageShape, n_conditions: usize) -> Result<()> {
    if x_nd.dim(1)? != shape.numel() || y_nc.dim(1)? != n_conditions {
        candle_core::bail!(
            "expected {:?} images and {} conditions, but found {:?} and {:?}",
            shape,
            n_conditions,
            x_nd.dims(),
            y_nc.dims()
        );
    }
    Ok(())
}

/// Two strided convolutions followed by a dense MMD-sized layer
pub struct BaselineCnnEncoder {
    shape: ImageShape,
    n_conditions: usize,
    n_latent: usize,
    label: LabelChannel,
    conv: StackLayers<ConvBlock>,
    fc: DenseBlock,
    z_mean: Linear,
    z_lnvar: Option<Linear>,
}

impl ConditionalEncoderT for BaselineCnnEncoder {
    fn forward_t(
        &self,
        x_nd: &Tensor,
        y_nc: &Tensor,
        noise_nk: Option<&Tensor>,
        train: bool,
    ) -> Result<EncoderLatent> {
        check_inputs(x_nd, y_nc, &self.shape, self.n_conditions)?;
        let y_nc = y_nc.to_dtype(x_nd.dtype())?;
        let img = self.shape.unflatten(x_nd)?;
        let img = Tensor::cat(&[&img, &self.label.forward(&y_nc)?], 1)?;
        let h = self.conv.forward_t(&img, train)?.flatten_from(1)?;
        let h = self.fc.forward_t(&h, train)?;
        gaussian_head(&h, &self.z_mean, self.z_lnvar.as_ref(), noise_nk)
    }

    fn dim_obs(&self) -> usize {
        self.shape.numel()
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }

    fn is_variational(&self) -> bool {
        self.z_lnvar.is_some()
    }
}

impl BaselineCnnEncoder {
    /// Will create variables:
    /// * `label.fc{1,2}.*`
    /// * `conv.{0,1}.*` (`4x4` kernels of stride 2)
    /// * `fc.linear.weight`, `fc.bn.*`
    /// * `z.mean.*`, `z.lnvar.*`
    pub fn new(
        shape: ImageShape,
        n_conditions: usize,
        n_latent: usize,
        n_mmd: usize,
        dropout_rate: f32,
        variational: bool,
        vs: VarBuilder,
    ) -> Result<Self> {
        shape.check_divisible(2)?;

        let label = LabelChannel::new(n_conditions, shape, vs.pp("label"))?;

        let mut conv = StackLayers::<ConvBlock>::new();
        conv.push(ConvBlock::new(
            shape.channels + 1,
            64,
            (4, 2, 1),
            leaky_relu(),
            false,
            vs.pp("conv.0"),
        )?);
        conv.push(ConvBlock::new(
            64,
            128,
            (4, 2, 1),
            leaky_relu(),
            false,
            vs.pp("conv.1"),
        )?);

        let flat_dim = 128 * (shape.height / 4) * (shape.width / 4);
        let fc = DenseBlock::new(
            DenseBlockArgs {
                in_dim: flat_dim,
                out_dim: n_mmd,
                bias: false,
                batch_norm: true,
                activation: leaky_relu(),
                dropout_rate,
            },
            vs.pp("fc"),
        )?;

        let z_mean = candle_nn::linear(n_mmd, n_latent, vs.pp("z.mean"))?;
        let z_lnvar = if variational {
            Some(candle_nn::linear(n_mmd, n_latent, vs.pp("z.lnvar"))?)
        } else {
            None
        };

        Ok(Self {
            shape,
            n_conditions,
            n_latent,
            label,
            conv,
            fc,
            z_mean,
            z_lnvar,
        })
    }
}

/// Contracting half of a UNet
pub struct UNetEncoder {
    shape: ImageShape,
    n_conditions: usize,
    n_latent: usize,
    label: LabelChannel,
    down: StackLayers<ConvBlock>,
    fc: StackLayers<Linear>,
    dropout: Option<Dropout>,
    z_mean: Linear,
    z_lnvar: Option<Linear>,
}

impl ConditionalEncoderT for UNetEncoder {
    fn forward_t(
        &self,
        x_nd: &Tensor,
        y_nc: &Tensor,
        noise_nk: Option<&Tensor>,
        train: bool,
    ) -> Result<EncoderLatent> {
        check_inputs(x_nd, y_nc, &self.shape, self.n_conditions)?;
        let y_nc = y_nc.to_dtype(x_nd.dtype())?;
        let img = self.shape.unflatten(x_nd)?;
        let img = Tensor::cat(&[&img, &self.label.forward(&y_nc)?], 1)?;
        let h = self.down.forward_t(&img, train)?.flatten_from(1)?;
        let h = self.fc.forward_t(&h, train)?;
        let h = match &self.dropout {
            Some(dropout) => dropout.forward_t(&h, train)?,
            None => h,
        };
        gaussian_head(&h, &self.z_mean, self.z_lnvar.as_ref(), noise_nk)
    }

    fn dim_obs(&self) -> usize {
        self.shape.numel()
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }

    fn is_variational(&self) -> bool {
        self.z_lnvar.is_some()
    }
}

impl UNetEncoder {
    /// Will create variables:
    /// * `label.fc{1,2}.*`
    /// * `down.{}.*`, two `3x3` convolutions per level
    /// * `fc.{1,2}.*`
    /// * `z.mean.*`, `z.lnvar.*`
    pub fn new(
        shape: ImageShape,
        n_conditions: usize,
        n_latent: usize,
        dropout_rate: f32,
        variational: bool,
        vs: VarBuilder,
    ) -> Result<Self> {
        shape.check_divisible(UNET_FILTERS.len() as u32)?;

        let label = LabelChannel::new(n_conditions, shape, vs.pp("label"))?;

        let mut down = StackLayers::<ConvBlock>::new();
        let mut prev = shape.channels + 1;
        for (j, &filters) in UNET_FILTERS.iter().enumerate() {
            down.push(ConvBlock::new(
                prev,
                filters,
                (3, 1, 1),
                Activation::Relu,
                false,
                vs.pp(format!("down.{}", 2 * j)),
            )?);
            down.push(ConvBlock::new(
                filters,
                filters,
                (3, 1, 1),
                Activation::Relu,
                true,
                vs.pp(format!("down.{}", 2 * j + 1)),
            )?);
            prev = filters;
        }

        let scale = 2_usize.pow(UNET_FILTERS.len() as u32);
        let flat_dim = prev * (shape.height / scale) * (shape.width / scale);

        let mut fc = StackLayers::<Linear>::new();
        fc.push_with_act(
            candle_nn::linear(flat_dim, UNET_DENSE_DIM, vs.pp("fc.1"))?,
            Activation::Relu,
        );
        fc.push_with_act(
            candle_nn::linear(UNET_DENSE_DIM, UNET_DENSE_DIM, vs.pp("fc.2"))?,
            Activation::Relu,
        );
        let dropout = (dropout_rate > 0.).then(|| Dropout::new(dropout_rate));

        let z_mean = candle_nn::linear(UNET_DENSE_DIM, n_latent, vs.pp("z.mean"))?;
        let z_lnvar = if variational {
            Some(candle_nn::linear(UNET_DENSE_DIM, n_latent, vs.pp("z.lnvar"))?)
        } else {
            None
        };

        Ok(Self {
            shape,
            n_conditions,
            n_latent,
            label,
            down,
            fc,
            dropout,
            z_mean,
            z_lnvar,
        })
    }
}
