use crate::candle_aux_layers::*;
use crate::candle_encoder_conv::{ImageShape, UNET_DENSE_DIM, UNET_FILTERS};
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{Activation, Linear, Module, ModuleT, VarBuilder};

fn check_latent(z_nk: &Tensor, y_nc: &Tensor, n_latent: usize, n_conditions: usize) -> Result<()> {
    if z_nk.dim(1)? != n_latent || y_nc.dim(1)? != n_conditions {
        candle_core::bail!(
            "expected {} latent dims and {} conditions, but found {:?} and {:?}",
            n_latent,
            n_conditions,
            z_nk.dims(),
            y_nc.dims()
        );
    }
    Ok(())
}

/// `concat(z, y) -> mmd -> dense image -> three transposed convolutions`
pub struct BaselineCnnDecoder {
    shape: ImageShape,
    n_conditions: usize,
    n_latent: usize,
    n_mmd: usize,
    mmd: DenseBlock,
    fc: DenseBlock,
    deconv: StackLayers<DeconvBlock>,
}

impl ConditionalDecoderT for BaselineCnnDecoder {
    fn forward_mmd_t(&self, z_nk: &Tensor, y_nc: &Tensor, train: bool) -> Result<Tensor> {
        check_latent(z_nk, y_nc, self.n_latent, self.n_conditions)?;
        let zy = Tensor::cat(&[z_nk, &y_nc.to_dtype(z_nk.dtype())?], 1)?;
        self.mmd.forward_t(&zy, train)
    }

    fn forward_from_mmd_t(&self, h_nm: &Tensor, train: bool) -> Result<Tensor> {
        let h = self.fc.forward_t(h_nm, train)?;
        let img = self.shape.unflatten(&h)?;
        self.deconv.forward_t(&img, train)?.flatten_from(1)
    }

    fn dim_obs(&self) -> usize {
        self.shape.numel()
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }

    fn dim_mmd(&self) -> usize {
        self.n_mmd
    }
}

impl BaselineCnnDecoder {
    /// Will create variables:
    /// * `mmd.linear.weight`, `mmd.bn.*`
    /// * `fc.linear.weight`
    /// * `deconv.{0,1,2}.*`
    pub fn new(
        shape: ImageShape,
        n_conditions: usize,
        n_latent: usize,
        n_mmd: usize,
        vs: VarBuilder,
    ) -> Result<Self> {
        shape.check_divisible(2)?;

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

        let fc = DenseBlock::new(
            DenseBlockArgs {
                in_dim: n_mmd,
                out_dim: shape.numel(),
                bias: false,
                batch_norm: false,
                activation: leaky_relu(),
                dropout_rate: 0.,
            },
            vs.pp("fc"),
        )?;

        let mut deconv = StackLayers::<DeconvBlock>::new();
        deconv.push(DeconvBlock::new(
            shape.channels,
            128,
            leaky_relu(),
            vs.pp("deconv.0"),
        )?);
        deconv.push(DeconvBlock::new(128, 64, leaky_relu(), vs.pp("deconv.1"))?);
        deconv.push(DeconvBlock::new(
            64,
            shape.channels,
            Activation::Relu,
            vs.pp("deconv.2"),
        )?);

        Ok(Self {
            shape,
            n_conditions,
            n_latent,
            n_mmd,
            mmd,
            fc,
            deconv,
        })
    }
}

/// Expanding half of a UNet (no skip connections)
pub struct UNetDecoder {
    shape: ImageShape,
    n_conditions: usize,
    n_latent: usize,
    n_mmd: usize,
    encode_y: Linear,
    mmd: Linear,
    fc: StackLayers<Linear>,
    up: StackLayers<UpsampleBlock>,
    out: ConvBlock,
}

impl UNetDecoder {
    fn bottleneck_side(&self) -> (usize, usize) {
        let scale = 2_usize.pow(UNET_FILTERS.len() as u32);
        (self.shape.height / scale, self.shape.width / scale)
    }

    /// Will create variables:
    /// * `encode_y.*`, `mmd.*`
    /// * `fc.{1,2}.*`
    /// * `up.{}.{up,conv}.*` per level
    /// * `out.*` (`1x1` convolution)
    pub fn new(
        shape: ImageShape,
        n_conditions: usize,
        n_latent: usize,
        n_mmd: usize,
        vs: VarBuilder,
    ) -> Result<Self> {
        shape.check_divisible(UNET_FILTERS.len() as u32)?;

        let encode_y = candle_nn::linear(n_conditions, 128, vs.pp("encode_y"))?;
        let mmd = candle_nn::linear(n_latent + 128, n_mmd, vs.pp("mmd"))?;

        let scale = 2_usize.pow(UNET_FILTERS.len() as u32);
        let n_bottom = UNET_FILTERS[UNET_FILTERS.len() - 1];
        let bottom_dim = n_bottom * (shape.height / scale) * (shape.width / scale);

        let mut fc = StackLayers::<Linear>::new();
        fc.push_with_act(
            candle_nn::linear(n_mmd, UNET_DENSE_DIM, vs.pp("fc.1"))?,
            Activation::Relu,
        );
        fc.push_with_act(
            candle_nn::linear(UNET_DENSE_DIM, bottom_dim, vs.pp("fc.2"))?,
            Activation::Relu,
        );

        let mut up = StackLayers::<UpsampleBlock>::new();
        let mut prev = n_bottom;
        for (j, &filters) in UNET_FILTERS.iter().rev().enumerate() {
            up.push(UpsampleBlock::new(prev, filters, vs.pp(format!("up.{}", j)))?);
            prev = filters;
        }

        let out = ConvBlock::new(
            prev,
            shape.channels,
            (1, 1, 0),
            Activation::Relu,
            false,
            vs.pp("out"),
        )?;

        Ok(Self {
            shape,
            n_conditions,
            n_latent,
            n_mmd,
            encode_y,
            mmd,
            fc,
            up,
            out,
        })
    }
}

impl ConditionalDecoderT for UNetDecoder {
    fn forward_mmd_t(&self, z_nk: &Tensor, y_nc: &Tensor, _train: bool) -> Result<Tensor> {
        check_latent(z_nk, y_nc, self.n_latent, self.n_conditions)?;
        let ey = self.encode_y.forward(&y_nc.to_dtype(z_nk.dtype())?)?;
        let zy = Tensor::cat(&[z_nk, &ey], 1)?.relu()?;
        self.mmd.forward(&zy)?.relu()
    }

    fn forward_from_mmd_t(&self, h_nm: &Tensor, train: bool) -> Result<Tensor> {
        let n = h_nm.dim(0)?;
        let (h, w) = self.bottleneck_side();
        let n_bottom = UNET_FILTERS[UNET_FILTERS.len() - 1];
        let bottom = self.fc.forward_t(h_nm, train)?.reshape((n, n_bottom, h, w))?;
        let img = self.up.forward_t(&bottom, train)?;
        self.out.forward_t(&img, train)?.flatten_from(1)
    }

    fn dim_obs(&self) -> usize {
        self.shape.numel()
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }

    fn dim_mmd(&self) -> usize {
        self.n_mmd
    }
}
