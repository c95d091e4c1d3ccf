use candle_core::{Result, Tensor};
use candle_nn::{Activation, BatchNorm, Dropout, Linear, Module, ModuleT, VarBuilder};

/// Negative slope of the leaky rectifier used throughout
pub const LEAKY_SLOPE: f64 = 0.3;

pub fn leaky_relu() -> Activation {
    Activation::LeakyRelu(LEAKY_SLOPE)
}

pub fn default_bn_config() -> candle_nn::BatchNormConfig {
    candle_nn::BatchNormConfig {
        eps: 1e-3,
        remove_mean: true,
        affine: true,
        momentum: 0.01,
    }
}

/// build a stack of `M` layers, each followed by an optional activation
pub struct StackLayers<M>
where
    M: ModuleT,
{
    module_layers: Vec<M>,
    activation_layers: Vec<Option<Activation>>,
}

impl<M> ModuleT for StackLayers<M>
where
    M: ModuleT,
{
    fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor> {
        let mut x = input.clone();
        for (module, activation) in self.module_layers.iter().zip(self.activation_layers.iter()) {
            x = module.forward_t(&x, train)?;
            if let Some(activation) = activation {
                x = activation.forward(&x)?;
            }
        }
        Ok(x)
    }
}

impl<M> StackLayers<M>
where
    M: ModuleT,
{
    pub fn new() -> Self {
        Self {
            module_layers: Vec::new(),
            activation_layers: Vec::new(),
        }
    }

    /// Appends a layer after all the current layers.
    pub fn push_with_act(&mut self, layer: M, activation: Activation) {
        self.module_layers.push(layer);
        self.activation_layers.push(Some(activation));
    }

    pub fn push(&mut self, layer: M) {
        self.module_layers.push(layer);
        self.activation_layers.push(None);
    }

    pub fn len(&self) -> usize {
        self.module_layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.module_layers.is_empty()
    }
}

impl<M> Default for StackLayers<M>
where
    M: ModuleT,
{
    fn default() -> Self {
        Self::new()
    }
}

/// `Linear -> [BatchNorm] -> activation -> [Dropout]`
pub struct DenseBlock {
    linear: Linear,
    bn: Option<BatchNorm>,
    activation: Activation,
    dropout: Option<Dropout>,
}

pub struct DenseBlockArgs {
    pub in_dim: usize,
    pub out_dim: usize,
    pub bias: bool,
    pub batch_norm: bool,
    pub activation: Activation,
    pub dropout_rate: f32,
}

impl DenseBlock {
    /// Will create variables:
    /// * `{vb}.linear.weight` (and `.bias` if requested)
    /// * `{vb}.bn.{weight,bias,running_mean,running_var}` if requested
    pub fn new(args: DenseBlockArgs, vb: VarBuilder) -> Result<Self> {
        let linear = if args.bias {
            candle_nn::linear(args.in_dim, args.out_dim, vb.pp("linear"))?
        } else {
            candle_nn::linear_no_bias(args.in_dim, args.out_dim, vb.pp("linear"))?
        };

        let bn = if args.batch_norm {
            Some(candle_nn::batch_norm(
                args.out_dim,
                default_bn_config(),
                vb.pp("bn"),
            )?)
        } else {
            None
        };

        let dropout = (args.dropout_rate > 0.).then(|| Dropout::new(args.dropout_rate));

        Ok(Self {
            linear,
            bn,
            activation: args.activation,
            dropout,
        })
    }
}

impl ModuleT for DenseBlock {
    fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let mut h = self.linear.forward(x)?;
        if let Some(bn) = &self.bn {
            h = bn.forward_t(&h, train)?;
        }
        let h = self.activation.forward(&h)?;
        match &self.dropout {
            Some(dropout) => dropout.forward_t(&h, train),
            None => Ok(h),
        }
    }
}

/// `Conv2d -> activation -> [2x2 max pooling]`
pub struct ConvBlock {
    conv: candle_nn::Conv2d,
    activation: Activation,
    max_pool: bool,
}

impl ConvBlock {
    /// * `kernel` - square kernel size
    /// * `stride` - convolution stride
    /// * `padding` - zero padding on each side
    /// * `max_pool` - halve the spatial resolution afterwards
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        (kernel, stride, padding): (usize, usize, usize),
        activation: Activation,
        max_pool: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let config = candle_nn::Conv2dConfig {
            padding,
            stride,
            ..Default::default()
        };
        let conv = candle_nn::conv2d(in_channels, out_channels, kernel, config, vb)?;
        Ok(Self {
            conv,
            activation,
            max_pool,
        })
    }
}

impl ModuleT for ConvBlock {
    fn forward_t(&self, x: &Tensor, _train: bool) -> Result<Tensor> {
        let h = self.activation.forward(&self.conv.forward(x)?)?;
        if self.max_pool {
            h.max_pool2d(2)
        } else {
            Ok(h)
        }
    }
}

/// `ConvTranspose2d -> activation`, keeping the spatial resolution
pub struct DeconvBlock {
    deconv: candle_nn::ConvTranspose2d,
    activation: Activation,
}

impl DeconvBlock {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        activation: Activation,
        vb: VarBuilder,
    ) -> Result<Self> {
        // (h - 1) - 2 * 1 + (3 - 1) + 1 = h
        let config = candle_nn::ConvTranspose2dConfig {
            padding: 1,
            stride: 1,
            ..Default::default()
        };
        let deconv = candle_nn::conv_transpose2d(in_channels, out_channels, 3, config, vb)?;
        Ok(Self { deconv, activation })
    }
}

impl ModuleT for DeconvBlock {
    fn forward_t(&self, x: &Tensor, _train: bool) -> Result<Tensor> {
        self.activation.forward(&self.deconv.forward(x)?)
    }
}

/// Nearest-neighbour 2x upsampling followed by a `3x3` convolution
pub struct UpsampleBlock {
    conv: ConvBlock,
    refine: ConvBlock,
}

impl UpsampleBlock {
    pub fn new(in_channels: usize, out_channels: usize, vb: VarBuilder) -> Result<Self> {
        let conv = ConvBlock::new(
            in_channels,
            out_channels,
            (3, 1, 1),
            Activation::Relu,
            false,
            vb.pp("up"),
        )?;
        let refine = ConvBlock::new(
            out_channels,
            out_channels,
            (3, 1, 1),
            Activation::Relu,
            false,
            vb.pp("conv"),
        )?;
        Ok(Self { conv, refine })
    }
}

impl ModuleT for UpsampleBlock {
    fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let (_, _, h, w) = x.dims4()?;
        let x = x.upsample_nearest2d(2 * h, 2 * w)?;
        let x = self.conv.forward_t(&x, train)?;
        self.refine.forward_t(&x, train)
    }
}
