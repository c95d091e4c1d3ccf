use crate::condition_encoder::ConditionEncoder;
use candle_util::candle_cvae_inference::{CvaeLossConfig, MmdSource};
use candle_util::candle_encoder_conv::{ImageShape, UNET_FILTERS};
use candle_util::candle_mmd::MmdKernel;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchStyle {
    /// fully connected layers over expression vectors
    #[default]
    Dense,
    /// two strided convolutions and transposed convolutions
    BaselineCnn,
    /// fully connected layers over flattened images
    FullyConnected,
    /// UNet-style contracting and expanding convolutions
    #[value(name = "unet")]
    #[serde(rename = "unet")]
    UNet,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LatentKind {
    /// Gaussian latent with KL regularization
    #[default]
    Variational,
    /// a regularized autoencoder with a single latent code
    Deterministic,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputActivation {
    #[default]
    Relu,
    Linear,
}

/// Everything needed to rebuild a model with the same parameter layout
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrvaeConfig {
    /// number of input features (`C*H*W` for images)
    pub x_dim: usize,
    pub z_dim: usize,
    pub mmd_dim: usize,
    pub dropout_rate: f32,
    pub arch_style: ArchStyle,
    /// `(channels, height, width)` for the image models
    pub image_shape: Option<(usize, usize, usize)>,
    /// hidden layers of the dense encoder, reversed in the decoder
    pub encoder_layers: Vec<usize>,
    pub latent_kind: LatentKind,
    pub output_activation: OutputActivation,
    pub loss: CvaeLossConfig,
    pub conditions: ConditionEncoder,
    /// seeds minibatch shuffling and reparameterization noise only;
    /// initial weights come from candle's own generator and are not
    /// reproducible across runs
    pub seed: u64,
}

impl TrvaeConfig {
    pub fn new(x_dim: usize, conditions: ConditionEncoder) -> Self {
        Self {
            x_dim,
            z_dim: 100,
            mmd_dim: 128,
            dropout_rate: 0.2,
            arch_style: ArchStyle::Dense,
            image_shape: None,
            encoder_layers: vec![700, 400],
            latent_kind: LatentKind::Variational,
            output_activation: OutputActivation::Relu,
            loss: CvaeLossConfig::default(),
            conditions,
            seed: 42,
        }
    }

    /// A regularized autoencoder aligning the latent codes
    pub fn deterministic(mut self) -> Self {
        self.latent_kind = LatentKind::Deterministic;
        self.loss.mmd_source = MmdSource::Latent;
        self
    }

    pub fn n_conditions(&self) -> usize {
        self.conditions.n_conditions()
    }

    pub fn image_shape(&self) -> Option<ImageShape> {
        self.image_shape.map(|(c, h, w)| ImageShape::new(c, h, w))
    }

    /// Hidden layers of the (encoder, decoder) for the dense styles
    pub fn dense_layers(&self) -> (Vec<usize>, Vec<usize>) {
        match self.arch_style {
            ArchStyle::FullyConnected => (vec![512, 512, self.mmd_dim], vec![512, 512]),
            _ => {
                let enc = self.encoder_layers.clone();
                let dec = enc.iter().rev().cloned().collect();
                (enc, dec)
            }
        }
    }

    /// Check dimensions and architecture requirements
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.x_dim == 0 || self.z_dim == 0 || self.mmd_dim == 0 {
            anyhow::bail!(
                "dimensions must be positive: x {}, z {}, mmd {}",
                self.x_dim,
                self.z_dim,
                self.mmd_dim
            );
        }

        if self.n_conditions() == 0 {
            anyhow::bail!("no condition labels");
        }

        if self.n_conditions() < 2 {
            log::warn!("a single condition: the MMD penalty will be zero");
        }

        if !(0. ..1.).contains(&self.dropout_rate) {
            anyhow::bail!("dropout rate {} not in [0, 1)", self.dropout_rate);
        }

        if self.arch_style == ArchStyle::Dense && self.encoder_layers.is_empty() {
            anyhow::bail!("the dense architecture needs at least one hidden layer");
        }

        if self.arch_style != ArchStyle::Dense {
            let shape = self.image_shape().ok_or_else(|| {
                anyhow::anyhow!("{:?} needs the image shape (C, H, W)", self.arch_style)
            })?;

            if shape.numel() != self.x_dim {
                anyhow::bail!(
                    "image shape {:?} has {} elements, but x_dim = {}",
                    self.image_shape,
                    shape.numel(),
                    self.x_dim
                );
            }

            match self.arch_style {
                ArchStyle::BaselineCnn => shape.check_divisible(2)?,
                ArchStyle::UNet => shape.check_divisible(UNET_FILTERS.len() as u32)?,
                _ => {}
            }
        }

        if let MmdKernel::Raphy { scales, weights } = &self.loss.kernel {
            MmdKernel::raphy(scales.clone(), Some(weights.clone()))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_conditions() -> ConditionEncoder {
        ConditionEncoder::from_ordered(vec!["ctrl".into(), "stim".into()]).unwrap()
    }

    #[test]
    fn defaults_and_validation() -> anyhow::Result<()> {
        let config = TrvaeConfig::new(10, two_conditions());
        assert_eq!(config.z_dim, 100);
        assert_eq!(config.loss.beta, 100.);
        config.validate()?;

        let (enc, dec) = config.dense_layers();
        assert_eq!(enc, vec![700, 400]);
        assert_eq!(dec, vec![400, 700]);

        let rae = config.clone().deterministic();
        assert_eq!(rae.loss.mmd_source, MmdSource::Latent);

        let mut bad = config.clone();
        bad.arch_style = ArchStyle::UNet;
        assert!(bad.validate().is_err());
        bad.image_shape = Some((1, 2, 5));
        assert!(bad.validate().is_err());

        let mut cnn = TrvaeConfig::new(3 * 8 * 8, two_conditions());
        cnn.arch_style = ArchStyle::BaselineCnn;
        cnn.image_shape = Some((3, 8, 8));
        cnn.validate()?;
        cnn.arch_style = ArchStyle::UNet;
        assert!(cnn.validate().is_err());
        Ok(())
    }

    #[test]
    fn json_round_trip() -> anyhow::Result<()> {
        let mut config = TrvaeConfig::new(5, two_conditions());
        config.arch_style = ArchStyle::FullyConnected;
        let text = serde_json::to_string(&config)?;
        assert!(text.contains("fully-connected"));
        let back: TrvaeConfig = serde_json::from_str(&text)?;
        assert_eq!(back, config);
        Ok(())
    }
}
