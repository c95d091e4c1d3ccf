use crate::config::*;

use candle_core::{Result, Tensor};
use candle_nn::{Activation, VarBuilder};
use candle_util::candle_decoder_conv::{BaselineCnnDecoder, UNetDecoder};
use candle_util::candle_decoder_dense::DenseConditionalDecoder;
use candle_util::candle_encoder_conv::{BaselineCnnEncoder, UNetEncoder};
use candle_util::candle_encoder_dense::DenseConditionalEncoder;
use candle_util::candle_model_traits::*;

pub enum CvaeEncoder {
    Dense(DenseConditionalEncoder),
    BaselineCnn(BaselineCnnEncoder),
    UNet(UNetEncoder),
}

pub enum CvaeDecoder {
    Dense(DenseConditionalDecoder),
    BaselineCnn(BaselineCnnDecoder),
    UNet(UNetDecoder),
}

macro_rules! each_variant {
    ($self:ident, $m:ident => $body:expr) => {
        match $self {
            Self::Dense($m) => $body,
            Self::BaselineCnn($m) => $body,
            Self::UNet($m) => $body,
        }
    };
}

impl ConditionalEncoderT for CvaeEncoder {
    fn forward_t(
        &self,
        x_nd: &Tensor,
        y_nc: &Tensor,
        noise_nk: Option<&Tensor>,
        train: bool,
    ) -> Result<EncoderLatent> {
        each_variant!(self, m => m.forward_t(x_nd, y_nc, noise_nk, train))
    }

    fn dim_obs(&self) -> usize {
        each_variant!(self, m => m.dim_obs())
    }

    fn dim_latent(&self) -> usize {
        each_variant!(self, m => m.dim_latent())
    }

    fn is_variational(&self) -> bool {
        each_variant!(self, m => m.is_variational())
    }
}

impl ConditionalDecoderT for CvaeDecoder {
    fn forward_mmd_t(&self, z_nk: &Tensor, y_nc: &Tensor, train: bool) -> Result<Tensor> {
        each_variant!(self, m => m.forward_mmd_t(z_nk, y_nc, train))
    }

    fn forward_from_mmd_t(&self, h_nm: &Tensor, train: bool) -> Result<Tensor> {
        each_variant!(self, m => m.forward_from_mmd_t(h_nm, train))
    }

    fn dim_obs(&self) -> usize {
        each_variant!(self, m => m.dim_obs())
    }

    fn dim_latent(&self) -> usize {
        each_variant!(self, m => m.dim_latent())
    }

    fn dim_mmd(&self) -> usize {
        each_variant!(self, m => m.dim_mmd())
    }
}

/// Build the encoder and decoder of `config` under the `encoder` and
/// `decoder` prefixes of `vs`
pub fn build_networks(config: &TrvaeConfig, vs: VarBuilder) -> Result<(CvaeEncoder, CvaeDecoder)> {
    let n_cond = config.n_conditions();
    let variational = config.latent_kind == LatentKind::Variational;
    let out_activation = match config.output_activation {
        OutputActivation::Relu => Some(Activation::Relu),
        OutputActivation::Linear => None,
    };

    let image_shape = || {
        config
            .image_shape()
            .ok_or_else(|| candle_core::Error::Msg("missing image shape".into()))
    };

    match config.arch_style {
        ArchStyle::Dense | ArchStyle::FullyConnected => {
            let (enc_layers, dec_layers) = config.dense_layers();
            let encoder = DenseConditionalEncoder::new(
                config.x_dim,
                n_cond,
                config.z_dim,
                &enc_layers,
                config.dropout_rate,
                variational,
                vs.pp("encoder"),
            )?;
            let decoder = DenseConditionalDecoder::new(
                config.x_dim,
                n_cond,
                config.z_dim,
                config.mmd_dim,
                &dec_layers,
                config.dropout_rate,
                out_activation,
                vs.pp("decoder"),
            )?;
            Ok((CvaeEncoder::Dense(encoder), CvaeDecoder::Dense(decoder)))
        }
        ArchStyle::BaselineCnn => {
            let shape = image_shape()?;
            let encoder = BaselineCnnEncoder::new(
                shape,
                n_cond,
                config.z_dim,
                config.mmd_dim,
                config.dropout_rate,
                variational,
                vs.pp("encoder"),
            )?;
            let decoder = BaselineCnnDecoder::new(
                shape,
                n_cond,
                config.z_dim,
                config.mmd_dim,
                vs.pp("decoder"),
            )?;
            Ok((
                CvaeEncoder::BaselineCnn(encoder),
                CvaeDecoder::BaselineCnn(decoder),
            ))
        }
        ArchStyle::UNet => {
            let shape = image_shape()?;
            let encoder = UNetEncoder::new(
                shape,
                n_cond,
                config.z_dim,
                config.dropout_rate,
                variational,
                vs.pp("encoder"),
            )?;
            let decoder =
                UNetDecoder::new(shape, n_cond, config.z_dim, config.mmd_dim, vs.pp("decoder"))?;
            Ok((CvaeEncoder::UNet(encoder), CvaeDecoder::UNet(decoder)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition_encoder::ConditionEncoder;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;
    use candle_util::candle_mmd::one_hot_labels;

    fn conditions() -> ConditionEncoder {
        ConditionEncoder::fit(&["a", "b", "c"])
    }

    #[test]
    fn every_style_reconstructs_the_input_shape() -> anyhow::Result<()> {
        let dev = Device::Cpu;

        let dense = {
            let mut c = TrvaeConfig::new(12, conditions());
            c.encoder_layers = vec![8, 6];
            c.z_dim = 3;
            c.mmd_dim = 5;
            c
        };
        let fc = {
            let mut c = dense.clone();
            c.arch_style = ArchStyle::FullyConnected;
            c.x_dim = 16;
            c.image_shape = Some((1, 4, 4));
            c
        };
        let cnn = {
            let mut c = fc.clone();
            c.arch_style = ArchStyle::BaselineCnn;
            c
        };
        let unet = {
            let mut c = dense.clone();
            c.arch_style = ArchStyle::UNet;
            c.x_dim = 256;
            c.image_shape = Some((1, 16, 16));
            c
        };

        for config in [dense, fc, cnn, unet] {
            config.validate()?;
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
            let (enc, dec) = build_networks(&config, vb)?;

            let x = Tensor::rand(0_f32, 1., (4, config.x_dim), &dev)?;
            let y = one_hot_labels(&[0, 1, 2, 0], 3, &dev)?;
            let latent = enc.forward_t(&x, &y, None, false)?;
            assert_eq!(latent.z.dims(), &[4, 3]);

            let out = dec.forward_t(&latent.z, &y, false)?;
            assert_eq!(out.recon.dims(), &[4, config.x_dim]);
            assert_eq!(out.mmd.dims(), &[4, dec.dim_mmd()]);
            assert_eq!(enc.dim_obs(), dec.dim_obs());

            let names: Vec<String> = varmap.data().lock().unwrap().keys().cloned().collect();
            assert!(names.iter().all(|n| n.starts_with("encoder.") || n.starts_with("decoder.")));
        }
        Ok(())
    }
}
