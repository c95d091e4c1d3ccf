use crate::config::TrvaeConfig;
use crate::network::*;

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use candle_util::candle_inference::TrainState;
use candle_util::candle_mmd::one_hot_labels;
use candle_util::candle_model_traits::*;
use matrix_util::utils::generate_minibatch_intervals;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};

/// Rows fed through the networks at once during inference
pub const INFERENCE_BATCH_SIZE: usize = 1024;

/// Where the rows given to `Trvae::predict` live
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataSpace {
    /// expression (or flattened image) rows: encode, then decode
    Feature,
    /// latent codes: decode only
    Latent,
    /// activations of the decoder MMD layer: run the rest of the decoder
    Mmd,
}

///
/// MMD-regularized conditional VAE. Each instance owns its parameters,
/// random number generator and training state.
///
pub struct Trvae {
    pub(crate) config: TrvaeConfig,
    pub(crate) model_path: Option<PathBuf>,
    pub(crate) device: Device,
    pub(crate) varmap: VarMap,
    pub(crate) encoder: CvaeEncoder,
    pub(crate) decoder: CvaeDecoder,
    pub(crate) rng: StdRng,
    pub(crate) state: TrainState,
}

impl Trvae {
    /// Build a freshly initialized model
    /// * `config` - architecture, loss weights and condition labels
    /// * `model_path` - directory for `save`/`restore`
    /// * `device` - where the parameters live
    pub fn new(
        config: TrvaeConfig,
        model_path: Option<&Path>,
        device: &Device,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let (encoder, decoder) = build_networks(&config, vb)?;
        let rng = StdRng::seed_from_u64(config.seed);

        log::info!(
            "built {:?} model: {} features, {} conditions, {} latent, {} mmd",
            config.arch_style,
            config.x_dim,
            config.n_conditions(),
            config.z_dim,
            config.mmd_dim
        );

        Ok(Self {
            config,
            model_path: model_path.map(Path::to_path_buf),
            device: device.clone(),
            varmap,
            encoder,
            decoder,
            rng,
            state: TrainState::Untrained,
        })
    }

    pub fn config(&self) -> &TrvaeConfig {
        &self.config
    }

    pub fn state(&self) -> TrainState {
        self.state
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn model_path(&self) -> Option<&Path> {
        self.model_path.as_deref()
    }

    pub fn set_model_path(&mut self, path: &Path) {
        self.model_path = Some(path.to_path_buf());
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Integer codes of the labels, checked against the data
    pub fn encode_labels<L: AsRef<str>>(&self, labels: &[L], n: usize) -> anyhow::Result<Vec<u32>> {
        if labels.len() != n {
            return Err(anyhow::anyhow!("{} rows vs. {} labels", n, labels.len()));
        }
        self.config.conditions.encode(labels)
    }

    /// Latent mean of each row
    /// * `data` - `n x x_dim`
    /// * `labels` - one condition per row
    pub fn to_latent<L: AsRef<str>>(&self, data: &Tensor, labels: &[L]) -> anyhow::Result<Tensor> {
        self.check_columns(data, self.config.x_dim)?;
        let codes = self.encode_labels(labels, data.dim(0)?)?;
        self.batched(data, &codes, |x, y| {
            Ok(self.encoder.forward_t(x, y, None, false)?.z_mean)
        })
    }

    /// Activations of the decoder MMD layer
    /// * `data` - `n x x_dim`
    /// * `labels` - conditions used to encode each row
    /// * `fake_label` - decode every row under this condition instead
    pub fn to_mmd_layer<L: AsRef<str>>(
        &self,
        data: &Tensor,
        labels: &[L],
        fake_label: Option<&str>,
    ) -> anyhow::Result<Tensor> {
        self.check_columns(data, self.config.x_dim)?;
        let n = data.dim(0)?;
        let enc_codes = self.encode_labels(labels, n)?;
        let dec_codes = match fake_label {
            Some(lab) => vec![self.config.conditions.encode_one(lab)?; n],
            None => enc_codes.clone(),
        };
        let n_cond = self.config.n_conditions();

        let chunks = generate_minibatch_intervals(n, INFERENCE_BATCH_SIZE)
            .into_iter()
            .map(|(lb, ub)| -> anyhow::Result<Tensor> {
                let x = data.narrow(0, lb, ub - lb)?.to_device(&self.device)?;
                let y_enc = one_hot_labels(&enc_codes[lb..ub], n_cond, &self.device)?;
                let y_dec = one_hot_labels(&dec_codes[lb..ub], n_cond, &self.device)?;
                let z = self.encoder.forward_t(&x, &y_enc, None, false)?.z_mean;
                Ok(self.decoder.forward_mmd_t(&z, &y_dec, false)?)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        concat_rows(chunks, n, self.decoder.dim_mmd(), &self.device)
    }

    /// Decode rows under `decoder_labels`
    /// * `data` - rows in the given `space`
    /// * `encoder_labels` - conditions used to encode (`Feature` space only)
    /// * `decoder_labels` - conditions to decode under
    /// * `space` - what the rows of `data` are
    pub fn predict<L: AsRef<str>>(
        &self,
        data: &Tensor,
        encoder_labels: &[L],
        decoder_labels: &[L],
        space: DataSpace,
    ) -> anyhow::Result<Tensor> {
        let n = data.dim(0)?;
        let dec_codes = self.encode_labels(decoder_labels, n)?;

        match space {
            DataSpace::Feature => {
                let z = self.to_latent(data, encoder_labels)?;
                self.batched(&z, &dec_codes, |z, y| {
                    Ok(self.decoder.forward_t(z, y, false)?.recon)
                })
            }
            DataSpace::Latent => {
                self.check_columns(data, self.config.z_dim)?;
                self.batched(data, &dec_codes, |z, y| {
                    Ok(self.decoder.forward_t(z, y, false)?.recon)
                })
            }
            DataSpace::Mmd => {
                self.check_columns(data, self.decoder.dim_mmd())?;
                self.batched(data, &dec_codes, |h, _| {
                    Ok(self.decoder.forward_from_mmd_t(h, false)?)
                })
            }
        }
    }

    /// Encode and decode under the same conditions
    pub fn reconstruct<L: AsRef<str>>(&self, data: &Tensor, labels: &[L]) -> anyhow::Result<Tensor> {
        self.predict(data, labels, labels, DataSpace::Feature)
    }

    fn check_columns(&self, data: &Tensor, expected: usize) -> anyhow::Result<()> {
        let (_, d) = data.dims2()?;
        if d != expected {
            return Err(anyhow::anyhow!("expected {} columns, but found {}", expected, d));
        }
        Ok(())
    }

    /// Apply `f` to row chunks of `data` with the one-hot `codes` and
    /// stack the results
    fn batched<F>(&self, data: &Tensor, codes: &[u32], f: F) -> anyhow::Result<Tensor>
    where
        F: Fn(&Tensor, &Tensor) -> anyhow::Result<Tensor>,
    {
        let n = data.dim(0)?;
        let n_cond = self.config.n_conditions();

        let chunks = generate_minibatch_intervals(n, INFERENCE_BATCH_SIZE)
            .into_iter()
            .map(|(lb, ub)| {
                let x = data.narrow(0, lb, ub - lb)?.to_device(&self.device)?;
                let y = one_hot_labels(&codes[lb..ub], n_cond, &self.device)?;
                f(&x, &y)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let d_out = match chunks.first() {
            Some(t) => t.dim(1)?,
            None => 0,
        };
        concat_rows(chunks, n, d_out, &self.device)
    }
}

fn concat_rows(chunks: Vec<Tensor>, n: usize, d: usize, dev: &Device) -> anyhow::Result<Tensor> {
    if chunks.is_empty() {
        return Ok(Tensor::zeros((n, d), DType::F32, dev)?);
    }
    Ok(Tensor::cat(&chunks, 0)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition_encoder::ConditionEncoder;
    use approx::assert_abs_diff_eq;

    fn toy_model() -> anyhow::Result<Trvae> {
        let mut config = TrvaeConfig::new(6, ConditionEncoder::fit(&["ctrl", "stim"]));
        config.encoder_layers = vec![8];
        config.z_dim = 2;
        config.mmd_dim = 4;
        Trvae::new(config, None, &Device::Cpu)
    }

    #[test]
    fn inference_shapes_and_label_checks() -> anyhow::Result<()> {
        let model = toy_model()?;
        assert_eq!(model.state(), TrainState::Untrained);

        let x = Tensor::rand(0_f32, 1., (5, 6), &Device::Cpu)?;
        let labels = ["ctrl", "stim", "ctrl", "stim", "ctrl"];

        assert_eq!(model.to_latent(&x, &labels)?.dims(), &[5, 2]);
        assert_eq!(model.to_mmd_layer(&x, &labels, Some("stim"))?.dims(), &[5, 4]);
        assert_eq!(model.reconstruct(&x, &labels)?.dims(), &[5, 6]);

        assert!(model.to_latent(&x, &labels[..3]).is_err());
        assert!(model.to_mmd_layer(&x, &labels, Some("other")).is_err());
        let wrong = Tensor::rand(0_f32, 1., (5, 3), &Device::Cpu)?;
        assert!(model.to_latent(&wrong, &labels).is_err());
        Ok(())
    }

    #[test]
    fn mmd_space_finishes_the_decoder() -> anyhow::Result<()> {
        let model = toy_model()?;
        let x = Tensor::rand(0_f32, 1., (3, 6), &Device::Cpu)?;
        let labels = ["stim", "stim", "ctrl"];

        let h = model.to_mmd_layer(&x, &labels, None)?;
        let from_h = model.predict(&h, &labels, &labels, DataSpace::Mmd)?;
        let direct = model.reconstruct(&x, &labels)?;

        let a = from_h.flatten_all()?.to_vec1::<f32>()?;
        let b = direct.flatten_all()?.to_vec1::<f32>()?;
        for (a, b) in a.iter().zip(b.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-5);
        }
        Ok(())
    }
}
