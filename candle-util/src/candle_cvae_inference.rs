use crate::candle_data_loader::*;
use crate::candle_inference::*;
use crate::candle_loss_functions::{gaussian_kl_loss, gaussian_likelihood, squared_error_loss};
use crate::candle_mmd::*;
use crate::candle_model_traits::*;

use candle_core::{Device, Result, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Which representation the MMD penalty aligns across conditions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MmdSource {
    /// the MMD layer of the decoder
    #[default]
    DecoderLayer,
    /// the latent code of the encoder
    Latent,
}

/// Weights and kernel of the composite objective
///
/// loss = recon + alpha * KL + beta * MMD
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CvaeLossConfig {
    pub alpha: f64,
    pub beta: f64,
    pub kernel: MmdKernel,
    pub pairing: MmdPairing,
    pub mmd_source: MmdSource,
}

impl Default for CvaeLossConfig {
    fn default() -> Self {
        Self {
            alpha: 0.001,
            beta: 100.,
            kernel: MmdKernel::default(),
            pairing: MmdPairing::default(),
            mmd_source: MmdSource::default(),
        }
    }
}

/// Scalar components of the composite loss of a minibatch
pub struct CvaeLoss {
    pub total: Tensor,
    pub recon: Tensor,
    pub kl: Option<Tensor>,
    /// already multiplied by `beta`
    pub mmd: Tensor,
}

pub const EPOCH_LOG_HEADER: &str = "epoch,train_loss,train_mmd_loss,valid_loss,valid_mmd_loss";

#[derive(Clone, Debug, PartialEq)]
pub struct EpochScores {
    pub epoch: usize,
    pub train_loss: f32,
    pub train_mmd_loss: f32,
    pub valid_loss: Option<f32>,
    pub valid_mmd_loss: Option<f32>,
}

impl EpochScores {
    pub fn to_csv_line(&self) -> String {
        let opt = |x: Option<f32>| x.map(|v| v.to_string()).unwrap_or_default();
        format!(
            "{},{},{},{},{}",
            self.epoch,
            self.train_loss,
            self.train_mmd_loss,
            opt(self.valid_loss),
            opt(self.valid_mmd_loss)
        )
    }
}

pub struct TrainOutcome {
    pub state: TrainState,
    pub scores: Vec<EpochScores>,
}

pub struct Cvae<'a, Enc, Dec>
where
    Enc: ConditionalEncoderT,
    Dec: ConditionalDecoderT,
{
    pub encoder: &'a Enc,
    pub decoder: &'a Dec,
    pub variable_map: &'a candle_nn::VarMap,
    pub loss_config: &'a CvaeLossConfig,
    pub n_conditions: usize,
}

pub trait CvaeT<'a, Enc, Dec>
where
    Enc: ConditionalEncoderT,
    Dec: ConditionalDecoderT,
{
    /// Build a conditional VAE model
    /// * `encoder` - encoder module
    /// * `decoder` - decoder module
    /// * `variable_map` - parameters of both modules
    /// * `loss_config` - composite loss weights
    /// * `n_conditions` - number of condition codes
    fn build(
        encoder: &'a Enc,
        decoder: &'a Dec,
        variable_map: &'a candle_nn::VarMap,
        loss_config: &'a CvaeLossConfig,
        n_conditions: usize,
    ) -> Self;

    /// Evaluate the composite loss on a minibatch
    /// * `mb` - minibatch with true condition labels
    /// * `noise_nk` - reparameterization noise (variational encoders)
    /// * `decoder_onehot` - labels fed to the decoder instead of `mb.onehot`
    /// * `train` - whether to use dropout/batchnorm or not
    fn composite_loss(
        &self,
        mb: &MinibatchData,
        noise_nk: Option<&Tensor>,
        decoder_onehot: Option<&Tensor>,
        train: bool,
    ) -> Result<CvaeLoss>;

    /// Train the model with Adam
    /// * `data` - training data loader
    /// * `valid` - validation data loader
    /// * `rng` - source of shuffling and reparameterization noise
    /// * `train_config` - training configuration
    fn train_encoder_decoder<DataL, R>(
        &mut self,
        data: &mut DataL,
        valid: Option<&mut DataL>,
        rng: &mut R,
        train_config: &TrainConfig,
    ) -> anyhow::Result<TrainOutcome>
    where
        DataL: DataLoader,
        R: Rng;
}

/// Standard normal noise (n x k) drawn from `rng`
pub fn sample_noise<R: Rng>(rng: &mut R, n: usize, k: usize, device: &Device) -> Result<Tensor> {
    let eps: Vec<f32> = (0..(n * k))
        .map(|_| rng.sample::<f32, _>(StandardNormal))
        .collect();
    Tensor::from_vec(eps, (n, k), device)
}

impl<'a, Enc, Dec> CvaeT<'a, Enc, Dec> for Cvae<'a, Enc, Dec>
where
    Enc: ConditionalEncoderT,
    Dec: ConditionalDecoderT,
{
    fn build(
        encoder: &'a Enc,
        decoder: &'a Dec,
        variable_map: &'a candle_nn::VarMap,
        loss_config: &'a CvaeLossConfig,
        n_conditions: usize,
    ) -> Self {
        Self {
            encoder,
            decoder,
            variable_map,
            loss_config,
            n_conditions,
        }
    }

    fn composite_loss(
        &self,
        mb: &MinibatchData,
        noise_nk: Option<&Tensor>,
        decoder_onehot: Option<&Tensor>,
        train: bool,
    ) -> Result<CvaeLoss> {
        let x_nd = &mb.input;
        let latent = self.encoder.forward_t(x_nd, &mb.onehot, noise_nk, train)?;
        let y_dec = decoder_onehot.unwrap_or(&mb.onehot);
        let out = self.decoder.forward_t(&latent.z, y_dec, train)?;

        let recon = if self.encoder.is_variational() {
            gaussian_likelihood(x_nd, &out.recon)?.neg()?.mean_all()?
        } else {
            squared_error_loss(x_nd, &out.recon)?.mean_all()?
        };

        let kl = match &latent.z_lnvar {
            Some(z_lnvar) => Some(gaussian_kl_loss(&latent.z_mean, z_lnvar)?.mean_all()?),
            None => None,
        };

        let h_mmd = match self.loss_config.mmd_source {
            MmdSource::DecoderLayer => &out.mmd,
            MmdSource::Latent => &latent.z,
        };

        let mmd = (condition_mmd_loss(
            h_mmd,
            &mb.labels,
            self.n_conditions,
            &self.loss_config.kernel,
            self.loss_config.pairing,
        )? * self.loss_config.beta)?;

        let mut total = (&recon + &mmd)?;
        if let Some(kl) = &kl {
            total = (total + (kl * self.loss_config.alpha)?)?;
        }

        Ok(CvaeLoss {
            total,
            recon,
            kl,
            mmd,
        })
    }

    fn train_encoder_decoder<DataL, R>(
        &mut self,
        data: &mut DataL,
        mut valid: Option<&mut DataL>,
        rng: &mut R,
        train_config: &TrainConfig,
    ) -> anyhow::Result<TrainOutcome>
    where
        DataL: DataLoader,
        R: Rng,
    {
        if train_config.use_validation && valid.is_none() {
            return Err(anyhow::anyhow!(
                "validation is requested, but no validation data was given"
            ));
        }

        let device = &train_config.device;
        let batch_size = train_config.batch_size;

        let mut adam = AdamW::new(
            self.variable_map.all_vars(),
            ParamsAdamW {
                lr: train_config.learning_rate.into(),
                weight_decay: 0.,
                ..Default::default()
            },
        )?;

        let pb = ProgressBar::new(train_config.num_epochs as u64);

        if !train_config.show_progress || train_config.verbose {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        let mut log_writer = match &train_config.log_file {
            Some(path) => Some(open_epoch_log(path)?),
            None => None,
        };

        if train_config.shuffle {
            data.shuffle_minibatch(batch_size, rng)?;
        } else {
            data.ordered_minibatch(batch_size)?;
        }
        if let Some(valid) = valid.as_mut() {
            valid.ordered_minibatch(batch_size)?;
        }

        let fake_onehot = |n: usize| -> Result<Option<Tensor>> {
            match train_config.fake_decoder_condition {
                Some(k) => Ok(Some(one_hot_labels(&vec![k; n], self.n_conditions, device)?)),
                None => Ok(None),
            }
        };

        let n_latent = self.encoder.dim_latent();
        let variational = self.encoder.is_variational();

        let mut stopping =
            EarlyStopping::new(train_config.early_stop_limit, train_config.threshold);
        let mut scores = vec![];
        let mut state = TrainState::Training;

        for epoch in 0..train_config.num_epochs {
            if epoch > 0 && train_config.shuffle {
                data.shuffle_minibatch(batch_size, rng)?;
            }

            let mut train_loss = 0_f32;
            let mut train_mmd_loss = 0_f32;

            for b in 0..data.num_minibatch() {
                let mb = data.minibatch_data(b, device)?;
                let n = mb.labels.len();
                let noise = if variational {
                    Some(sample_noise(rng, n, n_latent, device)?)
                } else {
                    None
                };
                let y_fake = fake_onehot(n)?;

                let loss = self.composite_loss(&mb, noise.as_ref(), y_fake.as_ref(), true)?;
                let loss_val = loss.total.to_scalar::<f32>()?;
                if !loss_val.is_finite() {
                    return Err(anyhow::anyhow!(
                        "non-finite training loss {} at epoch {}, batch {}",
                        loss_val,
                        epoch + 1,
                        b
                    ));
                }
                adam.backward_step(&loss.total)?;
                train_loss += loss_val;
                train_mmd_loss += loss.mmd.to_scalar::<f32>()?;
            }

            let nb = data.num_minibatch().max(1) as f32;
            let mut epoch_scores = EpochScores {
                epoch,
                train_loss: train_loss / nb,
                train_mmd_loss: train_mmd_loss / nb,
                valid_loss: None,
                valid_mmd_loss: None,
            };

            let mut stop = false;

            if train_config.use_validation {
                if let Some(valid) = valid.as_deref() {
                    let (valid_loss, valid_mmd_loss) = self.evaluate(valid, device)?;
                    if !valid_loss.is_finite() {
                        return Err(anyhow::anyhow!(
                            "non-finite validation loss {} at epoch {}",
                            valid_loss,
                            epoch + 1
                        ));
                    }
                    epoch_scores.valid_loss = Some(valid_loss);
                    epoch_scores.valid_mmd_loss = Some(valid_mmd_loss);
                    stop = stopping.update(valid_loss);
                }
            }

            if let Some(writer) = log_writer.as_mut() {
                writeln!(writer, "{}", epoch_scores.to_csv_line())?;
                writer.flush()?;
            }

            if train_config.verbose {
                info!(
                    "[{}] train: {:.4} (mmd {:.4}), valid: {:?} (mmd {:?})",
                    epoch + 1,
                    epoch_scores.train_loss,
                    epoch_scores.train_mmd_loss,
                    epoch_scores.valid_loss,
                    epoch_scores.valid_mmd_loss
                );
            }

            scores.push(epoch_scores);
            pb.inc(1);

            if stop {
                info!(
                    "early stopping at epoch {}: no improvement over {} epochs",
                    epoch + 1,
                    stopping.counter()
                );
                state = TrainState::Converged;
                break;
            }
        }
        pb.finish_and_clear();

        if state == TrainState::Training {
            state = TrainState::Exhausted;
        }

        Ok(TrainOutcome { state, scores })
    }
}

impl<Enc, Dec> Cvae<'_, Enc, Dec>
where
    Enc: ConditionalEncoderT,
    Dec: ConditionalDecoderT,
{
    /// Sum of the composite loss (and its MMD part) over the batches
    /// of `valid`, in inference mode, divided by the number of samples
    pub fn evaluate<DataL>(&self, valid: &DataL, device: &Device) -> anyhow::Result<(f32, f32)>
    where
        DataL: DataLoader,
    {
        let mut tot = 0_f32;
        let mut tot_mmd = 0_f32;
        for b in 0..valid.num_minibatch() {
            let mb = valid.minibatch_data(b, device)?;
            let loss = self.composite_loss(&mb, None, None, false)?;
            tot += loss.total.to_scalar::<f32>()?;
            tot_mmd += loss.mmd.to_scalar::<f32>()?;
        }
        let n = valid.num_samples().max(1) as f32;
        Ok((tot / n, tot_mmd / n))
    }
}

fn open_epoch_log(path: &std::path::Path) -> anyhow::Result<std::io::BufWriter<std::fs::File>> {
    let is_new = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let mut writer = std::io::BufWriter::new(file);
    if is_new {
        writeln!(writer, "{}", EPOCH_LOG_HEADER)?;
    }
    Ok(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle_decoder_dense::DenseConditionalDecoder;
    use crate::candle_encoder_dense::DenseConditionalEncoder;
    use candle_core::DType;
    use candle_nn::{VarBuilder, VarMap};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn toy_loader(n: usize, rng: &mut StdRng) -> anyhow::Result<LabelledData> {
        let mut x = Vec::with_capacity(n * 5);
        let mut labels = Vec::with_capacity(n);
        for i in 0..n {
            let k = (i % 2) as u32;
            labels.push(k);
            for _ in 0..5 {
                let e: f32 = rng.sample(StandardNormal);
                x.push(1. + 2. * k as f32 + 0.1 * e);
            }
        }
        let x = Tensor::from_vec(x, (n, 5), &Device::Cpu)?;
        LabelledData::new(x, labels, 2)
    }

    #[test]
    fn composite_loss_adds_up() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let enc = DenseConditionalEncoder::new(5, 2, 3, &[8], 0., true, vb.pp("encoder"))?;
        let dec = DenseConditionalDecoder::new(5, 2, 3, 4, &[8], 0., None, vb.pp("decoder"))?;
        let loss_config = CvaeLossConfig::default();
        let cvae = Cvae::build(&enc, &dec, &varmap, &loss_config, 2);

        let mut rng = StdRng::seed_from_u64(1);
        let mut data = toy_loader(10, &mut rng)?;
        data.ordered_minibatch(10)?;
        let mb = data.minibatch_data(0, &dev)?;

        let loss = cvae.composite_loss(&mb, None, None, false)?;
        let total = loss.total.to_scalar::<f32>()?;
        let parts = loss.recon.to_scalar::<f32>()?
            + loss.mmd.to_scalar::<f32>()?
            + 0.001 * loss.kl.as_ref().unwrap().to_scalar::<f32>()?;
        approx::assert_relative_eq!(total, parts, max_relative = 1e-5);

        let y_fake = one_hot_labels(&[1; 10], 2, &dev)?;
        let fake = cvae.composite_loss(&mb, None, Some(&y_fake), false)?;
        assert!(fake.total.to_scalar::<f32>()?.is_finite());
        Ok(())
    }

    #[test]
    fn training_reduces_loss_and_writes_log() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let enc = DenseConditionalEncoder::new(5, 2, 2, &[16], 0., false, vb.pp("encoder"))?;
        let dec = DenseConditionalDecoder::new(5, 2, 2, 8, &[16], 0., None, vb.pp("decoder"))?;
        let loss_config = CvaeLossConfig {
            beta: 1.,
            mmd_source: MmdSource::Latent,
            ..Default::default()
        };
        let mut cvae = Cvae::build(&enc, &dec, &varmap, &loss_config, 2);

        let mut rng = StdRng::seed_from_u64(7);
        let mut data = toy_loader(64, &mut rng)?;
        let mut valid = toy_loader(16, &mut rng)?;

        let dir = tempfile::tempdir()?;
        let log_file = dir.path().join("log.csv");
        let config = TrainConfig {
            learning_rate: 0.01,
            batch_size: 16,
            num_epochs: 30,
            use_validation: true,
            early_stop_limit: 100,
            show_progress: false,
            log_file: Some(log_file.clone()),
            ..Default::default()
        };

        let outcome = cvae.train_encoder_decoder(&mut data, Some(&mut valid), &mut rng, &config)?;
        assert_eq!(outcome.state, TrainState::Exhausted);
        assert_eq!(outcome.scores.len(), 30);
        let first = outcome.scores.first().unwrap().train_loss;
        let last = outcome.scores.last().unwrap().train_loss;
        assert!(last < first);

        let log = std::fs::read_to_string(&log_file)?;
        let lines: Vec<_> = log.lines().collect();
        assert_eq!(lines[0], EPOCH_LOG_HEADER);
        assert_eq!(lines.len(), 31);
        Ok(())
    }

    #[test]
    fn fixed_order_without_shuffling() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let enc = DenseConditionalEncoder::new(5, 2, 2, &[4], 0., false, vb.pp("encoder"))?;
        let dec = DenseConditionalDecoder::new(5, 2, 2, 4, &[4], 0., None, vb.pp("decoder"))?;
        let loss_config = CvaeLossConfig::default();
        let mut cvae = Cvae::build(&enc, &dec, &varmap, &loss_config, 2);

        let rows = Tensor::arange(0_f32, 16., &dev)?.reshape((16, 1))?;
        let x = rows.broadcast_as((16, 5))?.contiguous()?;
        let labels = (0..16).map(|i| i % 2).collect();
        let mut data = LabelledData::new(x, labels, 2)?;

        let mut rng = StdRng::seed_from_u64(3);
        let mut config = TrainConfig {
            batch_size: 4,
            num_epochs: 2,
            shuffle: false,
            show_progress: false,
            ..Default::default()
        };
        cvae.train_encoder_decoder(&mut data, None, &mut rng, &config)?;
        let first = data.minibatch_data(0, &dev)?.input.narrow(1, 0, 1)?.flatten_all()?;
        assert_eq!(first.to_vec1::<f32>()?, vec![0., 1., 2., 3.]);

        config.shuffle = true;
        cvae.train_encoder_decoder(&mut data, None, &mut rng, &config)?;
        let order: Vec<f32> = (0..data.num_minibatch())
            .map(|b| -> anyhow::Result<Vec<f32>> {
                let mb = data.minibatch_data(b, &dev)?;
                Ok(mb.input.narrow(1, 0, 1)?.flatten_all()?.to_vec1::<f32>()?)
            })
            .collect::<anyhow::Result<Vec<_>>>()?
            .concat();
        let identity: Vec<f32> = (0..16).map(|i| i as f32).collect();
        assert_ne!(order, identity);
        Ok(())
    }

    #[test]
    fn missing_validation_data_is_an_error() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let enc = DenseConditionalEncoder::new(5, 2, 2, &[4], 0., true, vb.pp("encoder"))?;
        let dec = DenseConditionalDecoder::new(5, 2, 2, 4, &[4], 0., None, vb.pp("decoder"))?;
        let loss_config = CvaeLossConfig::default();
        let mut cvae = Cvae::build(&enc, &dec, &varmap, &loss_config, 2);

        let mut rng = StdRng::seed_from_u64(0);
        let mut data = toy_loader(8, &mut rng)?;
        let config = TrainConfig {
            use_validation: true,
            show_progress: false,
            ..Default::default()
        };
        assert!(
            cvae.train_encoder_decoder(&mut data, None, &mut rng, &config)
                .is_err()
        );
        Ok(())
    }
}
