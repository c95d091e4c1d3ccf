use crate::expression_data::AnnotatedData;
use crate::model::Trvae;

use candle_util::candle_cvae_inference::*;
use candle_util::candle_data_loader::LabelledData;
use candle_util::candle_inference::{TrainConfig, TrainState};
use log::info;

impl Trvae {
    fn labelled_data(&self, data: &AnnotatedData) -> anyhow::Result<LabelledData> {
        if data.num_features() != self.config.x_dim {
            return Err(anyhow::anyhow!(
                "{} features in the data, but the model expects {}",
                data.num_features(),
                self.config.x_dim
            ));
        }
        let codes = self.encode_labels(&data.conditions, data.num_cells())?;
        let x = data.x.to_tensor(&self.device)?;
        LabelledData::new(x, codes, self.config.n_conditions())
    }

    /// Fit the encoder and decoder by minimizing reconstruction + KL +
    /// MMD, and save the result into the model directory (if any)
    /// * `train` - training cells with their conditions
    /// * `valid` - validation cells for early stopping
    /// * `train_config` - optimizer and early stopping parameters
    pub fn train(
        &mut self,
        train: &AnnotatedData,
        valid: Option<&AnnotatedData>,
        train_config: &TrainConfig,
    ) -> anyhow::Result<TrainOutcome> {
        if train_config.use_validation && valid.is_none() {
            return Err(anyhow::anyhow!(
                "validation is requested, but no validation data was given"
            ));
        }

        if !train_config.device.same_device(&self.device) {
            return Err(anyhow::anyhow!(
                "training on {:?}, but the model lives on {:?}",
                train_config.device,
                self.device
            ));
        }

        if let Some(k) = train_config.fake_decoder_condition {
            if k as usize >= self.config.n_conditions() {
                return Err(anyhow::anyhow!("fake decoder condition {} out of range", k));
            }
        }

        let mut train_data = self.labelled_data(train)?;
        let mut valid_data = valid.map(|v| self.labelled_data(v)).transpose()?;

        info!(
            "training on {} cells ({} for validation)",
            train.num_cells(),
            valid.map(|v| v.num_cells()).unwrap_or(0)
        );

        self.state = TrainState::Training;

        let mut cvae = Cvae::build(
            &self.encoder,
            &self.decoder,
            &self.varmap,
            &self.config.loss,
            self.config.n_conditions(),
        );

        let outcome = match cvae.train_encoder_decoder(
            &mut train_data,
            valid_data.as_mut(),
            &mut self.rng,
            train_config,
        ) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.state = TrainState::Failed;
                return Err(err);
            }
        };

        self.state = outcome.state;
        info!(
            "{:?} after {} epochs",
            outcome.state,
            outcome.scores.len()
        );

        if self.model_path.is_some() {
            self.save()?;
        }

        Ok(outcome)
    }
}
