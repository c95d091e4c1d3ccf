use std::path::PathBuf;

pub struct TrainConfig {
    pub learning_rate: f32,
    pub batch_size: usize,
    pub num_epochs: usize,
    pub device: candle_core::Device,
    pub verbose: bool,
    pub show_progress: bool,
    /// reshuffle minibatches every epoch
    pub shuffle: bool,
    /// evaluate validation data and stop early
    pub use_validation: bool,
    pub early_stop_limit: usize,
    /// minimum decrease of validation loss to reset the patience
    pub threshold: f32,
    /// decode every training sample under this condition code
    pub fake_decoder_condition: Option<u32>,
    /// append one csv line per epoch
    pub log_file: Option<PathBuf>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            batch_size: 32,
            num_epochs: 25,
            device: candle_core::Device::Cpu,
            verbose: false,
            show_progress: true,
            shuffle: true,
            use_validation: false,
            early_stop_limit: 20,
            threshold: 0.0025,
            fake_decoder_condition: None,
            log_file: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrainState {
    Untrained,
    Training,
    /// stopped early on a validation plateau
    Converged,
    /// ran all the epochs
    Exhausted,
    /// optimization diverged or errored
    Failed,
}

///
/// Patience counter on a loss trace. The counter is reset when the
/// loss drops by more than `threshold` from the previous epoch,
/// otherwise incremented (the first epoch always counts).
///
pub struct EarlyStopping {
    limit: usize,
    threshold: f32,
    counter: usize,
    previous: Option<f32>,
}

impl EarlyStopping {
    pub fn new(limit: usize, threshold: f32) -> Self {
        Self {
            limit,
            threshold,
            counter: 0,
            previous: None,
        }
    }

    /// Record the loss of an epoch; `true` if training should stop
    pub fn update(&mut self, loss: f32) -> bool {
        match self.previous {
            Some(prev) if prev - loss > self.threshold => self.counter = 0,
            _ => self.counter += 1,
        }
        self.previous = Some(loss);
        self.counter > self.limit
    }

    pub fn counter(&self) -> usize {
        self.counter
    }
}
