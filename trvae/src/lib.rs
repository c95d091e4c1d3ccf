pub mod condition_encoder;
pub mod config;
pub mod expression_data;
pub mod fit;
pub mod model;
pub mod network;
pub mod persistence;

pub use condition_encoder::ConditionEncoder;
pub use config::*;
pub use expression_data::{AnnotatedData, ExpressionMatrix};
pub use model::{DataSpace, Trvae};

pub use candle_util::candle_cvae_inference::{CvaeLossConfig, EpochScores, MmdSource, TrainOutcome};
pub use candle_util::candle_inference::{TrainConfig, TrainState};
pub use candle_util::candle_mmd::{MmdKernel, MmdPairing};
