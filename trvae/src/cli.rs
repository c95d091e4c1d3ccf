use clap::{Args, ValueEnum};
use trvae::{ArchStyle, LatentKind, MmdPairing, OutputActivation};

#[derive(ValueEnum, Clone, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cpu,
    Cuda,
    Metal,
}

impl ComputeDevice {
    pub fn to_device(&self) -> anyhow::Result<candle_core::Device> {
        Ok(match self {
            ComputeDevice::Metal => candle_core::Device::new_metal(0)?,
            ComputeDevice::Cuda => candle_core::Device::new_cuda(0)?,
            ComputeDevice::Cpu => candle_core::Device::Cpu,
        })
    }
}

#[derive(ValueEnum, Clone, Debug, PartialEq)]
pub enum KernelArg {
    Rbf,
    MultiScaleRbf,
    Raphy,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum PairingArg {
    AllPairs,
    Chain,
}

impl From<PairingArg> for MmdPairing {
    fn from(p: PairingArg) -> Self {
        match p {
            PairingArg::AllPairs => MmdPairing::AllPairs,
            PairingArg::Chain => MmdPairing::Chain,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum SpaceArg {
    Feature,
    Latent,
    Mmd,
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[arg(
        required = true,
        help = "Data file (cells x features)",
        long_help = "Training data with cells in rows.\n\
		     MatrixMarket (`.mtx`, `.mtx.gz`) files are read as sparse matrices,\n\
		     other files as delimited text (`.tsv`, `.csv`, optionally gzipped)."
    )]
    pub data_file: Box<str>,

    #[arg(
        required = true,
        help = "Condition label file",
        long_help = "Condition label of each cell, one per line,\n\
		     in the same order as the rows of the data file."
    )]
    pub label_file: Box<str>,

    #[arg(
        long,
        short,
        required = true,
        help = "Model directory",
        long_help = "Directory for the model artifacts:\n\
		     - {dir}/config.json\n\
		     - {dir}/mmd_cvae.safetensors\n\
		     - {dir}/encoder.safetensors\n\
		     - {dir}/decoder.safetensors\n\
		     - {dir}/csv_logger.log (per-epoch losses)\n"
    )]
    pub model_dir: Box<str>,

    #[arg(long, help = "Validation data file")]
    pub valid_data: Option<Box<str>>,

    #[arg(long, help = "Validation condition label file")]
    pub valid_labels: Option<Box<str>>,

    #[arg(
        long,
        value_delimiter(','),
        help = "Condition order",
        long_help = "Comma-separated condition names in the order of their codes.\n\
		     By default, the sorted distinct labels of the training data."
    )]
    pub conditions: Option<Vec<Box<str>>>,

    #[arg(
        long,
        default_value_t = false,
        help = "Resume training",
        long_help = "Resume training from the parameters saved in the model directory.\n\
		     The architecture options are taken from its `config.json`."
    )]
    pub resume: bool,

    #[arg(long, value_enum, default_value = "dense", help = "Network architecture")]
    pub arch: ArchStyle,

    #[arg(
        long,
        value_delimiter(','),
        help = "Image shape (C,H,W)",
        long_help = "Channels, height and width of images stored as flattened rows.\n\
		     Required by `baseline-cnn`, `fully-connected` and `unet`."
    )]
    pub image_shape: Option<Vec<usize>>,

    #[arg(long, short = 'z', default_value_t = 100, help = "Latent dimension")]
    pub z_dim: usize,

    #[arg(long, default_value_t = 128, help = "MMD layer dimension")]
    pub mmd_dim: usize,

    #[arg(
        long,
        value_delimiter(','),
        default_values_t = vec![700, 400],
        help = "Encoder hidden layers",
        long_help = "Hidden layer sizes of the dense encoder (comma-separated).\n\
		     The decoder uses them in reverse order."
    )]
    pub layers: Vec<usize>,

    #[arg(long, default_value_t = 0.2, help = "Dropout rate")]
    pub dropout_rate: f32,

    #[arg(long, value_enum, default_value = "variational", help = "Latent kind")]
    pub latent: LatentKind,

    #[arg(long, value_enum, default_value = "relu", help = "Output activation")]
    pub output_activation: OutputActivation,

    #[arg(long, default_value_t = 0.001, help = "KL weight (alpha)")]
    pub alpha: f64,

    #[arg(long, default_value_t = 100., help = "MMD weight (beta)")]
    pub beta: f64,

    #[arg(long, value_enum, default_value = "multi-scale-rbf", help = "MMD kernel")]
    pub kernel: KernelArg,

    #[arg(
        long,
        value_delimiter(','),
        help = "Scales of the raphy kernel",
        long_help = "Comma-separated bandwidths of the `raphy` kernel."
    )]
    pub raphy_scales: Option<Vec<f64>>,

    #[arg(
        long,
        value_delimiter(','),
        help = "Weights of the raphy kernel (uniform by default)"
    )]
    pub raphy_weights: Option<Vec<f64>>,

    #[arg(long, value_enum, default_value = "all-pairs", help = "Pairs of conditions in MMD")]
    pub pairing: PairingArg,

    #[arg(
        long,
        help = "Decode every training cell under this condition",
        long_help = "Decode every training cell under this condition\n\
		     while the MMD still partitions by the true labels."
    )]
    pub fake_condition: Option<Box<str>>,

    #[arg(long, default_value_t = 1e-3, help = "Learning rate")]
    pub learning_rate: f32,

    #[arg(long, short = 'b', default_value_t = 32, help = "Minibatch size")]
    pub batch_size: usize,

    #[arg(long, short = 'e', default_value_t = 25, help = "Number of epochs")]
    pub epochs: usize,

    #[arg(long, default_value_t = 20, help = "Early stopping patience")]
    pub early_stop_limit: usize,

    #[arg(
        long,
        default_value_t = 0.0025,
        help = "Minimum improvement of validation loss"
    )]
    pub threshold: f32,

    #[arg(long, default_value_t = false, help = "Keep the minibatch order fixed")]
    pub no_shuffle: bool,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    pub seed: u64,

    #[arg(long, value_enum, default_value = "cpu", help = "Compute device")]
    pub device: ComputeDevice,

    #[arg(long, default_value_t = false, help = "Hide the progress bar")]
    pub no_progress: bool,

    #[arg(long, short, help = "Verbosity")]
    pub verbose: bool,
}

/// Shared by the inference subcommands
#[derive(Args, Debug)]
pub struct ModelDataArgs {
    #[arg(long, short, required = true, help = "Model directory")]
    pub model_dir: Box<str>,

    #[arg(required = true, help = "Data file (cells x features)")]
    pub data_file: Box<str>,

    #[arg(required = true, help = "Condition label file")]
    pub label_file: Box<str>,

    #[arg(
        long,
        short,
        required = true,
        help = "Output file",
        long_help = "Output file (tab-separated; gzipped if it ends with `.gz`)"
    )]
    pub out: Box<str>,

    #[arg(long, value_enum, default_value = "cpu", help = "Compute device")]
    pub device: ComputeDevice,

    #[arg(long, short, help = "Verbosity")]
    pub verbose: bool,
}

#[derive(Args, Debug)]
pub struct LatentArgs {
    #[command(flatten)]
    pub common: ModelDataArgs,
}

#[derive(Args, Debug)]
pub struct MmdArgs {
    #[command(flatten)]
    pub common: ModelDataArgs,

    #[arg(long, help = "Decode every cell under this condition")]
    pub fake_label: Option<Box<str>>,
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    #[command(flatten)]
    pub common: ModelDataArgs,

    #[arg(
        long,
        short,
        help = "Target condition",
        long_help = "Decode every cell under this condition.\n\
		     Use `--target-labels` for per-cell targets."
    )]
    pub target: Option<Box<str>>,

    #[arg(long, help = "Target condition label file (one per cell)")]
    pub target_labels: Option<Box<str>>,

    #[arg(
        long,
        value_enum,
        default_value = "feature",
        help = "What the rows of the data file are",
        long_help = "feature: expression rows (encode, then decode)\n\
		     latent: latent codes (decode only)\n\
		     mmd: decoder MMD layer activations"
    )]
    pub space: SpaceArg,
}
