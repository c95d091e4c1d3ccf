use crate::cli::*;

use log::info;
use std::path::Path;
use trvae::*;

pub const LOG_FILE: &str = "csv_logger.log";

pub fn train_model(args: &TrainArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let dev = args.device.to_device()?;
    let model_dir = Path::new(args.model_dir.as_ref());

    // 1. Read the data
    let train = AnnotatedData::read(&args.data_file, &args.label_file)?;
    let valid = match (&args.valid_data, &args.valid_labels) {
        (Some(x), Some(y)) => Some(AnnotatedData::read(x, y)?),
        (None, None) => None,
        _ => {
            return Err(anyhow::anyhow!(
                "need both --valid-data and --valid-labels"
            ));
        }
    };

    // 2. Build a new model or restore the previous one
    let mut model = if args.resume {
        info!("resuming from {}", model_dir.display());
        Trvae::load(model_dir, &dev)?
    } else {
        let config = model_config(args, &train)?;
        Trvae::new(config, Some(model_dir), &dev)?
    };

    let fake_decoder_condition = match args.fake_condition.as_deref() {
        Some(lab) => Some(model.config().conditions.encode_one(lab)?),
        None => None,
    };

    let train_config = TrainConfig {
        learning_rate: args.learning_rate,
        batch_size: args.batch_size,
        num_epochs: args.epochs,
        device: dev.clone(),
        verbose: args.verbose,
        show_progress: !args.no_progress,
        shuffle: !args.no_shuffle,
        use_validation: valid.is_some(),
        early_stop_limit: args.early_stop_limit,
        threshold: args.threshold,
        fake_decoder_condition,
        log_file: Some(model_dir.join(LOG_FILE)),
    };

    // 3. Train and save
    let outcome = model.train(&train, valid.as_ref(), &train_config)?;

    if let Some(last) = outcome.scores.last() {
        info!(
            "{:?}: epoch {}, train loss {:.4}, validation loss {:?}",
            outcome.state,
            last.epoch + 1,
            last.train_loss,
            last.valid_loss
        );
    }
    Ok(())
}

fn model_config(args: &TrainArgs, train: &AnnotatedData) -> anyhow::Result<TrvaeConfig> {
    let conditions = match &args.conditions {
        Some(order) => ConditionEncoder::from_ordered(order.clone())?,
        None => ConditionEncoder::fit(&train.conditions),
    };

    let image_shape = match args.image_shape.as_deref() {
        Some(&[c, h, w]) => Some((c, h, w)),
        Some(other) => {
            return Err(anyhow::anyhow!(
                "--image-shape takes C,H,W, but got {:?}",
                other
            ));
        }
        None => None,
    };

    let kernel = match args.kernel {
        KernelArg::Rbf => MmdKernel::Rbf,
        KernelArg::MultiScaleRbf => MmdKernel::MultiScaleRbf,
        KernelArg::Raphy => {
            let scales = args
                .raphy_scales
                .clone()
                .ok_or_else(|| anyhow::anyhow!("the raphy kernel needs --raphy-scales"))?;
            MmdKernel::raphy(scales, args.raphy_weights.clone())?
        }
    };

    let mut config = TrvaeConfig::new(train.num_features(), conditions);
    config.z_dim = args.z_dim;
    config.mmd_dim = args.mmd_dim;
    config.dropout_rate = args.dropout_rate;
    config.arch_style = args.arch;
    config.image_shape = image_shape;
    config.encoder_layers = args.layers.clone();
    config.output_activation = args.output_activation;
    config.seed = args.seed;
    config.loss.alpha = args.alpha;
    config.loss.beta = args.beta;
    config.loss.kernel = kernel;
    config.loss.pairing = args.pairing.into();

    if args.latent == LatentKind::Deterministic {
        config = config.deterministic();
    }

    Ok(config)
}
