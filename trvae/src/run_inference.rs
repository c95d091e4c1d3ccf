use crate::cli::*;

use matrix_util::common_io::read_lines;
use matrix_util::traits::IoOps;
use std::path::Path;
use trvae::*;

fn load_model_and_data(args: &ModelDataArgs) -> anyhow::Result<(Trvae, AnnotatedData)> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let dev = args.device.to_device()?;
    let model = Trvae::load(Path::new(args.model_dir.as_ref()), &dev)?;
    let data = AnnotatedData::read(&args.data_file, &args.label_file)?;
    Ok((model, data))
}

pub fn write_latent(args: &LatentArgs) -> anyhow::Result<()> {
    let (model, data) = load_model_and_data(&args.common)?;
    let x = data.x.to_tensor(model.device())?;
    let z = model.to_latent(&x, &data.conditions)?;
    z.to_tsv(&args.common.out)
}

pub fn write_mmd_layer(args: &MmdArgs) -> anyhow::Result<()> {
    let (model, data) = load_model_and_data(&args.common)?;
    let x = data.x.to_tensor(model.device())?;
    let h = model.to_mmd_layer(&x, &data.conditions, args.fake_label.as_deref())?;
    h.to_tsv(&args.common.out)
}

pub fn write_prediction(args: &PredictArgs) -> anyhow::Result<()> {
    let (model, data) = load_model_and_data(&args.common)?;

    let targets: Vec<Box<str>> = match (&args.target, &args.target_labels) {
        (Some(lab), None) => vec![lab.clone(); data.num_cells()],
        (None, Some(file)) => read_lines(file)?
            .into_iter()
            .map(|s| s.trim().to_string().into_boxed_str())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => {
            return Err(anyhow::anyhow!(
                "need exactly one of --target and --target-labels"
            ));
        }
    };

    let space = match args.space {
        SpaceArg::Feature => DataSpace::Feature,
        SpaceArg::Latent => DataSpace::Latent,
        SpaceArg::Mmd => DataSpace::Mmd,
    };

    let x = data.x.to_tensor(model.device())?;
    let pred = model.predict(&x, &data.conditions, &targets, space)?;
    pred.to_tsv(&args.common.out)
}
