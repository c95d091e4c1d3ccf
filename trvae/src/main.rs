mod cli;
mod run_inference;
mod run_train;

use clap::{Parser, Subcommand};
use cli::*;
use log::info;
use run_inference::*;
use run_train::*;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "trVAE",
    long_about = "Transfer variational autoencoders\n\
		  Conditional VAEs regularized by maximum mean discrepancy (MMD)\n\
		  to map cells across conditions (e.g., control to stimulated)."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Train a model on labelled data",
        long_about = "Train the encoder and decoder in the two stages: \n\
		      (1) Minimize reconstruction + KL + MMD by minibatch Adam\n\
		      (2) Save the model into the model directory.\n\
		      With validation data, training stops early on a plateau.\n"
    )]
    Train(TrainArgs),

    #[command(about = "Latent means of the cells")]
    Latent(LatentArgs),

    #[command(about = "Activations of the decoder MMD layer")]
    Mmd(MmdArgs),

    #[command(
        about = "Predict cells under other conditions",
        long_about = "Encode cells under their own conditions and\n\
		      decode them under the target conditions.\n"
    )]
    Predict(PredictArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Train(args) => {
            train_model(args)?;
        }
        Commands::Latent(args) => {
            write_latent(args)?;
        }
        Commands::Mmd(args) => {
            write_mmd_layer(args)?;
        }
        Commands::Predict(args) => {
            write_prediction(args)?;
        }
    }

    info!("Done");
    Ok(())
}
