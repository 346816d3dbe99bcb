//! CLI entry-point for building the note dataset.

use anyhow::Result;
use clap::Args as ClapArgs;
use tracing::{info, instrument};

use crate::{cli::BatchArgs, config::Settings, data};

/// Args for the `build` command.
#[derive(Debug, Clone, ClapArgs)]
pub struct Args {
    #[command(flatten)]
    pub batch: BatchArgs,
}

#[instrument(skip(settings))]
pub async fn run(args: Args, settings: Settings) -> Result<()> {
    let config = args.batch.resolve(&settings);
    let dataset = data::load_dataset(&settings, &config)?;
    let tokens: usize = dataset.notes().iter().map(|n| n.token_count()).sum();
    info!(
        patients = dataset.len(),
        time_steps = dataset.time_steps(),
        channels = dataset.channels(),
        tokens,
        "dataset ready"
    );
    println!(
        "{} patients, {} time steps x {} channels, {} note tokens ({} mode)",
        dataset.len(),
        dataset.time_steps(),
        dataset.channels(),
        tokens,
        config.mode
    );
    Ok(())
}
