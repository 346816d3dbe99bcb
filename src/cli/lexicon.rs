//! CLI entry-point for synonym lexicon extraction.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args as ClapArgs;
use tracing::instrument;

use crate::{cli::BatchArgs, config::Settings, nlp, nlp::lexicon::FailurePolicy};

/// Args for the `lexicon` command.
#[derive(Debug, Clone, ClapArgs)]
pub struct Args {
    #[command(flatten)]
    pub batch: BatchArgs,
    /// Knowledge base in JSON Lines; defaults to `<DATA_DIR>/kb/concepts.jsonl`.
    #[arg(long)]
    pub kb: Option<PathBuf>,
    /// Output file; defaults to `<OUTPUTS_DIR>/lexicon.txt`.
    #[arg(long)]
    pub output: Option<PathBuf>,
    /// Reaction to annotation failures; defaults to `FAILURE_POLICY`.
    #[arg(long, value_enum)]
    pub on_error: Option<FailurePolicy>,
    /// Visit patients in random order.
    #[arg(long, default_value_t = false)]
    pub shuffle: bool,
}

#[instrument(skip(settings))]
pub async fn run(args: Args, settings: Settings) -> Result<()> {
    let config = args.batch.resolve(&settings);
    let kb = args
        .kb
        .unwrap_or_else(|| settings.join_data("kb/concepts.jsonl"));
    let output = args
        .output
        .unwrap_or_else(|| settings.join_output("lexicon.txt"));
    let policy = args.on_error.unwrap_or(settings.failure_policy);

    let report = nlp::build_lexicon(&settings, &config, &kb, &output, policy, args.shuffle).await?;
    println!(
        "{}: {} text units, {} entities ({} unlinked), {} failures",
        output.display(),
        report.text_units,
        report.entities,
        report.unlinked,
        report.failures
    );
    Ok(())
}
