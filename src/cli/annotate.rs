//! CLI entry-point for inspecting entity annotations inline.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::{info, instrument};

use crate::{
    cli::BatchArgs,
    config::Settings,
    data,
    nlp::linker::{highlight, Annotator, DictionaryLinker},
};

/// Args for the `annotate` command.
#[derive(Debug, Clone, ClapArgs)]
pub struct Args {
    #[command(flatten)]
    pub batch: BatchArgs,
    /// Knowledge base in JSON Lines; defaults to `<DATA_DIR>/kb/concepts.jsonl`.
    #[arg(long)]
    pub kb: Option<PathBuf>,
    /// Annotate this text instead of the dataset notes.
    #[arg(long)]
    pub text: Option<String>,
    /// Number of patients to show.
    #[arg(long, default_value_t = 5)]
    pub limit: usize,
}

#[instrument(skip(settings))]
pub async fn run(args: Args, settings: Settings) -> Result<()> {
    let kb = args
        .kb
        .clone()
        .unwrap_or_else(|| settings.join_data("kb/concepts.jsonl"));
    let linker = DictionaryLinker::load(&kb)
        .with_context(|| format!("loading knowledge base {}", kb.display()))?;

    if let Some(text) = &args.text {
        let entities = linker.annotate(text)?;
        println!("{}", highlight(text, &entities));
        return Ok(());
    }

    let config = args.batch.resolve(&settings);
    let dataset = data::load_dataset(&settings, &config)?;
    let shown = dataset.len().min(args.limit);
    for (name, note) in dataset.names().iter().zip(dataset.notes()).take(shown) {
        let text = note.text_unit();
        let entities = linker
            .annotate(&text)
            .with_context(|| format!("annotating notes of {name}"))?;
        println!("{name}: {}", highlight(&text, &entities));
    }
    info!(shown, patients = dataset.len(), "annotated notes");
    Ok(())
}
