//! CLI entry-point for loading pretrained embeddings.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::{info, instrument};

use crate::{config::Settings, data::vocab::Vocabulary};

/// Args for the `vocab` command.
#[derive(Debug, Clone, ClapArgs)]
pub struct Args {
    /// word2vec text file; defaults to `<DATA_DIR>/embeddings.txt`.
    #[arg(long)]
    pub embeddings: Option<PathBuf>,
    /// Maximum number of tokens read from the file.
    #[arg(long, default_value_t = 50_000)]
    pub vocab_size: usize,
    /// Embedding dimension.
    #[arg(long, default_value_t = 100)]
    pub emb_size: usize,
}

#[instrument(skip(settings))]
pub async fn run(args: Args, settings: Settings) -> Result<()> {
    let path = args
        .embeddings
        .unwrap_or_else(|| settings.join_data("embeddings.txt"));
    let (vocab, weights) = Vocabulary::from_embeddings(&path, args.vocab_size, args.emb_size)
        .with_context(|| format!("loading embeddings {}", path.display()))?;
    info!(tokens = vocab.len(), rows = weights.nrows(), "vocabulary ready");
    println!(
        "{} tokens, weights {} x {}",
        vocab.len(),
        weights.nrows(),
        weights.ncols()
    );
    Ok(())
}
