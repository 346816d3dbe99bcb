//! Natural language processing orchestration layer.

pub mod lexicon;
pub mod linker;

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::{
    config::Settings,
    data::{self, BatchConfig},
};
use lexicon::{ExtractionReport, FailurePolicy, LexiconExtractor};
use linker::DictionaryLinker;

/// Build the note dataset, stream it in batches through the dictionary
/// linker and write the synonym lexicon to `output`.
pub async fn build_lexicon(
    settings: &Settings,
    config: &BatchConfig,
    kb_path: &Path,
    output: &Path,
    policy: FailurePolicy,
    shuffle: bool,
) -> Result<ExtractionReport> {
    let dataset = data::load_dataset(settings, config)?;
    let linker = DictionaryLinker::load(kb_path)
        .with_context(|| format!("loading knowledge base {}", kb_path.display()))?;

    let mut rng = rand::thread_rng();
    let batches = dataset.batches(settings.batch_size, shuffle, &mut rng)?;
    info!(patients = dataset.len(), batch_size = settings.batch_size, %policy, "starting lexicon extraction");

    let report = LexiconExtractor::new(&linker, &linker)
        .with_policy(policy)
        .run(batches, output)?;
    Ok(report)
}
