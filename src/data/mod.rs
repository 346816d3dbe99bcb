//! Patient record ingestion and dataset shaping layer.

pub mod batch;
pub mod reader;
pub mod record;
pub mod vocab;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Settings;

pub use batch::{Batch, BatchConfig, BatchError, NoteDataset, NoteRepr, NotesMode};
pub use record::PatientRecord;

use reader::{Discretizer, MortalityReader, Normalizer};

/// Read every stay listed in `listfile.csv` and shape it into a dataset.
///
/// Expects `timeseries/` and `notes/` under the data directory; a
/// `normalizer.json` next to them is applied when present.
pub fn load_dataset(settings: &Settings, config: &BatchConfig) -> Result<NoteDataset> {
    let listfile = settings.join_data("listfile.csv");
    let discretizer = Discretizer::new(settings.timestep, settings.period_length)
        .context("configuring discretizer")?;
    let mut reader = MortalityReader::new(
        settings.join_data("timeseries"),
        settings.join_data("notes"),
        &listfile,
        discretizer,
    )
    .with_context(|| format!("opening listfile {}", listfile.display()))?;

    let normalizer_path = settings.join_data("normalizer.json");
    if normalizer_path.exists() {
        let normalizer = Normalizer::load(&normalizer_path).context("loading normalizer state")?;
        reader = reader.with_normalizer(normalizer);
        info!(path = %normalizer_path.display(), "applying normalizer");
    }

    let records = reader::read_all(&reader).context("reading patient records")?;
    let dataset = NoteDataset::build(records, config).context("assembling note dataset")?;
    Ok(dataset)
}
