//! Runtime configuration utilities for clinical-lexicon.

use std::{
    env,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::{data::batch::NotesMode, nlp::lexicon::FailurePolicy};

/// Application configuration resolved from `.env` and defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Root folder holding listfiles, time-series, notes and knowledge bases.
    pub data_dir: PathBuf,
    /// Root folder for emitted artefacts such as `lexicon.txt`.
    pub outputs_dir: PathBuf,
    /// Note shaping policy used when building datasets.
    pub notes_mode: NotesMode,
    /// Maximum tokens per flattened note (or per sentence in `doc` mode).
    pub max_words: usize,
    /// Maximum sentences kept per patient in `doc` mode.
    pub max_sentences: usize,
    /// Wrap labels as single-element sequences.
    pub batch_labels: bool,
    pub batch_size: usize,
    /// Hours of each stay considered by the reader.
    pub period_length: f64,
    /// Width in hours of one discretised time step.
    pub timestep: f64,
    /// What to do when annotating a text unit fails.
    pub failure_policy: FailurePolicy,
}

impl Settings {
    /// Load configuration from environment with reasonable defaults.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let settings = Self::from_lookup(|key| env::var(key).ok())?;
        std::fs::create_dir_all(&settings.outputs_dir).context("creating outputs dir")?;
        Ok(settings)
    }

    /// Resolve settings through `lookup`; unset keys take their defaults,
    /// malformed or out-of-range values are errors.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = lookup("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data"));
        let outputs_dir = lookup("OUTPUTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./outputs"));

        let settings = Self {
            data_dir,
            outputs_dir,
            notes_mode: parsed_or(&lookup, "NOTES_MODE", NotesMode::SentenceMax)?,
            max_words: parsed_or(&lookup, "MAX_WORDS", 10_000)?,
            max_sentences: parsed_or(&lookup, "MAX_SENTENCES", 500)?,
            batch_labels: parsed_or(&lookup, "BATCH_LABELS", true)?,
            batch_size: parsed_or(&lookup, "BATCH_SIZE", 64)?,
            period_length: parsed_or(&lookup, "PERIOD_LENGTH", 48.0)?,
            timestep: parsed_or(&lookup, "TIMESTEP", 1.0)?,
            failure_policy: parsed_or(&lookup, "FAILURE_POLICY", FailurePolicy::SkipAndCount)?,
        };

        if settings.batch_size == 0 {
            bail!("BATCH_SIZE must be at least 1");
        }
        if !(settings.timestep.is_finite() && settings.timestep > 0.0) {
            bail!("TIMESTEP must be a positive number of hours, got {}", settings.timestep);
        }
        if !(settings.period_length.is_finite() && settings.period_length > 0.0) {
            bail!(
                "PERIOD_LENGTH must be a positive number of hours, got {}",
                settings.period_length
            );
        }
        Ok(settings)
    }

    /// Convenience helper for derived path segments.
    pub fn join_data<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.data_dir.join(path)
    }

    /// Convenience helper for derived output path segments.
    pub fn join_output<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.outputs_dir.join(path)
    }
}

fn parsed_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("parsing {key}={raw:?}")),
        None => Ok(default),
    }
}
