//! Batch builder turning patient records into a fixed in-memory dataset.
//!
//! Notes are shaped according to a [`NotesMode`]:
//!
//! - `sentence`: every token of every document flattened into one string;
//!   patients above `max_words` are dropped.
//! - `sentence-max`: same flattening, but long notes are cut to
//!   `max_words` tokens instead of dropped.
//! - `doc`: a list of sentences, each cut to `max_words` tokens, the list
//!   cut to `max_sentences`.
//!
//! Patients left without any note text are dropped in every mode.

use std::{borrow::Cow, fmt, str::FromStr};

use clap::ValueEnum;
use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::data::record::{PatientRecord, Sentence};

/// Errors raised while configuring or assembling a dataset.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("unknown notes mode `{0}` (expected `sentence`, `sentence-max` or `doc`)")]
    UnknownMode(String),
    #[error("patient {name} has feature shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("batch size must be at least 1")]
    ZeroBatchSize,
}

/// Output shape of patient notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum NotesMode {
    /// Single token string per patient; oversized notes drop the patient.
    Sentence,
    /// Single token string per patient, cut to the word limit.
    SentenceMax,
    /// Sentences per patient, each cut to the word limit.
    Doc,
}

impl NotesMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sentence => "sentence",
            Self::SentenceMax => "sentence-max",
            Self::Doc => "doc",
        }
    }
}

impl fmt::Display for NotesMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotesMode {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "sentence" => Ok(Self::Sentence),
            "sentence-max" => Ok(Self::SentenceMax),
            "doc" => Ok(Self::Doc),
            other => Err(BatchError::UnknownMode(other.to_string())),
        }
    }
}

/// Parameters of the batch builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    pub mode: NotesMode,
    /// Word limit of a flattened note, or of one sentence in `doc` mode.
    pub max_words: usize,
    /// Sentence limit per patient in `doc` mode.
    pub max_sentences: usize,
    /// Wrap each label as a one-element sequence.
    pub batch_labels: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            mode: NotesMode::Sentence,
            max_words: 25,
            max_sentences: 500,
            batch_labels: false,
        }
    }
}

impl BatchConfig {
    pub fn new(mode: NotesMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn max_words(mut self, max_words: usize) -> Self {
        self.max_words = max_words;
        self
    }

    pub fn max_sentences(mut self, max_sentences: usize) -> Self {
        self.max_sentences = max_sentences;
        self
    }

    pub fn batch_labels(mut self, batch_labels: bool) -> Self {
        self.batch_labels = batch_labels;
        self
    }
}

/// Note text of one retained patient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteRepr {
    /// Space-joined tokens (`sentence`, `sentence-max`).
    Text(String),
    /// Sentences of tokens (`doc`).
    Sentences(Vec<Sentence>),
}

impl NoteRepr {
    /// The note as a single text unit for annotation.
    pub fn text_unit(&self) -> Cow<'_, str> {
        match self {
            Self::Text(text) => Cow::Borrowed(text.as_str()),
            Self::Sentences(sentences) => Cow::Owned(
                sentences
                    .iter()
                    .map(|sentence| sentence.join(" "))
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
        }
    }

    pub fn token_count(&self) -> usize {
        match self {
            Self::Text(text) => text.split_whitespace().count(),
            Self::Sentences(sentences) => sentences.iter().map(Vec::len).sum(),
        }
    }
}

/// Outcome label, scalar or wrapped depending on [`BatchConfig::batch_labels`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Label {
    Scalar(f32),
    Wrapped([f32; 1]),
}

impl Label {
    fn new(value: f32, wrapped: bool) -> Self {
        if wrapped {
            Self::Wrapped([value])
        } else {
            Self::Scalar(value)
        }
    }

    pub fn value(&self) -> f32 {
        match self {
            Self::Scalar(v) => *v,
            Self::Wrapped([v]) => *v,
        }
    }
}

/// Shape the notes of one patient, or `None` when the patient is dropped.
pub fn shape_notes(record: &PatientRecord, config: &BatchConfig) -> Option<NoteRepr> {
    match config.mode {
        NotesMode::Sentence => {
            let tokens = record.flattened_tokens();
            if tokens.is_empty() || tokens.len() > config.max_words {
                return None;
            }
            Some(NoteRepr::Text(tokens.join(" ")))
        }
        NotesMode::SentenceMax => {
            let tokens = record.flattened_tokens();
            if tokens.is_empty() {
                return None;
            }
            let kept = tokens.len().min(config.max_words);
            Some(NoteRepr::Text(tokens[..kept].join(" ")))
        }
        NotesMode::Doc => {
            let mut sentences: Vec<Sentence> = record
                .notes
                .values()
                .flat_map(|doc| doc.iter())
                .map(|sentence| sentence.iter().take(config.max_words).cloned().collect())
                .filter(|sentence: &Sentence| !sentence.is_empty())
                .collect();
            sentences.truncate(config.max_sentences);
            if sentences.is_empty() {
                None
            } else {
                Some(NoteRepr::Sentences(sentences))
            }
        }
    }
}

/// Entry `i` of a [`NoteDataset`].
#[derive(Debug, Clone)]
pub struct DatasetItem<'a> {
    pub features: ArrayView2<'a, f32>,
    pub notes: &'a NoteRepr,
    pub label: Label,
}

/// Index-addressable dataset of (features, notes, label) triples.
#[derive(Debug, Clone)]
pub struct NoteDataset {
    features: Array3<f32>,
    notes: Vec<NoteRepr>,
    labels: Vec<f32>,
    names: Vec<String>,
    batch_labels: bool,
}

impl NoteDataset {
    /// Filter and shape `records`, packing retained feature matrices into
    /// one `[patients, time steps, channels]` array.
    ///
    /// Every retained patient must share the feature shape of the first
    /// retained patient.
    pub fn build<I>(records: I, config: &BatchConfig) -> Result<Self, BatchError>
    where
        I: IntoIterator<Item = PatientRecord>,
    {
        let mut kept = Vec::new();
        let mut dropped = 0usize;
        for record in records {
            match shape_notes(&record, config) {
                Some(notes) => kept.push((record, notes)),
                None => {
                    debug!(patient = %record.name, mode = %config.mode, "dropping patient");
                    dropped += 1;
                }
            }
        }

        let expected = kept
            .first()
            .map(|(record, _)| record.features.dim())
            .unwrap_or((0, 0));
        for (record, _) in &kept {
            let found = record.features.dim();
            if found != expected {
                return Err(BatchError::ShapeMismatch {
                    name: record.name.clone(),
                    expected,
                    found,
                });
            }
        }

        let (time_steps, channels) = expected;
        let mut features = Array3::<f32>::zeros((kept.len(), time_steps, channels));
        let mut notes = Vec::with_capacity(kept.len());
        let mut labels = Vec::with_capacity(kept.len());
        let mut names = Vec::with_capacity(kept.len());
        for (idx, (record, repr)) in kept.into_iter().enumerate() {
            features.slice_mut(s![idx, .., ..]).assign(&record.features);
            notes.push(repr);
            labels.push(record.label);
            names.push(record.name);
        }

        info!(
            mode = %config.mode,
            kept = names.len(),
            dropped,
            time_steps,
            "built note dataset"
        );
        Ok(Self {
            features,
            notes,
            labels,
            names,
            batch_labels: config.batch_labels,
        })
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<DatasetItem<'_>> {
        let notes = self.notes.get(idx)?;
        Some(DatasetItem {
            features: self.features.index_axis(Axis(0), idx),
            notes,
            label: Label::new(self.labels[idx], self.batch_labels),
        })
    }

    /// Time steps per patient, taken from the first retained patient.
    pub fn time_steps(&self) -> usize {
        self.features.dim().1
    }

    pub fn channels(&self) -> usize {
        self.features.dim().2
    }

    pub fn features(&self) -> &Array3<f32> {
        &self.features
    }

    pub fn notes(&self) -> &[NoteRepr] {
        &self.notes
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Labels repeated over every time step, shaped `[patients, time steps]`.
    pub fn extend_labels(&self) -> Array2<f32> {
        Array2::from_shape_fn((self.len(), self.time_steps()), |(i, _)| self.labels[i])
    }

    /// Iterate over the dataset in batches of at most `batch_size` entries,
    /// optionally in shuffled order.
    pub fn batches<R>(
        &self,
        batch_size: usize,
        shuffle: bool,
        rng: &mut R,
    ) -> Result<Batches<'_>, BatchError>
    where
        R: Rng + ?Sized,
    {
        if batch_size == 0 {
            return Err(BatchError::ZeroBatchSize);
        }
        let mut order: Vec<usize> = (0..self.len()).collect();
        if shuffle {
            order.shuffle(rng);
        }
        Ok(Batches {
            dataset: self,
            order,
            batch_size,
            cursor: 0,
        })
    }
}

/// A group of dataset entries stacked along the first axis.
#[derive(Debug, Clone)]
pub struct Batch {
    pub features: Array3<f32>,
    pub notes: Vec<NoteRepr>,
    pub labels: Vec<Label>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

/// Iterator returned by [`NoteDataset::batches`].
#[derive(Debug)]
pub struct Batches<'a> {
    dataset: &'a NoteDataset,
    order: Vec<usize>,
    batch_size: usize,
    cursor: usize,
}

impl Iterator for Batches<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let indices = &self.order[self.cursor..end];
        self.cursor = end;

        let dataset = self.dataset;
        Some(Batch {
            features: dataset.features.select(Axis(0), indices),
            notes: indices.iter().map(|&i| dataset.notes[i].clone()).collect(),
            labels: indices
                .iter()
                .map(|&i| Label::new(dataset.labels[i], dataset.batch_labels))
                .collect(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.order.len() - self.cursor;
        let batches = remaining.div_ceil(self.batch_size);
        (batches, Some(batches))
    }
}
