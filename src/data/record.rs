//! Per-patient inputs shared by the reader and the batch builder.

use std::collections::BTreeMap;

use ndarray::Array2;

/// One sentence as an ordered sequence of word tokens.
pub type Sentence = Vec<String>;

/// Notes keyed by document identifier. `BTreeMap` keeps documents in
/// sorted identifier order, which is the order notes are flattened in.
pub type PatientNotes = BTreeMap<String, Vec<Sentence>>;

/// A patient stay as produced by a [`RecordReader`](crate::data::reader::RecordReader).
#[derive(Debug, Clone, PartialEq)]
pub struct PatientRecord {
    /// Stay identifier, usually the time-series file name.
    pub name: String,
    /// Observations shaped `[time steps, channels]`.
    pub features: Array2<f32>,
    pub notes: PatientNotes,
    /// Binary outcome (0.0 or 1.0).
    pub label: f32,
}

impl PatientRecord {
    pub fn new(name: impl Into<String>, features: Array2<f32>, notes: PatientNotes, label: f32) -> Self {
        Self {
            name: name.into(),
            features,
            notes,
            label,
        }
    }

    /// Tokens of every sentence of every document, documents in sorted order.
    pub fn flattened_tokens(&self) -> Vec<&str> {
        self.notes
            .values()
            .flat_map(|sentences| sentences.iter())
            .flat_map(|sentence| sentence.iter().map(String::as_str))
            .collect()
    }

    pub fn time_steps(&self) -> usize {
        self.features.nrows()
    }
}
