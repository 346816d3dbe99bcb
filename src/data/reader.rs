//! Reading patient stays from listfile, time-series and note files.
//!
//! Layout expected by [`MortalityReader`]:
//!
//! ```text
//! <listfile>                      stay,y_true
//! <dataset_dir>/<stay>            Hours,<channel>,<channel>,...
//! <notes_dir>/<stay stem>.json    {"<doc id>": [["token", ...], ...]}
//! ```

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use ndarray::Array2;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::data::record::{PatientNotes, PatientRecord};

/// Errors raised while reading patient stays.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing csv {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("parsing json {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path}: row {row}, column {column}: `{value}` is not numeric")]
    Value {
        path: PathBuf,
        row: usize,
        column: usize,
        value: String,
    },
    #[error("example {index} out of range ({len} examples)")]
    OutOfRange { index: usize, len: usize },
    #[error("{name} must be a positive number of hours, got {value}")]
    Period { name: &'static str, value: f64 },
    #[error("normalizer covers {covered} channels but channel {channel} was requested")]
    Normalizer { covered: usize, channel: usize },
}

/// Source of patient records addressed by position.
pub trait RecordReader {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self, index: usize) -> Result<PatientRecord, ReaderError>;
}

/// Read every example of `reader` in order.
pub fn read_all(reader: &dyn RecordReader) -> Result<Vec<PatientRecord>, ReaderError> {
    let records = (0..reader.len())
        .map(|idx| reader.read(idx))
        .collect::<Result<Vec<_>, _>>()?;
    info!(count = records.len(), "read patient records");
    Ok(records)
}

/// One timestamped row of raw observations; `None` marks a missing value.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub hours: f64,
    pub values: Vec<Option<f32>>,
}

/// Bins irregular observations into a regular grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Discretizer {
    timestep: f64,
    period_length: f64,
}

impl Default for Discretizer {
    fn default() -> Self {
        Self {
            timestep: 1.0,
            period_length: 48.0,
        }
    }
}

impl Discretizer {
    /// `timestep` is the width in hours of one output row, `period_length`
    /// the hours of the stay covered. Both must be finite and positive.
    pub fn new(timestep: f64, period_length: f64) -> Result<Self, ReaderError> {
        if !(timestep.is_finite() && timestep > 0.0) {
            return Err(ReaderError::Period {
                name: "timestep",
                value: timestep,
            });
        }
        if !(period_length.is_finite() && period_length > 0.0) {
            return Err(ReaderError::Period {
                name: "period length",
                value: period_length,
            });
        }
        Ok(Self {
            timestep,
            period_length,
        })
    }

    pub fn timestep(&self) -> f64 {
        self.timestep
    }

    pub fn period_length(&self) -> f64 {
        self.period_length
    }

    pub fn steps(&self) -> usize {
        ((self.period_length / self.timestep).ceil() as usize).max(1)
    }

    /// Grid of shape `[steps, channels]`. Within a bin the latest value
    /// wins; empty cells repeat the previous value, zero before the first.
    pub fn transform(&self, observations: &[Observation], channels: usize) -> Array2<f32> {
        let steps = self.steps();
        let mut grid: Vec<Vec<Option<f32>>> = vec![vec![None; channels]; steps];

        let mut ordered: Vec<&Observation> = observations
            .iter()
            .filter(|obs| obs.hours >= 0.0 && obs.hours <= self.period_length)
            .collect();
        ordered.sort_by(|a, b| a.hours.total_cmp(&b.hours));

        for obs in ordered {
            let bin = ((obs.hours / self.timestep) as usize).min(steps - 1);
            for (channel, value) in obs.values.iter().enumerate().take(channels) {
                if value.is_some() {
                    grid[bin][channel] = *value;
                }
            }
        }

        let mut out = Array2::<f32>::zeros((steps, channels));
        let mut carry = vec![0.0f32; channels];
        for (step, row) in grid.iter().enumerate() {
            for (channel, cell) in row.iter().enumerate() {
                if let Some(value) = cell {
                    carry[channel] = *value;
                }
                out[[step, channel]] = carry[channel];
            }
        }
        out
    }
}

#[derive(Debug, Deserialize)]
struct NormalizerState {
    means: Vec<f32>,
    stds: Vec<f32>,
}

/// Per-channel standardisation with stored means and deviations.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalizer {
    means: Vec<f32>,
    stds: Vec<f32>,
    fields: Option<Vec<usize>>,
}

impl Normalizer {
    pub fn new(means: Vec<f32>, stds: Vec<f32>) -> Self {
        Self {
            means,
            stds,
            fields: None,
        }
    }

    /// Load `{"means": [...], "stds": [...]}` parameters.
    pub fn load(path: &Path) -> Result<Self, ReaderError> {
        let file = File::open(path).map_err(|source| ReaderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let state: NormalizerState =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| ReaderError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::new(state.means, state.stds))
    }

    /// Restrict standardisation to the given channels.
    pub fn with_fields(mut self, fields: Vec<usize>) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn transform(&self, mut features: Array2<f32>) -> Result<Array2<f32>, ReaderError> {
        let covered = self.means.len().min(self.stds.len());
        let fields: Vec<usize> = match &self.fields {
            Some(fields) => fields.clone(),
            None => (0..features.ncols()).collect(),
        };
        for channel in fields {
            if channel >= covered || channel >= features.ncols() {
                return Err(ReaderError::Normalizer { covered, channel });
            }
            let mean = self.means[channel];
            let std = if self.stds[channel] == 0.0 {
                1.0
            } else {
                self.stds[channel]
            };
            features
                .column_mut(channel)
                .mapv_inplace(|value| (value - mean) / std);
        }
        Ok(features)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ListEntry {
    stay: String,
    y_true: f32,
}

/// Reader for in-hospital mortality style stays with attached notes.
#[derive(Debug, Clone)]
pub struct MortalityReader {
    dataset_dir: PathBuf,
    notes_dir: PathBuf,
    entries: Vec<ListEntry>,
    discretizer: Discretizer,
    normalizer: Option<Normalizer>,
}

impl MortalityReader {
    pub fn new(
        dataset_dir: impl Into<PathBuf>,
        notes_dir: impl Into<PathBuf>,
        listfile: &Path,
        discretizer: Discretizer,
    ) -> Result<Self, ReaderError> {
        let csv_err = |source: csv::Error| ReaderError::Csv {
            path: listfile.to_path_buf(),
            source,
        };
        let mut reader = csv::Reader::from_path(listfile).map_err(csv_err)?;
        let entries = reader
            .deserialize()
            .collect::<Result<Vec<ListEntry>, _>>()
            .map_err(csv_err)?;
        info!(path = %listfile.display(), examples = entries.len(), "loaded listfile");
        Ok(Self {
            dataset_dir: dataset_dir.into(),
            notes_dir: notes_dir.into(),
            entries,
            discretizer,
            normalizer: None,
        })
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    fn read_timeseries(&self, stay: &str) -> Result<(Vec<Observation>, usize), ReaderError> {
        let path = self.dataset_dir.join(stay);
        let csv_err = |source: csv::Error| ReaderError::Csv {
            path: path.clone(),
            source,
        };
        let mut reader = csv::Reader::from_path(&path).map_err(csv_err)?;
        let channels = reader.headers().map_err(csv_err)?.len().saturating_sub(1);

        let mut observations = Vec::new();
        for (row, result) in reader.records().enumerate() {
            let record = result.map_err(csv_err)?;
            let mut fields = record.iter().map(str::trim);
            let hours_raw = fields.next().unwrap_or_default();
            let hours = parse_number(hours_raw, &path, row, 0)?.unwrap_or(f64::NAN);
            if hours.is_nan() {
                debug!(path = %path.display(), row, "skipping row without timestamp");
                continue;
            }
            let values = fields
                .enumerate()
                .map(|(idx, raw)| {
                    parse_number(raw, &path, row, idx + 1).map(|v| v.map(|v| v as f32))
                })
                .collect::<Result<Vec<_>, _>>()?;
            observations.push(Observation { hours, values });
        }
        Ok((observations, channels))
    }

    fn read_notes(&self, stay: &str) -> Result<PatientNotes, ReaderError> {
        let stem = Path::new(stay)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(stay);
        let path = self.notes_dir.join(format!("{stem}.json"));
        if !path.exists() {
            debug!(path = %path.display(), "no notes for stay");
            return Ok(PatientNotes::new());
        }
        let file = File::open(&path).map_err(|source| ReaderError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| ReaderError::Json {
            path: path.clone(),
            source,
        })
    }
}

impl RecordReader for MortalityReader {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn read(&self, index: usize) -> Result<PatientRecord, ReaderError> {
        let entry = self.entries.get(index).ok_or(ReaderError::OutOfRange {
            index,
            len: self.entries.len(),
        })?;
        let (observations, channels) = self.read_timeseries(&entry.stay)?;
        let mut features = self.discretizer.transform(&observations, channels);
        if let Some(normalizer) = &self.normalizer {
            features = normalizer.transform(features)?;
        }
        let notes = self.read_notes(&entry.stay)?;
        Ok(PatientRecord::new(
            entry.stay.clone(),
            features,
            notes,
            entry.y_true,
        ))
    }
}

fn parse_number(raw: &str, path: &Path, row: usize, column: usize) -> Result<Option<f64>, ReaderError> {
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| ReaderError::Value {
            path: path.to_path_buf(),
            row,
            column,
            value: raw.to_string(),
        })
}
