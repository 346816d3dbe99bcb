//! Concept lexicon accumulation and flat-file emission.
//!
//! Every note text unit is annotated, each entity contributes the aliases
//! of its best-scoring concept, and the union of aliases per concept is
//! written as `concept_id alias alias ...` lines.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    data::batch::Batch,
    nlp::linker::{Annotator, KnowledgeBase, LinkError},
};

#[derive(Debug, Error)]
pub enum LexiconError {
    #[error("annotating text unit {unit}: {source}")]
    Annotation {
        unit: usize,
        #[source]
        source: LinkError,
    },
    #[error("writing lexicon {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown failure policy `{0}` (expected `skip-and-count` or `fail-fast`)")]
    UnknownPolicy(String),
}

/// Reaction to an annotator error on a single text unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Log, count and continue with the next text unit.
    #[default]
    #[value(alias = "skip")]
    #[serde(alias = "skip")]
    SkipAndCount,
    /// Abort the run; nothing is written.
    #[value(alias = "fail")]
    #[serde(alias = "fail")]
    FailFast,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SkipAndCount => f.write_str("skip-and-count"),
            Self::FailFast => f.write_str("fail-fast"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = LexiconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "skip" | "skip-and-count" => Ok(Self::SkipAndCount),
            "fail" | "fail-fast" => Ok(Self::FailFast),
            other => Err(LexiconError::UnknownPolicy(other.to_string())),
        }
    }
}

/// Rewrite an alias as a single field: trimmed, inner whitespace runs
/// replaced by `_`. Blank aliases yield `None`.
pub fn normalize_alias(alias: &str) -> Option<String> {
    let joined = alias.split_whitespace().collect::<Vec<_>>().join("_");
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

/// Concept identifier to accumulated alias set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lexicon {
    entries: BTreeMap<String, BTreeSet<String>>,
}

impl Lexicon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union `aliases` into the entry for `concept_id`, creating it if needed.
    pub fn insert<I, S>(&mut self, concept_id: &str, aliases: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entry = self.entries.entry(concept_id.to_string()).or_default();
        entry.extend(aliases.into_iter().filter_map(|a| normalize_alias(a.as_ref())));
    }

    /// Union another lexicon into this one. Order of merges does not matter.
    pub fn merge(&mut self, other: Lexicon) {
        for (concept_id, aliases) in other.entries {
            self.entries.entry(concept_id).or_default().extend(aliases);
        }
    }

    pub fn get(&self, concept_id: &str) -> Option<&BTreeSet<String>> {
        self.entries.get(concept_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write one line per concept, sorted by identifier.
    pub fn write_lines<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        for (concept_id, aliases) in &self.entries {
            out.write_all(concept_id.as_bytes())?;
            for alias in aliases {
                write!(out, " {alias}")?;
            }
            out.write_all(b"\n")?;
        }
        out.flush()
    }

    /// Write the whole lexicon to `path`.
    ///
    /// Lines go to a temporary file beside `path` that is renamed over it
    /// once complete, so a failed write never leaves a partial lexicon.
    pub fn write_to(&self, path: &Path) -> Result<(), LexiconError> {
        let write_err = |source: std::io::Error| LexiconError::Write {
            path: path.to_path_buf(),
            source,
        };
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut staged = NamedTempFile::new_in(dir).map_err(write_err)?;
        self.write_lines(BufWriter::new(staged.as_file_mut()))
            .map_err(write_err)?;
        staged.persist(path).map_err(|err| write_err(err.error))?;
        info!(path = %path.display(), concepts = self.len(), "wrote lexicon");
        Ok(())
    }
}

/// Counters gathered over one extraction run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    pub text_units: usize,
    pub entities: usize,
    /// Entities without any linked concept.
    pub unlinked: usize,
    /// Text units whose annotation failed and were skipped.
    pub failures: usize,
}

/// Drives an [`Annotator`] and [`KnowledgeBase`] over note text.
pub struct LexiconExtractor<'a> {
    annotator: &'a dyn Annotator,
    kb: &'a dyn KnowledgeBase,
    policy: FailurePolicy,
}

impl<'a> LexiconExtractor<'a> {
    pub fn new(annotator: &'a dyn Annotator, kb: &'a dyn KnowledgeBase) -> Self {
        Self {
            annotator,
            kb,
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Accumulate a lexicon from every note of every batch.
    pub fn extract<I>(&self, batches: I) -> Result<(Lexicon, ExtractionReport), LexiconError>
    where
        I: IntoIterator<Item = Batch>,
    {
        let texts = batches.into_iter().flat_map(|batch| {
            batch
                .notes
                .into_iter()
                .map(|note| note.text_unit().into_owned())
        });
        self.extract_texts(texts)
    }

    /// Accumulate a lexicon from plain text units.
    pub fn extract_texts<I, S>(&self, texts: I) -> Result<(Lexicon, ExtractionReport), LexiconError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut lexicon = Lexicon::new();
        let mut report = ExtractionReport::default();
        for (unit, text) in texts.into_iter().enumerate() {
            report.text_units += 1;
            let entities = match self.annotator.annotate(text.as_ref()) {
                Ok(entities) => entities,
                Err(source) => match self.policy {
                    FailurePolicy::FailFast => {
                        return Err(LexiconError::Annotation { unit, source })
                    }
                    FailurePolicy::SkipAndCount => {
                        warn!(unit, error = %source, "skipping text unit");
                        report.failures += 1;
                        continue;
                    }
                },
            };
            for entity in entities {
                report.entities += 1;
                let Some(best) = entity.best() else {
                    report.unlinked += 1;
                    continue;
                };
                debug!(mention = %entity.text, concept = %best.concept_id, score = best.score, "linked");
                lexicon.insert(&best.concept_id, self.kb.aliases(&best.concept_id));
            }
        }
        info!(
            text_units = report.text_units,
            entities = report.entities,
            concepts = lexicon.len(),
            failures = report.failures,
            "extracted lexicon"
        );
        Ok((lexicon, report))
    }

    /// Extract from `batches` and write the result to `path` once at the end.
    pub fn run<I>(&self, batches: I, path: &Path) -> Result<ExtractionReport, LexiconError>
    where
        I: IntoIterator<Item = Batch>,
    {
        let (lexicon, report) = self.extract(batches)?;
        lexicon.write_to(path)?;
        if report.failures > 0 {
            warn!(failures = report.failures, "some text units could not be annotated");
        }
        Ok(report)
    }
}
