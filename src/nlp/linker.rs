//! Entity recognition and concept linking seams, a dictionary-backed
//! implementation driven by a JSON Lines knowledge base, and inline
//! rendering of recognised entities.

use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("reading knowledge base {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: {source}")]
    Json {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("annotation failed: {0}")]
    Annotation(String),
}

/// A knowledge-base concept a mention may refer to.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedConcept {
    pub concept_id: String,
    pub score: f64,
}

/// A recognised span with candidate concepts ordered by descending score.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub linked_concepts: Vec<LinkedConcept>,
}

impl Entity {
    /// The highest-scoring concept, if the mention was linked at all.
    pub fn best(&self) -> Option<&LinkedConcept> {
        self.linked_concepts.first()
    }
}

/// Finds entity mentions in text and links them to concepts.
pub trait Annotator: Send + Sync {
    fn annotate(&self, text: &str) -> Result<Vec<Entity>, LinkError>;
}

/// Alias lookup for linked concepts.
pub trait KnowledgeBase: Send + Sync {
    fn aliases(&self, concept_id: &str) -> Vec<String>;
}

/// One line of the knowledge base file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptRecord {
    pub concept_id: String,
    pub canonical_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

static WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{L}\p{N}][\p{L}\p{N}'\-]*").expect("valid regex"));

/// Lowercased word tokens of `text` with their byte offsets.
fn words(text: &str) -> Vec<(usize, usize, String)> {
    WORD.find_iter(text)
        .map(|m| (m.start(), m.end(), m.as_str().to_lowercase()))
        .collect()
}

fn surface_key(text: &str) -> String {
    words(text)
        .into_iter()
        .map(|(_, _, w)| w)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Longest-match dictionary annotator over canonical names and aliases.
#[derive(Debug, Clone, Default)]
pub struct DictionaryLinker {
    concepts: Vec<ConceptRecord>,
    by_id: HashMap<String, usize>,
    /// Normalised surface form to concept positions.
    surfaces: HashMap<String, Vec<usize>>,
    max_words: usize,
}

impl DictionaryLinker {
    pub fn from_concepts<I>(concepts: I) -> Self
    where
        I: IntoIterator<Item = ConceptRecord>,
    {
        let mut linker = Self::default();
        for concept in concepts {
            linker.add(concept);
        }
        linker
    }

    /// Load a JSON Lines knowledge base, one [`ConceptRecord`] per line.
    pub fn load(path: &Path) -> Result<Self, LinkError> {
        let file = File::open(path).map_err(|source| LinkError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut linker = Self::default();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| LinkError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let record: ConceptRecord =
                serde_json::from_str(&line).map_err(|source| LinkError::Json {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    source,
                })?;
            linker.add(record);
        }
        info!(
            path = %path.display(),
            concepts = linker.concepts.len(),
            surfaces = linker.surfaces.len(),
            "loaded knowledge base"
        );
        Ok(linker)
    }

    fn add(&mut self, concept: ConceptRecord) {
        if self.by_id.contains_key(&concept.concept_id) {
            return;
        }
        let position = self.concepts.len();
        let forms = std::iter::once(&concept.canonical_name).chain(concept.aliases.iter());
        for form in forms {
            let key = surface_key(form);
            if key.is_empty() {
                continue;
            }
            self.max_words = self.max_words.max(key.split(' ').count());
            let slot = self.surfaces.entry(key).or_default();
            if !slot.contains(&position) {
                slot.push(position);
            }
        }
        self.by_id.insert(concept.concept_id.clone(), position);
        self.concepts.push(concept);
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    fn rank(&self, mention: &str, candidates: &[usize]) -> Vec<LinkedConcept> {
        let mut linked: Vec<LinkedConcept> = candidates
            .iter()
            .map(|&pos| {
                let concept = &self.concepts[pos];
                LinkedConcept {
                    concept_id: concept.concept_id.clone(),
                    score: jaro_winkler(mention, &concept.canonical_name.to_lowercase()),
                }
            })
            .collect();
        linked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.concept_id.cmp(&b.concept_id))
        });
        linked
    }
}

impl Annotator for DictionaryLinker {
    fn annotate(&self, text: &str) -> Result<Vec<Entity>, LinkError> {
        let tokens = words(text);
        let mut entities = Vec::new();
        let mut cursor = 0;
        while cursor < tokens.len() {
            let longest = self.max_words.min(tokens.len() - cursor);
            let found = (1..=longest).rev().find_map(|width| {
                let key = tokens[cursor..cursor + width]
                    .iter()
                    .map(|(_, _, w)| w.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                self.surfaces
                    .get(&key)
                    .map(|candidates| (width, key, candidates))
            });
            match found {
                Some((width, key, candidates)) => {
                    let start = tokens[cursor].0;
                    let end = tokens[cursor + width - 1].1;
                    entities.push(Entity {
                        start,
                        end,
                        text: text[start..end].to_string(),
                        linked_concepts: self.rank(&key, candidates),
                    });
                    cursor += width;
                }
                None => cursor += 1,
            }
        }
        Ok(entities)
    }
}

impl KnowledgeBase for DictionaryLinker {
    fn aliases(&self, concept_id: &str) -> Vec<String> {
        self.by_id
            .get(concept_id)
            .map(|&pos| self.concepts[pos].aliases.clone())
            .unwrap_or_default()
    }
}

/// Render `text` with every entity wrapped as `[mention|concept_id]`, or
/// `[mention]` when it has no linked concept.
///
/// Entities are placed in offset order. One that overlaps an already
/// rendered span, or whose offsets do not fall on character boundaries of
/// `text`, is left out.
pub fn highlight(text: &str, entities: &[Entity]) -> String {
    let mut ordered: Vec<&Entity> = entities.iter().collect();
    ordered.sort_by_key(|e| (e.start, std::cmp::Reverse(e.end)));

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for entity in ordered {
        if entity.start < cursor || entity.start >= entity.end {
            continue;
        }
        let Some(mention) = text.get(entity.start..entity.end) else {
            continue;
        };
        out.push_str(&text[cursor..entity.start]);
        out.push('[');
        out.push_str(mention);
        if let Some(best) = entity.best() {
            out.push('|');
            out.push_str(&best.concept_id);
        }
        out.push(']');
        cursor = entity.end;
    }
    out.push_str(&text[cursor..]);
    out
}
