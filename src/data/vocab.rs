//! Token vocabulary with pretrained embedding weights.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use indexmap::IndexSet;
use ndarray::{Array2, Axis};
use thiserror::Error;
use tracing::info;

pub const PAD_TOKEN: &str = "<pad>";
pub const UNK_TOKEN: &str = "<unk>";
pub const SOS_TOKEN: &str = "<s>";
pub const EOS_TOKEN: &str = "</s>";

/// Tokens holding indices 0..=3 in every vocabulary.
pub const RESERVED_TOKENS: [&str; 4] = [PAD_TOKEN, UNK_TOKEN, SOS_TOKEN, EOS_TOKEN];

pub const PAD_INDEX: usize = 0;
pub const UNK_INDEX: usize = 1;

#[derive(Debug, Error)]
pub enum VocabError {
    #[error("reading embeddings {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: expected {expected} components, found {found}")]
    Dimension {
        path: PathBuf,
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("{path}:{line}: `{value}` is not a number")]
    Component {
        path: PathBuf,
        line: usize,
        value: String,
    },
}

/// Bidirectional token/index mapping. Insertion order is the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    tokens: IndexSet<String>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            tokens: RESERVED_TOKENS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `token`, or the `<unk>` index when absent.
    pub fn index(&self, token: &str) -> usize {
        self.tokens.get_index_of(token).unwrap_or(UNK_INDEX)
    }

    pub fn token(&self, index: usize) -> Option<&str> {
        self.tokens.get_index(index).map(String::as_str)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }

    /// Append `token` if unseen, returning its index.
    pub fn push(&mut self, token: &str) -> usize {
        match self.tokens.get_index_of(token) {
            Some(idx) => idx,
            None => self.tokens.insert_full(token.to_string()).0,
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Map tokens to indices, unknown tokens to `<unk>`.
    pub fn encode<'a, I>(&self, tokens: I) -> Vec<usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        tokens.into_iter().map(|t| self.index(t)).collect()
    }

    /// Build a vocabulary from a word2vec text file (`token v1 .. vN`).
    ///
    /// At most `vocab_size` tokens are read after the reserved ones; the
    /// returned weights have `vocab_size + 4` rows of `emb_size` columns.
    /// The `<unk>` row is the mean of all rows.
    pub fn from_embeddings(
        path: &Path,
        vocab_size: usize,
        emb_size: usize,
    ) -> Result<(Self, Array2<f32>), VocabError> {
        let file = File::open(path).map_err(|source| VocabError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut vocab = Self::new();
        let rows = vocab_size + RESERVED_TOKENS.len();
        let mut weights = Array2::<f32>::zeros((rows, emb_size));

        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            if vocab.len() >= rows {
                break;
            }
            let line = line.map_err(|source| VocabError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let mut parts = line.split_whitespace();
            let Some(token) = parts.next() else {
                continue;
            };
            if vocab.contains(token) {
                continue;
            }
            let vector = parts
                .map(|raw| {
                    raw.parse::<f32>().map_err(|_| VocabError::Component {
                        path: path.to_path_buf(),
                        line: line_no + 1,
                        value: raw.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            if vector.len() != emb_size {
                return Err(VocabError::Dimension {
                    path: path.to_path_buf(),
                    line: line_no + 1,
                    expected: emb_size,
                    found: vector.len(),
                });
            }
            let idx = vocab.push(token);
            weights
                .row_mut(idx)
                .assign(&ndarray::ArrayView1::from(&vector[..]));
        }

        if let Some(mean) = weights.mean_axis(Axis(0)) {
            weights.row_mut(UNK_INDEX).assign(&mean);
        }
        info!(path = %path.display(), tokens = vocab.len(), emb_size, "loaded embeddings");
        Ok((vocab, weights))
    }
}
