//! Command-line interface wiring for clinical-lexicon.

use anyhow::Result;
use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::{
    config::Settings,
    data::{BatchConfig, NotesMode},
};

pub mod annotate;
pub mod build;
pub mod lexicon;
pub mod vocab;

/// Top-level CLI definition.
#[derive(Debug, Parser)]
#[command(author, version, about = "Clinical note batching and synonym lexicon builder", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Parse CLI arguments from the environment.
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Dispatch the selected sub-command.
    pub async fn dispatch(self, settings: Settings) -> Result<()> {
        match self.command {
            Commands::Build(args) => build::run(args, settings).await,
            Commands::Lexicon(args) => lexicon::run(args, settings).await,
            Commands::Vocab(args) => vocab::run(args, settings).await,
            Commands::Annotate(args) => annotate::run(args, settings).await,
        }
    }
}

/// Supported sub-commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build the note dataset and report what was kept.
    Build(build::Args),
    /// Link note entities to concepts and write `lexicon.txt`.
    Lexicon(lexicon::Args),
    /// Load word embeddings and report the vocabulary.
    Vocab(vocab::Args),
    /// Print notes with recognised entities marked inline.
    Annotate(annotate::Args),
}

/// Note shaping flags shared by dataset-building commands.
#[derive(Debug, Clone, ClapArgs)]
pub struct BatchArgs {
    /// Note shaping mode; defaults to `NOTES_MODE`.
    #[arg(long, value_enum)]
    pub mode: Option<NotesMode>,
    /// Word limit per note (or per sentence in `doc` mode).
    #[arg(long)]
    pub max_words: Option<usize>,
    /// Sentence limit per patient in `doc` mode.
    #[arg(long)]
    pub max_sentences: Option<usize>,
}

impl BatchArgs {
    /// Resolve flags against configured defaults.
    pub fn resolve(&self, settings: &Settings) -> BatchConfig {
        BatchConfig::new(self.mode.unwrap_or(settings.notes_mode))
            .max_words(self.max_words.unwrap_or(settings.max_words))
            .max_sentences(self.max_sentences.unwrap_or(settings.max_sentences))
            .batch_labels(settings.batch_labels)
    }
}
