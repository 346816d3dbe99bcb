//! Clinical note batching and concept lexicon extraction.

pub mod cli;
pub mod config;
pub mod data;
pub mod logging;
pub mod nlp;
