use std::collections::HashMap;

use clinical_lexicon::{
    data::{batch::Batch, BatchConfig, NoteDataset, NoteRepr, NotesMode, PatientRecord},
    nlp::{
        lexicon::{FailurePolicy, Lexicon, LexiconError, LexiconExtractor},
        linker::{Annotator, Entity, KnowledgeBase, LinkError, LinkedConcept},
    },
};
use ndarray::{Array2, Array3};
use rand::{rngs::StdRng, SeedableRng};

/// Annotator answering from a fixed text -> entities table.
#[derive(Default)]
struct FakeLinker {
    entities: HashMap<String, Vec<Entity>>,
    aliases: HashMap<String, Vec<String>>,
}

impl FakeLinker {
    fn entity(&mut self, text: &str, concepts: &[(&str, f64)]) -> &mut Self {
        self.entities.entry(text.to_string()).or_default().push(Entity {
            start: 0,
            end: text.len(),
            text: text.to_string(),
            linked_concepts: concepts
                .iter()
                .map(|(id, score)| LinkedConcept {
                    concept_id: id.to_string(),
                    score: *score,
                })
                .collect(),
        });
        self
    }

    fn with_aliases(&mut self, concept: &str, aliases: &[&str]) -> &mut Self {
        self.aliases.insert(
            concept.to_string(),
            aliases.iter().map(|a| a.to_string()).collect(),
        );
        self
    }
}

impl Annotator for FakeLinker {
    fn annotate(&self, text: &str) -> Result<Vec<Entity>, LinkError> {
        if text.contains("<garbled>") {
            return Err(LinkError::Annotation("unparseable text".into()));
        }
        Ok(self.entities.get(text).cloned().unwrap_or_default())
    }
}

impl KnowledgeBase for FakeLinker {
    fn aliases(&self, concept_id: &str) -> Vec<String> {
        self.aliases.get(concept_id).cloned().unwrap_or_default()
    }
}

fn text_batch(texts: &[&str]) -> Batch {
    Batch {
        features: Array3::zeros((texts.len(), 1, 1)),
        notes: texts.iter().map(|t| NoteRepr::Text(t.to_string())).collect(),
        labels: Vec::new(),
    }
}

fn headache_linker() -> FakeLinker {
    let mut linker = FakeLinker::default();
    linker
        .entity("severe headache", &[("C0018681", 0.9), ("C0018682", 0.3)])
        .entity("head pain again", &[("C0018681", 0.8)])
        .with_aliases("C0018681", &["headache", "cephalgia"])
        .with_aliases("C0018682", &["should", "not", "appear"]);
    linker
}

#[test]
fn only_the_best_concept_is_merged() {
    let linker = headache_linker();
    let (lexicon, report) = LexiconExtractor::new(&linker, &linker)
        .extract(vec![text_batch(&["severe headache"])])
        .unwrap();
    assert_eq!(lexicon.len(), 1);
    assert!(lexicon.get("C0018682").is_none());
    let aliases: Vec<_> = lexicon.get("C0018681").unwrap().iter().cloned().collect();
    assert_eq!(aliases, vec!["cephalgia", "headache"]);
    assert_eq!(report.entities, 1);
}

#[test]
fn aliases_from_separate_text_units_are_unioned() {
    let mut linker = FakeLinker::default();
    linker
        .entity("first", &[("C1", 1.0)])
        .entity("second", &[("C1", 1.0)]);
    linker.with_aliases("C1", &["a", "b"]);
    let extractor = LexiconExtractor::new(&linker, &linker);
    let (first, _) = extractor.extract_texts(["first"]).unwrap();

    linker.with_aliases("C1", &["b", "c", "a"]);
    let extractor = LexiconExtractor::new(&linker, &linker);
    let (second, _) = extractor.extract_texts(["second"]).unwrap();

    let mut merged = first.clone();
    merged.merge(second.clone());
    let mut reversed = second;
    reversed.merge(first);
    assert_eq!(merged, reversed);
    let aliases: Vec<_> = merged.get("C1").unwrap().iter().cloned().collect();
    assert_eq!(aliases, vec!["a", "b", "c"]);
}

#[test]
fn entities_without_links_are_skipped() {
    let mut linker = FakeLinker::default();
    linker.entity("mystery", &[]);
    let (lexicon, report) = LexiconExtractor::new(&linker, &linker)
        .extract_texts(["mystery"])
        .unwrap();
    assert!(lexicon.is_empty());
    assert_eq!(report.unlinked, 1);
}

#[test]
fn multi_word_aliases_become_single_fields() {
    let mut lexicon = Lexicon::new();
    lexicon.insert("C0018681", ["head pain", "  pain   in the head ", "", "headache"]);
    let mut out = Vec::new();
    lexicon.write_lines(&mut out).unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "C0018681 head_pain headache pain_in_the_head\n"
    );
}

#[test]
fn failures_are_counted_when_skipping() {
    let linker = headache_linker();
    let (lexicon, report) = LexiconExtractor::new(&linker, &linker)
        .with_policy(FailurePolicy::SkipAndCount)
        .extract(vec![
            text_batch(&["<garbled>", "severe headache"]),
            text_batch(&["head pain again"]),
        ])
        .unwrap();
    assert_eq!(report.text_units, 3);
    assert_eq!(report.failures, 1);
    assert!(lexicon.get("C0018681").is_some());
}

#[test]
fn fail_fast_aborts_without_writing() {
    let linker = headache_linker();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lexicon.txt");
    let err = LexiconExtractor::new(&linker, &linker)
        .with_policy(FailurePolicy::FailFast)
        .run(vec![text_batch(&["severe headache", "<garbled>"])], &path)
        .unwrap_err();
    assert!(matches!(err, LexiconError::Annotation { unit: 1, .. }));
    assert!(!path.exists());
}

#[test]
fn rerunning_produces_identical_file() {
    let linker = headache_linker();
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.txt");
    let second = dir.path().join("second.txt");
    let batches = || {
        vec![
            text_batch(&["severe headache"]),
            text_batch(&["head pain again", "nothing here"]),
        ]
    };
    let extractor = LexiconExtractor::new(&linker, &linker);
    extractor.run(batches(), &first).unwrap();
    extractor.run(batches(), &second).unwrap();
    let a = std::fs::read_to_string(&first).unwrap();
    let b = std::fs::read_to_string(&second).unwrap();
    assert_eq!(a, b);
    assert_eq!(a, "C0018681 cephalgia headache\n");
}

#[test]
fn write_to_an_unwritable_destination_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("lexicon.txt");
    let mut lexicon = Lexicon::new();
    lexicon.insert("C1", ["a"]);
    assert!(matches!(
        lexicon.write_to(&path),
        Err(LexiconError::Write { .. })
    ));
}

#[test]
fn rewriting_replaces_the_previous_lexicon() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lexicon.txt");
    std::fs::write(&path, "C0000001 stale alias list that is much longer\n").unwrap();

    let mut lexicon = Lexicon::new();
    lexicon.insert("C1", ["a"]);
    lexicon.write_to(&path).unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "C1 a\n");
    let names: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(names, vec![std::ffi::OsString::from("lexicon.txt")]);
}

#[test]
fn failed_write_leaves_no_partial_file() {
    let dir = tempfile::tempdir().unwrap();
    // A directory in the way makes the final rename fail after the lines
    // have been written.
    let path = dir.path().join("lexicon.txt");
    std::fs::create_dir(&path).unwrap();

    let mut lexicon = Lexicon::new();
    lexicon.insert("C1", ["a", "b"]);
    assert!(matches!(
        lexicon.write_to(&path),
        Err(LexiconError::Write { .. })
    ));
    assert!(path.is_dir());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn failure_policy_accepts_short_spellings() {
    use clap::ValueEnum;

    for (raw, expected) in [
        ("skip", FailurePolicy::SkipAndCount),
        ("skip-and-count", FailurePolicy::SkipAndCount),
        ("fail", FailurePolicy::FailFast),
        ("fail-fast", FailurePolicy::FailFast),
    ] {
        assert_eq!(<FailurePolicy as ValueEnum>::from_str(raw, false).unwrap(), expected);
        assert_eq!(raw.parse::<FailurePolicy>().unwrap(), expected);
    }
    assert!("abort".parse::<FailurePolicy>().is_err());
}

#[test]
fn dataset_batches_feed_the_extractor() {
    let notes = [("d".to_string(), vec![vec!["severe".to_string(), "headache".to_string()]])]
        .into_iter()
        .collect();
    let record = PatientRecord::new("p", Array2::zeros((2, 1)), notes, 1.0);
    let dataset =
        NoteDataset::build(vec![record], &BatchConfig::new(NotesMode::Doc)).unwrap();
    let mut rng = StdRng::seed_from_u64(1);
    let linker = headache_linker();
    let (lexicon, report) = LexiconExtractor::new(&linker, &linker)
        .extract(dataset.batches(4, true, &mut rng).unwrap())
        .unwrap();
    assert_eq!(report.text_units, 1);
    assert_eq!(lexicon.len(), 1);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    fn lexicon_from(entries: &[(u8, Vec<u8>)]) -> Lexicon {
        let mut lexicon = Lexicon::new();
        for (concept, aliases) in entries {
            lexicon.insert(&format!("C{concept}"), aliases.iter().map(|a| format!("a{a}")));
        }
        lexicon
    }

    proptest! {
        #[test]
        fn merge_is_commutative(
            left in prop::collection::vec((0u8..5, prop::collection::vec(0u8..10, 0..4)), 0..6),
            right in prop::collection::vec((0u8..5, prop::collection::vec(0u8..10, 0..4)), 0..6),
        ) {
            let mut ab = lexicon_from(&left);
            ab.merge(lexicon_from(&right));
            let mut ba = lexicon_from(&right);
            ba.merge(lexicon_from(&left));
            prop_assert_eq!(ab, ba);
        }
    }
}
