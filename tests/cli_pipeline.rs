use std::{fs, path::Path};

use assert_cmd::Command;

const CONFIG_KEYS: [&str; 10] = [
    "DATA_DIR",
    "OUTPUTS_DIR",
    "NOTES_MODE",
    "MAX_WORDS",
    "MAX_SENTENCES",
    "BATCH_LABELS",
    "BATCH_SIZE",
    "PERIOD_LENGTH",
    "TIMESTEP",
    "FAILURE_POLICY",
];

/// Data directory with two stays, notes for both and a small knowledge base.
fn workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    for sub in ["timeseries", "notes", "kb"] {
        fs::create_dir_all(data.join(sub)).unwrap();
    }
    fs::write(
        data.join("listfile.csv"),
        "stay,y_true\n10001_episode1_timeseries.csv,1\n10002_episode1_timeseries.csv,0\n",
    )
    .unwrap();
    fs::write(
        data.join("timeseries/10001_episode1_timeseries.csv"),
        "Hours,Heart Rate,Temperature\n0.5,80,37.0\n3.2,,38.5\n",
    )
    .unwrap();
    fs::write(
        data.join("timeseries/10002_episode1_timeseries.csv"),
        "Hours,Heart Rate,Temperature\n1.0,70,36.8\n",
    )
    .unwrap();
    fs::write(
        data.join("notes/10001_episode1_timeseries.json"),
        r#"{"d1": [["patient", "has", "fever"], ["pyrexia", "noted"]]}"#,
    )
    .unwrap();
    fs::write(
        data.join("notes/10002_episode1_timeseries.json"),
        r#"{"d1": [["complains", "of", "headache"]]}"#,
    )
    .unwrap();
    fs::write(
        data.join("normalizer.json"),
        r#"{"means": [75.0, 37.0], "stds": [10.0, 1.0]}"#,
    )
    .unwrap();
    fs::write(
        data.join("kb/concepts.jsonl"),
        concat!(
            r#"{"concept_id": "C0015967", "canonical_name": "Fever", "aliases": ["fever", "pyrexia"]}"#,
            "\n",
            r#"{"concept_id": "C0018681", "canonical_name": "Headache", "aliases": ["headache", "cephalgia"]}"#,
            "\n",
        ),
    )
    .unwrap();
    dir
}

fn cli(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("clinical-lexicon").expect("binary exists");
    for key in CONFIG_KEYS {
        cmd.env_remove(key);
    }
    cmd.current_dir(root)
        .env("DATA_DIR", root.join("data"))
        .env("OUTPUTS_DIR", root.join("outputs"))
        .env("RUST_LOG", "warn");
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).unwrap()
}

#[test]
fn lexicon_command_writes_the_synonym_file() {
    let dir = workspace();
    let stdout = stdout_of(cli(dir.path()).arg("lexicon"));

    let written = fs::read_to_string(dir.path().join("outputs/lexicon.txt")).unwrap();
    assert_eq!(
        written,
        "C0015967 fever pyrexia\nC0018681 cephalgia headache\n"
    );
    assert!(stdout.contains("2 text units"), "{stdout}");
    assert!(stdout.contains("0 failures"), "{stdout}");
}

#[test]
fn build_command_reports_the_dataset() {
    let dir = workspace();
    let stdout = stdout_of(cli(dir.path()).args(["build", "--mode", "doc"]));
    assert!(
        stdout.starts_with("2 patients, 48 time steps x 2 channels"),
        "{stdout}"
    );
    assert!(stdout.contains("(doc mode)"), "{stdout}");
}

#[test]
fn annotate_command_marks_entities_inline() {
    let dir = workspace();
    let stdout = stdout_of(cli(dir.path()).args(["annotate", "--limit", "1"]));
    assert_eq!(
        stdout,
        "10001_episode1_timeseries.csv: patient has [fever|C0015967] [pyrexia|C0015967] noted\n"
    );

    let stdout = stdout_of(cli(dir.path()).args(["annotate", "--text", "Fever, no cephalgia."]));
    assert_eq!(stdout, "[Fever|C0015967], no [cephalgia|C0018681].\n");
}

#[test]
fn unknown_notes_mode_in_environment_fails() {
    let dir = workspace();
    cli(dir.path())
        .env("NOTES_MODE", "paragraph")
        .arg("lexicon")
        .assert()
        .failure();
    assert!(!dir.path().join("outputs/lexicon.txt").exists());
}

#[test]
fn zero_timestep_fails_before_reading() {
    let dir = workspace();
    cli(dir.path())
        .env("TIMESTEP", "0")
        .arg("build")
        .assert()
        .failure();
}

#[test]
fn help_does_not_need_valid_settings() {
    let dir = workspace();
    cli(dir.path())
        .env("NOTES_MODE", "paragraph")
        .env("OUTPUTS_DIR", dir.path().join("never-created"))
        .arg("--help")
        .assert()
        .success();
    assert!(!dir.path().join("never-created").exists());
}
