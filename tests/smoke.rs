use assert_cmd::Command;

#[test]
fn cli_help_runs() {
    let mut cmd = Command::cargo_bin("clinical-lexicon").expect("binary exists");
    cmd.arg("--help").assert().success();
}

#[test]
fn unknown_notes_mode_is_rejected() {
    let mut cmd = Command::cargo_bin("clinical-lexicon").expect("binary exists");
    cmd.args(["build", "--mode", "paragraph"]).assert().failure();
}
