use assert_cmd::Command;
use serial_test::serial;

#[test]
fn help_lists_the_run_options() {
    let mut cmd = Command::cargo_bin("mtcheck").unwrap();
    let assert = cmd.arg("--help").assert().success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(output.contains("--format"));
    assert!(output.contains("--stress"));
    assert!(output.contains("--duration"));
    assert!(output.contains("--player"));
}

#[test]
fn unknown_format_is_rejected_before_any_setup() {
    let mut cmd = Command::cargo_bin("mtcheck").unwrap();
    cmd.args(["--format", "flac"]).assert().failure();
}

#[test]
#[serial]
fn missing_player_binary_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("mtcheck").unwrap();
    cmd.current_dir(dir.path())
        .args([
            "--player",
            "/nonexistent/audioplayer-cuems",
            "--log",
            dir.path().join("run.log").to_str().unwrap(),
        ])
        .assert()
        .failure();
}
