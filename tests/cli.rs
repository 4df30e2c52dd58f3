use assert_cmd::Command;
use predicates::prelude::*;

fn ytgrab(config_dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ytgrab").unwrap();
    cmd.env("YTGRAB_CONFIG", config_dir.path().join("config.yaml"))
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_subcommands() {
    let dir = tempfile::tempdir().unwrap();
    ytgrab(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("download"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn empty_url_is_rejected_before_any_download() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out");

    ytgrab(&dir)
        .args(["download", "", "--video", "--dir"])
        .arg(&target)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("URL is empty"));

    assert!(!target.exists());
}

#[test]
fn unsupported_url_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    ytgrab(&dir)
        .args(["download", "https://example.com/video", "--audio"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Please check the input"));
}

#[test]
fn nothing_selected_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    ytgrab(&dir)
        .args(["download", "https://youtu.be/abc123"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("select at least one"));
}

#[test]
fn set_dir_is_remembered() {
    let dir = tempfile::tempdir().unwrap();
    let media = dir.path().join("media");

    ytgrab(&dir)
        .args(["config", "--set-dir"])
        .arg(&media)
        .assert()
        .success();

    ytgrab(&dir)
        .args(["config", "--show"])
        .assert()
        .success()
        .stdout(predicate::str::contains(media.display().to_string()));
}
