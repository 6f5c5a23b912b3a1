use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

fn yavirtctl_with_config(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("yavirtctl").unwrap();
    // Keep the caller's environment out of the picture
    cmd.env_remove("YAVIRT_URI")
        .env_remove("YAVIRT_LOG_LEVEL")
        .env_remove("YAVIRT_LOG_FORMAT")
        .arg("--config")
        .arg(config);
    cmd
}

fn yavirtctl() -> Command {
    yavirtctl_with_config(Path::new("/nonexistent/yavirt-client/config.toml"))
}

#[test]
fn test_cli_version() {
    yavirtctl()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("yavirtctl 0.1.0"));
}

#[test]
fn test_cli_help() {
    yavirtctl()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Command line client for the yavirtd VM daemon",
        ));
}

#[test]
fn test_cli_guest_help_lists_subcommands() {
    yavirtctl()
        .args(["guest", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("attach"))
        .stdout(predicate::str::contains("exit-code"));
}

#[test]
fn test_cli_missing_subcommand() {
    yavirtctl().assert().failure();
}

#[test]
fn test_cli_exec_requires_command() {
    yavirtctl()
        .args(["guest", "exec", "g1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "required arguments were not provided",
        ));
}

#[test]
fn test_cli_rejects_unknown_scheme() {
    yavirtctl()
        .args(["--uri", "ws://127.0.0.1:9696/v1", "info"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported scheme"));
}

#[test]
fn test_cli_rejects_bad_filter() {
    yavirtctl()
        .args(["guest", "list", "--filter", "novalue"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected key=value"));
}

#[test]
fn test_cli_unreachable_daemon_fails() {
    yavirtctl()
        .env("YAVIRT_RETRY_ENABLED", "false")
        .env("YAVIRT_CONNECT_TIMEOUT_SECS", "1")
        .args(["--uri", "http://127.0.0.1:1/v1", "info"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to get host info"));
}

#[test]
fn test_cli_uri_flag_overrides_bad_config_uri() {
    let mut config = NamedTempFile::new().unwrap();
    writeln!(config, r#"uri = "ftp://10.0.0.5""#).unwrap();

    // The file alone is rejected
    yavirtctl_with_config(config.path())
        .arg("info")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid yavirtd URI"));

    // A valid --uri replaces it before validation
    yavirtctl_with_config(config.path())
        .env("YAVIRT_RETRY_ENABLED", "false")
        .env("YAVIRT_CONNECT_TIMEOUT_SECS", "1")
        .args(["--uri", "http://127.0.0.1:1/v1", "info"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to get host info"))
        .stderr(predicate::str::contains("Invalid yavirtd URI").not());
}
