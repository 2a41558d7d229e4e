use assert_cmd::cargo;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

// These exercise argument parsing and config-loading failure modes only.
// `create`/`list`/`revoke` against a live Postgres instance are exercised
// by the ignored tests below.

#[test]
fn test_help() {
    let mut cmd = Command::new(cargo::cargo_bin!("bansho-keys"));
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("bansho API key admin CLI"));
}

#[test]
fn test_version() {
    let mut cmd = Command::new(cargo::cargo_bin!("bansho-keys"));
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("bansho-keys"));
}

#[test]
fn test_missing_env_var() {
    let mut cmd = Command::new(cargo::cargo_bin!("bansho-keys"));
    cmd.env_remove("BANSHO_DATABASE_URL")
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "BANSHO_DATABASE_URL env var is required",
        ));
}

#[test]
fn test_invalid_subcommand() {
    let mut cmd = Command::new(cargo::cargo_bin!("bansho-keys"));
    cmd.env("BANSHO_DATABASE_URL", "postgres://dummy/dummy")
        .arg("invalid-cmd")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

/// Requires a live Postgres reachable at `BANSHO_DATABASE_URL` with the
/// `bansho-server` schema already bootstrapped.
#[test]
#[ignore]
fn test_create_list_revoke_round_trip() {
    let mut create = Command::new(cargo::cargo_bin!("bansho-keys"));
    let output = create
        .arg("create")
        .arg("--role")
        .arg("user")
        .assert()
        .success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let api_key_id = stdout
        .lines()
        .find_map(|line| line.strip_prefix("api_key_id\t"))
        .expect("api_key_id line")
        .to_string();

    Command::new(cargo::cargo_bin!("bansho-keys"))
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(api_key_id.as_str()));

    Command::new(cargo::cargo_bin!("bansho-keys"))
        .arg("revoke")
        .arg(&api_key_id)
        .assert()
        .success()
        .stdout(predicate::str::contains("revoked"));

    Command::new(cargo::cargo_bin!("bansho-keys"))
        .arg("revoke")
        .arg(&api_key_id)
        .assert()
        .failure();
}
