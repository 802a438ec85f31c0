//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("stmflash").expect("binary builds");
    // Keep the environment from leaking a port into the tests.
    cmd.env_remove("STMFLASH_PORT");
    cmd.env_remove("STMFLASH_BAUD");
    cmd
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("stmflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn short_help_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("-h")
        .assert()
        .success()
        .stdout(predicate::str::contains("stmflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("stmflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn flash_without_port_fails_with_guidance() {
    let dir = tempdir().expect("tempdir should be created");
    let firmware = dir.path().join("app.bin");
    fs::write(&firmware, b"\x00\x01\x02\x03").expect("write app.bin");

    cli_cmd()
        .arg("flash")
        .arg(firmware.as_os_str())
        .assert()
        .failure()
        .stderr(predicate::str::contains("STMFLASH_PORT"));
}

#[test]
fn flash_missing_firmware_fails_fast() {
    let dir = tempdir().expect("tempdir should be created");
    let missing = dir.path().join("not_there.hex");

    cli_cmd()
        .arg("flash")
        .arg(missing.as_os_str())
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn flash_rejects_malformed_address() {
    cli_cmd()
        .args(["flash", "app.bin", "--address", "0xNOPE"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid hex address"));
}

#[test]
fn erase_with_unopenable_port_fails() {
    cli_cmd()
        .args(["--port", "/dev/does-not-exist-stmflash", "erase"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to open"));
}

#[test]
fn completions_write_script_to_stdout() {
    cli_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stmflash"));
}

#[test]
fn completions_require_shell_argument() {
    cli_cmd().arg("completions").assert().failure();
}

#[test]
fn unknown_subcommand_exits_nonzero() {
    cli_cmd().arg("frobnicate").assert().failure();
}
