//! CLI surface tests.

use std::net::TcpListener;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn ringfs() -> (Command, TempDir) {
    let dirs = TempDir::new().expect("temp config/data dirs");
    let mut cmd = Command::cargo_bin("ringfs").expect("binary built");
    cmd.env("RINGFS_CONFIG_DIR", dirs.path().join("config"))
        .env("RINGFS_DATA_DIR", dirs.path().join("data"));
    (cmd, dirs)
}

#[test]
fn hash_prints_the_ring_key() {
    let (mut cmd, _dirs) = ringfs();
    cmd.args(["hash", "hi"])
        .assert()
        .success()
        .stdout(format!("hi => {}\n", ringfs::hash("hi")));
}

#[test]
fn no_arguments_shows_usage_and_fails() {
    let (mut cmd, _dirs) = ringfs();
    cmd.assert().failure();
}

#[test]
fn peer_exits_nonzero_when_the_port_is_taken() {
    // Hold the port so the daemon's bind must fail.
    let blocker = TcpListener::bind("127.0.0.1:0").expect("bind blocker");
    let port = blocker.local_addr().expect("local addr").port().to_string();

    let (mut cmd, _dirs) = ringfs();
    cmd.args(["peer", port.as_str()])
        .write_stdin("")
        .assert()
        .failure();
}

#[test]
fn peer_on_a_free_port_exits_cleanly_when_stdin_ends() {
    let (mut cmd, _dirs) = ringfs();
    // Option 7 leaves the (empty) ring and exits the menu.
    cmd.args(["peer", "0"])
        .write_stdin("7\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Goodbye!"));
}
