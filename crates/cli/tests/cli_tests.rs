//! CLI integration tests

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::process::Command;
use std::thread;

fn brokerctl() -> Command {
    Command::new(env!("CARGO_BIN_EXE_brokerctl"))
}

/// Accept one connection, reply with `reply`, return the command received
fn fake_controller(reply: &'static str) -> (String, thread::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        reader.get_mut().write_all(reply.as_bytes()).unwrap();
        line
    });

    (address, handle)
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = brokerctl().arg("--help").output().expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("broker autoscaler"), "Should describe the tool");
    assert!(stdout.contains("get-data"), "Should show get-data command");
    assert!(stdout.contains("quit"), "Should show quit command");
    assert!(stdout.contains("watch"), "Should show watch command");
    assert!(stdout.contains("--address"), "Should show address option");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = brokerctl().arg("--version").output().expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("brokerctl"), "Should show binary name");
}

/// Test watch subcommand help
#[test]
fn test_watch_help() {
    let output = brokerctl()
        .args(["watch", "--help"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Watch help should succeed");
    assert!(stdout.contains("--interval-ms"), "Should show interval option");
    assert!(stdout.contains("--column"), "Should show column option");
}

#[test]
fn test_get_data_prints_status_line() {
    let (address, controller) = fake_controller("1700000000000, 10.000, 2048.000, 1024.000\n");

    let output = brokerctl()
        .args(["--address", &address, "get-data", "--raw"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "get-data should succeed");
    assert_eq!(stdout.trim(), "1700000000000, 10.000, 2048.000, 1024.000");
    assert_eq!(controller.join().unwrap(), "get_data\n");
}

#[test]
fn test_quit_sends_quit() {
    let (address, controller) = fake_controller("");

    let output = brokerctl()
        .args(["--address", &address, "quit"])
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success(), "quit should succeed");
    assert_eq!(controller.join().unwrap(), "quit\n");
}

#[test]
fn test_get_data_fails_without_controller() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let output = brokerctl()
        .args(["--address", &address, "get-data"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success(), "get-data should fail");
}
