// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Integration tests for the capstream CLI
//!
//! These tests verify CLI commands work correctly end-to-end using the
//! assert_cmd crate pattern. Tests needing a real V4L2 node are serial and
//! ignored by default.

use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use std::{env, fs, path::PathBuf};

/// Helper to create a Command for the capstream binary
/// Uses CAPSTREAM_BIN environment variable if set, otherwise the cargo-built binary
fn capstream_cmd() -> Command {
    if let Ok(bin_path) = env::var("CAPSTREAM_BIN") {
        Command::new(bin_path)
    } else {
        Command::cargo_bin("capstream").expect("capstream binary")
    }
}

/// Camera used by the hardware tests
fn camera_device() -> String {
    env::var("CAPSTREAM_DEVICE").unwrap_or_else(|_| "/dev/video0".to_string())
}

/// Get the test data directory (target/testdata/capstream-cli)
fn get_test_data_dir() -> PathBuf {
    let test_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("target")
        .join("testdata")
        .join("capstream-cli");

    fs::create_dir_all(&test_dir).expect("Failed to create test data directory");
    test_dir
}

// =============================================================================
// Basic CLI Tests (No Hardware Required)
// =============================================================================

#[test]
fn test_cli_help() {
    capstream_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("capstream CLI"))
        .stdout(predicate::str::contains("info"))
        .stdout(predicate::str::contains("capture"))
        .stdout(predicate::str::contains("encode"));
}

#[test]
fn test_cli_version() {
    capstream_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("capstream"));
}

#[test]
fn test_capture_help() {
    capstream_cmd()
        .args(["capture", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--device"))
        .stdout(predicate::str::contains("--size"))
        .stdout(predicate::str::contains("--buffers"));
}

#[test]
fn test_encode_help() {
    capstream_cmd()
        .args(["encode", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("<INPUT>"))
        .stdout(predicate::str::contains("<M2M>"))
        .stdout(predicate::str::contains("--codec"))
        .stdout(predicate::str::contains("--fd"));
}

#[test]
fn test_encode_requires_devices() {
    capstream_cmd()
        .arg("encode")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_encode_output_conflicts_with_fd() {
    capstream_cmd()
        .args(["encode", "/dev/video0", "/dev/video1", "-o", "out.h264", "--fd", "1"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("cannot be used with"));
}

// =============================================================================
// Argument Validation (No Hardware Required)
// =============================================================================

#[test]
fn test_capture_invalid_resolution() {
    capstream_cmd()
        .args(["capture", "-s", "640by480"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Invalid resolution"));
}

#[test]
fn test_capture_invalid_format() {
    capstream_cmd()
        .args(["capture", "-f", "TOOLONG"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("FOURCC"));
}

#[test]
fn test_capture_zero_buffers() {
    capstream_cmd()
        .args(["capture", "-b", "0"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_info_missing_device() {
    capstream_cmd()
        .args(["info", "-d", "/dev/capstream-does-not-exist"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Device not found"));
}

#[test]
fn test_info_regular_file() {
    let path = get_test_data_dir().join("not-a-device");
    fs::write(&path, b"plain file").unwrap();

    capstream_cmd()
        .args(["info", "-d"])
        .arg(&path)
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("not a character device"));
}

// =============================================================================
// Hardware Tests (Require a V4L2 camera)
// =============================================================================

#[test]
#[serial]
#[ignore = "requires a V4L2 capture device (run with --ignored)"]
fn test_info_json() {
    let output = capstream_cmd()
        .args(["--json", "info", "-d", &camera_device()])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["device"], camera_device());
    assert!(report["capabilities"].is_array());
    assert!(report["queues"].is_array());
}

#[test]
#[serial]
#[ignore = "requires a V4L2 capture device (run with --ignored)"]
fn test_capture_frames_to_file() {
    let path = get_test_data_dir().join("capture.yuyv");
    let _ = fs::remove_file(&path);

    let output = capstream_cmd()
        .args([
            "--json",
            "capture",
            "-d",
            &camera_device(),
            "-s",
            "640x480",
            "-f",
            "YUYV",
            "-n",
            "5",
            "-o",
        ])
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["frames"], 5);
    let written = fs::metadata(&path).unwrap().len();
    assert_eq!(summary["bytes"], written);
    assert!(written > 0);
}
