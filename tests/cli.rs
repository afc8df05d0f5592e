// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn write_config(dir: &Path, contents: &str) -> std::path::PathBuf {
    let path = dir.join("twinlaunch.toml");
    fs::write(&path, contents).expect("write config");
    path
}

fn twinlaunch() -> Command {
    let mut cmd = Command::cargo_bin("twinlaunch").expect("binary");
    cmd.env_remove("TWINLAUNCH_CONFIG").env("RUST_LOG", "warn");
    cmd
}

const ECHO_CONFIG: &str = r#"
delay_secs = 0.2
stale_processes = []
state_file = "services.bin"

[runtime]
root = "no-runtime-here"

[backend]
dir = "."
command = ["echo", "backend-ok"]

[frontend]
command = ["echo", "frontend-ok"]

[readiness]
enabled = false
"#;

#[test]
fn test_plan_prints_without_launching() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(dir.path(), ECHO_CONFIG);

    twinlaunch()
        .arg("--config")
        .arg(&config)
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("Backend: `echo backend-ok`"))
        .stdout(predicate::str::contains("-> http://localhost:8501"))
        .stdout(predicate::str::contains("fixed delay only"));

    assert!(!dir.path().join("services.bin").exists());
}

#[test]
fn test_invalid_config_exits_with_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(dir.path(), "delay_secs = -3\n");

    twinlaunch()
        .arg("--config")
        .arg(&config)
        .arg("plan")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("delay_secs"));
}

#[test]
fn test_out_of_range_delay_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(dir.path(), "delay_secs = 1e30\n");

    twinlaunch()
        .arg("--config")
        .arg(&config)
        .arg("plan")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("delay_secs"));

    let config = write_config(dir.path(), ECHO_CONFIG);
    twinlaunch()
        .arg("--config")
        .arg(&config)
        .args(&["run", "--delay", "1e30"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("1e30"));

    assert!(!dir.path().join("services.bin").exists());
}

#[test]
fn test_missing_config_file_is_a_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");

    twinlaunch()
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("absent.toml"));
}

#[cfg(unix)]
#[test]
fn test_run_then_stop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(dir.path(), ECHO_CONFIG);

    twinlaunch()
        .arg("--config")
        .arg(&config)
        .args(&["run", "--delay", "0.1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Backend: http://localhost:8000"))
        .stdout(predicate::str::contains("Frontend: http://localhost:8501"));

    assert!(dir.path().join("services.bin").exists());

    twinlaunch()
        .arg("--config")
        .arg(&config)
        .arg("stop")
        .assert()
        .success();

    assert!(!dir.path().join("services.bin").exists());

    twinlaunch()
        .arg("--config")
        .arg(&config)
        .arg("stop")
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to stop"));
}

#[cfg(unix)]
#[test]
fn test_failed_service_exits_nonzero() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(
        dir.path(),
        &ECHO_CONFIG.replace("[\"echo\", \"backend-ok\"]", "[\"no-such-interpreter-xyz\"]"),
    );

    twinlaunch()
        .arg("--config")
        .arg(&config)
        .args(&["run", "--delay", "0"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Backend: FAILED"))
        .stdout(predicate::str::contains("Frontend: http://localhost:8501"));
}
