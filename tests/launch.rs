// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! End-to-end runs of the launcher against short lived commands.

#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use twinlaunch::procs::cleanup::{CleanupOutcome, CleanupTarget};
use twinlaunch::procs::readiness::ReadinessOutcome;
use twinlaunch::procs::Phase;
use twinlaunch::state::LaunchState;
use twinlaunch::{
    EnvOverride, LaunchError, LaunchPlan, LaunchResult, Launcher, ReadinessSpec, ServiceSpec,
};

const BACKEND_URL: &str = "http://localhost:8000";
const FRONTEND_URL: &str = "http://localhost:8501";
const TOLERANCE: Duration = Duration::from_millis(1900);

fn echo_plan(dir: &Path) -> LaunchPlan {
    LaunchPlan::new(
        ServiceSpec::new("Backend", dir, vec!["echo", "backend-ok"], BACKEND_URL),
        ServiceSpec::new("Frontend", dir, vec!["echo", "frontend-ok"], FRONTEND_URL),
    )
}

async fn launch(plan: &LaunchPlan) -> (LaunchResult, String) {
    let mut out = Vec::new();
    let result = Launcher::new(plan)
        .launch(&mut out)
        .await
        .expect("environment should build");
    (result, String::from_utf8(out).expect("utf8 report"))
}

fn frontend_delay(result: &LaunchResult) -> Duration {
    result
        .frontend
        .attempted_at
        .duration_since(result.backend.attempted_at)
}

async fn wait_for_file(path: &Path) -> String {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(contents) = fs::read_to_string(path) {
            if !contents.is_empty() {
                return contents;
            }
        }
        assert!(Instant::now() < deadline, "{} was never written", path.display());
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_both_services_start_and_urls_are_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let plan = echo_plan(dir.path());

    let (result, report) = launch(&plan).await;

    assert!(result.is_success());
    assert_eq!(result.exit_code(), 0);
    assert!(result.cleanup.is_empty());
    assert!(result.elapsed >= TOLERANCE);
    assert!(frontend_delay(&result) >= TOLERANCE);
    assert_eq!(result.readiness, ReadinessOutcome::FixedDelay);
    assert_eq!(result.backend.display_url, BACKEND_URL);
    assert_eq!(result.frontend.display_url, FRONTEND_URL);
    assert_eq!(
        report,
        format!("Backend: {}\nFrontend: {}\n", BACKEND_URL, FRONTEND_URL)
    );
    assert_eq!(
        result.phases,
        vec![
            Phase::Idle,
            Phase::CleaningUp,
            Phase::StartingBackend,
            Phase::WaitingInterDelay,
            Phase::StartingFrontend,
            Phase::Reported,
            Phase::Done,
        ]
    );
}

#[tokio::test]
async fn test_listening_backend_is_ready_but_floor_still_holds() {
    let dir = tempfile::tempdir().expect("tempdir");
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let address = listener.local_addr().expect("local addr").to_string();

    let mut plan = echo_plan(dir.path());
    plan.inter_delay = Duration::from_millis(300);
    plan.readiness = ReadinessSpec::Tcp {
        address,
        max_wait: Duration::from_secs(5),
    };

    let (result, _) = launch(&plan).await;

    assert!(matches!(result.readiness, ReadinessOutcome::Ready { .. }));
    assert!(result.is_success());
    assert!(frontend_delay(&result) >= Duration::from_millis(300));
    assert!(frontend_delay(&result) < Duration::from_secs(5));
}

#[tokio::test]
async fn test_unknown_stale_process_does_not_disturb_launch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut plan = echo_plan(dir.path());
    plan.stale_process_names = vec!["nonexistent-process-xyz".to_string()];

    let (result, _) = launch(&plan).await;

    assert_eq!(result.cleanup.len(), 1);
    assert_eq!(
        result.cleanup[0].target,
        CleanupTarget::Name("nonexistent-process-xyz".to_string())
    );
    assert_ne!(result.cleanup[0].outcome, CleanupOutcome::Terminated);
    assert!(result.is_success());
    assert!(result.elapsed >= TOLERANCE);
}

#[tokio::test]
async fn test_missing_interpreter_still_starts_frontend() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut plan = echo_plan(dir.path());
    plan.backend.command = vec!["no-such-interpreter-xyz".to_string(), "main:app".to_string()];

    let (result, report) = launch(&plan).await;

    match &result.backend.result {
        Err(LaunchError::InterpreterNotFound { program, .. }) => {
            assert_eq!(program, "no-such-interpreter-xyz")
        }
        other => panic!("expected InterpreterNotFound, got {:?}", other),
    }
    assert!(result.frontend.spawned());
    assert!(!result.is_success());
    assert_eq!(result.exit_code(), 1);
    assert!(report.contains("Backend: FAILED"));
    assert!(report.contains(&format!("Frontend: {}", FRONTEND_URL)));
}

#[tokio::test]
async fn test_missing_backend_directory_waits_then_starts_frontend() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut plan = echo_plan(dir.path());
    plan.backend.working_directory = dir.path().join("backend");

    let (result, _) = launch(&plan).await;

    assert!(matches!(
        result.backend.result,
        Err(LaunchError::WorkingDirectoryMissing(ref path)) if path == &dir.path().join("backend")
    ));
    assert!(result.frontend.spawned());
    assert!(frontend_delay(&result) >= TOLERANCE);
}

#[tokio::test]
async fn test_services_see_the_constructed_environment() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bin = dir.path().join("bin");
    fs::create_dir_all(&bin).expect("mkdir");

    let mut plan = LaunchPlan::new(
        ServiceSpec::new(
            "Backend",
            dir.path(),
            vec!["sh", "-c", "printf %s \"$MARKER\" > backend.txt"],
            BACKEND_URL,
        ),
        ServiceSpec::new(
            "Frontend",
            dir.path(),
            vec!["sh", "-c", "printf %s \"$PATH\" > frontend.txt"],
            FRONTEND_URL,
        ),
    );
    plan.inter_delay = Duration::from_millis(100);
    plan.environment_overrides = vec![
        EnvOverride::prepend("PATH", vec![bin.clone()]),
        EnvOverride::set("MARKER", "hello from ${HOME}"),
    ];

    let (result, _) = launch(&plan).await;
    assert!(result.is_success());

    let home = std::env::var("HOME").unwrap_or_default();
    assert_eq!(
        wait_for_file(&dir.path().join("backend.txt")).await,
        format!("hello from {}", home)
    );

    let path = wait_for_file(&dir.path().join("frontend.txt")).await;
    let entries: Vec<PathBuf> = std::env::split_paths(&path).collect();
    assert_eq!(entries[0], bin);

    let inherited = std::env::var_os("PATH").unwrap_or_default();
    for original in std::env::split_paths(&inherited) {
        assert!(entries.contains(&original), "{} was dropped", original.display());
    }
}

#[tokio::test]
async fn test_started_services_are_recorded_and_cleaned_next_time() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state_file = dir.path().join("state").join("services.bin");
    let mut plan = echo_plan(dir.path());
    plan.inter_delay = Duration::from_millis(100);
    plan.state_file = Some(state_file.clone());

    let (first, _) = launch(&plan).await;
    assert!(first.is_success());

    let recorded = LaunchState::load(&state_file).expect("state");
    let labels: Vec<&str> = recorded.services.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, vec!["Backend", "Frontend"]);
    assert_eq!(recorded.services[0].program, "echo");

    let (second, _) = launch(&plan).await;
    assert_eq!(second.cleanup.len(), 2);
    for report in &second.cleanup {
        assert!(matches!(report.target, CleanupTarget::Recorded(_)));
        assert!(!matches!(report.outcome, CleanupOutcome::Failed(_)));
    }
    assert!(second.is_success());
}
