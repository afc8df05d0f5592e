// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::CleanupFailure;
use crate::state::{LaunchState, ServiceRecord};

/// How long a recorded service gets between SIGTERM and SIGKILL
#[cfg(unix)]
const TERMINATE_GRACE: Duration = Duration::from_secs(3);
#[cfg(unix)]
const TERMINATE_POLL: Duration = Duration::from_millis(50);

/// What a cleanup attempt was aimed at
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CleanupTarget {
    /// A service this launcher started on a previous run
    Recorded(ServiceRecord),
    /// Every process with this executable name
    Name(String),
}

impl fmt::Display for CleanupTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupTarget::Recorded(record) => {
                write!(f, "{} (pid {})", record.label, record.pid)
            }
            CleanupTarget::Name(name) => write!(f, "`{}`", name),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CleanupOutcome {
    Terminated,
    NotRunning,
    Failed(CleanupFailure),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CleanupReport {
    pub target: CleanupTarget,
    pub outcome: CleanupOutcome,
}

impl CleanupReport {
    fn failed(target: CleanupTarget, reason: impl Into<String>) -> Self {
        let failure = CleanupFailure {
            target: target.to_string(),
            reason: reason.into(),
        };

        Self {
            target,
            outcome: CleanupOutcome::Failed(failure),
        }
    }
}

/// Best-effort termination of stale processes.
///
/// Nothing in here returns an error: every failure is logged and recorded in
/// the report for its target, and the next target is tried.
#[derive(Debug, Default)]
pub struct Reaper;

impl Reaper {
    /// Recorded services first, then everything matching `names`
    pub async fn clean(&self, state: &LaunchState, names: &[String]) -> Vec<CleanupReport> {
        let mut reports = Vec::with_capacity(state.services.len() + names.len());

        for record in &state.services {
            reports.push(self.terminate_recorded(record).await);
        }

        for name in names {
            reports.push(self.terminate_by_name(name).await);
        }

        for report in &reports {
            match &report.outcome {
                CleanupOutcome::Terminated => info!(process = %report.target, "terminated"),
                CleanupOutcome::NotRunning => debug!(process = %report.target, "not running"),
                CleanupOutcome::Failed(failure) => warn!("{}", failure),
            }
        }

        reports
    }

    /// Terminate a service started by a previous run, along with its process group
    pub async fn terminate_recorded(&self, record: &ServiceRecord) -> CleanupReport {
        let target = CleanupTarget::Recorded(record.clone());

        if !still_ours(record) {
            return CleanupReport {
                target,
                outcome: CleanupOutcome::NotRunning,
            };
        }

        match terminate_pid(record.pid).await {
            Ok(outcome) => CleanupReport { target, outcome },
            Err(reason) => CleanupReport::failed(target, reason),
        }
    }

    /// Forcibly terminate all processes with this executable name
    pub async fn terminate_by_name(&self, name: &str) -> CleanupReport {
        let target = CleanupTarget::Name(name.to_string());

        if name.trim().is_empty() {
            return CleanupReport::failed(target, "empty process name");
        }

        let output = match kill_by_name_command(name).output().await {
            Ok(output) => output,
            Err(e) => return CleanupReport::failed(target, e.to_string()),
        };

        match classify_kill_status(output.status.code()) {
            Some(outcome) => CleanupReport { target, outcome },
            None => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                CleanupReport::failed(
                    target,
                    format!("{} ({})", stderr.trim(), output.status),
                )
            }
        }
    }
}

#[cfg(unix)]
fn kill_by_name_command(name: &str) -> Command {
    let mut command = Command::new("pkill");
    command.args(&["-KILL", "-x", name]);
    command
}

#[cfg(windows)]
fn kill_by_name_command(name: &str) -> Command {
    let mut command = Command::new("taskkill");
    command.args(&["/F", "/T", "/IM", name]);
    command
}

/// pkill: 0 matched, 1 nothing matched
#[cfg(unix)]
fn classify_kill_status(code: Option<i32>) -> Option<CleanupOutcome> {
    match code {
        Some(0) => Some(CleanupOutcome::Terminated),
        Some(1) => Some(CleanupOutcome::NotRunning),
        _ => None,
    }
}

/// taskkill: 0 terminated, 128 no such process
#[cfg(windows)]
fn classify_kill_status(code: Option<i32>) -> Option<CleanupOutcome> {
    match code {
        Some(0) => Some(CleanupOutcome::Terminated),
        Some(128) => Some(CleanupOutcome::NotRunning),
        _ => None,
    }
}

/// Guard against a recycled pid, the process must still look like what we started
#[cfg(target_os = "linux")]
fn still_ours(record: &ServiceRecord) -> bool {
    let cmdline = std::fs::read(format!("/proc/{}/cmdline", record.pid));
    owns_pid(cmdline, &record.program, || has_exited(record.pid))
}

/// Only a missing entry, or an empty cmdline of an exited process, counts as gone.
/// Unreadable entries are trusted.
#[cfg(target_os = "linux")]
fn owns_pid(
    cmdline: std::io::Result<Vec<u8>>,
    program: &str,
    exited: impl FnOnce() -> bool,
) -> bool {
    let cmdline = match cmdline {
        Ok(cmdline) => cmdline,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return false,
        Err(e) => {
            debug!("cannot inspect process, trusting the recorded pid: {}", e);
            return true;
        }
    };

    if cmdline.is_empty() {
        return !exited();
    }

    let program = std::path::Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string());

    String::from_utf8_lossy(&cmdline).contains(program.as_str())
}

/// Gone, or a zombie waiting on its parent
#[cfg(target_os = "linux")]
fn has_exited(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if let Err(Errno::ESRCH) = kill(Pid::from_raw(pid as libc::pid_t), None) {
        return true;
    }

    // state follows the parenthesised command name in /proc/<pid>/stat
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| {
            stat.rfind(')')
                .and_then(|end| stat[end + 1..].trim_start().chars().next())
        })
        .map_or(false, |state| state == 'Z' || state == 'X')
}

#[cfg(not(target_os = "linux"))]
fn still_ours(_record: &ServiceRecord) -> bool {
    true
}

#[cfg(all(unix, not(target_os = "linux")))]
fn has_exited(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    matches!(kill(Pid::from_raw(pid as libc::pid_t), None), Err(Errno::ESRCH))
}

#[cfg(unix)]
async fn terminate_pid(pid: u32) -> Result<CleanupOutcome, String> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(pid as libc::pid_t);

    // services are session leaders, so the group takes reload workers down too
    let signal_all = |signal: Signal| match killpg(pid, signal) {
        Err(Errno::ESRCH) => kill(pid, signal),
        other => other,
    };

    match signal_all(Signal::SIGTERM) {
        Ok(()) => (),
        Err(Errno::ESRCH) => return Ok(CleanupOutcome::NotRunning),
        Err(e) => return Err(e.to_string()),
    }

    let mut waited = Duration::from_secs(0);
    while waited < TERMINATE_GRACE {
        tokio::time::sleep(TERMINATE_POLL).await;
        waited += TERMINATE_POLL;

        if has_exited(pid.as_raw() as u32) {
            return Ok(CleanupOutcome::Terminated);
        }
    }

    debug!(pid = %pid, "still alive after SIGTERM, sending SIGKILL");
    match signal_all(Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(CleanupOutcome::Terminated),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(windows)]
async fn terminate_pid(pid: u32) -> Result<CleanupOutcome, String> {
    let output = Command::new("taskkill")
        .args(&["/F", "/T", "/PID", &pid.to_string()])
        .output()
        .await
        .map_err(|e| e.to_string())?;

    classify_kill_status(output.status.code()).ok_or_else(|| {
        String::from_utf8_lossy(&output.stderr).trim().to_string()
    })
}
