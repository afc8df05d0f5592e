// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::env::Environment;
use crate::error::LaunchError;
use crate::plan::ServiceSpec;

/// Windows: give the child its own console window
#[cfg(windows)]
const CREATE_NEW_CONSOLE: u32 = 0x0000_0010;
/// Windows: keep console control events of the launcher away from the child
#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

pub struct StdIoConf {
    pub stdin: Stdio,
    pub stderr: Stdio,
    pub stdout: Stdio,
}

impl StdIoConf {
    /// The service never reads from the launcher, but its output stays visible to the operator
    pub fn detached() -> Self {
        StdIoConf {
            stdin: Stdio::null(),
            stderr: Stdio::inherit(),
            stdout: Stdio::inherit(),
        }
    }
}

/// A service that was started and then let go
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Spawned {
    pub pid: Option<u32>,
}

/// Locate `program` the way the spawned process would see it.
///
/// Bare names are searched on the constructed `PATH`, anything with a path
/// component is taken relative to `working_directory`.
pub fn resolve_program(
    program: &str,
    environment: &Environment,
    working_directory: &Path,
) -> Result<PathBuf, LaunchError> {
    let not_found = || LaunchError::InterpreterNotFound {
        program: program.to_string(),
        working_directory: working_directory.to_path_buf(),
    };

    if program.is_empty() {
        return Err(not_found());
    }

    which::which_in(program, environment.get(crate::env::PATH), working_directory)
        .map_err(|_| not_found())
}

/// Start `spec` in its own session (Unix) or console (Windows) and return without waiting on it.
///
/// The child is not killed when the returned handle drops, it outlives the launcher.
pub fn spawn_detached(spec: &ServiceSpec, environment: &Environment) -> Result<Spawned, LaunchError> {
    let working_directory = &spec.working_directory;
    if !working_directory.is_dir() {
        return Err(LaunchError::WorkingDirectoryMissing(
            working_directory.clone(),
        ));
    }

    let program = resolve_program(spec.program(), environment, working_directory)?;
    debug!(label = %spec.label, program = %program.display(), "resolved program");

    let stdio = StdIoConf::detached();
    let mut command = Command::new(&program);
    command
        .args(spec.args())
        .current_dir(working_directory)
        .env_clear()
        .envs(environment.iter())
        .kill_on_drop(false)
        .stdin(stdio.stdin)
        .stdout(stdio.stdout)
        .stderr(stdio.stderr);

    detach(&mut command);

    let child = command.spawn().map_err(|source| LaunchError::SpawnFailed {
        program: spec.program().to_string(),
        source,
    })?;

    let pid = child.id();
    info!(
        label = %spec.label,
        pid = ?pid,
        dir = %working_directory.display(),
        "started {}",
        spec.command.join(" ")
    );

    // dropping the handle leaves the process running, tokio reaps it if it exits while we are alive
    drop(child);
    Ok(Spawned { pid })
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    // setsid is async-signal-safe, and the child is a fresh process group leader afterwards
    unsafe {
        command.pre_exec(|| {
            nix::unistd::setsid()
                .map(|_| ())
                .map_err(std::io::Error::from)
        });
    }
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    command.creation_flags(CREATE_NEW_CONSOLE | CREATE_NEW_PROCESS_GROUP);
}
