// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The static description of what to clean up and what to start.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_INTER_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_READINESS_WAIT: Duration = Duration::from_secs(30);

/// Everything the launcher needs for one invocation.
///
/// Built once at startup and only ever borrowed immutably afterwards. The two
/// services are separate fields, so the backend always precedes the frontend.
#[derive(Clone, Debug)]
pub struct LaunchPlan {
    pub stale_process_names: Vec<String>,
    pub environment_overrides: Vec<EnvOverride>,
    pub backend: ServiceSpec,
    pub frontend: ServiceSpec,
    pub inter_delay: Duration,
    pub readiness: ReadinessSpec,
    /// Where the identifiers of spawned services are recorded, `None` disables it
    pub state_file: Option<PathBuf>,
}

impl LaunchPlan {
    /// A plan with no cleanup, no overrides, the default delay and no readiness probe
    pub fn new(backend: ServiceSpec, frontend: ServiceSpec) -> Self {
        Self {
            stale_process_names: Vec::new(),
            environment_overrides: Vec::new(),
            backend,
            frontend,
            inter_delay: DEFAULT_INTER_DELAY,
            readiness: ReadinessSpec::Disabled,
            state_file: None,
        }
    }

    /// Services in launch order
    pub fn services(&self) -> [&ServiceSpec; 2] {
        [&self.backend, &self.frontend]
    }
}

/// One launchable unit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceSpec {
    pub label: String,
    pub working_directory: PathBuf,
    /// Program followed by its arguments, never empty
    pub command: Vec<String>,
    /// Informational only, printed to the operator
    pub display_url: String,
}

impl ServiceSpec {
    pub fn new<L, D, C, S, U>(label: L, working_directory: D, command: C, display_url: U) -> Self
    where
        L: Into<String>,
        D: Into<PathBuf>,
        C: IntoIterator<Item = S>,
        S: Into<String>,
        U: Into<String>,
    {
        Self {
            label: label.into(),
            working_directory: working_directory.into(),
            command: command.into_iter().map(Into::into).collect(),
            display_url: display_url.into(),
        }
    }

    pub fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        self.command.get(1..).unwrap_or_default()
    }
}

/// A single change applied on top of the inherited environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnvOverride {
    /// Replace the variable, `${NAME}` in the value expands against the environment built so far
    Set { name: String, value: String },
    /// Put these path entries in front of the current value, keeping their order
    Prepend { name: String, entries: Vec<PathBuf> },
}

impl EnvOverride {
    pub fn set(name: impl Into<String>, value: impl Into<String>) -> Self {
        EnvOverride::Set {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn prepend<I, P>(name: impl Into<String>, entries: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        EnvOverride::Prepend {
            name: name.into(),
            entries: entries.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            EnvOverride::Set { name, .. } | EnvOverride::Prepend { name, .. } => name,
        }
    }
}

impl fmt::Display for EnvOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvOverride::Set { name, value } => write!(f, "{}={}", name, value),
            EnvOverride::Prepend { name, entries } => {
                write!(f, "{} +=", name)?;
                for entry in entries {
                    write!(f, " {}", entry.display())?;
                }
                Ok(())
            }
        }
    }
}

/// How the launcher decides the backend is up before starting the frontend.
///
/// The fixed inter-service delay is always honoured as a floor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadinessSpec {
    Disabled,
    /// Poll until a TCP connection to `address` succeeds, at most `max_wait`
    Tcp { address: String, max_wait: Duration },
}

impl fmt::Display for ReadinessSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessSpec::Disabled => f.write_str("fixed delay only"),
            ReadinessSpec::Tcp { address, max_wait } => {
                write!(f, "tcp {} (up to {}s)", address, max_wait.as_secs())
            }
        }
    }
}
