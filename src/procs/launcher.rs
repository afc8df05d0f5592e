// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use clap::{App, Arg, ArgMatches, SubCommand};
use tracing::{debug, error, info, warn};

use crate::env::Environment;
use crate::error::LaunchError;
use crate::fork::{spawn_detached, Spawned};
use crate::plan::{LaunchPlan, ServiceSpec};
use crate::procs::cleanup::{CleanupReport, Reaper};
use crate::procs::readiness::{ReadinessGate, ReadinessOutcome};
use crate::procs::{Subcommand, DELAY};
use crate::state::{LaunchState, ServiceRecord};
use crate::Error;

/// Where the launcher is in its run, strictly in this order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Idle,
    CleaningUp,
    StartingBackend,
    WaitingInterDelay,
    StartingFrontend,
    Reported,
    Done,
}

/// The spawn attempt for one service
#[derive(Debug)]
pub struct ServiceOutcome {
    pub label: String,
    pub display_url: String,
    pub program: String,
    pub attempted_at: Instant,
    pub result: Result<Spawned, LaunchError>,
}

impl ServiceOutcome {
    pub fn spawned(&self) -> bool {
        self.result.is_ok()
    }

    pub fn pid(&self) -> Option<u32> {
        self.result.as_ref().ok().and_then(|spawned| spawned.pid)
    }
}

impl fmt::Display for ServiceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Ok(_) => write!(f, "{}: {}", self.label, self.display_url),
            Err(e) => write!(f, "{}: FAILED ({}), would have been {}", self.label, e, self.display_url),
        }
    }
}

/// What happened during one run.
///
/// A successful spawn only means the process was created. Nothing here says
/// the service became ready or is still running.
#[derive(Debug)]
pub struct LaunchResult {
    pub cleanup: Vec<CleanupReport>,
    pub backend: ServiceOutcome,
    pub frontend: ServiceOutcome,
    pub readiness: ReadinessOutcome,
    pub phases: Vec<Phase>,
    pub elapsed: Duration,
}

impl LaunchResult {
    pub fn services(&self) -> [&ServiceOutcome; 2] {
        [&self.backend, &self.frontend]
    }

    pub fn is_success(&self) -> bool {
        self.backend.spawned() && self.frontend.spawned()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// The operator facing summary
    pub fn report<W: Write>(&self, mut out: W) -> io::Result<()> {
        for service in &self.services() {
            writeln!(out, "{}", service)?;
        }
        Ok(())
    }
}

/// Starts the backend, waits, then starts the frontend.
///
/// Single threaded and strictly sequential: cleanup, backend, wait, frontend,
/// report. Failure to start one service never stops the other from being
/// attempted, and nothing is retried.
pub struct Launcher<'p> {
    plan: &'p LaunchPlan,
    phases: Vec<Phase>,
}

impl<'p> Launcher<'p> {
    pub fn new(plan: &'p LaunchPlan) -> Self {
        Self {
            plan,
            phases: vec![Phase::Idle],
        }
    }

    /// Run the plan once, printing the report to stdout.
    ///
    /// Only fails when the environment cannot be constructed, which is
    /// checked before anything is terminated or started.
    pub async fn run(plan: &LaunchPlan) -> Result<LaunchResult, Error> {
        Launcher::new(plan).launch(io::stdout()).await
    }

    pub async fn launch<W: Write + Send>(mut self, mut out: W) -> Result<LaunchResult, Error> {
        let started = Instant::now();
        let plan = self.plan;
        let environment = Environment::inherited().with_overrides(&plan.environment_overrides)?;
        debug!(vars = environment.len(), "constructed environment");

        self.enter(Phase::CleaningUp);
        let cleanup = self.clean_up().await;

        self.enter(Phase::StartingBackend);
        let backend = start(&plan.backend, &environment);

        self.enter(Phase::WaitingInterDelay);
        let gate = ReadinessGate::from_spec(plan.inter_delay, &plan.readiness);
        let readiness = gate.wait(backend.attempted_at, backend.spawned()).await;

        self.enter(Phase::StartingFrontend);
        let frontend = start(&plan.frontend, &environment);

        self.record(&[&backend, &frontend]);

        let mut result = LaunchResult {
            cleanup,
            backend,
            frontend,
            readiness,
            phases: Vec::new(),
            elapsed: started.elapsed(),
        };

        self.enter(Phase::Reported);
        if let Err(e) = result.report(&mut out) {
            warn!(error = %e, "could not write report");
        }

        self.enter(Phase::Done);
        result.phases = self.phases;
        Ok(result)
    }

    fn enter(&mut self, phase: Phase) {
        debug!(?phase, "entering phase");
        self.phases.push(phase);
    }

    async fn clean_up(&self) -> Vec<CleanupReport> {
        let state = match &self.plan.state_file {
            Some(path) => LaunchState::load(path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "ignoring unreadable state file");
                LaunchState::default()
            }),
            None => LaunchState::default(),
        };

        Reaper.clean(&state, &self.plan.stale_process_names).await
    }

    /// Remember what was started, so the next run or `stop` can target exactly these
    fn record(&self, outcomes: &[&ServiceOutcome]) {
        let path = match &self.plan.state_file {
            Some(path) => path,
            None => return,
        };

        let state = LaunchState {
            services: outcomes
                .iter()
                .filter_map(|o| o.pid().map(|pid| ServiceRecord::new(&o.label, pid, &o.program)))
                .collect(),
        };

        let saved = if state.is_empty() {
            LaunchState::clear(path)
        } else {
            state.save(path)
        };

        if let Err(e) = saved {
            warn!(path = %path.display(), error = %e, "could not record started services");
        }
    }
}

fn start(spec: &ServiceSpec, environment: &Environment) -> ServiceOutcome {
    let attempted_at = Instant::now();
    let result = spawn_detached(spec, environment);

    if let Err(e) = &result {
        error!(label = %spec.label, "{}", e);
    }

    ServiceOutcome {
        label: spec.label.clone(),
        display_url: spec.display_url.clone(),
        program: spec.program().to_string(),
        attempted_at,
        result,
    }
}

/// Seconds as given on the command line, bounded to what a `Duration` can hold
fn parse_delay(value: &str) -> Result<Duration, String> {
    value
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| format!("{} is not a usable number of seconds", value))
}

/// The `run` subcommand
#[derive(Debug)]
pub struct Run;

#[async_trait]
impl Subcommand for Run {
    const NAME: &'static str = "run";

    fn sub_command() -> App<'static, 'static> {
        SubCommand::with_name(Self::NAME)
            .about("clean up stale processes, then start the backend and the frontend")
            .arg(
                Arg::with_name(DELAY)
                    .long(DELAY)
                    .value_name("SECONDS")
                    .validator(|v| parse_delay(&v).map(|_| ()))
                    .help("seconds to wait between starting the backend and the frontend")
                    .takes_value(true),
            )
    }

    async fn run(mut plan: LaunchPlan, args: &ArgMatches<'_>) -> Result<i32, Error> {
        if let Some(delay) = args.value_of(DELAY) {
            plan.inter_delay = parse_delay(delay).map_err(|reason| Error::invalid_config(DELAY, reason))?;
        }

        let result = Launcher::run(&plan).await?;
        if result.is_success() {
            info!(elapsed = ?result.elapsed, readiness = %result.readiness, "both services started");
        } else {
            error!("not every service could be started");
        }

        Ok(result.exit_code())
    }
}
