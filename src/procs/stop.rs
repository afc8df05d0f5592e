// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use async_trait::async_trait;
use clap::{App, ArgMatches, SubCommand};
use tracing::info;

use crate::plan::LaunchPlan;
use crate::procs::cleanup::{CleanupOutcome, Reaper};
use crate::procs::Subcommand;
use crate::state::LaunchState;
use crate::Error;

/// Stop the services started by the last run
///
/// Only the recorded services are touched, never processes matched by name.
#[derive(Debug)]
pub struct Stop;

#[async_trait]
impl Subcommand for Stop {
    const NAME: &'static str = "stop";

    fn sub_command() -> App<'static, 'static> {
        SubCommand::with_name(Self::NAME).about("stop the services started by the last run")
    }

    async fn run(plan: LaunchPlan, _args: &ArgMatches<'_>) -> Result<i32, Error> {
        let path = plan
            .state_file
            .as_ref()
            .ok_or("no state file is configured, nothing was recorded")?;

        let state = LaunchState::load(path)?;
        if state.is_empty() {
            println!("nothing to stop");
            return Ok(0);
        }

        let reports = Reaper.clean(&state, &[]).await;
        for report in &reports {
            match &report.outcome {
                CleanupOutcome::Terminated => println!("stopped {}", report.target),
                CleanupOutcome::NotRunning => println!("{} was not running", report.target),
                CleanupOutcome::Failed(failure) => println!("{}", failure),
            }
        }

        let failed = reports
            .iter()
            .any(|r| matches!(r.outcome, CleanupOutcome::Failed(_)));
        if failed {
            // keep the record so the operator can retry
            return Ok(1);
        }

        LaunchState::clear(path)?;
        info!(path = %path.display(), "cleared launch state");
        Ok(0)
    }
}
