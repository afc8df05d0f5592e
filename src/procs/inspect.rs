// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::io::{self, Write};

use async_trait::async_trait;
use clap::{App, ArgMatches, SubCommand};

use crate::plan::{LaunchPlan, ServiceSpec};
use crate::procs::Subcommand;
use crate::Error;

/// Print the resolved plan without touching any process
#[derive(Debug)]
pub struct Inspect;

impl Inspect {
    pub fn write_plan<W: Write>(plan: &LaunchPlan, mut out: W) -> io::Result<()> {
        if plan.stale_process_names.is_empty() {
            writeln!(out, "cleanup: recorded services only")?;
        } else {
            writeln!(
                out,
                "cleanup: recorded services, then {}",
                plan.stale_process_names.join(", ")
            )?;
        }

        writeln!(out, "environment:")?;
        for over in &plan.environment_overrides {
            writeln!(out, "  {}", over)?;
        }

        write_service(&mut out, &plan.backend)?;
        writeln!(out, "wait: at least {:.1}s, {}", plan.inter_delay.as_secs_f64(), plan.readiness)?;
        write_service(&mut out, &plan.frontend)?;

        match &plan.state_file {
            Some(path) => writeln!(out, "state file: {}", path.display()),
            None => writeln!(out, "state file: disabled"),
        }
    }
}

fn write_service<W: Write>(out: &mut W, spec: &ServiceSpec) -> io::Result<()> {
    writeln!(
        out,
        "{}: `{}` in {} -> {}",
        spec.label,
        spec.command.join(" "),
        spec.working_directory.display(),
        spec.display_url
    )
}

#[async_trait]
impl Subcommand for Inspect {
    const NAME: &'static str = "plan";

    fn sub_command() -> App<'static, 'static> {
        SubCommand::with_name(Self::NAME).about("print what `run` would do, without doing it")
    }

    async fn run(plan: LaunchPlan, _args: &ArgMatches<'_>) -> Result<i32, Error> {
        Inspect::write_plan(&plan, io::stdout())?;
        Ok(0)
    }
}
