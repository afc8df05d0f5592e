// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

pub mod cleanup;
mod inspect;
mod launcher;
pub mod readiness;
mod stop;

pub use inspect::Inspect;
pub use launcher::{LaunchResult, Launcher, Phase, Run, ServiceOutcome};
pub use stop::Stop;

use async_trait::async_trait;
use clap::{App, ArgMatches};

use crate::plan::LaunchPlan;
use crate::Error;

pub const CONFIG: &str = "config";
pub const DELAY: &str = "delay";

/// A trait to define common construction of a subcommand
///
/// Every subcommand is handed the plan built from the configuration, and
/// returns the exit code of the process.
#[async_trait]
pub trait Subcommand: Sized + Send + 'static {
    const NAME: &'static str;

    fn sub_command() -> App<'static, 'static>;

    async fn run(plan: LaunchPlan, args: &ArgMatches<'_>) -> Result<i32, Error>;
}
