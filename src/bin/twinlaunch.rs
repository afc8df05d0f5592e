// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::path::Path;

use clap::{App, AppSettings, Arg, ArgMatches};
use tokio::runtime;
use tracing::error;

use twinlaunch::config::Config;
use twinlaunch::plan::LaunchPlan;
use twinlaunch::procs::{self, Inspect, Run, Stop, Subcommand};
use twinlaunch::Error;

/// Exit code for a configuration that could not be loaded
const CONFIG_ERROR: i32 = 2;

trait SetupClapApp {
    fn setup_clap_app(self) -> Self;
}

impl<'a, 'b> SetupClapApp for App<'a, 'b> {
    fn setup_clap_app(self) -> Self {
        self.version(env!("CARGO_PKG_VERSION"))
            .author(env!("CARGO_PKG_AUTHORS"))
    }
}

fn main() {
    let args = App::new(env!("CARGO_PKG_NAME"))
        .setup_clap_app()
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .setting(AppSettings::VersionlessSubcommands)
        .arg(
            Arg::with_name(procs::CONFIG)
                .short("c")
                .long(procs::CONFIG)
                .value_name("FILE")
                .help("configuration file, defaults to $TWINLAUNCH_CONFIG or ./twinlaunch.toml")
                .takes_value(true)
                .global(true),
        )
        .subcommand(Run::sub_command())
        .subcommand(Stop::sub_command())
        .subcommand(Inspect::sub_command())
        .get_matches();

    let loaded = match Config::discover(args.value_of_os(procs::CONFIG).map(Path::new)) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("failed to load config: {}", e);
            std::process::exit(CONFIG_ERROR);
        }
    };

    loaded.config.logging.init();

    let plan = match loaded.config.into_plan(&loaded.base_dir) {
        Ok(plan) => plan,
        Err(e) => {
            error!("invalid config: {}", e);
            eprintln!("invalid config: {}", e);
            std::process::exit(CONFIG_ERROR);
        }
    };

    let runtime = match runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to initialize the tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let code = runtime.block_on(async move {
        let result = match args.subcommand() {
            (Stop::NAME, Some(sub)) => run::<Stop>(plan, sub).await,
            (Inspect::NAME, Some(sub)) => run::<Inspect>(plan, sub).await,
            (Run::NAME, Some(sub)) => run::<Run>(plan, sub).await,
            // no subcommand means run
            (_, _) => run::<Run>(plan, &ArgMatches::default()).await,
        };

        match result {
            Ok(code) => code,
            Err(e) => {
                error!("{}", e);
                eprintln!("{}", e);
                1
            }
        }
    });

    std::process::exit(code);
}

async fn run<P: Subcommand>(plan: LaunchPlan, args: &ArgMatches<'_>) -> Result<i32, Error> {
    P::run(plan, args).await
}
