// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Common library functions for twinlaunch
//!
//! Kills stale instances, then starts a backend and a frontend service,
//! detached, with a shared environment and a wait in between.

pub mod config;
pub mod env;
mod error;
pub mod fork;
pub mod logging;
pub mod plan;
pub mod procs;
pub mod runtime;
pub mod state;

pub use error::{CleanupFailure, Error, ErrorKind, LaunchError};
pub use plan::{EnvOverride, LaunchPlan, ReadinessSpec, ServiceSpec};
pub use procs::{LaunchResult, Launcher};
