// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Record of the services spawned by the last run.
//!
//! The next run, or `stop`, uses it to terminate exactly the processes this
//! launcher started instead of everything that happens to share a name.

use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Error;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub label: String,
    pub pid: u32,
    pub program: String,
    /// Seconds since the epoch
    pub started_at: u64,
}

impl ServiceRecord {
    pub fn new(label: impl Into<String>, pid: u32, program: impl Into<String>) -> Self {
        let started_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Self {
            label: label.into(),
            pid,
            program: program.into(),
            started_at,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchState {
    pub services: Vec<ServiceRecord>,
}

impl LaunchState {
    /// A missing file is an empty state
    pub fn load(path: &Path) -> Result<Self, Error> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(Error::read_file(path, e)),
        };

        let state: Self = bincode::deserialize(&bytes)?;
        debug!(path = %path.display(), services = state.services.len(), "loaded launch state");
        Ok(state)
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let bytes = bincode::serialize(self)?;
        fs::write(path, bytes)?;
        debug!(path = %path.display(), services = self.services.len(), "saved launch state");
        Ok(())
    }

    pub fn clear(path: &Path) -> Result<(), Error> {
        match fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
