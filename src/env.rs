// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Construction of the environment handed to both services.

use std::env;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

use tracing::debug;

use crate::plan::EnvOverride;
use crate::Error;

/// The environment variable used to search for executables
pub const PATH: &str = "PATH";

/// An ordered set of environment variables, read-only once built.
#[derive(Clone, Debug, Default)]
pub struct Environment {
    vars: Vec<(OsString, OsString)>,
}

impl Environment {
    /// Start from the current process environment
    pub fn inherited() -> Self {
        Self::from_vars(env::vars_os())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        let mut environment = Self::default();
        for (key, value) in vars {
            environment.insert(key.into(), value.into());
        }
        environment
    }

    /// Apply `overrides` in order, later entries see the effect of earlier ones
    pub fn with_overrides(mut self, overrides: &[EnvOverride]) -> Result<Self, Error> {
        for over in overrides {
            match over {
                EnvOverride::Set { name, value } => {
                    let expanded = self.expand(value);
                    debug!(name = %name, value = %expanded.to_string_lossy(), "set environment variable");
                    self.insert(OsString::from(name), expanded);
                }
                EnvOverride::Prepend { name, entries } => {
                    let mut paths: Vec<PathBuf> = entries.clone();
                    if let Some(current) = self.get(name) {
                        paths.extend(env::split_paths(current));
                    }

                    let joined =
                        env::join_paths(paths).map_err(|e| Error::join_paths(name.as_str(), e))?;
                    debug!(name = %name, entries = entries.len(), "prepended path entries");
                    self.insert(OsString::from(name), joined);
                }
            }
        }

        Ok(self)
    }

    pub fn get(&self, name: impl AsRef<OsStr>) -> Option<&OsStr> {
        let name = name.as_ref();
        self.vars
            .iter()
            .find(|(key, _)| same_key(key, name))
            .map(|(_, value)| value.as_os_str())
    }

    /// The search path, split into entries
    pub fn path_entries(&self) -> Vec<PathBuf> {
        self.get(PATH)
            .map(|path| env::split_paths(path).collect())
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
        self.vars.iter().map(|(k, v)| (k.as_os_str(), v.as_os_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    fn insert(&mut self, name: OsString, value: OsString) {
        match self.vars.iter_mut().find(|(key, _)| same_key(key, &name)) {
            // keep the existing spelling, i.e. `Path` on Windows
            Some(slot) => slot.1 = value,
            None => self.vars.push((name, value)),
        }
    }

    /// Expand `${NAME}` references, unknown names expand to nothing
    fn expand(&self, value: &str) -> OsString {
        let mut out = OsString::new();
        let mut rest = value;

        while let Some(start) = rest.find("${") {
            let after = &rest[start + 2..];
            let end = match after.find('}') {
                Some(end) => end,
                None => break,
            };

            out.push(&rest[..start]);
            if let Some(found) = self.get(&after[..end]) {
                out.push(found);
            }
            rest = &after[end + 1..];
        }

        out.push(rest);
        out
    }
}

#[cfg(windows)]
fn same_key(a: &OsStr, b: &OsStr) -> bool {
    a.to_string_lossy()
        .eq_ignore_ascii_case(b.to_string_lossy().as_ref())
}

#[cfg(not(windows))]
fn same_key(a: &OsStr, b: &OsStr) -> bool {
    a == b
}
