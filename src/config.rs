// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Configuration loading from an optional TOML file.
//!
//! Every key has a default, an absent file describes the stock deployment: a
//! uvicorn backend in `./backend` and a streamlit frontend in `.`, both run
//! from the `legal` environment of `~/miniconda3`.
//!
//! ```toml
//! delay_secs = 2
//! stale_processes = ["uvicorn", "streamlit"]
//!
//! [runtime]
//! root = "~/miniconda3"
//! env = "legal"
//!
//! [backend]
//! dir = "backend"
//! command = ["uvicorn", "main:app", "--reload"]
//! url = "http://localhost:8000"
//!
//! [[env]]
//! name = "PYTHONUNBUFFERED"
//! value = "1"
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::logging::LoggingConfig;
use crate::plan::{EnvOverride, LaunchPlan, ReadinessSpec, ServiceSpec};
use crate::runtime::resolve_runtime;
use crate::Error;

/// Environment variable naming the config file when `--config` is not given
pub const CONFIG_ENV: &str = "TWINLAUNCH_CONFIG";
/// Looked up in the current directory when nothing else names a config file
pub const DEFAULT_CONFIG_FILE: &str = "twinlaunch.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub delay_secs: f64,
    pub stale_processes: Vec<String>,
    /// Empty disables recording of started services
    pub state_file: Option<String>,
    pub runtime: RuntimeConfig,
    pub backend: ServiceConfig,
    pub frontend: ServiceConfig,
    pub readiness: ReadinessConfig,
    pub env: Vec<EnvConfig>,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            delay_secs: 2.0,
            stale_processes: default_stale_processes(),
            state_file: None,
            runtime: RuntimeConfig::default(),
            backend: ServiceConfig::default(),
            frontend: ServiceConfig::default(),
            readiness: ReadinessConfig::default(),
            env: vec![EnvConfig {
                name: "PYTHONUNBUFFERED".into(),
                value: "1".into(),
                mode: EnvMode::Set,
            }],
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Defaults to `~/miniconda3`
    pub root: Option<String>,
    /// Defaults to `legal`
    pub env: Option<String>,
    pub interpreter: Option<String>,
}

/// Unset keys fall back to the defaults of the service being configured
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub label: Option<String>,
    pub dir: Option<String>,
    pub command: Option<Vec<String>>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReadinessConfig {
    pub enabled: bool,
    pub max_wait_secs: u64,
    /// `host:port`, derived from the backend url when unset
    pub address: Option<String>,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_wait_secs: 30,
            address: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvConfig {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub mode: EnvMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvMode {
    Set,
    /// `value` is a path list, split with the platform separator
    Prepend,
}

impl Default for EnvMode {
    fn default() -> Self {
        EnvMode::Set
    }
}

/// Defaults for one of the two services
struct ServiceDefaults {
    label: &'static str,
    dir: &'static str,
    command: &'static [&'static str],
    url: &'static str,
}

const BACKEND: ServiceDefaults = ServiceDefaults {
    label: "Backend",
    dir: "backend",
    command: &["uvicorn", "main:app", "--reload"],
    url: "http://localhost:8000",
};

const FRONTEND: ServiceDefaults = ServiceDefaults {
    label: "Frontend",
    dir: ".",
    command: &["streamlit", "run", "app.py"],
    url: "http://localhost:8501",
};

/// A parsed config together with the directory relative paths resolve against
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub base_dir: PathBuf,
    pub source: Option<PathBuf>,
}

impl Config {
    pub fn from_toml(contents: &str) -> Result<Self, Error> {
        Ok(toml::from_str(contents)?)
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path).map_err(|e| Error::read_file(path, e))?;
        Self::from_toml(&contents)
    }

    /// `explicit`, else `$TWINLAUNCH_CONFIG`, else `./twinlaunch.toml` if present, else defaults
    pub fn discover(explicit: Option<&Path>) -> Result<LoadedConfig, Error> {
        let current_dir = env::current_dir()?;

        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from))
            .or_else(|| {
                let candidate = current_dir.join(DEFAULT_CONFIG_FILE);
                if candidate.is_file() {
                    Some(candidate)
                } else {
                    None
                }
            });

        match path {
            Some(path) => {
                let config = Self::load(&path)?;
                let path = current_dir.join(path);
                let base_dir = path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| current_dir.clone());
                debug!(path = %path.display(), "loaded config");

                Ok(LoadedConfig {
                    config,
                    base_dir,
                    source: Some(path),
                })
            }
            None => Ok(LoadedConfig {
                config: Self::default(),
                base_dir: current_dir,
                source: None,
            }),
        }
    }

    /// Build the plan, resolving the runtime and relative paths against `base_dir`
    pub fn into_plan(self, base_dir: &Path) -> Result<LaunchPlan, Error> {
        let inter_delay = Duration::try_from_secs_f64(self.delay_secs).map_err(|_| {
            Error::invalid_config(
                "delay_secs",
                format!("{} is not a usable number of seconds", self.delay_secs),
            )
        })?;

        let backend = self.backend.into_spec(&BACKEND, base_dir, "backend.command")?;
        let frontend = self.frontend.into_spec(&FRONTEND, base_dir, "frontend.command")?;

        let root = match self.runtime.root {
            Some(root) => expand_home(&root),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("miniconda3"),
        };
        let env_name = self.runtime.env.unwrap_or_else(|| "legal".to_string());
        let interpreter = self.runtime.interpreter.as_deref().map(expand_home);

        let runtime = resolve_runtime(&root, &env_name, interpreter.as_deref());
        let mut environment_overrides = runtime.overrides();
        environment_overrides.extend(self.env.into_iter().map(EnvConfig::into_override));

        let readiness = if self.readiness.enabled {
            let address = match self.readiness.address {
                Some(address) => address,
                None => address_of(&backend.display_url)?,
            };

            ReadinessSpec::Tcp {
                address,
                max_wait: Duration::from_secs(self.readiness.max_wait_secs),
            }
        } else {
            ReadinessSpec::Disabled
        };

        let state_file = match self.state_file {
            Some(path) if path.is_empty() => None,
            Some(path) => Some(base_dir.join(expand_home(&path))),
            None => default_state_file(),
        };

        Ok(LaunchPlan {
            stale_process_names: self
                .stale_processes
                .into_iter()
                .filter(|name| !name.trim().is_empty())
                .collect(),
            environment_overrides,
            backend,
            frontend,
            inter_delay,
            readiness,
            state_file,
        })
    }
}

impl ServiceConfig {
    fn into_spec(
        self,
        defaults: &ServiceDefaults,
        base_dir: &Path,
        command_field: &'static str,
    ) -> Result<ServiceSpec, Error> {
        let command = self
            .command
            .unwrap_or_else(|| defaults.command.iter().map(|s| s.to_string()).collect());
        if command.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(Error::invalid_config(command_field, "a program is required"));
        }

        let dir = self.dir.unwrap_or_else(|| defaults.dir.to_string());

        Ok(ServiceSpec {
            label: self.label.unwrap_or_else(|| defaults.label.to_string()),
            working_directory: base_dir.join(expand_home(&dir)),
            command,
            display_url: self.url.unwrap_or_else(|| defaults.url.to_string()),
        })
    }
}

impl EnvConfig {
    fn into_override(self) -> EnvOverride {
        match self.mode {
            EnvMode::Set => EnvOverride::set(self.name, self.value),
            EnvMode::Prepend => {
                let entries: Vec<PathBuf> = env::split_paths(&self.value).collect();
                EnvOverride::prepend(self.name, entries)
            }
        }
    }
}

/// `host:port` of a service url, for probing it
fn address_of(url: &str) -> Result<String, Error> {
    let parsed = Url::parse(url)
        .map_err(|e| Error::invalid_config("backend.url", format!("{}: {}", url, e)))?;

    let host = parsed
        .host_str()
        .ok_or_else(|| Error::invalid_config("backend.url", format!("{} has no host", url)))?;
    let port = parsed
        .port_or_known_default()
        .ok_or_else(|| Error::invalid_config("backend.url", format!("{} has no port", url)))?;

    // IPv6 hosts come back bracketed, which is what socket address parsing wants
    Ok(format!("{}:{}", host, port))
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~") {
        Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') => {
            match dirs::home_dir() {
                Some(home) => home.join(rest.trim_start_matches(|c: char| c == '/' || c == '\\')),
                None => PathBuf::from(path),
            }
        }
        _ => PathBuf::from(path),
    }
}

fn default_state_file() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("twinlaunch").join("services.bin"))
}

#[cfg(windows)]
fn default_stale_processes() -> Vec<String> {
    vec!["uvicorn.exe".to_string(), "streamlit.exe".to_string()]
}

#[cfg(not(windows))]
fn default_stale_processes() -> Vec<String> {
    vec!["uvicorn".to_string(), "streamlit".to_string()]
}
