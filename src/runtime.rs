// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Locating the language runtime the services are executed with.
//!
//! The runtime is a conda style installation: a root directory holding a base
//! environment, with named environments under `<root>/envs/<name>`. Resolution
//! follows one ordered policy:
//!
//! 1. the named environment, if `<root>/envs/<name>` exists
//! 2. the directory of an explicitly configured interpreter, if that file exists
//! 3. the base environment at `<root>`, if it exists
//! 4. nothing, the inherited `PATH` is used unchanged

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::env::PATH;
use crate::plan::EnvOverride;

/// Where the runtime was found
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedRuntime {
    Named { name: String, prefix: PathBuf },
    Interpreter { interpreter: PathBuf, prefix: PathBuf },
    Base { prefix: PathBuf },
    Unavailable,
}

impl ResolvedRuntime {
    pub fn prefix(&self) -> Option<&Path> {
        match self {
            ResolvedRuntime::Named { prefix, .. }
            | ResolvedRuntime::Interpreter { prefix, .. }
            | ResolvedRuntime::Base { prefix } => Some(prefix),
            ResolvedRuntime::Unavailable => None,
        }
    }

    /// Overrides equivalent to activating this runtime
    pub fn overrides(&self) -> Vec<EnvOverride> {
        let prefix = match self.prefix() {
            Some(prefix) => prefix,
            None => return Vec::new(),
        };

        let mut overrides = vec![
            EnvOverride::prepend(PATH, search_dirs(prefix)),
            EnvOverride::set("CONDA_PREFIX", prefix.to_string_lossy()),
        ];

        if let ResolvedRuntime::Named { name, .. } = self {
            overrides.push(EnvOverride::set("CONDA_DEFAULT_ENV", name.as_str()));
        }

        overrides
    }
}

impl fmt::Display for ResolvedRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedRuntime::Named { name, prefix } => {
                write!(f, "environment `{}` at {}", name, prefix.display())
            }
            ResolvedRuntime::Interpreter { interpreter, .. } => {
                write!(f, "interpreter {}", interpreter.display())
            }
            ResolvedRuntime::Base { prefix } => write!(f, "base environment at {}", prefix.display()),
            ResolvedRuntime::Unavailable => f.write_str("inherited PATH"),
        }
    }
}

/// Resolve the runtime with the ordered fallback policy described above.
pub fn resolve_runtime(root: &Path, env_name: &str, interpreter: Option<&Path>) -> ResolvedRuntime {
    let resolved = resolve(root, env_name, interpreter);

    match &resolved {
        ResolvedRuntime::Unavailable => warn!(
            root = %root.display(),
            env = env_name,
            "no runtime found, using the inherited PATH"
        ),
        found => info!(runtime = %found, "resolved runtime"),
    }

    resolved
}

fn resolve(root: &Path, env_name: &str, interpreter: Option<&Path>) -> ResolvedRuntime {
    if !env_name.is_empty() {
        let named = root.join("envs").join(env_name);
        if named.is_dir() {
            return ResolvedRuntime::Named {
                name: env_name.to_string(),
                prefix: named,
            };
        }
    }

    if let Some(interpreter) = interpreter {
        if interpreter.is_file() {
            if let Some(prefix) = interpreter_prefix(interpreter) {
                return ResolvedRuntime::Interpreter {
                    interpreter: interpreter.to_path_buf(),
                    prefix,
                };
            }
        }
    }

    if root.is_dir() {
        return ResolvedRuntime::Base {
            prefix: root.to_path_buf(),
        };
    }

    ResolvedRuntime::Unavailable
}

/// `<prefix>/bin/python` lives one level deeper than `<prefix>\python.exe`
fn interpreter_prefix(interpreter: &Path) -> Option<PathBuf> {
    let dir = interpreter.parent()?;
    match dir.file_name().and_then(|n| n.to_str()) {
        Some("bin") if cfg!(unix) => dir.parent().map(Path::to_path_buf),
        _ => Some(dir.to_path_buf()),
    }
}

#[cfg(windows)]
fn search_dirs(prefix: &Path) -> Vec<PathBuf> {
    vec![
        prefix.to_path_buf(),
        prefix.join("Library").join("mingw-w64").join("bin"),
        prefix.join("Library").join("usr").join("bin"),
        prefix.join("Library").join("bin"),
        prefix.join("Scripts"),
        prefix.join("bin"),
    ]
}

#[cfg(not(windows))]
fn search_dirs(prefix: &Path) -> Vec<PathBuf> {
    vec![prefix.join("bin")]
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_named_environment_wins() {
        let root = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(root.path().join("envs").join("legal")).expect("mkdir");

        let resolved = resolve(root.path(), "legal", None);
        assert_eq!(
            resolved,
            ResolvedRuntime::Named {
                name: "legal".to_string(),
                prefix: root.path().join("envs").join("legal"),
            }
        );

        let overrides = resolved.overrides();
        assert_eq!(overrides[0].name(), PATH);
        assert!(overrides
            .iter()
            .any(|o| *o == EnvOverride::set("CONDA_DEFAULT_ENV", "legal")));
    }

    #[cfg(unix)]
    #[test]
    fn test_falls_back_to_interpreter() {
        let root = tempfile::tempdir().expect("tempdir");
        let venv = tempfile::tempdir().expect("tempdir");
        let bin = venv.path().join("bin");
        fs::create_dir_all(&bin).expect("mkdir");
        fs::write(bin.join("python"), b"").expect("touch");

        let missing_root = root.path().join("miniconda3");
        let resolved = resolve(&missing_root, "legal", Some(&bin.join("python")));

        assert_eq!(resolved.prefix(), Some(venv.path()));
        assert_eq!(
            resolved.overrides()[0],
            EnvOverride::prepend(PATH, vec![bin])
        );
    }

    #[test]
    fn test_falls_back_to_base_then_nothing() {
        let root = tempfile::tempdir().expect("tempdir");

        let resolved = resolve(root.path(), "missing", Some(Path::new("/nowhere/python")));
        assert_eq!(
            resolved,
            ResolvedRuntime::Base {
                prefix: root.path().to_path_buf()
            }
        );
        assert!(!resolved
            .overrides()
            .iter()
            .any(|o| o.name() == "CONDA_DEFAULT_ENV"));

        let gone = root.path().join("gone");
        let resolved = resolve(&gone, "legal", None);
        assert_eq!(resolved, ResolvedRuntime::Unavailable);
        assert!(resolved.overrides().is_empty());
    }
}
