use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ErrorKind {
    #[error("io error: {0}")]
    IoError(#[from] io::Error),
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("invalid value for {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },
    #[error("failed to read {}: {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("state file is corrupt: {0}")]
    StateEncoding(#[from] bincode::Error),
    #[error("cannot join path entries for {name}: {source}")]
    JoinPaths {
        name: String,
        #[source]
        source: std::env::JoinPathsError,
    },
    #[error("an error occured: {0}")]
    ErrorMsg(String),
    #[error("an error occured: {0}")]
    ErrorStr(&'static str),
}

#[derive(Error, Debug)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    fn from_kind(kind: ErrorKind) -> Self {
        Self(kind)
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    pub(crate) fn invalid_config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::InvalidConfig {
            field,
            reason: reason.into(),
        })
    }

    pub(crate) fn read_file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::from_kind(ErrorKind::ReadFile {
            path: path.into(),
            source,
        })
    }

    pub(crate) fn join_paths(name: impl Into<String>, source: std::env::JoinPathsError) -> Self {
        Self::from_kind(ErrorKind::JoinPaths {
            name: name.into(),
            source,
        })
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::from_kind(kind)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::from_kind(err.into())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::from_kind(err.into())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::from_kind(err.into())
    }
}

impl From<&'static str> for Error {
    fn from(err: &'static str) -> Self {
        Self::from_kind(ErrorKind::ErrorStr(err))
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Self::from_kind(ErrorKind::ErrorMsg(err))
    }
}

/// Why a single service could not be started.
///
/// Each of these is fatal only to the service it names; the launcher still
/// attempts the other one.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("command `{program}` not found on PATH or in {}", .working_directory.display())]
    InterpreterNotFound {
        program: String,
        working_directory: PathBuf,
    },
    #[error("working directory {} does not exist", .0.display())]
    WorkingDirectoryMissing(PathBuf),
    #[error("failed to spawn `{program}`: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// A best-effort termination that did not go through. Logged, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("could not terminate {target}: {reason}")]
pub struct CleanupFailure {
    pub target: String,
    pub reason: String,
}
