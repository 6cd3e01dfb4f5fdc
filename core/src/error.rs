//! Error taxonomy and run-level aggregation.
//!
//! Per-entry and per-file problems never abort a run. They are recorded as
//! [`Warning`]s (recoverable) or artifact failures (fatal for one output) in
//! a [`RunSummary`], which decides the process exit code at the end.

use crate::archive::ArchiveKind;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// An unreadable or corrupt file or archive encountered while scanning.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("io error for {}: {source}", path.display())]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("corrupt {kind} container {}: {reason}", path.display())]
    Corrupt {
        kind: ArchiveKind,
        path: PathBuf,
        reason: String,
    },
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

/// A malformed manifest or an archive variant this build cannot open.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("io error for {}: {source}", path.display())]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("invalid json manifest {}: {source}", path.display())]
    Json {
        source: serde_json::Error,
        path: PathBuf,
    },
    #[error("invalid tabular manifest {}: {source}", path.display())]
    Csv { source: csv::Error, path: PathBuf },
    #[error("{}:{line}: {reason}", path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("cannot determine manifest format for {}", .0.display())]
    UnknownFormat(PathBuf),
    #[error("{kind} archives are not supported for reading: {}", path.display())]
    UnsupportedArchive { kind: ArchiveKind, path: PathBuf },
}

/// A failure writing one destination artifact.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to write {}: {source}", path.display())]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to write zip {}: {source}", path.display())]
    Zip {
        source: zip::result::ZipError,
        path: PathBuf,
    },
    #[error("cannot read source {}: {source}", path.display())]
    Source { source: ScanError, path: PathBuf },
    #[error("cannot place {name} in a depot without a sha1")]
    MissingSha1 { name: String },
    #[error("invalid sha1 {0:?}")]
    InvalidSha1(String),
    #[error("refusing to write {0:?} outside the output root")]
    UnsafePath(String),
    #[error("existing container {} cannot be carried over: {source}", path.display())]
    Existing { source: ScanError, path: PathBuf },
}

/// An item or request that refers to an input the run does not know about.
#[derive(Debug, Error)]
pub enum ReferentialError {
    #[error("item {item} references input #{input}, but only {available} inputs were supplied")]
    UnknownInput {
        item: String,
        input: usize,
        available: usize,
    },
}

/// Invalid settings or mode combinations; fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to write config {}: {source}", path.display())]
    Write {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
    #[error("missing required input: {0}")]
    MissingInput(String),
    #[error("invalid option combination: {0}")]
    Invalid(String),
}

/// Umbrella error for library entry points that span several concerns.
#[derive(Debug, Error)]
pub enum DatError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(transparent)]
    Referential(#[from] ReferentialError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type DatResult<T> = Result<T, DatError>;

/// A recoverable, per-entry problem surfaced for operator review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// The entry could not be read or decoded; it was hashed as all-absent or skipped.
    ScanFailed { location: String, message: String },
    /// Two or more canonical candidates were consistent with the entry.
    AmbiguousMatch {
        location: String,
        candidates: Vec<String>,
    },
    /// An input file could not be decoded.
    Codec { location: String, message: String },
}

impl Warning {
    pub fn scan_failed(location: impl Into<String>, error: &ScanError) -> Self {
        Self::ScanFailed {
            location: location.into(),
            message: error.to_string(),
        }
    }

    /// The entry, file or item the warning is about.
    pub fn location(&self) -> &str {
        match self {
            Self::ScanFailed { location, .. }
            | Self::AmbiguousMatch { location, .. }
            | Self::Codec { location, .. } => location,
        }
    }
}

/// Aggregated outcome of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Inputs (files, manifests, artifacts) handled without a fatal error.
    pub processed: usize,
    pub warnings: Vec<Warning>,
    /// Fatal, per-artifact failures. Earlier successful outputs are kept.
    pub failures: Vec<String>,
}

impl RunSummary {
    pub fn warn(&mut self, warning: Warning) {
        self.warnings.push(warning);
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.failures.push(message.into());
    }

    pub fn succeed(&mut self) {
        self.processed += 1;
    }

    pub fn absorb(&mut self, other: RunSummary) {
        self.processed += other.processed;
        self.warnings.extend(other.warnings);
        self.failures.extend(other.failures);
    }

    pub fn ambiguous_count(&self) -> usize {
        self.warnings
            .iter()
            .filter(|warning| matches!(warning, Warning::AmbiguousMatch { .. }))
            .count()
    }

    /// Zero unless something fatal happened or nothing was processed at all.
    /// Warnings never change the exit code.
    pub fn exit_code(&self) -> i32 {
        if !self.failures.is_empty() || self.processed == 0 {
            1
        } else {
            0
        }
    }
}
