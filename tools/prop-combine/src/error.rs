//! Failure taxonomy for the combine pass
//!
//! Only [`CombineError::CompileFailure`] aborts a build. Every other variant is
//! caught at the instance boundary and turns the instance into an unmerged
//! registration.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CombineError {
    /// Build script could not be turned into a descriptor
    #[error("malformed build script {path}: {reason}")]
    MalformedDescriptor { path: PathBuf, reason: String },

    /// Mesh source missing or unreadable
    #[error("failed to load mesh source {path}: {reason}")]
    GeometryLoadFailure { path: PathBuf, reason: String },

    /// External decompiler exited non-zero or produced nothing usable
    #[error("failed to decompile {model}: {reason}")]
    DecompileFailure { model: String, reason: String },

    /// External model compiler exited non-zero (fatal)
    #[error("model compiler failed for {model}: {reason}")]
    CompileFailure { model: String, reason: String },

    /// Cache record that cannot be trusted
    #[error("cache record rejected: {0}")]
    CacheCorruption(String),

    /// Compiled model attributes could not be read
    #[error("failed to read model {model}: {reason}")]
    ModelUnavailable { model: String, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CombineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedDescriptor {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn geometry(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::GeometryLoadFailure {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error must abort the whole build
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::CompileFailure { .. })
    }
}
