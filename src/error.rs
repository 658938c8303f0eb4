//! Error taxonomy for the toolkit.
//!
//! Hard failures are [`DbopsError`] values and abort the current operation.
//! Soft failures encountered while auditing are collected as [`Diagnostic`]
//! values and reported without stopping the batch.

use serde::Serialize;
use thiserror::Error;

pub type DbopsResult<T> = Result<T, DbopsError>;

/// Failure to build the old -> new pipeline bijection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    #[error("pipeline sets differ in size (old: {old}, new: {new})")]
    SizeMismatch { old: usize, new: usize },

    #[error("pipeline {pipeline} has no match in the new environment")]
    NoCandidate { pipeline: String },

    #[error("pipeline {pipeline} matches {candidates} pipelines in the new environment")]
    Ambiguous { pipeline: String, candidates: usize },
}

impl MatchError {
    pub fn pipeline(&self) -> Option<&str> {
        match self {
            MatchError::SizeMismatch { .. } => None,
            MatchError::NoCandidate { pipeline } | MatchError::Ambiguous { pipeline, .. } => {
                Some(pipeline)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum DbopsError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("runtime environment '{0}' not found")]
    UnknownEnvironment(String),

    #[error("old and new runtime environment are both '{0}'")]
    SameEnvironment(String),

    #[error("unable to match pipelines: {0}")]
    Match(#[from] MatchError),

    #[error("exercise config {config_id} references pipeline {pipeline} which has no counterpart in the new environment")]
    UnmappedPipeline { config_id: String, pipeline: String },

    #[error("exercise config {config_id} has a malformed '{field}' section")]
    MalformedConfig { config_id: String, field: String },

    #[error("failed to serialize exercise config {config_id}: {message}")]
    Serialize { config_id: String, message: String },

    #[error("migration {0} has already run")]
    MigratorUsed(String),
}

/// A per-record problem that is reported but does not abort the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Id of the record the diagnostic is about (exercise or config document).
    pub subject: String,
    pub facet: &'static str,
    pub message: String,
}

impl Diagnostic {
    pub fn new(subject: impl Into<String>, facet: &'static str, message: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            facet,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]: {}", self.subject, self.facet, self.message)
    }
}
