//! Error taxonomy for the investigation pipeline
//!
//! Collaborator failures are typed so stages can decide which ones to absorb
//! (search, file reads) and which ones end the run (language-model calls).

use crate::state::InvestigationState;
use crate::workflow::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// Failure raised by the language-model or search collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    /// No credential (or an unusable endpoint) is configured.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Transport or API failure reported by the provider.
    #[error("provider error: {0}")]
    Provider(String),
}

/// Failure raised by the sandboxed file reader.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("access denied: {} ({reason})", path.display())]
    AccessDenied { path: PathBuf, reason: String },
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("file type not allowed: {}", .0.display())]
    UnsupportedType(PathBuf),
    #[error("error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of a whole investigation run.
#[derive(Debug, Error)]
pub enum InvestigationError {
    /// Raised before any stage executes.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A stage with no fallback failed. `partial` is the state as it stood
    /// before that stage ran.
    #[error("{stage} stage failed: {source}")]
    StageFailed {
        stage: Stage,
        #[source]
        source: CollaboratorError,
        partial: Box<InvestigationState>,
    },
}

impl InvestigationError {
    /// The state reached before the failure, if any stage had started.
    pub fn partial_state(&self) -> Option<&InvestigationState> {
        match self {
            InvestigationError::StageFailed { partial, .. } => Some(partial),
            InvestigationError::Configuration(_) => None,
        }
    }
}
