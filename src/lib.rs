//! incident-responder library crate
//!
//! Runs an LLM-driven investigation of a runtime error: diagnose, research,
//! audit the code, propose a fix and stop for approval when the fix is risky.
//! The `incident` binary is a thin CLI over [`workflow::Investigator`].

pub mod config;
pub mod error;
pub mod extract;
pub mod keyring;
pub mod llm;
pub mod report;
pub mod samples;
pub mod sandbox;
pub mod search;
pub mod state;
pub mod testing;
pub mod util;
pub mod workflow;

pub use error::{CollaboratorError, FileError, InvestigationError};
pub use state::{ErrorType, InvestigationState, Severity, Status};
pub use workflow::{Investigator, ProgressEvent, Settings, Stage};
