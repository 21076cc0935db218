//! Stage executors
//!
//! Each stage reads the current state, calls its collaborators and returns a
//! [`StateUpdate`]. Only language-model failures escape a stage.

pub mod approve;
pub mod audit;
pub mod diagnose;
pub mod research;
pub mod solve;

use super::progress::Progress;
use super::{Settings, Stage};
use crate::error::CollaboratorError;
use crate::llm::LanguageModel;
use crate::sandbox::FileReader;
use crate::search::SearchProvider;
use crate::state::{InvestigationState, StateUpdate};

/// Collaborators and settings borrowed for one stage execution.
pub struct StageContext<'a> {
    pub model: &'a dyn LanguageModel,
    pub search: &'a dyn SearchProvider,
    pub files: &'a dyn FileReader,
    pub settings: &'a Settings,
    pub progress: &'a Progress,
}

pub async fn execute(
    stage: Stage,
    ctx: &StageContext<'_>,
    state: &InvestigationState,
) -> Result<StateUpdate, CollaboratorError> {
    match stage {
        Stage::Diagnose => diagnose::run(ctx, state).await,
        Stage::Research => research::run(ctx, state).await,
        Stage::Audit => audit::run(ctx, state).await,
        Stage::Solve => solve::run(ctx, state).await,
        Stage::Approve => Ok(approve::run(ctx, state)),
    }
}

/// Audit-trail entry: `[Role] body`, followed by any absorbed failures.
pub(crate) fn trail_entry(stage: Stage, body: &str, notes: &[String]) -> String {
    let mut entry = format!("[{}] {}", stage.role(), body);
    for note in notes {
        entry.push('\n');
        entry.push_str(note);
    }
    entry
}
