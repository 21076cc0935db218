//! Progress notifications for callers that display a run as it happens

use super::Stage;
use crate::state::Status;
use std::sync::Arc;

/// Events emitted while an investigation runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    StageStarted {
        stage: Stage,
        /// Research passes completed so far
        iteration: u32,
    },
    StageFinished {
        stage: Stage,
        status: Status,
    },
    /// One query failed; Research continues with the rest.
    SearchFailed { query: String, reason: String },
    /// A file pattern or path could not be read; Audit continues.
    FileSkipped { path: String, reason: String },
    /// The run halted at the approval checkpoint.
    ApprovalRequired {
        pending_action: String,
        proposed_solution: String,
    },
}

pub type ProgressSink = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Optional sink; emitting without one is a no-op.
#[derive(Clone, Default)]
pub struct Progress {
    sink: Option<ProgressSink>,
}

impl Progress {
    pub fn new(sink: ProgressSink) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(sink) = &self.sink {
            sink(&event);
        }
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress")
            .field("attached", &self.sink.is_some())
            .finish()
    }
}
