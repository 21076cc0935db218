//! Investigation workflow
//!
//! ```text
//! Diagnose -> Research -+-> Research (self-loop)
//!                       +-> Audit -> Solve -+-> Research (low confidence)
//!                                           +-> Approve -> End
//!                                           +-> End
//! ```
//!
//! Stages return partial updates, the [`router`] picks the next stage from the
//! merged state, and [`Investigator`] drives the loop.

pub mod orchestrator;
pub mod progress;
pub mod router;
pub mod stages;

use serde::Serialize;
use std::fmt;

pub use orchestrator::{Investigator, Settings};
pub use progress::{ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Diagnose,
    Research,
    Audit,
    Solve,
    Approve,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Diagnose => "diagnose",
            Stage::Research => "research",
            Stage::Audit => "audit",
            Stage::Solve => "solve",
            Stage::Approve => "approve",
        }
    }

    /// Role name used to tag audit-trail entries.
    pub fn role(&self) -> &'static str {
        match self {
            Stage::Diagnose => "Diagnostician",
            Stage::Research => "Researcher",
            Stage::Audit => "Code Auditor",
            Stage::Solve => "Solver",
            Stage::Approve => "System",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the workflow goes after a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Stage(Stage),
    End,
}
