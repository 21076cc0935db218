//! Investigation state
//!
//! The single record threaded through every workflow stage. Stages never
//! mutate it directly: each returns a [`StateUpdate`] whose populated fields
//! replace the corresponding fields wholesale when the orchestrator merges it.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Default cap on research passes.
pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

/// Category assigned to the error by the Diagnose stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Database,
    Network,
    Authentication,
    Configuration,
    CodeBug,
    Dependency,
    ResourceExhaustion,
    Permission,
    Timeout,
    #[default]
    Unknown,
}

impl ErrorType {
    pub const ALL: [ErrorType; 10] = [
        ErrorType::Database,
        ErrorType::Network,
        ErrorType::Authentication,
        ErrorType::Configuration,
        ErrorType::CodeBug,
        ErrorType::Dependency,
        ErrorType::ResourceExhaustion,
        ErrorType::Permission,
        ErrorType::Timeout,
        ErrorType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Database => "database",
            ErrorType::Network => "network",
            ErrorType::Authentication => "authentication",
            ErrorType::Configuration => "configuration",
            ErrorType::CodeBug => "code_bug",
            ErrorType::Dependency => "dependency",
            ErrorType::ResourceExhaustion => "resource_exhaustion",
            ErrorType::Permission => "permission",
            ErrorType::Timeout => "timeout",
            ErrorType::Unknown => "unknown",
        }
    }

    /// Normalize free-form model output onto the category set.
    /// Anything outside the set resolves to `Unknown`.
    pub fn normalize(raw: &str) -> Self {
        let cleaned = raw
            .trim()
            .trim_matches(|c: char| matches!(c, '[' | ']' | '"' | '\'' | '`' | '.'))
            .trim()
            .to_lowercase()
            .replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == cleaned)
            .unwrap_or(ErrorType::Unknown)
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity reported alongside the diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
    #[default]
    Unknown,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
            Severity::Unknown => "unknown",
        }
    }

    pub fn normalize(raw: &str) -> Self {
        let cleaned = raw
            .trim()
            .trim_matches(|c: char| matches!(c, '[' | ']' | '"' | '\'' | '.'))
            .to_lowercase();
        match cleaned.as_str() {
            "low" => Severity::Low,
            "medium" => Severity::Medium,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            _ => Severity::Unknown,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Investigating,
    Researching,
    Auditing,
    Solving,
    AwaitingApproval,
    Complete,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Investigating => "investigating",
            Status::Researching => "researching",
            Status::Auditing => "auditing",
            Status::Solving => "solving",
            Status::AwaitingApproval => "awaiting_approval",
            Status::Complete => "complete",
            Status::Failed => "failed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationState {
    pub id: Uuid,
    pub error_log: String,

    // Diagnosis
    pub error_type: ErrorType,
    pub error_summary: String,
    pub affected_components: Vec<String>,
    pub severity: Severity,
    pub immediate_actions: Vec<String>,

    // Research
    pub search_queries: Vec<String>,
    /// Accumulated across passes, never truncated.
    pub research_findings: Vec<String>,
    pub relevant_docs: Vec<String>,
    pub research_confidence: String,

    // Audit
    pub files_to_check: Vec<String>,
    pub code_context: String,

    // Solution
    pub proposed_solution: String,
    /// Only meaningful once Solve has run; 0.0 before that.
    pub solution_confidence: f64,
    pub solution_steps: Vec<String>,
    pub code_changes: String,

    // Control flow
    pub iterations: u32,
    pub max_iterations: u32,
    pub needs_human_approval: bool,
    pub pending_action: String,

    /// One entry per stage execution, append-only.
    pub messages: Vec<String>,
    pub status: Status,
}

impl InvestigationState {
    /// Fresh state for one investigation. `max_iterations` is raised to 1 if 0.
    pub fn new(error_log: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            error_log: error_log.into(),
            error_type: ErrorType::Unknown,
            error_summary: String::new(),
            affected_components: Vec::new(),
            severity: Severity::Unknown,
            immediate_actions: Vec::new(),
            search_queries: Vec::new(),
            research_findings: Vec::new(),
            relevant_docs: Vec::new(),
            research_confidence: String::new(),
            files_to_check: Vec::new(),
            code_context: String::new(),
            proposed_solution: String::new(),
            solution_confidence: 0.0,
            solution_steps: Vec::new(),
            code_changes: String::new(),
            iterations: 0,
            max_iterations: max_iterations.max(1),
            needs_human_approval: false,
            pending_action: String::new(),
            messages: Vec::new(),
            status: Status::Investigating,
        }
    }

    pub fn iterations_remaining(&self) -> bool {
        self.iterations < self.max_iterations
    }

    /// Merge a stage's update, replacing every field it populated.
    pub fn apply(&mut self, update: StateUpdate) {
        let StateUpdate {
            error_type,
            error_summary,
            affected_components,
            severity,
            immediate_actions,
            search_queries,
            research_findings,
            relevant_docs,
            research_confidence,
            files_to_check,
            code_context,
            proposed_solution,
            solution_confidence,
            solution_steps,
            code_changes,
            iterations,
            needs_human_approval,
            pending_action,
            messages,
            status,
        } = update;

        replace(&mut self.error_type, error_type);
        replace(&mut self.error_summary, error_summary);
        replace(&mut self.affected_components, affected_components);
        replace(&mut self.severity, severity);
        replace(&mut self.immediate_actions, immediate_actions);
        replace(&mut self.search_queries, search_queries);
        replace(&mut self.research_findings, research_findings);
        replace(&mut self.relevant_docs, relevant_docs);
        replace(&mut self.research_confidence, research_confidence);
        replace(&mut self.files_to_check, files_to_check);
        replace(&mut self.code_context, code_context);
        replace(&mut self.proposed_solution, proposed_solution);
        replace(&mut self.solution_confidence, solution_confidence);
        replace(&mut self.solution_steps, solution_steps);
        replace(&mut self.code_changes, code_changes);
        replace(&mut self.iterations, iterations);
        replace(&mut self.needs_human_approval, needs_human_approval);
        replace(&mut self.pending_action, pending_action);
        replace(&mut self.messages, messages);
        replace(&mut self.status, status);
    }
}

fn replace<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

/// Partial state produced by one stage execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub error_type: Option<ErrorType>,
    pub error_summary: Option<String>,
    pub affected_components: Option<Vec<String>>,
    pub severity: Option<Severity>,
    pub immediate_actions: Option<Vec<String>>,
    pub search_queries: Option<Vec<String>>,
    pub research_findings: Option<Vec<String>>,
    pub relevant_docs: Option<Vec<String>>,
    pub research_confidence: Option<String>,
    pub files_to_check: Option<Vec<String>>,
    pub code_context: Option<String>,
    pub proposed_solution: Option<String>,
    pub solution_confidence: Option<f64>,
    pub solution_steps: Option<Vec<String>>,
    pub code_changes: Option<String>,
    pub iterations: Option<u32>,
    pub needs_human_approval: Option<bool>,
    pub pending_action: Option<String>,
    pub messages: Option<Vec<String>>,
    pub status: Option<Status>,
}

impl StateUpdate {
    /// Start an update that records one audit-trail entry on top of the
    /// existing messages.
    pub fn with_message(state: &InvestigationState, entry: impl Into<String>) -> Self {
        let mut messages = state.messages.clone();
        messages.push(entry.into());
        Self {
            messages: Some(messages),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_has_defaults() {
        let state = InvestigationState::new("Connection refused", DEFAULT_MAX_ITERATIONS);
        assert_eq!(state.error_log, "Connection refused");
        assert_eq!(state.error_type, ErrorType::Unknown);
        assert_eq!(state.status, Status::Investigating);
        assert_eq!(state.iterations, 0);
        assert_eq!(state.max_iterations, 3);
        assert_eq!(state.solution_confidence, 0.0);
        assert!(state.messages.is_empty());
        assert!(!state.needs_human_approval);
    }

    #[test]
    fn custom_iteration_cap_is_kept_and_zero_is_raised() {
        assert_eq!(InvestigationState::new("e", 5).max_iterations, 5);
        assert_eq!(InvestigationState::new("e", 0).max_iterations, 1);
    }

    #[test]
    fn error_type_normalizes_model_output() {
        assert_eq!(ErrorType::normalize("database"), ErrorType::Database);
        assert_eq!(ErrorType::normalize(" [Code-Bug] "), ErrorType::CodeBug);
        assert_eq!(
            ErrorType::normalize("resource exhaustion"),
            ErrorType::ResourceExhaustion
        );
        assert_eq!(ErrorType::normalize("cosmic rays"), ErrorType::Unknown);
        assert_eq!(ErrorType::normalize(""), ErrorType::Unknown);
    }

    #[test]
    fn severity_normalizes() {
        assert_eq!(Severity::normalize("[High]"), Severity::High);
        assert_eq!(Severity::normalize("apocalyptic"), Severity::Unknown);
    }

    #[test]
    fn apply_replaces_only_populated_fields() {
        let mut state = InvestigationState::new("boom", 3);
        state.error_summary = "kept".to_string();

        let mut update = StateUpdate::with_message(&state, "[Test] ran");
        update.status = Some(Status::Researching);
        update.search_queries = Some(vec!["q1".to_string()]);
        state.apply(update);

        assert_eq!(state.error_summary, "kept");
        assert_eq!(state.status, Status::Researching);
        assert_eq!(state.search_queries, vec!["q1"]);
        assert_eq!(state.messages, vec!["[Test] ran"]);

        let update = StateUpdate::with_message(&state, "[Test] again");
        state.apply(update);
        assert_eq!(state.messages.len(), 2);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&Status::AwaitingApproval).unwrap();
        assert_eq!(json, "\"awaiting_approval\"");
        let json = serde_json::to_string(&ErrorType::CodeBug).unwrap();
        assert_eq!(json, "\"code_bug\"");
    }
}
