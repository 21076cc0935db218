//! Markdown incident report

use crate::state::InvestigationState;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};

/// `incident_report_<YYYYmmdd_HHMMSS>.md`
pub fn default_report_name(at: DateTime<Local>) -> String {
    format!("incident_report_{}.md", at.format("%Y%m%d_%H%M%S"))
}

fn or_na(text: &str) -> &str {
    if text.trim().is_empty() {
        "N/A"
    } else {
        text
    }
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "N/A\n".to_string();
    }
    items.iter().map(|item| format!("- {}\n", item)).collect()
}

pub fn render_markdown(state: &InvestigationState) -> String {
    let mut out = String::from("# Incident Investigation Report\n\n");

    out.push_str("## Error Summary\n");
    out.push_str(&format!("**Investigation:** {}  \n", state.id));
    out.push_str(&format!("**Type:** {}  \n", state.error_type));
    out.push_str(&format!("**Severity:** {}  \n", state.severity));
    out.push_str(&format!("**Status:** {}  \n", state.status));
    out.push_str(&format!(
        "**Confidence:** {:.0}%  \n",
        state.solution_confidence * 100.0
    ));
    out.push_str(&format!("**Iterations:** {}\n\n", state.iterations));

    out.push_str(&format!(
        "## Original Error\n```\n{}\n```\n\n",
        state.error_log.trim_end()
    ));
    out.push_str(&format!("## Diagnosis\n{}\n\n", or_na(&state.error_summary)));

    let components = if state.affected_components.is_empty() {
        "N/A".to_string()
    } else {
        state.affected_components.join(", ")
    };
    out.push_str(&format!("## Affected Components\n{}\n\n", components));
    out.push_str(&format!(
        "## Immediate Actions\n{}\n",
        bullet_list(&state.immediate_actions)
    ));
    out.push_str(&format!(
        "## Proposed Solution\n{}\n\n",
        or_na(&state.proposed_solution)
    ));

    out.push_str("## Implementation Steps\n");
    for (i, step) in state.solution_steps.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, step));
    }

    if !state.code_changes.trim().is_empty() {
        out.push_str(&format!(
            "\n## Code Changes\n```\n{}\n```\n",
            state.code_changes.trim_end()
        ));
    }

    if state.needs_human_approval {
        let action = if state.pending_action.trim().is_empty() {
            "No details provided"
        } else {
            state.pending_action.as_str()
        };
        out.push_str(&format!("\n## Requires Human Approval\n{}\n", action));
    }

    out
}

/// Write the report to `path`, or to a timestamped file in the current
/// directory. Returns where it was written.
pub fn save_report(state: &InvestigationState, path: Option<&Path>) -> Result<PathBuf> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(default_report_name(Local::now())),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create report directory {}", parent.display()))?;
    }
    fs::write(&path, render_markdown(state))
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    tracing::info!(path = %path.display(), "report saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ErrorType, Status};
    use chrono::TimeZone;

    fn finished_state() -> InvestigationState {
        let mut state = InvestigationState::new("FATAL: too many connections", 3);
        state.error_type = ErrorType::Database;
        state.error_summary = "Connection pool exhausted".to_string();
        state.affected_components = vec!["postgres".to_string(), "api".to_string()];
        state.proposed_solution = "Raise max_connections".to_string();
        state.solution_steps = vec!["Edit postgresql.conf".to_string(), "Restart".to_string()];
        state.solution_confidence = 0.85;
        state.iterations = 2;
        state.status = Status::Complete;
        state
    }

    #[test]
    fn report_contains_core_sections() {
        let report = render_markdown(&finished_state());
        assert!(report.starts_with("# Incident Investigation Report\n"));
        assert!(report.contains("**Type:** database"));
        assert!(report.contains("**Confidence:** 85%"));
        assert!(report.contains("**Iterations:** 2"));
        assert!(report.contains("```\nFATAL: too many connections\n```"));
        assert!(report.contains("## Affected Components\npostgres, api"));
        assert!(report.contains("1. Edit postgresql.conf\n2. Restart\n"));
        assert!(!report.contains("## Code Changes"));
        assert!(!report.contains("## Requires Human Approval"));
    }

    #[test]
    fn approval_and_code_sections_appear_when_present() {
        let mut state = finished_state();
        state.code_changes = "File: a.py\nBefore:\nx\nAfter:\ny\n---".to_string();
        state.needs_human_approval = true;
        state.pending_action = "Restarts the database".to_string();
        let report = render_markdown(&state);
        assert!(report.contains("## Code Changes\n```\nFile: a.py"));
        assert!(report.contains("## Requires Human Approval\nRestarts the database\n"));
    }

    #[test]
    fn empty_fields_render_as_not_available() {
        let state = InvestigationState::new("boom", 3);
        let report = render_markdown(&state);
        assert!(report.contains("## Diagnosis\nN/A\n\n"));
        assert!(report.contains("## Affected Components\nN/A\n\n"));
        assert!(report.contains("## Immediate Actions\nN/A\n\n## Proposed Solution\nN/A\n\n"));
        assert!(report.ends_with("## Implementation Steps\n"));
    }

    #[test]
    fn default_name_is_timestamped() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(default_report_name(at), "incident_report_20240309_140507.md");
    }

    #[test]
    fn save_writes_to_requested_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("incident.md");
        let written = save_report(&finished_state(), Some(&path)).unwrap();
        assert_eq!(written, path);
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("Connection pool exhausted"));
    }
}
