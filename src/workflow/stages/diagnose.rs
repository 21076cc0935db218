use super::{trail_entry, StageContext};
use crate::error::CollaboratorError;
use crate::extract::{extract, Extraction};
use crate::llm::prompts;
use crate::state::{ErrorType, InvestigationState, Severity, StateUpdate, Status};
use crate::workflow::Stage;

/// Queries carried into Research.
pub const MAX_SEARCH_QUERIES: usize = 5;

const LABELS: &[&str] = &[
    "ERROR_TYPE",
    "ERROR_SUMMARY",
    "AFFECTED_COMPONENTS",
    "SEARCH_QUERIES",
    "FILES_TO_CHECK",
    "SEVERITY",
    "IMMEDIATE_ACTIONS",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnosis {
    pub error_type: ErrorType,
    pub error_summary: String,
    pub affected_components: Vec<String>,
    pub search_queries: Vec<String>,
    pub files_to_check: Vec<String>,
    pub severity: Severity,
    pub immediate_actions: Vec<String>,
}

impl Diagnosis {
    pub fn from_response(raw: &str) -> Self {
        let fields = extract(raw, LABELS);
        Self::from_extraction(&fields)
    }

    fn from_extraction(fields: &Extraction) -> Self {
        let mut search_queries = if fields.is_structured() && fields.get("search_keywords").is_some()
        {
            fields.list("search_keywords")
        } else {
            fields.list("search_queries")
        };
        search_queries.truncate(MAX_SEARCH_QUERIES);

        Self {
            error_type: ErrorType::normalize(&fields.text("error_type")),
            error_summary: fields
                .non_empty_text("error_summary")
                .unwrap_or_else(|| "N/A".to_string()),
            affected_components: fields.list("affected_components"),
            search_queries,
            files_to_check: fields.list("files_to_check"),
            severity: Severity::normalize(&fields.text("severity")),
            immediate_actions: fields.list("immediate_actions"),
        }
    }
}

pub async fn run(
    ctx: &StageContext<'_>,
    state: &InvestigationState,
) -> Result<StateUpdate, CollaboratorError> {
    let response = ctx
        .model
        .generate(
            &prompts::diagnose_prompt(&state.error_log),
            Some(prompts::DIAGNOSE_SYSTEM),
        )
        .await?;

    let diagnosis = Diagnosis::from_response(&response);
    tracing::info!(
        error_type = %diagnosis.error_type,
        severity = %diagnosis.severity,
        queries = diagnosis.search_queries.len(),
        "diagnosis complete"
    );

    let mut update =
        StateUpdate::with_message(state, trail_entry(Stage::Diagnose, &response, &[]));
    update.error_type = Some(diagnosis.error_type);
    update.error_summary = Some(diagnosis.error_summary);
    update.affected_components = Some(diagnosis.affected_components);
    update.search_queries = Some(diagnosis.search_queries);
    update.files_to_check = Some(diagnosis.files_to_check);
    update.severity = Some(diagnosis.severity);
    update.immediate_actions = Some(diagnosis.immediate_actions);
    update.status = Some(Status::Researching);
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_diagnosis_uses_native_lists() {
        let raw = r#"{"error_type": "database", "error_summary": "Pool exhausted",
            "affected_components": ["postgres", "api"],
            "search_keywords": ["q1", "q2", "q3", "q4", "q5", "q6"],
            "files_to_check": ["database.py"], "severity": "high",
            "immediate_actions": ["check pg_stat_activity"]}"#;
        let d = Diagnosis::from_response(raw);
        assert_eq!(d.error_type, ErrorType::Database);
        assert_eq!(d.error_summary, "Pool exhausted");
        assert_eq!(d.affected_components, vec!["postgres", "api"]);
        assert_eq!(d.search_queries.len(), MAX_SEARCH_QUERIES);
        assert_eq!(d.search_queries[0], "q1");
        assert_eq!(d.severity, Severity::High);
        assert_eq!(d.immediate_actions, vec!["check pg_stat_activity"]);
    }

    #[test]
    fn structured_diagnosis_accepts_search_queries_key() {
        let d = Diagnosis::from_response(r#"{"error_type": "network", "search_queries": ["a"]}"#);
        assert_eq!(d.search_queries, vec!["a"]);
    }

    #[test]
    fn labeled_diagnosis_splits_lists() {
        let raw = "ERROR_TYPE: [timeout]\nERROR_SUMMARY: Lambda ran out of time\n\
                   AFFECTED_COMPONENTS: lambda, rds\n\
                   SEARCH_QUERIES: lambda timeout rds, vpc cold start\n\
                   FILES_TO_CHECK: \"handler.py\", 'serverless.yml'\nSEVERITY: medium";
        let d = Diagnosis::from_response(raw);
        assert_eq!(d.error_type, ErrorType::Timeout);
        assert_eq!(d.affected_components, vec!["lambda", "rds"]);
        assert_eq!(d.search_queries, vec!["lambda timeout rds", "vpc cold start"]);
        assert_eq!(d.files_to_check, vec!["handler.py", "serverless.yml"]);
        assert_eq!(d.severity, Severity::Medium);
        assert!(d.immediate_actions.is_empty());
    }

    #[test]
    fn unrecognised_output_degrades_to_defaults() {
        let d = Diagnosis::from_response("I am not sure what happened here.");
        assert_eq!(d.error_type, ErrorType::Unknown);
        assert_eq!(d.error_summary, "N/A");
        assert!(d.search_queries.is_empty());
        assert!(d.files_to_check.is_empty());
        assert_eq!(d.severity, Severity::Unknown);
    }

    #[test]
    fn out_of_set_category_is_unknown() {
        let d = Diagnosis::from_response(r#"{"error_type": "solar_flare"}"#);
        assert_eq!(d.error_type, ErrorType::Unknown);
    }
}
