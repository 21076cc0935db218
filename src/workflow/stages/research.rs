use super::{trail_entry, StageContext};
use crate::error::CollaboratorError;
use crate::extract::{extract, object_text, Extraction};
use crate::llm::prompts;
use crate::search::{self, SearchResult};
use crate::state::{InvestigationState, StateUpdate, Status};
use crate::workflow::progress::ProgressEvent;
use crate::workflow::Stage;
use futures::future::join_all;

const LABELS: &[&str] = &[
    "RELEVANT_FINDINGS",
    "COMMON_SOLUTIONS",
    "POTENTIAL_PITFALLS",
    "CONFIDENCE_LEVEL",
    "NEED_MORE_RESEARCH",
    "REFINED_QUERY",
];

/// What the model made of one batch of search results.
#[derive(Debug, Clone, PartialEq)]
pub struct ResearchReview {
    pub findings: Vec<String>,
    pub confidence: String,
    pub needs_more_research: bool,
    pub refined_query: String,
}

impl ResearchReview {
    pub fn from_response(raw: &str) -> Self {
        let fields = extract(raw, LABELS);
        if fields.is_structured() {
            Self::from_structured(&fields)
        } else {
            Self::from_labeled(&fields)
        }
    }

    fn from_structured(fields: &Extraction) -> Self {
        let solutions = fields
            .objects("relevant_solutions")
            .into_iter()
            .map(|s| {
                format!(
                    "- {} (Source: {}, Confidence: {})",
                    object_text(s, "solution_summary", ""),
                    object_text(s, "source_url", "unknown"),
                    object_text(s, "confidence", "unknown")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        Self {
            findings: vec![
                format!("Solutions:\n{}", solutions),
                format!("Common patterns: {}", fields.list("common_patterns").join(", ")),
                format!("Warnings: {}", fields.list("warnings").join(", ")),
            ],
            confidence: fields
                .non_empty_text("confidence")
                .or_else(|| fields.non_empty_text("confidence_level"))
                .unwrap_or_else(|| "unknown".to_string()),
            needs_more_research: fields.flag("needs_more_research").unwrap_or(false),
            refined_query: fields.text("refined_query"),
        }
    }

    fn from_labeled(fields: &Extraction) -> Self {
        let findings = ["relevant_findings", "common_solutions", "potential_pitfalls"]
            .iter()
            .filter_map(|key| fields.non_empty_text(key))
            .collect();
        Self {
            findings,
            confidence: fields
                .non_empty_text("confidence_level")
                .unwrap_or_else(|| "unknown".to_string()),
            needs_more_research: fields.flag("need_more_research").unwrap_or(false),
            refined_query: fields.text("refined_query"),
        }
    }
}

/// Run every query, keeping each outcome in its query's slot.
async fn gather(
    ctx: &StageContext<'_>,
    queries: &[String],
) -> (Vec<String>, Vec<String>) {
    let domains = ctx.settings.search_domains.as_slice();
    let domains = (!domains.is_empty()).then_some(domains);
    let outcomes = join_all(queries.iter().map(|query| {
        ctx.search
            .search(query, ctx.settings.search_results_per_query, domains)
    }))
    .await;

    let mut entries = Vec::new();
    let mut notes = Vec::new();
    for (query, outcome) in queries.iter().zip(outcomes) {
        match outcome {
            Ok(results) => {
                tracing::debug!(query = %query, count = results.len(), "search results");
                entries.extend(results.iter().map(SearchResult::render));
            }
            Err(err) => {
                tracing::warn!(query = %query, error = %err, "search failed");
                ctx.progress.emit(ProgressEvent::SearchFailed {
                    query: query.clone(),
                    reason: err.to_string(),
                });
                let note = search::failure_note(query, &err);
                notes.push(note.clone());
                entries.push(note);
            }
        }
    }
    (entries, notes)
}

pub async fn run(
    ctx: &StageContext<'_>,
    state: &InvestigationState,
) -> Result<StateUpdate, CollaboratorError> {
    let (entries, notes) = gather(ctx, &state.search_queries).await;
    let search_text = search::join_rendered(&entries);

    let response = ctx
        .model
        .generate(
            &prompts::research_prompt(state, &search_text),
            Some(prompts::RESEARCH_SYSTEM),
        )
        .await?;
    let review = ResearchReview::from_response(&response);

    let iterations = state.iterations + 1;
    let mut findings = state.research_findings.clone();
    findings.extend(review.findings);

    let mut update =
        StateUpdate::with_message(state, trail_entry(Stage::Research, &response, &notes));
    update.research_findings = Some(findings);
    update.research_confidence = Some(review.confidence);
    update.iterations = Some(iterations);

    let refined = review.refined_query.trim();
    if review.needs_more_research && !refined.is_empty() && iterations < state.max_iterations {
        tracing::info!(
            iteration = iterations,
            max = state.max_iterations,
            refined_query = %refined,
            "more research requested"
        );
        update.search_queries = Some(vec![refined.to_string()]);
        update.status = Some(Status::Researching);
    } else {
        tracing::info!(iterations, "research complete");
        update.relevant_docs = Some(vec![search_text]);
        update.status = Some(Status::Auditing);
    }
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_review_attributes_sources() {
        let raw = r#"{"relevant_solutions": [
            {"solution_summary": "Increase pool size", "source_url": "https://so/1", "confidence": "high"},
            {"solution_summary": "Close idle connections"}],
            "common_patterns": ["leaked connections", "low max_connections"],
            "warnings": [], "confidence": "medium",
            "needs_more_research": true, "refined_query": "pgbouncer pool_mode"}"#;
        let review = ResearchReview::from_response(raw);
        assert_eq!(
            review.findings[0],
            "Solutions:\n- Increase pool size (Source: https://so/1, Confidence: high)\n\
             - Close idle connections (Source: unknown, Confidence: unknown)"
        );
        assert_eq!(
            review.findings[1],
            "Common patterns: leaked connections, low max_connections"
        );
        assert_eq!(review.findings[2], "Warnings: ");
        assert_eq!(review.confidence, "medium");
        assert!(review.needs_more_research);
        assert_eq!(review.refined_query, "pgbouncer pool_mode");
    }

    #[test]
    fn null_refined_query_is_empty() {
        let review =
            ResearchReview::from_response(r#"{"needs_more_research": false, "refined_query": null}"#);
        assert!(!review.needs_more_research);
        assert_eq!(review.refined_query, "");
    }

    #[test]
    fn labeled_review_reads_flag_by_first_word() {
        let raw = "RELEVANT_FINDINGS: Raise the timeout\nCOMMON_SOLUTIONS: Use RDS proxy\n\
                   CONFIDENCE_LEVEL: low\nNEED_MORE_RESEARCH: yes - the VPC angle is unexplored\n\
                   REFINED_QUERY: lambda vpc rds timeout";
        let review = ResearchReview::from_response(raw);
        assert_eq!(review.findings, vec!["Raise the timeout", "Use RDS proxy"]);
        assert_eq!(review.confidence, "low");
        assert!(review.needs_more_research);
        assert_eq!(review.refined_query, "lambda vpc rds timeout");
    }

    #[test]
    fn unlabeled_text_never_requests_more_research() {
        let review = ResearchReview::from_response("Nothing useful came back.");
        assert!(review.findings.is_empty());
        assert!(!review.needs_more_research);
        assert_eq!(review.confidence, "unknown");
    }
}
