//! Prompt templates for each workflow stage
//!
//! Every stage asks for a JSON object first. The labeled field names listed
//! in each template's fallback section are what the extractor scans for when
//! the model ignores the JSON instruction.

use crate::state::InvestigationState;

pub const DIAGNOSE_SYSTEM: &str = r#"You are an on-call site reliability engineer triaging a production failure. You read error logs and stack traces and decide which category of failure they describe, which components are involved, and what to look at first.

You are comfortable with databases (PostgreSQL, MySQL, MongoDB, Redis), containers and orchestration (Docker, Kubernetes), cloud platforms (AWS, GCP, Azure), web frameworks, message queues, networking and authentication systems.

Be concrete. Prefer specific component names over generic ones."#;

pub const DIAGNOSE_USER: &str = r#"Triage this error log.

ERROR LOG:
```
{error_log}
```

Respond with a single JSON object:
{
  "error_type": "database|network|authentication|configuration|code_bug|dependency|resource_exhaustion|permission|timeout|unknown",
  "error_summary": "one sentence in plain English",
  "affected_components": ["component", "..."],
  "search_keywords": ["2-3 specific search queries for documentation or Q&A sites"],
  "files_to_check": ["file name patterns that may hold the fault, e.g. docker-compose.yml"],
  "severity": "low|medium|high|critical",
  "immediate_actions": ["quick check", "..."]
}

If you cannot produce JSON, answer with these labeled lines instead:
ERROR_TYPE, ERROR_SUMMARY, AFFECTED_COMPONENTS, SEARCH_QUERIES, FILES_TO_CHECK, SEVERITY, IMMEDIATE_ACTIONS
(comma-separated values for lists)."#;

pub const RESEARCH_SYSTEM: &str = r#"You are a technical researcher. You read search results about a software failure and pull out what actually fixes it.

Report solutions rather than restating the problem. Note where several sources agree, call out caveats, and prefer official documentation over forum answers when they conflict."#;

pub const RESEARCH_USER: &str = r#"Summarize what these search results say about the failure below.

ERROR SUMMARY:
{error_summary}

ERROR TYPE: {error_type}

SEARCH RESULTS:
{search_results}

Respond with a single JSON object:
{
  "relevant_solutions": [
    {"solution_summary": "what to do", "source_url": "where it came from", "confidence": "low|medium|high"}
  ],
  "common_patterns": ["pattern seen in several sources"],
  "warnings": ["pitfall to avoid"],
  "confidence": "low|medium|high",
  "needs_more_research": false,
  "refined_query": "a narrower query when more research is needed, otherwise null"
}

If you cannot produce JSON, answer with these labeled lines instead:
RELEVANT_FINDINGS, COMMON_SOLUTIONS, POTENTIAL_PITFALLS, CONFIDENCE_LEVEL, NEED_MORE_RESEARCH (yes|no), REFINED_QUERY"#;

pub const AUDIT_SYSTEM: &str = r#"You are a senior engineer reviewing code for the cause of a specific failure.

Look for wrong configuration values (hosts, ports, credentials), logic errors that could raise the reported error, missing error handling, leaked resources such as unclosed connections, and version or compatibility mismatches."#;

pub const AUDIT_USER: &str = r#"Review these files in light of the failure being investigated.

ERROR SUMMARY:
{error_summary}

ERROR TYPE: {error_type}

RESEARCH FINDINGS:
{research_findings}

CODE FILES:
{code_context}

Answer in prose with these sections:
LIKELY_CAUSE: the most probable cause given the code and the error
PROBLEMATIC_SECTIONS: quote the lines or blocks involved
MISSING_ELEMENTS: absent error handling, configuration or logic
CODE_QUALITY_NOTES: anything else worth fixing"#;

pub const SOLVE_SYSTEM: &str = r#"You are a senior DevOps engineer writing the fix for an incident.

Your fix must be specific enough to carry out, safe (flag anything destructive), and explained well enough that the reader understands what changes and why. Consider downtime, rollback and security impact."#;

pub const SOLVE_USER: &str = r#"Propose a fix based on the whole investigation.

ERROR SUMMARY:
{error_summary}

ERROR TYPE:
{error_type}

RESEARCH FINDINGS:
{research_findings}

CODE ANALYSIS:
{code_analysis}

Respond with a single JSON object:
{
  "root_cause": "one paragraph",
  "solution_summary": "what needs to be done",
  "confidence_score": 0.0,
  "step_by_step": ["first step", "second step"],
  "executable_commands": ["command"],
  "file_changes": [
    {"file_path": "path", "description": "what changes", "before": "old text", "after": "new text"}
  ],
  "requires_approval": false,
  "approval_reason": "why approval is needed, or null",
  "prevention": "how to avoid a repeat",
  "verification": "how to confirm the fix"
}

confidence_score is between 0.0 and 1.0. Set requires_approval to true for destructive or risky operations.

If you cannot produce JSON, answer with these labeled lines instead:
DIAGNOSIS_SUMMARY, SOLUTION_CONFIDENCE, PROPOSED_SOLUTION, STEP_BY_STEP (numbered lines), CODE_CHANGES, COMMANDS_TO_RUN, REQUIRES_APPROVAL (yes|no), APPROVAL_REASON, PREVENTION, VERIFICATION"#;

pub const EXPLAIN_SYSTEM: &str = r#"You explain incident investigations to engineers who were not on call.

Write in plain sentences and short paragraphs. Say what broke, why, and what the fix does. Do not repeat raw logs."#;

/// Substitute `{name}` placeholders in one pass, so substituted text is never
/// rescanned. Unknown placeholders are left intact.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let hit = values.iter().find_map(|(name, value)| {
            let key = format!("{{{}}}", name);
            tail.starts_with(&key).then(|| (key.len(), *value))
        });
        match hit {
            Some((len, value)) => {
                out.push_str(value);
                rest = &tail[len..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn diagnose_prompt(error_log: &str) -> String {
    fill(DIAGNOSE_USER, &[("error_log", error_log)])
}

pub fn research_prompt(state: &InvestigationState, search_results: &str) -> String {
    fill(
        RESEARCH_USER,
        &[
            ("error_summary", state.error_summary.as_str()),
            ("error_type", state.error_type.as_str()),
            ("search_results", search_results),
        ],
    )
}

pub fn audit_prompt(state: &InvestigationState, code_context: &str) -> String {
    fill(
        AUDIT_USER,
        &[
            ("error_summary", state.error_summary.as_str()),
            ("error_type", state.error_type.as_str()),
            ("research_findings", state.research_findings.join("\n").as_str()),
            ("code_context", code_context),
        ],
    )
}

pub fn solve_prompt(state: &InvestigationState) -> String {
    let code_analysis = if state.code_context.trim().is_empty() {
        "No code analysis available"
    } else {
        state.code_context.as_str()
    };
    fill(
        SOLVE_USER,
        &[
            ("error_summary", state.error_summary.as_str()),
            ("error_type", state.error_type.as_str()),
            ("research_findings", state.research_findings.join("\n").as_str()),
            ("code_analysis", code_analysis),
        ],
    )
}

pub fn explain_prompt(state: &InvestigationState) -> String {
    let steps = state
        .solution_steps
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{}. {}", i + 1, step))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Explain this investigation to a teammate.\n\n\
         ERROR TYPE: {}\n\
         SUMMARY: {}\n\n\
         PROPOSED SOLUTION:\n{}\n\n\
         STEPS:\n{}\n\n\
         Cover what went wrong, why the fix should work and what to watch for afterwards.",
        state.error_type,
        state.error_summary,
        state.proposed_solution,
        if steps.is_empty() { "(none)" } else { steps.as_str() }
    )
}
