use super::{trail_entry, StageContext};
use crate::error::CollaboratorError;
use crate::extract::{extract, object_text, strip_thinking, Extraction};
use crate::llm::prompts;
use crate::state::{InvestigationState, StateUpdate, Status};
use crate::workflow::Stage;
use regex::Regex;
use std::sync::OnceLock;

/// Used when the model gives no usable confidence.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;
/// Below this a delivered solution is logged as weak.
const WEAK_CONFIDENCE: f64 = 0.4;
const DEFAULT_APPROVAL_REASON: &str = "Review the proposed solution before applying it.";

const LABELS: &[&str] = &[
    "DIAGNOSIS_SUMMARY",
    "SOLUTION_CONFIDENCE",
    "PROPOSED_SOLUTION",
    "STEP_BY_STEP",
    "CODE_CHANGES",
    "COMMANDS_TO_RUN",
    "REQUIRES_APPROVAL",
    "APPROVAL_REASON",
    "PREVENTION",
    "VERIFICATION",
];

fn numbered_step_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+\.\s*(.+)").expect("valid regex"))
}

fn leading_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?\s*%?").expect("valid regex"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub file_path: String,
    pub description: String,
    pub before: String,
    pub after: String,
}

/// Solver output normalised from either extraction tier.
#[derive(Debug, Clone, PartialEq)]
pub struct SolutionPlan {
    pub root_cause: String,
    pub summary: String,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub steps: Vec<String>,
    pub commands: Vec<String>,
    pub file_changes: Vec<FileChange>,
    /// Free-form code changes when no before/after pairs were given.
    pub code_changes_text: String,
    pub requires_approval: bool,
    pub approval_reason: String,
    pub prevention: String,
    pub verification: String,
}

/// Clamp into `[0, 1]`; missing or non-finite values become the default.
pub fn clamp_confidence(value: Option<f64>) -> f64 {
    match value {
        Some(v) if v.is_finite() => v.clamp(0.0, 1.0),
        _ => DEFAULT_CONFIDENCE,
    }
}

/// First number in free text; `85%` reads as 0.85.
fn leading_number(text: &str) -> Option<f64> {
    let found = leading_number_re().find(text)?.as_str().trim();
    match found.strip_suffix('%') {
        Some(percent) => percent.trim().parse::<f64>().ok().map(|p| p / 100.0),
        None => found.parse().ok(),
    }
}

/// Drop code-fence lines from a labeled block.
fn strip_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn command_lines(text: &str) -> Vec<String> {
    strip_fences(text)
        .lines()
        .map(|line| line.trim().trim_start_matches("$ ").trim().to_string())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}

impl SolutionPlan {
    pub fn from_response(raw: &str) -> Self {
        let fields = extract(raw, LABELS);
        if fields.is_structured() {
            Self::from_structured(&fields)
        } else {
            Self::from_labeled(&fields)
        }
    }

    fn from_structured(fields: &Extraction) -> Self {
        let file_changes = fields
            .objects("file_changes")
            .into_iter()
            .map(|fc| FileChange {
                file_path: object_text(fc, "file_path", "unknown"),
                description: object_text(fc, "description", ""),
                before: object_text(fc, "before", ""),
                after: object_text(fc, "after", ""),
            })
            .collect();

        Self {
            root_cause: fields.text("root_cause"),
            summary: fields.text("solution_summary"),
            confidence: clamp_confidence(
                fields
                    .number("confidence_score")
                    .or_else(|| leading_number(&fields.text("confidence_score"))),
            ),
            steps: fields.list("step_by_step"),
            commands: fields.list("executable_commands"),
            file_changes,
            code_changes_text: String::new(),
            requires_approval: fields.flag("requires_approval").unwrap_or(false),
            approval_reason: fields.text("approval_reason"),
            prevention: fields.text("prevention"),
            verification: fields.text("verification"),
        }
    }

    fn from_labeled(fields: &Extraction) -> Self {
        let steps = numbered_step_re()
            .captures_iter(&fields.text("step_by_step"))
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            root_cause: fields.text("diagnosis_summary"),
            summary: fields.text("proposed_solution"),
            confidence: clamp_confidence(leading_number(&fields.text("solution_confidence"))),
            steps,
            commands: command_lines(&fields.text("commands_to_run")),
            file_changes: Vec::new(),
            code_changes_text: strip_fences(&fields.text("code_changes")),
            requires_approval: fields.flag("requires_approval").unwrap_or(false),
            approval_reason: fields.text("approval_reason"),
            prevention: fields.text("prevention"),
            verification: fields.text("verification"),
        }
    }

    /// Human-readable solution. Same plan, same text.
    pub fn render(&self) -> String {
        let mut parts: Vec<String> = vec![
            self.root_cause.clone(),
            String::new(),
            self.summary.clone(),
            String::new(),
        ];

        if !self.steps.is_empty() {
            parts.push("Steps:".to_string());
            for (i, step) in self.steps.iter().enumerate() {
                parts.push(format!("  {}. {}", i + 1, step));
            }
            parts.push(String::new());
        }

        if !self.commands.is_empty() {
            parts.push("Commands to run:".to_string());
            for cmd in &self.commands {
                parts.push(format!("  $ {}", cmd));
            }
            parts.push(String::new());
        }

        if !self.file_changes.is_empty() {
            parts.push("File changes:".to_string());
            for fc in &self.file_changes {
                parts.push(format!("  - {}: {}", fc.file_path, fc.description));
            }
            parts.push(String::new());
        }

        if !self.prevention.is_empty() {
            parts.push(format!("Prevention: {}", self.prevention));
        }
        if !self.verification.is_empty() {
            parts.push(format!("Verification: {}", self.verification));
        }

        parts.join("\n")
    }

    /// Before/after pairs, or the free-form block when there are none.
    pub fn render_code_changes(&self) -> String {
        let pairs: Vec<String> = self
            .file_changes
            .iter()
            .filter(|fc| !fc.before.is_empty() && !fc.after.is_empty())
            .map(|fc| {
                format!(
                    "File: {}\nBefore:\n{}\nAfter:\n{}\n---",
                    fc.file_path, fc.before, fc.after
                )
            })
            .collect();
        if pairs.is_empty() {
            self.code_changes_text.clone()
        } else {
            pairs.join("\n")
        }
    }

    fn is_blank(&self) -> bool {
        self.root_cause.is_empty()
            && self.summary.is_empty()
            && self.steps.is_empty()
            && self.commands.is_empty()
            && self.file_changes.is_empty()
    }
}

pub async fn run(
    ctx: &StageContext<'_>,
    state: &InvestigationState,
) -> Result<StateUpdate, CollaboratorError> {
    let response = ctx
        .model
        .generate(&prompts::solve_prompt(state), Some(prompts::SOLVE_SYSTEM))
        .await?;
    let plan = SolutionPlan::from_response(&response);

    let proposed_solution = if plan.is_blank() {
        strip_thinking(&response).trim().to_string()
    } else {
        plan.render()
    };

    let pending_action = if plan.requires_approval && plan.approval_reason.is_empty() {
        DEFAULT_APPROVAL_REASON.to_string()
    } else {
        plan.approval_reason.clone()
    };

    let status = if plan.requires_approval {
        tracing::warn!("solution requires human approval");
        Status::AwaitingApproval
    } else {
        if plan.confidence < WEAK_CONFIDENCE {
            tracing::warn!(confidence = plan.confidence, "low-confidence solution");
        }
        Status::Complete
    };
    tracing::info!(confidence = plan.confidence, steps = plan.steps.len(), "solution proposed");

    let mut update = StateUpdate::with_message(state, trail_entry(Stage::Solve, &response, &[]));
    update.proposed_solution = Some(proposed_solution);
    update.solution_confidence = Some(plan.confidence);
    update.code_changes = Some(plan.render_code_changes());
    update.needs_human_approval = Some(plan.requires_approval);
    update.pending_action = Some(pending_action);
    update.solution_steps = Some(plan.steps);
    update.status = Some(status);
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRUCTURED: &str = r#"{
        "root_cause": "The pool is capped at 10 connections.",
        "solution_summary": "Raise the pool size and add pgbouncer.",
        "confidence_score": 0.85,
        "step_by_step": ["Edit settings.py", "Restart the API"],
        "executable_commands": ["systemctl restart api"],
        "file_changes": [
            {"file_path": "settings.py", "description": "raise pool", "before": "POOL=10", "after": "POOL=50"},
            {"file_path": "README.md", "description": "document"}
        ],
        "requires_approval": true,
        "approval_reason": "Restarts production API",
        "prevention": "Alert on pool saturation",
        "verification": "Watch pg_stat_activity"
    }"#;

    #[test]
    fn structured_plan_renders_deterministically() {
        let plan = SolutionPlan::from_response(STRUCTURED);
        assert_eq!(plan.confidence, 0.85);
        assert!(plan.requires_approval);
        let expected = "The pool is capped at 10 connections.\n\
                        \n\
                        Raise the pool size and add pgbouncer.\n\
                        \n\
                        Steps:\n  1. Edit settings.py\n  2. Restart the API\n\
                        \n\
                        Commands to run:\n  $ systemctl restart api\n\
                        \n\
                        File changes:\n  - settings.py: raise pool\n  - README.md: document\n\
                        \n\
                        Prevention: Alert on pool saturation\n\
                        Verification: Watch pg_stat_activity";
        assert_eq!(plan.render(), expected);
        assert_eq!(plan.render(), SolutionPlan::from_response(STRUCTURED).render());
    }

    #[test]
    fn code_changes_keep_only_complete_pairs() {
        let plan = SolutionPlan::from_response(STRUCTURED);
        assert_eq!(
            plan.render_code_changes(),
            "File: settings.py\nBefore:\nPOOL=10\nAfter:\nPOOL=50\n---"
        );
    }

    #[test]
    fn labeled_plan_parses_numbered_steps_and_commands() {
        let raw = "DIAGNOSIS_SUMMARY: Container exceeds its memory limit.\n\
                   SOLUTION_CONFIDENCE: 0.7 (fairly sure)\n\
                   PROPOSED_SOLUTION: Raise the limit.\n\
                   STEP_BY_STEP:\n1. Edit compose file\n2. Redeploy\n\
                   CODE_CHANGES:\n```\n-  mem_limit 512m\n+  mem_limit 1g\n```\n\
                   COMMANDS_TO_RUN:\n```bash\n$ docker compose up -d\n```\n\
                   REQUIRES_APPROVAL: no\n\
                   PREVENTION: Add memory alerts";
        let plan = SolutionPlan::from_response(raw);
        assert_eq!(plan.root_cause, "Container exceeds its memory limit.");
        assert_eq!(plan.confidence, 0.7);
        assert_eq!(plan.steps, vec!["Edit compose file", "Redeploy"]);
        assert_eq!(plan.commands, vec!["docker compose up -d"]);
        assert_eq!(
            plan.render_code_changes(),
            "-  mem_limit 512m\n+  mem_limit 1g"
        );
        assert!(!plan.requires_approval);
        assert!(plan.render().contains("Prevention: Add memory alerts"));
    }

    #[test]
    fn confidence_is_clamped_or_defaulted() {
        assert_eq!(clamp_confidence(Some(1.7)), 1.0);
        assert_eq!(clamp_confidence(Some(-0.2)), 0.0);
        assert_eq!(clamp_confidence(Some(f64::NAN)), DEFAULT_CONFIDENCE);
        assert_eq!(clamp_confidence(None), DEFAULT_CONFIDENCE);
        assert_eq!(leading_number("85%"), Some(0.85));

        let plan = SolutionPlan::from_response(r#"{"confidence_score": "very high"}"#);
        assert_eq!(plan.confidence, DEFAULT_CONFIDENCE);
        let plan = SolutionPlan::from_response("SOLUTION_CONFIDENCE: unsure");
        assert_eq!(plan.confidence, DEFAULT_CONFIDENCE);
    }
}
