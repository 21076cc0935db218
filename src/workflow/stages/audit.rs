use super::{trail_entry, StageContext};
use crate::error::CollaboratorError;
use crate::llm::prompts;
use crate::sandbox::format_file_content;
use crate::state::{InvestigationState, StateUpdate, Status};
use crate::workflow::progress::ProgressEvent;
use crate::workflow::Stage;
use std::collections::HashSet;
use std::path::PathBuf;

/// Stands in for the file section when nothing could be read.
pub const NO_FILES_SENTINEL: &str = "No relevant code files found or accessible.";

/// Globs tried for one model-supplied file pattern: the exact name anywhere,
/// then any path containing it.
pub fn globs_for(pattern: &str) -> Vec<String> {
    vec![format!("**/{}", pattern), format!("**/*{}*", pattern)]
}

fn clean_pattern(raw: &str) -> Option<&str> {
    let trimmed = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim_start_matches("./")
        .trim_start_matches('/');
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Read up to `files_per_pattern` matches per pattern. Failures are reported
/// and skipped; the returned notes describe them.
fn collect_code_context(ctx: &StageContext<'_>, patterns: &[String]) -> (String, Vec<String>) {
    let mut context = String::new();
    let mut notes = Vec::new();
    let mut seen: HashSet<PathBuf> = HashSet::new();

    let skip = |path: String, reason: String, notes: &mut Vec<String>| {
        tracing::warn!(path = %path, reason = %reason, "skipping file");
        notes.push(format!("Skipped {}: {}", path, reason));
        ctx.progress.emit(ProgressEvent::FileSkipped { path, reason });
    };

    for pattern in patterns.iter().filter_map(|p| clean_pattern(p)) {
        let matches = match ctx.files.find_files(&globs_for(pattern)) {
            Ok(matches) => matches,
            Err(err) => {
                skip(pattern.to_string(), err.to_string(), &mut notes);
                continue;
            }
        };
        if matches.is_empty() {
            tracing::debug!(pattern, "no files matched");
        }

        for path in matches.into_iter().take(ctx.settings.files_per_pattern) {
            if !seen.insert(path.clone()) {
                continue;
            }
            match ctx.files.read_file(&path) {
                Ok(file) => {
                    tracing::debug!(path = %path.display(), lines = file.line_count, "read file");
                    context.push_str(&format_file_content(&file));
                }
                Err(err) => skip(path.display().to_string(), err.to_string(), &mut notes),
            }
        }
    }

    (context, notes)
}

pub async fn run(
    ctx: &StageContext<'_>,
    state: &InvestigationState,
) -> Result<StateUpdate, CollaboratorError> {
    let (mut code_context, notes) = collect_code_context(ctx, &state.files_to_check);
    if code_context.is_empty() {
        tracing::warn!("no code files found to audit");
        code_context = NO_FILES_SENTINEL.to_string();
    }

    let response = ctx
        .model
        .generate(
            &prompts::audit_prompt(state, &code_context),
            Some(prompts::AUDIT_SYSTEM),
        )
        .await?;

    let mut update = StateUpdate::with_message(state, trail_entry(Stage::Audit, &response, &notes));
    update.code_context = Some(format!("{}\n\n[Analysis]\n{}", code_context, response));
    update.status = Some(Status::Solving);
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_expands_to_exact_and_substring_globs() {
        assert_eq!(globs_for("settings.py"), vec!["**/settings.py", "**/*settings.py*"]);
    }

    #[test]
    fn patterns_are_cleaned() {
        assert_eq!(clean_pattern(" \"./config/db.yml\" "), Some("config/db.yml"));
        assert_eq!(clean_pattern("''"), None);
        assert_eq!(clean_pattern("/etc/hosts"), Some("etc/hosts"));
    }
}
