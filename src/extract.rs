//! Structured field extraction from free-form model output
//!
//! Model responses are unreliable input. Extraction is two-tiered:
//!
//! 1. Structured: take the span from the first `{` to the last `}` and decode
//!    it as a JSON object. Only when that fails is the span retried after
//!    each `<thinking>` block, then with thinking blocks and code fences
//!    removed. Markers inside string values survive a clean decode.
//! 2. Labeled: if no object decodes, scan for `FIELD: value` lines, where a
//!    value runs until the next `WORD:` label or the end of the text.
//!
//! Neither tier fails. The worst case is an empty mapping (structured) or
//! empty-string values for every requested label (labeled).

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Which tier produced an [`Extraction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionTier {
    Structured,
    Labeled,
}

/// Field mapping recovered from a model response.
///
/// Structured extractions keep native JSON types. Labeled extractions hold
/// one lower-cased key per requested label, each a JSON string.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub tier: ExtractionTier,
    pub fields: Map<String, Value>,
}

fn thinking_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<thinking>.*?</thinking>").expect("valid regex"))
}

fn json_fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```json\s*").expect("valid regex"))
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```\s*").expect("valid regex"))
}

fn label_boundary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\n[A-Z_]+:").expect("valid regex"))
}

/// Run both tiers in order. `labels` are the field names the labeled tier
/// looks for (e.g. `ERROR_TYPE`).
pub fn extract(raw: &str, labels: &[&str]) -> Extraction {
    match extract_json_object(raw) {
        Some(fields) => Extraction {
            tier: ExtractionTier::Structured,
            fields,
        },
        None => Extraction {
            tier: ExtractionTier::Labeled,
            fields: extract_labeled_fields(raw, labels),
        },
    }
}

/// Remove `<thinking>...</thinking>` reasoning blocks (non-greedy, multi-line).
pub fn strip_thinking(text: &str) -> String {
    thinking_re().replace_all(text, "").into_owned()
}

/// Remove code fence markers wherever they appear.
fn strip_markdown_fences(text: &str) -> String {
    let without_json = json_fence_re().replace_all(text, "");
    fence_re().replace_all(&without_json, "").into_owned()
}

/// Extract a JSON fragment between the first `open` and the last `close`
fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if start < end {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// Try to fix common JSON issues from LLM responses
fn fix_json_issues(json: &str) -> String {
    let mut fixed = json.to_string();

    // Remove trailing commas before ] or }
    fixed = fixed.replace(",]", "]");
    fixed = fixed.replace(",}", "}");

    // Smart quotes to regular quotes
    fixed = fixed.replace(['\u{201C}', '\u{201D}'], "\"");
    fixed = fixed.replace(['\u{2018}', '\u{2019}'], "'");

    fixed
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

fn decode_object(json: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(json) {
        Ok(Value::Object(map)) if !map.is_empty() => Some(map),
        _ => None,
    }
}

/// Structured tier. Returns `None` when no non-empty JSON object decodes.
pub fn extract_json_object(raw: &str) -> Option<Map<String, Value>> {
    let direct = extract_json_fragment(raw, '{', '}').and_then(decode_object);
    if direct.is_some() {
        return direct;
    }

    // Reasoning blocks ahead of the answer can hold stray braces.
    let after_thinking = thinking_re().find_iter(raw).find_map(|m| {
        extract_json_fragment(&raw[m.end()..], '{', '}').and_then(decode_object)
    });
    if after_thinking.is_some() {
        return after_thinking;
    }

    let cleaned = strip_markdown_fences(&strip_thinking(raw));
    let fragment = extract_json_fragment(&cleaned, '{', '}')?;
    decode_object(fragment).or_else(|| {
        let fixed = fix_json_issues(fragment);
        if fixed != fragment {
            decode_object(&fixed)
        } else {
            None
        }
    })
}

/// Labeled tier. Every requested label yields a lower-cased key; labels that
/// are not present map to an empty string.
pub fn extract_labeled_fields(raw: &str, labels: &[&str]) -> Map<String, Value> {
    labels
        .iter()
        .map(|label| {
            let value = find_labeled_value(raw, label).unwrap_or_default();
            (label.to_lowercase(), Value::String(value))
        })
        .collect()
}

fn find_labeled_value(text: &str, label: &str) -> Option<String> {
    let pattern = format!(r"(?i){}:[ \t]*", regex::escape(label));
    let label_re = Regex::new(&pattern).ok()?;
    let found = label_re.find(text)?;
    let rest = &text[found.end()..];

    let end = label_boundary_re()
        .find(rest)
        .map(|m| m.start())
        .unwrap_or(rest.len());

    let value = rest[..end].trim();
    let value = value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .unwrap_or(value);
    Some(value.to_string())
}

/// Split a comma-separated free-text list, trimming each entry and dropping
/// surrounding quotes and empty entries.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().trim_matches(|c| c == '"' || c == '\'').trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => value.to_string(),
    }
}

impl Extraction {
    pub fn is_structured(&self) -> bool {
        self.tier == ExtractionTier::Structured
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Field as trimmed text; missing and null fields are empty.
    pub fn text(&self, key: &str) -> String {
        self.fields.get(key).map(value_to_text).unwrap_or_default()
    }

    /// Field as text, `None` when missing or blank.
    pub fn non_empty_text(&self, key: &str) -> Option<String> {
        Some(self.text(key)).filter(|s| !s.is_empty())
    }

    /// Field as a list. JSON arrays keep their element order; strings are
    /// split on commas.
    pub fn list(&self, key: &str) -> Vec<String> {
        match self.fields.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .map(value_to_text)
                .filter(|s| !s.is_empty())
                .collect(),
            Some(Value::String(s)) => split_list(s),
            _ => Vec::new(),
        }
    }

    /// Field as a number. Numeric strings are accepted.
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.fields.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s
                .trim()
                .trim_matches(|c| c == '[' || c == ']')
                .trim()
                .parse()
                .ok(),
            _ => None,
        }
    }

    /// Field as a yes/no flag. Strings are judged by their first word.
    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.fields.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => {
                let word: String = s
                    .trim()
                    .chars()
                    .take_while(|c| c.is_ascii_alphanumeric())
                    .collect::<String>()
                    .to_lowercase();
                match word.as_str() {
                    "yes" | "y" | "true" | "1" => Some(true),
                    "no" | "n" | "false" | "0" => Some(false),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Array-of-objects field; non-object elements are skipped.
    pub fn objects(&self, key: &str) -> Vec<&Map<String, Value>> {
        match self.fields.get(key) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
            _ => Vec::new(),
        }
    }
}

/// Text of `key` inside a JSON object, or `default` when missing/blank.
pub fn object_text(object: &Map<String, Value>, key: &str, default: &str) -> String {
    object
        .get(key)
        .map(value_to_text)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_clean_json() {
        let raw = r#"{"error_type": "database", "confidence": 0.8}"#;
        let out = extract(raw, &["ERROR_TYPE"]);
        assert!(out.is_structured());
        assert_eq!(out.text("error_type"), "database");
        assert_eq!(out.number("confidence"), Some(0.8));
    }

    #[test]
    fn strips_thinking_block_before_json() {
        let raw = "<thinking>\nLet me consider {this} carefully.\nIt mentions } braces.\n</thinking>\n{\"error_type\": \"network\", \"search_keywords\": [\"a\", \"b\"]}";
        let out = extract(raw, &[]);
        assert!(out.is_structured());
        assert_eq!(out.text("error_type"), "network");
        assert_eq!(out.list("search_keywords"), vec!["a", "b"]);
    }

    #[test]
    fn strips_markdown_fences() {
        let raw = "Here you go:\n```json\n{\"requires_approval\": true, \"step_by_step\": [\"one\", \"two\"]}\n```\nGood luck.";
        let out = extract(raw, &[]);
        assert!(out.is_structured());
        assert_eq!(out.flag("requires_approval"), Some(true));
        assert_eq!(out.list("step_by_step"), vec!["one", "two"]);
    }

    #[test]
    fn keeps_nested_objects() {
        let raw = r#"{"relevant_solutions": [{"solution_summary": "Restart", "source_url": "https://x"}], "warnings": []}"#;
        let out = extract(raw, &[]);
        let solutions = out.objects("relevant_solutions");
        assert_eq!(solutions.len(), 1);
        assert_eq!(object_text(solutions[0], "solution_summary", ""), "Restart");
        assert_eq!(object_text(solutions[0], "confidence", "unknown"), "unknown");
    }

    #[test]
    fn embedded_object_matches_direct_decode() {
        let object = json!({
            "error_type": "timeout",
            "affected_components": ["lambda", "rds"],
            "confidence_score": 0.42,
            "requires_approval": false,
            "file_changes": [{"file_path": "app.py", "before": "a", "after": "b"}]
        });
        let canonical = object.to_string();
        let expected = object.as_object().cloned().unwrap();

        let wrappings = [
            canonical.clone(),
            format!("Sure! Here is the analysis.\n{}\nHope that helps.", canonical),
            format!("<thinking>reasoning\nover lines</thinking>{}", canonical),
            format!("```json\n{}\n```", canonical),
            format!("<thinking>x</thinking>\nText\n```\n{}\n```\nbye", canonical),
        ];
        for wrapped in wrappings {
            let out = extract(&wrapped, &["ERROR_TYPE"]);
            assert_eq!(out.tier, ExtractionTier::Structured, "input: {wrapped}");
            assert_eq!(out.fields, expected, "input: {wrapped}");
        }
    }

    #[test]
    fn markers_inside_string_values_survive() {
        let object = json!({
            "before": "```python\nx = 1\n```",
            "root_cause": "see ```json block",
            "solution_summary": "model emitted <thinking>x</thinking> literally"
        });
        let expected = object.as_object().cloned().unwrap();

        let wrappings = [
            object.to_string(),
            format!("```json\n{}\n```", object),
            format!("<thinking>weighing {{options}}</thinking>\n{}", object),
        ];
        for wrapped in wrappings {
            let out = extract(&wrapped, &[]);
            assert_eq!(out.tier, ExtractionTier::Structured, "input: {wrapped}");
            assert_eq!(out.fields, expected, "input: {wrapped}");
        }
    }

    #[test]
    fn repairs_trailing_commas_and_smart_quotes() {
        let raw = "{\u{201C}error_type\u{201D}: \u{201C}dependency\u{201D}, \"list\": [1, 2,],}";
        let out = extract(raw, &[]);
        assert!(out.is_structured());
        assert_eq!(out.text("error_type"), "dependency");
    }

    #[test]
    fn invalid_json_falls_back_to_labels() {
        let raw = "This is not JSON {broken: yes";
        let out = extract(raw, &["ERROR_TYPE"]);
        assert_eq!(out.tier, ExtractionTier::Labeled);
        assert_eq!(out.text("error_type"), "");
    }

    #[test]
    fn empty_object_falls_back_to_labels() {
        let out = extract("{}\nERROR_TYPE: network", &["ERROR_TYPE"]);
        assert_eq!(out.tier, ExtractionTier::Labeled);
        assert_eq!(out.text("error_type"), "network");
    }

    #[test]
    fn parses_simple_labeled_response() {
        let raw = "ERROR_TYPE: database\nERROR_SUMMARY: The database connection failed\nSEVERITY: high";
        let fields = extract_labeled_fields(raw, &["ERROR_TYPE", "ERROR_SUMMARY", "SEVERITY"]);
        assert_eq!(fields["error_type"], "database");
        assert_eq!(fields["error_summary"], "The database connection failed");
        assert_eq!(fields["severity"], "high");
    }

    #[test]
    fn labeled_value_spans_lines_until_next_label() {
        let raw = "ERROR_SUMMARY: This is a long summary\nthat spans multiple lines\nand continues here.\n\nSEVERITY: high";
        let fields = extract_labeled_fields(raw, &["ERROR_SUMMARY"]);
        let summary = fields["error_summary"].as_str().unwrap();
        assert!(summary.contains("multiple lines"));
        assert!(summary.contains("continues here"));
        assert!(!summary.contains("SEVERITY"));
    }

    #[test]
    fn empty_label_does_not_swallow_the_next_one() {
        let fields = extract_labeled_fields("ERROR_TYPE:\nSEVERITY: high", &["ERROR_TYPE", "SEVERITY"]);
        assert_eq!(fields["error_type"], "");
        assert_eq!(fields["severity"], "high");
    }

    #[test]
    fn labels_match_case_insensitively() {
        let fields = extract_labeled_fields("error_type: network", &["ERROR_TYPE"]);
        assert_eq!(fields["error_type"], "network");
    }

    #[test]
    fn missing_labels_resolve_to_empty_strings() {
        let fields = extract_labeled_fields("ERROR_TYPE: database", &["ERROR_TYPE", "MISSING_FIELD"]);
        assert_eq!(fields["missing_field"], "");
    }

    #[test]
    fn strips_one_layer_of_brackets() {
        let fields = extract_labeled_fields(
            "AFFECTED_COMPONENTS: [database, api-server, cache]",
            &["AFFECTED_COMPONENTS"],
        );
        assert_eq!(fields["affected_components"], "database, api-server, cache");
    }

    #[test]
    fn labeled_lists_split_on_commas_and_drop_quotes() {
        let raw = "FILES_TO_CHECK: [\"docker-compose.yml\", 'settings.py', ]";
        let out = extract(raw, &["FILES_TO_CHECK"]);
        assert_eq!(out.list("files_to_check"), vec!["docker-compose.yml", "settings.py"]);
    }

    #[test]
    fn flags_accept_yes_no_words() {
        let out = extract(
            "NEED_MORE_RESEARCH: yes - results were thin\nREQUIRES_APPROVAL: no",
            &["NEED_MORE_RESEARCH", "REQUIRES_APPROVAL", "OTHER"],
        );
        assert_eq!(out.flag("need_more_research"), Some(true));
        assert_eq!(out.flag("requires_approval"), Some(false));
        assert_eq!(out.flag("other"), None);
    }

    #[test]
    fn never_panics_on_hostile_input() {
        let inputs = [
            "",
            "}{",
            "{",
            "```",
            "<thinking>unterminated",
            "FIELD:",
            "\u{0}\u{1}{\"a\":\u{2}1}",
            "ERROR_TYPE:\nSEVERITY:",
            "ünïcödé: {\"ключ\": \"значение\"}",
        ];
        for input in inputs {
            let out = extract(input, &["ERROR_TYPE", "SEVERITY", "FIELD"]);
            let _ = out.text("error_type");
            let _ = out.list("severity");
            let _ = out.number("field");
        }
    }
}
