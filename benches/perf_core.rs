use criterion::{black_box, criterion_group, criterion_main, Criterion};
use incident_responder::extract::{extract, strip_thinking};
use incident_responder::sandbox::{FileReader, SandboxReader};
use incident_responder::workflow::stages::diagnose::Diagnosis;
use incident_responder::workflow::stages::solve::SolutionPlan;
use std::fs;

const SOLVE_LABELS: &[&str] = &[
    "ROOT_CAUSE",
    "SOLUTION_SUMMARY",
    "CONFIDENCE_SCORE",
    "STEP_BY_STEP",
    "REQUIRES_APPROVAL",
];

fn synthetic_solution_json(steps: usize) -> String {
    let step_list = (0..steps)
        .map(|i| format!("\"Step {} adjusts setting_{} and restarts\"", i, i))
        .collect::<Vec<_>>()
        .join(", ");
    let changes = (0..steps / 4)
        .map(|i| {
            format!(
                r#"{{"file_path": "src/module_{i}.py", "description": "fix {i}", "before": "x = {i}", "after": "x = {i} + 1"}}"#
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "<thinking>{}</thinking>\nHere is the plan:\n```json\n{{\"root_cause\": \"pool leak\", \
         \"solution_summary\": \"reuse the pool\", \"confidence_score\": 0.82, \
         \"step_by_step\": [{}], \"executable_commands\": [\"systemctl restart api\"], \
         \"file_changes\": [{}], \"requires_approval\": true, \
         \"approval_reason\": \"restarts production\"}}\n```\n",
        "reasoning ".repeat(2_000),
        step_list,
        changes
    )
}

fn synthetic_solution_labeled(steps: usize) -> String {
    let mut out = String::from(
        "ROOT_CAUSE: pool leak\nSOLUTION_SUMMARY: reuse the pool\nCONFIDENCE_SCORE: 82%\nSTEP_BY_STEP:\n",
    );
    for i in 0..steps {
        out.push_str(&format!("{}. adjust setting {} and restart\n", i + 1, i));
    }
    out.push_str("REQUIRES_APPROVAL: yes\nAPPROVAL_REASON: restarts production\n");
    out
}

fn bench_extraction(c: &mut Criterion) {
    let json = synthetic_solution_json(200);
    c.bench_function("solution_plan_structured", |b| {
        b.iter(|| black_box(SolutionPlan::from_response(black_box(&json))));
    });

    let labeled = synthetic_solution_labeled(200);
    c.bench_function("solution_plan_labeled", |b| {
        b.iter(|| black_box(SolutionPlan::from_response(black_box(&labeled))));
    });

    c.bench_function("extract_labeled_fields", |b| {
        b.iter(|| black_box(extract(black_box(&labeled), SOLVE_LABELS)));
    });

    c.bench_function("strip_thinking_large", |b| {
        b.iter(|| black_box(strip_thinking(black_box(&json))));
    });

    let diagnosis = r#"{"error_type": "database", "error_summary": "pool exhausted",
        "search_keywords": ["a", "b", "c"], "files_to_check": ["db.py"], "severity": "high"}"#;
    c.bench_function("diagnosis_structured", |b| {
        b.iter(|| black_box(Diagnosis::from_response(black_box(diagnosis))));
    });
}

fn bench_find_files(c: &mut Criterion) {
    let dir = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(_) => return,
    };
    for i in 0..2_000 {
        let sub = dir.path().join(format!("pkg_{:02}", i % 40));
        if fs::create_dir_all(&sub).is_err() {
            return;
        }
        let _ = fs::write(sub.join(format!("module_{:04}.py", i)), "x = 1\n");
    }
    let reader = match SandboxReader::new(dir.path(), 500, Vec::new()) {
        Ok(reader) => reader,
        Err(_) => return,
    };
    let patterns = vec!["**/module_0042.py".to_string(), "**/*database*".to_string()];
    c.bench_function("sandbox_find_files_2k", |b| {
        b.iter(|| black_box(reader.find_files(black_box(&patterns))));
    });
}

criterion_group!(benches, bench_extraction, bench_find_files);
criterion_main!(benches);
