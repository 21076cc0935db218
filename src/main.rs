use anyhow::{anyhow, Context, Result};
use clap::Parser;
use futures::StreamExt;
use incident_responder::config::{self, Config};
use incident_responder::keyring;
use incident_responder::report;
use incident_responder::samples::SampleManifest;
use incident_responder::util::truncate;
use incident_responder::workflow::ProgressSink;
use incident_responder::{InvestigationError, InvestigationState, Investigator, ProgressEvent, Stage};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "incident",
    about = "Investigate a runtime error: diagnose, research, audit the code and propose a fix",
    version
)]
struct Args {
    /// Error text to investigate
    #[arg(short, long, conflicts_with = "file")]
    error: Option<String>,

    /// Read the error text from a file
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Maximum research passes (defaults to the configured value)
    #[arg(short = 'n', long)]
    max_iterations: Option<u32>,

    /// Override the configured model for this run
    #[arg(short, long)]
    model: Option<String>,

    /// Directory the code audit may read (defaults to current directory)
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Save the incident report to this path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Stream a plain-language explanation of the result
    #[arg(long)]
    explain: bool,

    /// Print the final investigation state as JSON
    #[arg(long)]
    json: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,

    /// Store the language-model and search API keys
    #[arg(long)]
    setup: bool,
}

fn init_tracing(quiet: bool) {
    let default = if quiet {
        "incident_responder=warn"
    } else {
        "incident_responder=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.quiet);

    if args.setup {
        return setup_keys();
    }

    let mut config = Config::load();
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    let max_iterations = args.max_iterations.unwrap_or(config.max_iterations).max(1);

    let mut investigator = Investigator::from_config(&config, &args.root).map_err(|e| {
        anyhow!(
            "{}\n  Run 'incident --setup' or export OPENROUTER_API_KEY. Config: {}",
            e,
            Config::config_location()
        )
    })?;
    if !args.json && !args.quiet {
        investigator = investigator.with_progress(progress_printer());
    }

    let direct = match (&args.error, &args.file) {
        (Some(text), _) => Some(text.clone()),
        (None, Some(path)) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read error file {}", path.display()))?,
        ),
        (None, None) => None,
    };

    match direct {
        Some(error_log) => run_direct(&investigator, &args, &error_log, max_iterations).await,
        None => run_interactive(&investigator, &args, max_iterations).await,
    }
}

async fn run_direct(
    investigator: &Investigator,
    args: &Args,
    error_log: &str,
    max_iterations: u32,
) -> Result<()> {
    if error_log.trim().is_empty() {
        return Err(anyhow!("No error text provided"));
    }

    let state = match investigator.investigate(error_log, max_iterations).await {
        Ok(state) => state,
        Err(err) => {
            report_failure(&err);
            return Err(err.into());
        }
    };

    if args.json {
        let json = serde_json::to_string_pretty(&state).context("Failed to serialize state")?;
        println!("{}", json);
    } else {
        print_summary(&state);
    }

    if args.explain {
        stream_explanation(investigator, &state).await?;
    }
    if let Some(path) = &args.output {
        let written = report::save_report(&state, Some(path))?;
        eprintln!("  Report saved to {}", written.display());
    }
    Ok(())
}

async fn run_interactive(
    investigator: &Investigator,
    args: &Args,
    max_iterations: u32,
) -> Result<()> {
    let manifest = SampleManifest::builtin()?;
    let stdin = io::stdin();
    let mut input = stdin.lock();

    print_banner();
    loop {
        println!("  Sample incidents:");
        for (i, sample) in manifest.sample.iter().enumerate() {
            println!("    {}. {}", i + 1, sample.name);
        }
        println!("    C. Paste a custom error");
        println!("    Q. Quit");
        let choice = prompt_line(&mut input, "\n  Choose: ")?;

        let error_log = match choice.trim().to_lowercase().as_str() {
            "q" | "quit" | "" => return Ok(()),
            "c" => read_custom_error(&mut input)?,
            other => match manifest.pick(other) {
                Some(sample) => {
                    println!("\n  Investigating: {}", sample.name);
                    sample.error.clone()
                }
                None => {
                    println!("  Unknown choice '{}'\n", other);
                    continue;
                }
            },
        };
        if error_log.trim().is_empty() {
            println!("  Nothing to investigate.\n");
            continue;
        }

        let state = match investigator.investigate(&error_log, max_iterations).await {
            Ok(state) => state,
            Err(err) => {
                report_failure(&err);
                continue;
            }
        };
        print_summary(&state);

        if args.explain || confirm(&mut input, "  Explain the solution in plain language? [y/N] ")? {
            if let Err(err) = stream_explanation(investigator, &state).await {
                eprintln!("  ! Explanation failed: {:#}", err);
            }
        }
        if args.output.is_some() || confirm(&mut input, "  Save incident report? [y/N] ")? {
            match report::save_report(&state, args.output.as_deref()) {
                Ok(path) => println!("  Report saved to {}", path.display()),
                Err(err) => eprintln!("  ! {:#}", err),
            }
        }
        println!();
    }
}

fn prompt_line(input: &mut impl BufRead, prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    input.read_line(&mut line).context("Failed to read input")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn confirm(input: &mut impl BufRead, prompt: &str) -> Result<bool> {
    let answer = prompt_line(input, prompt)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Read lines until a blank line or end of input.
fn read_custom_error(input: &mut impl BufRead) -> Result<String> {
    println!("  Paste the error, then an empty line to finish:");
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        if input.read_line(&mut line).context("Failed to read input")? == 0 {
            break;
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            break;
        }
        lines.push(line.to_string());
    }
    Ok(lines.join("\n"))
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Diagnose => "Diagnosing error",
        Stage::Research => "Researching solutions",
        Stage::Audit => "Auditing code",
        Stage::Solve => "Proposing a fix",
        Stage::Approve => "Approval checkpoint",
    }
}

fn progress_printer() -> ProgressSink {
    Arc::new(|event: &ProgressEvent| match event {
        ProgressEvent::StageStarted { stage, iteration } => {
            if *stage == Stage::Research {
                eprintln!("  > {} (pass {})", stage_label(*stage), iteration + 1);
            } else {
                eprintln!("  > {}", stage_label(*stage));
            }
        }
        ProgressEvent::StageFinished { .. } => {}
        ProgressEvent::SearchFailed { query, reason } => {
            eprintln!("    ! search failed for '{}': {}", query, reason);
        }
        ProgressEvent::FileSkipped { path, reason } => {
            eprintln!("    ! skipped {}: {}", path, reason);
        }
        ProgressEvent::ApprovalRequired { pending_action, .. } => {
            eprintln!("  ! Human approval required: {}", pending_action);
        }
    })
}

fn report_failure(err: &InvestigationError) {
    eprintln!();
    eprintln!("  ! Investigation failed: {}", err);
    if let Some(partial) = err.partial_state() {
        eprintln!(
            "    Reached status '{}' after {} research pass(es).",
            partial.status, partial.iterations
        );
    }
}

async fn stream_explanation(investigator: &Investigator, state: &InvestigationState) -> Result<()> {
    println!();
    println!("  EXPLANATION");
    println!();
    let mut stream = investigator.explain_solution(state).await?;
    let mut stdout = io::stdout();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        write!(stdout, "{}", chunk)?;
        stdout.flush()?;
    }
    println!();
    Ok(())
}

fn print_banner() {
    println!();
    println!("  ┌─────────────────────────────────────────────────────────┐");
    println!("  │  INCIDENT RESPONDER                                     │");
    println!("  │  diagnose > research > audit > solve                    │");
    println!("  └─────────────────────────────────────────────────────────┘");
    println!();
}

fn print_summary(state: &InvestigationState) {
    println!();
    println!("  ─────────────────────────────────────────────────────────");
    println!("  INVESTIGATION SUMMARY");
    println!("  ─────────────────────────────────────────────────────────");
    println!("  Type:        {}", state.error_type);
    println!("  Severity:    {}", state.severity);
    println!("  Status:      {}", state.status);
    println!("  Confidence:  {:.0}%", state.solution_confidence * 100.0);
    println!("  Iterations:  {}", state.iterations);
    println!();
    println!("  Diagnosis:");
    println!("    {}", truncate(&state.error_summary, 300));

    if !state.immediate_actions.is_empty() {
        println!();
        println!("  Check first:");
        for action in &state.immediate_actions {
            println!("    - {}", action);
        }
    }

    println!();
    println!("  Proposed solution:");
    for line in state.proposed_solution.lines() {
        println!("    {}", line);
    }

    if !state.solution_steps.is_empty() {
        println!();
        println!("  Steps:");
        for (i, step) in state.solution_steps.iter().enumerate() {
            println!("    {}. {}", i + 1, step);
        }
    }

    if state.needs_human_approval {
        println!();
        println!("  ! Requires approval: {}", state.pending_action);
    }
    println!();
}

fn setup_keys() -> Result<()> {
    config::setup_credentials_interactive().map_err(|e| anyhow!("{}", e))?;

    let config = Config::load();
    config.save().map_err(|e| anyhow!("{}", e))?;
    println!("  + Settings written to {}", Config::config_location());

    match config.llm_api_key() {
        Some(_) => {
            println!("  + API key verified and ready to use!");
            if config.search_api_key().is_none() {
                println!("  ! No search key stored; research will run without web results.");
            }
            Ok(())
        }
        None => {
            eprintln!();
            eprintln!("  ! Warning: API key was saved but cannot be read back.");
            eprintln!(
                "  ! This may be due to {} access issues.",
                keyring::credentials_store_label()
            );
            eprintln!();
            eprintln!("  Workaround: Set the OPENROUTER_API_KEY environment variable:");
            eprintln!("    export OPENROUTER_API_KEY=\"your-key-here\"");
            eprintln!();
            Err(anyhow!("API key verification failed"))
        }
    }
}
