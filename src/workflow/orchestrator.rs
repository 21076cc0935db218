//! Drives an investigation through the workflow graph

use super::progress::{Progress, ProgressEvent, ProgressSink};
use super::router;
use super::stages::{self, StageContext};
use super::{Route, Stage};
use crate::config::{Config, TECHNICAL_DOMAINS};
use crate::error::{CollaboratorError, InvestigationError};
use crate::llm::{prompts, ChatCompletionsClient, LanguageModel, TextStream};
use crate::sandbox::{FileReader, SandboxReader};
use crate::search::{SearchProvider, TavilySearch};
use crate::state::InvestigationState;
use std::path::Path;
use std::sync::Arc;

/// Tunables the stages read.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub search_results_per_query: usize,
    /// Empty means unrestricted.
    pub search_domains: Vec<String>,
    pub files_per_pattern: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            search_results_per_query: 5,
            search_domains: TECHNICAL_DOMAINS.iter().map(|d| d.to_string()).collect(),
            files_per_pattern: 2,
        }
    }
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            search_results_per_query: config.search_results_per_query,
            search_domains: config.search_domains.clone(),
            ..Self::default()
        }
    }
}

fn configuration_error(err: CollaboratorError) -> InvestigationError {
    match err {
        CollaboratorError::Configuration(msg) | CollaboratorError::Provider(msg) => {
            InvestigationError::Configuration(msg)
        }
    }
}

/// Runs investigations. Collaborators are injected; one instance can run any
/// number of independent investigations.
pub struct Investigator {
    model: Arc<dyn LanguageModel>,
    search: Arc<dyn SearchProvider>,
    files: Arc<dyn FileReader>,
    settings: Settings,
    progress: Progress,
}

impl Investigator {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        search: Arc<dyn SearchProvider>,
        files: Arc<dyn FileReader>,
    ) -> Self {
        Self {
            model,
            search,
            files,
            settings: Settings::default(),
            progress: Progress::default(),
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Progress::new(sink);
        self
    }

    /// Production wiring. Fails before any stage runs when the language
    /// model has no credential or the sandbox root cannot be opened.
    pub fn from_config(
        config: &Config,
        root: impl AsRef<Path>,
    ) -> Result<Self, InvestigationError> {
        let model = ChatCompletionsClient::from_config(config).map_err(configuration_error)?;
        let search = TavilySearch::from_config(config).map_err(configuration_error)?;
        let files = SandboxReader::from_config(config, root.as_ref()).map_err(|e| {
            InvestigationError::Configuration(format!("cannot open sandbox root: {}", e))
        })?;
        Ok(Self::new(Arc::new(model), Arc::new(search), Arc::new(files))
            .with_settings(Settings::from_config(config)))
    }

    /// Run one investigation to completion or to the approval checkpoint.
    pub async fn investigate(
        &self,
        error_log: &str,
        max_iterations: u32,
    ) -> Result<InvestigationState, InvestigationError> {
        let state = InvestigationState::new(error_log, max_iterations);
        tracing::info!(
            id = %state.id,
            max_iterations = state.max_iterations,
            "starting investigation"
        );
        self.drive(state).await
    }

    async fn drive(
        &self,
        mut state: InvestigationState,
    ) -> Result<InvestigationState, InvestigationError> {
        let ctx = StageContext {
            model: self.model.as_ref(),
            search: self.search.as_ref(),
            files: self.files.as_ref(),
            settings: &self.settings,
            progress: &self.progress,
        };

        let mut stage = Stage::Diagnose;
        loop {
            tracing::info!(stage = %stage, iteration = state.iterations, "stage started");
            self.progress.emit(ProgressEvent::StageStarted {
                stage,
                iteration: state.iterations,
            });

            let outcome = stages::execute(stage, &ctx, &state).await;
            let update = match outcome {
                Ok(update) => update,
                Err(source) => {
                    tracing::error!(stage = %stage, error = %source, "stage failed");
                    return Err(InvestigationError::StageFailed {
                        stage,
                        source,
                        partial: Box::new(state),
                    });
                }
            };
            state.apply(update);

            tracing::debug!(stage = %stage, status = %state.status, "stage finished");
            self.progress.emit(ProgressEvent::StageFinished {
                stage,
                status: state.status,
            });

            match router::successor(stage, &state) {
                Route::Stage(next) => stage = next,
                Route::End => break,
            }
        }

        tracing::info!(
            id = %state.id,
            status = %state.status,
            iterations = state.iterations,
            confidence = state.solution_confidence,
            "investigation finished"
        );
        Ok(state)
    }

    /// Stream a plain-language walkthrough of a finished investigation.
    pub async fn explain_solution(
        &self,
        state: &InvestigationState,
    ) -> Result<TextStream, CollaboratorError> {
        self.model
            .generate_stream(&prompts::explain_prompt(state), Some(prompts::EXPLAIN_SYSTEM))
            .await
    }
}

impl std::fmt::Debug for Investigator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Investigator")
            .field("settings", &self.settings)
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}
