//! Deterministic collaborators for offline tests
//!
//! One double per capability: [`ScriptedModel`] answers from a script keyed by
//! system prompt, [`StaticSearch`] returns canned results per query and
//! [`MemoryFiles`] serves an in-memory file tree.

use crate::error::{CollaboratorError, FileError};
use crate::llm::{LanguageModel, TextStream};
use crate::sandbox::{detect_language, match_options, FileContent, FileReader};
use crate::search::{SearchProvider, SearchResult};
use async_trait::async_trait;
use glob::Pattern;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

type Reply = Result<String, CollaboratorError>;

/// One recorded language-model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPrompt {
    pub system_prompt: Option<String>,
    pub prompt: String,
}

/// Scripted language model.
///
/// Replies are queued per system prompt (each stage has its own). The last
/// reply in a queue repeats once the earlier ones are used up. Calls with an
/// unscripted system prompt get the default reply, or a provider error when
/// there is none.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    default_reply: Option<String>,
    stream_chunks: Vec<String>,
    calls: Mutex<Vec<RecordedPrompt>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for calls made with `system_prompt`.
    pub fn on(self, system_prompt: &str, reply: impl Into<String>) -> Self {
        self.push(system_prompt, Ok(reply.into()))
    }

    /// Queue a failure for calls made with `system_prompt`.
    pub fn on_failure(self, system_prompt: &str, err: CollaboratorError) -> Self {
        self.push(system_prompt, Err(err))
    }

    pub fn with_default(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = Some(reply.into());
        self
    }

    /// Chunks yielded by `generate_stream`.
    pub fn with_stream(mut self, chunks: &[&str]) -> Self {
        self.stream_chunks = chunks.iter().map(|c| c.to_string()).collect();
        self
    }

    fn push(self, system_prompt: &str, reply: Reply) -> Self {
        lock(&self.scripts)
            .entry(system_prompt.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<RecordedPrompt> {
        lock(&self.calls).clone()
    }

    /// Prompts sent with the given system prompt.
    pub fn prompts_for(&self, system_prompt: &str) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.system_prompt.as_deref() == Some(system_prompt))
            .map(|c| c.prompt.clone())
            .collect()
    }

    fn next_reply(&self, system_prompt: Option<&str>) -> Reply {
        if let Some(system) = system_prompt {
            let mut scripts = lock(&self.scripts);
            if let Some(queue) = scripts.get_mut(system) {
                let reply = if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                };
                if let Some(reply) = reply {
                    return reply;
                }
            }
        }
        self.default_reply
            .clone()
            .ok_or_else(|| CollaboratorError::Provider("no scripted reply".to_string()))
    }

    fn record(&self, prompt: &str, system_prompt: Option<&str>) {
        lock(&self.calls).push(RecordedPrompt {
            system_prompt: system_prompt.map(str::to_string),
            prompt: prompt.to_string(),
        });
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<String, CollaboratorError> {
        self.record(prompt, system_prompt);
        self.next_reply(system_prompt)
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<TextStream, CollaboratorError> {
        self.record(prompt, system_prompt);
        let chunks: Vec<Result<String, CollaboratorError>> =
            self.stream_chunks.iter().cloned().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

/// Canned search provider. Unknown queries return the default results.
#[derive(Debug, Default)]
pub struct StaticSearch {
    responses: HashMap<String, Result<Vec<SearchResult>, CollaboratorError>>,
    default_results: Vec<SearchResult>,
    queries: Mutex<Vec<String>>,
}

impl StaticSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_results(mut self, query: &str, results: Vec<SearchResult>) -> Self {
        self.responses.insert(query.to_string(), Ok(results));
        self
    }

    pub fn with_failure(mut self, query: &str, err: CollaboratorError) -> Self {
        self.responses.insert(query.to_string(), Err(err));
        self
    }

    pub fn with_default(mut self, results: Vec<SearchResult>) -> Self {
        self.default_results = results;
        self
    }

    /// Queries received so far, in call order.
    pub fn queries(&self) -> Vec<String> {
        lock(&self.queries).clone()
    }
}

/// Shorthand for a result with a fixed score.
pub fn result(title: &str, url: &str, content: &str) -> SearchResult {
    SearchResult {
        title: title.to_string(),
        url: url.to_string(),
        content: content.to_string(),
        score: 0.9,
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        _include_domains: Option<&[String]>,
    ) -> Result<Vec<SearchResult>, CollaboratorError> {
        lock(&self.queries).push(query.to_string());
        let mut results = match self.responses.get(query) {
            Some(response) => response.clone()?,
            None => self.default_results.clone(),
        };
        results.truncate(max_results);
        Ok(results)
    }
}

/// In-memory file tree. Denied paths are listed by `find_files` but refuse
/// to be read.
#[derive(Debug, Default)]
pub struct MemoryFiles {
    files: BTreeMap<PathBuf, String>,
    denied: BTreeSet<PathBuf>,
}

impl MemoryFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.files.insert(PathBuf::from(path), content.to_string());
        self
    }

    pub fn deny(mut self, path: &str) -> Self {
        self.denied.insert(PathBuf::from(path));
        self.files.entry(PathBuf::from(path)).or_default();
        self
    }
}

impl FileReader for MemoryFiles {
    fn find_files(&self, patterns: &[String]) -> Result<Vec<PathBuf>, FileError> {
        let compiled: Vec<Pattern> = patterns
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .collect();
        Ok(self
            .files
            .keys()
            .filter(|path| {
                let candidate = path.to_string_lossy();
                compiled
                    .iter()
                    .any(|p| p.matches_with(&candidate, match_options()))
            })
            .cloned()
            .collect())
    }

    fn read_file(&self, path: &Path) -> Result<FileContent, FileError> {
        if self.denied.contains(path) {
            return Err(FileError::AccessDenied {
                path: path.to_path_buf(),
                reason: "denied by test fixture".to_string(),
            });
        }
        let content = self
            .files
            .get(path)
            .ok_or_else(|| FileError::NotFound(path.to_path_buf()))?;
        Ok(FileContent {
            path: path.to_path_buf(),
            content: content.clone(),
            language: detect_language(path).to_string(),
            line_count: content.lines().count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn scripted_model_repeats_last_reply_per_system_prompt() {
        let model = ScriptedModel::new().on("sys", "first").on("sys", "second");
        assert_eq!(model.generate("p", Some("sys")).await.unwrap(), "first");
        assert_eq!(model.generate("p", Some("sys")).await.unwrap(), "second");
        assert_eq!(model.generate("p", Some("sys")).await.unwrap(), "second");
        assert!(model.generate("p", Some("other")).await.is_err());
        assert_eq!(model.calls().len(), 4);
        assert_eq!(model.prompts_for("sys").len(), 3);
    }

    #[tokio::test]
    async fn scripted_model_streams_chunks() {
        let model = ScriptedModel::new().with_stream(&["a", "b"]);
        let stream = model.generate_stream("p", None).await.unwrap();
        let chunks: Vec<String> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn static_search_isolates_failures() {
        let search = StaticSearch::new()
            .with_results("ok", vec![result("t", "u", "c")])
            .with_failure("bad", CollaboratorError::Provider("down".to_string()));
        assert_eq!(search.search("ok", 5, None).await.unwrap().len(), 1);
        assert!(search.search("bad", 5, None).await.is_err());
        assert!(search.search("other", 5, None).await.unwrap().is_empty());
        assert_eq!(search.queries(), vec!["ok", "bad", "other"]);
    }

    #[test]
    fn memory_files_match_globs_and_deny() {
        let files = MemoryFiles::new()
            .with_file("app/database.py", "x = 1\n")
            .deny("config/database.yml");
        let found = files
            .find_files(&["**/*database*".to_string()])
            .unwrap();
        assert_eq!(
            found,
            vec![PathBuf::from("app/database.py"), PathBuf::from("config/database.yml")]
        );
        assert!(matches!(
            files.read_file(Path::new("config/database.yml")),
            Err(FileError::AccessDenied { .. })
        ));
        assert_eq!(files.read_file(Path::new("app/database.py")).unwrap().language, "python");
    }
}
