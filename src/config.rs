//! Configuration management for incident-responder
//!
//! Stores settings in ~/.config/incident-responder/config.json

use crate::keyring::{self, Credential};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use url::Url;

pub const DEFAULT_MODEL: &str = "google/gemini-2.5-flash-lite";
pub const DEFAULT_API_BASE_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_SEARCH_URL: &str = "https://api.tavily.com/search";

/// Domains technical searches are restricted to.
pub const TECHNICAL_DOMAINS: [&str; 9] = [
    "stackoverflow.com",
    "github.com",
    "docs.python.org",
    "docs.docker.com",
    "kubernetes.io",
    "aws.amazon.com/documentation",
    "cloud.google.com/docs",
    "learn.microsoft.com",
    "developer.mozilla.org",
];

const DEFAULT_EXCLUDED_DIRS: [&str; 6] = ["node_modules", ".git", "__pycache__", "venv", ".venv", "target"];

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_search_url() -> String {
    DEFAULT_SEARCH_URL.to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_max_iterations() -> u32 {
    crate::state::DEFAULT_MAX_ITERATIONS
}

fn default_search_results() -> usize {
    5
}

fn default_search_domains() -> Vec<String> {
    TECHNICAL_DOMAINS.iter().map(|d| d.to_string()).collect()
}

fn default_max_file_lines() -> usize {
    500
}

fn default_excluded_dirs() -> Vec<String> {
    DEFAULT_EXCLUDED_DIRS.iter().map(|d| d.to_string()).collect()
}

fn default_request_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Chat-completions model id
    #[serde(default = "default_model")]
    pub model: String,
    /// OpenAI-compatible chat-completions endpoint
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_search_url")]
    pub search_url: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_search_results")]
    pub search_results_per_query: usize,
    #[serde(default = "default_search_domains")]
    pub search_domains: Vec<String>,
    /// Files longer than this are truncated before reaching the model
    #[serde(default = "default_max_file_lines")]
    pub max_file_lines: usize,
    #[serde(default = "default_excluded_dirs")]
    pub excluded_dirs: Vec<String>,
    /// Per-request budget for every collaborator call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_base_url: default_api_base_url(),
            max_tokens: default_max_tokens(),
            search_url: default_search_url(),
            max_iterations: default_max_iterations(),
            search_results_per_query: default_search_results(),
            search_domains: default_search_domains(),
            max_file_lines: default_max_file_lines(),
            excluded_dirs: default_excluded_dirs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Config {
    /// Clamp values into usable ranges and reset unparsable endpoints.
    pub fn sanitize(&mut self) {
        if self.model.trim().is_empty() {
            self.model = default_model();
        }
        if Url::parse(&self.api_base_url).is_err() {
            tracing::warn!(url = %self.api_base_url, "invalid api_base_url, using default");
            self.api_base_url = default_api_base_url();
        }
        if Url::parse(&self.search_url).is_err() {
            tracing::warn!(url = %self.search_url, "invalid search_url, using default");
            self.search_url = default_search_url();
        }
        self.max_tokens = self.max_tokens.max(256);
        self.max_iterations = self.max_iterations.clamp(1, 10);
        self.search_results_per_query = self.search_results_per_query.clamp(1, 20);
        self.max_file_lines = self.max_file_lines.max(1);
        self.request_timeout_secs = self.request_timeout_secs.clamp(5, 600);
        self.search_domains.retain(|d| !d.trim().is_empty());
    }

    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("incident-responder"))
    }

    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from an explicit path. A corrupt file is moved aside and
    /// defaults are returned.
    pub fn load_from(path: &Path) -> Self {
        if let Ok(content) = fs::read_to_string(path) {
            match serde_json::from_str::<Config>(&content) {
                Ok(mut config) => {
                    config.sanitize();
                    return config;
                }
                Err(err) => {
                    preserve_corrupt_config(path, &content);
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "config file was corrupted; a backup was saved and defaults were loaded"
                    );
                }
            }
        }
        Self::default()
    }

    /// Save config to disk
    pub fn save(&self) -> Result<(), String> {
        let dir =
            Self::config_dir().ok_or_else(|| "Could not determine config directory".to_string())?;
        self.save_to(&dir.join("config.json"))
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        let mut sanitized = self.clone();
        sanitized.sanitize();

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
                    tracing::debug!(error = %e, "failed to set config directory permissions");
                }
            }
        }

        let content = serde_json::to_string_pretty(&sanitized)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        write_config_atomic(path, &content).map_err(|e| format!("Failed to write config: {}", e))
    }

    /// Language-model API key (keyring first, environment fallback).
    pub fn llm_api_key(&self) -> Option<String> {
        stored_credential(Credential::LlmApiKey)
            .or_else(|| env_key("OPENROUTER_API_KEY"))
            .or_else(|| env_key("LLM_API_KEY"))
    }

    /// Search API key (keyring first, environment fallback).
    pub fn search_api_key(&self) -> Option<String> {
        stored_credential(Credential::SearchApiKey).or_else(|| env_key("TAVILY_API_KEY"))
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/incident-responder/config.json".to_string())
    }
}

fn stored_credential(which: Credential) -> Option<String> {
    match keyring::get(which) {
        Ok(value) => value.filter(|v| !v.trim().is_empty()),
        Err(err) => {
            keyring::warn_keychain_error_once(which.label(), &err);
            None
        }
    }
}

fn env_key(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Interactive prompt to store the provider keys
pub fn setup_credentials_interactive() -> Result<(), String> {
    use std::io;

    println!();
    println!("  ┌─────────────────────────────────────────────────────────┐");
    println!("  │  INCIDENT RESPONDER SETUP                               │");
    println!("  └─────────────────────────────────────────────────────────┘");
    println!();
    println!("  The responder needs a chat-completions API key (OpenRouter by default)");
    println!("  and, optionally, a Tavily key for web research.");
    println!();
    println!(
        "  Keys are stored in your {}.",
        keyring::credentials_store_label()
    );
    println!("  Prefer env vars? Set OPENROUTER_API_KEY and TAVILY_API_KEY instead.");
    println!();

    for (which, prompt) in [
        (Credential::LlmApiKey, "  LLM API key: "),
        (Credential::SearchApiKey, "  Search API key (blank to skip): "),
    ] {
        print!("{}", prompt);
        io::stdout().flush().map_err(|e| e.to_string())?;

        let mut key = String::new();
        io::stdin().read_line(&mut key).map_err(|e| e.to_string())?;
        let key = key.trim();
        if key.is_empty() {
            if which == Credential::LlmApiKey {
                return Err("No API key provided".to_string());
            }
            continue;
        }
        keyring::set(which, key).map_err(|e| {
            format!(
                "Failed to store {} in {}: {}",
                which.label(),
                keyring::credentials_store_label(),
                e
            )
        })?;
        println!("  + {} saved", which.label());
    }

    println!();
    Ok(())
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> Result<(), String> {
    use std::fs::OpenOptions;

    let tmp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .map_err(|e| e.to_string())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
            tracing::debug!(error = %e, "failed to set temp config file permissions");
        }
    }

    file.write_all(content.as_bytes())
        .map_err(|e| e.to_string())?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.to_string());
    }
    Ok(())
}
