//! Sandboxed file access for the Audit stage
//!
//! Every path is resolved against a canonical root. Anything that escapes the
//! root (lexically or through a symlink), names a sensitive file, or has an
//! extension outside the allowlist is refused.

use crate::config::Config;
use crate::error::FileError;
use glob::{MatchOptions, Pattern};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

const ALLOWED_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "jsx", "tsx", "java", "go", "rs", "cpp", "c", "h", "yaml", "yml", "json",
    "toml", "md", "txt", "rst", "html", "css", "scss", "sql", "sh", "bash", "zsh", "dockerfile",
    "containerfile",
];

/// Extension-less files that are still worth auditing.
const ALLOWED_FILE_NAMES: &[&str] = &["Dockerfile", "Containerfile"];

/// Lower-cased path fragments that are never read.
const BLOCKED_FRAGMENTS: &[&str] = &[
    ".env",
    "secrets",
    "credentials",
    "password",
    ".pem",
    ".key",
    ".crt",
    ".pfx",
    "id_rsa",
    "id_ed25519",
    ".aws/credentials",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    /// Path relative to the sandbox root.
    pub path: PathBuf,
    pub content: String,
    pub language: String,
    pub line_count: usize,
}

pub trait FileReader: Send + Sync {
    /// Resolve glob patterns to sandbox-relative file paths, sorted and
    /// deduplicated.
    fn find_files(&self, patterns: &[String]) -> Result<Vec<PathBuf>, FileError>;

    /// Read one file (relative to the root, or absolute inside it).
    fn read_file(&self, path: &Path) -> Result<FileContent, FileError>;
}

/// Language tag for a path, `text` when unknown.
pub fn detect_language(path: &Path) -> &'static str {
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        if ALLOWED_FILE_NAMES.contains(&name) {
            return "dockerfile";
        }
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "py" => "python",
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "java" => "java",
        "go" => "go",
        "rs" => "rust",
        "cpp" => "cpp",
        "c" | "h" => "c",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        "toml" => "toml",
        "md" => "markdown",
        "html" => "html",
        "css" | "scss" => "css",
        "sql" => "sql",
        "sh" | "bash" | "zsh" => "bash",
        "dockerfile" | "containerfile" => "dockerfile",
        _ => "text",
    }
}

/// Render a file for the Audit prompt.
pub fn format_file_content(file: &FileContent) -> String {
    format!(
        "\n--- File: {} ---\nLanguage: {}\nLines: {}\n\n```{}\n{}\n```\n",
        file.path.display(),
        file.language,
        file.line_count,
        file.language,
        file.content
    )
}

/// `*` stays within one path component; `**` crosses directories.
pub(crate) fn match_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}

fn is_allowed_type(path: &Path) -> bool {
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        if ALLOWED_FILE_NAMES.contains(&name) {
            return true;
        }
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| ALLOWED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn blocked_fragment(relative: &Path) -> Option<&'static str> {
    let lowered = relative.to_string_lossy().replace('\\', "/").to_lowercase();
    BLOCKED_FRAGMENTS
        .iter()
        .copied()
        .find(|fragment| lowered.contains(fragment))
}

/// Resolve `.` and `..` without touching the filesystem. `None` when the
/// path climbs above its starting point.
fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

/// Keep the first `max_lines` lines, marking the cut.
fn truncate_lines(text: &str, max_lines: usize) -> (String, usize) {
    let mut kept = String::new();
    let mut count = 0;
    for line in text.split_inclusive('\n') {
        if count >= max_lines {
            kept.push_str(&format!("\n... [Truncated at {} lines] ...", max_lines));
            return (kept, count);
        }
        kept.push_str(line);
        count += 1;
    }
    (kept, count)
}

/// Production [`FileReader`] rooted at one directory.
pub struct SandboxReader {
    root: PathBuf,
    max_lines: usize,
    excluded_dirs: Vec<String>,
}

impl SandboxReader {
    pub fn new(
        root: impl AsRef<Path>,
        max_lines: usize,
        excluded_dirs: Vec<String>,
    ) -> Result<Self, FileError> {
        let root = root.as_ref();
        let root = root.canonicalize().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                FileError::NotFound(root.to_path_buf())
            } else {
                FileError::Io {
                    path: root.to_path_buf(),
                    source,
                }
            }
        })?;
        Ok(Self {
            root,
            max_lines: max_lines.max(1),
            excluded_dirs,
        })
    }

    pub fn from_config(config: &Config, root: impl AsRef<Path>) -> Result<Self, FileError> {
        Self::new(root, config.max_file_lines, config.excluded_dirs.clone())
    }

    fn is_excluded_dir(&self, name: &str) -> bool {
        self.excluded_dirs.iter().any(|d| d == name)
    }

    /// Map a requested path onto an absolute path inside the root, checked
    /// lexically. Returns the sandbox-relative form too.
    fn locate(&self, requested: &Path) -> Result<(PathBuf, PathBuf), FileError> {
        let relative = if requested.is_absolute() {
            requested
                .strip_prefix(&self.root)
                .map(Path::to_path_buf)
                .map_err(|_| FileError::AccessDenied {
                    path: requested.to_path_buf(),
                    reason: "outside the sandbox root".to_string(),
                })?
        } else {
            requested.to_path_buf()
        };

        let relative = normalize_lexically(&relative).ok_or_else(|| FileError::AccessDenied {
            path: requested.to_path_buf(),
            reason: "outside the sandbox root".to_string(),
        })?;
        Ok((self.root.join(&relative), relative))
    }
}

impl FileReader for SandboxReader {
    fn find_files(&self, patterns: &[String]) -> Result<Vec<PathBuf>, FileError> {
        let options = match_options();
        let compiled: Vec<Pattern> = patterns
            .iter()
            .filter_map(|raw| match Pattern::new(raw) {
                Ok(pattern) => Some(pattern),
                Err(err) => {
                    tracing::debug!(pattern = %raw, error = %err, "skipping invalid file pattern");
                    None
                }
            })
            .collect();
        if compiled.is_empty() {
            return Ok(Vec::new());
        }

        let mut matches = BTreeSet::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !entry
                        .file_name()
                        .to_str()
                        .map(|name| self.is_excluded_dir(name))
                        .unwrap_or(false)
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    if err.depth() == 0 {
                        return Err(FileError::Io {
                            path: self.root.clone(),
                            source: err.into(),
                        });
                    }
                    tracing::debug!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            let is_file = entry.file_type().is_file()
                || (entry.path_is_symlink()
                    && fs::metadata(entry.path()).map(|m| m.is_file()).unwrap_or(false));
            if !is_file {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            if blocked_fragment(relative).is_some() {
                continue;
            }
            let candidate = relative.to_string_lossy().replace('\\', "/");
            if compiled
                .iter()
                .any(|pattern| pattern.matches_with(&candidate, options))
            {
                matches.insert(relative.to_path_buf());
            }
        }

        Ok(matches.into_iter().collect())
    }

    fn read_file(&self, path: &Path) -> Result<FileContent, FileError> {
        let (absolute, relative) = self.locate(path)?;

        if let Some(fragment) = blocked_fragment(&relative) {
            return Err(FileError::AccessDenied {
                path: relative,
                reason: format!("matches sensitive pattern '{}'", fragment),
            });
        }
        if !is_allowed_type(&relative) {
            return Err(FileError::UnsupportedType(relative));
        }

        let canonical = absolute.canonicalize().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                FileError::NotFound(relative.clone())
            } else {
                FileError::Io {
                    path: relative.clone(),
                    source,
                }
            }
        })?;
        // Symlinks may point anywhere; judge the resolved target.
        let resolved_relative = canonical
            .strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .map_err(|_| FileError::AccessDenied {
                path: relative.clone(),
                reason: "resolves outside the sandbox root".to_string(),
            })?;
        if let Some(fragment) = blocked_fragment(&resolved_relative) {
            return Err(FileError::AccessDenied {
                path: relative,
                reason: format!("resolves to sensitive pattern '{}'", fragment),
            });
        }
        if !canonical.is_file() {
            return Err(FileError::NotFound(relative));
        }

        let bytes = fs::read(&canonical).map_err(|source| FileError::Io {
            path: relative.clone(),
            source,
        })?;
        let text = String::from_utf8_lossy(&bytes);
        let (content, line_count) = truncate_lines(&text, self.max_lines);

        Ok(FileContent {
            language: detect_language(&relative).to_string(),
            path: relative,
            content,
            line_count,
        })
    }
}
