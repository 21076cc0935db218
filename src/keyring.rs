//! Credential storage for the language-model and search providers
//!
//! Both keys live in one keychain entry (JSON) so the OS prompts at most once.
//! When the keychain is disabled, a local credentials file is used instead.

use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::util::env_flag;

const KEYRING_SERVICE: &str = "incident-responder-credentials";
const KEYRING_USERNAME: &str = "default";

/// Which stored credential to read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential {
    LlmApiKey,
    SearchApiKey,
}

impl Credential {
    pub fn label(&self) -> &'static str {
        match self {
            Credential::LlmApiKey => "language model API key",
            Credential::SearchApiKey => "search API key",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StoredCredentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    llm_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_api_key: Option<String>,
}

impl StoredCredentials {
    fn get(&self, which: Credential) -> Option<String> {
        match which {
            Credential::LlmApiKey => self.llm_api_key.clone(),
            Credential::SearchApiKey => self.search_api_key.clone(),
        }
    }

    fn set(&mut self, which: Credential, value: String) {
        match which {
            Credential::LlmApiKey => self.llm_api_key = Some(value),
            Credential::SearchApiKey => self.search_api_key = Some(value),
        }
    }
}

type KeyringResult<T> = Result<T, String>;

static CREDENTIALS_CACHE: OnceLock<Mutex<Option<StoredCredentials>>> = OnceLock::new();
static KEYRING_ERROR_WARNED: AtomicBool = AtomicBool::new(false);

fn credentials_cache() -> &'static Mutex<Option<StoredCredentials>> {
    CREDENTIALS_CACHE.get_or_init(|| Mutex::new(None))
}

fn keyring_disabled() -> bool {
    cfg!(test) || env_flag("INCIDENT_DISABLE_KEYRING")
}

/// Human-friendly credential backend label used in CLI messages.
pub fn credentials_store_label() -> &'static str {
    if keyring_disabled() {
        "local credentials file"
    } else {
        "system keychain"
    }
}

fn keyring_entry() -> Result<Entry, keyring::Error> {
    Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
}

fn fallback_credentials_path() -> KeyringResult<PathBuf> {
    if let Ok(path) = std::env::var("INCIDENT_CREDENTIALS_FILE") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    if cfg!(test) {
        return Ok(std::env::temp_dir().join("incident-responder-test-credentials.json"));
    }

    dirs::config_dir()
        .map(|p| p.join("incident-responder").join("credentials.json"))
        .ok_or_else(|| "Could not determine credentials file path".to_string())
}

fn read_fallback_credentials() -> KeyringResult<StoredCredentials> {
    let path = fallback_credentials_path()?;
    if !path.exists() {
        return Ok(StoredCredentials::default());
    }
    let json = fs::read_to_string(&path).map_err(|e| {
        format!(
            "Failed to read credentials file '{}': {}",
            path.display(),
            e
        )
    })?;
    serde_json::from_str(&json).map_err(|e| {
        format!(
            "Failed to parse credentials file '{}': {}",
            path.display(),
            e
        )
    })
}

fn write_fallback_credentials(creds: &StoredCredentials) -> KeyringResult<()> {
    let path = fallback_credentials_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            format!(
                "Failed to create credentials directory '{}': {}",
                parent.display(),
                e
            )
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o700));
        }
    }

    let content = serde_json::to_string(creds)
        .map_err(|e| format!("Failed to serialize credentials: {}", e))?;

    let tmp_path = path.with_extension("json.tmp");
    let mut tmp_file = fs::File::create(&tmp_path).map_err(|e| {
        format!(
            "Failed to create temp credentials file '{}': {}",
            tmp_path.display(),
            e
        )
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = tmp_file.set_permissions(fs::Permissions::from_mode(0o600));
    }
    tmp_file
        .write_all(content.as_bytes())
        .map_err(|e| format!("Failed to write credentials file: {}", e))?;
    fs::rename(&tmp_path, &path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        format!(
            "Failed to finalize credentials file '{}': {}",
            path.display(),
            e
        )
    })
}

/// Warn about keychain errors only once per session
pub fn warn_keychain_error_once(context: &str, err: &str) {
    if KEYRING_ERROR_WARNED.swap(true, Ordering::Relaxed) {
        return;
    }
    tracing::warn!(
        context,
        error = err,
        "couldn't access system keychain; set INCIDENT_DISABLE_KEYRING=1 or use environment variables"
    );
}

fn read_credentials_uncached() -> KeyringResult<StoredCredentials> {
    if keyring_disabled() {
        return read_fallback_credentials();
    }
    let entry = keyring_entry().map_err(|e| e.to_string())?;
    match entry.get_password() {
        Ok(json) => {
            serde_json::from_str(&json).map_err(|e| format!("Failed to parse credentials: {}", e))
        }
        Err(keyring::Error::NoEntry) => Ok(StoredCredentials::default()),
        Err(err) => Err(err.to_string()),
    }
}

fn write_credentials(creds: &StoredCredentials) -> KeyringResult<()> {
    if keyring_disabled() {
        return write_fallback_credentials(creds);
    }
    let entry = keyring_entry().map_err(|e| e.to_string())?;
    let json = serde_json::to_string(creds)
        .map_err(|e| format!("Failed to serialize credentials: {}", e))?;
    entry.set_password(&json).map_err(|e| e.to_string())
}

fn read_credentials_cached() -> KeyringResult<StoredCredentials> {
    let mut guard = match credentials_cache().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    if let Some(ref creds) = *guard {
        return Ok(creds.clone());
    }

    let creds = read_credentials_uncached()?;
    *guard = Some(creds.clone());
    Ok(creds)
}

fn update_cache(creds: StoredCredentials) {
    let mut guard = match credentials_cache().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = Some(creds);
}

#[cfg(test)]
fn reset_for_tests() {
    let mut guard = match credentials_cache().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = None;
    KEYRING_ERROR_WARNED.store(false, Ordering::Relaxed);
}

// ============================================================================
// Public API
// ============================================================================

/// Read a stored credential.
pub fn get(which: Credential) -> KeyringResult<Option<String>> {
    Ok(read_credentials_cached()?.get(which))
}

/// Store a credential, keeping the other one untouched.
pub fn set(which: Credential, value: &str) -> KeyringResult<()> {
    let mut creds = read_credentials_cached().unwrap_or_default();
    creds.set(which, value.to_string());
    write_credentials(&creds)?;
    update_cache(creds);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn partial_credentials_omit_missing_fields() {
        let creds = StoredCredentials {
            llm_api_key: Some("sk-test".to_string()),
            search_api_key: None,
        };
        let json = serde_json::to_string(&creds).unwrap();
        assert!(json.contains("sk-test"));
        assert!(!json.contains("search_api_key"));

        let parsed: StoredCredentials = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, StoredCredentials::default());
    }

    #[test]
    fn store_label_uses_file_backend_in_tests() {
        assert_eq!(credentials_store_label(), "local credentials file");
    }

    #[test]
    fn file_backend_round_trip() {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("incident-keyring-test-{}.json", unique));
        std::env::set_var("INCIDENT_CREDENTIALS_FILE", &path);
        let _ = std::fs::remove_file(&path);
        reset_for_tests();

        set(Credential::LlmApiKey, "sk-or-test").unwrap();
        set(Credential::SearchApiKey, "tvly-test").unwrap();
        reset_for_tests();
        assert_eq!(get(Credential::LlmApiKey).unwrap(), Some("sk-or-test".to_string()));
        assert_eq!(
            get(Credential::SearchApiKey).unwrap(),
            Some("tvly-test".to_string())
        );

        let _ = std::fs::remove_file(&path);
        std::env::remove_var("INCIDENT_CREDENTIALS_FILE");
        reset_for_tests();
    }
}
