//! Built-in sample incidents for interactive mode

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const BUILTIN_MANIFEST: &str = include_str!("samples.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleManifest {
    pub schema_version: u32,
    #[serde(default)]
    pub sample: Vec<Sample>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub id: String,
    pub name: String,
    pub error: String,
}

impl SampleManifest {
    /// The samples compiled into the binary.
    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN_MANIFEST).context("Built-in sample manifest is invalid")
    }

    pub fn parse(content: &str) -> Result<Self> {
        let manifest: SampleManifest =
            toml::from_str(content).context("Failed to parse sample manifest TOML")?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        if self.schema_version != 1 {
            return Err(anyhow!(
                "Unsupported sample manifest schema_version={} (expected 1)",
                self.schema_version
            ));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for sample in &self.sample {
            if sample.id.trim().is_empty() {
                return Err(anyhow!("Sample id must not be empty"));
            }
            let id_ok = sample
                .id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
            if !id_ok {
                return Err(anyhow!(
                    "Sample id '{}' contains unsupported characters (allowed: a-zA-Z0-9_-)",
                    sample.id
                ));
            }
            if !seen.insert(sample.id.as_str()) {
                return Err(anyhow!("Duplicate sample id '{}'", sample.id));
            }
            if sample.error.trim().is_empty() {
                return Err(anyhow!("Sample '{}' has an empty error", sample.id));
            }
        }
        Ok(())
    }

    /// Look up by 1-based menu number or by id.
    pub fn pick(&self, choice: &str) -> Option<&Sample> {
        let choice = choice.trim();
        if let Ok(n) = choice.parse::<usize>() {
            return n.checked_sub(1).and_then(|i| self.sample.get(i));
        }
        self.sample.iter().find(|s| s.id == choice)
    }
}
