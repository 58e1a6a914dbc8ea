//! The persisted compile output.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::contract::{CompiledSet, ContractSource};

/// SHA-256 digest of a compiled source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDigest {
    pub path: PathBuf,
    pub sha256: String,
}

impl SourceDigest {
    pub fn of(source: &ContractSource) -> Self {
        Self {
            path: source.path.clone(),
            sha256: sha256_hex(source.raw_text.as_bytes()),
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Everything one successful compile run produced.
///
/// Written to `<build_dir>/contracts.json` and read back by `deploy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildArtifact {
    /// Compiler version, when the version probe succeeded.
    pub compiler_version: Option<String>,
    /// Unix timestamp of the run.
    pub compiled_at: i64,
    pub sources: Vec<SourceDigest>,
    pub contracts: CompiledSet,
}

impl BuildArtifact {
    /// Create an artifact stamped with the current time.
    pub fn new(
        compiler_version: Option<String>,
        sources: Vec<SourceDigest>,
        contracts: CompiledSet,
    ) -> Self {
        Self {
            compiler_version,
            compiled_at: chrono::Utc::now().timestamp(),
            sources,
            contracts,
        }
    }

    /// Write the artifact as pretty JSON.
    ///
    /// The content goes to a temporary sibling first and is renamed into place,
    /// so readers never observe a partially written file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create build directory {}", parent.display())
            })?;
        }

        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize build artifact")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)
            .with_context(|| format!("Failed to write build artifact to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path).with_context(|| {
            format!("Failed to move build artifact into place at {}", path.display())
        })?;

        tracing::info!(
            path = %path.display(),
            contracts = self.contracts.len(),
            "Build artifact written"
        );
        Ok(())
    }

    /// Load an artifact written by [`BuildArtifact::save_to_file`].
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!(
                "Build artifact does not exist: {} (run `kiln compile` first)",
                path.display()
            );
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read build artifact from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse build artifact {}", path.display()))
    }

    /// Sources that changed or disappeared since the artifact was written.
    pub fn stale_sources(&self) -> Vec<PathBuf> {
        self.sources
            .iter()
            .filter(|digest| match std::fs::read(&digest.path) {
                Ok(bytes) => sha256_hex(&bytes) != digest.sha256,
                Err(_) => true,
            })
            .map(|digest| digest.path.clone())
            .collect()
    }
}
