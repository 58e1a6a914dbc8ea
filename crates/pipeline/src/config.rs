//! Project configuration, stored as `Kiln.toml`.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    compiler::DEFAULT_SOLC_BINARY,
    orchestrator::{Backoff, ConfirmationPolicy},
};

/// File name of the project configuration.
pub const CONFIG_FILENAME: &str = "Kiln.toml";

/// Default JSON-RPC endpoint.
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

/// Default gas limit for deployment transactions.
pub const DEFAULT_GAS: u64 = 3_000_000;

/// Name of the compiled output artifact inside the build directory.
pub const ARTIFACT_FILENAME: &str = "contracts.json";

/// Full configuration of a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KilnConfig {
    pub project: ProjectConfig,
    pub compiler: CompilerConfig,
    pub rpc: RpcConfig,
    pub deploy: DeployConfig,
}

/// Where sources live and where build output goes, relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub contracts_dir: PathBuf,
    pub build_dir: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            contracts_dir: PathBuf::from("contracts"),
            build_dir: PathBuf::from("build"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Compiler executable, looked up on `PATH` when not absolute.
    pub binary: PathBuf,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_SOLC_BINARY),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub url: Url,
    /// Sender of deployment transactions. The node's coinbase when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    pub gas: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: Url::parse(DEFAULT_RPC_URL).expect("default RPC url should always parse"),
            from: None,
            gas: DEFAULT_GAS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub poll_interval_ms: u64,
    pub confirmation_timeout_secs: u64,
    pub backoff: Backoff,
    /// Skip the readiness wait when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_ready_timeout_secs: Option<u64>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            confirmation_timeout_secs: 120,
            backoff: Backoff::Fixed,
            node_ready_timeout_secs: Some(30),
        }
    }
}

impl DeployConfig {
    pub fn confirmation_policy(&self) -> ConfirmationPolicy {
        ConfirmationPolicy {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            timeout: Duration::from_secs(self.confirmation_timeout_secs),
            backoff: self.backoff,
            node_ready_timeout: self.node_ready_timeout_secs.map(Duration::from_secs),
        }
    }
}

impl KilnConfig {
    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Load the configuration from a TOML file, or from `Kiln.toml` inside a directory.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let config_path = if path.is_dir() {
            path.join(CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        };

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {}", config_path.display()))?;
        let config: Self =
            toml::from_str(&content).context("Failed to parse config file as TOML")?;
        tracing::info!(path = %config_path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Directory holding contract sources, resolved against `root`.
    pub fn contracts_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.project.contracts_dir)
    }

    /// Path of the compiled output artifact, resolved against `root`.
    pub fn artifact_path(&self, root: &Path) -> PathBuf {
        root.join(&self.project.build_dir).join(ARTIFACT_FILENAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_round_trip_through_file() {
        let dir = TempDir::new("kiln-config").unwrap();
        let path = dir.path().join(CONFIG_FILENAME);

        let mut config = KilnConfig::default();
        config.rpc.from = Some(Address::with_last_byte(7));
        config.deploy.backoff = Backoff::Exponential;
        config.save_to_file(&path).unwrap();

        assert_eq!(KilnConfig::load_from_file(dir.path()).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: KilnConfig = toml::from_str(
            r#"
            [rpc]
            url = "http://localhost:9000"

            [deploy]
            backoff = "exponential"
            "#,
        )
        .unwrap();

        assert_eq!(config.rpc.url.as_str(), "http://localhost:9000/");
        assert_eq!(config.rpc.gas, DEFAULT_GAS);
        assert_eq!(config.deploy.backoff, Backoff::Exponential);
        assert_eq!(config.deploy.poll_interval_ms, 500);
        assert_eq!(config.project, ProjectConfig::default());
    }

    #[test]
    fn test_confirmation_policy() {
        let deploy = DeployConfig {
            poll_interval_ms: 250,
            confirmation_timeout_secs: 10,
            backoff: Backoff::Fixed,
            node_ready_timeout_secs: None,
        };
        let policy = deploy.confirmation_policy();
        assert_eq!(policy.poll_interval, Duration::from_millis(250));
        assert_eq!(policy.timeout, Duration::from_secs(10));
        assert_eq!(policy.node_ready_timeout, None);
    }

    #[test]
    fn test_paths_resolve_against_root() {
        let config = KilnConfig::default();
        let root = Path::new("/work/bank");
        assert_eq!(config.contracts_dir(root), PathBuf::from("/work/bank/contracts"));
        assert_eq!(
            config.artifact_path(root),
            PathBuf::from("/work/bank/build/contracts.json")
        );
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new("kiln-config").unwrap();
        let err = KilnConfig::load_from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }
}
